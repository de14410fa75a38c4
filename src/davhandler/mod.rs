//
// This module contains the main entry point of the library,
// DavHandler.
//
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;

use bytes::{self, buf::Buf};
use futures_util::stream::Stream;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::body::{Body, StreamBody};
use crate::davheaders;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::ls::ActiveLock;
use crate::store::{DavStore, StoreItem};
use crate::util::{dav_method, DavMethod, DavMethodSet};
use crate::DavResult;

mod handle_copymove;
mod handle_delete;
mod handle_gethead;
mod handle_lock;
mod handle_mkcol;
mod handle_options;
mod handle_props;
mod handle_put;

/// Default block size for streaming GET responses.
pub const READ_BUF_SIZE: usize = 16384;
/// Default maximum size of an XML request body.
pub const MAX_BODY_SIZE: usize = 65536;

/// Configuration of the handler.
#[derive(Clone)]
pub struct DavBuilder {
    /// Prefix to be stripped off when handling request.
    prefix: String,
    /// Store backend.
    store: Arc<dyn DavStore>,
    /// Set of allowed methods (Defaults to "all methods")
    allow: DavMethodSet,
    /// Does GET on a collection return an index.
    autoindex: bool,
    /// read buffer size in bytes
    read_buf_size: usize,
    /// maximum size of a PROPFIND/PROPPATCH/LOCK body.
    max_body_size: usize,
}

impl DavBuilder {
    /// Create a new configuration builder.
    pub fn new(store: Arc<dyn DavStore>) -> DavBuilder {
        Self {
            prefix: String::new(),
            store,
            allow: DavMethodSet::all(),
            autoindex: false,
            read_buf_size: READ_BUF_SIZE,
            max_body_size: MAX_BODY_SIZE,
        }
    }

    /// Use the configuration that was built to generate a DavHandler.
    pub fn build(self) -> DavHandler {
        self.into()
    }

    /// Prefix to be stripped off before translating the rest of
    /// the request path to a store path.
    pub fn strip_prefix(self, prefix: impl Into<String>) -> Self {
        let mut this = self;
        this.prefix = prefix.into();
        this
    }

    /// Which methods to allow (default is all methods).
    pub fn methods(self, allow: DavMethodSet) -> Self {
        let mut this = self;
        this.allow = allow;
        this
    }

    /// Does a GET on a collection produce an HTML index.
    pub fn autoindex(self, autoindex: bool) -> Self {
        let mut this = self;
        this.autoindex = autoindex;
        this
    }

    /// Read buffer size in bytes
    pub fn read_buf_size(self, size: usize) -> Self {
        let mut this = self;
        this.read_buf_size = size.max(1);
        this
    }

    /// Maximum size of an XML request body in bytes.
    pub fn max_body_size(self, size: usize) -> Self {
        let mut this = self;
        this.max_body_size = size;
        this
    }
}

/// The webdav handler struct.
///
/// The `builder` and `build` methods are used to instantiate a handler.
///
/// The `handle` and `handle_with` methods are the methods that do the actual work.
#[derive(Clone)]
pub struct DavHandler {
    pub(crate) prefix: Arc<String>,
    pub(crate) store: Arc<dyn DavStore>,
    pub(crate) allow: DavMethodSet,
    pub(crate) autoindex: bool,
    pub(crate) read_buf_size: usize,
    pub(crate) max_body_size: usize,
}

impl From<DavBuilder> for DavHandler {
    fn from(cfg: DavBuilder) -> Self {
        Self {
            prefix: Arc::new(cfg.prefix),
            store: cfg.store,
            allow: cfg.allow,
            autoindex: cfg.autoindex,
            read_buf_size: cfg.read_buf_size,
            max_body_size: cfg.max_body_size,
        }
    }
}

impl DavHandler {
    /// Return a configuration builder.
    pub fn builder(store: Arc<dyn DavStore>) -> DavBuilder {
        DavBuilder::new(store)
    }

    /// Handle a webdav request.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send + 'static,
    {
        self.handle_inner(req).await
    }

    /// Handle a webdav request, with an extra prefix appended to the
    /// configured one.
    pub async fn handle_with<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
        prefix: Option<String>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send + 'static,
    {
        let mut this = self.clone();
        if let Some(prefix) = prefix {
            this.prefix = Arc::new(format!(
                "{}/{}",
                this.prefix.strip_suffix('/').unwrap_or(&this.prefix),
                prefix.strip_prefix('/').unwrap_or(&prefix)
            ));
        }
        this.handle_inner(req).await
    }

    /// Handles a request with a `Stream` body instead of a `HttpBody`.
    #[doc(hidden)]
    pub async fn handle_stream<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: Stream<Item = Result<ReqData, ReqError>> + Send + 'static,
    {
        let req = {
            let (parts, body) = req.into_parts();
            Request::from_parts(parts, StreamBody::new(body))
        };
        self.handle_inner(req).await
    }
}

impl DavHandler {
    // helper.
    pub(crate) fn path(&self, req: &Request<()>) -> DavResult<DavPath> {
        Ok(DavPath::from_uri_and_prefix(req.uri(), &self.prefix)?)
    }

    // the Destination: header, as a path inside our prefix.
    pub(crate) fn destination(&self, req: &Request<()>) -> DavResult<DavPath> {
        let dest = req
            .headers()
            .typed_get::<davheaders::Destination>()
            .ok_or(DavError::Status(StatusCode::BAD_REQUEST))?;
        // absolute URL, or absolute path.
        let url = match url::Url::parse(&dest.0) {
            Ok(url) => {
                if let Some(host) = req.headers().typed_get::<headers::Host>() {
                    if url.host_str() != Some(host.hostname()) {
                        debug!("destination {} is on another server", dest.0);
                        return Err(StatusCode::BAD_GATEWAY.into());
                    }
                }
                url
            }
            Err(_) => url::Url::parse("http://localhost/")
                .and_then(|base| base.join(&dest.0))
                .map_err(|_| DavError::Status(StatusCode::BAD_REQUEST))?,
        };
        Ok(DavPath::from_str_and_prefix(url.path(), &self.prefix)?)
    }

    // the Depth: header. A malformed header is a bad request.
    pub(crate) fn depth(&self, req: &Request<()>) -> DavResult<Option<davheaders::Depth>> {
        req.headers()
            .typed_try_get::<davheaders::Depth>()
            .map_err(|_| DavError::Status(StatusCode::BAD_REQUEST))
    }

    // lock tokens submitted in the If: header.
    pub(crate) fn if_tokens(&self, req: &Request<()>) -> DavResult<Vec<String>> {
        match req.headers().typed_try_get::<davheaders::If>() {
            Ok(Some(hdr)) => Ok(hdr.tokens()),
            Ok(None) => Ok(Vec::new()),
            Err(_) => Err(DavError::Status(StatusCode::BAD_REQUEST)),
        }
    }

    // is the item locked by a lock we do not hold a token for.
    // Only the item's own locks are looked at.
    pub(crate) fn lock_conflict(&self, item: &dyn StoreItem, tokens: &[String]) -> bool {
        let ls = match item.locking_manager() {
            Some(ls) => ls,
            None => return false,
        };
        let locks = ls.active_locks(item);
        !locks.is_empty() && !locks.iter().any(|l| tokens.contains(&l.token))
    }

    // The locks that govern `path`: those of the item itself (if it
    // exists) plus the depth-infinity locks of all its ancestors.
    pub(crate) async fn covering_locks(
        &self,
        item: Option<&dyn StoreItem>,
        path: &DavPath,
    ) -> DavResult<Vec<ActiveLock>> {
        let mut locks = Vec::new();
        if let Some(item) = item {
            if let Some(ls) = item.locking_manager() {
                locks.extend(ls.active_locks(item));
            }
        }
        let mut p = path.clone();
        while !p.is_root() {
            p = p.parent();
            let ancestor = match self.store.get_item(&p).await? {
                Some(ancestor) => ancestor,
                None => continue,
            };
            if let Some(ls) = ancestor.locking_manager() {
                let deep = ls.active_locks(ancestor.as_ref()).into_iter().filter(|l| l.deep);
                locks.extend(deep);
            }
        }
        Ok(locks)
    }

    // 423 unless a token for one of the locks covering `path` was submitted.
    // `item` is `None` when the request creates a new resource.
    pub(crate) async fn check_locked(
        &self,
        item: Option<&dyn StoreItem>,
        path: &DavPath,
        tokens: &[String],
    ) -> DavResult<()> {
        let locks = self.covering_locks(item, path).await?;
        if !locks.is_empty() && !locks.iter().any(|l| tokens.contains(&l.token)) {
            debug!("{} is locked", path);
            return Err(StatusCode::LOCKED.into());
        }
        Ok(())
    }

    // drain request body and return it.
    pub(crate) async fn read_request<ReqBody, ReqData, ReqError>(
        &self,
        body: ReqBody,
        max_size: usize,
    ) -> DavResult<Vec<u8>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let mut data = Vec::new();
        pin_utils::pin_mut!(body);
        while let Some(res) = body.data().await {
            let mut buf = res.map_err(|_| {
                DavError::IoError(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "UnexpectedEof",
                ))
            })?;
            while buf.has_remaining() {
                if data.len() + buf.remaining() > max_size {
                    return Err(StatusCode::PAYLOAD_TOO_LARGE.into());
                }
                let b = buf.chunk();
                let l = b.len();
                data.extend_from_slice(b);
                buf.advance(l);
            }
        }
        Ok(data)
    }

    // internal dispatcher.
    async fn handle_inner<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send + 'static,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        // Turn any DavError results into a HTTP error response.
        match self.handle2(req).await {
            Ok(resp) => {
                debug!("== END REQUEST result {}", resp.status());
                resp
            }
            Err(err) => {
                debug!("== END REQUEST result {:?}", err);
                let mut resp = Response::new(Body::empty());
                *resp.status_mut() = err.statuscode();
                resp.headers_mut().typed_insert(headers::ContentLength(0));
                if err.must_close() {
                    resp.headers_mut().typed_insert(headers::Connection::close());
                }
                resp
            }
        }
    }

    // internal dispatcher part 2.
    async fn handle2<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send + 'static,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let (req, body) = {
            let (parts, body) = req.into_parts();
            (Request::from_parts(parts, ()), body)
        };

        // debug when running the webdav litmus tests.
        if log_enabled!(log::Level::Debug) {
            if let Some(t) = req.headers().typed_get::<davheaders::XLitmus>() {
                debug!("X-Litmus: {:?}", t);
            }
        }

        // translate HTTP method to Webdav method.
        let method = match dav_method(req.method()) {
            Ok(m) => m,
            Err(e) => {
                debug!("refusing method {} request {}", req.method(), req.uri());
                return Err(e);
            }
        };

        // see if method is allowed.
        if !self.allow.contains(method) {
            debug!(
                "method {} not allowed on request {}",
                req.method(),
                req.uri()
            );
            return Err(DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED));
        }

        // make sure the request path is valid.
        let path = self.path(&req)?;

        // PUT is the only handler that reads the body itself. All the
        // other handlers either expected no body, or a pre-read Vec<u8>.
        let (body_strm, body_data) = if method == DavMethod::PUT {
            (Some(body), Vec::new())
        } else {
            (None, self.read_request(body, self.max_body_size).await?)
        };

        // Not all methods accept a body.
        if !DavMethod::WEBDAV_BODY.contains(method) && !body_data.is_empty() {
            debug!("{} does not take a request body", method.as_str());
            return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE.into());
        }

        debug!("== START REQUEST {} {:?}", method.as_str(), path);

        if let Some(body) = body_strm {
            return self.handle_put(&req, body).await;
        }
        if method == DavMethod::OPTIONS {
            self.handle_options(&req)
        } else if method == DavMethod::PROPFIND {
            self.handle_propfind(&req, &body_data).await
        } else if method == DavMethod::PROPPATCH {
            self.handle_proppatch(&req, &body_data).await
        } else if method == DavMethod::MKCOL {
            self.handle_mkcol(&req).await
        } else if method == DavMethod::DELETE {
            self.handle_delete(&req).await
        } else if method == DavMethod::LOCK {
            self.handle_lock(&req, &body_data).await
        } else if method == DavMethod::UNLOCK {
            self.handle_unlock(&req).await
        } else if method == DavMethod::HEAD || method == DavMethod::GET {
            self.handle_get(&req).await
        } else if method == DavMethod::COPY || method == DavMethod::MOVE {
            self.handle_copymove(&req, method).await
        } else {
            Err(DavError::UnknownDavMethod)
        }
    }
}
