use std::error::Error as StdError;

use bytes::Buf;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::body::{self, Body};
use crate::conditional::{self, Validators};
use crate::errors::DavError;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_put<ReqBody, ReqData, ReqError>(
        &self,
        req: &Request<()>,
        body: ReqBody,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send + 'static,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let path = self.path(req)?;
        if path.is_root() || path.is_collection() {
            return Err(StatusCode::METHOD_NOT_ALLOWED.into());
        }
        // partial PUT is not supported (RFC7231 4.3.4).
        if req.headers().contains_key(http::header::CONTENT_RANGE) {
            return Err(StatusCode::BAD_REQUEST.into());
        }
        let tokens = self.if_tokens(req)?;

        let parent = self
            .store
            .get_collection(&path.parent())
            .await?
            .ok_or(DavError::Status(StatusCode::CONFLICT))?;
        let name = path.file_name();

        let validators = match parent.get_item(&name).await? {
            Some(item) => {
                if item.is_collection() {
                    debug!("PUT: {} is a collection", path);
                    return Err(StatusCode::METHOD_NOT_ALLOWED.into());
                }
                self.check_locked(Some(item.as_ref()), &path, &tokens)
                    .await?;
                Some(Validators::of(item.as_ref()).await)
            }
            None => {
                self.check_locked(None, &path, &tokens).await?;
                None
            }
        };
        if let Some(status) = conditional::check(req, validators.as_ref()) {
            return Err(status.into());
        }

        let placed = parent.create_item(&name, true).await?;
        let status = placed.status();
        // if the upload fails, its status is the answer.
        placed
            .entry
            .upload_from_stream(body::upload_stream(body))
            .await?;

        let mut res = Response::new(Body::empty());
        *res.status_mut() = status;
        res.headers_mut().typed_insert(headers::ContentLength(0));
        // look the item up again, the handle may cache stale metadata.
        if let Some(item) = parent.get_item(&name).await? {
            if let Some(etag) = Validators::of(item.as_ref()).await.etag {
                res.headers_mut().typed_insert(etag);
            }
        }
        Ok(res)
    }
}
