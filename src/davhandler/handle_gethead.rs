use std::cmp;
use std::fmt::Write;
use std::io;

use headers::HeaderMapExt;
use http::{HeaderMap, Method, Request, Response, StatusCode};

use crate::body::Body;
use crate::conditional::{self, Validators};
use crate::davheaders::{self, ByteRange};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::store::{DavReadStream, PropName, StoreCollection, StoreItem};
use crate::DavResult;

// Set status and length headers for serving `range` of content with
// length `len`. Returns the (start, count) window to send, or None
// for an unsatisfiable range (416, nothing to send).
fn apply_range(
    res: &mut Response<Body>,
    range: Option<ByteRange>,
    len: u64,
) -> DavResult<Option<(u64, u64)>> {
    let range = match range {
        Some(range) => range,
        None => {
            res.headers_mut().typed_insert(headers::ContentLength(len));
            return Ok(Some((0, len)));
        }
    };
    match range.bounds(len) {
        Some((first, last)) => {
            let cr = headers::ContentRange::bytes(first..=last, len)
                .map_err(|_| DavError::Status(StatusCode::INTERNAL_SERVER_ERROR))?;
            *res.status_mut() = StatusCode::PARTIAL_CONTENT;
            res.headers_mut().typed_insert(cr);
            res.headers_mut()
                .typed_insert(headers::ContentLength(last - first + 1));
            Ok(Some((first, last - first + 1)))
        }
        None => {
            debug!("range {:?} not satisfiable for length {}", range, len);
            *res.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            res.headers_mut()
                .typed_insert(headers::ContentRange::unsatisfied_bytes(len));
            res.headers_mut().typed_insert(headers::ContentLength(0));
            Ok(None)
        }
    }
}

impl crate::DavHandler {
    // Stream `strm` in blocks of read_buf_size, at most `budget` bytes.
    fn stream_body(&self, strm: Box<dyn DavReadStream>, budget: Option<u64>) -> Body {
        let bufsize = self.read_buf_size;
        Body::stream(async_stream::stream! {
            let mut strm = strm;
            let mut left = budget;
            loop {
                let want = match left {
                    Some(0) => break,
                    Some(n) => cmp::min(n, bufsize as u64) as usize,
                    None => bufsize,
                };
                match strm.read_bytes(want).await {
                    Ok(buf) if buf.is_empty() => break,
                    Ok(buf) => {
                        let buf = if buf.len() > want { buf.slice(..want) } else { buf };
                        if let Some(n) = left.as_mut() {
                            *n -= buf.len() as u64;
                        }
                        yield Ok(buf);
                    }
                    Err(e) => {
                        yield Err(io::Error::from(e));
                        break;
                    }
                }
            }
        })
    }

    // ETag, Last-Modified, Content-Type and Content-Language.
    async fn content_headers(&self, item: &dyn StoreItem, v: &Validators, h: &mut HeaderMap) {
        if let Some(etag) = v.etag.clone() {
            h.typed_insert(etag);
        }
        if let Some(lm) = v.last_modified.clone() {
            h.typed_insert(lm);
        }
        let text_prop = |name: &'static str| async move {
            let pm = item.property_manager()?;
            let elem = pm.get_property(&PropName::dav(name), false).await.ok()??;
            elem.get_text().map(|t| t.into_owned())
        };
        match text_prop("getcontenttype").await {
            Some(ct) => h.typed_insert(davheaders::ContentType(ct)),
            None => h.typed_insert(headers::ContentType::from(
                mime_guess::from_path(item.name()).first_or_octet_stream(),
            )),
        }
        if let Some(lang) = text_prop("getcontentlanguage").await {
            h.typed_insert(davheaders::ContentLanguage(lang));
        }
    }

    pub(crate) async fn handle_get(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let head = req.method() == Method::HEAD;
        let mut path = self.path(req)?;
        let item = self
            .store
            .get_item(&path)
            .await?
            .ok_or(DavError::Status(StatusCode::NOT_FOUND))?;

        if let Some(coll) = item.as_collection() {
            if !self.autoindex {
                return Err(StatusCode::METHOD_NOT_ALLOWED.into());
            }
            path.add_slash();
            return self.handle_autoindex(coll, &path, head).await;
        }

        let validators = Validators::of(item.as_ref()).await;
        let mut res = Response::new(Body::empty());
        self.content_headers(item.as_ref(), &validators, res.headers_mut())
            .await;

        match conditional::check(req, Some(&validators)) {
            Some(StatusCode::NOT_MODIFIED) => {
                *res.status_mut() = StatusCode::NOT_MODIFIED;
                res.headers_mut().typed_insert(headers::ContentLength(0));
                return Ok(res);
            }
            Some(status) => return Err(status.into()),
            None => {}
        }

        // a single range, unless If-Range says the content changed.
        // multiple ranges are not supported, the full content is sent.
        let ranges = req
            .headers()
            .typed_get::<headers::Range>()
            .and_then(|r| davheaders::byte_ranges(&r));
        let range = match ranges {
            Some(r) if r.len() == 1 && conditional::range_applies(req, &validators) => Some(r[0]),
            _ => None,
        };

        if let Some(ra) = item.random_access() {
            let len = ra.content_length().await?;
            res.headers_mut().typed_insert(headers::AcceptRanges::bytes());
            let (start, count) = match apply_range(&mut res, range, len)? {
                Some(window) => window,
                None => return Ok(res),
            };
            if head || count == 0 {
                return Ok(res);
            }
            let strm = ra.create_read_stream(start, Some(start + count - 1)).await?;
            *res.body_mut() = self.stream_body(strm, Some(count));
            return Ok(res);
        }

        let mut strm = item.get_readable_stream().await?;
        let len = match strm.content_length() {
            Some(len) if strm.is_seekable() => len,
            _ => {
                // no ranges, no length: just copy until the end.
                if !head {
                    *res.body_mut() = self.stream_body(strm, None);
                }
                return Ok(res);
            }
        };
        res.headers_mut().typed_insert(headers::AcceptRanges::bytes());
        let (start, count) = match apply_range(&mut res, range, len)? {
            Some(window) => window,
            None => return Ok(res),
        };
        if head {
            return Ok(res);
        }
        if start > 0 {
            strm.seek(start).await?;
        }
        *res.body_mut() = self.stream_body(strm, Some(count));
        Ok(res)
    }

    async fn handle_autoindex(
        &self,
        coll: &dyn StoreCollection,
        path: &DavPath,
        head: bool,
    ) -> DavResult<Response<Body>> {
        let mut items = coll.get_items().await?;
        // collections first, then by name.
        items.sort_by_key(|i| (!i.is_collection(), i.name()));

        let upath = htmlescape::encode_minimal(&path.as_url_string_with_prefix());
        let mut w = String::new();
        let _ = write!(
            w,
            "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">\
             <title>Index of {upath}</title></head>\n<body>\n<h1>Index of {upath}</h1>\n<ul>\n"
        );
        if !path.is_root() {
            let parent = path.parent().as_url_string_with_prefix();
            let _ = writeln!(
                w,
                "<li><a href=\"{}\">Parent Directory</a></li>",
                htmlescape::encode_attribute(&parent)
            );
        }
        for item in &items {
            let name = item.name();
            let is_coll = item.is_collection();
            let href = path.push_segment(&name, is_coll).as_url_string_with_prefix();
            let _ = writeln!(
                w,
                "<li><a href=\"{}\">{}{}</a></li>",
                htmlescape::encode_attribute(&href),
                htmlescape::encode_minimal(&name),
                if is_coll { "/" } else { "" }
            );
        }
        w.push_str("</ul>\n</body></html>\n");

        let mut res = Response::new(Body::empty());
        res.headers_mut()
            .typed_insert(headers::ContentType::from(mime_guess::mime::TEXT_HTML_UTF_8));
        res.headers_mut()
            .typed_insert(headers::ContentLength(w.len() as u64));
        if !head {
            *res.body_mut() = Body::from(w);
        }
        Ok(res)
    }
}
