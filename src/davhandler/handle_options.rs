use headers::HeaderMapExt;
use http::header::HeaderValue;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::util::METHOD_NAMES;
use crate::DavResult;

impl crate::DavHandler {
    // OPTIONS does not look at the store: the answer is the same for every URL.
    pub(crate) fn handle_options(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());
        let h = res.headers_mut();

        // class 2 is advertised even if LOCK is not in the allowed set,
        // locking is a property of the items, not of the handler.
        h.insert("DAV", HeaderValue::from_static("1, 2"));
        h.insert("MS-Author-Via", HeaderValue::from_static("DAV"));
        h.typed_insert(headers::ContentLength(0));

        let allow = METHOD_NAMES
            .iter()
            .filter(|(m, _)| self.allow.contains(*m))
            .map(|(_, name)| *name)
            .collect::<Vec<_>>()
            .join(", ");
        let allow = HeaderValue::from_str(&allow).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        h.insert(http::header::ALLOW, allow);

        debug!("OPTIONS {}: {:?}", req.uri(), h.get(http::header::ALLOW));
        Ok(res)
    }
}
