//! Collects the failures of a recursive operation and renders them.
use headers::HeaderMapExt;
use http::{Response, StatusCode};
use xmltree::Element;

use crate::body::Body;
use crate::davpath::DavPath;
use crate::errors::DavResult;
use crate::util::status_line;
use crate::xmltree_ext::{self, ElementExt};

/// Ordered (href, status) pairs for the sub-resources that failed.
#[derive(Debug, Default)]
pub(crate) struct MultiError {
    items: Vec<(DavPath, StatusCode)>,
}

impl MultiError {
    pub(crate) fn new() -> MultiError {
        MultiError::default()
    }

    pub(crate) fn add(&mut self, path: &DavPath, status: StatusCode) {
        debug!("{} failed: {}", path.as_url_string(), status);
        self.items.push((path.clone(), status));
    }

    pub(crate) fn has_items(&self) -> bool {
        !self.items.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    fn to_xml(&self) -> Element {
        let mut ms = Element::new2("D:multistatus");
        for (path, status) in &self.items {
            ms.push_elem(
                Element::new2("D:response")
                    .child(Element::new2("D:href").text(path.as_url_string_with_prefix()))
                    .child(Element::new2("D:status").text(status_line(*status))),
            );
        }
        ms
    }

    /// Turn the collected failures into a response.
    ///
    /// Without failures the answer is `ok`. If the only failure is the
    /// request-URI itself, its status is returned as-is. Anything else
    /// is a 207 Multi-Status listing every failure.
    pub(crate) fn finish(self, request_path: &DavPath, ok: StatusCode) -> DavResult<Response<Body>> {
        let mut resp = Response::new(Body::empty());
        if !self.has_items() {
            *resp.status_mut() = ok;
            resp.headers_mut().typed_insert(headers::ContentLength(0));
            return Ok(resp);
        }
        if self.items.len() == 1 && self.items[0].0.same_resource(request_path) {
            *resp.status_mut() = self.items[0].1;
            resp.headers_mut().typed_insert(headers::ContentLength(0));
            return Ok(resp);
        }
        xmltree_ext::xml_response(StatusCode::MULTI_STATUS, &self.to_xml())
    }
}
