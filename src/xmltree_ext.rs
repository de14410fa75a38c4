use std::borrow::Cow;
use std::io::Write;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue};
use http::{Response, StatusCode};

use xml::writer::{EventWriter, XmlEvent as XmlWEvent};
use xml::EmitterConfig;
use xmltree::{Element, XMLNode};

use crate::body::Body;
use crate::errors::{DavError, DavResult};
use crate::store::props::NS_DAV_URI;
use crate::util::MemBuffer;

pub(crate) trait ElementExt {
    /// Builder: "D:name" creates an element in the DAV: namespace.
    fn new2<'a, N: Into<&'a str>>(n: N) -> Self;
    /// Builder.
    fn text<T: Into<String>>(self, t: T) -> Self;
    /// Builder.
    fn child(self, e: Element) -> Self;
    /// Add a child element.
    fn push_elem(&mut self, e: Element);
    /// Iterator over the children that are elements.
    fn child_elems_iter<'a>(&'a self) -> Box<dyn Iterator<Item = &'a Element> + 'a>;
    /// Is this `<DAV:name>`.
    fn is_dav(&self, name: &str) -> bool;
    /// First child element `<DAV:name>`.
    fn dav_child(&self, name: &str) -> Option<&Element>;
    /// Write this element (and its children) as xml events.
    fn write_ev<W: Write>(&self, emitter: &mut EventWriter<W>) -> xml::writer::Result<()>;
}

impl ElementExt for Element {
    fn new2<'a, N: Into<&'a str>>(n: N) -> Element {
        let v: Vec<&str> = n.into().splitn(2, ':').collect();
        if v.len() == 1 {
            Element::new(v[0])
        } else {
            let mut e = Element::new(v[1]);
            e.prefix = Some(v[0].to_string());
            if v[0] == "D" {
                e.namespace = Some(NS_DAV_URI.to_string());
            }
            e
        }
    }

    fn text<S: Into<String>>(mut self, t: S) -> Element {
        let nodes = &mut self.children;
        nodes.clear();
        nodes.push(XMLNode::Text(t.into()));
        self
    }

    fn child(mut self, e: Element) -> Element {
        self.children.push(XMLNode::Element(e));
        self
    }

    fn push_elem(&mut self, e: Element) {
        self.children.push(XMLNode::Element(e));
    }

    fn child_elems_iter<'a>(&'a self) -> Box<dyn Iterator<Item = &'a Element> + 'a> {
        Box::new(self.children.iter().filter_map(|n| n.as_element()))
    }

    fn is_dav(&self, name: &str) -> bool {
        self.name == name && self.namespace.as_deref() == Some(NS_DAV_URI)
    }

    fn dav_child(&self, name: &str) -> Option<&Element> {
        self.child_elems_iter().find(|e| e.is_dav(name))
    }

    fn write_ev<W: Write>(&self, emitter: &mut EventWriter<W>) -> xml::writer::Result<()> {
        let qname = match self.prefix {
            Some(ref p) => Cow::Owned(format!("{}:{}", p, self.name)),
            None => Cow::Borrowed(self.name.as_str()),
        };
        let mut start = XmlWEvent::start_element(qname.as_ref());
        // declarations already in scope are not repeated by the emitter.
        match (&self.prefix, &self.namespace) {
            (Some(p), Some(ns)) => start = start.ns(p.as_str(), ns.as_str()),
            (None, Some(ns)) => start = start.default_ns(ns.as_str()),
            (None, None) => start = start.default_ns(""),
            (Some(_), None) => {}
        }
        for (k, v) in self.attributes.iter() {
            start = start.attr(k.as_str(), v.as_str());
        }
        emitter.write(start)?;
        for node in &self.children {
            match node {
                XMLNode::Element(e) => e.write_ev(emitter)?,
                XMLNode::Text(t) => emitter.write(XmlWEvent::characters(t))?,
                XMLNode::CData(t) => emitter.write(XmlWEvent::cdata(t))?,
                _ => {}
            }
        }
        emitter.write(XmlWEvent::end_element())?;
        Ok(())
    }
}

/// Parse a request body. Empty (or whitespace-only) bodies are `None`.
pub(crate) fn parse_xml(data: &[u8]) -> DavResult<Option<Element>> {
    if data.iter().all(|c| c.is_ascii_whitespace()) {
        return Ok(None);
    }
    match Element::parse(data) {
        Ok(e) => Ok(Some(e)),
        Err(e) => {
            debug!("xml parse error: {e}");
            Err(DavError::XmlReadError)
        }
    }
}

/// Serialize an element tree, with xml declaration.
pub(crate) fn xml_bytes(root: &Element) -> DavResult<Bytes> {
    let mut buffer = MemBuffer::new();
    let mut emitter = EventWriter::new_with_config(
        &mut buffer,
        EmitterConfig::new()
            .perform_indent(false)
            .normalize_empty_elements(true),
    );
    root.write_ev(&mut emitter)?;
    drop(emitter);
    Ok(buffer.take())
}

/// A response with an XML document as body.
pub(crate) fn xml_response(status: StatusCode, root: &Element) -> DavResult<Response<Body>> {
    let mut resp = Response::new(Body::from(xml_bytes(root)?));
    *resp.status_mut() = status;
    set_xml_content_type(resp.headers_mut());
    Ok(resp)
}

/// `Content-Type: text/xml; charset=utf-8`.
pub(crate) fn set_xml_content_type(headers: &mut HeaderMap) {
    headers.insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("text/xml; charset=utf-8"),
    );
}
