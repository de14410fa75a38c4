//! Property names, and a table-driven helper for property managers.
//!
//! Backends usually have a fixed set of "live" properties that are
//! computed from the item (size, dates, etag). A [`PropertyTable`] maps
//! each of those to a getter and an optional setter, so that a
//! `DavPropertyManager` implementation only has to delegate.
use std::fmt;

use futures_util::future;
use xmltree::Element;

use crate::store::{StoreError, StoreFuture};
use crate::xmltree_ext::ElementExt;

pub const NS_DAV_URI: &str = "DAV:";

/// Fully qualified property name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropName {
    /// Namespace URI, empty for "no namespace".
    pub namespace: String,
    pub name: String,
}

impl PropName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> PropName {
        PropName {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// A property in the `DAV:` namespace.
    pub fn dav(name: impl Into<String>) -> PropName {
        PropName::new(NS_DAV_URI, name)
    }

    pub fn from_element(elem: &Element) -> PropName {
        PropName {
            namespace: elem.namespace.clone().unwrap_or_default(),
            name: elem.name.clone(),
        }
    }

    pub fn is_dav(&self) -> bool {
        self.namespace == NS_DAV_URI
    }

    /// An empty element with this name.
    pub fn to_element(&self) -> Element {
        let mut elem = Element::new(&self.name);
        if self.is_dav() {
            elem.prefix = Some("D".to_string());
            elem.namespace = Some(NS_DAV_URI.to_string());
        } else if !self.namespace.is_empty() {
            elem.prefix = Some("X".to_string());
            elem.namespace = Some(self.namespace.clone());
        }
        elem
    }

    /// An element with this name and a text value.
    pub fn with_text(&self, text: impl Into<String>) -> Element {
        self.to_element().text(text)
    }
}

impl fmt::Display for PropName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{{}}}{}", self.namespace, self.name)
    }
}

/// A property declared by an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyInfo {
    pub name: PropName,
    /// Only computed when explicitly asked for.
    pub is_expensive: bool,
}

pub type Getter<T> = for<'a> fn(&'a T) -> StoreFuture<'a, Element>;
pub type Setter<T> = for<'a> fn(&'a T, Option<Element>) -> StoreFuture<'a, ()>;

/// One row of a property table.
pub struct DavProperty<T> {
    pub name: PropName,
    pub is_expensive: bool,
    pub getter: Getter<T>,
    pub setter: Option<Setter<T>>,
}

impl<T> DavProperty<T> {
    /// A cheap, read-only DAV: property.
    pub fn dav(name: &str, getter: Getter<T>) -> DavProperty<T> {
        DavProperty {
            name: PropName::dav(name),
            is_expensive: false,
            getter,
            setter: None,
        }
    }

    pub fn expensive(mut self) -> Self {
        self.is_expensive = true;
        self
    }

    pub fn settable(mut self, setter: Setter<T>) -> Self {
        self.setter = Some(setter);
        self
    }
}

/// Getter/setter table for entries of type `T`.
pub struct PropertyTable<T> {
    props: Vec<DavProperty<T>>,
}

impl<T: Sync> PropertyTable<T> {
    pub fn new(props: Vec<DavProperty<T>>) -> PropertyTable<T> {
        PropertyTable { props }
    }

    pub fn infos(&self) -> Vec<PropertyInfo> {
        self.props
            .iter()
            .map(|p| PropertyInfo {
                name: p.name.clone(),
                is_expensive: p.is_expensive,
            })
            .collect()
    }

    pub fn contains(&self, name: &PropName) -> bool {
        self.find(name).is_some()
    }

    fn find(&self, name: &PropName) -> Option<&DavProperty<T>> {
        self.props.iter().find(|p| &p.name == name)
    }

    /// Get a property of `entry`. Unknown names are `StoreError::NotFound`.
    pub fn get<'a>(
        &'a self,
        entry: &'a T,
        name: &PropName,
        compute_expensive: bool,
    ) -> StoreFuture<'a, Option<Element>> {
        let prop = match self.find(name) {
            Some(prop) => prop,
            None => return Box::pin(future::ready(Err(StoreError::NotFound))),
        };
        if prop.is_expensive && !compute_expensive {
            return Box::pin(future::ready(Ok(None)));
        }
        let fut = (prop.getter)(entry);
        Box::pin(async move { fut.await.map(Some) })
    }

    /// Set a property of `entry`. Properties without a setter are protected.
    pub fn set<'a>(
        &'a self,
        entry: &'a T,
        name: &PropName,
        value: Option<Element>,
    ) -> StoreFuture<'a, ()> {
        match self.find(name) {
            Some(DavProperty {
                setter: Some(setter),
                ..
            }) => setter(entry, value),
            Some(_) => Box::pin(future::ready(Err(StoreError::Forbidden))),
            None => Box::pin(future::ready(Err(StoreError::NotFound))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Entry {
        size: u64,
    }

    fn get_size(e: &Entry) -> StoreFuture<'_, Element> {
        let elem = PropName::dav("getcontentlength").with_text(e.size.to_string());
        Box::pin(future::ready(Ok(elem)))
    }

    fn get_slow(_e: &Entry) -> StoreFuture<'_, Element> {
        Box::pin(future::ready(Err(StoreError::GeneralFailure)))
    }

    fn table() -> PropertyTable<Entry> {
        PropertyTable::new(vec![
            DavProperty::dav("getcontentlength", get_size),
            DavProperty::dav("quota-used-bytes", get_slow).expensive(),
        ])
    }

    #[tokio::test]
    async fn table_lookup() {
        let t = table();
        let e = Entry { size: 42 };
        let v = t
            .get(&e, &PropName::dav("getcontentlength"), false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(v.get_text().unwrap(), "42");

        let skipped = t.get(&e, &PropName::dav("quota-used-bytes"), false).await;
        assert!(matches!(skipped, Ok(None)));
        let computed = t.get(&e, &PropName::dav("quota-used-bytes"), true).await;
        assert_eq!(computed.unwrap_err(), StoreError::GeneralFailure);

        let missing = t.get(&e, &PropName::new("urn:x", "y"), true).await;
        assert_eq!(missing.unwrap_err(), StoreError::NotFound);
    }

    #[tokio::test]
    async fn protected_properties() {
        let t = table();
        let e = Entry { size: 1 };
        let r = t.set(&e, &PropName::dav("getcontentlength"), None).await;
        assert_eq!(r.unwrap_err(), StoreError::Forbidden);
        assert_eq!(t.infos().len(), 2);
        assert!(t.infos()[1].is_expensive);
    }
}
