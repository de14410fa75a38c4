use futures_util::future::{BoxFuture, FutureExt};
use http::{Request, Response, StatusCode};
use xmltree::Element;

use crate::body::Body;
use crate::conditional::{self, Validators};
use crate::davheaders::Depth;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::store::{InfiniteDepthMode, PropName, StoreError, StoreItem};
use crate::util::{dav_xml_error, status_line};
use crate::xmltree_ext::{self, ElementExt};
use crate::DavResult;

// What a PROPFIND asks for.
#[derive(Debug, Clone, PartialEq)]
enum PropMode {
    // names only, no values.
    Names,
    // all (cheap) properties, plus the expensive ones listed in <D:include>.
    All(Vec<PropName>),
    // exactly these.
    Prop(Vec<PropName>),
}

fn child_names(elem: &Element) -> Vec<PropName> {
    elem.child_elems_iter().map(PropName::from_element).collect()
}

fn parse_propfind(root: Option<Element>) -> DavResult<PropMode> {
    let root = match root {
        // RFC4918 9.1: an empty body means allprop.
        None => return Ok(PropMode::All(Vec::new())),
        Some(root) => root,
    };
    if !root.is_dav("propfind") {
        debug!("PROPFIND: unexpected element {}", root.name);
        return Err(DavError::XmlParseError);
    }
    if root.dav_child("propname").is_some() {
        Ok(PropMode::Names)
    } else if root.dav_child("allprop").is_some() {
        let include = root.dav_child("include").map(child_names).unwrap_or_default();
        Ok(PropMode::All(include))
    } else if let Some(prop) = root.dav_child("prop") {
        Ok(PropMode::Prop(child_names(prop)))
    } else {
        Err(DavError::XmlParseError)
    }
}

// Property values grouped by status, in the order they are rendered.
#[derive(Default)]
struct PropStats {
    groups: Vec<(StatusCode, Vec<Element>)>,
}

impl PropStats {
    fn add(&mut self, status: StatusCode, elem: Element) {
        match self.groups.iter_mut().find(|(s, _)| *s == status) {
            Some((_, elems)) => elems.push(elem),
            None => self.groups.push((status, vec![elem])),
        }
    }

    fn into_elements(mut self) -> Vec<Element> {
        if self.groups.is_empty() {
            self.groups.push((StatusCode::OK, Vec::new()));
        }
        self.groups.sort_by_key(|(s, _)| s.as_u16());
        self.groups
            .into_iter()
            .map(|(status, elems)| propstat(status, elems))
            .collect()
    }
}

fn propstat(status: StatusCode, elems: Vec<Element>) -> Element {
    let mut prop = Element::new2("D:prop");
    for e in elems {
        prop.push_elem(e);
    }
    Element::new2("D:propstat")
        .child(prop)
        .child(Element::new2("D:status").text(status_line(status)))
}

fn response(path: &DavPath) -> Element {
    Element::new2("D:response").child(Element::new2("D:href").text(path.as_url_string_with_prefix()))
}

fn error_status(e: StoreError) -> StatusCode {
    match e {
        StoreError::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl crate::DavHandler {
    // One <D:response> for one item.
    async fn propfind_response(
        &self,
        item: &dyn StoreItem,
        path: &DavPath,
        mode: &PropMode,
    ) -> Element {
        let mut stats = PropStats::default();
        let pm = item.property_manager();

        match (mode, pm) {
            (PropMode::Names, Some(pm)) => {
                for info in pm.properties() {
                    stats.add(StatusCode::OK, info.name.to_element());
                }
            }
            (PropMode::All(include), Some(pm)) => {
                let infos = pm.properties();
                for info in &infos {
                    let expensive = include.contains(&info.name);
                    match pm.get_property(&info.name, expensive).await {
                        Ok(Some(elem)) => stats.add(StatusCode::OK, elem),
                        // expensive, not asked for.
                        Ok(None) => {}
                        // declared, but not present on this item.
                        Err(StoreError::NotFound) => {}
                        Err(e) => {
                            debug!("PROPFIND {}: {} failed: {:?}", path, info.name, e);
                            stats.add(StatusCode::INTERNAL_SERVER_ERROR, info.name.to_element());
                        }
                    }
                }
                // included names that are not in the declared list.
                for name in include.iter().filter(|n| !infos.iter().any(|i| &i.name == *n)) {
                    match pm.get_property(name, true).await {
                        Ok(Some(elem)) => stats.add(StatusCode::OK, elem),
                        Ok(None) => stats.add(StatusCode::NOT_FOUND, name.to_element()),
                        Err(e) => stats.add(error_status(e), name.to_element()),
                    }
                }
            }
            (PropMode::Prop(names), Some(pm)) => {
                for name in names {
                    match pm.get_property(name, true).await {
                        Ok(Some(elem)) => stats.add(StatusCode::OK, elem),
                        Ok(None) => stats.add(StatusCode::NOT_FOUND, name.to_element()),
                        Err(e) => stats.add(error_status(e), name.to_element()),
                    }
                }
            }
            (PropMode::Prop(names), None) => {
                for name in names {
                    stats.add(StatusCode::NOT_FOUND, name.to_element());
                }
            }
            (_, None) => {}
        }

        let mut resp = response(path);
        for ps in stats.into_elements() {
            resp.push_elem(ps);
        }
        resp
    }

    // Depth-first walk. `depth` is what is left to descend.
    fn propfind_items<'a>(
        &'a self,
        ms: &'a mut Element,
        item: Box<dyn StoreItem>,
        path: &'a DavPath,
        depth: Depth,
        mode: &'a PropMode,
    ) -> BoxFuture<'a, ()> {
        async move {
            ms.push_elem(self.propfind_response(item.as_ref(), path, mode).await);

            let coll = match item.as_collection() {
                Some(coll) if depth != Depth::Zero => coll,
                _ => return,
            };
            let children = match coll.get_items().await {
                Ok(children) => children,
                Err(e) => {
                    // the collection itself was reported, its members are skipped.
                    debug!("PROPFIND {}: cannot list children: {:?}", path, e);
                    return;
                }
            };
            let next = match depth {
                Depth::Infinity => Depth::Infinity,
                _ => Depth::Zero,
            };
            for child in children {
                let cpath = path.push_segment(&child.name(), child.is_collection());
                self.propfind_items(ms, child, &cpath, next, mode).await;
            }
        }
        .boxed()
    }

    pub(crate) async fn handle_propfind(
        &self,
        req: &Request<()>,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        // RFC4918 9.1: no Depth header means infinity.
        let mut depth = self.depth(req)?.unwrap_or(Depth::Infinity);
        let mode = parse_propfind(xmltree_ext::parse_xml(xmldata)?)?;

        let mut path = self.path(req)?;
        let item = self
            .store
            .get_item(&path)
            .await?
            .ok_or(DavError::Status(StatusCode::NOT_FOUND))?;

        if let Some(coll) = item.as_collection() {
            path.add_slash();
            if depth == Depth::Infinity {
                match coll.infinite_depth_mode() {
                    InfiniteDepthMode::Allowed => {}
                    InfiniteDepthMode::Rejected => {
                        debug!("PROPFIND {}: infinite depth rejected", path);
                        let mut res =
                            Response::new(dav_xml_error("<D:propfind-finite-depth/>"));
                        *res.status_mut() = StatusCode::FORBIDDEN;
                        xmltree_ext::set_xml_content_type(res.headers_mut());
                        return Ok(res);
                    }
                    InfiniteDepthMode::Assume0 => depth = Depth::Zero,
                    InfiniteDepthMode::Assume1 => depth = Depth::One,
                }
            }
        }

        let mut ms = Element::new2("D:multistatus");
        self.propfind_items(&mut ms, item, &path, depth, &mode)
            .await;
        xmltree_ext::xml_response(StatusCode::MULTI_STATUS, &ms)
    }

    pub(crate) async fn handle_proppatch(
        &self,
        req: &Request<()>,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let root = xmltree_ext::parse_xml(xmldata)?.ok_or(DavError::XmlParseError)?;
        if !root.is_dav("propertyupdate") {
            return Err(DavError::XmlParseError);
        }

        // set and remove instructions, in document order.
        let mut ops: Vec<(PropName, Option<Element>)> = Vec::new();
        for elem in root.child_elems_iter() {
            let set = if elem.is_dav("set") {
                true
            } else if elem.is_dav("remove") {
                false
            } else {
                continue;
            };
            let prop = match elem.dav_child("prop") {
                Some(prop) => prop,
                None => return Err(DavError::XmlParseError),
            };
            for p in prop.child_elems_iter() {
                let value = if set { Some(p.clone()) } else { None };
                ops.push((PropName::from_element(p), value));
            }
        }

        let mut path = self.path(req)?;
        let tokens = self.if_tokens(req)?;
        let item = self
            .store
            .get_item(&path)
            .await?
            .ok_or(DavError::Status(StatusCode::NOT_FOUND))?;
        if item.is_collection() {
            path.add_slash();
        }
        let validators = Validators::of(item.as_ref()).await;
        if let Some(status) = conditional::check(req, Some(&validators)) {
            return Err(status.into());
        }
        self.check_locked(Some(item.as_ref()), &path, &tokens)
            .await?;

        let mut resp = response(&path);
        for (name, value) in ops {
            let status = match item.property_manager() {
                None => StatusCode::FORBIDDEN,
                Some(pm) => match pm.set_property(&name, value).await {
                    Ok(()) => StatusCode::OK,
                    Err(StoreError::Conflict) => StatusCode::CONFLICT,
                    Err(StoreError::InsufficientStorage) => StatusCode::INSUFFICIENT_STORAGE,
                    Err(e) => {
                        debug!("PROPPATCH {}: {} refused: {:?}", path, name, e);
                        StatusCode::FORBIDDEN
                    }
                },
            };
            resp.push_elem(propstat(status, vec![name.to_element()]));
        }

        let ms = Element::new2("D:multistatus").child(resp);
        xmltree_ext::xml_response(StatusCode::MULTI_STATUS, &ms)
    }
}
