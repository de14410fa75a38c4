//! Simple in-memory store.
//!
//! This implementation has state, so if you create a new instance in a
//! handler(), it will be empty every time.
//!
//! This means you have to create the instance once, using `MemStore::new`,
//! and pass the same `Arc` to every `DavHandler` that should see the
//! same tree.
//!
//! Apart from content, every item stores arbitrary dead properties, and
//! the whole store can be limited to a number of bytes.
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use parking_lot::Mutex;
use uuid::Uuid;
use xmltree::Element;

use crate::davpath::DavPath;
use crate::ls::{self, DavLockSystem};
use crate::store::*;
use crate::util::{systemtime_to_httpdate, systemtime_to_rfc3339};
use crate::xmltree_ext::ElementExt;

/// Ephemeral in-memory store.
#[derive(Debug)]
pub struct MemStore {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    root: Arc<MemNode>,
    ls: Arc<dyn DavLockSystem>,
    quota: Option<u64>,
    depth_mode: InfiniteDepthMode,
}

#[derive(Debug)]
struct MemNode {
    key: String,
    state: Mutex<NodeState>,
}

#[derive(Debug)]
struct NodeState {
    kind: NodeKind,
    // dead properties.
    props: HashMap<PropName, Element>,
    created: SystemTime,
    modified: SystemTime,
    // bumped on every content change, part of the etag.
    version: u64,
}

#[derive(Debug)]
enum NodeKind {
    File(Bytes),
    Dir(BTreeMap<String, Arc<MemNode>>),
}

impl MemNode {
    fn new(kind: NodeKind) -> Arc<MemNode> {
        let now = SystemTime::now();
        Arc::new(MemNode {
            key: Uuid::new_v4().to_string(),
            state: Mutex::new(NodeState {
                kind,
                props: HashMap::new(),
                created: now,
                modified: now,
                version: 0,
            }),
        })
    }

    fn new_file() -> Arc<MemNode> {
        MemNode::new(NodeKind::File(Bytes::new()))
    }

    fn new_dir() -> Arc<MemNode> {
        MemNode::new(NodeKind::Dir(BTreeMap::new()))
    }

    fn is_dir(&self) -> bool {
        matches!(self.state.lock().kind, NodeKind::Dir(_))
    }

    fn child(&self, name: &str) -> Option<Arc<MemNode>> {
        match &self.state.lock().kind {
            NodeKind::Dir(children) => children.get(name).cloned(),
            NodeKind::File(_) => None,
        }
    }

    // bytes used by this node and everything below it.
    fn tree_size(&self) -> u64 {
        let children = match &self.state.lock().kind {
            NodeKind::File(data) => return data.len() as u64,
            NodeKind::Dir(children) => children.values().cloned().collect::<Vec<_>>(),
        };
        children.iter().map(|c| c.tree_size()).sum()
    }

    fn touch(&self) {
        let mut state = self.state.lock();
        state.modified = SystemTime::now();
        state.version += 1;
    }
}

impl MemStore {
    /// Create a new, empty store. Locks are kept in `ls`.
    pub fn new(ls: Arc<dyn DavLockSystem>) -> Arc<MemStore> {
        MemStore::with_options(ls, None, InfiniteDepthMode::Allowed)
    }

    /// Create a new, empty store that holds at most `quota` bytes of content,
    /// and with a policy for infinite-depth PROPFIND.
    pub fn with_options(
        ls: Arc<dyn DavLockSystem>,
        quota: Option<u64>,
        depth_mode: InfiniteDepthMode,
    ) -> Arc<MemStore> {
        Arc::new(MemStore {
            shared: Arc::new(Shared {
                root: MemNode::new_dir(),
                ls,
                quota,
                depth_mode,
            }),
        })
    }
}

impl DavStore for MemStore {
    fn get_item<'a>(&'a self, path: &'a DavPath) -> StoreFuture<'a, Option<Box<dyn StoreItem>>> {
        let mut node = self.shared.root.clone();
        let mut name = String::new();
        for segment in path.segments() {
            node = match node.child(&segment) {
                Some(child) => child,
                None => return ready(Ok(None)),
            };
            name = segment;
        }
        // "file/" does not name anything.
        if path.is_collection() && !path.is_root() && !node.is_dir() {
            return ready(Ok(None));
        }
        trace!("memstore: get_item {}", path);
        let item: Box<dyn StoreItem> = Box::new(MemItem {
            node,
            name,
            shared: self.shared.clone(),
        });
        ready(Ok(Some(item)))
    }
}

/// An item of a [`MemStore`].
#[derive(Debug, Clone)]
pub struct MemItem {
    node: Arc<MemNode>,
    name: String,
    shared: Arc<Shared>,
}

impl MemItem {
    fn wrap(&self, node: Arc<MemNode>, name: &str) -> MemItem {
        MemItem {
            node,
            name: name.to_string(),
            shared: self.shared.clone(),
        }
    }

    fn content(&self) -> StoreResult<Bytes> {
        match &self.node.state.lock().kind {
            NodeKind::File(data) => Ok(data.clone()),
            NodeKind::Dir(_) => Err(StoreError::Forbidden),
        }
    }

    // the MemItem behind a collection of this same store.
    fn same_store<'a>(&self, other: &'a dyn StoreCollection) -> Option<&'a MemItem> {
        other
            .as_item()
            .as_any()
            .downcast_ref::<MemItem>()
            .filter(|o| Arc::ptr_eq(&o.shared, &self.shared))
    }

    // Put `node` into this collection as `name`. Returns whether an
    // existing entry was replaced.
    fn insert(&self, name: &str, node: Arc<MemNode>, overwrite: bool) -> StoreResult<bool> {
        let mut state = self.node.state.lock();
        let children = match &mut state.kind {
            NodeKind::Dir(children) => children,
            NodeKind::File(_) => return Err(StoreError::Forbidden),
        };
        if children.contains_key(name) && !overwrite {
            return Err(StoreError::Exists);
        }
        let overwritten = children.insert(name.to_string(), node).is_some();
        state.modified = SystemTime::now();
        Ok(overwritten)
    }
}

impl StoreItem for MemItem {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn unique_key(&self) -> String {
        self.node.key.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_collection(&self) -> Option<&dyn StoreCollection> {
        if self.node.is_dir() {
            Some(self)
        } else {
            None
        }
    }

    fn into_collection(self: Box<Self>) -> Option<Box<dyn StoreCollection>> {
        if self.node.is_dir() {
            Some(self)
        } else {
            None
        }
    }

    fn get_readable_stream(&self) -> StoreFuture<'_, Box<dyn DavReadStream>> {
        let res = self
            .content()
            .map(|data| Box::new(BytesStream::new(data)) as Box<dyn DavReadStream>);
        ready(res)
    }

    fn upload_from_stream(&self, mut src: UploadStream) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let current = self.content()?.len() as u64;
            // what the rest of the store uses, this item excluded.
            let others = match self.shared.quota {
                Some(_) => self.shared.root.tree_size().saturating_sub(current),
                None => 0,
            };
            let mut buf = BytesMut::new();
            while let Some(chunk) = src.next().await {
                let chunk = chunk?;
                if let Some(quota) = self.shared.quota {
                    if others + (buf.len() + chunk.len()) as u64 > quota {
                        debug!("memstore: quota of {} bytes exceeded", quota);
                        return Err(StoreError::InsufficientStorage);
                    }
                }
                buf.extend_from_slice(&chunk);
            }
            self.node.state.lock().kind = NodeKind::File(buf.freeze());
            self.node.touch();
            Ok(())
        })
    }

    fn copy_to<'a>(
        &'a self,
        dest: &'a dyn StoreCollection,
        name: &'a str,
        overwrite: bool,
    ) -> StoreFuture<'a, Placed<Box<dyn StoreItem>>> {
        Box::pin(copy_item(self, dest, name, overwrite))
    }

    fn property_manager(&self) -> Option<&dyn DavPropertyManager> {
        Some(self)
    }

    fn locking_manager(&self) -> Option<Arc<dyn DavLockSystem>> {
        Some(self.shared.ls.clone())
    }

    fn random_access(&self) -> Option<&dyn RandomAccess> {
        if self.node.is_dir() {
            None
        } else {
            Some(self)
        }
    }
}

impl StoreCollection for MemItem {
    fn as_item(&self) -> &dyn StoreItem {
        self
    }

    fn get_item<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<Box<dyn StoreItem>>> {
        let item = self
            .node
            .child(name)
            .map(|node| Box::new(self.wrap(node, name)) as Box<dyn StoreItem>);
        ready(Ok(item))
    }

    fn get_items(&self) -> StoreFuture<'_, Vec<Box<dyn StoreItem>>> {
        let items = match &self.node.state.lock().kind {
            NodeKind::Dir(children) => Ok(children
                .iter()
                .map(|(name, node)| Box::new(self.wrap(node.clone(), name)) as Box<dyn StoreItem>)
                .collect()),
            NodeKind::File(_) => Err(StoreError::Forbidden),
        };
        ready(items)
    }

    fn create_item<'a>(
        &'a self,
        name: &'a str,
        overwrite: bool,
    ) -> StoreFuture<'a, Placed<Box<dyn StoreItem>>> {
        trace!("memstore: create_item {}", name);
        // an existing file is truncated in place, so it keeps its identity.
        if let Some(existing) = self.node.child(name) {
            if !overwrite {
                return ready(Err(StoreError::Exists));
            }
            let truncated = {
                let mut state = existing.state.lock();
                match state.kind {
                    NodeKind::File(_) => {
                        state.kind = NodeKind::File(Bytes::new());
                        true
                    }
                    NodeKind::Dir(_) => false,
                }
            };
            if truncated {
                existing.touch();
                let item: Box<dyn StoreItem> = Box::new(self.wrap(existing.clone(), name));
                return ready(Ok(Placed::new(item, true)));
            }
        }
        let node = MemNode::new_file();
        let res = self.insert(name, node.clone(), overwrite).map(|overwritten| {
            Placed::new(Box::new(self.wrap(node, name)) as Box<dyn StoreItem>, overwritten)
        });
        ready(res)
    }

    fn create_collection<'a>(
        &'a self,
        name: &'a str,
        overwrite: bool,
    ) -> StoreFuture<'a, Placed<Box<dyn StoreCollection>>> {
        trace!("memstore: create_collection {}", name);
        let node = MemNode::new_dir();
        let res = self.insert(name, node.clone(), overwrite).map(|overwritten| {
            Placed::new(Box::new(self.wrap(node, name)) as Box<dyn StoreCollection>, overwritten)
        });
        ready(res)
    }

    fn delete_item<'a>(&'a self, name: &'a str) -> StoreFuture<'a, ()> {
        trace!("memstore: delete_item {}", name);
        let mut state = self.node.state.lock();
        let res = match &mut state.kind {
            NodeKind::Dir(children) => children.remove(name).map(|_| ()).ok_or(StoreError::NotFound),
            NodeKind::File(_) => Err(StoreError::Forbidden),
        };
        if res.is_ok() {
            state.modified = SystemTime::now();
        }
        ready(res)
    }

    fn move_item<'a>(
        &'a self,
        name: &'a str,
        dest: &'a dyn StoreCollection,
        dest_name: &'a str,
        overwrite: bool,
    ) -> StoreFuture<'a, Placed<Box<dyn StoreItem>>> {
        let target = match self.same_store(dest) {
            Some(target) => target,
            None => {
                // another store: copy, then delete.
                return Box::pin(async move {
                    let item = StoreCollection::get_item(self, name)
                        .await?
                        .ok_or(StoreError::NotFound)?;
                    let placed = item.copy_to(dest, dest_name, overwrite).await?;
                    self.delete_item(name).await?;
                    Ok(placed)
                });
            }
        };
        trace!("memstore: move_item {} to {}", name, dest_name);

        let node = match self.node.child(name) {
            Some(node) => node,
            None => return ready(Err(StoreError::NotFound)),
        };
        if !overwrite && target.node.child(dest_name).is_some() {
            return ready(Err(StoreError::Exists));
        }
        {
            let mut state = self.node.state.lock();
            if let NodeKind::Dir(children) = &mut state.kind {
                children.remove(name);
            }
            state.modified = SystemTime::now();
        }
        let res = target.insert(dest_name, node.clone(), true).map(|overwritten| {
            Placed::new(Box::new(target.wrap(node, dest_name)) as Box<dyn StoreItem>, overwritten)
        });
        ready(res)
    }

    fn supports_fast_move(
        &self,
        dest: &dyn StoreCollection,
        _dest_name: &str,
        _overwrite: bool,
    ) -> bool {
        self.same_store(dest).is_some()
    }

    fn infinite_depth_mode(&self) -> InfiniteDepthMode {
        self.shared.depth_mode
    }
}

impl RandomAccess for MemItem {
    fn content_length(&self) -> StoreFuture<'_, u64> {
        ready(self.content().map(|data| data.len() as u64))
    }

    fn create_read_stream(
        &self,
        start: u64,
        end: Option<u64>,
    ) -> StoreFuture<'_, Box<dyn DavReadStream>> {
        let res = self.content().map(|data| {
            let len = data.len();
            let start = std::cmp::min(start, len as u64) as usize;
            let end = match end {
                Some(end) => std::cmp::min(end.saturating_add(1), len as u64) as usize,
                None => len,
            };
            let window = data.slice(start..std::cmp::max(start, end));
            Box::new(BytesStream::new(window)) as Box<dyn DavReadStream>
        });
        ready(res)
    }
}

fn text(name: &str, value: impl Into<String>) -> StoreFuture<'static, Element> {
    ready(Ok(PropName::dav(name).with_text(value)))
}

fn get_displayname(item: &MemItem) -> StoreFuture<'_, Element> {
    text("displayname", item.name.clone())
}

fn get_resourcetype(item: &MemItem) -> StoreFuture<'_, Element> {
    let mut elem = Element::new2("D:resourcetype");
    if item.node.is_dir() {
        elem.push_elem(Element::new2("D:collection"));
    }
    ready(Ok(elem))
}

fn get_contentlength(item: &MemItem) -> StoreFuture<'_, Element> {
    match item.content() {
        Ok(data) => text("getcontentlength", data.len().to_string()),
        Err(e) => ready(Err(e)),
    }
}

fn get_contenttype(item: &MemItem) -> StoreFuture<'_, Element> {
    let mime = mime_guess::from_path(&item.name).first_or_octet_stream();
    text("getcontenttype", mime.to_string())
}

fn get_etag(item: &MemItem) -> StoreFuture<'_, Element> {
    let version = item.node.state.lock().version;
    text("getetag", format!("\"{}-{}\"", item.node.key, version))
}

fn get_lastmodified(item: &MemItem) -> StoreFuture<'_, Element> {
    let modified = item.node.state.lock().modified;
    text("getlastmodified", systemtime_to_httpdate(modified))
}

fn get_creationdate(item: &MemItem) -> StoreFuture<'_, Element> {
    let created = item.node.state.lock().created;
    text("creationdate", systemtime_to_rfc3339(created))
}

fn get_lockdiscovery(item: &MemItem) -> StoreFuture<'_, Element> {
    ready(Ok(ls::lockdiscovery(&item.shared.ls.active_locks(item))))
}

fn get_supportedlock(item: &MemItem) -> StoreFuture<'_, Element> {
    ready(Ok(ls::supportedlock(&item.shared.ls.supported_locks(item))))
}

fn get_quota_used(item: &MemItem) -> StoreFuture<'_, Element> {
    let used = item.shared.root.tree_size();
    text("quota-used-bytes", used.to_string())
}

lazy_static! {
    static ref FILE_PROPS: PropertyTable<MemItem> = PropertyTable::new(vec![
        DavProperty::dav("displayname", get_displayname),
        DavProperty::dav("resourcetype", get_resourcetype),
        DavProperty::dav("getcontentlength", get_contentlength),
        DavProperty::dav("getcontenttype", get_contenttype),
        DavProperty::dav("getetag", get_etag),
        DavProperty::dav("getlastmodified", get_lastmodified),
        DavProperty::dav("creationdate", get_creationdate),
        DavProperty::dav("lockdiscovery", get_lockdiscovery),
        DavProperty::dav("supportedlock", get_supportedlock),
        DavProperty::dav("quota-used-bytes", get_quota_used).expensive(),
    ]);
    static ref DIR_PROPS: PropertyTable<MemItem> = PropertyTable::new(vec![
        DavProperty::dav("displayname", get_displayname),
        DavProperty::dav("resourcetype", get_resourcetype),
        DavProperty::dav("getlastmodified", get_lastmodified),
        DavProperty::dav("creationdate", get_creationdate),
        DavProperty::dav("lockdiscovery", get_lockdiscovery),
        DavProperty::dav("supportedlock", get_supportedlock),
        DavProperty::dav("quota-used-bytes", get_quota_used).expensive(),
    ]);
}

impl MemItem {
    fn live_props(&self) -> &'static PropertyTable<MemItem> {
        if self.node.is_dir() {
            &DIR_PROPS
        } else {
            &FILE_PROPS
        }
    }

    // live properties of the other kind are not dead properties either.
    fn is_live(name: &PropName) -> bool {
        FILE_PROPS.contains(name) || DIR_PROPS.contains(name)
    }
}

impl DavPropertyManager for MemItem {
    fn properties(&self) -> Vec<PropertyInfo> {
        let mut infos = self.live_props().infos();
        let state = self.node.state.lock();
        infos.extend(state.props.keys().map(|name| PropertyInfo {
            name: name.clone(),
            is_expensive: false,
        }));
        infos
    }

    fn get_property<'a>(
        &'a self,
        name: &'a PropName,
        compute_expensive: bool,
    ) -> StoreFuture<'a, Option<Element>> {
        if MemItem::is_live(name) {
            return self.live_props().get(self, name, compute_expensive);
        }
        let value = self.node.state.lock().props.get(name).cloned();
        ready(value.map(Some).ok_or(StoreError::NotFound))
    }

    fn set_property<'a>(
        &'a self,
        name: &'a PropName,
        value: Option<Element>,
    ) -> StoreFuture<'a, ()> {
        if MemItem::is_live(name) {
            if !self.live_props().contains(name) {
                return ready(Err(StoreError::Forbidden));
            }
            return self.live_props().set(self, name, value);
        }
        let mut state = self.node.state.lock();
        match value {
            Some(value) => {
                state.props.insert(name.clone(), value);
            }
            // removing a property that does not exist is not an error.
            None => {
                state.props.remove(name);
            }
        }
        ready(Ok(()))
    }
}
