//! Local filesystem store.
//!
//! Every item is a handle on a path below the base directory, plus the
//! metadata that was read when the handle was created. The store itself
//! keeps no state apart from the lock system, so it is cheap to create.
//!
//! Dead properties cannot be stored on disk, so PROPPATCH of anything but
//! the live properties is refused.
use std::any::Any;
use std::io::{self, SeekFrom};
#[cfg(unix)]
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use bytes::Bytes;
use futures_util::future::{BoxFuture, FutureExt};
use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use xmltree::Element;

use crate::davpath::DavPath;
use crate::ls::{self, DavLockSystem};
use crate::store::*;
use crate::util::{systemtime_to_httpdate, systemtime_to_rfc3339};
use crate::xmltree_ext::ElementExt;

/// Local filesystem store.
#[derive(Debug)]
pub struct DiskStore {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    basedir: PathBuf,
    public: bool,
    ls: Arc<dyn DavLockSystem>,
}

impl DiskStore {
    /// Create a new DiskStore, serving "base".
    ///
    /// If "public" is set to true, all files and directories created will be
    /// publically readable (mode 644/755), otherwise they will be private
    /// (mode 600/700). Umask still overrides this.
    pub fn new(base: impl Into<PathBuf>, public: bool, ls: Arc<dyn DavLockSystem>) -> Arc<DiskStore> {
        Arc::new(DiskStore {
            shared: Arc::new(Shared {
                basedir: base.into(),
                public,
                ls,
            }),
        })
    }
}

// metadata, or None if there is nothing at `path`.
async fn stat(path: &Path) -> StoreResult<Option<std::fs::Metadata>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(map_io(e)),
    }
}

fn map_io(e: io::Error) -> StoreError {
    #[cfg(unix)]
    if e.raw_os_error() == Some(libc::ENOSPC) {
        return StoreError::InsufficientStorage;
    }
    StoreError::from(e)
}

// remove whatever is at `path`, directory trees included.
async fn remove_any(path: &Path) -> StoreResult<()> {
    let meta = tokio::fs::symlink_metadata(path).await.map_err(map_io)?;
    if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await.map_err(map_io)
    } else {
        tokio::fs::remove_file(path).await.map_err(map_io)
    }
}

impl DavStore for DiskStore {
    fn get_item<'a>(&'a self, path: &'a DavPath) -> StoreFuture<'a, Option<Box<dyn StoreItem>>> {
        async move {
            let mut abs = self.shared.basedir.clone();
            abs.push(path.as_rel_ospath());
            trace!("diskstore: get_item {:?}", abs);
            let meta = match stat(&abs).await? {
                Some(meta) => meta,
                None => return Ok(None),
            };
            if path.is_collection() && !meta.is_dir() {
                return Ok(None);
            }
            let item = DiskItem {
                path: abs,
                name: path.file_name(),
                meta,
                shared: self.shared.clone(),
            };
            Ok(Some(Box::new(item) as Box<dyn StoreItem>))
        }
        .boxed()
    }
}

/// An item of a [`DiskStore`].
#[derive(Debug, Clone)]
pub struct DiskItem {
    path: PathBuf,
    name: String,
    meta: std::fs::Metadata,
    shared: Arc<Shared>,
}

impl DiskItem {
    async fn child(&self, name: &str) -> StoreResult<Option<DiskItem>> {
        let path = self.path.join(name);
        Ok(stat(&path).await?.map(|meta| DiskItem {
            path,
            name: name.to_string(),
            meta,
            shared: self.shared.clone(),
        }))
    }

    fn same_store<'a>(&self, other: &'a dyn StoreCollection) -> Option<&'a DiskItem> {
        other
            .as_item()
            .as_any()
            .downcast_ref::<DiskItem>()
            .filter(|o| Arc::ptr_eq(&o.shared, &self.shared))
    }

    fn open_options(&self) -> tokio::fs::OpenOptions {
        #[allow(unused_mut)]
        let mut opt = tokio::fs::OpenOptions::new();
        opt.write(true).create(true).truncate(true);
        #[cfg(unix)]
        opt.mode(if self.shared.public { 0o644 } else { 0o600 });
        opt
    }

    fn dir_builder(&self) -> tokio::fs::DirBuilder {
        #[allow(unused_mut)]
        let mut dir = tokio::fs::DirBuilder::new();
        #[cfg(unix)]
        dir.mode(if self.shared.public { 0o755 } else { 0o700 });
        dir
    }

    // Make room for a new entry `name`. Returns whether something was there.
    async fn clear(&self, name: &str, overwrite: bool) -> StoreResult<bool> {
        let path = self.path.join(name);
        match tokio::fs::symlink_metadata(&path).await {
            Ok(_) if !overwrite => Err(StoreError::Exists),
            Ok(_) => {
                remove_any(&path).await?;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(map_io(e)),
        }
    }

    // same as the default apache etag.
    fn etag(&self) -> Option<String> {
        let modified = self.meta.modified().ok()?;
        let t = modified.duration_since(UNIX_EPOCH).ok()?;
        let t = t.as_secs() * 1000000 + t.subsec_nanos() as u64 / 1000;
        #[cfg(unix)]
        if self.meta.is_file() {
            Some(format!("{:x}-{:x}-{:x}", self.meta.ino(), self.meta.len(), t))
        } else {
            Some(format!("{:x}-{:x}", self.meta.ino(), t))
        }
        #[cfg(not(unix))]
        if self.meta.is_file() {
            Some(format!("{:x}-{:x}", self.meta.len(), t))
        } else {
            Some(format!("{:x}", t))
        }
    }
}

impl StoreItem for DiskItem {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn unique_key(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_collection(&self) -> Option<&dyn StoreCollection> {
        if self.meta.is_dir() {
            Some(self)
        } else {
            None
        }
    }

    fn into_collection(self: Box<Self>) -> Option<Box<dyn StoreCollection>> {
        if self.meta.is_dir() {
            Some(self)
        } else {
            None
        }
    }

    fn get_readable_stream(&self) -> StoreFuture<'_, Box<dyn DavReadStream>> {
        async move {
            if self.meta.is_dir() {
                return Err(StoreError::Forbidden);
            }
            let file = tokio::fs::File::open(&self.path).await.map_err(map_io)?;
            let len = file.metadata().await.map_err(map_io)?.len();
            Ok(Box::new(DiskFile { file, len }) as Box<dyn DavReadStream>)
        }
        .boxed()
    }

    fn upload_from_stream(&self, mut src: UploadStream) -> StoreFuture<'_, ()> {
        async move {
            trace!("diskstore: upload {:?}", self.path);
            let mut file = self.open_options().open(&self.path).await.map_err(map_io)?;
            while let Some(chunk) = src.next().await {
                file.write_all(&chunk?).await.map_err(map_io)?;
            }
            file.flush().await.map_err(map_io)?;
            Ok(())
        }
        .boxed()
    }

    fn copy_to<'a>(
        &'a self,
        dest: &'a dyn StoreCollection,
        name: &'a str,
        overwrite: bool,
    ) -> StoreFuture<'a, Placed<Box<dyn StoreItem>>> {
        let target = match self.same_store(dest) {
            Some(target) if self.meta.is_file() => target,
            _ => return copy_item(self, dest, name, overwrite).boxed(),
        };
        async move {
            let overwritten = target.clear(name, overwrite).await?;
            let to = target.path.join(name);
            trace!("diskstore: copy {:?} {:?}", self.path, to);
            tokio::fs::copy(&self.path, &to).await.map_err(map_io)?;
            let item = target.child(name).await?.ok_or(StoreError::GeneralFailure)?;
            Ok(Placed::new(Box::new(item) as Box<dyn StoreItem>, overwritten))
        }
        .boxed()
    }

    fn property_manager(&self) -> Option<&dyn DavPropertyManager> {
        Some(self)
    }

    fn locking_manager(&self) -> Option<Arc<dyn DavLockSystem>> {
        Some(self.shared.ls.clone())
    }
}

impl StoreCollection for DiskItem {
    fn as_item(&self) -> &dyn StoreItem {
        self
    }

    fn get_item<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<Box<dyn StoreItem>>> {
        async move {
            let item = self.child(name).await?;
            Ok(item.map(|i| Box::new(i) as Box<dyn StoreItem>))
        }
        .boxed()
    }

    fn get_items(&self) -> StoreFuture<'_, Vec<Box<dyn StoreItem>>> {
        async move {
            let mut read_dir = tokio::fs::read_dir(&self.path).await.map_err(map_io)?;
            let mut items = Vec::new();
            loop {
                match read_dir.next_entry().await {
                    Ok(Some(entry)) => {
                        // entries that vanished or cannot be read are skipped.
                        let meta = match entry.metadata().await {
                            Ok(meta) => meta,
                            Err(e) => {
                                debug!("diskstore: {:?}: {}", entry.path(), e);
                                continue;
                            }
                        };
                        let item = DiskItem {
                            path: entry.path(),
                            name: entry.file_name().to_string_lossy().into_owned(),
                            meta,
                            shared: self.shared.clone(),
                        };
                        items.push(Box::new(item) as Box<dyn StoreItem>);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!("read_dir failed {e}");
                        break;
                    }
                }
            }
            Ok(items)
        }
        .boxed()
    }

    fn create_item<'a>(
        &'a self,
        name: &'a str,
        overwrite: bool,
    ) -> StoreFuture<'a, Placed<Box<dyn StoreItem>>> {
        async move {
            trace!("diskstore: create_item {:?} {}", self.path, name);
            let path = self.path.join(name);
            let overwritten = match stat(&path).await? {
                Some(_) if !overwrite => return Err(StoreError::Exists),
                Some(meta) if meta.is_dir() => {
                    tokio::fs::remove_dir_all(&path).await.map_err(map_io)?;
                    true
                }
                Some(_) => true,
                None => false,
            };
            self.open_options().open(&path).await.map_err(map_io)?;
            let item = self.child(name).await?.ok_or(StoreError::GeneralFailure)?;
            Ok(Placed::new(Box::new(item) as Box<dyn StoreItem>, overwritten))
        }
        .boxed()
    }

    fn create_collection<'a>(
        &'a self,
        name: &'a str,
        overwrite: bool,
    ) -> StoreFuture<'a, Placed<Box<dyn StoreCollection>>> {
        async move {
            trace!("diskstore: create_collection {:?} {}", self.path, name);
            let overwritten = self.clear(name, overwrite).await?;
            self.dir_builder()
                .create(self.path.join(name))
                .await
                .map_err(map_io)?;
            let item = self.child(name).await?.ok_or(StoreError::GeneralFailure)?;
            Ok(Placed::new(Box::new(item) as Box<dyn StoreCollection>, overwritten))
        }
        .boxed()
    }

    fn delete_item<'a>(&'a self, name: &'a str) -> StoreFuture<'a, ()> {
        async move {
            let path = self.path.join(name);
            trace!("diskstore: delete {:?}", path);
            let meta = tokio::fs::symlink_metadata(&path).await.map_err(map_io)?;
            // children are gone by now, a non-empty directory is an error.
            if meta.is_dir() {
                tokio::fs::remove_dir(&path).await.map_err(map_io)
            } else {
                tokio::fs::remove_file(&path).await.map_err(map_io)
            }
        }
        .boxed()
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
                return async move {
                    let item = self.child(name).await?.ok_or(StoreError::NotFound)?;
                    let placed = item.copy_to(dest, dest_name, overwrite).await?;
                    self.delete_item(name).await?;
                    Ok(placed)
                }
                .boxed()
            }
        };
        async move {
            let from = self.path.join(name);
            let to = target.path.join(dest_name);
            trace!("diskstore: rename {:?} {:?}", from, to);
            let overwritten = target.clear(dest_name, overwrite).await?;
            tokio::fs::rename(&from, &to).await.map_err(map_io)?;
            let item = target.child(dest_name).await?.ok_or(StoreError::GeneralFailure)?;
            Ok(Placed::new(Box::new(item) as Box<dyn StoreItem>, overwritten))
        }
        .boxed()
    }

    fn supports_fast_move(&self, dest: &dyn StoreCollection, _dest_name: &str, _overwrite: bool) -> bool {
        self.same_store(dest).is_some()
    }
}

#[derive(Debug)]
struct DiskFile {
    file: tokio::fs::File,
    len: u64,
}

impl DavReadStream for DiskFile {
    fn read_bytes(&mut self, count: usize) -> StoreFuture<'_, Bytes> {
        async move {
            let mut buf = vec![0u8; count];
            let mut n = 0;
            while n < count {
                let r = self.file.read(&mut buf[n..]).await.map_err(map_io)?;
                if r == 0 {
                    break;
                }
                n += r;
            }
            buf.truncate(n);
            Ok(Bytes::from(buf))
        }
        .boxed()
    }

    fn seek(&mut self, pos: u64) -> StoreFuture<'_, u64> {
        async move { self.file.seek(SeekFrom::Start(pos)).await.map_err(map_io) }.boxed()
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn content_length(&self) -> Option<u64> {
        Some(self.len)
    }
}

fn text(name: &str, value: impl Into<String>) -> StoreFuture<'static, Element> {
    ready(Ok(PropName::dav(name).with_text(value)))
}

fn get_displayname(item: &DiskItem) -> StoreFuture<'_, Element> {
    text("displayname", item.name.clone())
}

fn get_resourcetype(item: &DiskItem) -> StoreFuture<'_, Element> {
    let mut elem = Element::new2("D:resourcetype");
    if item.meta.is_dir() {
        elem.push_elem(Element::new2("D:collection"));
    }
    ready(Ok(elem))
}

fn get_contentlength(item: &DiskItem) -> StoreFuture<'_, Element> {
    text("getcontentlength", item.meta.len().to_string())
}

fn get_contenttype(item: &DiskItem) -> StoreFuture<'_, Element> {
    let mime = mime_guess::from_path(&item.path).first_or_octet_stream();
    text("getcontenttype", mime.to_string())
}

fn get_etag(item: &DiskItem) -> StoreFuture<'_, Element> {
    match item.etag() {
        Some(etag) => text("getetag", format!("\"{etag}\"")),
        None => ready(Err(StoreError::NotFound)),
    }
}

fn get_lastmodified(item: &DiskItem) -> StoreFuture<'_, Element> {
    match item.meta.modified() {
        Ok(t) => text("getlastmodified", systemtime_to_httpdate(t)),
        Err(e) => ready(Err(e.into())),
    }
}

fn get_creationdate(item: &DiskItem) -> StoreFuture<'_, Element> {
    // not every filesystem records a birth time.
    match item.meta.created().or_else(|_| item.meta.modified()) {
        Ok(t) => text("creationdate", systemtime_to_rfc3339(t)),
        Err(e) => ready(Err(e.into())),
    }
}

fn get_lockdiscovery(item: &DiskItem) -> StoreFuture<'_, Element> {
    let elem = ls::lockdiscovery(&item.shared.ls.active_locks(item));
    ready(Ok(elem))
}

fn get_supportedlock(item: &DiskItem) -> StoreFuture<'_, Element> {
    let elem = ls::supportedlock(&item.shared.ls.supported_locks(item));
    ready(Ok(elem))
}

// total size of the files below `path`.
fn disk_usage(path: PathBuf) -> BoxFuture<'static, u64> {
    async move {
        let mut total = 0;
        let mut read_dir = match tokio::fs::read_dir(&path).await {
            Ok(rd) => rd,
            Err(_) => return 0,
        };
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            match entry.metadata().await {
                Ok(meta) if meta.is_dir() => total += disk_usage(entry.path()).await,
                Ok(meta) => total += meta.len(),
                Err(_) => {}
            }
        }
        total
    }
    .boxed()
}

fn get_quota_used(item: &DiskItem) -> StoreFuture<'_, Element> {
    let base = item.shared.basedir.clone();
    async move {
        let used = disk_usage(base).await;
        Ok(PropName::dav("quota-used-bytes").with_text(used.to_string()))
    }
    .boxed()
}

lazy_static! {
    static ref FILE_PROPS: PropertyTable<DiskItem> = PropertyTable::new(vec![
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
    static ref DIR_PROPS: PropertyTable<DiskItem> = PropertyTable::new(vec![
        DavProperty::dav("displayname", get_displayname),
        DavProperty::dav("resourcetype", get_resourcetype),
        DavProperty::dav("getetag", get_etag),
        DavProperty::dav("getlastmodified", get_lastmodified),
        DavProperty::dav("creationdate", get_creationdate),
        DavProperty::dav("lockdiscovery", get_lockdiscovery),
        DavProperty::dav("supportedlock", get_supportedlock),
        DavProperty::dav("quota-used-bytes", get_quota_used).expensive(),
    ]);
}

impl DiskItem {
    fn live_props(&self) -> &'static PropertyTable<DiskItem> {
        if self.meta.is_dir() {
            &DIR_PROPS
        } else {
            &FILE_PROPS
        }
    }
}

impl DavPropertyManager for DiskItem {
    fn properties(&self) -> Vec<PropertyInfo> {
        self.live_props().infos()
    }

    fn get_property<'a>(
        &'a self,
        name: &'a PropName,
        compute_expensive: bool,
    ) -> StoreFuture<'a, Option<Element>> {
        self.live_props().get(self, name, compute_expensive)
    }

    fn set_property<'a>(&'a self, _name: &'a PropName, _value: Option<Element>) -> StoreFuture<'a, ()> {
        ready(Err(StoreError::Forbidden))
    }
}
