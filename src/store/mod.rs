//! Contains the structs and traits that define a document store backend.
//!
//! The engine never constructs items itself. It resolves paths through a
//! [`DavStore`], and every item it gets back is a handle that knows how to
//! read, write, copy and describe itself. Collections are items that can
//! also enumerate and manage children.
//!
//! All methods that do I/O return a boxed `Send` future, so that a backend
//! can be implemented on top of async disk or network access.
use std::any::Any;
use std::error::Error;
use std::fmt::{self, Debug};
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::{self, Future};
use futures_util::stream::Stream;
use http::StatusCode;
use xmltree::Element;

use crate::davpath::DavPath;
use crate::ls::DavLockSystem;

#[cfg(any(docsrs, feature = "localfs"))]
pub mod diskstore;
#[cfg(any(docsrs, feature = "memfs"))]
pub mod memstore;
pub mod props;

pub use props::{DavProperty, PropName, PropertyInfo, PropertyTable};

/// Errors generated by a store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    NotImplemented,
    GeneralFailure,
    /// The target already exists and overwriting was not allowed.
    Exists,
    NotFound,
    Forbidden,
    Conflict,
    InsufficientStorage,
    TooLarge,
}

/// The Result type.
pub type StoreResult<T> = Result<T, StoreError>;

/// Future returned by almost all of the store methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Byte stream that feeds `StoreItem::upload_from_stream`.
pub type UploadStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

impl StoreError {
    pub fn statuscode(&self) -> StatusCode {
        match self {
            StoreError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            StoreError::GeneralFailure => StatusCode::INTERNAL_SERVER_ERROR,
            StoreError::Exists => StatusCode::PRECONDITION_FAILED,
            StoreError::NotFound => StatusCode::NOT_FOUND,
            StoreError::Forbidden => StatusCode::FORBIDDEN,
            StoreError::Conflict => StatusCode::CONFLICT,
            StoreError::InsufficientStorage => StatusCode::INSUFFICIENT_STORAGE,
            StoreError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

impl Error for StoreError {
    fn description(&self) -> &str {
        "StoreError"
    }

    fn cause(&self) -> Option<&dyn Error> {
        None
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl From<&io::Error> for StoreError {
    fn from(e: &io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound,
            io::ErrorKind::PermissionDenied => StoreError::Forbidden,
            io::ErrorKind::AlreadyExists => StoreError::Exists,
            io::ErrorKind::UnexpectedEof => StoreError::Conflict,
            _ => StoreError::GeneralFailure,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        (&e).into()
    }
}

impl From<StoreError> for io::Error {
    fn from(e: StoreError) -> Self {
        let kind = match e {
            StoreError::NotFound => io::ErrorKind::NotFound,
            StoreError::Forbidden => io::ErrorKind::PermissionDenied,
            StoreError::Exists => io::ErrorKind::AlreadyExists,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}

/// How a collection wants unbounded-depth PROPFIND requests handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InfiniteDepthMode {
    /// Walk the whole subtree.
    #[default]
    Allowed,
    /// Refuse with 403 Forbidden.
    Rejected,
    /// Silently treat as `Depth: 0`.
    Assume0,
    /// Silently treat as `Depth: 1`.
    Assume1,
}

/// An entry that was placed into a collection by create, copy or move.
#[derive(Debug)]
pub struct Placed<T> {
    pub entry: T,
    /// An existing entry with the same name was replaced.
    pub overwritten: bool,
}

impl<T> Placed<T> {
    pub fn new(entry: T, overwritten: bool) -> Placed<T> {
        Placed { entry, overwritten }
    }

    /// `201 Created` for a new entry, `204 No Content` for a replaced one.
    pub fn status(&self) -> StatusCode {
        if self.overwritten {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        }
    }
}

/// The top-level store trait. Resolves request paths to items.
pub trait DavStore: Send + Sync {
    /// Look up an item or collection. `Ok(None)` if nothing lives there.
    fn get_item<'a>(&'a self, path: &'a DavPath) -> StoreFuture<'a, Option<Box<dyn StoreItem>>>;

    /// Look up a collection. `Ok(None)` if the path does not exist or is not a collection.
    fn get_collection<'a>(
        &'a self,
        path: &'a DavPath,
    ) -> StoreFuture<'a, Option<Box<dyn StoreCollection>>> {
        Box::pin(async move {
            let item = self.get_item(path).await?;
            Ok(item.and_then(|i| i.into_collection()))
        })
    }
}

/// A leaf or collection entity in the store.
pub trait StoreItem: Debug + Send + Sync {
    /// Display name; also the name under which the parent knows this item.
    fn name(&self) -> String;

    /// Stable identity. Lock association is based on this key only.
    fn unique_key(&self) -> String;

    fn as_any(&self) -> &dyn Any;

    /// Collection view of this item, if it is one.
    fn as_collection(&self) -> Option<&dyn StoreCollection> {
        None
    }

    /// Owned collection view of this item, if it is one.
    fn into_collection(self: Box<Self>) -> Option<Box<dyn StoreCollection>> {
        None
    }

    fn is_collection(&self) -> bool {
        self.as_collection().is_some()
    }

    /// Open the content for sequential reading.
    fn get_readable_stream(&self) -> StoreFuture<'_, Box<dyn DavReadStream>>;

    /// Replace the content with the bytes from `src`.
    fn upload_from_stream(&self, src: UploadStream) -> StoreFuture<'_, ()>;

    /// Copy this item (not its children) into `dest` under `name`.
    fn copy_to<'a>(
        &'a self,
        dest: &'a dyn StoreCollection,
        name: &'a str,
        overwrite: bool,
    ) -> StoreFuture<'a, Placed<Box<dyn StoreItem>>>;

    /// Named metadata of this item.
    fn property_manager(&self) -> Option<&dyn DavPropertyManager> {
        None
    }

    /// The lock system governing this item. A shared handle, not ownership.
    fn locking_manager(&self) -> Option<Arc<dyn DavLockSystem>> {
        None
    }

    /// Optional ranged-read capability, used by GET/HEAD when available.
    fn random_access(&self) -> Option<&dyn RandomAccess> {
        None
    }
}

/// A container item.
pub trait StoreCollection: StoreItem {
    fn as_item(&self) -> &dyn StoreItem;

    fn get_item<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<Box<dyn StoreItem>>>;

    fn get_items(&self) -> StoreFuture<'_, Vec<Box<dyn StoreItem>>>;

    /// Create an empty item. With `overwrite` an existing entry is replaced,
    /// otherwise `StoreError::Exists` is returned.
    fn create_item<'a>(
        &'a self,
        name: &'a str,
        overwrite: bool,
    ) -> StoreFuture<'a, Placed<Box<dyn StoreItem>>>;

    /// Create an empty collection, same overwrite rules as `create_item`.
    fn create_collection<'a>(
        &'a self,
        name: &'a str,
        overwrite: bool,
    ) -> StoreFuture<'a, Placed<Box<dyn StoreCollection>>>;

    /// Delete a child. The engine deletes the children of a collection
    /// before deleting the collection itself.
    fn delete_item<'a>(&'a self, name: &'a str) -> StoreFuture<'a, ()>;

    /// Move a child (including its subtree) to `dest` under `dest_name`.
    fn move_item<'a>(
        &'a self,
        name: &'a str,
        dest: &'a dyn StoreCollection,
        dest_name: &'a str,
        overwrite: bool,
    ) -> StoreFuture<'a, Placed<Box<dyn StoreItem>>>;

    /// Can this collection be moved to `dest` in one step. If not, the
    /// engine recreates it at the destination, moves the children one by
    /// one, and then deletes the source.
    fn supports_fast_move(&self, dest: &dyn StoreCollection, dest_name: &str, overwrite: bool)
        -> bool;

    fn infinite_depth_mode(&self) -> InfiniteDepthMode {
        InfiniteDepthMode::Allowed
    }
}

/// Readable content of an item.
pub trait DavReadStream: Send {
    /// Read at most `count` bytes. An empty buffer means end-of-stream.
    fn read_bytes(&mut self, count: usize) -> StoreFuture<'_, Bytes>;

    /// Seek to an absolute position.
    fn seek(&mut self, _pos: u64) -> StoreFuture<'_, u64> {
        Box::pin(future::ready(Err(StoreError::NotImplemented)))
    }

    fn is_seekable(&self) -> bool {
        false
    }

    /// Total length, if known.
    fn content_length(&self) -> Option<u64> {
        None
    }
}

/// Random access to the content of an item.
pub trait RandomAccess: Send + Sync {
    fn content_length(&self) -> StoreFuture<'_, u64>;

    /// Stream the bytes from `start` up to and including `end`
    /// (to the end of the content if `end` is `None`).
    fn create_read_stream(&self, start: u64, end: Option<u64>)
        -> StoreFuture<'_, Box<dyn DavReadStream>>;
}

/// Named metadata of one item.
pub trait DavPropertyManager: Send + Sync {
    /// The properties this item declares.
    fn properties(&self) -> Vec<PropertyInfo>;

    /// Get the value of a property, as an element named after the property.
    ///
    /// Expensive properties return `Ok(None)` unless `compute_expensive`
    /// is set. Unknown properties return `StoreError::NotFound`.
    fn get_property<'a>(
        &'a self,
        name: &'a PropName,
        compute_expensive: bool,
    ) -> StoreFuture<'a, Option<Element>>;

    /// Set (`Some`) or remove (`None`) a property.
    fn set_property<'a>(&'a self, name: &'a PropName, value: Option<Element>)
        -> StoreFuture<'a, ()>;
}

/// A future that is already resolved.
pub(crate) fn ready<'a, T: Send + 'a>(r: StoreResult<T>) -> StoreFuture<'a, T> {
    Box::pin(future::ready(r))
}

/// A seekable in-memory stream.
#[derive(Debug, Clone)]
pub struct BytesStream {
    data: Bytes,
    pos: usize,
}

impl BytesStream {
    pub fn new(data: Bytes) -> BytesStream {
        BytesStream { data, pos: 0 }
    }
}

impl DavReadStream for BytesStream {
    fn read_bytes(&mut self, count: usize) -> StoreFuture<'_, Bytes> {
        let end = std::cmp::min(self.pos.saturating_add(count), self.data.len());
        let start = std::cmp::min(self.pos, end);
        let buf = self.data.slice(start..end);
        self.pos = end;
        Box::pin(future::ready(Ok(buf)))
    }

    fn seek(&mut self, pos: u64) -> StoreFuture<'_, u64> {
        self.pos = std::cmp::min(pos, self.data.len() as u64) as usize;
        Box::pin(future::ready(Ok(self.pos as u64)))
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn content_length(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}

/// Turn a read stream into an upload stream, e.g. to copy between stores.
pub fn read_stream_upload(strm: Box<dyn DavReadStream>) -> UploadStream {
    Box::pin(async_stream::stream! {
        let mut strm = strm;
        loop {
            match strm.read_bytes(COPY_BUF_SIZE).await {
                Ok(buf) if buf.is_empty() => break,
                Ok(buf) => yield Ok(buf),
                Err(e) => {
                    yield Err(io::Error::from(e));
                    break;
                }
            }
        }
    })
}

const COPY_BUF_SIZE: usize = 65536;

/// `StoreItem::copy_to` in terms of the other store operations: create the
/// target, copy the content of a non-collection, then copy every property
/// the target accepts. A target that was created here is removed again if
/// the content could not be copied.
pub async fn copy_item<'a>(
    src: &'a dyn StoreItem,
    dest: &'a dyn StoreCollection,
    name: &'a str,
    overwrite: bool,
) -> StoreResult<Placed<Box<dyn StoreItem>>> {
    let placed = if src.is_collection() {
        let placed = dest.create_collection(name, overwrite).await?;
        let entry = dest.get_item(name).await?.ok_or(StoreError::GeneralFailure)?;
        Placed::new(entry, placed.overwritten)
    } else {
        let placed = dest.create_item(name, overwrite).await?;
        let res = match src.get_readable_stream().await {
            Ok(strm) => placed.entry.upload_from_stream(read_stream_upload(strm)).await,
            Err(e) => Err(e),
        };
        if let Err(e) = res {
            if !placed.overwritten {
                let _ = dest.delete_item(name).await;
            }
            return Err(e);
        }
        placed
    };

    if let (Some(spm), Some(dpm)) = (src.property_manager(), placed.entry.property_manager()) {
        for info in spm.properties() {
            if let Ok(Some(value)) = spm.get_property(&info.name, false).await {
                // live properties of the target are protected, that is fine.
                if let Err(e) = dpm.set_property(&info.name, Some(value)).await {
                    trace!("copy_item: {} not copied: {:?}", info.name, e);
                }
            }
        }
    }
    Ok(placed)
}
