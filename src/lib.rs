//! ## Async WebDAV protocol engine
//!
//! [`Webdav`] (RFC4918) is defined as
//! HTTP (GET/HEAD/PUT/DELETE) plus a bunch of extension methods (PROPFIND, etc).
//! These extension methods are used to manage collections (like unix directories),
//! get information on collections (like unix `ls` or `readdir`), rename and
//! copy items, lock/unlock items, etc.
//!
//! This library is the protocol engine: a [`DavHandler`] takes a `http::Request`,
//! runs the matching verb handler against a document store, and generates a
//! `http::Response`. It works with the standard types from the `http` and
//! `http_body` crates, so it can be plugged into any server that uses them.
//!
//! ## Backend interfaces.
//!
//! - you supply a [store][DavStore] that resolves paths to [items][StoreItem]
//!   and [collections][StoreCollection].
//! - every item can expose a [property manager][DavPropertyManager] for
//!   PROPFIND/PROPPATCH, and a [locksystem][DavLockSystem] for LOCK/UNLOCK.
//! - items that support it can offer [random access][RandomAccess] to their
//!   content, which GET uses to serve byte ranges.
//!
//! ## Implemented standards.
//!
//! The base RFC4918 class 1 and 2 methods. The relevant parts of the HTTP RFCs
//! are also implemented, such as the preconditions (If-Match, If-None-Match,
//! If-Modified-Since, If-Unmodified-Since, If-Range) and partial transfers (Range).
//!
//! ## Backends.
//!
//! Included are two stores:
//!
//! - [`MemStore`]: ephemeral in-memory tree. supports dead properties and quota.
//! - [`DiskStore`]: serves a directory on the local filesystem.
//!
//! And one locksystem:
//!
//! - [`MemLs`]: ephemeral in-memory locksystem.
//!
//! ## Example.
//!
//! ```no_run
//! use dav_engine::{DavHandler, MemLs, MemStore};
//!
//! # async fn serve(req: http::Request<dav_engine::body::Body>) {
//! let handler = DavHandler::builder(MemStore::new(MemLs::new()))
//!     .autoindex(true)
//!     .build();
//! let resp = handler.handle(req).await;
//! println!("{}", resp.status());
//! # }
//! ```
//!
//! [`Webdav`]: https://tools.ietf.org/html/rfc4918

#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

mod conditional;
mod davhandler;
mod davheaders;
mod errors;
mod multierror;
mod util;
mod xmltree_ext;

pub mod body;
pub mod davpath;
pub mod ls;
pub mod store;

use crate::errors::{DavError, DavResult};

pub use crate::davhandler::{DavBuilder, DavHandler};
pub use crate::davpath::DavPath;
pub use crate::ls::{DavLockSystem, MemLs};
pub use crate::store::{
    DavPropertyManager, DavReadStream, DavStore, RandomAccess, StoreCollection, StoreError,
    StoreItem,
};
pub use crate::util::{DavMethod, DavMethodSet};

#[cfg(any(docsrs, feature = "localfs"))]
pub use crate::store::diskstore::DiskStore;
#[cfg(any(docsrs, feature = "memfs"))]
pub use crate::store::memstore::MemStore;
