//! Contains the structs and traits that define a `locksystem` backend.
//!
//! Note that the methods DO NOT return futures, they are synchronous.
//! Lock bookkeeping is in-memory state, and the store calls around it
//! are awaited without holding any lock-table mutex.
//!
//! Locks are associated with items through `StoreItem::unique_key`.
use std::fmt::Debug;
use std::time::{Duration, Instant};

use http::StatusCode;
use xmltree::Element;

use crate::store::StoreItem;
use crate::xmltree_ext::ElementExt;

pub mod memls;

pub use memls::MemLs;

/// Kind of lock. WebDAV only defines write locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockType {
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockScope {
    Exclusive,
    Shared,
}

/// Requested or granted lock lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTimeout {
    Seconds(u64),
    Infinite,
}

impl LockTimeout {
    /// Expiry instant, `None` for locks that never expire.
    pub(crate) fn expires_at(&self, now: Instant) -> Option<Instant> {
        match *self {
            LockTimeout::Seconds(secs) => now.checked_add(Duration::from_secs(secs)),
            LockTimeout::Infinite => None,
        }
    }

    pub fn to_header_value(&self) -> String {
        match *self {
            LockTimeout::Seconds(secs) => format!("Second-{secs}"),
            LockTimeout::Infinite => "Infinite".to_string(),
        }
    }
}

/// An advertised (scope, type) capability, as listed in `supportedlock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockEntry {
    pub scope: LockScope,
    pub lock_type: LockType,
}

/// Parameters of a LOCK request.
#[derive(Debug, Clone)]
pub struct LockRequest {
    pub lock_type: LockType,
    pub scope: LockScope,
    /// Opaque `<D:owner>` element, echoed back verbatim.
    pub owner: Option<Element>,
    /// URL the lock was requested on.
    pub lock_root: String,
    /// `Depth: infinity`.
    pub deep: bool,
    pub timeout: LockTimeout,
}

/// A granted lock.
#[derive(Debug, Clone)]
pub struct ActiveLock {
    pub lock_type: LockType,
    pub scope: LockScope,
    pub deep: bool,
    pub owner: Option<Element>,
    pub timeout: LockTimeout,
    pub token: String,
    pub lock_root: String,
}

/// Would a new lock with `scope` conflict with locks already held in the
/// `held` scopes. Shared locks only coexist with other shared locks.
pub fn conflicts(scope: LockScope, held: impl IntoIterator<Item = LockScope>) -> bool {
    let mut held = held.into_iter();
    match scope {
        LockScope::Exclusive => held.next().is_some(),
        LockScope::Shared => held.any(|s| s == LockScope::Exclusive),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    /// Conflicts with an existing lock.
    Locked,
    /// Unknown or expired lock token.
    NoSuchLock,
}

impl LockError {
    pub fn statuscode(&self) -> StatusCode {
        match self {
            LockError::Locked => StatusCode::LOCKED,
            LockError::NoSuchLock => StatusCode::PRECONDITION_FAILED,
        }
    }
}

/// The trait that defines a locksystem.
pub trait DavLockSystem: Debug + Send + Sync {
    /// Lock an item. Fails with `LockError::Locked` if the requested scope
    /// conflicts with a lock that is already active.
    fn lock(&self, item: &dyn StoreItem, request: LockRequest) -> Result<ActiveLock, LockError>;

    /// Restart the timeout of an existing lock. Without a new timeout, the
    /// original one is reused.
    fn refresh(
        &self,
        item: &dyn StoreItem,
        token: &str,
        timeout: Option<LockTimeout>,
    ) -> Result<ActiveLock, LockError>;

    /// Remove exactly the lock identified by `token`.
    fn unlock(&self, item: &dyn StoreItem, token: &str) -> Result<(), LockError>;

    /// All unexpired locks on an item.
    fn active_locks(&self, item: &dyn StoreItem) -> Vec<ActiveLock>;

    /// The lock capabilities of an item.
    fn supported_locks(&self, item: &dyn StoreItem) -> Vec<LockEntry>;

    fn is_locked(&self, item: &dyn StoreItem) -> bool {
        !self.active_locks(item).is_empty()
    }

    fn has_lock(&self, item: &dyn StoreItem, token: &str) -> bool {
        self.active_locks(item).iter().any(|l| l.token == token)
    }

    /// Forget all locks of an item, after it has been deleted.
    fn release_all(&self, item: &dyn StoreItem);
}

fn scope_elem(scope: LockScope) -> Element {
    let s = match scope {
        LockScope::Exclusive => "D:exclusive",
        LockScope::Shared => "D:shared",
    };
    Element::new2("D:lockscope").child(Element::new2(s))
}

fn type_elem(lock_type: LockType) -> Element {
    match lock_type {
        LockType::Write => Element::new2("D:locktype").child(Element::new2("D:write")),
    }
}

impl ActiveLock {
    /// `<D:activelock>` description of this lock.
    pub fn to_xml(&self) -> Element {
        let mut elem = Element::new2("D:activelock")
            .child(type_elem(self.lock_type))
            .child(scope_elem(self.scope))
            .child(Element::new2("D:depth").text(if self.deep { "infinity" } else { "0" }));
        if let Some(owner) = &self.owner {
            elem.push_elem(owner.clone());
        }
        elem.child(Element::new2("D:timeout").text(self.timeout.to_header_value()))
            .child(
                Element::new2("D:locktoken")
                    .child(Element::new2("D:href").text(self.token.clone())),
            )
            .child(
                Element::new2("D:lockroot")
                    .child(Element::new2("D:href").text(self.lock_root.clone())),
            )
    }
}

impl LockEntry {
    /// `<D:lockentry>` description of this capability.
    pub fn to_xml(&self) -> Element {
        Element::new2("D:lockentry")
            .child(scope_elem(self.scope))
            .child(type_elem(self.lock_type))
    }
}

/// Value of the `lockdiscovery` property.
pub fn lockdiscovery(locks: &[ActiveLock]) -> Element {
    let mut elem = Element::new2("D:lockdiscovery");
    for lock in locks {
        elem.push_elem(lock.to_xml());
    }
    elem
}

/// Value of the `supportedlock` property.
pub fn supportedlock(entries: &[LockEntry]) -> Element {
    let mut elem = Element::new2("D:supportedlock");
    for entry in entries {
        elem.push_elem(entry.to_xml());
    }
    elem
}
