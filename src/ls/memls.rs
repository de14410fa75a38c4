//! Simple in-memory locksystem.
//!
//! This implementation has state - if you create a
//! new instance in a handler(), it will be empty every time.
//!
//! This means you have to create the instance once, using `MemLs::new`, store
//! it in your handler struct, and clone() it every time you pass
//! it to the DavHandler. As a MemLs struct is just a handle, cloning is cheap.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::ls::*;
use crate::store::StoreItem;

// unique key -> lock type -> locks.
type LockTable = HashMap<String, HashMap<LockType, Vec<LockInfo>>>;

/// Ephemeral in-memory LockSystem.
#[derive(Debug, Default)]
pub struct MemLs {
    table: Mutex<LockTable>,
}

#[derive(Debug, Clone)]
struct LockInfo {
    lock: ActiveLock,
    expires_at: Option<Instant>,
}

impl LockInfo {
    fn expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(t) if t <= now)
    }
}

impl MemLs {
    /// Create a new "memls" locksystem.
    pub fn new() -> Arc<MemLs> {
        Arc::new(MemLs::default())
    }
}

// drop expired locks and empty per-type lists.
fn prune(types: &mut HashMap<LockType, Vec<LockInfo>>, now: Instant) {
    for list in types.values_mut() {
        list.retain(|l| !l.expired(now));
    }
    types.retain(|_, list| !list.is_empty());
}

impl DavLockSystem for MemLs {
    fn lock(&self, item: &dyn StoreItem, request: LockRequest) -> Result<ActiveLock, LockError> {
        let key = item.unique_key();
        let now = Instant::now();
        let mut table = self.table.lock();
        let types = table.entry(key).or_default();
        prune(types, now);

        if let Some(list) = types.get(&request.lock_type) {
            if conflicts(request.scope, list.iter().map(|l| l.lock.scope)) {
                debug!("lock on {} refused: conflicting lock", request.lock_root);
                return Err(LockError::Locked);
            }
        }

        let lock = ActiveLock {
            lock_type: request.lock_type,
            scope: request.scope,
            deep: request.deep,
            owner: request.owner,
            timeout: request.timeout,
            token: format!("opaquelocktoken:{}", Uuid::new_v4()),
            lock_root: request.lock_root,
        };
        debug!("lock {} created", &lock.token);
        types.entry(lock.lock_type).or_default().push(LockInfo {
            lock: lock.clone(),
            expires_at: lock.timeout.expires_at(now),
        });
        Ok(lock)
    }

    fn refresh(
        &self,
        item: &dyn StoreItem,
        token: &str,
        timeout: Option<LockTimeout>,
    ) -> Result<ActiveLock, LockError> {
        debug!("refresh lock {token}");
        let now = Instant::now();
        let mut table = self.table.lock();
        let info = table
            .get_mut(&item.unique_key())
            .and_then(|types| {
                types
                    .values_mut()
                    .flat_map(|list| list.iter_mut())
                    .find(|l| l.lock.token == token && !l.expired(now))
            })
            .ok_or(LockError::NoSuchLock)?;
        if let Some(timeout) = timeout {
            info.lock.timeout = timeout;
        }
        info.expires_at = info.lock.timeout.expires_at(now);
        Ok(info.lock.clone())
    }

    fn unlock(&self, item: &dyn StoreItem, token: &str) -> Result<(), LockError> {
        let key = item.unique_key();
        let now = Instant::now();
        let mut table = self.table.lock();
        let types = table.get_mut(&key).ok_or(LockError::NoSuchLock)?;
        let mut found = false;
        for list in types.values_mut() {
            if let Some(idx) = list
                .iter()
                .position(|l| l.lock.token == token && !l.expired(now))
            {
                list.remove(idx);
                found = true;
                break;
            }
        }
        prune(types, now);
        if types.is_empty() {
            table.remove(&key);
        }
        if found {
            debug!("lock {token} removed");
            Ok(())
        } else {
            Err(LockError::NoSuchLock)
        }
    }

    fn active_locks(&self, item: &dyn StoreItem) -> Vec<ActiveLock> {
        let key = item.unique_key();
        let mut table = self.table.lock();
        let types = match table.get_mut(&key) {
            Some(types) => types,
            None => return Vec::new(),
        };
        prune(types, Instant::now());
        let locks: Vec<ActiveLock> = types
            .values()
            .flat_map(|list| list.iter())
            .map(|l| l.lock.clone())
            .collect();
        if locks.is_empty() {
            table.remove(&key);
        }
        locks
    }

    fn supported_locks(&self, _item: &dyn StoreItem) -> Vec<LockEntry> {
        vec![
            LockEntry {
                scope: LockScope::Exclusive,
                lock_type: LockType::Write,
            },
            LockEntry {
                scope: LockScope::Shared,
                lock_type: LockType::Write,
            },
        ]
    }

    fn release_all(&self, item: &dyn StoreItem) {
        self.table.lock().remove(&item.unique_key());
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use futures_util::future;

    use super::*;
    use crate::store::*;

    #[derive(Debug)]
    struct Item(&'static str);

    impl StoreItem for Item {
        fn name(&self) -> String {
            self.0.to_string()
        }
        fn unique_key(&self) -> String {
            format!("key:{}", self.0)
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn get_readable_stream(&self) -> StoreFuture<'_, Box<dyn DavReadStream>> {
            Box::pin(future::ready(Err(StoreError::NotImplemented)))
        }
        fn upload_from_stream(&self, _src: UploadStream) -> StoreFuture<'_, ()> {
            Box::pin(future::ready(Err(StoreError::NotImplemented)))
        }
        fn copy_to<'a>(
            &'a self,
            _dest: &'a dyn StoreCollection,
            _name: &'a str,
            _overwrite: bool,
        ) -> StoreFuture<'a, Placed<Box<dyn StoreItem>>> {
            Box::pin(future::ready(Err(StoreError::NotImplemented)))
        }
    }

    fn request(scope: LockScope, timeout: LockTimeout) -> LockRequest {
        LockRequest {
            lock_type: LockType::Write,
            scope,
            owner: None,
            lock_root: "/file".to_string(),
            deep: false,
            timeout,
        }
    }

    #[test]
    fn exclusive_locks_conflict() {
        let ls = MemLs::new();
        let item = Item("file");
        let lock = ls
            .lock(&item, request(LockScope::Exclusive, LockTimeout::Infinite))
            .unwrap();
        assert!(lock.token.starts_with("opaquelocktoken:"));
        let second = ls.lock(&item, request(LockScope::Exclusive, LockTimeout::Infinite));
        assert_eq!(second.unwrap_err(), LockError::Locked);
        let shared = ls.lock(&item, request(LockScope::Shared, LockTimeout::Infinite));
        assert_eq!(shared.unwrap_err(), LockError::Locked);

        // other items are not affected.
        assert!(ls
            .lock(&Item("other"), request(LockScope::Exclusive, LockTimeout::Infinite))
            .is_ok());
    }

    #[test]
    fn shared_locks_coexist() {
        let ls = MemLs::new();
        let item = Item("file");
        let a = ls
            .lock(&item, request(LockScope::Shared, LockTimeout::Seconds(60)))
            .unwrap();
        let b = ls
            .lock(&item, request(LockScope::Shared, LockTimeout::Seconds(60)))
            .unwrap();
        assert_ne!(a.token, b.token);
        assert_eq!(ls.active_locks(&item).len(), 2);
        let excl = ls.lock(&item, request(LockScope::Exclusive, LockTimeout::Infinite));
        assert_eq!(excl.unwrap_err(), LockError::Locked);
    }

    #[test]
    fn unlock_removes_exactly_one() {
        let ls = MemLs::new();
        let item = Item("file");
        let a = ls
            .lock(&item, request(LockScope::Shared, LockTimeout::Infinite))
            .unwrap();
        let b = ls
            .lock(&item, request(LockScope::Shared, LockTimeout::Infinite))
            .unwrap();
        ls.unlock(&item, &a.token).unwrap();
        assert!(!ls.has_lock(&item, &a.token));
        assert!(ls.has_lock(&item, &b.token));
        assert_eq!(ls.unlock(&item, &a.token).unwrap_err(), LockError::NoSuchLock);
        ls.unlock(&item, &b.token).unwrap();
        assert!(!ls.is_locked(&item));
        assert!(ls.table.lock().is_empty());
    }

    #[test]
    fn expired_locks_are_ignored() {
        let ls = MemLs::new();
        let item = Item("file");
        let lock = ls
            .lock(&item, request(LockScope::Exclusive, LockTimeout::Seconds(0)))
            .unwrap();
        assert!(!ls.is_locked(&item));
        let refreshed = ls.refresh(&item, &lock.token, None);
        assert_eq!(refreshed.unwrap_err(), LockError::NoSuchLock);
        assert_eq!(
            ls.unlock(&item, &lock.token).unwrap_err(),
            LockError::NoSuchLock
        );
        // the lookups above dropped the expired entry.
        assert!(ls.table.lock().is_empty());
        // an expired exclusive lock does not block a new one.
        assert!(ls
            .lock(&item, request(LockScope::Exclusive, LockTimeout::Infinite))
            .is_ok());
    }

    #[test]
    fn refresh_keeps_or_replaces_timeout() {
        let ls = MemLs::new();
        let item = Item("file");
        let lock = ls
            .lock(&item, request(LockScope::Exclusive, LockTimeout::Seconds(30)))
            .unwrap();
        let same = ls.refresh(&item, &lock.token, None).unwrap();
        assert_eq!(same.timeout, LockTimeout::Seconds(30));
        let longer = ls
            .refresh(&item, &lock.token, Some(LockTimeout::Seconds(600)))
            .unwrap();
        assert_eq!(longer.timeout, LockTimeout::Seconds(600));
        assert_eq!(longer.token, lock.token);
        assert_eq!(
            ls.refresh(&Item("other"), &lock.token, None).unwrap_err(),
            LockError::NoSuchLock
        );
    }

    #[test]
    fn release_all_forgets_item() {
        let ls = MemLs::new();
        let item = Item("file");
        ls.lock(&item, request(LockScope::Shared, LockTimeout::Infinite))
            .unwrap();
        ls.release_all(&item);
        assert!(!ls.is_locked(&item));
    }
}
