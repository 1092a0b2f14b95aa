//! Lock Request - a single pending or held request for a key

use std::fmt;
use std::sync::Arc;

use super::locker::Locker;
use super::LockKey;

/// One request by one locker for one key.
///
/// A request is created when a locker first asks for a key at a mode it
/// does not already hold. It lives in the key's waiter queue while pending
/// and in the granted set once granted. The `upgrade` flag marks a write
/// request issued while the same locker already holds the key for read;
/// such requests are queued ahead of non-upgrade waiters.
pub struct LockRequest<K: LockKey> {
    locker: Arc<Locker<K>>,
    key: K,
    for_write: bool,
    upgrade: bool,
}

impl<K: LockKey> LockRequest<K> {
    pub(crate) fn new(locker: Arc<Locker<K>>, key: K, for_write: bool, upgrade: bool) -> Self {
        Self {
            locker,
            key,
            for_write,
            upgrade,
        }
    }

    /// The locker that made this request
    pub fn locker(&self) -> &Arc<Locker<K>> {
        &self.locker
    }

    /// The key being requested
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Whether a write lock is requested
    pub fn for_write(&self) -> bool {
        self.for_write
    }

    /// Whether this is a read-to-write upgrade
    pub fn upgrade(&self) -> bool {
        self.upgrade
    }

    /// Whether both requests were made by the same locker
    pub(crate) fn same_locker(&self, other: &LockRequest<K>) -> bool {
        Arc::ptr_eq(&self.locker, &other.locker)
    }
}

impl<K: LockKey> fmt::Debug for LockRequest<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.for_write {
            if self.upgrade {
                "UPGRADE"
            } else {
                "WRITE"
            }
        } else {
            "READ"
        };
        write!(
            f,
            "LockRequest[{:?}, {:?}, {}]",
            self.locker.txn_id(),
            self.key,
            mode
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locker(id: u8) -> Arc<Locker<String>> {
        Arc::new(Locker::new(vec![id], 10, u64::MAX))
    }

    #[test]
    fn test_request_accessors() {
        let l = locker(1);
        let req = LockRequest::new(l.clone(), "k".to_string(), true, false);
        assert!(req.for_write());
        assert!(!req.upgrade());
        assert_eq!(req.key(), "k");
        assert!(Arc::ptr_eq(req.locker(), &l));
    }

    #[test]
    fn test_same_locker() {
        let a = locker(1);
        let b = locker(2);
        let r1 = LockRequest::new(a.clone(), "k".to_string(), false, false);
        let r2 = LockRequest::new(a, "k2".to_string(), true, true);
        let r3 = LockRequest::new(b, "k".to_string(), false, false);
        assert!(r1.same_locker(&r2));
        assert!(!r1.same_locker(&r3));
    }

    #[test]
    fn test_debug_shows_mode() {
        let l = locker(1);
        let up = LockRequest::new(l.clone(), "k".to_string(), true, true);
        let rd = LockRequest::new(l, "k".to_string(), false, false);
        assert!(format!("{:?}", up).contains("UPGRADE"));
        assert!(format!("{:?}", rd).contains("READ"));
    }
}
