//! Lock State - per-key granted set and waiter queue
//!
//! Holds the grant rule: waiters are serviced strictly from the head of
//! the queue, stopping at the first waiter that cannot be granted. Nothing
//! is reordered around a blocked head, which keeps grants FIFO and writers
//! free of starvation. Upgrade requests are the one exception to arrival
//! order: they are inserted ahead of all non-upgrade waiters (FIFO among
//! themselves).

use std::collections::VecDeque;
use std::sync::Arc;

use super::locker::Locker;
use super::request::LockRequest;
use super::LockKey;

/// State of one lockable key: who holds it and who is waiting.
///
/// Invariants: at most one write in `granted`, and a granted write is
/// alone; a locker appears in `granted` at most once per key except
/// transiently during an upgrade (held read plus queued upgrade); the
/// queue holds no request whose locker already owns the key at the
/// requested-or-stronger mode.
pub(crate) struct LockState<K: LockKey> {
    granted: Vec<Arc<LockRequest<K>>>,
    waiters: VecDeque<Arc<LockRequest<K>>>,
}

impl<K: LockKey> Default for LockState<K> {
    fn default() -> Self {
        Self {
            granted: Vec::new(),
            waiters: VecDeque::new(),
        }
    }
}

impl<K: LockKey> LockState<K> {
    /// The granted request owned by `locker`, if any.
    ///
    /// During an upgrade this is the held read; the queued write is in
    /// `waiters`.
    pub(crate) fn grant_for(&self, locker: &Arc<Locker<K>>) -> Option<&Arc<LockRequest<K>>> {
        self.granted.iter().find(|r| Arc::ptr_eq(r.locker(), locker))
    }

    /// Whether a write lock is currently granted
    pub(crate) fn has_granted_write(&self) -> bool {
        self.granted.iter().any(|r| r.for_write())
    }

    /// Inserts a request into the waiter queue: upgrades go before all
    /// non-upgrade waiters, otherwise strict arrival order.
    pub(crate) fn insert_waiter(&mut self, request: Arc<LockRequest<K>>) {
        let pos = if request.upgrade() {
            self.waiters
                .iter()
                .position(|w| !w.upgrade())
                .unwrap_or(self.waiters.len())
        } else {
            self.waiters.len()
        };
        self.waiters.insert(pos, request);
    }

    /// Removes `request` from the waiter queue. Returns false if it was
    /// not queued (granted or already flushed).
    pub(crate) fn remove_waiter(&mut self, request: &Arc<LockRequest<K>>) -> bool {
        match self.waiters.iter().position(|w| Arc::ptr_eq(w, request)) {
            Some(pos) => {
                self.waiters.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Removes every grant owned by `locker`. Returns whether any grant
    /// was removed.
    pub(crate) fn remove_granted(&mut self, locker: &Arc<Locker<K>>) -> bool {
        let before = self.granted.len();
        self.granted.retain(|r| !Arc::ptr_eq(r.locker(), locker));
        self.granted.len() != before
    }

    /// Services the waiter queue after any state change, granting from
    /// the head until the first waiter that must keep waiting. Returns
    /// the newly granted requests so the caller can wake their lockers.
    pub(crate) fn grant_waiters(&mut self) -> Vec<Arc<LockRequest<K>>> {
        let mut granted_now = Vec::new();
        while let Some(head) = self.waiters.front() {
            let for_write = head.for_write();
            let grantable = if for_write {
                // grantable when free, or held only by the requester
                // itself (a self-upgrade)
                self.granted.is_empty() || self.granted.iter().all(|g| g.same_locker(head))
            } else {
                !self.has_granted_write()
            };
            if !grantable {
                break;
            }
            if for_write {
                // promote: the locker's held read is replaced by the write
                self.granted.clear();
            }
            if let Some(request) = self.waiters.pop_front() {
                self.granted.push(request.clone());
                granted_now.push(request);
            }
            if for_write {
                // a granted write excludes everything behind it
                break;
            }
        }
        granted_now
    }

    /// The foreign locker at the front of the set blocking `locker`: the
    /// first granted owner that is not `locker`, else the first foreign
    /// waiter ahead in the queue.
    pub(crate) fn first_blocker(&self, locker: &Arc<Locker<K>>) -> Option<Arc<Locker<K>>> {
        self.granted
            .iter()
            .chain(self.waiters.iter())
            .find(|r| !Arc::ptr_eq(r.locker(), locker))
            .map(|r| r.locker().clone())
    }

    /// Granted owners other than `exclude` that are incompatible with a
    /// request at the given mode, for the waits-for edge scan.
    pub(crate) fn blocking_owners(
        &self,
        exclude: &Arc<Locker<K>>,
        for_write: bool,
    ) -> Vec<Arc<Locker<K>>> {
        self.granted
            .iter()
            .filter(|r| !Arc::ptr_eq(r.locker(), exclude))
            .filter(|r| for_write || r.for_write())
            .map(|r| r.locker().clone())
            .collect()
    }

    /// Whether nothing holds or waits on this key, so the entry can be
    /// dropped from its shard
    pub(crate) fn is_unused(&self) -> bool {
        self.granted.is_empty() && self.waiters.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn granted_len(&self) -> usize {
        self.granted.len()
    }

    #[cfg(test)]
    pub(crate) fn waiter_len(&self) -> usize {
        self.waiters.len()
    }
}
