//! Lock Manager - lock, lock-no-wait, wait-for-lock, and release
//!
//! Coordinates the sharded key map and the per-locker conditions. A lock
//! attempt either returns granted, or queues a waiter and (for the
//! blocking form) parks the calling thread until the request is granted,
//! the deadline passes, the locker is interrupted, or the deadlock
//! detector picks it as a victim.
//!
//! The wait deadline is `min(now + lock_timeout, transaction deadline)`,
//! so a transaction near its own timeout never waits the full lock
//! timeout.

use std::sync::Arc;
use std::time::Duration;

use log::trace;

use crate::{AccessError, Result};

use super::deadlock;
use super::locker::{AccessRecord, LockConflict, LockConflictKind, Locker, PendingWait};
use super::map::KeyMap;
use super::request::LockRequest;
use super::{now_millis, LockKey};

// ============================================================================
// Lock Manager
// ============================================================================

/// Lock manager over keys of type `K`.
///
/// All operations classify their outcome as granted (`Ok(None)`), a
/// conflict (`Ok(Some(_))`), or a programming error (`Err(_)`). `Blocked`
/// conflicts are only produced by [`lock_no_wait`](Self::lock_no_wait) and
/// are completed by a later [`wait_for_lock`](Self::wait_for_lock) from
/// the same thread.
pub struct LockManager<K: LockKey> {
    key_map: KeyMap<K>,
    lock_timeout: u64,
}

enum WaitOutcome<K: LockKey> {
    Granted,
    Delivered(LockConflict<K>),
    GaveUp(LockConflictKind),
}

impl<K: LockKey> LockManager<K> {
    /// Creates a lock manager with the given per-acquisition timeout in
    /// milliseconds and number of key-map shards.
    pub fn new(lock_timeout: u64, num_key_maps: usize) -> Result<Self> {
        if lock_timeout == 0 {
            return Err(AccessError::InvalidArgument(
                "The lock timeout must be greater than 0".to_string(),
            ));
        }
        if num_key_maps == 0 {
            return Err(AccessError::InvalidArgument(
                "The number of key maps must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            key_map: KeyMap::new(num_key_maps),
            lock_timeout,
        })
    }

    /// The configured per-acquisition timeout in milliseconds
    pub fn lock_timeout(&self) -> u64 {
        self.lock_timeout
    }

    // ========================================================================
    // Acquisition
    // ========================================================================

    /// Acquires a lock on `key`, waiting if needed.
    ///
    /// Returns `Ok(None)` once the lock is held at the requested or a
    /// stronger mode, or `Ok(Some(conflict))` describing why it was not.
    /// A `Deadlock` conflict poisons the locker: every later lock or wait
    /// call fails with `InvalidState`.
    pub fn lock(
        &self,
        locker: &Arc<Locker<K>>,
        key: K,
        for_write: bool,
    ) -> Result<Option<LockConflict<K>>> {
        match self.attempt(locker, key, for_write)? {
            Some(conflict) if conflict.kind() == LockConflictKind::Blocked => {
                self.wait_internal(locker)
            }
            outcome => Ok(outcome),
        }
    }

    /// Acquires a lock on `key` without waiting.
    ///
    /// If the request cannot be granted immediately it is still queued
    /// (and checked for deadlock) and `Blocked` is returned; complete the
    /// acquisition with [`wait_for_lock`](Self::wait_for_lock) or abandon
    /// it via [`release_all`](Self::release_all).
    pub fn lock_no_wait(
        &self,
        locker: &Arc<Locker<K>>,
        key: K,
        for_write: bool,
    ) -> Result<Option<LockConflict<K>>> {
        self.attempt(locker, key, for_write)
    }

    /// Waits for a previously blocked attempt to complete. Returns
    /// `Ok(None)` if the lock was acquired or nothing was pending.
    ///
    /// Must be called from the thread that issued the blocked attempt;
    /// cross-thread waits fail with `InvalidState`.
    pub fn wait_for_lock(&self, locker: &Arc<Locker<K>>) -> Result<Option<LockConflict<K>>> {
        self.wait_internal(locker)
    }

    fn attempt(
        &self,
        locker: &Arc<Locker<K>>,
        key: K,
        for_write: bool,
    ) -> Result<Option<LockConflict<K>>> {
        {
            let mut state = locker.state.lock();
            if matches!(&state.conflict, Some(c) if c.kind() == LockConflictKind::Deadlock) {
                return Err(AccessError::InvalidState(
                    "Transaction was chosen as a deadlock victim".to_string(),
                ));
            }
            if state.waiting_for.is_some() {
                return Err(AccessError::InvalidState(
                    "Still waiting for a previous lock attempt".to_string(),
                ));
            }
            // a previous timeout or interruption does not poison the locker
            state.conflict = None;
        }

        let blocked = self.key_map.with_state(&key, |lock_state| {
            if let Some(existing) = lock_state.grant_for(locker) {
                if existing.for_write() || !for_write {
                    // already held at the requested-or-stronger mode
                    return None;
                }
            }
            let upgrade = for_write && lock_state.grant_for(locker).is_some();
            let request = Arc::new(LockRequest::new(
                locker.clone(),
                key.clone(),
                for_write,
                upgrade,
            ));
            locker.state.lock().accesses.push(AccessRecord {
                key: key.clone(),
                for_write,
                upgrade,
            });
            lock_state.insert_waiter(request.clone());
            let granted = lock_state.grant_waiters();
            let mut ours = false;
            for newly in &granted {
                if Arc::ptr_eq(newly, &request) {
                    ours = true;
                } else {
                    Self::wake_granted(newly);
                }
            }
            if ours {
                None
            } else {
                let blocker = lock_state.first_blocker(locker);
                locker.state.lock().waiting_for = Some(PendingWait {
                    request,
                    thread: std::thread::current().id(),
                });
                Some(LockConflict::new(LockConflictKind::Blocked, blocker))
            }
        });

        let Some(blocked_conflict) = blocked else {
            trace!("lock granted: {:?} key {:?} for_write {}", locker, key, for_write);
            return Ok(None);
        };
        trace!("lock blocked: {:?} key {:?} for_write {}", locker, key, for_write);

        // the locker just became a waiter; look for a waits-for cycle
        if let Some(victim_conflict) = deadlock::check(self, locker) {
            if let Some(request) = locker.pending_request() {
                self.flush_waiter(&request);
            }
            let mut state = locker.state.lock();
            state.waiting_for = None;
            state.conflict = Some(victim_conflict.clone());
            return Ok(Some(victim_conflict));
        }
        Ok(Some(blocked_conflict))
    }

    fn wait_internal(&self, locker: &Arc<Locker<K>>) -> Result<Option<LockConflict<K>>> {
        let request = {
            let state = locker.state.lock();
            match &state.waiting_for {
                None => {
                    if matches!(&state.conflict, Some(c) if c.kind() == LockConflictKind::Deadlock)
                    {
                        return Err(AccessError::InvalidState(
                            "Transaction was chosen as a deadlock victim".to_string(),
                        ));
                    }
                    return Ok(None);
                }
                Some(pending) => {
                    if pending.thread != std::thread::current().id() {
                        return Err(AccessError::InvalidState(
                            "The pending lock attempt belongs to another thread".to_string(),
                        ));
                    }
                    pending.request.clone()
                }
            }
        };

        let deadline = locker.wait_deadline(now_millis(), self.lock_timeout);
        let outcome = {
            let mut state = locker.state.lock();
            loop {
                if let Some(conflict) = state.conflict.clone() {
                    break WaitOutcome::Delivered(conflict);
                }
                if state.waiting_for.is_none() {
                    break WaitOutcome::Granted;
                }
                if state.interrupted {
                    state.interrupted = false;
                    break WaitOutcome::GaveUp(LockConflictKind::Interrupted);
                }
                let now = now_millis();
                if now >= deadline {
                    break WaitOutcome::GaveUp(LockConflictKind::Timeout);
                }
                locker
                    .wake
                    .wait_for(&mut state, Duration::from_millis(deadline - now));
            }
        };

        match outcome {
            WaitOutcome::Granted => Ok(None),
            WaitOutcome::Delivered(conflict) => {
                // usually already flushed by the detector; make sure
                self.flush_waiter(&request);
                locker.state.lock().waiting_for = None;
                Ok(Some(conflict))
            }
            WaitOutcome::GaveUp(kind) => Ok(self.resolve_failed_wait(locker, &request, kind)),
        }
    }

    /// Resolves a wait that gave up against shard state: a grant that
    /// raced the decision wins, otherwise the waiter is withdrawn and the
    /// conflict recorded.
    fn resolve_failed_wait(
        &self,
        locker: &Arc<Locker<K>>,
        request: &Arc<LockRequest<K>>,
        kind: LockConflictKind,
    ) -> Option<LockConflict<K>> {
        let (removed, blocker) = self
            .key_map
            .with_existing(request.key(), |lock_state| {
                if lock_state.remove_waiter(request) {
                    for newly in lock_state.grant_waiters() {
                        Self::wake_granted(&newly);
                    }
                    (true, lock_state.first_blocker(locker))
                } else {
                    (false, None)
                }
            })
            .unwrap_or((false, None));

        let mut state = locker.state.lock();
        state.waiting_for = None;
        if !removed {
            // the request left the queue before we could withdraw it:
            // either granted, or a conflict was delivered concurrently
            return state.conflict.clone();
        }
        let conflict = LockConflict::new(kind, blocker);
        state.conflict = Some(conflict.clone());
        Some(conflict)
    }

    // ========================================================================
    // Release
    // ========================================================================

    /// Releases any lock held by `locker` on `key` and grants whatever
    /// the departure unblocks. Releasing a key that is not held is a
    /// no-op; release never fails.
    pub fn release_lock(&self, locker: &Arc<Locker<K>>, key: &K) {
        self.key_map.with_existing(key, |lock_state| {
            if lock_state.remove_granted(locker) {
                for newly in lock_state.grant_waiters() {
                    Self::wake_granted(&newly);
                }
            }
        });
    }

    /// Releases every key the locker ever requested, withdrawing an
    /// abandoned blocked request first so no queue entry survives the
    /// transaction.
    pub fn release_all(&self, locker: &Arc<Locker<K>>) {
        if let Some(request) = locker.pending_request() {
            self.flush_waiter(&request);
            locker.state.lock().waiting_for = None;
        }
        for record in locker.accesses() {
            self.release_lock(locker, &record.key);
        }
    }

    // ========================================================================
    // Internal plumbing
    // ========================================================================

    /// Removes a withdrawn waiter from its queue and grants whatever its
    /// departure unblocks. Idempotent.
    pub(crate) fn flush_waiter(&self, request: &Arc<LockRequest<K>>) {
        self.key_map.with_existing(request.key(), |lock_state| {
            if lock_state.remove_waiter(request) {
                for newly in lock_state.grant_waiters() {
                    Self::wake_granted(&newly);
                }
            }
        });
    }

    /// Clears the owner's pending wait and wakes it after its request was
    /// moved to the granted set.
    fn wake_granted(request: &Arc<LockRequest<K>>) {
        let owner = request.locker();
        let mut state = owner.state.lock();
        if let Some(pending) = &state.waiting_for {
            if Arc::ptr_eq(&pending.request, request) {
                state.waiting_for = None;
                owner.wake.notify_all();
            }
        }
    }

    /// Delivers a deadlock conflict to a blocked victim: its queued
    /// request is withdrawn, the conflict recorded, and the victim woken.
    /// Returns false when the victim was no longer waiting (its request
    /// was granted before the cycle was acted on).
    pub(crate) fn abort_victim(
        &self,
        victim: &Arc<Locker<K>>,
        conflict: LockConflict<K>,
    ) -> bool {
        let Some(request) = victim.pending_request() else {
            return false;
        };
        self.flush_waiter(&request);
        let mut state = victim.state.lock();
        state.waiting_for = None;
        state.conflict = Some(conflict);
        victim.wake.notify_all();
        true
    }

    /// Granted owners on `key` that are incompatible with a request at
    /// the given mode, for the waits-for scan. Takes the key's shard
    /// mutex; the caller must hold none.
    pub(crate) fn blocking_owners(
        &self,
        key: &K,
        exclude: &Arc<Locker<K>>,
        for_write: bool,
    ) -> Vec<Arc<Locker<K>>> {
        self.key_map
            .with_existing(key, |lock_state| lock_state.blocking_owners(exclude, for_write))
            .unwrap_or_default()
    }

    /// Number of live lock entries, for tests and monitoring
    pub fn live_lock_count(&self) -> usize {
        self.key_map.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
