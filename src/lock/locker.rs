//! Locker - per-transaction lock state
//!
//! A locker is created when its transaction is registered and lives until
//! the transaction completes. It carries the transaction's age (the
//! originally requested start time, used for deadlock victim selection),
//! the append-only log of every request made, the current conflict if any,
//! and the condition the owning thread parks on while a request is blocked.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::{Condvar, Mutex};

use super::request::LockRequest;
use super::LockKey;

// ============================================================================
// Conflict outcomes
// ============================================================================

/// Classification of a failed or pending lock attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockConflictKind {
    /// The request is queued; the caller must wait to complete it.
    /// Only returned by `lock_no_wait`; never terminal.
    Blocked,
    /// The wait deadline passed before the request was granted
    Timeout,
    /// The request was refused outright. Kept for coordinator parity;
    /// this lock manager never produces it.
    Denied,
    /// The waiting locker was interrupted
    Interrupted,
    /// The locker was chosen as a deadlock victim
    Deadlock,
}

impl LockConflictKind {
    /// Whether this outcome ends the lock attempt
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LockConflictKind::Blocked)
    }
}

/// Information about a conflict that kept a request from being granted,
/// with the foreign locker at the front of the blocking set when known.
#[derive(Clone)]
pub struct LockConflict<K: LockKey> {
    kind: LockConflictKind,
    conflicting: Option<Arc<Locker<K>>>,
}

impl<K: LockKey> LockConflict<K> {
    pub(crate) fn new(kind: LockConflictKind, conflicting: Option<Arc<Locker<K>>>) -> Self {
        Self { kind, conflicting }
    }

    /// The kind of conflict
    pub fn kind(&self) -> LockConflictKind {
        self.kind
    }

    /// The locker this request conflicted with, if one was identified
    pub fn conflicting_locker(&self) -> Option<&Arc<Locker<K>>> {
        self.conflicting.as_ref()
    }

    /// Transaction id of the conflicting locker
    pub fn conflicting_txn_id(&self) -> Option<&[u8]> {
        self.conflicting.as_deref().map(Locker::txn_id)
    }
}

impl<K: LockKey> fmt::Debug for LockConflict<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockConflict")
            .field("kind", &self.kind)
            .field("conflicting", &self.conflicting_txn_id())
            .finish()
    }
}

// ============================================================================
// Access log
// ============================================================================

/// One entry in a locker's append-only log of requests made.
///
/// Plain values, not request pointers: the log outlives the per-key queues
/// and must not keep them alive. A read and its later upgrade are two
/// entries; bulk release tolerates the duplicate key.
#[derive(Debug, Clone)]
pub struct AccessRecord<K: LockKey> {
    pub key: K,
    pub for_write: bool,
    pub upgrade: bool,
}

// ============================================================================
// Locker
// ============================================================================

/// A request currently blocked, plus the thread allowed to wait on it
pub(crate) struct PendingWait<K: LockKey> {
    pub(crate) request: Arc<LockRequest<K>>,
    pub(crate) thread: ThreadId,
}

/// Mutable locker state, guarded by the locker's own mutex.
///
/// May be taken while holding a shard mutex, never the reverse.
pub(crate) struct LockerState<K: LockKey> {
    /// Current conflict; a `Deadlock` here is sticky and fails all
    /// further lock or wait calls
    pub(crate) conflict: Option<LockConflict<K>>,
    /// The request currently blocked, or none
    pub(crate) waiting_for: Option<PendingWait<K>>,
    /// Every request this locker has made, in order
    pub(crate) accesses: Vec<AccessRecord<K>>,
    /// Debug labels per key, first writer wins
    pub(crate) descriptions: HashMap<K, String>,
    /// External interruption, consumed by the waiting thread
    pub(crate) interrupted: bool,
}

/// Per-transaction lock state
pub struct Locker<K: LockKey> {
    txn_id: Vec<u8>,
    age: u64,
    txn_deadline: u64,
    pub(crate) state: Mutex<LockerState<K>>,
    pub(crate) wake: Condvar,
}

impl<K: LockKey> Locker<K> {
    /// Creates a locker for the transaction with the given id, age (the
    /// task's originally requested start time in milliseconds), and
    /// absolute transaction deadline in milliseconds.
    pub fn new(txn_id: Vec<u8>, age: u64, txn_deadline: u64) -> Self {
        Self {
            txn_id,
            age,
            txn_deadline,
            state: Mutex::new(LockerState {
                conflict: None,
                waiting_for: None,
                accesses: Vec::new(),
                descriptions: HashMap::new(),
                interrupted: false,
            }),
            wake: Condvar::new(),
        }
    }

    /// Transaction id this locker belongs to
    pub fn txn_id(&self) -> &[u8] {
        &self.txn_id
    }

    /// Originally requested start time in milliseconds; smaller = older
    pub fn age(&self) -> u64 {
        self.age
    }

    /// When a wait started at `now` must give up: the lock timeout capped
    /// by the transaction's own deadline. Saturating, in milliseconds.
    pub(crate) fn wait_deadline(&self, now: u64, lock_timeout: u64) -> u64 {
        now.saturating_add(lock_timeout).min(self.txn_deadline)
    }

    /// Whether an earlier attempt ended in deadlock, poisoning the locker
    pub fn is_deadlocked(&self) -> bool {
        matches!(
            &self.state.lock().conflict,
            Some(c) if c.kind() == LockConflictKind::Deadlock
        )
    }

    /// Current conflict, if any
    pub fn conflict(&self) -> Option<LockConflict<K>> {
        self.state.lock().conflict.clone()
    }

    /// Interrupts a blocked wait. The waiting thread observes the flag,
    /// resolves its pending request as an `Interrupted` conflict, and
    /// returns it to the caller.
    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        state.interrupted = true;
        self.wake.notify_all();
    }

    /// The request currently blocked, if any
    pub(crate) fn pending_request(&self) -> Option<Arc<LockRequest<K>>> {
        self.state.lock().waiting_for.as_ref().map(|w| w.request.clone())
    }

    /// Snapshot of every request made so far
    pub fn accesses(&self) -> Vec<AccessRecord<K>> {
        self.state.lock().accesses.clone()
    }

    /// Associates a debug description with a key. An existing description
    /// is kept; the first writer wins.
    pub fn set_description(&self, key: K, description: &str) {
        let mut state = self.state.lock();
        state
            .descriptions
            .entry(key)
            .or_insert_with(|| description.to_string());
    }

    /// The description recorded for a key, if any
    pub fn description(&self, key: &K) -> Option<String> {
        self.state.lock().descriptions.get(key).cloned()
    }

    /// Snapshot of all recorded descriptions
    pub fn descriptions(&self) -> HashMap<K, String> {
        self.state.lock().descriptions.clone()
    }

    /// Deadlock victim ordering: true if `self` should be sacrificed
    /// before `other`. The younger locker (larger age) loses; ties go to
    /// the lexicographically greater transaction id.
    pub(crate) fn is_younger_than(&self, other: &Locker<K>) -> bool {
        (self.age, &self.txn_id) > (other.age, &other.txn_id)
    }
}

impl<K: LockKey> fmt::Debug for Locker<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Locker[txn:{:?}, age:{}]", self.txn_id, self.age)
    }
}
