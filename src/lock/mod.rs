//! Lock Manager - shared/exclusive locking with upgrade and deadlock detection
//!
//! The lock layer is generic over the key type so it can serialize access to
//! anything with value identity. Per key it keeps a granted set and a FIFO
//! waiter queue (upgrades jump ahead of non-upgrades), partitioned across
//! independently locked shards. Blocked callers park on their locker's
//! condition until granted, timed out, interrupted, or chosen as a deadlock
//! victim.
//!
//! Lock-ordering rules observed throughout:
//! - at most one shard mutex held at a time (the deadlock search reads
//!   locker state between shard hops),
//! - a locker mutex may be taken while holding a shard mutex, never the
//!   reverse,
//! - no external callbacks run under a shard mutex.

pub mod deadlock;
pub mod locker;
pub mod manager;
pub mod map;
pub mod request;
pub mod state;

pub use locker::{AccessRecord, LockConflict, LockConflictKind, Locker};
pub use manager::LockManager;
pub use request::LockRequest;

use std::fmt::Debug;
use std::hash::Hash;

/// Value identity required of lockable keys.
pub trait LockKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<K: Eq + Hash + Clone + Debug + Send + Sync + 'static> LockKey for K {}

/// Current wall-clock time in milliseconds, the unit all lock deadlines
/// and transaction ages are expressed in.
pub(crate) fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
