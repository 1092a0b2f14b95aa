//! Accord - transactional access coordination
//!
//! Serializes concurrent transactions' accesses to named objects by
//! acquiring read/write locks, detecting deadlocks, and returning a
//! well-defined conflict outcome so the caller can abort or proceed.
//!
//! Architecture:
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │  AccessCoordinator / AccessReporter              │
//! │  - Transaction registry (txn id → Locker)        │
//! │  - Per-source typed reporters                    │
//! │  - Conflict → abort translation, access details  │
//! ├──────────────────────────────────────────────────┤
//! │  LockManager                                     │
//! │  - lock / lock_no_wait / wait_for_lock / release │
//! │  - Sharded key → lock-state map                  │
//! │  - Deadline waits on per-locker conditions       │
//! ├──────────────────────────────────────────────────┤
//! │  Deadlock detection                              │
//! │  - Waits-for cycle search from a blocked locker  │
//! │  - Youngest transaction chosen as victim         │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! Requests that block are serviced in arrival order, except that upgrade
//! requests go ahead of non-upgrade requests: an upgrade is useless if a
//! conflicting writer goes first and takes the waiter's read lock away.
//! Blocking alone never aborts a transaction; only an actual waits-for
//! cycle does, and then the youngest member of the cycle pays.
//!
//! The per-transaction reporter methods are not thread safe with respect
//! to a single transaction; each transaction is expected to run on one
//! worker thread. All operations are safe across transactions.

pub mod coord;
pub mod lock;
pub mod profile;
pub mod txn;

// Re-export main types
pub use coord::{AccessCoordinator, AccessReporter, CoordinatorConfig, Key, ToObjectId};
pub use lock::{LockConflict, LockConflictKind, LockManager, Locker};
pub use profile::{AccessType, AccessedObject, AccessedObjectsDetail, ConflictKind, ProfileSink};
pub use txn::{CompletionListener, Transaction, TxnId};

/// Access coordination error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Transaction timed out: {0}")]
    TransactionTimeout(String),

    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    #[error("Transaction interrupted: {0}")]
    TransactionInterrupted(String),
}

pub type Result<T> = std::result::Result<T, AccessError>;
