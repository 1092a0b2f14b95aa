//! Access Coordinator - locking-based conflict handling for transactions
//!
//! The coordinator owns the transaction → locker registry and a single
//! lock manager. Services register a named access source and report
//! object accesses through the typed reporter; conflicting accesses abort
//! the reporting transaction with a typed error. When a transaction
//! completes, a listener releases every lock it held and publishes what
//! it accessed to the profile sink.
//!
//! Locks are released from a completion listener rather than a
//! transaction participant so they are only dropped after every
//! participant has seen the final outcome.

pub mod config;
pub mod key;
pub mod reporter;

pub use config::CoordinatorConfig;
pub use key::{Key, ToObjectId};
pub use reporter::AccessReporter;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use crate::lock::{LockConflict, LockConflictKind, LockManager, Locker};
use crate::profile::{
    AccessType, AccessedObject, AccessedObjectsDetail, ConflictKind, ProfileSink,
};
use crate::txn::{CompletionListener, Transaction, TxnId};
use crate::{AccessError, Result};

// ============================================================================
// Coordinator
// ============================================================================

pub(crate) struct CoordinatorInner {
    /// Active transactions: txn id → locker
    txns: RwLock<HashMap<TxnId, Arc<Locker<Key>>, ahash::RandomState>>,
    /// The lock manager shared by every source
    pub(crate) manager: LockManager<Key>,
    /// Where completed transactions' access details go
    profile: Arc<dyn ProfileSink>,
    /// Completed transactions (for monitoring)
    total_completed: AtomicU64,
    /// Transactions that ended as deadlock victims
    total_deadlocks: AtomicU64,
    /// Transactions that ended with a lock timeout
    total_timeouts: AtomicU64,
}

/// Serializes transactions' object accesses with read/write locks.
///
/// Deadlock is checked whenever an access blocks; the youngest
/// transaction in a cycle (by originally requested start time, then by
/// transaction id) is the victim. Requests that would merely block are
/// never denied up front.
#[derive(Clone)]
pub struct AccessCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl AccessCoordinator {
    /// Creates a coordinator from the configuration, publishing access
    /// details to `profile`.
    pub fn new(config: CoordinatorConfig, profile: Arc<dyn ProfileSink>) -> Result<Self> {
        config.validate()?;
        let manager = LockManager::new(config.effective_lock_timeout(), config.num_key_maps)?;
        Ok(Self {
            inner: Arc::new(CoordinatorInner {
                txns: RwLock::new(HashMap::default()),
                manager,
                profile,
                total_completed: AtomicU64::new(0),
                total_deadlocks: AtomicU64::new(0),
                total_timeouts: AtomicU64::new(0),
            }),
        })
    }

    /// Returns a reporter for objects of id type `T` from the named
    /// source.
    pub fn register_access_source<T: ToObjectId>(&self, name: &str) -> AccessReporter<T> {
        AccessReporter::new(Arc::from(name), self.inner.clone())
    }

    /// Registers a transaction with the coordinator.
    ///
    /// `requested_start_time` is the time in milliseconds the task
    /// associated with the transaction was originally requested to start;
    /// it determines the transaction's age for deadlock victim selection.
    /// `try_count` is the task's retry ordinal, starting at 1.
    pub fn notify_new_transaction(
        &self,
        txn: &dyn Transaction,
        requested_start_time: u64,
        try_count: u32,
    ) -> Result<()> {
        if try_count < 1 {
            return Err(AccessError::InvalidArgument(
                "The try count must not be less than 1".to_string(),
            ));
        }
        let locker = Arc::new(Locker::new(
            txn.id().to_vec(),
            requested_start_time,
            txn.creation_time().saturating_add(txn.timeout()),
        ));
        {
            let mut txns = self.inner.txns.write();
            if txns.contains_key(txn.id()) {
                return Err(AccessError::InvalidState(
                    "Transaction already started".to_string(),
                ));
            }
            txns.insert(txn.id().to_vec(), locker);
        }
        debug!(
            "begin txn:{:?}, requested start time:{}",
            txn.id(),
            requested_start_time
        );
        txn.register_completion_listener(Box::new(EndTxnListener {
            inner: self.inner.clone(),
            txn_id: txn.id().to_vec(),
        }));
        Ok(())
    }

    /// The transaction that a completed transaction conflicted with.
    ///
    /// This coordinator keeps no post-completion history, so the answer
    /// is always `None`; the operation is part of the coordinator
    /// contract.
    pub fn get_conflicting_transaction(&self, _txn: &dyn Transaction) -> Option<TxnId> {
        None
    }

    /// Interrupts a transaction blocked in a lock wait. The waiter
    /// resolves its pending request as an `Interrupted` conflict, which
    /// aborts the transaction through the normal reporting path.
    pub fn interrupt(&self, txn: &dyn Transaction) -> Result<()> {
        self.inner.locker_for(txn)?.interrupt();
        Ok(())
    }

    // ========================================================================
    // Direct lock operations
    // ========================================================================

    /// Acquires a lock for `txn`, waiting if needed. See
    /// [`LockManager::lock`] for the outcome classification.
    pub fn lock(
        &self,
        txn: &dyn Transaction,
        source: &str,
        object_id: u64,
        for_write: bool,
        description: Option<&str>,
    ) -> Result<Option<LockConflict<Key>>> {
        let locker = self.inner.locker_for(txn)?;
        let key = Key::new(Arc::from(source), object_id);
        if let Some(description) = description {
            locker.set_description(key.clone(), description);
        }
        self.inner.manager.lock(&locker, key, for_write)
    }

    /// Acquires a lock for `txn` without waiting; a request that cannot
    /// be granted immediately is queued and `Blocked` returned.
    pub fn lock_no_wait(
        &self,
        txn: &dyn Transaction,
        source: &str,
        object_id: u64,
        for_write: bool,
        description: Option<&str>,
    ) -> Result<Option<LockConflict<Key>>> {
        let locker = self.inner.locker_for(txn)?;
        let key = Key::new(Arc::from(source), object_id);
        if let Some(description) = description {
            locker.set_description(key.clone(), description);
        }
        self.inner.manager.lock_no_wait(&locker, key, for_write)
    }

    /// Waits for a previously blocked attempt by `txn` to complete
    pub fn wait_for_lock(&self, txn: &dyn Transaction) -> Result<Option<LockConflict<Key>>> {
        let locker = self.inner.locker_for(txn)?;
        self.inner.manager.wait_for_lock(&locker)
    }

    // ========================================================================
    // Monitoring
    // ========================================================================

    /// Number of active transactions
    pub fn active_transaction_count(&self) -> usize {
        self.inner.txns.read().len()
    }

    /// Total completed transactions
    pub fn total_completed(&self) -> u64 {
        self.inner.total_completed.load(Ordering::Relaxed)
    }

    /// Completed transactions that were deadlock victims
    pub fn total_deadlocks(&self) -> u64 {
        self.inner.total_deadlocks.load(Ordering::Relaxed)
    }

    /// Completed transactions that timed out waiting for a lock
    pub fn total_timeouts(&self) -> u64 {
        self.inner.total_timeouts.load(Ordering::Relaxed)
    }
}

impl CoordinatorInner {
    /// The locker registered for a transaction
    pub(crate) fn locker_for(&self, txn: &dyn Transaction) -> Result<Arc<Locker<Key>>> {
        self.txns
            .read()
            .get(txn.id())
            .cloned()
            .ok_or_else(|| AccessError::InvalidArgument("Transaction not active".to_string()))
    }

    /// Releases the transaction's locks and publishes its access detail
    fn end_transaction(&self, txn_id: &[u8]) {
        let Some(locker) = self.txns.write().remove(txn_id) else {
            return;
        };
        debug!("end txn:{:?}", txn_id);
        self.manager.release_all(&locker);

        let conflict = locker.conflict();
        let kind = match conflict.as_ref().map(LockConflict::kind) {
            None => ConflictKind::None,
            Some(LockConflictKind::Deadlock) => ConflictKind::Deadlock,
            Some(_) => ConflictKind::AccessNotGranted,
        };
        self.total_completed.fetch_add(1, Ordering::Relaxed);
        match kind {
            ConflictKind::Deadlock => {
                self.total_deadlocks.fetch_add(1, Ordering::Relaxed);
            }
            ConflictKind::AccessNotGranted => {
                self.total_timeouts.fetch_add(1, Ordering::Relaxed);
            }
            ConflictKind::None => {}
        }

        let descriptions = locker.descriptions();
        let accessed_objects = locker
            .accesses()
            .into_iter()
            .map(|record| AccessedObject {
                source: record.key.source().to_string(),
                object_id: record.key.object_id(),
                access: if record.for_write {
                    AccessType::Write
                } else {
                    AccessType::Read
                },
                description: descriptions.get(&record.key).cloned(),
            })
            .collect();
        self.profile.set_accessed_objects_detail(AccessedObjectsDetail {
            accessed_objects,
            conflict: kind,
            conflicting_txn_id: conflict
                .as_ref()
                .and_then(|c| c.conflicting_txn_id().map(<[u8]>::to_vec)),
        });
    }
}

/// Completion listener that ends the transaction's locking.
///
/// A listener fires only after every transaction participant has
/// finished, which keeps locks held through the whole commit phase.
struct EndTxnListener {
    inner: Arc<CoordinatorInner>,
    txn_id: TxnId,
}

impl CompletionListener for EndTxnListener {
    fn after_completion(&self, _committed: bool) {
        self.inner.end_transaction(&self.txn_id);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::RecordingProfileSink;
    use crate::txn::testing::TestTransaction;
    use std::thread;
    use std::time::Duration;

    const SRC: &str = "src";

    fn coordinator() -> (AccessCoordinator, Arc<RecordingProfileSink>) {
        coordinator_with(CoordinatorConfig::new().with_txn_timeout(60_000))
    }

    fn coordinator_with(
        config: CoordinatorConfig,
    ) -> (AccessCoordinator, Arc<RecordingProfileSink>) {
        let sink = Arc::new(RecordingProfileSink::new());
        let coord = AccessCoordinator::new(config, sink.clone()).unwrap();
        (coord, sink)
    }

    fn begin(coord: &AccessCoordinator, id: u8, age: u64) -> Arc<TestTransaction> {
        let txn = Arc::new(TestTransaction::new(id));
        coord.notify_new_transaction(&*txn, age, 1).unwrap();
        txn
    }

    #[test]
    fn test_rejects_bad_config() {
        let sink = Arc::new(RecordingProfileSink::new());
        let config = CoordinatorConfig::new().with_num_key_maps(0);
        assert!(AccessCoordinator::new(config, sink).is_err());
    }

    #[test]
    fn test_try_count_must_be_positive() {
        let (coord, _) = coordinator();
        let txn = TestTransaction::new(1);
        let err = coord.notify_new_transaction(&txn, 10, 0).unwrap_err();
        assert!(matches!(err, AccessError::InvalidArgument(_)));
    }

    #[test]
    fn test_duplicate_transaction_rejected() {
        let (coord, _) = coordinator();
        let txn = begin(&coord, 1, 10);
        let err = coord.notify_new_transaction(&*txn, 10, 1).unwrap_err();
        assert!(matches!(err, AccessError::InvalidState(_)));
        assert_eq!(coord.active_transaction_count(), 1);
    }

    #[test]
    fn test_unknown_transaction_rejected() {
        let (coord, _) = coordinator();
        let reporter = coord.register_access_source::<u64>(SRC);
        let txn = TestTransaction::new(1);
        let err = reporter
            .report_object_access(&txn, &1, AccessType::Read, None)
            .unwrap_err();
        assert!(matches!(err, AccessError::InvalidArgument(_)));
    }

    #[test]
    fn test_get_conflicting_transaction_is_always_none() {
        let (coord, _) = coordinator();
        let txn = begin(&coord, 1, 10);
        assert!(coord.get_conflicting_transaction(&*txn).is_none());
    }

    #[test]
    fn test_read_sharing_publishes_clean_details() {
        let (coord, sink) = coordinator();
        let reporter = coord.register_access_source::<u64>(SRC);
        let t10 = begin(&coord, 1, 10);
        let t20 = begin(&coord, 2, 20);

        reporter
            .report_object_access(&*t10, &1, AccessType::Read, None)
            .unwrap();
        reporter
            .report_object_access(&*t20, &1, AccessType::Read, None)
            .unwrap();

        t10.finish(true);
        t20.finish(true);
        assert_eq!(coord.active_transaction_count(), 0);
        assert_eq!(coord.total_completed(), 2);

        let details = sink.take();
        assert_eq!(details.len(), 2);
        for detail in &details {
            assert_eq!(detail.conflict, ConflictKind::None);
            assert_eq!(detail.accessed_objects.len(), 1);
            assert_eq!(detail.accessed_objects[0].source, SRC);
            assert_eq!(detail.accessed_objects[0].object_id, 1);
            assert_eq!(detail.accessed_objects[0].access, AccessType::Read);
        }
    }

    #[test]
    fn test_write_blocks_until_holder_commits() {
        let (coord, sink) = coordinator();
        let reporter = coord.register_access_source::<u64>(SRC);
        let t10 = begin(&coord, 1, 10);
        let t20 = begin(&coord, 2, 20);

        reporter
            .report_object_access(&*t10, &1, AccessType::Write, None)
            .unwrap();

        let reporter2 = reporter.clone();
        let t20_thread = t20.clone();
        let blocked = thread::spawn(move || {
            reporter2.report_object_access(&*t20_thread, &1, AccessType::Read, None)
        });

        thread::sleep(Duration::from_millis(100));
        t10.finish(true);
        blocked.join().unwrap().unwrap();
        t20.finish(true);

        let details = sink.take();
        assert!(details.iter().all(|d| d.conflict == ConflictKind::None));
    }

    #[test]
    fn test_classic_deadlock_aborts_younger() {
        let (coord, sink) = coordinator();
        let reporter = coord.register_access_source::<u64>(SRC);
        let t10 = begin(&coord, 1, 10);
        let t20 = begin(&coord, 2, 20);

        reporter
            .report_object_access(&*t10, &1, AccessType::Write, None)
            .unwrap();
        reporter
            .report_object_access(&*t20, &2, AccessType::Write, None)
            .unwrap();

        let reporter2 = reporter.clone();
        let t10_thread = t10.clone();
        let blocked = thread::spawn(move || {
            reporter2.report_object_access(&*t10_thread, &2, AccessType::Write, None)
        });
        thread::sleep(Duration::from_millis(100));

        // closing the cycle: the younger transaction is the victim, its
        // abort releases its locks and unblocks the older one
        let err = reporter
            .report_object_access(&*t20, &1, AccessType::Write, None)
            .unwrap_err();
        assert!(matches!(err, AccessError::TransactionConflict(_)));
        assert_eq!(t20.abort_cause(), Some(err));

        blocked.join().unwrap().unwrap();
        t10.finish(true);

        assert_eq!(coord.total_deadlocks(), 1);
        let details = sink.take();
        let t20_detail = details
            .iter()
            .find(|d| d.conflicting_txn_id.is_some())
            .expect("victim detail");
        assert_eq!(t20_detail.conflict, ConflictKind::Deadlock);
        assert_eq!(t20_detail.conflicting_txn_id, Some(vec![1]));
        let t10_detail = details
            .iter()
            .find(|d| d.conflicting_txn_id.is_none())
            .expect("winner detail");
        assert_eq!(t10_detail.conflict, ConflictKind::None);
    }

    #[test]
    fn test_deadlock_tie_broken_by_txn_id() {
        let (coord, _) = coordinator();
        let reporter = coord.register_access_source::<u64>(SRC);
        // equal ages; ids 1 and 2
        let t_small = begin(&coord, 1, 10);
        let t_large = begin(&coord, 2, 10);

        reporter
            .report_object_access(&*t_small, &1, AccessType::Write, None)
            .unwrap();
        reporter
            .report_object_access(&*t_large, &2, AccessType::Write, None)
            .unwrap();

        let reporter2 = reporter.clone();
        let t_small_thread = t_small.clone();
        let blocked = thread::spawn(move || {
            reporter2.report_object_access(&*t_small_thread, &2, AccessType::Write, None)
        });
        thread::sleep(Duration::from_millis(100));

        let err = reporter
            .report_object_access(&*t_large, &1, AccessType::Write, None)
            .unwrap_err();
        assert!(matches!(err, AccessError::TransactionConflict(_)));

        blocked.join().unwrap().unwrap();
        t_small.finish(true);
    }

    #[test]
    fn test_upgrade_granted_before_waiting_writer() {
        let (coord, _) = coordinator();
        let reporter = coord.register_access_source::<u64>(SRC);
        let t10 = begin(&coord, 1, 10);
        let t20 = begin(&coord, 2, 20);
        let t30 = begin(&coord, 3, 30);

        reporter
            .report_object_access(&*t10, &1, AccessType::Read, None)
            .unwrap();
        reporter
            .report_object_access(&*t20, &1, AccessType::Read, None)
            .unwrap();

        // the writer queues first, then the upgrade; the upgrade still
        // goes ahead of it once the second reader releases
        let blocked = coord.lock_no_wait(&*t30, SRC, 1, true, None).unwrap().unwrap();
        assert_eq!(blocked.kind(), LockConflictKind::Blocked);
        let blocked = coord.lock_no_wait(&*t10, SRC, 1, true, None).unwrap().unwrap();
        assert_eq!(blocked.kind(), LockConflictKind::Blocked);

        t20.finish(true);
        assert!(coord.wait_for_lock(&*t10).unwrap().is_none());

        t10.finish(true);
        assert!(coord.wait_for_lock(&*t30).unwrap().is_none());
        t30.finish(true);
        assert_eq!(coord.active_transaction_count(), 0);
    }

    #[test]
    fn test_lock_timeout_reports_conflicting_transaction() {
        let (coord, sink) = coordinator_with(
            CoordinatorConfig::new()
                .with_txn_timeout(10_000)
                .with_lock_timeout(50),
        );
        let reporter = coord.register_access_source::<u64>(SRC);
        let t10 = begin(&coord, 1, 10);
        let t20 = begin(&coord, 2, 20);

        reporter
            .report_object_access(&*t10, &1, AccessType::Write, None)
            .unwrap();
        let err = reporter
            .report_object_access(&*t20, &1, AccessType::Write, None)
            .unwrap_err();
        assert!(matches!(err, AccessError::TransactionTimeout(_)));
        assert_eq!(t20.abort_cause(), Some(err));

        t10.finish(true);
        assert_eq!(coord.total_timeouts(), 1);

        let details = sink.take();
        let t20_detail = details
            .iter()
            .find(|d| d.conflict == ConflictKind::AccessNotGranted)
            .expect("timeout detail");
        assert_eq!(t20_detail.conflicting_txn_id, Some(vec![1]));
    }

    #[test]
    fn test_interrupt_aborts_waiting_transaction() {
        let (coord, _) = coordinator();
        let reporter = coord.register_access_source::<u64>(SRC);
        let t10 = begin(&coord, 1, 10);
        let t20 = begin(&coord, 2, 20);

        reporter
            .report_object_access(&*t10, &1, AccessType::Write, None)
            .unwrap();

        let reporter2 = reporter.clone();
        let t20_thread = t20.clone();
        let blocked = thread::spawn(move || {
            reporter2.report_object_access(&*t20_thread, &1, AccessType::Write, None)
        });
        thread::sleep(Duration::from_millis(100));

        coord.interrupt(&*t20).unwrap();
        let err = blocked.join().unwrap().unwrap_err();
        assert!(matches!(err, AccessError::TransactionInterrupted(_)));
        t10.finish(true);
    }

    #[test]
    fn test_completion_releases_everything() {
        let (coord, _) = coordinator();
        let reporter = coord.register_access_source::<u64>(SRC);
        let t10 = begin(&coord, 1, 10);
        reporter
            .report_object_access(&*t10, &1, AccessType::Write, None)
            .unwrap();
        reporter
            .report_object_access(&*t10, &2, AccessType::Read, None)
            .unwrap();
        // abandon a blocked request too
        let t20 = begin(&coord, 2, 20);
        reporter
            .report_object_access(&*t20, &3, AccessType::Write, None)
            .unwrap();
        let blocked = coord.lock_no_wait(&*t10, SRC, 3, true, None).unwrap().unwrap();
        assert_eq!(blocked.kind(), LockConflictKind::Blocked);

        t10.finish(false);
        assert_eq!(coord.active_transaction_count(), 1);

        // every key t10 touched is free again
        let t30 = begin(&coord, 3, 30);
        reporter
            .report_object_access(&*t30, &1, AccessType::Write, None)
            .unwrap();
        reporter
            .report_object_access(&*t30, &2, AccessType::Write, None)
            .unwrap();
        t20.finish(true);
        t30.finish(true);
        assert_eq!(coord.inner.manager.live_lock_count(), 0);
    }

    #[test]
    fn test_description_rides_into_detail() {
        let (coord, sink) = coordinator();
        let reporter = coord.register_access_source::<u64>(SRC);
        let t10 = begin(&coord, 1, 10);

        reporter.set_object_description(&*t10, &1, "player-42").unwrap();
        reporter
            .report_object_access(&*t10, &1, AccessType::Read, Some("ignored-second"))
            .unwrap();
        t10.finish(true);

        let details = sink.take();
        assert_eq!(
            details[0].accessed_objects[0].description.as_deref(),
            Some("player-42")
        );
    }

    #[test]
    fn test_upgrade_appears_as_two_accesses() {
        let (coord, sink) = coordinator();
        let reporter = coord.register_access_source::<u64>(SRC);
        let t10 = begin(&coord, 1, 10);

        reporter
            .report_object_access(&*t10, &1, AccessType::Read, None)
            .unwrap();
        reporter
            .report_object_access(&*t10, &1, AccessType::Write, None)
            .unwrap();
        t10.finish(true);

        let details = sink.take();
        let objects = &details[0].accessed_objects;
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].access, AccessType::Read);
        assert_eq!(objects[1].access, AccessType::Write);
    }

    #[test]
    fn test_sources_do_not_collide() {
        let (coord, _) = coordinator();
        let names = coord.register_access_source::<u64>("NameService");
        let data = coord.register_access_source::<u64>("DataService");
        let t10 = begin(&coord, 1, 10);
        let t20 = begin(&coord, 2, 20);

        // same object id, different sources: no conflict
        names
            .report_object_access(&*t10, &1, AccessType::Write, None)
            .unwrap();
        data.report_object_access(&*t20, &1, AccessType::Write, None)
            .unwrap();
        t10.finish(true);
        t20.finish(true);
    }
}
