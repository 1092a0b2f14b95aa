//! Access Reporter - typed per-source view used by services
//!
//! Services report intended reads and writes of their objects through a
//! reporter bound to their source name. A report that cannot be granted
//! aborts the transaction with a typed error and returns that error to
//! the caller.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::lock::LockConflictKind;
use crate::profile::AccessType;
use crate::txn::Transaction;
use crate::{AccessError, Result};

use super::key::{Key, ToObjectId};
use super::CoordinatorInner;

/// Reporter for objects of id type `T` from one named source.
///
/// Not thread safe with respect to a single transaction; safe across
/// transactions.
pub struct AccessReporter<T: ToObjectId> {
    source: Arc<str>,
    inner: Arc<CoordinatorInner>,
    _id_type: PhantomData<fn(&T)>,
}

impl<T: ToObjectId> Clone for AccessReporter<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            inner: self.inner.clone(),
            _id_type: PhantomData,
        }
    }
}

impl<T: ToObjectId> AccessReporter<T> {
    pub(crate) fn new(source: Arc<str>, inner: Arc<CoordinatorInner>) -> Self {
        Self {
            source,
            inner,
            _id_type: PhantomData,
        }
    }

    /// The source name this reporter is bound to
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Reports an intended access, acquiring the matching lock and
    /// waiting if needed.
    ///
    /// On any conflict the transaction is aborted through its abort hook
    /// with the mapped error, and that error is returned:
    /// timeout → `TransactionTimeout`, denial or deadlock →
    /// `TransactionConflict`, interruption → `TransactionInterrupted`.
    pub fn report_object_access(
        &self,
        txn: &dyn Transaction,
        object_id: &T,
        access: AccessType,
        description: Option<&str>,
    ) -> Result<()> {
        let locker = self.inner.locker_for(txn)?;
        let key = Key::new(self.source.clone(), object_id.to_object_id());
        if let Some(description) = description {
            locker.set_description(key.clone(), description);
        }
        let conflict = self
            .inner
            .manager
            .lock(&locker, key.clone(), access == AccessType::Write)?;
        let Some(conflict) = conflict else {
            return Ok(());
        };

        let mut message = format!(
            "Access txn:{:?}, type:{:?}, source:{}, object id:{}",
            txn.id(),
            access,
            self.source,
            key.object_id(),
        );
        if let Some(description) = locker.description(&key) {
            message.push_str(&format!(", description:{}", description));
        }
        message.push_str(" failed: ");
        let reason = match conflict.kind() {
            LockConflictKind::Timeout => "Transaction timed out",
            LockConflictKind::Denied => "Access denied",
            LockConflictKind::Interrupted => "Transaction interrupted",
            LockConflictKind::Deadlock => "Transaction deadlock",
            LockConflictKind::Blocked => unreachable!("blocking lock cannot end blocked"),
        };
        message.push_str(reason);
        if let Some(id) = conflict.conflicting_txn_id() {
            message.push_str(&format!(", with conflicting transaction {:?}", id));
        }

        let error = match conflict.kind() {
            LockConflictKind::Timeout => AccessError::TransactionTimeout(message),
            LockConflictKind::Interrupted => AccessError::TransactionInterrupted(message),
            _ => AccessError::TransactionConflict(message),
        };
        txn.abort(&error);
        Err(error)
    }

    /// Records a debug description for an object without acquiring any
    /// lock. The first description recorded for an object wins.
    pub fn set_object_description(
        &self,
        txn: &dyn Transaction,
        object_id: &T,
        description: &str,
    ) -> Result<()> {
        let locker = self.inner.locker_for(txn)?;
        locker.set_description(
            Key::new(self.source.clone(), object_id.to_object_id()),
            description,
        );
        Ok(())
    }
}
