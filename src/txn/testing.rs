//! Test transaction - a minimal in-process transaction for crate tests

use parking_lot::Mutex;

use crate::lock::now_millis;
use crate::AccessError;

use super::{CompletionListener, Transaction};

/// Transaction stub driven directly by tests: `finish` fires the
/// registered completion listeners; `abort` records its cause and
/// completes the transaction the way a real coordinator would.
pub(crate) struct TestTransaction {
    id: Vec<u8>,
    creation_time: u64,
    timeout: u64,
    aborted: Mutex<Option<AccessError>>,
    listeners: Mutex<Vec<Box<dyn CompletionListener>>>,
}

impl TestTransaction {
    pub(crate) fn new(id: u8) -> Self {
        Self::with_timeout(id, 60_000)
    }

    pub(crate) fn with_timeout(id: u8, timeout: u64) -> Self {
        Self {
            id: vec![id],
            creation_time: now_millis(),
            timeout,
            aborted: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Completes the transaction, firing listeners exactly once
    pub(crate) fn finish(&self, committed: bool) {
        let listeners = std::mem::take(&mut *self.listeners.lock());
        for listener in listeners {
            listener.after_completion(committed);
        }
    }

    /// The abort cause recorded by the coordinator, if any
    pub(crate) fn abort_cause(&self) -> Option<AccessError> {
        self.aborted.lock().clone()
    }
}

impl Transaction for TestTransaction {
    fn id(&self) -> &[u8] {
        &self.id
    }

    fn creation_time(&self) -> u64 {
        self.creation_time
    }

    fn timeout(&self) -> u64 {
        self.timeout
    }

    fn abort(&self, cause: &AccessError) {
        let mut aborted = self.aborted.lock();
        if aborted.is_none() {
            *aborted = Some(cause.clone());
        }
        drop(aborted);
        self.finish(false);
    }

    fn register_completion_listener(&self, listener: Box<dyn CompletionListener>) {
        self.listeners.lock().push(listener);
    }
}
