//! Profiling - access details published after each transaction
//!
//! When a transaction completes, the coordinator publishes a record of
//! every object access the transaction made plus a summary of how its
//! lock attempts ended. The sink is a plain trait so the profiling system
//! stays a consumer, not a dependency.

use parking_lot::Mutex;
use serde::Serialize;

// ============================================================================
// Access types
// ============================================================================

/// The two kinds of object access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AccessType {
    Read,
    Write,
}

/// One object access made by a transaction
#[derive(Debug, Clone, Eq, Serialize)]
pub struct AccessedObject {
    /// Name of the source the object belongs to
    pub source: String,
    /// The object's id within its source
    pub object_id: u64,
    /// How the object was accessed
    pub access: AccessType,
    /// Debug description supplied by the service, if any
    pub description: Option<String>,
}

/// Two accesses are the same access if they name the same object the
/// same way; descriptions are advisory and do not participate.
impl PartialEq for AccessedObject {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
            && self.object_id == other.object_id
            && self.access == other.access
    }
}

// ============================================================================
// Per-transaction detail
// ============================================================================

/// Summary of how a transaction's lock attempts ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConflictKind {
    /// Every request was granted
    None,
    /// The transaction was chosen as a deadlock victim
    Deadlock,
    /// Some request was not granted (timeout, denial, or interruption)
    AccessNotGranted,
}

/// Everything a transaction accessed, published once on completion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessedObjectsDetail {
    /// All accesses in request order; a read and its upgrade are two
    /// entries
    pub accessed_objects: Vec<AccessedObject>,
    /// How the transaction's lock attempts ended
    pub conflict: ConflictKind,
    /// Transaction id of the conflicting locker, when one was identified
    pub conflicting_txn_id: Option<Vec<u8>>,
}

// ============================================================================
// Sinks
// ============================================================================

/// Consumer of per-transaction access details
pub trait ProfileSink: Send + Sync {
    fn set_accessed_objects_detail(&self, detail: AccessedObjectsDetail);
}

/// Sink that discards every detail
#[derive(Debug, Default)]
pub struct NullProfileSink;

impl ProfileSink for NullProfileSink {
    fn set_accessed_objects_detail(&self, _detail: AccessedObjectsDetail) {}
}

/// Sink that keeps every published detail, for tests and diagnostics
#[derive(Debug, Default)]
pub struct RecordingProfileSink {
    details: Mutex<Vec<AccessedObjectsDetail>>,
}

impl RecordingProfileSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All details published so far
    pub fn details(&self) -> Vec<AccessedObjectsDetail> {
        self.details.lock().clone()
    }

    /// Removes and returns all published details
    pub fn take(&self) -> Vec<AccessedObjectsDetail> {
        std::mem::take(&mut self.details.lock())
    }
}

impl ProfileSink for RecordingProfileSink {
    fn set_accessed_objects_detail(&self, detail: AccessedObjectsDetail) {
        self.details.lock().push(detail);
    }
}
