//! Key - value identity for a lockable object
//!
//! Objects are named by a source (the service namespace that owns them)
//! plus an object id within that source, so unrelated services can never
//! collide on ids.

use std::fmt;
use std::sync::Arc;

/// Derives the fixed object id used for locking.
///
/// The value must be stable for a given `self` and unique within its
/// access source.
pub trait ToObjectId {
    fn to_object_id(&self) -> u64;
}

impl ToObjectId for u64 {
    fn to_object_id(&self) -> u64 {
        *self
    }
}

impl ToObjectId for u32 {
    fn to_object_id(&self) -> u64 {
        u64::from(*self)
    }
}

impl ToObjectId for usize {
    fn to_object_id(&self) -> u64 {
        *self as u64
    }
}

/// An object as identified by its source and object id. Two keys are
/// equal iff both fields are equal.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Key {
    source: Arc<str>,
    object_id: u64,
}

impl Key {
    pub(crate) fn new(source: Arc<str>, object_id: u64) -> Self {
        Self { source, object_id }
    }

    /// The source namespace
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The object id within the source
    pub fn object_id(&self) -> u64 {
        self.object_id
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.object_id)
    }
}
