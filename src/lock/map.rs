//! Key Map - hash-partitioned lock-state table
//!
//! The key → lock-state map is split into N shards, each behind its own
//! mutex, so unrelated keys contend only on their shard. A key always
//! hashes to the same shard (one fixed hasher owned by the map). Entries
//! exist only while some locker holds or waits on the key; shards drop
//! empty entries on the way out of every access.

use std::collections::HashMap;
use std::hash::BuildHasher;

use parking_lot::Mutex;

use super::state::LockState;
use super::LockKey;

struct Shard<K: LockKey> {
    locks: Mutex<HashMap<K, LockState<K>, ahash::RandomState>>,
}

pub(crate) struct KeyMap<K: LockKey> {
    shards: Box<[Shard<K>]>,
    hasher: ahash::RandomState,
}

impl<K: LockKey> KeyMap<K> {
    pub(crate) fn new(num_shards: usize) -> Self {
        let shards = (0..num_shards)
            .map(|_| Shard {
                locks: Mutex::new(HashMap::default()),
            })
            .collect();
        Self {
            shards,
            hasher: ahash::RandomState::new(),
        }
    }

    fn shard_index(&self, key: &K) -> usize {
        (self.hasher.hash_one(key) as usize) % self.shards.len()
    }

    /// Runs `f` on the key's lock state under the shard mutex, creating
    /// the entry if absent and dropping it again if `f` leaves it unused.
    pub(crate) fn with_state<R>(&self, key: &K, f: impl FnOnce(&mut LockState<K>) -> R) -> R {
        let shard = &self.shards[self.shard_index(key)];
        let mut locks = shard.locks.lock();
        let state = locks.entry(key.clone()).or_default();
        let result = f(state);
        if state.is_unused() {
            locks.remove(key);
        }
        result
    }

    /// Like `with_state` but never creates an entry; returns `None` when
    /// nothing holds or waits on the key.
    pub(crate) fn with_existing<R>(
        &self,
        key: &K,
        f: impl FnOnce(&mut LockState<K>) -> R,
    ) -> Option<R> {
        let shard = &self.shards[self.shard_index(key)];
        let mut locks = shard.locks.lock();
        let state = locks.get_mut(key)?;
        let result = f(state);
        if state.is_unused() {
            locks.remove(key);
        }
        Some(result)
    }

    /// Total number of live lock entries across all shards
    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|s| s.locks.lock().len()).sum()
    }
}
