//! Deadlock detection - waits-for cycle search from a newly blocked locker
//!
//! Runs whenever a locker becomes a waiter. The search follows waits-for
//! edges: locker L waits for L' when L's pending request names a key on
//! which L' holds an incompatible grant. If any chain leads back to the
//! starting locker there is a cycle, and the youngest member (largest
//! age, ties broken by the lexicographically greater transaction id) is
//! aborted. Blocking alone never aborts anything; only actual cycles do.
//!
//! Each locker has at most one pending request, so the graph branches
//! only through granted sets. The search visits each locker once and
//! holds at most one shard mutex at a time, reading locker state between
//! shard hops.

use std::collections::HashSet;
use std::sync::Arc;

use log::debug;

use super::locker::{LockConflict, LockConflictKind, Locker};
use super::manager::LockManager;
use super::LockKey;

/// Checks for waits-for cycles through `origin`, which must have just
/// become a waiter. Victims other than `origin` are aborted in place and
/// woken; if `origin` itself is chosen, its conflict is returned for the
/// caller to record and deliver.
pub(crate) fn check<K: LockKey>(
    manager: &LockManager<K>,
    origin: &Arc<Locker<K>>,
) -> Option<LockConflict<K>> {
    loop {
        let cycle = find_cycle(manager, origin)?;
        let mut victim_pos = 0;
        for (pos, candidate) in cycle.iter().enumerate().skip(1) {
            if candidate.is_younger_than(&cycle[victim_pos]) {
                victim_pos = pos;
            }
        }
        let victim = cycle[victim_pos].clone();
        let conflicting = cycle[(victim_pos + 1) % cycle.len()].clone();
        debug!(
            "deadlock: cycle of {} lockers, victim {:?}",
            cycle.len(),
            victim
        );
        let conflict = LockConflict::new(LockConflictKind::Deadlock, Some(conflicting));
        if Arc::ptr_eq(&victim, origin) {
            return Some(conflict);
        }
        // the victim may have been granted since the cycle was observed;
        // either way, re-examine: more cycles can run through the origin
        manager.abort_victim(&victim, conflict);
    }
}

/// Depth-first search for a waits-for path leading back to `origin`.
/// Returns the lockers on the cycle in waits-for order, starting at
/// `origin`, or `None` when no cycle exists.
fn find_cycle<K: LockKey>(
    manager: &LockManager<K>,
    origin: &Arc<Locker<K>>,
) -> Option<Vec<Arc<Locker<K>>>> {
    let mut visited = HashSet::new();
    visited.insert(Arc::as_ptr(origin) as usize);
    let mut path = vec![origin.clone()];
    walk(manager, origin, origin, &mut visited, &mut path)
}

fn walk<K: LockKey>(
    manager: &LockManager<K>,
    origin: &Arc<Locker<K>>,
    current: &Arc<Locker<K>>,
    visited: &mut HashSet<usize>,
    path: &mut Vec<Arc<Locker<K>>>,
) -> Option<Vec<Arc<Locker<K>>>> {
    let request = current.pending_request()?;
    let owners = manager.blocking_owners(request.key(), current, request.for_write());
    for owner in owners {
        if Arc::ptr_eq(&owner, origin) {
            return Some(path.clone());
        }
        if visited.insert(Arc::as_ptr(&owner) as usize) {
            path.push(owner.clone());
            if let Some(cycle) = walk(manager, origin, &owner, visited, path) {
                return Some(cycle);
            }
            path.pop();
        }
    }
    None
}

// ============================================================================
// Tests
// ============================================================================
