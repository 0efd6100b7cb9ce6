//! In-flight request registry
//!
//! Concurrent identical requests share one execution. [`InFlightRegistry::reserve`]
//! checks for an existing entry and inserts a placeholder under one lock, so
//! two racing callers can never both become the leader. The leader's
//! [`InFlightGuard`] removes the entry on every exit path: resolution, error,
//! or drop on cancellation.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::outcome::{OutcomeCell, OutcomeHandle};

struct Slot<T, E> {
    id: u64,
    handle: OutcomeHandle<T, E>,
}

struct Entries<K, T, E> {
    slots: HashMap<K, Slot<T, E>>,
    next_id: u64,
}

/// Result of [`InFlightRegistry::reserve`]
pub enum Reservation<K, T, E>
where
    K: Eq + Hash + Clone,
{
    /// Caller must execute the request and resolve the guard
    Leader(InFlightGuard<K, T, E>),
    /// Another caller is executing; await its outcome
    Follower(OutcomeHandle<T, E>),
}

/// Registry of executing requests keyed by canonical fingerprint
pub struct InFlightRegistry<K, T, E> {
    entries: Arc<Mutex<Entries<K, T, E>>>,
}

impl<K, T, E> Default for InFlightRegistry<K, T, E> {
    fn default() -> Self {
        Self { entries: Arc::new(Mutex::new(Entries { slots: HashMap::new(), next_id: 0 })) }
    }
}

impl<K, T, E> InFlightRegistry<K, T, E>
where
    K: Eq + Hash + Clone,
    T: Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Join an existing execution or become its leader
    pub fn reserve(&self, key: K) -> Reservation<K, T, E> {
        let mut entries = self.entries.lock();
        if let Some(slot) = entries.slots.get(&key) {
            return Reservation::Follower(slot.handle.clone());
        }

        let id = entries.next_id;
        entries.next_id += 1;
        let (cell, handle) = OutcomeCell::new();
        entries.slots.insert(key.clone(), Slot { id, handle });

        Reservation::Leader(InFlightGuard {
            entries: Arc::clone(&self.entries),
            key,
            id,
            cell: Some(cell),
        })
    }

    /// Forget the entry for `key`, if any
    ///
    /// Waiters already holding a handle still receive the leader's outcome.
    pub fn release(&self, key: &K) -> bool {
        self.entries.lock().slots.remove(key).is_some()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.lock().slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Leader's claim on a registry entry
///
/// Resolving publishes the outcome to every follower and removes the entry.
/// Dropping without resolving removes the entry and signals abandonment.
pub struct InFlightGuard<K, T, E>
where
    K: Eq + Hash + Clone,
{
    entries: Arc<Mutex<Entries<K, T, E>>>,
    key: K,
    id: u64,
    cell: Option<OutcomeCell<T, E>>,
}

impl<K, T, E> InFlightGuard<K, T, E>
where
    K: Eq + Hash + Clone,
    T: Clone,
    E: Clone,
{
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Publish `outcome` and release the entry
    pub fn resolve(mut self, outcome: Result<T, E>) {
        self.remove_entry();
        if let Some(cell) = self.cell.take() {
            cell.resolve(outcome);
        }
    }
}

impl<K, T, E> InFlightGuard<K, T, E>
where
    K: Eq + Hash + Clone,
{
    fn remove_entry(&self) {
        let mut entries = self.entries.lock();
        // A forced release may have let a newer leader take the key
        if entries.slots.get(&self.key).is_some_and(|slot| slot.id == self.id) {
            entries.slots.remove(&self.key);
        }
    }
}

impl<K, T, E> Drop for InFlightGuard<K, T, E>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        if self.cell.is_some() {
            trace!("in-flight leader dropped without resolving");
            self.remove_entry();
        }
    }
}
