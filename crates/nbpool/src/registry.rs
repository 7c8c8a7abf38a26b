//! Copy-on-write registry of pending waiters.
//!
//! The registry holds an immutable array behind an [`ArcSwap`]. Writers build a
//! new array and publish it with a compare-and-swap, retrying if another writer
//! got there first. Readers take a snapshot without locking, so the drain loop
//! never waits on a concurrent register or unregister.
//!
//! Entries are compared by identity ([`Arc::ptr_eq`]), never by value.

use std::sync::Arc;

use arc_swap::ArcSwap;

/// Immutable view of the registered entries at one instant.
pub(crate) type Snapshot<T> = Arc<Vec<Arc<T>>>;

pub(crate) struct Registry<T> {
    entries: ArcSwap<Vec<Arc<T>>>,
}

impl<T> Registry<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Append an entry.
    pub(crate) fn register(&self, entry: Arc<T>) {
        loop {
            let current = self.entries.load_full();
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(Arc::clone(&entry));
            let previous = self.entries.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&previous, &current) {
                return;
            }
        }
    }

    /// Remove an entry, keeping the order of the rest.
    ///
    /// Returns `false` if the entry was not registered.
    pub(crate) fn unregister(&self, entry: &Arc<T>) -> bool {
        loop {
            let current = self.entries.load_full();
            let Some(index) = current.iter().position(|e| Arc::ptr_eq(e, entry)) else {
                return false;
            };
            let next: Vec<Arc<T>> = current
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .map(|(_, e)| Arc::clone(e))
                .collect();
            let previous = self.entries.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&previous, &current) {
                return true;
            }
        }
    }

    pub(crate) fn snapshot(&self) -> Snapshot<T> {
        self.entries.load_full()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.load().len()
    }
}
