//! Storage notification fan-out (spec.md §4.11): a sorted-by-handle set
//! of listeners with idempotent registration and a round-robin cursor
//! that survives the removal of whichever listener it currently points
//! at.

use std::collections::BTreeMap;
use std::ops::Bound::Excluded;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerEvent {
    DataReady,
    Deletion,
    Flush,
    Finish,
}

pub trait Listener: Send + Sync {
    fn notify(&self, event: ListenerEvent, data: &[u8]);
}

fn handle_of(listener: &Arc<dyn Listener>) -> usize {
    Arc::as_ptr(listener) as *const () as usize
}

/// A keyed, order-stable collection of listeners plus a round-robin
/// cursor over them.
///
/// # Why a pointer-derived key
/// `Arc<dyn Listener>` has no `Ord` of its own (trait objects aren't
/// comparable), but listener identity is really "which allocation", so
/// `Arc::as_ptr` gives a stable `usize` key for as long as that `Arc` is
/// kept alive somewhere — here, in the map itself. This is the same
/// idea `spark-router`'s context store uses a stable `TypeId` key for:
/// pick a key that does not depend on the value's contents, so identity
/// survives everything except the value's own removal.
///
/// # Why `BTreeMap` over a `Vec`
/// `next()` needs "the smallest key greater than the cursor, wrapping
/// to the smallest key overall", which `BTreeMap::range` answers
/// directly; a `Vec` would need its own sorted-insert or linear scan to
/// get the same ordering guarantee.
#[derive(Default)]
pub struct ListenerSet {
    listeners: BTreeMap<usize, Arc<dyn Listener>>,
    cursor: Option<usize>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Registering the same `Arc` twice is a no-op; `Arc::as_ptr` is
    /// stable for the lifetime of that allocation.
    pub fn add(&mut self, listener: Arc<dyn Listener>) {
        self.listeners.entry(handle_of(&listener)).or_insert(listener);
    }

    pub fn remove(&mut self, listener: &Arc<dyn Listener>) -> bool {
        let handle = handle_of(listener);
        let removed = self.listeners.remove(&handle).is_some();
        if self.cursor == Some(handle) {
            self.cursor = None;
        }
        removed
    }

    /// Round-robins over the registered listeners. If the cursor's
    /// listener was removed since the last call, re-seeds from the
    /// smallest remaining handle instead of erroring.
    pub fn next(&mut self) -> Option<Arc<dyn Listener>> {
        if self.listeners.is_empty() {
            self.cursor = None;
            return None;
        }
        let next_entry = match self.cursor {
            Some(handle) => self
                .listeners
                .range((Excluded(handle), std::ops::Bound::Unbounded))
                .next()
                .or_else(|| self.listeners.iter().next()),
            None => self.listeners.iter().next(),
        };
        next_entry.map(|(handle, listener)| {
            self.cursor = Some(*handle);
            listener.clone()
        })
    }

    pub fn trigger(&self, event: ListenerEvent, data: &[u8]) {
        tracing::trace!(target: "roc_support::listener", ?event, count = self.listeners.len(), "broadcasting to listeners");
        for listener in self.listeners.values() {
            listener.notify(event, data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<(ListenerEvent, Vec<u8>)>>);
    impl Listener for Recorder {
        fn notify(&self, event: ListenerEvent, data: &[u8]) {
            self.0.lock().unwrap().push((event, data.to_vec()));
        }
    }

    #[test]
    fn add_is_idempotent() {
        let mut set = ListenerSet::new();
        let listener: Arc<dyn Listener> = Arc::new(Recorder(Mutex::new(Vec::new())));
        set.add(listener.clone());
        set.add(listener.clone());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn trigger_broadcasts_to_every_listener() {
        let mut set = ListenerSet::new();
        let a = Arc::new(Recorder(Mutex::new(Vec::new())));
        let b = Arc::new(Recorder(Mutex::new(Vec::new())));
        set.add(a.clone() as Arc<dyn Listener>);
        set.add(b.clone() as Arc<dyn Listener>);
        set.trigger(ListenerEvent::Flush, b"x");

        assert_eq!(a.0.lock().unwrap().len(), 1);
        assert_eq!(b.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn next_round_robins_and_survives_cursor_removal() {
        let mut set = ListenerSet::new();
        let a: Arc<dyn Listener> = Arc::new(Recorder(Mutex::new(Vec::new())));
        let b: Arc<dyn Listener> = Arc::new(Recorder(Mutex::new(Vec::new())));
        set.add(a.clone());
        set.add(b.clone());

        let first = set.next().unwrap();
        set.remove(&first);
        // Cursor pointed at a now-removed listener; next() must still
        // produce the remaining one rather than panicking or stalling.
        let second = set.next().unwrap();
        assert!(Arc::ptr_eq(&second, &a) || Arc::ptr_eq(&second, &b));
    }

    #[test]
    fn next_on_empty_set_returns_none() {
        let mut set = ListenerSet::new();
        assert!(set.next().is_none());
    }
}
