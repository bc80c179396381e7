//! Frame consumers and their registration sets

use crate::error::SinkError;
use crate::media::{Frame, MediaKind};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A consumer of decoded frames of one stream type
///
/// `on_frame` is called on the decode thread. Returning
/// [`SinkError::Full`] asks the reader to retry the same frame shortly;
/// any other error drops the frame for this sink only.
pub trait FrameSink: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    fn on_frame(&self, frame: &Frame) -> Result<(), SinkError>;
}

/// Identifier handed out when a sink is registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(u64);

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sink-{}", self.0)
    }
}

/// Delivery counters for one registered sink
#[derive(Debug, Default)]
pub struct SinkCounters {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl SinkCounters {
    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A registered sink
#[derive(Clone)]
pub struct SinkEntry {
    pub id: SinkId,
    pub sink: Arc<dyn FrameSink>,
    pub counters: Arc<SinkCounters>,
}

/// Delivery statistics of one sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkStats {
    pub id: SinkId,
    pub name: String,
    pub kind: MediaKind,
    pub delivered: u64,
    pub dropped: u64,
}

/// Ordered set of sinks for one stream type
///
/// Entries are kept in registration order behind an `Arc`. Mutation
/// replaces the whole list, so a fan-out pass holding a snapshot keeps
/// iterating the list it started with.
#[derive(Clone, Default)]
pub struct SinkSet {
    entries: Arc<Vec<SinkEntry>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: SinkId, sink: Arc<dyn FrameSink>) {
        let mut entries = self.entries.as_ref().clone();
        entries.push(SinkEntry {
            id,
            sink,
            counters: Arc::new(SinkCounters::default()),
        });
        self.entries = Arc::new(entries);
    }

    /// Remove a sink by id, returning whether it was registered
    pub fn remove(&mut self, id: SinkId) -> bool {
        if !self.entries.iter().any(|e| e.id == id) {
            return false;
        }
        let entries = self
            .entries
            .iter()
            .filter(|e| e.id != id)
            .cloned()
            .collect();
        self.entries = Arc::new(entries);
        true
    }

    /// Current entries, unaffected by later mutation
    pub fn snapshot(&self) -> Arc<Vec<SinkEntry>> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self, kind: MediaKind) -> Vec<SinkStats> {
        self.entries
            .iter()
            .map(|e| SinkStats {
                id: e.id,
                name: e.sink.name().to_string(),
                kind,
                delivered: e.counters.delivered(),
                dropped: e.counters.dropped(),
            })
            .collect()
    }
}

/// Hands out sink ids in registration order
#[derive(Debug, Default)]
pub struct SinkIdAllocator {
    next: u64,
}

impl SinkIdAllocator {
    pub fn next_id(&mut self) -> SinkId {
        self.next += 1;
        SinkId(self.next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl FrameSink for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn on_frame(&self, _frame: &Frame) -> Result<(), SinkError> {
            Ok(())
        }
    }

    fn names(set: &SinkSet) -> Vec<String> {
        set.snapshot().iter().map(|e| e.sink.name().to_string()).collect()
    }

    #[test]
    fn test_registration_order() {
        let mut ids = SinkIdAllocator::default();
        let mut set = SinkSet::new();
        set.insert(ids.next_id(), Arc::new(Named("a")));
        set.insert(ids.next_id(), Arc::new(Named("b")));
        set.insert(ids.next_id(), Arc::new(Named("c")));
        assert_eq!(names(&set), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_remove_by_id() {
        let mut ids = SinkIdAllocator::default();
        let mut set = SinkSet::new();
        let a = ids.next_id();
        let b = ids.next_id();
        set.insert(a, Arc::new(Named("a")));
        set.insert(b, Arc::new(Named("b")));

        assert!(set.remove(a));
        assert!(!set.remove(a));
        assert_eq!(names(&set), vec!["b"]);
    }

    #[test]
    fn test_snapshot_survives_mutation() {
        let mut ids = SinkIdAllocator::default();
        let mut set = SinkSet::new();
        let a = ids.next_id();
        set.insert(a, Arc::new(Named("a")));

        let snapshot = set.snapshot();
        set.remove(a);
        set.insert(ids.next_id(), Arc::new(Named("b")));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].sink.name(), "a");
        assert_eq!(names(&set), vec!["b"]);
    }

    #[test]
    fn test_ids_unique() {
        let mut ids = SinkIdAllocator::default();
        let first = ids.next_id();
        let second = ids.next_id();
        assert_ne!(first, second);
        assert!(first < second);
        assert_eq!(first.to_string(), "sink-1");
    }
}
