use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;

/// A response body held by the edge cache together with the TTL it was served with.
#[derive(Debug, Clone)]
pub struct EdgeEntry {
    pub body: Bytes,
    pub content_type: String,
    pub ttl: u64,
    pub last_modified: Option<std::time::SystemTime>,
    stored_at: Instant,
}

impl EdgeEntry {
    pub fn new(body: Bytes, content_type: String, ttl: u64) -> Self {
        Self {
            body,
            content_type,
            ttl,
            last_modified: None,
            stored_at: Instant::now(),
        }
    }

    pub fn with_last_modified(mut self, last_modified: Option<std::time::SystemTime>) -> Self {
        self.last_modified = last_modified;
        self
    }

    /// Seconds the entry has been held, reported as `Age`.
    pub fn age(&self) -> u64 {
        self.stored_at.elapsed().as_secs()
    }

    fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) < Duration::from_secs(self.ttl)
    }
}

/// In-memory response cache in front of the variant store, bounded by entry count.
/// Entries expire after their TTL and are dropped lazily on lookup.
pub struct EdgeCache {
    entries: Option<Mutex<LruCache<String, EdgeEntry>>>,
}

impl EdgeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    pub fn disabled() -> Self {
        Self { entries: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    pub fn get(&self, key: &str) -> Option<EdgeEntry> {
        let entries = self.entries.as_ref()?;
        let mut guard = entries.lock();
        let entry = guard.get(key)?;
        if entry.is_fresh(Instant::now()) {
            return Some(entry.clone());
        }
        guard.pop(key);
        None
    }

    /// Entries with a zero TTL are never held.
    pub fn insert(&self, key: String, entry: EdgeEntry) {
        let Some(entries) = self.entries.as_ref() else {
            return;
        };
        if entry.ttl == 0 {
            return;
        }
        entries.lock().put(key, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |entries| entries.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
