use std::num::NonZeroUsize;

use lru::LruCache;

use super::VariantEntry;

/// Recency index over stored variants, bounded by entry count and total body bytes.
#[derive(Debug)]
pub(super) struct VariantIndex {
    lru: LruCache<String, VariantEntry>,
    bytes_in_use: u64,
    max_bytes: u64,
}

impl VariantIndex {
    pub(super) fn new(capacity: NonZeroUsize, max_bytes: u64) -> Self {
        Self {
            lru: LruCache::new(capacity),
            bytes_in_use: 0,
            max_bytes,
        }
    }

    pub(super) fn reset(&mut self) {
        self.bytes_in_use = 0;
        self.lru.clear();
    }

    pub(super) fn get(&mut self, key: &str) -> Option<VariantEntry> {
        self.lru.get(key).cloned()
    }

    pub(super) fn remove_if_id_matches(&mut self, key: &str, id: u64) -> Option<VariantEntry> {
        let matches = self.lru.peek(key).is_some_and(|entry| entry.id == id);
        if matches {
            return self.remove_by_key(key);
        }
        None
    }

    pub(super) fn remove_by_key(&mut self, key: &str) -> Option<VariantEntry> {
        let removed = self.lru.pop(key)?;
        self.bytes_in_use = self.bytes_in_use.saturating_sub(removed.content_length);
        Some(removed)
    }

    /// Inserts `entry`, returning everything pushed out to stay within bounds, including a
    /// previous entry stored under the same key.
    pub(super) fn insert(&mut self, key: String, entry: VariantEntry) -> Vec<VariantEntry> {
        let mut evicted = Vec::new();

        self.bytes_in_use = self.bytes_in_use.saturating_add(entry.content_length);

        if let Some((_key, removed)) = self.lru.push(key, entry) {
            self.bytes_in_use = self.bytes_in_use.saturating_sub(removed.content_length);
            evicted.push(removed);
        }

        while self.bytes_in_use > self.max_bytes {
            let Some((_key, removed)) = self.lru.pop_lru() else {
                break;
            };
            self.bytes_in_use = self.bytes_in_use.saturating_sub(removed.content_length);
            evicted.push(removed);
        }

        evicted
    }

    #[cfg(test)]
    pub(super) fn bytes_in_use(&self) -> u64 {
        self.bytes_in_use
    }

    #[cfg(test)]
    pub(super) fn len(&self) -> usize {
        self.lru.len()
    }
}
