//! Variant cache store: durable storage of computed variants keyed by canonical key.
//!
//! Lookups return a tagged [`Lookup`] so callers can tell an ordinary miss apart from a store
//! that is failing. Entries older than the retention window read as misses and are removed
//! lazily on lookup or by the background sweeper.

mod entry;
mod index;
mod maintenance;
mod store;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::{fs as async_fs, task};
use tracing::{trace, warn};

use crate::key::CanonicalKey;

use entry::{PersistedEntry, VariantEntry, entry_id_for_key};
use index::VariantIndex;
use maintenance::{prepare_versioned_store_dir, spawn_store_dir_cleanup, spawn_store_sweeper};
use store::DiskLayout;

/// A computed variant as persisted and served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub body: Bytes,
    pub content_type: String,
    /// `Cache-Control` value attached by the transform service, if any.
    pub cache_control: Option<String>,
    pub created_at: SystemTime,
}

impl Variant {
    pub fn new(body: Bytes, content_type: impl Into<String>) -> Self {
        Self {
            body,
            content_type: content_type.into(),
            cache_control: None,
            created_at: SystemTime::now(),
        }
    }

    pub fn with_cache_control(mut self, cache_control: Option<String>) -> Self {
        self.cache_control = cache_control;
        self
    }
}

#[derive(Debug, Clone, Error)]
#[error("variant store unavailable: {0}")]
pub struct StoreUnavailable(pub String);

#[derive(Debug, Clone, Error)]
#[error("variant cache write failed: {0}")]
pub struct CacheWriteFailed(pub String);

#[derive(Debug)]
pub enum Lookup {
    Hit(Variant),
    Miss,
    Unavailable(StoreUnavailable),
}

#[async_trait]
pub trait VariantStore: Send + Sync {
    async fn get(&self, key: &CanonicalKey) -> Lookup;

    async fn put(&self, key: &CanonicalKey, variant: Variant) -> Result<(), CacheWriteFailed>;
}

#[derive(Debug, Clone)]
pub struct DiskStoreOptions {
    pub retention: Duration,
    pub max_entries: usize,
    pub max_entry_size: u64,
    pub max_bytes: u64,
    pub sweeper_interval: Duration,
    pub sweeper_batch_size: usize,
}

/// Sharded on-disk variant store with an in-memory LRU index.
#[derive(Clone)]
pub struct DiskVariantStore {
    state: Arc<StoreState>,
}

#[derive(Debug)]
struct StoreState {
    index: Mutex<VariantIndex>,
    layout: DiskLayout,
    retention: Duration,
    max_entry_size: u64,
    max_bytes: u64,
    next_id: AtomicU64,
}

#[derive(Debug, Default)]
struct SweepStats {
    inspected: usize,
    removed: u64,
    bytes_reclaimed: u64,
}

impl DiskVariantStore {
    pub async fn new(root: PathBuf, options: DiskStoreOptions) -> Result<Self> {
        let (disk_dir, cleanup_dirs) = prepare_versioned_store_dir(&root).await?;

        let capacity = std::num::NonZeroUsize::new(options.max_entries)
            .ok_or_else(|| anyhow!("variant store capacity must be greater than zero"))?;
        let state = Arc::new(StoreState {
            index: Mutex::new(VariantIndex::new(capacity, options.max_bytes)),
            layout: DiskLayout::new(disk_dir),
            retention: options.retention,
            max_entry_size: options.max_entry_size,
            max_bytes: options.max_bytes,
            next_id: AtomicU64::new(1),
        });
        spawn_store_dir_cleanup(cleanup_dirs);
        let rebuild = {
            let state = state.clone();
            task::spawn_blocking(move || state.rebuild_from_disk())
        };
        rebuild
            .await
            .map_err(|err| anyhow!("variant index rebuild task failed: {err}"))??;

        spawn_store_sweeper(
            state.clone(),
            options.sweeper_interval,
            options.sweeper_batch_size,
        );
        Ok(Self { state })
    }

    #[cfg(test)]
    fn body_path_for(&self, key: &CanonicalKey) -> PathBuf {
        self.state.layout.body_path(&entry_id_for_key(key.as_str()))
    }
}

#[async_trait]
impl VariantStore for DiskVariantStore {
    async fn get(&self, key: &CanonicalKey) -> Lookup {
        let entry = {
            let mut guard = self.state.index.lock();
            guard.get(key.as_str())
        };
        let Some(entry) = entry else {
            crate::metrics::record_variant_lookup("miss");
            return Lookup::Miss;
        };

        if self.state.is_expired(&entry, SystemTime::now()) {
            trace!(key = %key, "variant expired");
            self.state.evict_entry(key.as_str(), &entry).await;
            crate::metrics::record_variant_lookup("expired");
            return Lookup::Miss;
        }

        let body_path = self.state.layout.body_path(&entry.entry_id);
        let body = match async_fs::read(&body_path).await {
            Ok(body) => body,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %body_path.display(), "variant body missing on disk");
                self.state.evict_entry(key.as_str(), &entry).await;
                crate::metrics::record_variant_lookup("miss");
                return Lookup::Miss;
            }
            Err(err) => {
                crate::metrics::record_variant_lookup("error");
                return Lookup::Unavailable(StoreUnavailable(format!(
                    "reading variant body failed: {}",
                    err.kind()
                )));
            }
        };

        if blake3::hash(&body).to_hex().as_str() != entry.content_hash {
            warn!(path = %body_path.display(), "variant content hash mismatch; removing entry");
            self.state.evict_entry(key.as_str(), &entry).await;
            crate::metrics::record_variant_lookup("miss");
            return Lookup::Miss;
        }

        crate::metrics::record_variant_lookup("hit");
        Lookup::Hit(Variant {
            body: Bytes::from(body),
            content_type: entry.content_type.clone(),
            cache_control: entry.cache_control.clone(),
            created_at: entry.created_at,
        })
    }

    async fn put(&self, key: &CanonicalKey, variant: Variant) -> Result<(), CacheWriteFailed> {
        let content_length = variant.body.len() as u64;
        if content_length > self.state.max_entry_size || content_length > self.state.max_bytes {
            crate::metrics::record_variant_store_error();
            return Err(CacheWriteFailed(format!(
                "variant of {content_length} bytes exceeds the entry size limit"
            )));
        }

        match self.state.write_entry(key, variant).await {
            Ok(()) => {
                crate::metrics::record_variant_store();
                Ok(())
            }
            Err(err) => {
                crate::metrics::record_variant_store_error();
                Err(CacheWriteFailed(err.to_string()))
            }
        }
    }
}

impl StoreState {
    fn next_entry_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn is_expired(&self, entry: &VariantEntry, now: SystemTime) -> bool {
        match now.duration_since(entry.created_at) {
            Ok(age) => age > self.retention,
            Err(_) => false,
        }
    }

    async fn evict_entry(&self, key: &str, entry: &VariantEntry) {
        let removed = {
            let mut guard = self.index.lock();
            guard.remove_if_id_matches(key, entry.id).is_some()
        };
        if removed {
            self.layout
                .remove_entry_files_for_entry_id_async(&entry.entry_id)
                .await;
        }
    }

    fn remove_entry_by_key(&self, key: &str) {
        let mut guard = self.index.lock();
        guard.remove_by_key(key);
    }

    fn insert_entry(&self, key: String, entry: VariantEntry) -> Vec<VariantEntry> {
        let mut guard = self.index.lock();
        guard.insert(key, entry)
    }

    async fn write_entry(&self, key: &CanonicalKey, variant: Variant) -> Result<()> {
        let entry_id = entry_id_for_key(key.as_str());
        let content_hash = blake3::hash(&variant.body).to_hex().to_string();

        self.layout.write_body_async(&entry_id, &variant.body).await?;

        let entry = VariantEntry {
            id: self.next_entry_id(),
            entry_id: entry_id.clone(),
            content_type: variant.content_type,
            cache_control: variant.cache_control,
            created_at: variant.created_at,
            content_hash,
            content_length: variant.body.len() as u64,
        };
        let persisted = entry.to_persisted(key.as_str());
        if let Err(err) = self.layout.write_metadata_async(&entry_id, &persisted).await {
            warn!(error = %err, "failed to write variant metadata");
            self.layout
                .remove_entry_files_for_entry_id_async(&entry_id)
                .await;
            return Err(err);
        }

        let evicted = self.insert_entry(key.as_str().to_string(), entry);
        trace!(key = %key, "stored variant");
        self.remove_evicted_files_async(evicted, &entry_id).await;
        Ok(())
    }

    /// Entries replaced under the same key share files with the new entry and are skipped.
    async fn remove_evicted_files_async(&self, evicted: Vec<VariantEntry>, keep_entry_id: &str) {
        for evicted_entry in evicted {
            if evicted_entry.entry_id == keep_entry_id {
                continue;
            }
            crate::metrics::record_variant_eviction();
            self.layout
                .remove_entry_files_for_entry_id_async(&evicted_entry.entry_id)
                .await;
            self.layout.prune_empty_shards(&evicted_entry.entry_id).await;
        }
    }
}
