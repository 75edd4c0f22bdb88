use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tokio::fs as async_fs;
use tracing::{debug, warn};

use super::entry::valid_content_hash;
use super::{PersistedEntry, StoreState, SweepStats, VariantEntry, entry_id_for_key};

const STORE_LAYOUT_VERSION: u32 = 1;
const STORE_VERSION_PREFIX: &str = "v";
const STORE_TOMBSTONE_PREFIX: &str = "tombstone-";

fn store_version_dir(root: &Path) -> PathBuf {
    root.join(format!("{STORE_VERSION_PREFIX}{STORE_LAYOUT_VERSION}"))
}

fn parse_store_version(name: &str) -> Option<u32> {
    let version = name.strip_prefix(STORE_VERSION_PREFIX)?;
    if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    version.parse().ok()
}

/// Creates the active layout directory and moves directories of other layout versions aside
/// so they can be deleted in the background.
pub(super) async fn prepare_versioned_store_dir(root: &Path) -> Result<(PathBuf, Vec<PathBuf>)> {
    let active_dir = store_version_dir(root);
    async_fs::create_dir_all(&active_dir)
        .await
        .with_context(|| format!("failed to create variant store dir {}", active_dir.display()))?;
    let active_name = format!("{STORE_VERSION_PREFIX}{STORE_LAYOUT_VERSION}");

    let mut cleanup_dirs = Vec::new();
    let mut entries = async_fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name == active_name {
            continue;
        }
        if name.starts_with(STORE_TOMBSTONE_PREFIX) {
            cleanup_dirs.push(entry.path());
            continue;
        }
        if parse_store_version(&name).is_some() {
            let tombstone = root.join(format!(
                "{STORE_TOMBSTONE_PREFIX}{name}-{}",
                uuid::Uuid::new_v4()
            ));
            if let Err(err) = async_fs::rename(entry.path(), &tombstone).await {
                warn!(
                    error = %err,
                    path = %entry.path().display(),
                    "failed to tombstone old variant store dir"
                );
                continue;
            }
            cleanup_dirs.push(tombstone);
        }
    }

    Ok((active_dir, cleanup_dirs))
}

pub(super) fn spawn_store_dir_cleanup(dirs: Vec<PathBuf>) {
    for dir in dirs {
        tokio::spawn(async move {
            match async_fs::remove_dir_all(&dir).await {
                Ok(()) => crate::metrics::record_variant_cleanup_dir(),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(error = %err, path = %dir.display(), "failed to remove old variant store dir");
                }
            }
        });
    }
}

pub(super) fn spawn_store_sweeper(state: Arc<StoreState>, interval: Duration, batch_size: usize) {
    if interval.is_zero() || batch_size == 0 {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match state.sweep_expired_entries(batch_size).await {
                Ok(stats) => {
                    debug!(
                        inspected = stats.inspected,
                        removed = stats.removed,
                        "variant sweep finished"
                    );
                    crate::metrics::record_variant_sweep(stats.removed, stats.bytes_reclaimed);
                }
                Err(err) => warn!(error = %err, "variant sweep failed"),
            }
        }
    });
}

impl StoreState {
    /// Rebuilds the in-memory index from metadata sidecars, discarding anything expired,
    /// corrupt, oversized or orphaned.
    pub(super) fn rebuild_from_disk(&self) -> Result<()> {
        self.layout.remove_temp_files()?;
        self.index.lock().reset();

        let disk_dir = self.layout.disk_dir();
        if !disk_dir.exists() {
            return Ok(());
        }

        for shard1 in fs::read_dir(disk_dir)? {
            let shard1 = shard1?;
            if !shard1.file_type()?.is_dir() {
                continue;
            }
            for shard2 in fs::read_dir(shard1.path())? {
                let shard2 = shard2?;
                if !shard2.file_type()?.is_dir() {
                    continue;
                }
                let mut meta_files = Vec::new();
                let mut body_files = Vec::new();
                for entry in fs::read_dir(shard2.path())? {
                    let entry = entry?;
                    if !entry.file_type()?.is_file() {
                        continue;
                    }
                    let path = entry.path();
                    if path.extension().and_then(|ext| ext.to_str()) == Some("meta") {
                        meta_files.push(path);
                    } else {
                        body_files.push(path);
                    }
                }

                let mut live = HashSet::new();
                for meta in meta_files {
                    if let Some(entry_id) = self.restore_entry_from_meta(&meta) {
                        live.insert(entry_id);
                    }
                }

                for path in body_files {
                    let keep = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|name| live.contains(name));
                    if !keep {
                        fs::remove_file(&path).ok();
                    }
                }

                if fs::read_dir(shard2.path())?.next().is_none() {
                    fs::remove_dir(shard2.path()).ok();
                }
            }
            if fs::read_dir(shard1.path())?.next().is_none() {
                fs::remove_dir(shard1.path()).ok();
            }
        }
        Ok(())
    }

    fn restore_entry_from_meta(&self, meta_path: &Path) -> Option<String> {
        let data = match fs::read(meta_path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, path = %meta_path.display(), "failed to read variant metadata");
                return None;
            }
        };
        let persisted: PersistedEntry = match serde_json::from_slice(&data) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, path = %meta_path.display(), "failed to parse variant metadata");
                self.layout.remove_entry_files_from_meta(meta_path);
                return None;
            }
        };

        let entry_id = entry_id_for_key(&persisted.key);
        let file_stem = meta_path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
        if entry_id != file_stem {
            warn!(
                expected = %entry_id,
                actual = file_stem,
                "variant metadata key mismatch; removing entry"
            );
            self.layout.remove_entry_files_from_meta(meta_path);
            return None;
        }

        if !valid_content_hash(&persisted.content_hash)
            || persisted.content_length > self.max_entry_size
            || persisted.content_length > self.max_bytes
        {
            self.layout.remove_entry_files_from_meta(meta_path);
            return None;
        }

        let entry = VariantEntry::from_persisted(&persisted, &entry_id, self.next_entry_id());
        if self.is_expired(&entry, SystemTime::now()) {
            self.layout.remove_entry_files_from_meta(meta_path);
            return None;
        }

        let body_path = self.layout.body_path(&entry_id);
        if !self
            .layout
            .content_hash_matches(&body_path, &persisted.content_hash)
        {
            warn!(path = %body_path.display(), "variant body missing or corrupt; removing entry");
            self.layout.remove_entry_files_from_meta(meta_path);
            return None;
        }

        let evicted = self.insert_entry(persisted.key, entry);
        for evicted_entry in evicted {
            crate::metrics::record_variant_eviction();
            let meta = self.layout.meta_path(&evicted_entry.entry_id);
            self.layout.remove_entry_files_from_meta(&meta);
        }
        Some(entry_id)
    }

    pub(super) async fn sweep_expired_entries(&self, batch_size: usize) -> Result<SweepStats> {
        let mut stats = SweepStats::default();
        if batch_size == 0 {
            return Ok(stats);
        }
        let now = SystemTime::now();
        let mut shard1_entries = match async_fs::read_dir(self.layout.disk_dir()).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(stats),
            Err(err) => return Err(err.into()),
        };

        'outer: while let Some(shard1) = shard1_entries.next_entry().await? {
            if !shard1.file_type().await?.is_dir() {
                continue;
            }
            let mut shard2_entries = match async_fs::read_dir(shard1.path()).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            while let Some(shard2) = shard2_entries.next_entry().await? {
                if !shard2.file_type().await?.is_dir() {
                    continue;
                }
                let mut entries = match async_fs::read_dir(shard2.path()).await {
                    Ok(entries) => entries,
                    Err(err) if err.kind() == ErrorKind::NotFound => continue,
                    Err(err) => return Err(err.into()),
                };
                while let Some(entry) = entries.next_entry().await? {
                    if stats.inspected >= batch_size {
                        break 'outer;
                    }
                    let path = entry.path();
                    if !entry.file_type().await?.is_file()
                        || path.extension().and_then(|ext| ext.to_str()) != Some("meta")
                    {
                        continue;
                    }
                    stats.inspected += 1;
                    let data = match async_fs::read(&path).await {
                        Ok(data) => data,
                        Err(err) if err.kind() == ErrorKind::NotFound => continue,
                        Err(err) => return Err(err.into()),
                    };
                    let Ok(persisted) = serde_json::from_slice::<PersistedEntry>(&data) else {
                        continue;
                    };
                    let expired = now
                        .duration_since(persisted.created_at())
                        .is_ok_and(|age| age > self.retention);
                    if !expired {
                        continue;
                    }
                    self.remove_entry_by_key(&persisted.key);
                    self.layout.remove_entry_files_from_meta_async(&path).await;
                    if let Some(entry_id) = path.file_stem().and_then(|s| s.to_str()) {
                        self.layout.prune_empty_shards(entry_id).await;
                    }
                    stats.removed += 1;
                    stats.bytes_reclaimed =
                        stats.bytes_reclaimed.saturating_add(persisted.content_length);
                }
            }
        }

        Ok(stats)
    }
}
