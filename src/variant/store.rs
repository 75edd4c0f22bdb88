use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blake3::Hasher;
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;

use super::PersistedEntry;

const TEMP_PREFIX: &str = "tmp_";

/// On-disk layout: `{dir}/{aa}/{bb}/{entry_id}` for bodies with a `.meta` sidecar alongside.
#[derive(Debug, Clone)]
pub(super) struct DiskLayout {
    disk_dir: PathBuf,
}

impl DiskLayout {
    pub(super) fn new(disk_dir: PathBuf) -> Self {
        Self { disk_dir }
    }

    pub(super) fn disk_dir(&self) -> &Path {
        &self.disk_dir
    }

    pub(super) fn body_path(&self, entry_id: &str) -> PathBuf {
        let (first, remainder) = entry_id.split_at(2);
        let (second, _) = remainder.split_at(2);
        self.disk_dir.join(first).join(second).join(entry_id)
    }

    pub(super) fn meta_path(&self, entry_id: &str) -> PathBuf {
        let mut path = self.body_path(entry_id);
        path.set_extension("meta");
        path
    }

    fn temp_path(&self) -> PathBuf {
        self.disk_dir
            .join(format!("{TEMP_PREFIX}{}", uuid::Uuid::new_v4().simple()))
    }

    pub(super) fn remove_temp_files(&self) -> Result<()> {
        if !self.disk_dir.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(&self.disk_dir)? {
            let path = entry?.path();
            let is_temp = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.starts_with(TEMP_PREFIX));
            if is_temp && path.is_file() {
                fs::remove_file(&path).ok();
            }
        }
        Ok(())
    }

    pub(super) fn content_hash_matches(&self, path: &Path, expected_hex: &str) -> bool {
        let Ok(mut file) = fs::File::open(path) else {
            return false;
        };
        let mut hasher = Hasher::new();
        match std::io::copy(&mut file, &mut hasher) {
            Ok(_) => hasher.finalize().to_hex().as_str() == expected_hex,
            Err(_) => false,
        }
    }

    pub(super) fn remove_entry_files_from_meta(&self, meta_path: &Path) {
        if let Some(stem) = meta_path.file_stem().and_then(|s| s.to_str()) {
            fs::remove_file(self.body_path(stem)).ok();
        }
        fs::remove_file(meta_path).ok();
    }

    pub(super) async fn remove_entry_files_from_meta_async(&self, meta_path: &Path) {
        if let Some(stem) = meta_path.file_stem().and_then(|s| s.to_str()) {
            let _ = async_fs::remove_file(self.body_path(stem)).await;
        }
        let _ = async_fs::remove_file(meta_path).await;
    }

    pub(super) async fn remove_entry_files_for_entry_id_async(&self, entry_id: &str) {
        let meta_path = self.meta_path(entry_id);
        self.remove_entry_files_from_meta_async(&meta_path).await;
    }

    async fn dir_is_empty(path: &Path) -> bool {
        let Ok(mut entries) = async_fs::read_dir(path).await else {
            return false;
        };
        matches!(entries.next_entry().await, Ok(None))
    }

    pub(super) async fn prune_empty_shards(&self, entry_id: &str) {
        let body_path = self.body_path(entry_id);
        let Some(shard2) = body_path.parent() else {
            return;
        };
        if Self::dir_is_empty(shard2).await {
            let _ = async_fs::remove_dir(shard2).await;
        }
        let Some(shard1) = shard2.parent() else {
            return;
        };
        if shard1 == self.disk_dir {
            return;
        }
        if Self::dir_is_empty(shard1).await {
            let _ = async_fs::remove_dir(shard1).await;
        }
    }

    pub(super) async fn write_body_async(&self, entry_id: &str, body: &[u8]) -> Result<()> {
        let body_path = self.body_path(entry_id);
        self.write_atomic(&body_path, body)
            .await
            .with_context(|| format!("failed to write variant body {}", body_path.display()))
    }

    pub(super) async fn write_metadata_async(
        &self,
        entry_id: &str,
        entry: &PersistedEntry,
    ) -> Result<()> {
        let meta_path = self.meta_path(entry_id);
        let data = serde_json::to_vec(entry)?;
        self.write_atomic(&meta_path, &data)
            .await
            .with_context(|| format!("failed to write variant metadata {}", meta_path.display()))
    }

    /// Writes through a temp file in the store root and renames into place, so readers see
    /// either the previous file or the complete new one.
    async fn write_atomic(&self, target: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = target.parent() {
            async_fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create store shard {}", parent.display()))?;
        }
        let temp_path = self.temp_path();
        let mut options = async_fs::OpenOptions::new();
        options.create_new(true).write(true);
        #[cfg(unix)]
        {
            options.mode(0o600);
        }
        let result = async {
            let mut file = options.open(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            drop(file);
            async_fs::rename(&temp_path, target).await
        }
        .await;
        if let Err(err) = result {
            let _ = async_fs::remove_file(&temp_path).await;
            return Err(err.into());
        }
        Ok(())
    }
}
