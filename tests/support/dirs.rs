use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use anyhow::{Result, anyhow};
use tempfile::TempDir;
use tokio::time::sleep;

pub struct TestDirs {
    _temp: TempDir,
    pub origin_dir: PathBuf,
    pub variant_dir: PathBuf,
}

impl TestDirs {
    pub fn new() -> Result<Self> {
        let temp = TempDir::new()?;
        let origin_dir = temp.path().join("originals");
        let variant_dir = temp.path().join("variants");
        std::fs::create_dir_all(&origin_dir)?;
        Ok(Self {
            _temp: temp,
            origin_dir,
            variant_dir,
        })
    }

    pub fn put_original(&self, path: &str, body: &[u8]) -> Result<()> {
        let target = self.origin_dir.join(path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(target, body)?;
        Ok(())
    }

    pub fn variant_metadata_files(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        collect_with_extension(&self.variant_dir, "meta", &mut found);
        found
    }

    /// Variant writes are detached from the request, so tests wait for them to land.
    pub async fn wait_for_variants(&self, count: usize) -> Result<()> {
        for _ in 0..100 {
            if self.variant_metadata_files().len() >= count {
                sleep(StdDuration::from_millis(100)).await;
                return Ok(());
            }
            sleep(StdDuration::from_millis(20)).await;
        }
        Err(anyhow!("expected {count} persisted variants"))
    }
}

fn collect_with_extension(dir: &Path, extension: &str, found: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_with_extension(&path, extension, found);
        } else if path.extension().is_some_and(|ext| ext == extension) {
            found.push(path);
        }
    }
}
