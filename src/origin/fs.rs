use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs as async_fs;
use tracing::{trace, warn};

use super::{OriginError, OriginStore, OriginalObject};

/// Serves originals from a directory tree. Object paths are always resolved below `root`.
#[derive(Debug, Clone)]
pub struct FsOriginStore {
    root: PathBuf,
}

impl FsOriginStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        if resolved == self.root {
            return None;
        }
        Some(resolved)
    }
}

#[async_trait]
impl OriginStore for FsOriginStore {
    async fn fetch(&self, path: &str) -> Result<OriginalObject, OriginError> {
        let Some(file_path) = self.resolve(path) else {
            trace!(path, "origin path escapes store root");
            return Err(OriginError::NotFound);
        };
        match async_fs::read(&file_path).await {
            Ok(body) => Ok(OriginalObject {
                body: Bytes::from(body),
                content_type: mime_guess::from_path(&file_path)
                    .first_or_octet_stream()
                    .to_string(),
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(OriginError::NotFound),
            Err(err) if err.kind() == ErrorKind::IsADirectory => Err(OriginError::NotFound),
            Err(err) => {
                warn!(error = %err, path = %file_path.display(), "failed to read original");
                Err(OriginError::Unavailable(err.kind().to_string()))
            }
        }
    }
}
