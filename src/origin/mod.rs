mod fs;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use fs::FsOriginStore;

/// An untransformed source object. Never modified by this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalObject {
    pub body: Bytes,
    pub content_type: String,
}

#[derive(Debug, Error)]
pub enum OriginError {
    #[error("original object not found")]
    NotFound,
    #[error("origin store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait OriginStore: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<OriginalObject, OriginError>;
}
