//! The transform service: computes variants on cache miss.
//!
//! Callers reach it through [`TransformService`], either in-process via
//! [`LocalTransformService`] wrapped in a [`SecretGuard`], or over HTTP via
//! [`HttpTransformClient`]. Pixel work is delegated to a [`Transformer`].

mod client;
mod command;
mod local;
mod secret;
mod server;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::key::{CanonicalKey, TransformParams};
use crate::origin::OriginalObject;

pub use client::HttpTransformClient;
pub use command::CommandTransformer;
pub use local::{LocalTransformOptions, LocalTransformService};
pub use secret::{SECRET_HEADER, SecretGuard, SecretToken};
pub use server::serve_transform;

#[derive(Debug, Clone, Error)]
pub enum TransformError {
    #[error("missing or invalid secret token")]
    Unauthorized,
    #[error("original object not found")]
    OriginalNotFound,
    #[error("unsupported source format: {0}")]
    UnsupportedFormat(String),
    #[error("transform failed: {0}")]
    ComputeFailure(String),
    #[error("transform timed out")]
    Timeout,
}

impl TransformError {
    /// Short label used for metrics and access logs.
    pub fn label(&self) -> &'static str {
        match self {
            TransformError::Unauthorized => "unauthorized",
            TransformError::OriginalNotFound => "not_found",
            TransformError::UnsupportedFormat(_) => "unsupported",
            TransformError::ComputeFailure(_) => "compute_failure",
            TransformError::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransformRequest<'a> {
    pub key: &'a CanonicalKey,
    pub secret: Option<&'a str>,
}

impl<'a> TransformRequest<'a> {
    pub fn new(key: &'a CanonicalKey, secret: Option<&'a str>) -> Self {
        Self { key, secret }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    pub body: Bytes,
    pub content_type: String,
    pub cache_control: Option<String>,
}

impl TransformOutput {
    pub fn new(body: Bytes, content_type: impl Into<String>) -> Self {
        Self {
            body,
            content_type: content_type.into(),
            cache_control: None,
        }
    }
}

#[async_trait]
pub trait TransformService: Send + Sync {
    async fn transform(
        &self,
        request: TransformRequest<'_>,
    ) -> Result<TransformOutput, TransformError>;
}

/// Pixel-level transformation of one original into one variant.
#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(
        &self,
        original: &OriginalObject,
        params: &TransformParams,
    ) -> Result<Bytes, TransformError>;
}

#[async_trait]
impl<T: TransformService + ?Sized> TransformService for std::sync::Arc<T> {
    async fn transform(
        &self,
        request: TransformRequest<'_>,
    ) -> Result<TransformOutput, TransformError> {
        (**self).transform(request).await
    }
}
