use std::fmt;
use std::path::Path;

use anyhow::{Context, Result, ensure};
use async_trait::async_trait;
use rand::{RngCore, rngs::OsRng};
use tracing::warn;
use zeroize::Zeroizing;

use super::{TransformError, TransformOutput, TransformRequest, TransformService};

/// Header carrying the shared secret from the edge router to the transform service.
pub const SECRET_HEADER: &str = "x-origin-secret-header";

const GENERATED_TOKEN_BYTES: usize = 32;

/// Process-lifetime secret shared by the edge router and the transform service.
#[derive(Clone)]
pub struct SecretToken(Zeroizing<String>);

impl SecretToken {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = Zeroizing::new(value.into());
        ensure!(!value.trim().is_empty(), "secret token must not be empty");
        ensure!(
            value.bytes().all(|b| b.is_ascii_graphic()),
            "secret token must be printable ASCII without whitespace"
        );
        Ok(Self(value))
    }

    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; GENERATED_TOKEN_BYTES]);
        OsRng.fill_bytes(&mut bytes[..]);
        Self(Zeroizing::new(hex::encode(&bytes[..])))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = Zeroizing::new(
            std::fs::read_to_string(path)
                .with_context(|| format!("failed to read secret token {}", path.display()))?,
        );
        Self::new(contents.trim())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Constant-time comparison against a presented token.
    pub fn matches(&self, presented: &str) -> bool {
        blake3::hash(self.0.as_bytes()) == blake3::hash(presented.as_bytes())
    }

    /// Whether a request presenting `presented` (or nothing) may proceed.
    pub fn admits(&self, presented: Option<&str>) -> bool {
        presented.is_some_and(|presented| self.matches(presented))
    }
}

impl fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretToken(<redacted>)")
    }
}

/// Rejects requests that do not present the shared secret before the wrapped service runs.
pub struct SecretGuard<S> {
    token: SecretToken,
    inner: S,
}

impl<S> SecretGuard<S> {
    pub fn new(token: SecretToken, inner: S) -> Self {
        Self { token, inner }
    }
}

#[async_trait]
impl<S: TransformService> TransformService for SecretGuard<S> {
    async fn transform(
        &self,
        request: TransformRequest<'_>,
    ) -> Result<TransformOutput, TransformError> {
        if !self.token.admits(request.secret) {
            crate::metrics::record_unauthorized();
            warn!(
                key = %request.key,
                secret_present = request.secret.is_some(),
                "rejected transform call without valid secret"
            );
            return Err(TransformError::Unauthorized);
        }
        self.inner.transform(request).await
    }
}
