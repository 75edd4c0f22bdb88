use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use imgedge::origin::{FsOriginStore, OriginError, OriginStore, OriginalObject};

/// Directory-backed origin that counts every fetch.
#[derive(Clone)]
pub struct CountingOrigin {
    inner: FsOriginStore,
    calls: Arc<AtomicUsize>,
}

impl CountingOrigin {
    pub fn new(root: PathBuf) -> Self {
        Self {
            inner: FsOriginStore::new(root),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OriginStore for CountingOrigin {
    async fn fetch(&self, path: &str) -> Result<OriginalObject, OriginError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(path).await
    }
}
