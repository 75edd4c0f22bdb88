use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{TransformError, TransformOutput, TransformRequest, TransformService, Transformer};
use crate::key::{OutputFormat, TransformParams};
use crate::origin::{OriginError, OriginStore};
use crate::variant::{Variant, VariantStore};

const RASTER_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/avif",
    "image/gif",
];

#[derive(Debug, Clone)]
pub struct LocalTransformOptions {
    pub max_concurrency: usize,
    pub max_input_bytes: u64,
    /// `Cache-Control` attached to every computed variant.
    pub cache_control: String,
    pub log_timing: bool,
}

/// In-process transform service. Fetches the original, runs the transformer and persists the
/// result to the variant store when one is configured.
pub struct LocalTransformService {
    origin: Arc<dyn OriginStore>,
    transformer: Arc<dyn Transformer>,
    store: Option<Arc<dyn VariantStore>>,
    permits: Arc<Semaphore>,
    options: LocalTransformOptions,
}

impl LocalTransformService {
    pub fn new(
        origin: Arc<dyn OriginStore>,
        transformer: Arc<dyn Transformer>,
        store: Option<Arc<dyn VariantStore>>,
        options: LocalTransformOptions,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(options.max_concurrency.max(1)));
        Self {
            origin,
            transformer,
            store,
            permits,
            options,
        }
    }

    fn persist(&self, request: &TransformRequest<'_>, output: &TransformOutput) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let key = request.key.clone();
        let variant = Variant::new(output.body.clone(), output.content_type.clone())
            .with_cache_control(output.cache_control.clone());
        let log_timing = self.options.log_timing;
        // Detached so a client disconnect cannot abort the write.
        tokio::spawn(async move {
            let started = Instant::now();
            match store.put(&key, variant).await {
                Ok(()) => {
                    if log_timing {
                        info!(key = %key, store_ms = started.elapsed().as_millis() as u64, "variant persisted");
                    }
                }
                Err(err) => warn!(key = %key, error = %err, "failed to persist variant"),
            }
        });
    }
}

#[async_trait]
impl TransformService for LocalTransformService {
    async fn transform(
        &self,
        request: TransformRequest<'_>,
    ) -> Result<TransformOutput, TransformError> {
        let key = request.key;
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| TransformError::ComputeFailure("transform service closed".into()))?;

        let started = Instant::now();
        let original = match self.origin.fetch(key.original()).await {
            Ok(original) => original,
            Err(OriginError::NotFound) => return Err(TransformError::OriginalNotFound),
            Err(OriginError::Unavailable(reason)) => {
                return Err(TransformError::ComputeFailure(format!(
                    "origin unavailable: {reason}"
                )));
            }
        };
        let fetch_elapsed = started.elapsed();

        if !RASTER_TYPES.contains(&original.content_type.as_str()) {
            return Err(TransformError::UnsupportedFormat(original.content_type));
        }
        if original.body.len() as u64 > self.options.max_input_bytes {
            return Err(TransformError::ComputeFailure(format!(
                "original of {} bytes exceeds input limit",
                original.body.len()
            )));
        }

        let params = resolve_output_format(key.params(), &original.content_type);
        let content_type = params
            .format
            .and_then(OutputFormat::content_type)
            .unwrap_or(original.content_type.as_str())
            .to_string();

        let body = self.transformer.transform(&original, &params).await?;
        let transform_elapsed = started.elapsed().saturating_sub(fetch_elapsed);
        debug!(key = %key, bytes = body.len(), "variant computed");

        let output = TransformOutput {
            body,
            content_type,
            cache_control: Some(self.options.cache_control.clone()),
        };
        self.persist(&request, &output);

        if self.options.log_timing {
            info!(
                key = %key,
                fetch_ms = fetch_elapsed.as_millis() as u64,
                transform_ms = transform_elapsed.as_millis() as u64,
                "transform timing"
            );
        }
        Ok(output)
    }
}

/// Keys without a concrete format keep the source format.
fn resolve_output_format(params: &TransformParams, source_type: &str) -> TransformParams {
    match params.format {
        Some(format) if format != OutputFormat::Auto => *params,
        _ => TransformParams {
            format: source_format(source_type),
            ..*params
        },
    }
}

fn source_format(content_type: &str) -> Option<OutputFormat> {
    match content_type {
        "image/jpeg" => Some(OutputFormat::Jpeg),
        "image/png" => Some(OutputFormat::Png),
        "image/webp" => Some(OutputFormat::Webp),
        "image/avif" => Some(OutputFormat::Avif),
        "image/gif" => Some(OutputFormat::Gif),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{CanonicalKey, KeyNormalizer};
    use crate::origin::{FsOriginStore, OriginalObject};
    use crate::variant::{CacheWriteFailed, Lookup};
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct TaggingTransformer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transformer for TaggingTransformer {
        async fn transform(
            &self,
            original: &OriginalObject,
            params: &TransformParams,
        ) -> Result<Bytes, TransformError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut out = params.render().into_bytes();
            out.push(b':');
            out.extend_from_slice(&original.body);
            Ok(Bytes::from(out))
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        entries: Mutex<HashMap<String, Variant>>,
        puts: AtomicUsize,
    }

    #[async_trait]
    impl VariantStore for MemoryStore {
        async fn get(&self, key: &CanonicalKey) -> Lookup {
            match self.entries.lock().get(key.as_str()) {
                Some(variant) => Lookup::Hit(variant.clone()),
                None => Lookup::Miss,
            }
        }

        async fn put(&self, key: &CanonicalKey, variant: Variant) -> Result<(), CacheWriteFailed> {
            self.entries.lock().insert(key.as_str().to_string(), variant);
            self.puts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fixture {
        _dir: TempDir,
        transformer: Arc<TaggingTransformer>,
        store: Arc<MemoryStore>,
        service: LocalTransformService,
    }

    fn fixture(max_input_bytes: u64) -> Fixture {
        let dir = TempDir::new().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("rio")).expect("mkdir");
        std::fs::write(dir.path().join("rio/cat.jpg"), b"jpeg").expect("write");
        std::fs::write(dir.path().join("logo.svg"), b"<svg/>").expect("write");
        let transformer = Arc::new(TaggingTransformer::default());
        let store = Arc::new(MemoryStore::default());
        let service = LocalTransformService::new(
            Arc::new(FsOriginStore::new(dir.path().to_path_buf())),
            transformer.clone(),
            Some(store.clone()),
            LocalTransformOptions {
                max_concurrency: 2,
                max_input_bytes,
                cache_control: "max-age=31622400".to_string(),
                log_timing: true,
            },
        );
        Fixture {
            _dir: dir,
            transformer,
            store,
            service,
        }
    }

    fn key(path: &str) -> CanonicalKey {
        KeyNormalizer::default().normalize(path, None).expect("key")
    }

    #[tokio::test]
    async fn computes_and_persists_variant() {
        let fixture = fixture(1024);
        let key = key("/400x400/webp/rio/cat.jpg");
        let output = fixture
            .service
            .transform(TransformRequest::new(&key, None))
            .await
            .expect("transform");
        assert_eq!(output.content_type, "image/webp");
        assert_eq!(output.body.as_ref(), b"format=webp,width=400,height=400:jpeg");
        assert_eq!(output.cache_control.as_deref(), Some("max-age=31622400"));

        let mut persisted = None;
        for _ in 0..50 {
            if let Lookup::Hit(variant) = fixture.store.get(&key).await {
                persisted = Some(variant);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let persisted = persisted.expect("variant persisted");
        assert_eq!(persisted.body, output.body);
        assert_eq!(persisted.content_type, "image/webp");
    }

    #[tokio::test]
    async fn same_key_computes_identical_variants() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("rio")).expect("mkdir");
        std::fs::write(dir.path().join("rio/cat.jpg"), b"jpeg").expect("write");
        let storeless = LocalTransformService::new(
            Arc::new(FsOriginStore::new(dir.path().to_path_buf())),
            Arc::new(TaggingTransformer::default()),
            None,
            LocalTransformOptions {
                max_concurrency: 1,
                max_input_bytes: 1024,
                cache_control: "max-age=60".to_string(),
                log_timing: false,
            },
        );
        let key = key("/400x400/webp/rio/cat.jpg");
        let first = storeless
            .transform(TransformRequest::new(&key, None))
            .await
            .expect("first");
        let second = storeless
            .transform(TransformRequest::new(&key, None))
            .await
            .expect("second");
        assert_eq!(first, second);

        let fixture = fixture(1024);
        let first = fixture
            .service
            .transform(TransformRequest::new(&key, None))
            .await
            .expect("first");
        let second = fixture
            .service
            .transform(TransformRequest::new(&key, None))
            .await
            .expect("second");
        assert_eq!(first.body, second.body);
        for _ in 0..50 {
            if fixture.store.puts.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(fixture.store.puts.load(Ordering::SeqCst), 2);
        match fixture.store.get(&key).await {
            Lookup::Hit(variant) => assert_eq!(variant.body, second.body),
            _ => panic!("variant should be persisted"),
        }
    }

    #[tokio::test]
    async fn missing_original_does_not_compute() {
        let fixture = fixture(1024);
        let key = key("/400x/rio/missing.jpg");
        let err = fixture
            .service
            .transform(TransformRequest::new(&key, None))
            .await
            .expect_err("missing original");
        assert!(matches!(err, TransformError::OriginalNotFound));
        assert_eq!(fixture.transformer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_raster_sources_are_unsupported() {
        let fixture = fixture(1024);
        let key = key("/400x/logo.svg");
        let err = fixture
            .service
            .transform(TransformRequest::new(&key, None))
            .await
            .expect_err("svg source");
        assert!(matches!(err, TransformError::UnsupportedFormat(ref t) if t == "image/svg+xml"));
    }

    #[tokio::test]
    async fn oversized_inputs_fail_before_compute() {
        let fixture = fixture(2);
        let key = key("/400x/rio/cat.jpg");
        let err = fixture
            .service
            .transform(TransformRequest::new(&key, None))
            .await
            .expect_err("input too large");
        assert!(matches!(err, TransformError::ComputeFailure(_)));
        assert_eq!(fixture.transformer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn keys_without_format_keep_source_type() {
        let fixture = fixture(1024);
        let key = key("/200x/rio/cat.jpg");
        let output = fixture
            .service
            .transform(TransformRequest::new(&key, None))
            .await
            .expect("transform");
        assert_eq!(output.content_type, "image/jpeg");
        assert!(output.body.starts_with(b"format=jpeg,width=200"));
    }
}
