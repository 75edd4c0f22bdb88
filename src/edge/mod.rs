//! The edge router: the client-facing layer in front of the variant store and the transform
//! service.
//!
//! Each request is matched against the compiled behaviors. Origin behaviors are served straight
//! from the origin store. Transform behaviors are normalized into a [`CanonicalKey`] and looked
//! up in the in-memory edge cache, then (with [`RoutingStrategy::CacheFirst`]) in the variant
//! store, and finally computed by the transform service with the shared secret attached.

mod cache;
mod cache_control;
mod headers;
mod listener;

use std::sync::Arc;
use std::time::Duration;

use http::{Method, StatusCode};
use tracing::{debug, warn};

use crate::key::{CanonicalKey, KeyNormalizer};
use crate::origin::{OriginError, OriginStore};
use crate::policy::{BehaviorSet, CompiledBehavior};
use crate::transform::{SecretToken, TransformError, TransformRequest, TransformService};
use crate::util::collapse_slashes;
use crate::variant::{Lookup, VariantStore};

pub use cache::{EdgeCache, EdgeEntry};
pub use cache_control::CacheDirectives;
pub use headers::{CACHE_STATUS_HEADER, CacheOutcome, EDGE_MARKER, EDGE_MARKER_HEADER};
pub use listener::serve_edge;

use headers::{ServedObject, content_response, error_response, method_not_allowed, preflight_response};

pub const DEFAULT_TRANSFORM_TIMEOUT: Duration = Duration::from_secs(60);

/// Which backends a transform request may be served from.
#[derive(Clone)]
pub enum RoutingStrategy {
    /// Variant store first, transform service on miss or store outage.
    CacheFirst(Arc<dyn VariantStore>),
    /// Every request is computed by the transform service.
    ComputeOnly,
}

impl RoutingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingStrategy::CacheFirst(_) => "cache_first",
            RoutingStrategy::ComputeOnly => "compute_only",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EdgeRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub accept: Option<String>,
}

impl EdgeRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: None,
            accept: None,
        }
    }
}

/// A response plus what the access log needs to know about how it was produced.
#[derive(Debug)]
pub struct EdgeResponse {
    pub response: crate::http::HttpResponse,
    pub route: &'static str,
    pub key: Option<String>,
    pub cache: Option<CacheOutcome>,
    pub error_reason: Option<&'static str>,
}

impl EdgeResponse {
    fn new(response: crate::http::HttpResponse, behavior: &CompiledBehavior) -> Self {
        Self {
            response,
            route: behavior.target.as_str(),
            key: None,
            cache: None,
            error_reason: None,
        }
    }

    fn key(mut self, key: &CanonicalKey) -> Self {
        self.key = Some(key.as_str().to_string());
        self
    }

    fn cache(mut self, outcome: CacheOutcome) -> Self {
        self.cache = Some(outcome);
        self
    }

    fn error(mut self, reason: &'static str) -> Self {
        self.error_reason = Some(reason);
        self
    }
}

pub struct EdgeRouter {
    behaviors: BehaviorSet,
    strategy: RoutingStrategy,
    origin: Arc<dyn OriginStore>,
    transform: Arc<dyn TransformService>,
    secret: Option<SecretToken>,
    transform_timeout: Duration,
    edge_cache: EdgeCache,
}

impl EdgeRouter {
    pub fn new(
        behaviors: BehaviorSet,
        strategy: RoutingStrategy,
        origin: Arc<dyn OriginStore>,
        transform: Arc<dyn TransformService>,
    ) -> Self {
        Self {
            behaviors,
            strategy,
            origin,
            transform,
            secret: None,
            transform_timeout: DEFAULT_TRANSFORM_TIMEOUT,
            edge_cache: EdgeCache::disabled(),
        }
    }

    /// Secret attached to every transform call.
    pub fn with_secret(mut self, secret: SecretToken) -> Self {
        self.secret = Some(secret);
        self
    }

    pub fn with_transform_timeout(mut self, timeout: Duration) -> Self {
        self.transform_timeout = timeout;
        self
    }

    pub fn with_edge_cache(mut self, cache: EdgeCache) -> Self {
        self.edge_cache = cache;
        self
    }

    pub fn strategy(&self) -> &RoutingStrategy {
        &self.strategy
    }

    pub async fn handle(&self, request: &EdgeRequest) -> EdgeResponse {
        let path = collapse_slashes(&request.path);
        let behavior = self.behaviors.select(&path);

        if request.method == Method::OPTIONS && behavior.cors {
            return EdgeResponse::new(preflight_response(behavior), behavior);
        }
        let readable = request.method == Method::GET || request.method == Method::HEAD;
        if !readable || !behavior.methods.allows(&request.method) {
            return EdgeResponse::new(method_not_allowed(behavior), behavior)
                .error("method_not_allowed");
        }

        match &behavior.normalizer {
            Some(normalizer) => self.serve_variant(behavior, normalizer, request).await,
            None => self.serve_original(behavior, &path).await,
        }
    }

    async fn serve_original(&self, behavior: &CompiledBehavior, path: &str) -> EdgeResponse {
        let edge_key = format!("origin:{path}");
        if let Some(response) = self.edge_hit(behavior, &edge_key) {
            return response;
        }

        match self.origin.fetch(path).await {
            Ok(original) => {
                let ttl = behavior.ttl.effective(None);
                self.edge_cache.insert(
                    edge_key,
                    EdgeEntry::new(original.body.clone(), original.content_type.clone(), ttl),
                );
                let object = ServedObject {
                    body: original.body,
                    content_type: original.content_type,
                    ttl: Some(ttl),
                    age: None,
                    last_modified: None,
                };
                EdgeResponse::new(content_response(behavior, object, CacheOutcome::Bypass), behavior)
                    .cache(CacheOutcome::Bypass)
            }
            Err(OriginError::NotFound) => {
                EdgeResponse::new(error_response(Some(behavior), StatusCode::NOT_FOUND), behavior)
                    .error("not_found")
            }
            Err(err) => {
                warn!(path, error = %err, "origin fetch failed");
                EdgeResponse::new(error_response(Some(behavior), StatusCode::BAD_GATEWAY), behavior)
                    .error("origin_unavailable")
            }
        }
    }

    async fn serve_variant(
        &self,
        behavior: &CompiledBehavior,
        normalizer: &KeyNormalizer,
        request: &EdgeRequest,
    ) -> EdgeResponse {
        let key = match normalizer.normalize(&request.path, request.query.as_deref()) {
            Ok(key) => key.negotiate(request.accept.as_deref()),
            Err(err) => {
                debug!(path = %request.path, reason = err.reason(), "rejecting malformed request");
                return EdgeResponse::new(
                    error_response(Some(behavior), StatusCode::BAD_REQUEST),
                    behavior,
                )
                .error("malformed_request");
            }
        };

        if let Some(response) = self.edge_hit(behavior, key.as_str()) {
            return response.key(&key);
        }

        if let RoutingStrategy::CacheFirst(store) = &self.strategy {
            match store.get(&key).await {
                Lookup::Hit(variant) => {
                    let object = self.admit(
                        behavior,
                        key.as_str(),
                        variant.body,
                        variant.content_type,
                        variant.cache_control.as_deref(),
                        Some(variant.created_at),
                    );
                    return EdgeResponse::new(
                        content_response(behavior, object, CacheOutcome::StoreHit),
                        behavior,
                    )
                    .key(&key)
                    .cache(CacheOutcome::StoreHit);
                }
                Lookup::Miss => {}
                Lookup::Unavailable(err) => {
                    warn!(key = %key, error = %err, "variant store unavailable, computing variant");
                    crate::metrics::record_store_degraded();
                }
            }
        }

        match self.call_transform(&key).await {
            Ok(output) => {
                let object = self.admit(
                    behavior,
                    key.as_str(),
                    output.body,
                    output.content_type,
                    output.cache_control.as_deref(),
                    None,
                );
                EdgeResponse::new(
                    content_response(behavior, object, CacheOutcome::TransformMiss),
                    behavior,
                )
                .key(&key)
                .cache(CacheOutcome::TransformMiss)
            }
            Err(err) => {
                let status = match err {
                    TransformError::OriginalNotFound => StatusCode::NOT_FOUND,
                    TransformError::Unauthorized => {
                        warn!(key = %key, "transform service rejected the shared secret");
                        StatusCode::BAD_GATEWAY
                    }
                    _ => {
                        warn!(key = %key, error = %err, "transform failed");
                        StatusCode::BAD_GATEWAY
                    }
                };
                EdgeResponse::new(error_response(Some(behavior), status), behavior)
                    .key(&key)
                    .error(err.label())
            }
        }
    }

    async fn call_transform(
        &self,
        key: &CanonicalKey,
    ) -> Result<crate::transform::TransformOutput, TransformError> {
        let secret = self.secret.as_ref().map(SecretToken::expose);
        let call = self.transform.transform(TransformRequest::new(key, secret));
        let result = match tokio::time::timeout(self.transform_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(TransformError::Timeout),
        };
        crate::metrics::record_transform_call(match &result {
            Ok(_) => "ok",
            Err(err) => err.label(),
        });
        result
    }

    fn edge_hit(&self, behavior: &CompiledBehavior, edge_key: &str) -> Option<EdgeResponse> {
        if !self.edge_cache.is_enabled() {
            return None;
        }
        let Some(entry) = self.edge_cache.get(edge_key) else {
            crate::metrics::record_edge_lookup("miss");
            return None;
        };
        crate::metrics::record_edge_lookup("hit");
        let object = ServedObject {
            age: Some(entry.age()),
            body: entry.body,
            content_type: entry.content_type,
            ttl: Some(entry.ttl),
            last_modified: entry.last_modified,
        };
        Some(
            EdgeResponse::new(
                content_response(behavior, object, CacheOutcome::EdgeHit),
                behavior,
            )
            .cache(CacheOutcome::EdgeHit),
        )
    }

    /// Applies the behavior's TTL bounds to a variant and holds it at the edge when allowed.
    fn admit(
        &self,
        behavior: &CompiledBehavior,
        edge_key: &str,
        body: bytes::Bytes,
        content_type: String,
        cache_control: Option<&str>,
        last_modified: Option<std::time::SystemTime>,
    ) -> ServedObject {
        let directives = CacheDirectives::parse(cache_control);
        let ttl = if directives.forbids_caching() {
            None
        } else {
            Some(behavior.ttl.effective(directives.shared_max_age()))
        };
        if let Some(ttl) = ttl {
            self.edge_cache.insert(
                edge_key.to_string(),
                EdgeEntry::new(body.clone(), content_type.clone(), ttl)
                    .with_last_modified(last_modified),
            );
        }
        ServedObject {
            body,
            content_type,
            ttl,
            age: None,
            last_modified,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use http::header;
    use parking_lot::Mutex;

    use super::*;
    use crate::config::{BehaviorsConfig, parse_behaviors};
    use crate::origin::OriginalObject;
    use crate::policy::{CompileOptions, compile_behaviors};
    use crate::transform::TransformOutput;
    use crate::variant::{CacheWriteFailed, StoreUnavailable, Variant};

    struct CountingOrigin {
        calls: AtomicUsize,
        objects: HashMap<String, OriginalObject>,
    }

    impl CountingOrigin {
        fn with(path: &str, body: &'static [u8], content_type: &str) -> Self {
            let mut objects = HashMap::new();
            objects.insert(
                path.to_string(),
                OriginalObject {
                    body: Bytes::from_static(body),
                    content_type: content_type.to_string(),
                },
            );
            Self {
                calls: AtomicUsize::new(0),
                objects,
            }
        }
    }

    #[async_trait]
    impl OriginStore for CountingOrigin {
        async fn fetch(&self, path: &str) -> Result<OriginalObject, OriginError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.objects
                .get(path.trim_start_matches('/'))
                .cloned()
                .ok_or(OriginError::NotFound)
        }
    }

    #[derive(Default)]
    struct FakeTransform {
        calls: AtomicUsize,
        secrets: Mutex<Vec<Option<String>>>,
        fail: Option<TransformError>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl TransformService for FakeTransform {
        async fn transform(
            &self,
            request: TransformRequest<'_>,
        ) -> Result<TransformOutput, TransformError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.secrets.lock().push(request.secret.map(str::to_string));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = &self.fail {
                return Err(err.clone());
            }
            let mut output = TransformOutput::new(
                Bytes::from(format!("variant:{}", request.key)),
                "image/webp",
            );
            output.cache_control = Some("max-age=31622400".to_string());
            Ok(output)
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        entries: Mutex<HashMap<String, Variant>>,
        unavailable: bool,
    }

    #[async_trait]
    impl VariantStore for MemoryStore {
        async fn get(&self, key: &CanonicalKey) -> Lookup {
            if self.unavailable {
                return Lookup::Unavailable(StoreUnavailable("offline".into()));
            }
            match self.entries.lock().get(key.as_str()) {
                Some(variant) => Lookup::Hit(variant.clone()),
                None => Lookup::Miss,
            }
        }

        async fn put(&self, key: &CanonicalKey, variant: Variant) -> Result<(), CacheWriteFailed> {
            self.entries.lock().insert(key.as_str().to_string(), variant);
            Ok(())
        }
    }

    fn behaviors(config: &BehaviorsConfig) -> BehaviorSet {
        let options = CompileOptions {
            path_prefix: String::new(),
            max_dimension: 4000,
            cors_enabled: true,
        };
        compile_behaviors(config, &options).expect("behaviors compile")
    }

    fn router(
        strategy: RoutingStrategy,
        origin: Arc<CountingOrigin>,
        transform: Arc<FakeTransform>,
    ) -> EdgeRouter {
        EdgeRouter::new(
            behaviors(&BehaviorsConfig::builtin()),
            strategy,
            origin,
            transform,
        )
        .with_secret(SecretToken::new("s3cr3t").expect("token"))
    }

    fn empty_origin() -> Arc<CountingOrigin> {
        Arc::new(CountingOrigin {
            calls: AtomicUsize::new(0),
            objects: HashMap::new(),
        })
    }

    #[tokio::test]
    async fn store_hit_never_calls_transform() {
        let store = Arc::new(MemoryStore::default());
        let key = CanonicalKey::parse("rio/cat.jpg/format=webp,width=400,height=400")
            .expect("canonical key");
        store
            .put(&key, Variant::new(Bytes::from_static(b"stored"), "image/webp"))
            .await
            .expect("put");
        let transform = Arc::new(FakeTransform::default());
        let router = router(
            RoutingStrategy::CacheFirst(store),
            empty_origin(),
            transform.clone(),
        );

        let result = router.handle(&EdgeRequest::get("/400x400/webp/rio/cat.jpg")).await;
        assert_eq!(result.response.status, StatusCode::OK);
        assert_eq!(result.response.body.as_ref(), b"stored");
        assert_eq!(result.cache, Some(CacheOutcome::StoreHit));
        assert_eq!(result.response.headers[header::CACHE_CONTROL], "public, max-age=86400");
        assert!(result.response.headers.contains_key(header::LAST_MODIFIED));
        assert_eq!(transform.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn miss_calls_transform_with_secret() {
        let store = Arc::new(MemoryStore::default());
        let transform = Arc::new(FakeTransform::default());
        let router = router(
            RoutingStrategy::CacheFirst(store),
            empty_origin(),
            transform.clone(),
        );

        let result = router.handle(&EdgeRequest::get("//400x400//webp/rio/cat.jpg")).await;
        assert_eq!(result.response.status, StatusCode::OK);
        assert_eq!(result.cache, Some(CacheOutcome::TransformMiss));
        assert_eq!(
            result.key.as_deref(),
            Some("rio/cat.jpg/format=webp,width=400,height=400")
        );
        assert_eq!(
            transform.secrets.lock().as_slice(),
            &[Some("s3cr3t".to_string())]
        );
        assert_eq!(
            result.response.headers[header::CACHE_CONTROL],
            "public, max-age=31536000"
        );
    }

    #[tokio::test]
    async fn compute_only_serves_every_request_from_transform() {
        let transform = Arc::new(FakeTransform::default());
        let router = router(RoutingStrategy::ComputeOnly, empty_origin(), transform.clone());
        for _ in 0..2 {
            let result = router.handle(&EdgeRequest::get("/400x400/webp/rio/cat.jpg")).await;
            assert_eq!(result.cache, Some(CacheOutcome::TransformMiss));
        }
        assert_eq!(transform.calls.load(Ordering::SeqCst), 2);
        assert_eq!(router.strategy().as_str(), "compute_only");
    }

    #[tokio::test]
    async fn edge_cache_serves_repeat_requests() {
        let transform = Arc::new(FakeTransform::default());
        let router = router(RoutingStrategy::ComputeOnly, empty_origin(), transform.clone())
            .with_edge_cache(EdgeCache::new(16));

        let first = router.handle(&EdgeRequest::get("/400x400/webp/rio/cat.jpg")).await;
        let second = router.handle(&EdgeRequest::get("/webp/400x400/rio/cat.jpg")).await;
        assert_eq!(first.cache, Some(CacheOutcome::TransformMiss));
        assert_eq!(second.cache, Some(CacheOutcome::EdgeHit));
        assert_eq!(second.response.body, first.response.body);
        assert_eq!(second.response.headers[header::AGE], "0");
        assert_eq!(transform.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn store_outage_degrades_to_transform() {
        let store = Arc::new(MemoryStore {
            unavailable: true,
            ..MemoryStore::default()
        });
        let transform = Arc::new(FakeTransform::default());
        let router = router(
            RoutingStrategy::CacheFirst(store),
            empty_origin(),
            transform.clone(),
        );
        let result = router.handle(&EdgeRequest::get("/400x400/webp/rio/cat.jpg")).await;
        assert_eq!(result.response.status, StatusCode::OK);
        assert_eq!(transform.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_requests_touch_no_backend() {
        let origin = empty_origin();
        let transform = Arc::new(FakeTransform::default());
        let router = router(RoutingStrategy::ComputeOnly, origin.clone(), transform.clone());
        for path in ["/cat.jpg", "/400x400/../cat.jpg", "/0x400/rio/cat.jpg"] {
            let result = router.handle(&EdgeRequest::get(path)).await;
            assert_eq!(result.response.status, StatusCode::BAD_REQUEST, "{path}");
            assert_eq!(result.error_reason, Some("malformed_request"));
        }
        assert_eq!(transform.calls.load(Ordering::SeqCst), 0);
        assert_eq!(origin.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn svg_bypasses_transform() {
        let origin = Arc::new(CountingOrigin::with(
            "icons/brand/logo.svg",
            b"<svg/>",
            "image/svg+xml",
        ));
        let transform = Arc::new(FakeTransform::default());
        let router = router(RoutingStrategy::ComputeOnly, origin.clone(), transform.clone());

        let result = router.handle(&EdgeRequest::get("/icons/brand/logo.svg")).await;
        assert_eq!(result.response.status, StatusCode::OK);
        assert_eq!(result.response.body.as_ref(), b"<svg/>");
        assert_eq!(result.cache, Some(CacheOutcome::Bypass));
        assert_eq!(result.route, "origin");
        assert!(result.response.headers.get(header::VARY).is_none());
        assert_eq!(origin.calls.load(Ordering::SeqCst), 1);
        assert_eq!(transform.calls.load(Ordering::SeqCst), 0);

        let missing = router.handle(&EdgeRequest::get("/icons/brand/gone.svg")).await;
        assert_eq!(missing.response.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn svg_bypass_matches_any_depth_and_duplicate_slashes() {
        let mut objects = HashMap::new();
        for path in ["400x400/webp/rio/logo.svg", "a/b/c.svg"] {
            objects.insert(
                path.to_string(),
                OriginalObject {
                    body: Bytes::from_static(b"<svg/>"),
                    content_type: "image/svg+xml".to_string(),
                },
            );
        }
        let origin = Arc::new(CountingOrigin {
            calls: AtomicUsize::new(0),
            objects,
        });
        let transform = Arc::new(FakeTransform::default());
        let router = router(RoutingStrategy::ComputeOnly, origin.clone(), transform.clone());

        for path in ["/400x400/webp/rio/logo.svg", "//a/b/c.svg", "/a//b/c.svg"] {
            let result = router.handle(&EdgeRequest::get(path)).await;
            assert_eq!(result.response.status, StatusCode::OK, "{path}");
            assert_eq!(result.route, "origin", "{path}");
            assert_eq!(result.cache, Some(CacheOutcome::Bypass), "{path}");
        }
        assert_eq!(origin.calls.load(Ordering::SeqCst), 3);
        assert_eq!(transform.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transform_failures_map_to_gateway_errors() {
        let cases = [
            (TransformError::OriginalNotFound, StatusCode::NOT_FOUND),
            (TransformError::Unauthorized, StatusCode::BAD_GATEWAY),
            (
                TransformError::UnsupportedFormat("text/plain".into()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                TransformError::ComputeFailure("boom".into()),
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, status) in cases {
            let transform = Arc::new(FakeTransform {
                fail: Some(err.clone()),
                ..FakeTransform::default()
            });
            let router = router(RoutingStrategy::ComputeOnly, empty_origin(), transform)
                .with_edge_cache(EdgeCache::new(4));
            let result = router.handle(&EdgeRequest::get("/400x400/webp/rio/cat.jpg")).await;
            assert_eq!(result.response.status, status, "{err}");
            assert_eq!(result.error_reason, Some(err.label()));
            assert!(!String::from_utf8_lossy(&result.response.body).contains("boom"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_transform_times_out() {
        let transform = Arc::new(FakeTransform {
            delay: Some(Duration::from_secs(120)),
            ..FakeTransform::default()
        });
        let router = router(RoutingStrategy::ComputeOnly, empty_origin(), transform);
        let result = router.handle(&EdgeRequest::get("/400x400/webp/rio/cat.jpg")).await;
        assert_eq!(result.response.status, StatusCode::BAD_GATEWAY);
        assert_eq!(result.error_reason, Some("timeout"));
    }

    #[tokio::test]
    async fn methods_and_preflight_follow_behavior() {
        let transform = Arc::new(FakeTransform::default());
        let router = router(RoutingStrategy::ComputeOnly, empty_origin(), transform.clone());

        let mut post = EdgeRequest::get("/400x400/webp/rio/cat.jpg");
        post.method = Method::POST;
        let result = router.handle(&post).await;
        assert_eq!(result.response.status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(result.response.headers[header::ALLOW], "GET, HEAD, OPTIONS");

        let mut options = EdgeRequest::get("/400x400/webp/rio/cat.jpg");
        options.method = Method::OPTIONS;
        let result = router.handle(&options).await;
        assert_eq!(result.response.status, StatusCode::NO_CONTENT);
        assert_eq!(
            result.response.headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
        assert_eq!(transform.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn auto_format_is_negotiated_from_accept() {
        let transform = Arc::new(FakeTransform::default());
        let router = router(RoutingStrategy::ComputeOnly, empty_origin(), transform);
        let mut request = EdgeRequest::get("/400x/auto/rio/cat.jpg");
        request.accept = Some("image/avif,image/webp,*/*".to_string());
        let result = router.handle(&request).await;
        assert_eq!(result.key.as_deref(), Some("rio/cat.jpg/format=avif,width=400"));
        assert_eq!(result.response.headers[header::VARY], "Accept");
    }

    #[tokio::test]
    async fn behavior_ttl_bounds_clamp_variant_max_age() {
        let config = parse_behaviors(
            r#"
            [[behavior]]
            name = "thumbs"
            path = "/*/thumbs/**"
            max_ttl = 3600
            default_ttl = 600
            "#,
        )
        .expect("behaviors parse");
        let router = EdgeRouter::new(
            behaviors(&config),
            RoutingStrategy::ComputeOnly,
            empty_origin(),
            Arc::new(FakeTransform::default()),
        );
        let result = router
            .handle(&EdgeRequest::get("/200x200/thumbs/cat.jpg"))
            .await;
        assert_eq!(result.response.status, StatusCode::OK);
        assert_eq!(result.key.as_deref(), Some("thumbs/cat.jpg/width=200,height=200"));
        assert_eq!(result.response.headers[header::CACHE_CONTROL], "public, max-age=3600");
    }
}
