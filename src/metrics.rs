use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use http::{HeaderValue, Method, StatusCode, header};
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;

use crate::http::codec::read_request_head;
use crate::http::{HttpResponse, serve_connections, write_response};

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("requests_total", "Requests by listener, route and status class");
    let vec = IntCounterVec::new(opts, &["listener", "route", "status_class"])
        .expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register requests_total");
    vec
});

static REQUEST_METHOD_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("requests_method_total", "Requests by method");
    let vec = IntCounterVec::new(opts, &["method"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register requests_method_total");
    vec
});

static REQUEST_LATENCY_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let opts = HistogramOpts::new("request_duration_seconds", "Request latency per route")
        .buckets(latency_buckets());
    let vec = HistogramVec::new(opts, &["listener", "route"]).expect("create histogram vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register request_duration_seconds");
    vec
});

static EDGE_CACHE_LOOKUP_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("edge_cache_lookup_total", "Edge cache lookups by result");
    let vec = IntCounterVec::new(opts, &["result"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register edge_cache_lookup_total");
    vec
});

static VARIANT_LOOKUP_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("variant_store_lookup_total", "Variant store lookups by result");
    let vec = IntCounterVec::new(opts, &["result"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register variant_store_lookup_total");
    vec
});

static VARIANT_STORE_DEGRADED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "variant_store_degraded_total",
        "Lookups served by recomputation because the variant store was unavailable",
    )
    .expect("create variant_store_degraded_total");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register variant_store_degraded_total");
    counter
});

static VARIANT_STORE_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("variant_store_writes_total", "Variants persisted")
        .expect("create variant_store_writes_total");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register variant_store_writes_total");
    counter
});

static VARIANT_STORE_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("variant_store_write_errors_total", "Failed variant writes")
        .expect("create variant_store_write_errors_total");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register variant_store_write_errors_total");
    counter
});

static VARIANT_EVICTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("variant_store_evictions_total", "Variant store evictions")
        .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register variant_store_evictions_total");
    counter
});

static VARIANT_SWEEP_RUNS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("variant_store_sweep_runs_total", "Variant store sweep runs")
        .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register variant_store_sweep_runs_total");
    counter
});

static VARIANT_SWEEP_EXPIRED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "variant_store_sweep_expired_total",
        "Expired variants removed by the sweeper",
    )
    .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register variant_store_sweep_expired_total");
    counter
});

static VARIANT_SWEEP_BYTES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "variant_store_sweep_bytes_reclaimed_total",
        "Bytes reclaimed by the variant store sweeper",
    )
    .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register variant_store_sweep_bytes_reclaimed_total");
    counter
});

static VARIANT_CLEANUP_DIRS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "variant_store_cleanup_dirs_total",
        "Old variant store layouts removed after a version change",
    )
    .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register variant_store_cleanup_dirs_total");
    counter
});

static TRANSFORM_CALLS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let vec = IntCounterVec::new(
        Opts::new("transform_calls_total", "Transform service calls by outcome"),
        &["outcome"],
    )
    .expect("create transform_calls_total");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register transform_calls_total");
    vec
});

static TRANSFORM_UNAUTHORIZED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "transform_unauthorized_total",
        "Transform requests rejected for a missing or wrong secret",
    )
    .expect("create transform_unauthorized_total");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register transform_unauthorized_total");
    counter
});

fn latency_buckets() -> Vec<f64> {
    // Transform calls dominate the tail.
    vec![
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
    ]
}

const METRICS_MAX_REQUEST_BYTES: usize = 8192;
const METRICS_READ_TIMEOUT: Duration = Duration::from_secs(5);

fn status_class(status: u16) -> &'static str {
    match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}

pub fn record_request(
    listener: &str,
    route: &str,
    method: &str,
    status: StatusCode,
    elapsed: Duration,
) {
    let route = if route.is_empty() { "none" } else { route };
    let method = if method.is_empty() { "unknown" } else { method };
    REQUESTS_TOTAL
        .with_label_values(&[listener, route, status_class(status.as_u16())])
        .inc();
    REQUEST_METHOD_TOTAL.with_label_values(&[method]).inc();
    REQUEST_LATENCY_SECONDS
        .with_label_values(&[listener, route])
        .observe(elapsed.as_secs_f64());
}

pub fn record_edge_lookup(result: &str) {
    EDGE_CACHE_LOOKUP_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_variant_lookup(result: &str) {
    VARIANT_LOOKUP_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_store_degraded() {
    VARIANT_STORE_DEGRADED_TOTAL.inc();
}

pub fn record_variant_store() {
    VARIANT_STORE_TOTAL.inc();
}

pub fn record_variant_store_error() {
    VARIANT_STORE_ERRORS_TOTAL.inc();
}

pub fn record_variant_eviction() {
    VARIANT_EVICTIONS_TOTAL.inc();
}

pub fn record_variant_sweep(removed: u64, bytes: u64) {
    VARIANT_SWEEP_RUNS_TOTAL.inc();
    if removed > 0 {
        VARIANT_SWEEP_EXPIRED_TOTAL.inc_by(removed);
    }
    if bytes > 0 {
        VARIANT_SWEEP_BYTES_TOTAL.inc_by(bytes);
    }
}

pub fn record_variant_cleanup_dir() {
    VARIANT_CLEANUP_DIRS_TOTAL.inc();
}

pub fn record_transform_call(outcome: &str) {
    TRANSFORM_CALLS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_unauthorized() {
    TRANSFORM_UNAUTHORIZED_TOTAL.inc();
}

/// Registers every metric so zero-valued counters are exported before their first event.
fn register_all() {
    Lazy::force(&REQUESTS_TOTAL);
    Lazy::force(&REQUEST_METHOD_TOTAL);
    Lazy::force(&REQUEST_LATENCY_SECONDS);
    Lazy::force(&EDGE_CACHE_LOOKUP_TOTAL);
    Lazy::force(&VARIANT_LOOKUP_TOTAL);
    Lazy::force(&VARIANT_STORE_DEGRADED_TOTAL);
    Lazy::force(&VARIANT_STORE_TOTAL);
    Lazy::force(&VARIANT_STORE_ERRORS_TOTAL);
    Lazy::force(&VARIANT_EVICTIONS_TOTAL);
    Lazy::force(&VARIANT_SWEEP_RUNS_TOTAL);
    Lazy::force(&VARIANT_SWEEP_EXPIRED_TOTAL);
    Lazy::force(&VARIANT_SWEEP_BYTES_TOTAL);
    Lazy::force(&VARIANT_CLEANUP_DIRS_TOTAL);
    Lazy::force(&TRANSFORM_CALLS_TOTAL);
    Lazy::force(&TRANSFORM_UNAUTHORIZED_TOTAL);
}

pub fn gather() -> Vec<u8> {
    register_all();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %err, "failed to encode metrics");
    }
    buffer
}

/// Serves the registry as Prometheus text on `GET {path}`.
pub async fn serve(listener: TcpListener, path: String) -> Result<()> {
    let path = if path.is_empty() {
        "/metrics".to_string()
    } else {
        path
    };
    serve_connections(listener, "metrics", move |stream, peer| {
        let path = path.clone();
        async move { handle_stream(stream, peer, &path, METRICS_READ_TIMEOUT).await }
    })
    .await
}

async fn handle_stream<S>(
    stream: S,
    peer: SocketAddr,
    path: &str,
    read_timeout: Duration,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);
    let Some(head) = read_request_head(
        &mut reader,
        peer,
        read_timeout,
        read_timeout,
        METRICS_MAX_REQUEST_BYTES,
    )
    .await?
    else {
        return Ok(());
    };

    let (target, _) = head.path_and_query();
    let response = if head.method != Method::GET && head.method != Method::HEAD {
        HttpResponse::text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
            .with_header(header::ALLOW, HeaderValue::from_static("GET, HEAD"))
    } else if target != path {
        HttpResponse::text(StatusCode::NOT_FOUND, "not found")
    } else {
        let mut response = HttpResponse::new(StatusCode::OK).with_header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        );
        response.body = Bytes::from(gather());
        response
    };
    write_response(&mut write_half, &response, head.method == Method::HEAD, true).await
}
