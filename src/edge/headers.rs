use std::time::SystemTime;

use bytes::Bytes;
use http::{HeaderValue, Method, StatusCode, header};

use crate::http::HttpResponse;
use crate::policy::CompiledBehavior;

pub const EDGE_MARKER_HEADER: &str = "x-image-edge";
pub const EDGE_MARKER: &str = "v1.0";
pub const CACHE_STATUS_HEADER: &str = "x-cache";

const CORS_MAX_AGE: &str = "600";

/// Where an edge response body came from, reported in `x-cache`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    EdgeHit,
    StoreHit,
    TransformMiss,
    Bypass,
}

impl CacheOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            CacheOutcome::EdgeHit => "Hit from edge",
            CacheOutcome::StoreHit => "Hit from store",
            CacheOutcome::TransformMiss => "Miss from transform",
            CacheOutcome::Bypass => "Bypass",
        }
    }
}

/// Body served to the client together with the caching policy it is served under.
pub(crate) struct ServedObject {
    pub body: Bytes,
    pub content_type: String,
    /// `None` when the object must not be cached anywhere.
    pub ttl: Option<u64>,
    pub age: Option<u64>,
    pub last_modified: Option<SystemTime>,
}

pub(crate) fn content_response(
    behavior: &CompiledBehavior,
    object: ServedObject,
    outcome: CacheOutcome,
) -> HttpResponse {
    let mut response = HttpResponse::new(StatusCode::OK);
    let headers = &mut response.headers;
    let content_type = HeaderValue::from_str(&object.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    let cache_control = match object.ttl {
        Some(ttl) => HeaderValue::from_str(&format!("public, max-age={ttl}"))
            .unwrap_or_else(|_| HeaderValue::from_static("no-store")),
        None => HeaderValue::from_static("private, no-store"),
    };
    headers.insert(header::CACHE_CONTROL, cache_control);
    if let Some(age) = object.age {
        headers.insert(header::AGE, HeaderValue::from(age));
    }
    if let Some(modified) = object.last_modified
        && let Ok(value) = HeaderValue::from_str(&httpdate::fmt_http_date(modified))
    {
        headers.insert(header::LAST_MODIFIED, value);
    }
    headers.insert(CACHE_STATUS_HEADER, HeaderValue::from_static(outcome.as_str()));
    response.body = object.body;
    apply_edge_headers(behavior, &mut response);
    response
}

/// Error bodies name only the status; nothing about storage or upstreams leaks out.
pub(crate) fn error_response(behavior: Option<&CompiledBehavior>, status: StatusCode) -> HttpResponse {
    let reason = status.canonical_reason().unwrap_or("error").to_ascii_lowercase();
    let mut response = HttpResponse::text(status, &reason)
        .with_header(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    match behavior {
        Some(behavior) => apply_edge_headers(behavior, &mut response),
        None => {
            response.headers.insert(EDGE_MARKER_HEADER, HeaderValue::from_static(EDGE_MARKER));
        }
    }
    response
}

pub(crate) fn method_not_allowed(behavior: &CompiledBehavior) -> HttpResponse {
    let mut response = error_response(Some(behavior), StatusCode::METHOD_NOT_ALLOWED);
    if let Ok(allow) = HeaderValue::from_str(&allowed_methods(behavior).join(", ")) {
        response.headers.insert(header::ALLOW, allow);
    }
    response
}

/// Answers a CORS preflight without touching any backend.
pub(crate) fn preflight_response(behavior: &CompiledBehavior) -> HttpResponse {
    let mut response = HttpResponse::new(StatusCode::NO_CONTENT);
    apply_edge_headers(behavior, &mut response);
    response
}

/// Methods the edge serves for a behavior: reads only, plus preflight when CORS is on.
pub(crate) fn allowed_methods(behavior: &CompiledBehavior) -> Vec<&'static str> {
    let mut methods: Vec<&'static str> = [(Method::GET, "GET"), (Method::HEAD, "HEAD")]
        .iter()
        .filter(|(method, _)| behavior.methods.allows(method))
        .map(|(_, name)| *name)
        .collect();
    if behavior.cors {
        methods.push("OPTIONS");
    }
    methods
}

fn apply_edge_headers(behavior: &CompiledBehavior, response: &mut HttpResponse) {
    let headers = &mut response.headers;
    headers.insert(EDGE_MARKER_HEADER, HeaderValue::from_static(EDGE_MARKER));
    if behavior.normalizer.is_some() {
        headers.insert(header::VARY, HeaderValue::from_static("Accept"));
    }
    if behavior.cors {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("*"),
        );
        headers.insert(
            header::ACCESS_CONTROL_MAX_AGE,
            HeaderValue::from_static(CORS_MAX_AGE),
        );
    }
}
