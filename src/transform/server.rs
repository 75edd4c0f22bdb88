use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use http::{HeaderValue, Method, StatusCode, header};
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use super::{
    SECRET_HEADER, SecretToken, TransformError, TransformOutput, TransformRequest,
    TransformService,
};
use crate::http::codec::{RequestHead, read_request_head};
use crate::http::{ConnectionLimits, HttpResponse, serve_connections, write_response};
use crate::key::CanonicalKey;
use crate::logging::AccessLogBuilder;

const LISTENER: &str = "transform";

/// Serves `GET /{canonical-key}` for the edge router. Requests without the shared secret get
/// 401 before the method or the key is looked at.
pub async fn serve_transform(
    listener: TcpListener,
    token: SecretToken,
    service: Arc<dyn TransformService>,
    limits: ConnectionLimits,
) -> Result<()> {
    let token = Arc::new(token);
    serve_connections(listener, LISTENER, move |stream, peer| {
        handle_connection(stream, peer, token.clone(), service.clone(), limits)
    })
    .await
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    token: Arc<SecretToken>,
    service: Arc<dyn TransformService>,
    limits: ConnectionLimits,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    loop {
        let head = match read_request_head(
            &mut reader,
            peer,
            limits.idle_timeout,
            limits.header_timeout,
            limits.max_header_bytes,
        )
        .await
        {
            Ok(Some(head)) => head,
            Ok(None) => return Ok(()),
            Err(err) => {
                let response = HttpResponse::text(StatusCode::BAD_REQUEST, "bad request");
                write_response(&mut write_half, &response, false, true).await?;
                return Err(err);
            }
        };

        let started = Instant::now();
        let close = !head.keep_alive() || head.has_body();
        let head_only = head.method == Method::HEAD;
        let (response, key, reason) = respond(&head, &token, service.as_ref()).await;
        write_response(&mut write_half, &response, head_only, close).await?;

        let mut log = AccessLogBuilder::new(LISTENER, peer)
            .method(head.method.as_str())
            .path(head.target.as_str())
            .route("transform")
            .status(response.status)
            .bytes_out(if head_only { 0 } else { response.body.len() as u64 })
            .elapsed(started.elapsed());
        if let Some(key) = key {
            log = log.key(key);
        }
        if let Some(reason) = reason {
            log = log.error_reason(reason);
        }
        log.log();

        if close {
            debug!(peer = %peer, "closing transform connection");
            return Ok(());
        }
    }
}

async fn respond(
    head: &RequestHead,
    token: &SecretToken,
    service: &dyn TransformService,
) -> (HttpResponse, Option<String>, Option<&'static str>) {
    let secret = head.headers.get(SECRET_HEADER);
    if !token.admits(secret) {
        crate::metrics::record_unauthorized();
        warn!(
            request_target = %head.target,
            secret_present = secret.is_some(),
            "rejected direct transform request without valid secret"
        );
        let err = TransformError::Unauthorized;
        return (error_response(&err), None, Some(err.label()));
    }
    if head.method != Method::GET && head.method != Method::HEAD {
        let response = HttpResponse::text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
            .with_header(header::ALLOW, HeaderValue::from_static("GET, HEAD"));
        return (response, None, Some("method_not_allowed"));
    }
    let (path, query) = head.path_and_query();
    let text = match query {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };
    let key = match CanonicalKey::parse(&text) {
        Ok(key) => key,
        Err(_) => {
            return (
                HttpResponse::text(StatusCode::BAD_REQUEST, "malformed key"),
                None,
                Some("malformed_key"),
            );
        }
    };

    let result = service.transform(TransformRequest::new(&key, secret)).await;
    let key_text = Some(key.as_str().to_string());
    match result {
        Ok(output) => (ok_response(output), key_text, None),
        Err(err) => (error_response(&err), key_text, Some(err.label())),
    }
}

fn ok_response(output: TransformOutput) -> HttpResponse {
    let mut response = HttpResponse::new(StatusCode::OK);
    if let Ok(value) = HeaderValue::from_str(&output.content_type) {
        response.headers.insert(header::CONTENT_TYPE, value);
    }
    if let Some(cache_control) = output.cache_control.as_deref()
        && let Ok(value) = HeaderValue::from_str(cache_control)
    {
        response.headers.insert(header::CACHE_CONTROL, value);
    }
    response.body = output.body;
    response
}

/// Maps transform failures onto status codes. Bodies carry only a generic reason.
pub(super) fn error_response(err: &TransformError) -> HttpResponse {
    match err {
        TransformError::Unauthorized => HttpResponse::text(StatusCode::UNAUTHORIZED, "unauthorized"),
        TransformError::OriginalNotFound => HttpResponse::text(StatusCode::NOT_FOUND, "not found"),
        TransformError::UnsupportedFormat(_) => {
            HttpResponse::text(StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported format")
        }
        TransformError::ComputeFailure(_) | TransformError::Timeout => {
            HttpResponse::text(StatusCode::INTERNAL_SERVER_ERROR, "transform failed")
        }
    }
}
