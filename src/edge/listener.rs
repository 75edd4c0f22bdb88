use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use http::{Method, StatusCode};
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use super::{EdgeRequest, EdgeRouter, error_response};
use crate::http::codec::{RequestHead, read_request_head};
use crate::http::{ConnectionLimits, peer_closed, serve_connections, write_response};
use crate::logging::AccessLogBuilder;

const LISTENER: &str = "edge";

/// Reported in the access log when the client goes away before its response is ready.
const CLIENT_CLOSED: u16 = 499;

pub async fn serve_edge(
    listener: TcpListener,
    router: Arc<EdgeRouter>,
    limits: ConnectionLimits,
) -> Result<()> {
    serve_connections(listener, LISTENER, move |stream, peer| {
        handle_connection(stream, peer, router.clone(), limits)
    })
    .await
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Arc<EdgeRouter>,
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
                let response = error_response(None, StatusCode::BAD_REQUEST);
                write_response(&mut write_half, &response, false, true).await?;
                return Err(err);
            }
        };

        let started = Instant::now();
        let close = !head.keep_alive() || head.has_body();
        let head_only = head.method == Method::HEAD;
        let request = edge_request(&head);

        // Dropping the router future on disconnect cancels the lookup and any transform call.
        let handled = tokio::select! {
            handled = router.handle(&request) => Some(handled),
            _ = peer_closed(&mut reader) => None,
        };

        let log = AccessLogBuilder::new(LISTENER, peer)
            .method(head.method.as_str())
            .path(head.target.as_str());
        let Some(handled) = handled else {
            debug!(peer = %peer, path = %request.path, "client closed connection before response");
            log.status(StatusCode::from_u16(CLIENT_CLOSED).unwrap_or(StatusCode::BAD_REQUEST))
                .error_reason("client_closed")
                .elapsed(started.elapsed())
                .log();
            return Ok(());
        };

        write_response(&mut write_half, &handled.response, head_only, close).await?;

        let mut log = log
            .route(handled.route)
            .status(handled.response.status)
            .bytes_out(if head_only {
                0
            } else {
                handled.response.body.len() as u64
            })
            .elapsed(started.elapsed());
        if let Some(key) = handled.key {
            log = log.key(key);
        }
        if let Some(cache) = handled.cache {
            log = log.cache(cache.as_str());
        }
        if let Some(reason) = handled.error_reason {
            log = log.error_reason(reason);
        }
        log.log();

        if close {
            debug!(peer = %peer, "closing edge connection");
            return Ok(());
        }
    }
}

fn edge_request(head: &RequestHead) -> EdgeRequest {
    let (path, query) = head.path_and_query();
    EdgeRequest {
        method: head.method.clone(),
        path: path.to_string(),
        query: query.map(str::to_string),
        accept: head.headers.get("accept").map(str::to_string),
    }
}
