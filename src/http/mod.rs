//! Minimal HTTP/1.1 plumbing shared by the edge and transform listeners and the transform
//! client.

pub(crate) mod codec;
mod listener;
pub mod tls;

use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode, header};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

pub(crate) use listener::{bind, serve_connections};

/// Timeouts and size limits applied to every inbound connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub idle_timeout: Duration,
    pub header_timeout: Duration,
    pub max_header_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Plain-text response carrying only a generic reason.
    pub fn text(status: StatusCode, message: &str) -> Self {
        let mut response = Self::new(status);
        response.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response.body = Bytes::from(format!("{message}\n"));
        response
    }

    pub fn with_header(mut self, name: header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

pub(crate) async fn write_response<W>(
    writer: &mut W,
    response: &HttpResponse,
    head_only: bool,
    close: bool,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let head = codec::encode_response_head(
        response.status,
        &response.headers,
        response.body.len() as u64,
        close,
    );
    writer.write_all(&head).await?;
    if !head_only {
        writer.write_all(&response.body).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Resolves once the peer has closed its half of the connection. Pipelined bytes are left
/// buffered for the next request and never complete the future.
pub(crate) async fn peer_closed<S>(reader: &mut BufReader<S>)
where
    S: AsyncRead + Unpin,
{
    match reader.fill_buf().await {
        Ok([]) | Err(_) => {}
        Ok(_) => std::future::pending::<()>().await,
    }
}
