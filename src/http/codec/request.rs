use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use http::{Method, Version};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::time::Instant;
use tracing::debug;

use super::headers::HeaderAccumulator;
use super::line::read_line_with_deadline;

#[derive(Debug)]
pub(crate) struct RequestHead {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: HeaderAccumulator,
}

impl RequestHead {
    /// HTTP/1.1 defaults to persistent connections, HTTP/1.0 to close.
    pub fn keep_alive(&self) -> bool {
        match self.version {
            Version::HTTP_10 => self.headers.wants_keep_alive(),
            _ => !self.headers.wants_connection_close(),
        }
    }

    /// Whether a request body follows the head.
    pub fn has_body(&self) -> bool {
        self.headers.is_chunked() || self.headers.content_length().is_some_and(|len| len > 0)
    }

    /// Splits the origin-form target into path and optional query.
    pub fn path_and_query(&self) -> (&str, Option<&str>) {
        match self.target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (self.target.as_str(), None),
        }
    }
}

/// Waits up to `idle_timeout` for a request to start, then reads its head within
/// `header_timeout`. Returns `None` when the peer closes or stays idle.
pub(crate) async fn read_request_head<S>(
    reader: &mut BufReader<S>,
    peer: SocketAddr,
    idle_timeout: Duration,
    header_timeout: Duration,
    max_header_bytes: usize,
) -> Result<Option<RequestHead>>
where
    S: AsyncRead + Unpin,
{
    let available = match tokio::time::timeout(idle_timeout, reader.fill_buf()).await {
        Ok(Ok(buf)) => buf,
        Ok(Err(err)) => {
            return Err(err).with_context(|| format!("waiting for request data from {peer}"));
        }
        Err(_) => return Ok(None),
    };
    if available.is_empty() {
        return Ok(None);
    }

    let deadline = Instant::now() + header_timeout;
    let mut request_line = String::new();
    let read =
        read_line_with_deadline(reader, &mut request_line, deadline, peer, max_header_bytes)
            .await?;
    if read == 0 {
        debug!(peer = %peer, "connection closed before request line");
        return Ok(None);
    }
    let line = request_line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        bail!("empty request line from {peer}");
    }

    let mut parts = line.split(' ');
    let method = parts
        .next()
        .filter(|part| !part.is_empty())
        .ok_or_else(|| anyhow!("malformed request line: missing method"))?;
    let target = parts
        .next()
        .filter(|part| !part.is_empty())
        .ok_or_else(|| anyhow!("malformed request line: missing target"))?;
    let version = parts
        .next()
        .ok_or_else(|| anyhow!("malformed request line: missing version"))?;
    if parts.next().is_some() {
        bail!("malformed request line: unexpected data");
    }
    let version = match version {
        "HTTP/1.1" => Version::HTTP_11,
        "HTTP/1.0" => Version::HTTP_10,
        other => bail!("invalid HTTP version '{other}'"),
    };
    let method = Method::from_bytes(method.as_bytes())
        .with_context(|| format!("invalid method '{method}'"))?;
    if !target.starts_with('/') {
        bail!("only origin-form request targets are supported");
    }

    let remaining = max_header_bytes.saturating_sub(read);
    let mut headers = HeaderAccumulator::new(remaining);
    let mut header_line = String::new();
    loop {
        let read =
            read_line_with_deadline(reader, &mut header_line, deadline, peer, remaining.max(1))
                .await?;
        if read == 0 {
            bail!("connection closed during request headers from {peer}");
        }
        if !headers
            .push_line(&header_line)
            .with_context(|| format!("invalid header from {peer}"))?
        {
            break;
        }
    }

    Ok(Some(RequestHead {
        method,
        target: target.to_string(),
        version,
        headers,
    }))
}

/// Encodes a bodiless request head for an outbound call.
pub(crate) fn encode_request_head(
    method: &Method,
    target: &str,
    host: &str,
    headers: &[(&str, &str)],
) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(256);
    buffer.extend_from_slice(format!("{method} {target} HTTP/1.1\r\nHost: {host}\r\n").as_bytes());
    for (name, value) in headers {
        buffer.extend_from_slice(name.as_bytes());
        buffer.extend_from_slice(b": ");
        buffer.extend_from_slice(value.as_bytes());
        buffer.extend_from_slice(b"\r\n");
    }
    buffer.extend_from_slice(b"Connection: close\r\n\r\n");
    buffer
}
