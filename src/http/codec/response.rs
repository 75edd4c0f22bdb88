use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail, ensure};
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::time::Instant;

use super::headers::HeaderAccumulator;
use super::line::{read_line_with_deadline, remaining_deadline};
use crate::util::timeout_with_context;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

#[derive(Debug)]
pub(crate) struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderAccumulator,
}

/// Encodes a complete response head. `Content-Length` is always emitted from `content_length`,
/// even for `HEAD` responses where no body follows.
pub(crate) fn encode_response_head(
    status: StatusCode,
    headers: &HeaderMap,
    content_length: u64,
    close: bool,
) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(256);
    buffer.extend_from_slice(
        format!(
            "HTTP/1.1 {} {}\r\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        )
        .as_bytes(),
    );
    for (name, value) in headers {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        buffer.extend_from_slice(name.as_str().as_bytes());
        buffer.extend_from_slice(b": ");
        buffer.extend_from_slice(value.as_bytes());
        buffer.extend_from_slice(b"\r\n");
    }
    buffer.extend_from_slice(format!("Content-Length: {content_length}\r\n").as_bytes());
    if close {
        buffer.extend_from_slice(b"Connection: close\r\n");
    }
    buffer.extend_from_slice(b"\r\n");
    buffer
}

pub(crate) async fn read_response_head<S>(
    reader: &mut BufReader<S>,
    timeout_dur: Duration,
    peer: SocketAddr,
    max_header_bytes: usize,
) -> Result<ResponseHead>
where
    S: AsyncRead + Unpin,
{
    ensure!(
        max_header_bytes > 0,
        "max response header size must be greater than zero"
    );
    let deadline = Instant::now() + timeout_dur;
    let mut status_line = String::new();
    let read =
        read_line_with_deadline(reader, &mut status_line, deadline, peer, max_header_bytes)
            .await?;
    if read == 0 {
        bail!("{peer} closed connection before sending status line");
    }
    let status = parse_status_line(status_line.trim_end_matches(['\r', '\n']))?;

    let mut headers = HeaderAccumulator::new(max_header_bytes.saturating_sub(read));
    let mut line = String::new();
    loop {
        let read =
            read_line_with_deadline(reader, &mut line, deadline, peer, max_header_bytes).await?;
        if read == 0 {
            bail!("{peer} closed connection during response headers");
        }
        if !headers
            .push_line(&line)
            .with_context(|| format!("invalid response header from {peer}"))?
        {
            break;
        }
    }
    if headers.is_chunked() {
        bail!("chunked responses from {peer} are not supported");
    }
    Ok(ResponseHead { status, headers })
}

/// Reads a response body framed by `Content-Length`, or until close when absent.
pub(crate) async fn read_response_body<S>(
    reader: &mut BufReader<S>,
    content_length: Option<u64>,
    timeout_dur: Duration,
    max_body_bytes: u64,
) -> Result<Bytes>
where
    S: AsyncRead + Unpin,
{
    let deadline = Instant::now() + timeout_dur;
    let context = "reading response body";
    match content_length {
        Some(length) => {
            ensure!(
                length <= max_body_bytes,
                "response body of {length} bytes exceeds limit of {max_body_bytes}"
            );
            let mut body = vec![0u8; length as usize];
            let remaining = remaining_deadline(deadline, context)?;
            timeout_with_context(remaining, reader.read_exact(&mut body), context).await?;
            Ok(Bytes::from(body))
        }
        None => {
            let mut body = BytesMut::new();
            let mut chunk = [0u8; 8192];
            loop {
                let remaining = remaining_deadline(deadline, context)?;
                let read =
                    timeout_with_context(remaining, reader.read(&mut chunk), context).await?;
                if read == 0 {
                    break;
                }
                ensure!(
                    body.len() as u64 + read as u64 <= max_body_bytes,
                    "response body exceeds limit of {max_body_bytes} bytes"
                );
                body.extend_from_slice(&chunk[..read]);
            }
            Ok(body.freeze())
        }
    }
}

fn parse_status_line(value: &str) -> Result<StatusCode> {
    let mut parts = value.splitn(3, ' ');
    let version = parts
        .next()
        .ok_or_else(|| anyhow!("status line missing HTTP version"))?;
    if version != "HTTP/1.1" && version != "HTTP/1.0" {
        bail!("unsupported HTTP version '{version}' in status line");
    }
    let status = parts
        .next()
        .ok_or_else(|| anyhow!("status line missing status code"))?;
    let code: u16 = status
        .parse()
        .with_context(|| format!("invalid status code '{status}'"))?;
    StatusCode::from_u16(code).map_err(|_| anyhow!("unsupported status code '{code}'"))
}
