use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use http::{Method, StatusCode, Uri};
use rustls::ClientConfig;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use super::{SECRET_HEADER, TransformError, TransformOutput, TransformRequest, TransformService};
use crate::http::codec::{encode_request_head, read_response_body, read_response_head};

const MAX_RESPONSE_HEADER_BYTES: usize = 16 * 1024;

/// Calls a remote transform service over HTTP/1.1, one connection per request.
#[derive(Clone)]
pub struct HttpTransformClient {
    host: String,
    port: u16,
    authority: String,
    base_path: String,
    tls: Option<TlsConnector>,
    io_timeout: Duration,
    max_body_bytes: u64,
}

impl HttpTransformClient {
    pub fn new(
        url: &str,
        tls_config: Option<Arc<ClientConfig>>,
        io_timeout: Duration,
        max_body_bytes: u64,
    ) -> Result<Self> {
        let uri: Uri = url
            .parse()
            .with_context(|| format!("invalid transform url '{url}'"))?;
        let secure = match uri.scheme_str() {
            Some("http") => false,
            Some("https") => true,
            Some(other) => bail!("unsupported transform url scheme '{other}'"),
            None => bail!("transform url '{url}' must include a scheme"),
        };
        let host = uri
            .host()
            .ok_or_else(|| anyhow!("transform url '{url}' must include a host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = uri.port_u16().unwrap_or(if secure { 443 } else { 80 });
        let authority = uri
            .authority()
            .map(|authority| authority.as_str().to_string())
            .unwrap_or_else(|| host.clone());
        let tls = if secure {
            let config = tls_config
                .ok_or_else(|| anyhow!("https transform url requires a TLS client config"))?;
            Some(TlsConnector::from(config))
        } else {
            None
        };
        Ok(Self {
            host,
            port,
            authority,
            base_path: uri.path().trim_end_matches('/').to_string(),
            tls,
            io_timeout,
            max_body_bytes,
        })
    }

    async fn call(&self, request: TransformRequest<'_>) -> Result<(StatusCode, TransformOutput)> {
        let stream = tokio::time::timeout(
            self.io_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| anyhow!("timed out connecting to {}", self.authority))?
        .with_context(|| format!("failed to connect to {}", self.authority))?;
        stream.set_nodelay(true).ok();
        let peer = stream.peer_addr()?;

        let target = format!("{}/{}", self.base_path, request.key.as_str());
        let mut headers = Vec::with_capacity(1);
        if let Some(secret) = request.secret {
            headers.push((SECRET_HEADER, secret));
        }
        let head = encode_request_head(&Method::GET, &target, &self.authority, &headers);

        match &self.tls {
            Some(connector) => {
                let server_name = ServerName::try_from(self.host.clone())
                    .map_err(|_| anyhow!("invalid TLS server name '{}'", self.host))?;
                let tls_stream = tokio::time::timeout(
                    self.io_timeout,
                    connector.connect(server_name, stream),
                )
                .await
                .map_err(|_| anyhow!("timed out during TLS handshake with {}", self.authority))?
                .with_context(|| format!("TLS handshake with {} failed", self.authority))?;
                self.exchange(tls_stream, peer, &head).await
            }
            None => self.exchange(stream, peer, &head).await,
        }
    }

    async fn exchange<S>(
        &self,
        mut stream: S,
        peer: SocketAddr,
        head: &[u8],
    ) -> Result<(StatusCode, TransformOutput)>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        stream.write_all(head).await?;
        stream.flush().await?;
        let mut reader = BufReader::new(stream);
        let response =
            read_response_head(&mut reader, self.io_timeout, peer, MAX_RESPONSE_HEADER_BYTES)
                .await?;
        let body = read_response_body(
            &mut reader,
            response.headers.content_length(),
            self.io_timeout,
            self.max_body_bytes,
        )
        .await?;
        let content_type = response
            .headers
            .get("content-type")
            .unwrap_or("application/octet-stream")
            .to_string();
        let mut output = TransformOutput::new(body, content_type);
        output.cache_control = response.headers.get("cache-control").map(str::to_string);
        Ok((response.status, output))
    }
}

#[async_trait]
impl TransformService for HttpTransformClient {
    async fn transform(
        &self,
        request: TransformRequest<'_>,
    ) -> Result<TransformOutput, TransformError> {
        let (status, output) = self.call(request).await.map_err(|err| {
            warn!(key = %request.key, error = %err, "transform service call failed");
            TransformError::ComputeFailure("transform service unreachable".into())
        })?;
        debug!(key = %request.key, status = status.as_u16(), "transform service responded");
        match status {
            StatusCode::OK => Ok(output),
            StatusCode::UNAUTHORIZED => Err(TransformError::Unauthorized),
            StatusCode::NOT_FOUND => Err(TransformError::OriginalNotFound),
            StatusCode::UNSUPPORTED_MEDIA_TYPE => Err(TransformError::UnsupportedFormat(
                "rejected by transform service".into(),
            )),
            other => Err(TransformError::ComputeFailure(format!(
                "transform service returned {}",
                other.as_u16()
            ))),
        }
    }
}
