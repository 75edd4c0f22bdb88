use std::future::Future;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

pub(crate) async fn bind(addr: SocketAddr, label: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {label} listener on {addr}"))?;
    let local_addr = listener.local_addr().unwrap_or(addr);
    info!(address = %local_addr, "{label} listener started");
    Ok(listener)
}

/// Accepts connections forever, running `handler` on its own task for each one.
pub(crate) async fn serve_connections<F, Fut>(
    listener: TcpListener,
    label: &'static str,
    handler: F,
) -> Result<()>
where
    F: Fn(TcpStream, SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                error!(error = %err, listener = label, "failed to accept incoming connection");
                continue;
            }
        };
        debug!(peer = %peer, listener = label, "accepted connection");
        if let Err(err) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %err, "failed to set TCP_NODELAY");
        }
        let connection = handler(stream, peer);
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                debug!(peer = %peer, listener = label, error = %err, "connection closed with error");
            }
        });
    }
}
