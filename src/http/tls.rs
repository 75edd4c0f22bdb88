use std::sync::Arc;

use anyhow::{Result, ensure};
use rustls::crypto::ring;
use rustls::{RootCertStore, client::ClientConfig};
use rustls_native_certs as native_certs;
use tracing::warn;

/// Client TLS config for outbound HTTPS calls, trusting the system certificate store.
pub fn build_client_config() -> Result<Arc<ClientConfig>> {
    let provider = ring::default_provider();
    let builder = ClientConfig::builder_with_provider(provider.into())
        .with_safe_default_protocol_versions()?;

    let mut root_store = RootCertStore::empty();
    match native_certs::load_native_certs() {
        Ok(certs) => {
            let (added, ignored) = root_store.add_parsable_certificates(certs);
            if ignored > 0 {
                warn!(ignored, "ignored invalid system trust anchors");
            }
            ensure!(
                added > 0,
                "no trust anchors loaded from system locations; install system certificates"
            );
        }
        Err(err) => {
            anyhow::bail!("failed to load system trust anchors: {err}");
        }
    }

    let mut config = builder
        .with_root_certificates(Arc::new(root_store))
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}
