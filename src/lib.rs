pub mod cli;
pub mod config;
pub mod edge;
pub mod http;
pub mod key;
pub mod logging;
pub mod metrics;
pub mod origin;
pub mod policy;
pub mod settings;
pub mod transform;
pub mod util;
pub mod variant;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tokio::task::JoinSet;
use tracing::info;

use crate::{
    edge::{EdgeCache, EdgeRouter, RoutingStrategy, serve_edge},
    origin::{FsOriginStore, OriginStore},
    policy::{CompileOptions, compile_behaviors},
    settings::Settings,
    transform::{
        CommandTransformer, HttpTransformClient, LocalTransformOptions, LocalTransformService,
        SecretGuard, TransformService, serve_transform,
    },
    variant::{DiskStoreOptions, DiskVariantStore, VariantStore},
};

/// Listeners started from one set of settings. Dropping it stops them.
pub struct Running {
    pub edge_addr: SocketAddr,
    pub transform_addr: Option<SocketAddr>,
    pub metrics_addr: Option<SocketAddr>,
    tasks: JoinSet<Result<()>>,
}

impl Running {
    /// Waits until any listener stops, which only happens on error.
    pub async fn wait(mut self) -> Result<()> {
        match self.tasks.join_next().await {
            Some(result) => result.map_err(|err| anyhow!("listener task failed: {err}"))?,
            None => Ok(()),
        }
    }
}

pub async fn run(settings: Settings) -> Result<()> {
    start(settings).await?.wait().await
}

pub async fn start(settings: Settings) -> Result<Running> {
    let origin: Arc<dyn OriginStore> = Arc::new(FsOriginStore::new(settings.origin_dir.clone()));
    start_with_origin(settings, origin).await
}

/// Starts every configured listener, reading originals from `origin`.
pub async fn start_with_origin(
    settings: Settings,
    origin: Arc<dyn OriginStore>,
) -> Result<Running> {
    let limits = settings.connection_limits();
    let mut tasks = JoinSet::new();

    let mut metrics_addr = None;
    if let Some(addr) = settings.metrics_listen {
        let listener = crate::http::bind(addr, "metrics").await?;
        metrics_addr = Some(listener.local_addr()?);
        tasks.spawn(crate::metrics::serve(listener, "/metrics".to_string()));
    }

    let behaviors = compile_behaviors(
        &settings.load_behaviors()?,
        &CompileOptions {
            path_prefix: settings.path_prefix.clone(),
            max_dimension: settings.max_dimension,
            cors_enabled: settings.cors_enabled,
        },
    )?;
    let secret = settings.resolve_secret()?;
    let store = build_variant_store(&settings).await?;

    let mut transform_addr = None;
    let transform: Arc<dyn TransformService> = match &settings.transform_url {
        Some(url) => {
            let tls = if url.starts_with("https://") {
                Some(crate::http::tls::build_client_config()?)
            } else {
                None
            };
            Arc::new(HttpTransformClient::new(
                url,
                tls,
                settings.transform_timeout(),
                settings.transform_max_input_bytes,
            )?)
        }
        None => {
            let transformer = Arc::new(CommandTransformer::new(&settings.transform_command)?);
            let local = LocalTransformService::new(
                origin.clone(),
                transformer,
                store.clone(),
                LocalTransformOptions {
                    max_concurrency: settings.transform_max_concurrency,
                    max_input_bytes: settings.transform_max_input_bytes,
                    cache_control: settings.variant_cache_control.clone(),
                    log_timing: settings.log_timing,
                },
            );
            let guarded: Arc<dyn TransformService> =
                Arc::new(SecretGuard::new(secret.clone(), local));
            if let Some(addr) = settings.transform_listen {
                let listener = crate::http::bind(addr, "transform").await?;
                transform_addr = Some(listener.local_addr()?);
                tasks.spawn(serve_transform(
                    listener,
                    secret.clone(),
                    guarded.clone(),
                    limits,
                ));
            }
            guarded
        }
    };

    let strategy = match store {
        Some(store) => RoutingStrategy::CacheFirst(store),
        None => RoutingStrategy::ComputeOnly,
    };
    info!(
        strategy = strategy.as_str(),
        remote_transform = settings.transform_url.is_some(),
        "edge router configured"
    );
    let router = EdgeRouter::new(behaviors, strategy, origin, transform)
        .with_secret(secret)
        .with_transform_timeout(settings.transform_timeout())
        .with_edge_cache(EdgeCache::new(settings.edge_cache_entries));

    let listener = crate::http::bind(settings.listen, "edge").await?;
    let edge_addr = listener.local_addr()?;
    tasks.spawn(serve_edge(listener, Arc::new(router), limits));

    Ok(Running {
        edge_addr,
        transform_addr,
        metrics_addr,
        tasks,
    })
}

async fn build_variant_store(settings: &Settings) -> Result<Option<Arc<dyn VariantStore>>> {
    if !settings.store_transformed_images {
        return Ok(None);
    }
    let dir = settings
        .variant_cache_dir
        .clone()
        .context("variant_cache_dir is required when store_transformed_images is enabled")?;
    let store = DiskVariantStore::new(
        dir,
        DiskStoreOptions {
            retention: settings.variant_retention(),
            max_entries: settings.cache_max_entries,
            max_entry_size: settings.cache_max_entry_size,
            max_bytes: settings.cache_total_capacity,
            sweeper_interval: settings.cache_sweeper_interval(),
            sweeper_batch_size: settings.cache_sweeper_batch_size,
        },
    )
    .await?;
    Ok(Some(Arc::new(store)))
}
