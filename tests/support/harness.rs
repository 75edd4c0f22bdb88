use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;

use imgedge::{Running, cli::LogFormat, settings::Settings, start_with_origin};

use super::dirs::TestDirs;
use super::origin::CountingOrigin;

pub fn default_test_settings(dirs: &TestDirs) -> Settings {
    Settings {
        listen: "127.0.0.1:0".parse().expect("listen addr"),
        origin_dir: dirs.origin_dir.clone(),
        log: LogFormat::Text,
        metrics_listen: None,
        client_timeout: 10,
        max_header_size: 32 * 1024,
        store_transformed_images: true,
        variant_cache_dir: Some(dirs.variant_dir.clone()),
        variant_retention_days: 90,
        variant_cache_control: "max-age=31622400".to_string(),
        cache_max_entries: 1000,
        cache_max_entry_size: 10 * 1024 * 1024,
        cache_total_capacity: 100 * 1024 * 1024,
        cache_sweeper_interval: 300,
        cache_sweeper_batch_size: 100,
        edge_cache_entries: 0,
        cors_enabled: true,
        transform_timeout: 10,
        transform_max_concurrency: 4,
        transform_max_input_bytes: 10 * 1024 * 1024,
        transform_url: None,
        transform_listen: None,
        transform_command: vec!["cat".to_string()],
        secret_token: None,
        secret_token_file: None,
        log_timing: false,
        path_prefix: String::new(),
        max_dimension: 4000,
        behaviors: None,
    }
}

pub struct EdgeHarness {
    pub dirs: TestDirs,
    pub origin: CountingOrigin,
    running: Running,
}

impl EdgeHarness {
    pub async fn spawn<F>(configure: F) -> Result<Self>
    where
        F: FnOnce(&TestDirs, &mut Settings),
    {
        let dirs = TestDirs::new()?;
        let mut settings = default_test_settings(&dirs);
        configure(&dirs, &mut settings);
        settings.validate()?;
        let origin = CountingOrigin::new(dirs.origin_dir.clone());
        let running = start_with_origin(settings, Arc::new(origin.clone())).await?;
        Ok(Self {
            dirs,
            origin,
            running,
        })
    }

    pub fn edge_addr(&self) -> SocketAddr {
        self.running.edge_addr
    }

    pub fn transform_addr(&self) -> Option<SocketAddr> {
        self.running.transform_addr
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.running.metrics_addr
    }
}
