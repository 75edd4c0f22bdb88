use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail, ensure};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Deserializer};

use crate::cli::{Cli, LogFormat};
use crate::config::{BehaviorsConfig, load_behaviors};
use crate::http::ConnectionLimits;
use crate::transform::SecretToken;

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

fn default_client_timeout() -> u64 {
    30
}

fn default_max_header_size() -> usize {
    32 * 1024
}

fn default_true() -> bool {
    true
}

fn default_variant_retention_days() -> u64 {
    90
}

fn default_variant_cache_control() -> String {
    "max-age=31622400".to_string()
}

fn default_edge_cache_entries() -> usize {
    1024
}

fn default_transform_timeout() -> u64 {
    60
}

fn default_transform_max_concurrency() -> usize {
    8
}

fn default_transform_max_input_bytes() -> u64 {
    50 * 1024 * 1024 // 50 MiB
}

fn default_max_dimension() -> u32 {
    crate::key::DEFAULT_MAX_DIMENSION
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub listen: SocketAddr,
    pub origin_dir: PathBuf,
    #[serde(default = "default_log_format")]
    pub log: LogFormat,
    #[serde(default)]
    pub metrics_listen: Option<SocketAddr>,
    #[serde(default = "default_client_timeout")]
    pub client_timeout: u64,
    #[serde(default = "default_max_header_size")]
    pub max_header_size: usize,
    /// Selects the cache-first topology; without it every request is computed.
    #[serde(default = "default_true")]
    pub store_transformed_images: bool,
    #[serde(default)]
    pub variant_cache_dir: Option<PathBuf>,
    #[serde(default = "default_variant_retention_days")]
    pub variant_retention_days: u64,
    #[serde(default = "default_variant_cache_control")]
    pub variant_cache_control: String,
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
    #[serde(default = "default_cache_max_entry_size")]
    pub cache_max_entry_size: u64,
    #[serde(default = "default_cache_total_capacity")]
    pub cache_total_capacity: u64,
    #[serde(default = "default_cache_sweeper_interval")]
    pub cache_sweeper_interval: u64,
    #[serde(default = "default_cache_sweeper_batch_size")]
    pub cache_sweeper_batch_size: usize,
    #[serde(default = "default_edge_cache_entries")]
    pub edge_cache_entries: usize,
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    #[serde(default = "default_transform_timeout")]
    pub transform_timeout: u64,
    #[serde(default = "default_transform_max_concurrency")]
    pub transform_max_concurrency: usize,
    #[serde(default = "default_transform_max_input_bytes")]
    pub transform_max_input_bytes: u64,
    /// Remote transform service. When unset the service runs in-process.
    #[serde(default)]
    pub transform_url: Option<String>,
    /// Also expose the in-process transform service on its own listener.
    #[serde(default)]
    pub transform_listen: Option<SocketAddr>,
    #[serde(default)]
    pub transform_command: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub secret_token: Option<SecretToken>,
    #[serde(default)]
    pub secret_token_file: Option<PathBuf>,
    #[serde(default)]
    pub log_timing: bool,
    #[serde(default)]
    pub path_prefix: String,
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
    #[serde(default)]
    pub behaviors: Option<PathBuf>,
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretToken>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(SecretToken::new)
        .transpose()
        .map_err(serde::de::Error::custom)
}

impl Settings {
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = Config::builder();
        let config_path = resolve_config_path(cli)?;

        builder = builder.add_source(File::from(config_path.clone()).required(true));

        builder = builder.add_source(
            Environment::with_prefix("IMGEDGE")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().map_err(to_anyhow)?;
        let mut settings: Settings = cfg.try_deserialize().map_err(to_anyhow)?;
        settings.apply_base_dir(&config_path);
        settings.validate()?;
        Ok(settings)
    }

    /// Loads the behaviors file, or the built-in behaviors when none is configured.
    pub fn load_behaviors(&self) -> Result<BehaviorsConfig> {
        match &self.behaviors {
            Some(path) => load_behaviors(path),
            None => Ok(BehaviorsConfig::builtin()),
        }
    }

    /// The configured secret. In-process deployments without one get a random token.
    pub fn resolve_secret(&self) -> Result<SecretToken> {
        if let Some(token) = &self.secret_token {
            return Ok(token.clone());
        }
        if let Some(path) = &self.secret_token_file {
            return SecretToken::from_file(path);
        }
        ensure!(
            !self.shares_secret_externally(),
            "secret_token or secret_token_file is required when the transform service is remote or exposed"
        );
        Ok(SecretToken::generate())
    }

    fn shares_secret_externally(&self) -> bool {
        self.transform_url.is_some() || self.transform_listen.is_some()
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout)
    }

    pub fn transform_timeout(&self) -> Duration {
        Duration::from_secs(self.transform_timeout)
    }

    pub fn variant_retention(&self) -> Duration {
        Duration::from_secs(self.variant_retention_days.saturating_mul(24 * 60 * 60))
    }

    pub fn cache_sweeper_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweeper_interval)
    }

    pub fn connection_limits(&self) -> ConnectionLimits {
        ConnectionLimits {
            idle_timeout: self.client_timeout(),
            header_timeout: self.client_timeout(),
            max_header_bytes: self.max_header_size,
        }
    }
}

fn to_anyhow(err: ConfigError) -> anyhow::Error {
    anyhow::anyhow!(err)
}

impl Cli {
    pub fn config_path(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

fn resolve_config_path(cli: &Cli) -> Result<PathBuf> {
    if let Some(path) = cli.config_path() {
        return Ok(path.to_path_buf());
    }

    for candidate in default_config_candidates() {
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    bail!(
        "no configuration file provided via --config and none found in default locations: {}",
        default_config_candidates()
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
}

fn default_config_candidates() -> [PathBuf; 2] {
    [
        PathBuf::from("/etc/imgedge/imgedge.toml"),
        PathBuf::from("imgedge.toml"),
    ]
}

impl Settings {
    fn apply_base_dir(&mut self, config_path: &Path) {
        let base_dir = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        self.origin_dir = absolutize(&self.origin_dir, base_dir);
        if let Some(dir) = self.variant_cache_dir.clone() {
            self.variant_cache_dir = Some(absolutize(&dir, base_dir));
        }
        if let Some(path) = self.secret_token_file.clone() {
            self.secret_token_file = Some(absolutize(&path, base_dir));
        }
        if let Some(path) = self.behaviors.clone() {
            self.behaviors = Some(absolutize(&path, base_dir));
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.max_header_size > 0,
            "max_header_size must be greater than 0 (got {})",
            self.max_header_size
        );
        ensure!(
            self.client_timeout > 0,
            "client_timeout must be greater than 0 seconds (got {})",
            self.client_timeout
        );
        ensure!(
            self.transform_timeout > 0,
            "transform_timeout must be greater than 0 seconds (got {})",
            self.transform_timeout
        );
        ensure!(
            self.max_dimension > 0,
            "max_dimension must be greater than 0 (got {})",
            self.max_dimension
        );
        ensure!(
            self.transform_max_input_bytes > 0,
            "transform_max_input_bytes must be greater than 0 (got {})",
            self.transform_max_input_bytes
        );
        ensure!(
            self.secret_token.is_none() || self.secret_token_file.is_none(),
            "secret_token and secret_token_file are mutually exclusive"
        );

        match &self.transform_url {
            Some(_) => {
                ensure!(
                    self.transform_command.is_empty(),
                    "transform_command has no effect when transform_url is set"
                );
                ensure!(
                    self.transform_listen.is_none(),
                    "transform_listen requires the in-process transform service"
                );
            }
            None => {
                ensure!(
                    !self.transform_command.is_empty(),
                    "transform_command is required unless transform_url is set"
                );
                ensure!(
                    self.transform_max_concurrency > 0,
                    "transform_max_concurrency must be greater than 0 (got {})",
                    self.transform_max_concurrency
                );
            }
        }
        if self.shares_secret_externally() {
            ensure!(
                self.secret_token.is_some() || self.secret_token_file.is_some(),
                "secret_token or secret_token_file is required when the transform service is remote or exposed"
            );
        }

        if self.store_transformed_images {
            ensure!(
                self.variant_cache_dir.is_some(),
                "variant_cache_dir is required when store_transformed_images is enabled"
            );
            ensure!(
                self.variant_retention_days > 0,
                "variant_retention_days must be greater than 0 (got {})",
                self.variant_retention_days
            );
            ensure!(
                self.cache_max_entry_size > 0,
                "cache_max_entry_size must be greater than 0 (got {})",
                self.cache_max_entry_size
            );
            ensure!(
                self.cache_max_entries > 0,
                "cache_max_entries must be greater than 0 (got {})",
                self.cache_max_entries
            );
            ensure!(
                self.cache_total_capacity > 0,
                "cache_total_capacity must be greater than 0 (got {})",
                self.cache_total_capacity
            );
            ensure!(
                self.cache_sweeper_interval > 0,
                "cache_sweeper_interval must be greater than 0 seconds (got {})",
                self.cache_sweeper_interval
            );
            ensure!(
                self.cache_sweeper_batch_size > 0,
                "cache_sweeper_batch_size must be greater than 0 (got {})",
                self.cache_sweeper_batch_size
            );
        }
        Ok(())
    }
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn default_cache_max_entry_size() -> u64 {
    10 * 1024 * 1024 // 10 MiB
}

fn default_cache_max_entries() -> usize {
    10_000
}

fn default_cache_total_capacity() -> u64 {
    1024 * 1024 * 1024 // 1 GiB
}

fn default_cache_sweeper_interval() -> u64 {
    300
}

fn default_cache_sweeper_batch_size() -> usize {
    1000
}
