use serde::Deserialize;
use std::time::Duration;

use crate::utils::retry::RetryConfig;

// ============================================================================
// Runtime Configuration
// ============================================================================
//
// Loaded from `ES_RUNTIME__*` environment variables, optionally layered over
// a config file. Nested keys use `__`, e.g. `ES_RUNTIME__SCYLLA__KNOWN_NODE`.
//
// ============================================================================

const ENV_PREFIX: &str = "ES_RUNTIME";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub retry: RetrySettings,

    /// Absent means the in-memory backend
    #[serde(default)]
    pub scylla: Option<ScyllaConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,

    #[serde(default = "default_true")]
    pub with_thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            with_thread_ids: default_true(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            multiplier: settings.multiplier,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScyllaConfig {
    #[serde(default = "default_known_node")]
    pub known_node: String,

    #[serde(default = "default_keyspace")]
    pub keyspace: String,

    #[serde(default = "default_replication_factor")]
    pub replication_factor: u32,
}

impl Default for ScyllaConfig {
    fn default() -> Self {
        Self {
            known_node: default_known_node(),
            keyspace: default_keyspace(),
            replication_factor: default_replication_factor(),
        }
    }
}

fn default_log_filter() -> String {
    "info,es_runtime=debug".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_known_node() -> String {
    "127.0.0.1:9042".to_string()
}

fn default_keyspace() -> String {
    "es_runtime".to_string()
}

fn default_replication_factor() -> u32 {
    1
}

impl RuntimeConfig {
    /// Load configuration from the environment.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(environment())
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Load from a config file, with the environment taking precedence.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(environment())
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn from_toml_str(toml: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::from(&self.retry)
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}
