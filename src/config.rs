//! Layered configuration: environment variables override a TOML file, which
//! overrides built-in defaults. Mirrors the precedence the agent's own
//! config loader used, generalized to the orchestrator's control knobs
//! (`spec.md` §6).

use std::path::Path;

use serde::Deserialize;

use crate::errors::ConfigError;

/// Control knobs for a worker process, enumerated in `spec.md` §6.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Postgres connection string for the Task Journal.
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Redis connection string for the Queue Store.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Number of parallel workers this process runs.
    #[serde(default = "default_workers_per_process")]
    pub workers_per_process: u32,
    /// Recovery tick period, in seconds.
    #[serde(default = "default_recovery_period_seconds")]
    pub recovery_period_seconds: u64,
    /// Timeout used for handlers that don't declare their own.
    #[serde(default = "default_handler_timeout_seconds")]
    pub default_handler_timeout_seconds: u64,
    /// TTL applied to a group lock; must be >= the longest handler timeout.
    #[serde(default = "default_group_lock_ttl_seconds")]
    pub group_lock_ttl_seconds: u64,
    /// How many active groups a worker samples per claim attempt.
    #[serde(default = "default_active_groups_sample_size")]
    pub active_groups_sample_size: u32,
    /// Bind address for the `api` crate's HTTP server.
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    /// Base URL of the external graph engine's own API. The engine's
    /// internal algorithms are out of scope (`spec.md` §1); this is only
    /// the address [`crate::graph::HttpGraphEngine`] sends the effects of
    /// §4.8 to.
    #[serde(default = "default_graph_engine_url")]
    pub graph_engine_url: String,
}

fn default_database_url() -> String {
    "postgres://localhost/taskyard".to_owned()
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_owned()
}

const fn default_workers_per_process() -> u32 {
    4
}

const fn default_recovery_period_seconds() -> u64 {
    60
}

const fn default_handler_timeout_seconds() -> u64 {
    600
}

const fn default_group_lock_ttl_seconds() -> u64 {
    3600
}

const fn default_active_groups_sample_size() -> u32 {
    5
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_owned()
}

fn default_graph_engine_url() -> String {
    "http://localhost:8090".to_owned()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            redis_url: default_redis_url(),
            workers_per_process: default_workers_per_process(),
            recovery_period_seconds: default_recovery_period_seconds(),
            default_handler_timeout_seconds: default_handler_timeout_seconds(),
            group_lock_ttl_seconds: default_group_lock_ttl_seconds(),
            active_groups_sample_size: default_active_groups_sample_size(),
            api_bind_addr: default_api_bind_addr(),
            graph_engine_url: default_graph_engine_url(),
        }
    }
}

impl Config {
    /// Load configuration: defaults, then `path` if it exists, then
    /// environment variables (`TASKYARD_*`), in that precedence order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `path` exists but is not valid TOML, or if
    /// an environment override cannot be parsed into its target type.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::Invalid(format!("reading {}: {e}", path.display())))?;
            config = toml::from_str(&raw)
                .map_err(|e| ConfigError::Invalid(format!("parsing {}: {e}", path.display())))?;
        }

        if let Ok(v) = std::env::var("TASKYARD_DATABASE_URL") {
            config.database_url = v;
        }
        if let Ok(v) = std::env::var("TASKYARD_REDIS_URL") {
            config.redis_url = v;
        }
        if let Ok(v) = std::env::var("TASKYARD_WORKERS_PER_PROCESS") {
            config.workers_per_process = v
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("TASKYARD_WORKERS_PER_PROCESS: {e}")))?;
        }
        if let Ok(v) = std::env::var("TASKYARD_RECOVERY_PERIOD_SECONDS") {
            config.recovery_period_seconds = v.parse().map_err(|e| {
                ConfigError::Invalid(format!("TASKYARD_RECOVERY_PERIOD_SECONDS: {e}"))
            })?;
        }
        if let Ok(v) = std::env::var("TASKYARD_API_BIND_ADDR") {
            config.api_bind_addr = v;
        }
        if let Ok(v) = std::env::var("TASKYARD_GRAPH_ENGINE_URL") {
            config.graph_engine_url = v;
        }

        Ok(config)
    }

    /// Validate that `group_lock_ttl_seconds` covers
    /// `max_handler_timeout_seconds`, the longest timeout among the
    /// handlers actually registered in this process. Must be called once
    /// the Handler Registry is built: the fallback timeout alone can't
    /// bound a handler's own declared timeout (`spec.md` §6).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the TTL is too short.
    pub fn validate_group_lock_ttl(&self, max_handler_timeout_seconds: u64) -> Result<(), ConfigError> {
        if self.group_lock_ttl_seconds < max_handler_timeout_seconds {
            return Err(ConfigError::Invalid(format!(
                "group_lock_ttl_seconds ({}) must be >= the longest registered handler timeout ({max_handler_timeout_seconds})",
                self.group_lock_ttl_seconds
            )));
        }
        Ok(())
    }
}
