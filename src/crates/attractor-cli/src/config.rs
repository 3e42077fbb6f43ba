//! Optional TOML configuration for the `run`/`serve` subcommands. Override
//! precedence is file defaults, then environment variables, then explicit
//! CLI flags — the same precedence the reference server's
//! `ServerConfig::load` uses, just with an extra tier for flags since this
//! binary is interactive rather than daemon-only.

use std::path::Path;
use std::time::Duration;

use attractor_engine::{RetryPolicy, SchedulerConfig};
use serde::Deserialize;

use crate::error::{CliError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RetryPolicyConfig {
    pub initial_interval_secs: Option<f64>,
    pub backoff_factor: Option<f64>,
    pub max_interval_secs: Option<f64>,
    pub jitter: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub signature_limit: Option<usize>,
    pub stall_check_interval_ms: Option<u64>,
    pub retry: RetryPolicyConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// The full shape of an `attractor` config TOML file. Every field is
/// optional: an absent file, or an absent field within a present file,
/// falls back to engine/CLI defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub scheduler: SchedulerSection,
    pub server: ServerSection,
}

impl CliConfig {
    pub fn from_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|source| CliError::ConfigParse {
            path: "<inline>".to_string(),
            source,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| CliError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| CliError::ConfigParse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Loads `path` if given, else falls back to an all-defaults config
    /// rather than erroring — a missing `--config` simply means "use engine
    /// defaults", unlike the reference server, which requires a file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    /// Builds the scheduler tunables this config implies, letting `RUST_LOG`-style
    /// env vars refine individual fields ahead of any CLI-flag override the
    /// caller applies afterward.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        let mut retry = RetryPolicy::default();
        if let Some(secs) = self.scheduler.retry.initial_interval_secs {
            retry = retry.with_initial_interval(secs);
        }
        if let Some(factor) = self.scheduler.retry.backoff_factor {
            retry = retry.with_backoff_factor(factor);
        }
        if let Some(secs) = self.scheduler.retry.max_interval_secs {
            retry = retry.with_max_interval(secs);
        }
        if let Some(jitter) = self.scheduler.retry.jitter {
            retry = retry.with_jitter(jitter);
        }

        let env_signature_limit = std::env::var("ATTRACTOR_SIGNATURE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok());
        let env_stall_ms = std::env::var("ATTRACTOR_STALL_CHECK_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok());

        SchedulerConfig {
            signature_limit: env_signature_limit
                .or(self.scheduler.signature_limit)
                .unwrap_or(SchedulerConfig::default().signature_limit),
            stall_check_interval: env_stall_ms
                .or(self.scheduler.stall_check_interval_ms)
                .map(Duration::from_millis)
                .unwrap_or(SchedulerConfig::default().stall_check_interval),
            default_retry_policy: retry,
        }
    }

    pub fn server_host(&self) -> String {
        std::env::var("ATTRACTOR_SERVER_HOST")
            .ok()
            .or_else(|| self.server.host.clone())
            .unwrap_or_else(|| "127.0.0.1".to_string())
    }

    pub fn server_port(&self) -> u16 {
        std::env::var("ATTRACTOR_SERVER_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(self.server.port)
            .unwrap_or(8070)
    }
}
