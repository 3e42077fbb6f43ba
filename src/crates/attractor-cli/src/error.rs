//! Error type for CLI-local concerns (config loading, graph loading). The
//! deeper library errors (`CoreError`, `StoreError`, `EngineError`,
//! `SupervisorError`) are wrapped in the `anyhow::Error` the subcommand
//! handlers return — this enum only covers what's new at the binary
//! boundary.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to read graph file {path}: {source}")]
    GraphRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse graph file {path}: {source}")]
    GraphParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Core(#[from] attractor_core::CoreError),
}
