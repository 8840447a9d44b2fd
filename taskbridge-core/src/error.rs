//! Error types for taskbridge-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from link store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("link store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// JSON parse error on load — includes the offending file path.
    #[error("failed to parse link store at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The on-disk store advanced past the in-memory generation; a concurrent
    /// writer got there first. Callers retry the pass with a fresh load.
    #[error("link store at {path} changed underneath us (disk generation {disk}, ours {ours})")]
    Contention {
        path: PathBuf,
        disk: u64,
        ours: u64,
    },

    /// `dirs::home_dir()` returned `None` — cannot locate `~/.taskbridge/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}

/// All errors that can arise from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file did not exist at the expected path.
    #[error("configuration not found at {path}; copy config.yaml.example and fill it in")]
    NotFound { path: PathBuf },

    /// YAML parse error on load — includes file path and line context.
    #[error("failed to parse configuration at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A required key is empty or missing.
    #[error("configuration key '{key}' is missing or empty")]
    MissingKey { key: &'static str },

    /// A key still holds its template placeholder value.
    #[error("configuration key '{key}' still holds placeholder value '{value}'")]
    Placeholder { key: &'static str, value: String },

    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}
