//! Error types for the harvester.
//!
//! Library code returns [`HarvestError`]; the binary wraps it with `anyhow`.

use thiserror::Error;

/// Top-level error type for harvest operations.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Unknown collector identifier or unusable configuration. Fatal at startup.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A collector's candidate sequence faulted.
    #[error("collector {collector} failed: {message}")]
    Collector { collector: String, message: String },

    /// The probing infrastructure itself is unavailable.
    #[error("probe error: {0}")]
    Probe(String),

    /// A failure escaping the orchestrator's join barrier.
    #[error("run infrastructure error: {0}")]
    RunInfrastructure(String),

    /// A completion callback fired for a job that was never recorded.
    #[error("no job record for id {0}")]
    JobNotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl HarvestError {
    /// Create a configuration error from any displayable message.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create a collector error.
    pub fn collector(collector: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Collector {
            collector: collector.into(),
            message: msg.into(),
        }
    }

    /// Whether this is a duplicate-key write against the catalog's unique key.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
            _ => false,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HarvestError>;
