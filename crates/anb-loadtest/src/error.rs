//! Error types for load test configuration and orchestration

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for load test operations
pub type Result<T> = std::result::Result<T, LoadTestError>;

/// Errors that can stop a load test run.
///
/// Individual HTTP failures inside a cycle are not errors at this level; they
/// are carried as [`crate::client::HttpOutcome`] values and recorded as failed
/// samples.
#[derive(Error, Debug)]
pub enum LoadTestError {
    // === Configuration ===
    /// Ramp parameters cannot produce a load profile
    #[error("Invalid load profile: {0}")]
    InvalidProfile(String),

    /// Scenario weight table is malformed
    #[error("Invalid scenario weights: {0}")]
    InvalidWeights(String),

    /// Threshold expression could not be parsed or is inconsistent
    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    /// Any other invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Fixtures ===
    /// A configured fixture could not be read
    #[error("Failed to load fixture {path}: {source}")]
    FixtureUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Uploads are weighted but no fixture is available
    #[error("No video fixtures available but the uploader scenario has weight {weight}")]
    MissingFixtures { weight: f64 },

    // === Infrastructure ===
    /// HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Prometheus export error
    #[error("Metrics export error: {0}")]
    MetricsExport(#[from] prometheus::Error),
}

impl LoadTestError {
    /// Whether the error must abort the run before traffic is generated
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidProfile(_)
                | Self::InvalidWeights(_)
                | Self::InvalidThreshold(_)
                | Self::InvalidConfig(_)
                | Self::FixtureUnreadable { .. }
                | Self::MissingFixtures { .. }
                | Self::ConfigParse(_)
        )
    }

    /// Process exit code used by the CLI for this error
    pub fn exit_code(&self) -> i32 {
        if self.is_fatal() {
            2
        } else {
            1
        }
    }
}
