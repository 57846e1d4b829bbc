//! Error handling for bao-install
//!
//! Centralized error type built with thiserror. Library code returns
//! these; the binary wraps them with anyhow context.

use thiserror::Error;

/// Main error type for provisioning operations
#[derive(Error, Debug)]
pub enum BaoInstallError {
    /// IO errors (file copies, permission changes, reading keys)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors (loading, parsing)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors (user names, URLs, paths)
    #[error("Validation error: {0}")]
    Validation(String),

    /// A provisioning step failed
    #[error("Step '{step}' failed: {message}")]
    Step { step: String, message: String },

    /// System errors (user lookup, ownership, process spawning)
    #[error("System error: {0}")]
    System(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for provisioning operations
pub type Result<T> = std::result::Result<T, BaoInstallError>;

impl BaoInstallError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a step failure
    pub fn step(step: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Step {
            step: step.into(),
            message: msg.into(),
        }
    }

    /// Create a system error
    pub fn system(msg: impl Into<String>) -> Self {
        Self::System(msg.into())
    }
}

impl From<nix::Error> for BaoInstallError {
    fn from(err: nix::Error) -> Self {
        Self::System(err.desc().to_string())
    }
}
