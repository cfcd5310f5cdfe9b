//! Error types for AutoPilot.

use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, AutopilotError>;

#[derive(Debug, Error)]
pub enum AutopilotError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Security error: {0}")]
    Security(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl AutopilotError {
    /// True for errors caused by the caller rather than by us or a dependency.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Invalid(_) | Self::Security(_))
    }
}
