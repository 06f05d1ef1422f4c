//! Error types for Mail Assist.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors talking to the hosted assistant backend.
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Mailbox provider errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Token expired or revoked")]
    AuthExpired,

    #[error("Token not found at {0}")]
    TokenNotFound(String),

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Failed to decode message {id}: {reason}")]
    Decode { id: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures of a single orchestrated assistant turn.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("{0}")]
    Backend(#[from] AssistantError),

    #[error("Turn {run_id} did not reach a terminal status within {deadline:?}")]
    Timeout { run_id: String, deadline: Duration },

    #[error("Turn {run_id} was cancelled before completion")]
    Cancelled { run_id: String },

    #[error("Invalid arguments for tool {name}: {reason}")]
    InvalidToolArguments { name: String, reason: String },

    #[error("Failed to submit tool outputs: {0}")]
    Submission(AssistantError),
}
