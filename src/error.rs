//! Error types for SrsAgent

use thiserror::Error;

/// Result type alias using SrsAgent's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for SrsAgent
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// LLM adapter error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Tool host (MCP bridge) error
    #[error("Tool host error: {0}")]
    ToolHost(String),

    /// Plan format error (unparseable or invalid LLM output)
    #[error("Plan format error: {0}")]
    PlanFormat(String),

    /// Specialist execution error
    #[error("Specialist error: {0}")]
    Specialist(String),

    /// Resume context error
    #[error("Resume error: {0}")]
    Resume(String),

    /// Prompt template error
    #[error("Template error: {0}")]
    Template(String),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Environment variable error
    #[error("Environment error: {0}")]
    Env(#[from] std::env::VarError),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Access denied by the tool access controller
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::Llm(_) | Error::Timeout(_) | Error::ToolHost(_)
        )
    }

    /// Check if error is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_) | Error::NotFound(_) | Error::AccessDenied(_)
        )
    }
}
