//! Error types for the fund manager

use thiserror::Error;

/// Result type alias for advisor operations
pub type Result<T> = std::result::Result<T, AdvisorError>;

#[derive(Error, Debug)]
pub enum AdvisorError {

    // =============================
    // Dispatch Errors
    // =============================

    #[error("Routing ambiguity: supervisor answered {0:?}")]
    RoutingAmbiguity(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Session error: {0}")]
    SessionError(String),

    // =============================
    // Tool Errors
    // =============================

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    #[error("Tool {0} timed out after {1}ms")]
    ToolTimeout(String, u64),

    #[error("Chain error: {0}")]
    ChainError(String),

    // =============================
    // Infrastructure Errors
    // =============================

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
