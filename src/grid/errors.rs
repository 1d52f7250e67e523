//! Grid-specific error types

use thiserror::Error;

/// Errors that can occur in grid trading operations
#[derive(Error, Debug, Clone)]
pub enum GridError {
    #[error("Invalid grid configuration: {0}")]
    InvalidConfig(String),

    #[error("Level invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Order not found: id {0}")]
    OrderNotFound(String),

    #[error("Malformed exchange response: {0}")]
    MalformedResponse(String),

    #[error("Exchange error: {0}")]
    Exchange(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Price unavailable for {0}")]
    PriceUnavailable(String),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: f64, available: f64 },

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("State persistence error: {0}")]
    StatePersistence(String),

    #[error("JSON parse error: {0}")]
    JsonParse(String),
}

impl GridError {
    /// Transient I/O failures are retried on the next tick without touching
    /// level state. Everything else is a logic or data fault.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GridError::Exchange(_)
                | GridError::Http(_)
                | GridError::PriceUnavailable(_)
                | GridError::InsufficientBalance { .. }
                | GridError::OrderRejected(_)
        )
    }
}

impl From<serde_json::Error> for GridError {
    fn from(err: serde_json::Error) -> Self {
        GridError::JsonParse(err.to_string())
    }
}

impl From<std::io::Error> for GridError {
    fn from(err: std::io::Error) -> Self {
        GridError::StatePersistence(err.to_string())
    }
}

impl From<reqwest::Error> for GridError {
    fn from(err: reqwest::Error) -> Self {
        GridError::Http(err.to_string())
    }
}

impl From<config::ConfigError> for GridError {
    fn from(err: config::ConfigError) -> Self {
        GridError::InvalidConfig(err.to_string())
    }
}

/// Result type for grid operations
pub type GridResult<T> = std::result::Result<T, GridError>;
