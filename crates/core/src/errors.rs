//! Core error types for the enrichment engine.
//!
//! Only failures the caller has to act on are represented here. Background
//! enrichment failures (trigger, poll tick, per-entity failure) are recovered
//! where they happen and reported through events and logs instead.

use thiserror::Error;

/// Type alias for Result using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for the enrichment engine.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to fetch listing: {0}")]
    ListFetch(String),

    #[error("Failed to start enrichment: {0}")]
    Trigger(String),

    #[error("Failed to query enrichment status: {0}")]
    StatusQuery(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid configuration value: {0}")]
    InvalidConfigValue(String),

    #[error("Input validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Session is closed")]
    SessionClosed,

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl Error {
    /// Create an API error from status and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }
}

/// Validation errors for caller-supplied input.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid page number: {0}")]
    InvalidPage(u32),

    #[error("Invalid page size {size}: must be between 1 and {max}")]
    InvalidPageSize { size: u32, max: u32 },

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
