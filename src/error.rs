//! Error types for fear-data

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, FearDataError>;

/// Errors that can occur while loading, annotating or reshaping session data
#[derive(Debug, Error)]
pub enum FearDataError {
    #[error("Failed to read experiment config: {0}")]
    ConfigRead(String),

    #[error("Session `{0}` not found in sessions list - check the experiment config")]
    InvalidSession(String),

    #[error("Malformed export: {0}")]
    Format(String),

    #[error("Trial {0} window selected no rows")]
    EmptyWindow(usize),

    #[error("Row counts are not uniform: {0}")]
    NonUniform(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
