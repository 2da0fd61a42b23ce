//! Error types for the core crate

/// Result type alias using the core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in core utilities
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Settings file could not be parsed
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
