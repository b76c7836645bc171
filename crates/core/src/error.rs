//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    #[error("invalid chunk index: {index} (total chunks: {total})")]
    InvalidChunkIndex { index: u32, total: u32 },

    #[error("invalid total chunks: {total} (must be between 1 and {max})")]
    InvalidTotalChunks { total: u32, max: u32 },

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
