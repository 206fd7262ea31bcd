//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid checksum: {0}")]
    InvalidChecksum(String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("not a recognized archive container")]
    NotAnArchive,

    #[error("invalid chunk index {index} (session has {total} chunks)")]
    InvalidChunkIndex { index: u32, total: u32 },

    #[error("chunk size mismatch at index {index}: expected {expected}, got {actual}")]
    ChunkSizeMismatch {
        index: u32,
        expected: u64,
        actual: u64,
    },

    #[error("invalid declared size: {0}")]
    InvalidSize(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
