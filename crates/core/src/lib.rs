//! Core domain types for stowage.
//!
//! This crate holds the pieces shared by every other crate:
//! - Content hashes (40-hex SHA-1) identifying stored archives
//! - Archive container sniffing for upload validation
//! - Chunk geometry for resumable multi-chunk uploads
//! - File status as reported by the status probe
//! - Immutable application configuration

pub mod archive;
pub mod chunking;
pub mod config;
pub mod error;
pub mod file;
pub mod hash;

pub use error::{Error, Result};
pub use hash::ContentHash;

/// The sentinel reference kind marking an upload that is not yet attached
/// to anything durable.
pub const TEMPORARY_REF: &str = "temporary";

/// Minimum chunk size accepted for multi-chunk uploads (1 MiB).
pub const MIN_CHUNK_SIZE: u64 = 1024 * 1024;
