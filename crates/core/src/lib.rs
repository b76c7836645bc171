//! Core domain types and shared logic for the Splice upload assembler.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Validated file names for logical uploads
//! - Fragment positions and staging keys
//! - Upload sessions and completion detection
//! - The assembly lifecycle
//! - Configuration shared by storage and server

pub mod config;
pub mod error;
pub mod file_name;
pub mod upload;

pub use error::{Error, Result};
pub use file_name::FileName;
pub use upload::{AssemblyState, FragmentKey, FragmentSpec, UploadResponse, UploadSession};

/// Default maximum fragment size: 32 MiB
pub const DEFAULT_MAX_FRAGMENT_SIZE: u64 = 32 * 1024 * 1024;

/// Default maximum number of fragments per upload.
pub const DEFAULT_MAX_TOTAL_CHUNKS: u32 = 100_000;

/// Default staging retention: 1 hour
pub const DEFAULT_RETENTION_SECS: u64 = 60 * 60;

/// Default interval between staging sweeps: 1 hour
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;
