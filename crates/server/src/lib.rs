//! HTTP server for the Splice chunked upload assembler.
//!
//! This crate provides:
//! - Fragment intake and assembly (`ChunkAssembler`)
//! - The staging sweep
//! - The upload, health, and metrics endpoints

pub mod assembler;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod sweep;

pub use assembler::{AssemblyError, ChunkAssembler, SubmitOutcome};
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
pub use sweep::{SweepStats, run_sweep, spawn_sweeper};
