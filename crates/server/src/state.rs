//! Application state shared across handlers.

use crate::assembler::ChunkAssembler;
use splice_core::config::AppConfig;
use splice_storage::{FragmentStore, ObjectStore};
use std::sync::Arc;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Transient fragment staging.
    pub staging: Arc<dyn FragmentStore>,
    /// Destination for assembled uploads.
    pub objects: Arc<dyn ObjectStore>,
    /// Fragment intake and assembly.
    pub assembler: Arc<ChunkAssembler>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        config: AppConfig,
        staging: Arc<dyn FragmentStore>,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        let assembler = ChunkAssembler::new(
            staging.clone(),
            objects.clone(),
            config.storage.key_prefix(),
            config.server.max_total_chunks,
        );

        Self {
            config: Arc::new(config),
            staging,
            objects,
            assembler: Arc::new(assembler),
        }
    }

    /// Largest fragment payload accepted, in bytes.
    pub fn max_fragment_size(&self) -> u64 {
        self.config.server.max_fragment_size
    }
}
