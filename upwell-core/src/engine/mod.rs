//! Batch upload orchestration engine.
//!
//! Actor-model engine that accepts batches of post descriptors, sequences
//! each asset through transcoding (video only) and chunked upload, and
//! reports lifecycle events to the caller. Commands are processed one at a
//! time, making the actor loop the single serialization point for session
//! accounting.

pub mod actor;
pub mod commands;
pub mod core;
pub mod events;
pub mod handle;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;

#[cfg(test)]
mod integration_tests;

pub use actor::spawn_upload_manager;
pub use commands::{AssetStage, BatchSession, UploadCommand, UploadStats};
pub use events::{AssetFailure, UploadEvent};
pub use handle::UploadManagerHandle;
pub use self::core::UploadManager;

use crate::asset::AssetError;
use crate::store::StoreError;

/// Errors surfaced by engine operations.
///
/// Per-asset failures never appear here: they are fully recovered at the
/// engine boundary and reported through `UploadEvent::AssetCompleted`.
#[derive(Debug, thiserror::Error)]
pub enum UploadManagerError {
    /// A batch session already exists; the new batch was rejected with no
    /// side effects
    #[error("An upload batch is already in progress")]
    AlreadyUploading,

    /// Operation requires an active batch but none exists
    #[error("No active upload batch")]
    NoActiveBatch,

    /// Engine actor is no longer running
    #[error("Upload engine has shut down")]
    EngineShutdown,

    /// Descriptor validation failed during a pre-flight estimate
    #[error(transparent)]
    Asset(#[from] AssetError),

    /// Catastrophic record store failure
    #[error("Record store failure: {0}")]
    Store(#[from] StoreError),
}
