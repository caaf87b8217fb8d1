//! Event stream emitted by the upload engine.
//!
//! The original delegate-callback surface is modeled as an explicit event
//! channel: callers receive every lifecycle notification through the
//! receiver returned by `spawn_upload_manager`.

use crate::asset::{AssetError, PostId};
use crate::transcode::TranscodeError;
use crate::upload::client::PostDigest;
use crate::upload::UploadError;

/// Stage-tagged description of why an asset reached terminal failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AssetFailure {
    /// Descriptor validation or asset resolution failed
    #[error(transparent)]
    Malformed(#[from] AssetError),

    /// Export engine failed; never retried
    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    /// Transfer or digest failed beyond the retry budget
    #[error(transparent)]
    Upload(#[from] UploadError),
}

/// Lifecycle notifications for one batch session.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// Batch accepted; per-asset and progress events follow
    BatchStarted { gallery_id: String, assets: usize },

    /// Aggregate progress rose past the emission threshold.
    ///
    /// The fraction sequence within a session never decreases.
    OverallProgress { fraction: f64, throughput_bps: u64 },

    /// Terminal outcome for one asset; fires exactly once per asset
    AssetCompleted {
        post_id: PostId,
        /// Server digest payload on success
        metadata: Option<PostDigest>,
        is_video: bool,
        file_size: u64,
        /// Stage-tagged failure, `None` on success
        error: Option<AssetFailure>,
    },

    /// Every owned asset reached terminal state; fires exactly once
    BatchCompleted { completed: usize, failed: usize },

    /// Caller-initiated cancellation finished draining in-flight work
    BatchCancelled { abandoned: usize },
}
