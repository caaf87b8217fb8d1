//! Command definitions and session state for the upload engine actor.

use std::collections::HashMap;

use tokio::sync::oneshot;

use super::UploadManagerError;
use super::events::AssetFailure;
use crate::asset::{ByteSource, PostDescriptor, PostId};
use crate::config::ProgressConfig;
use crate::progress::ProgressAggregator;
use crate::store::UploadRecord;
use crate::transcode::{TranscodeCoordinator, TranscodeError, TranscodeOutput};
use crate::upload::client::PostDigest;

/// Commands processed by the upload engine actor.
///
/// Public operations carry a response channel; the remaining variants are
/// internal notifications from worker and export tasks. Routing every
/// mutation through one command stream is what serializes batch accounting
/// without locks.
pub enum UploadCommand {
    /// Start a new batch of posts sharing a gallery.
    StartNewUpload {
        posts: Vec<PostDescriptor>,
        gallery_id: String,
        responder: oneshot::Sender<Result<(), UploadManagerError>>,
    },
    /// Scan durable records and resume any interrupted batch.
    CheckCachedUploads {
        responder: oneshot::Sender<Result<usize, UploadManagerError>>,
    },
    /// Remove orphaned temporary files and stale terminal records.
    ClearCachedUploads {
        responder: oneshot::Sender<Result<usize, UploadManagerError>>,
    },
    /// Cancel the active batch, keeping durable state resumable.
    CancelUpload {
        responder: oneshot::Sender<Result<(), UploadManagerError>>,
    },
    /// Pre-flight size computation for a candidate batch.
    EstimateUploadSize {
        posts: Vec<PostDescriptor>,
        responder: oneshot::Sender<Result<u64, UploadManagerError>>,
    },
    /// Shutdown the engine actor gracefully.
    Shutdown { responder: oneshot::Sender<()> },

    /// Export service reported fractional progress for a video.
    TranscodeProgressed { post_id: PostId, fraction: f64 },
    /// Export task finished, successfully or not.
    TranscodeFinished {
        post_id: PostId,
        result: Result<TranscodeOutput, TranscodeError>,
    },
    /// Upload worker had a chunk acknowledged by the remote service.
    ChunkUploaded { post_id: PostId, bytes: u64 },
    /// Upload worker finished: digest acknowledged.
    AssetUploaded { post_id: PostId, digest: PostDigest },
    /// Asset reached terminal failure in some stage.
    AssetFailed {
        post_id: PostId,
        failure: AssetFailure,
    },
    /// Upload worker stopped at a chunk boundary after cancellation.
    WorkerCancelled { post_id: PostId },
}

/// Pipeline stage of an in-flight asset within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetStage {
    /// Accepted, waiting for the transcoding slot
    Queued,
    /// Holding the transcoding slot
    Transcoding,
    /// Upload worker spawned
    Uploading,
}

/// In-flight asset owned by the active session.
#[derive(Debug)]
pub struct AssetEntry {
    /// Working copy of the durable record
    pub record: UploadRecord,
    /// Byte source for the current stage: original asset bytes before
    /// transcoding, transcoded file afterwards
    pub source: ByteSource,
    pub stage: AssetStage,
}

/// State for one active batch.
///
/// Exists only while the batch is in flight or being resumed; dropped when
/// the batch reaches terminal state. Entries leave the map as assets reach
/// terminal state, so the map tracks only in-flight work.
#[derive(Debug)]
pub struct BatchSession {
    pub gallery_id: String,
    pub entries: HashMap<PostId, AssetEntry>,
    pub progress: ProgressAggregator,
    pub transcodes: TranscodeCoordinator,
    /// Spawned upload workers that have not yet reported back
    pub active_workers: usize,
    pub completed: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub cancelled: bool,
}

impl BatchSession {
    /// Creates an empty session for the given gallery.
    pub fn new(gallery_id: String, progress_config: &ProgressConfig) -> Self {
        Self {
            gallery_id,
            entries: HashMap::new(),
            progress: ProgressAggregator::new(progress_config),
            transcodes: TranscodeCoordinator::new(),
            active_workers: 0,
            completed: 0,
            failed: 0,
            abandoned: 0,
            cancelled: false,
        }
    }
}

/// Snapshot of engine state readable without a round-trip to the actor.
///
/// Published by the actor after every state change; `is_uploading` reflects
/// whether a batch session currently exists, including resume scans.
#[derive(Debug, Clone, Default)]
pub struct UploadStats {
    pub is_uploading: bool,
    /// Last emitted overall fraction for the active or most recent batch
    pub overall_progress: f64,
    pub throughput_bps: u64,
    /// Sum of known asset sizes, split below by media kind
    pub total_bytes: u64,
    pub video_bytes: u64,
    pub photo_bytes: u64,
    /// Bytes accounted as done across stages
    pub accounted_bytes: u64,
    pub assets_completed: usize,
    pub assets_failed: usize,
}

impl UploadStats {
    /// Marks the snapshot idle while preserving the final batch numbers.
    pub fn finish(&mut self) {
        self.is_uploading = false;
        self.throughput_bps = 0;
    }
}
