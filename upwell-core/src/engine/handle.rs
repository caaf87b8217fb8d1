//! Handle for communicating with the upload engine actor.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};

use super::UploadManagerError;
use super::commands::{UploadCommand, UploadStats};
use crate::asset::PostDescriptor;

/// Handle for communicating with the upload engine actor.
///
/// Provides an ergonomic async API for sending commands to the engine.
/// It can be cloned and shared across tasks safely; the application's
/// composition root owns exactly one engine and passes this handle to
/// callers.
#[derive(Clone)]
pub struct UploadManagerHandle {
    sender: mpsc::Sender<UploadCommand>,
    stats: Arc<RwLock<UploadStats>>,
}

impl UploadManagerHandle {
    /// Creates a new handle with the given command sender and shared stats.
    pub fn new(sender: mpsc::Sender<UploadCommand>, stats: Arc<RwLock<UploadStats>>) -> Self {
        Self { sender, stats }
    }

    /// Starts a new upload batch for the given posts and gallery.
    ///
    /// Returns once the batch is accepted and dispatched; all further
    /// signaling arrives on the event receiver. Malformed posts are skipped
    /// individually and reported through `AssetCompleted` events.
    ///
    /// # Errors
    /// - `UploadManagerError::AlreadyUploading` - A batch session exists
    /// - `UploadManagerError::Store` - Durable record creation failed
    pub async fn start_new_upload(
        &self,
        posts: Vec<PostDescriptor>,
        gallery_id: impl Into<String>,
    ) -> Result<(), UploadManagerError> {
        let (responder, rx) = oneshot::channel();
        let cmd = UploadCommand::StartNewUpload {
            posts,
            gallery_id: gallery_id.into(),
            responder,
        };

        self.sender
            .send(cmd)
            .await
            .map_err(|_| UploadManagerError::EngineShutdown)?;

        rx.await.map_err(|_| UploadManagerError::EngineShutdown)?
    }

    /// Returns true iff a batch session is currently active, including
    /// while a startup resume scan is dispatching records.
    ///
    /// Reads a snapshot shared with the actor, so the check does not
    /// round-trip through the command channel.
    pub fn is_uploading(&self) -> bool {
        self.stats.read().is_uploading
    }

    /// Returns the latest engine state snapshot.
    pub fn current_stats(&self) -> UploadStats {
        self.stats.read().clone()
    }

    /// Scans durable records for interrupted uploads and resumes them.
    ///
    /// Returns the number of resumed assets; with nothing to resume, the
    /// temp sandbox is purged instead and zero is returned.
    ///
    /// # Errors
    /// - `UploadManagerError::AlreadyUploading` - A batch session exists
    /// - `UploadManagerError::Store` - Record scan failed
    pub async fn check_cached_uploads(&self) -> Result<usize, UploadManagerError> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(UploadCommand::CheckCachedUploads { responder })
            .await
            .map_err(|_| UploadManagerError::EngineShutdown)?;

        rx.await.map_err(|_| UploadManagerError::EngineShutdown)?
    }

    /// Deletes orphaned temporary files and purges stale terminal records,
    /// returning the number of files removed.
    ///
    /// # Errors
    /// - `UploadManagerError::Store` - Record scan or file deletion failed
    pub async fn clear_cached_uploads(&self) -> Result<usize, UploadManagerError> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(UploadCommand::ClearCachedUploads { responder })
            .await
            .map_err(|_| UploadManagerError::EngineShutdown)?;

        rx.await.map_err(|_| UploadManagerError::EngineShutdown)?
    }

    /// Cancels the active batch.
    ///
    /// Not-yet-started assets are abandoned immediately; in-flight chunk
    /// uploads stop at the next chunk boundary. Durable records survive for
    /// resumption on the next startup. `BatchCancelled` fires once all
    /// in-flight work has drained.
    ///
    /// # Errors
    /// - `UploadManagerError::NoActiveBatch` - Nothing to cancel
    pub async fn cancel_upload(&self) -> Result<(), UploadManagerError> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(UploadCommand::CancelUpload { responder })
            .await
            .map_err(|_| UploadManagerError::EngineShutdown)?;

        rx.await.map_err(|_| UploadManagerError::EngineShutdown)?
    }

    /// Computes the pre-flight total size of a candidate batch.
    ///
    /// Video assets contribute their pre-transcode sizes, which the engine
    /// treats as upper-bound estimates until export completes.
    ///
    /// # Errors
    /// - `UploadManagerError::Asset` - A descriptor is malformed or its
    ///   asset cannot be resolved
    pub async fn estimate_upload_size(
        &self,
        posts: Vec<PostDescriptor>,
    ) -> Result<u64, UploadManagerError> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(UploadCommand::EstimateUploadSize { posts, responder })
            .await
            .map_err(|_| UploadManagerError::EngineShutdown)?;

        rx.await.map_err(|_| UploadManagerError::EngineShutdown)?
    }

    /// Shuts down the engine actor gracefully.
    ///
    /// Durable records of any in-flight batch remain resumable on the next
    /// startup via `check_cached_uploads`.
    ///
    /// # Errors
    /// - `UploadManagerError::EngineShutdown` - Actor already stopped
    pub async fn shutdown(&self) -> Result<(), UploadManagerError> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(UploadCommand::Shutdown { responder })
            .await
            .map_err(|_| UploadManagerError::EngineShutdown)?;

        rx.await.map_err(|_| UploadManagerError::EngineShutdown)
    }

    /// Checks if the engine actor is still running.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }
}
