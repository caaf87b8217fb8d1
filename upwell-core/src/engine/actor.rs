//! Actor implementation for the upload engine.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use super::commands::{UploadCommand, UploadStats};
use super::core::UploadManager;
use super::events::UploadEvent;
use super::handle::UploadManagerHandle;
use crate::asset::AssetResolver;
use crate::config::UpwellConfig;
use crate::store::RecordStore;
use crate::transcode::TranscodeService;
use crate::upload::client::UploadApiClient;

/// Spawns the upload engine actor and returns its handle plus the event
/// receiver carrying all batch lifecycle notifications.
///
/// The engine processes commands sequentially, so worker callbacks never
/// race on session state. The handle can be cloned freely; the event
/// receiver belongs to the single consumer driving caller-side reporting.
/// The application's composition root calls this once and owns the pair
/// for the life of the process.
pub fn spawn_upload_manager<A, T, U, S>(
    config: UpwellConfig,
    resolver: Arc<A>,
    transcoder: Arc<T>,
    client: Arc<U>,
    store: Arc<S>,
) -> (UploadManagerHandle, mpsc::UnboundedReceiver<UploadEvent>)
where
    A: AssetResolver + 'static,
    T: TranscodeService + 'static,
    U: UploadApiClient + 'static,
    S: RecordStore + 'static,
{
    let (sender, receiver) = mpsc::channel(100);
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let stats = Arc::new(RwLock::new(UploadStats::default()));

    let engine = UploadManager::new(
        config,
        resolver,
        transcoder,
        client,
        store,
        internal_tx,
        events_tx,
        Arc::clone(&stats),
    );

    tokio::spawn(async move {
        run_actor_loop(engine, receiver, internal_rx).await;
    });

    (UploadManagerHandle::new(sender, stats), events_rx)
}

/// Runs the main actor message processing loop.
///
/// Processes public commands and internal worker notifications one by one
/// in order, ensuring consistent session state without locks. The loop
/// continues until the command channel closes or a shutdown command is
/// received.
async fn run_actor_loop<A, T, U, S>(
    mut engine: UploadManager<A, T, U, S>,
    mut receiver: mpsc::Receiver<UploadCommand>,
    mut internal_rx: mpsc::UnboundedReceiver<UploadCommand>,
) where
    A: AssetResolver + 'static,
    T: TranscodeService + 'static,
    U: UploadApiClient + 'static,
    S: RecordStore + 'static,
{
    tracing::debug!("Upload engine actor started");

    loop {
        tokio::select! {
            Some(command) = receiver.recv() => {
                if !handle_command(&mut engine, command).await {
                    break;
                }
            }
            Some(command) = internal_rx.recv() => {
                if !handle_command(&mut engine, command).await {
                    break;
                }
            }
            else => break,
        }
    }

    tracing::debug!("Upload engine actor stopped");
}

/// Handles a single command for the upload engine.
/// Returns true to continue processing, false to shutdown.
async fn handle_command<A, T, U, S>(
    engine: &mut UploadManager<A, T, U, S>,
    command: UploadCommand,
) -> bool
where
    A: AssetResolver + 'static,
    T: TranscodeService + 'static,
    U: UploadApiClient + 'static,
    S: RecordStore + 'static,
{
    match command {
        UploadCommand::StartNewUpload {
            posts,
            gallery_id,
            responder,
        } => {
            let result = engine.start_new_upload(posts, gallery_id).await;
            let _ = responder.send(result);
        }

        UploadCommand::CheckCachedUploads { responder } => {
            let result = engine.check_cached_uploads().await;
            let _ = responder.send(result);
        }

        UploadCommand::ClearCachedUploads { responder } => {
            let result = engine.clear_cached_uploads().await;
            let _ = responder.send(result);
        }

        UploadCommand::CancelUpload { responder } => {
            let result = engine.cancel_upload().await;
            let _ = responder.send(result);
        }

        UploadCommand::EstimateUploadSize { posts, responder } => {
            let result = engine.estimate_upload_size(&posts).await;
            let _ = responder.send(result);
        }

        UploadCommand::Shutdown { responder } => {
            tracing::debug!("Upload engine actor shutting down");
            let _ = responder.send(());
            return false; // Signal to break out of the loop
        }

        UploadCommand::TranscodeProgressed { post_id, fraction } => {
            engine.handle_transcode_progress(&post_id, fraction);
        }

        UploadCommand::TranscodeFinished { post_id, result } => {
            engine.handle_transcode_finished(post_id, result).await;
        }

        UploadCommand::ChunkUploaded { post_id, bytes } => {
            engine.handle_chunk_uploaded(&post_id, bytes);
        }

        UploadCommand::AssetUploaded { post_id, digest } => {
            engine.handle_asset_uploaded(post_id, digest).await;
        }

        UploadCommand::AssetFailed { post_id, failure } => {
            engine.handle_asset_failed(post_id, failure).await;
        }

        UploadCommand::WorkerCancelled { post_id } => {
            engine.handle_worker_cancelled(post_id).await;
        }
    }

    true
}
