//! Core upload engine implementation for the actor model.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::try_join_all;
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};

use super::UploadManagerError;
use super::commands::{AssetEntry, AssetStage, BatchSession, UploadCommand, UploadStats};
use super::events::{AssetFailure, UploadEvent};
use crate::asset::{AssetResolver, ByteSource, MediaKind, PostDescriptor, PostId};
use crate::config::UpwellConfig;
use crate::progress::ProgressStage;
use crate::store::{RecordState, RecordStore, TempFileStore, UploadRecord};
use crate::transcode::{TranscodeConstraints, TranscodeError, TranscodeOutput, TranscodeService};
use crate::upload::client::{PostDigest, UploadApiClient};
use crate::upload::worker::{UploadWorkerParams, run_upload_worker};

/// Core upload engine implementation.
///
/// This is the private implementation that runs inside the actor. It owns
/// the single batch session, the transcoding slot, and all completion
/// accounting. The engine is single-threaded and processes commands
/// sequentially; upload workers and export tasks report back exclusively
/// through the internal command channel.
pub struct UploadManager<A, T, U, S> {
    config: UpwellConfig,
    /// Local media library collaborator
    resolver: Arc<A>,
    /// External export engine
    transcoder: Arc<T>,
    /// Remote upload API client
    client: Arc<U>,
    /// Durable record store; referenced, not owned, by the session
    store: Arc<S>,
    /// Temp sandbox for transcoded output
    temp_files: TempFileStore,
    /// Fixed output policy applied to every export
    constraints: TranscodeConstraints,
    /// The single active batch, if any
    session: Option<BatchSession>,
    /// Channel workers and export tasks report back on
    internal_tx: mpsc::UnboundedSender<UploadCommand>,
    /// Lifecycle notifications to the caller
    events_tx: mpsc::UnboundedSender<UploadEvent>,
    /// Snapshot shared with handles for lock-free `is_uploading` checks
    stats: Arc<RwLock<UploadStats>>,
    /// Cancellation signal observed by workers at chunk boundaries
    cancel_tx: watch::Sender<bool>,
}

impl<A, T, U, S> UploadManager<A, T, U, S>
where
    A: AssetResolver + 'static,
    T: TranscodeService + 'static,
    U: UploadApiClient + 'static,
    S: RecordStore + 'static,
{
    /// Creates a new upload engine with the provided collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: UpwellConfig,
        resolver: Arc<A>,
        transcoder: Arc<T>,
        client: Arc<U>,
        store: Arc<S>,
        internal_tx: mpsc::UnboundedSender<UploadCommand>,
        events_tx: mpsc::UnboundedSender<UploadEvent>,
        stats: Arc<RwLock<UploadStats>>,
    ) -> Self {
        let temp_files = TempFileStore::new(config.storage.temp_dir.clone());
        let (cancel_tx, _) = watch::channel(false);

        Self {
            config,
            resolver,
            transcoder,
            client,
            store,
            temp_files,
            constraints: TranscodeConstraints::default(),
            session: None,
            internal_tx,
            events_tx,
            stats,
            cancel_tx,
        }
    }

    /// Starts a new upload batch.
    ///
    /// Rejects with `AlreadyUploading` when a session exists. Each valid
    /// post gets a durable record and enters the pipeline; malformed or
    /// unresolvable posts are skipped individually and reported through
    /// `AssetCompleted` events while the rest of the batch continues.
    ///
    /// # Errors
    /// - `UploadManagerError::AlreadyUploading` - A batch session exists
    /// - `UploadManagerError::Store` - Durable record creation failed; the
    ///   batch is torn down
    pub async fn start_new_upload(
        &mut self,
        posts: Vec<PostDescriptor>,
        gallery_id: String,
    ) -> Result<(), UploadManagerError> {
        if self.session.is_some() {
            return Err(UploadManagerError::AlreadyUploading);
        }

        tracing::info!(
            "Starting upload batch for gallery {} ({} posts)",
            gallery_id,
            posts.len()
        );

        self.cancel_tx.send_replace(false);
        self.session = Some(BatchSession::new(
            gallery_id.clone(),
            &self.config.progress,
        ));
        self.reset_stats();
        self.emit(UploadEvent::BatchStarted {
            gallery_id: gallery_id.clone(),
            assets: posts.len(),
        });

        for descriptor in posts {
            let post_id = descriptor.post_id.clone();

            if let Err(error) = descriptor.validate() {
                self.report_skipped_post(post_id, AssetFailure::Malformed(error));
                continue;
            }

            let resolved = match self.resolver.resolve(&descriptor.asset).await {
                Ok(resolved) => resolved,
                Err(error) => {
                    self.report_skipped_post(post_id, AssetFailure::Malformed(error));
                    continue;
                }
            };

            let record = UploadRecord::new(
                post_id,
                descriptor.key,
                descriptor.asset,
                resolved.kind,
                resolved.size,
                gallery_id.clone(),
            );

            if let Err(error) = self.store.save(&record).await {
                self.abort_batch_accept().await;
                return Err(error.into());
            }

            self.admit_entry(record, resolved.source);
        }

        self.start_next_transcode().await;
        self.maybe_finish_batch();
        self.publish_stats();
        Ok(())
    }

    /// Scans durable records for interrupted uploads and resumes them.
    ///
    /// With nothing to resume, delegates to `clear_cached_uploads`. Resumed
    /// assets skip stages whose output survives: a video with a valid temp
    /// file goes straight to upload, and chunk transfers restart at the
    /// persisted acknowledged offset.
    ///
    /// # Errors
    /// - `UploadManagerError::AlreadyUploading` - A batch session exists
    /// - `UploadManagerError::Store` - Record scan failed
    pub async fn check_cached_uploads(&mut self) -> Result<usize, UploadManagerError> {
        if self.session.is_some() {
            return Err(UploadManagerError::AlreadyUploading);
        }

        let records = self.store.fetch_incomplete().await?;
        if records.is_empty() {
            tracing::info!("No cached uploads found; clearing temp sandbox");
            self.clear_cached_uploads().await?;
            return Ok(0);
        }

        let gallery_id = records[0].gallery_id.clone();
        tracing::info!(
            "Resuming {} cached uploads for gallery {}",
            records.len(),
            gallery_id
        );

        self.cancel_tx.send_replace(false);
        self.session = Some(BatchSession::new(
            gallery_id.clone(),
            &self.config.progress,
        ));
        self.reset_stats();
        self.emit(UploadEvent::BatchStarted {
            gallery_id,
            assets: records.len(),
        });

        let mut resumed = 0;
        for record in records {
            if self.resume_record(record).await {
                resumed += 1;
            }
        }

        self.start_next_transcode().await;
        self.maybe_finish_batch();
        self.publish_stats();
        Ok(resumed)
    }

    /// Deletes orphaned temporary files and purges stale terminal records.
    ///
    /// A temp file is orphaned when no durable record references it.
    ///
    /// # Errors
    /// - `UploadManagerError::Store` - Record scan or deletion failed
    pub async fn clear_cached_uploads(&mut self) -> Result<usize, UploadManagerError> {
        let purged = self
            .store
            .delete_where(&|record| !record.state.is_resumable())
            .await?;
        if purged > 0 {
            tracing::debug!("Purged {} terminal records", purged);
        }

        let records = self.store.fetch_incomplete().await?;
        let referenced: HashSet<PathBuf> = records
            .iter()
            .filter_map(|record| record.temp_file.clone())
            .collect();

        let removed = self.temp_files.clear_orphaned(&referenced).await?;
        if removed > 0 {
            tracing::info!("Removed {} orphaned temp files", removed);
        }
        Ok(removed)
    }

    /// Cancels the active batch.
    ///
    /// Queued assets are abandoned immediately; in-flight chunk uploads
    /// observe the cancel signal at the next chunk boundary, and the active
    /// export finishes before its asset is abandoned. Durable records stay
    /// resumable.
    ///
    /// # Errors
    /// - `UploadManagerError::NoActiveBatch` - Nothing to cancel
    pub async fn cancel_upload(&mut self) -> Result<(), UploadManagerError> {
        let queued = {
            let Some(session) = self.session.as_mut() else {
                return Err(UploadManagerError::NoActiveBatch);
            };
            if session.cancelled {
                return Ok(());
            }
            session.cancelled = true;
            session.transcodes.drain_queue()
        };

        tracing::info!(
            "Cancelling active batch ({} queued assets abandoned immediately)",
            queued.len()
        );
        self.cancel_tx.send_replace(true);

        for post_id in queued {
            self.abandon_asset(post_id).await;
        }

        self.maybe_finish_batch();
        self.publish_stats();
        Ok(())
    }

    /// Computes the pre-flight total size of a candidate batch.
    ///
    /// # Errors
    /// - `UploadManagerError::Asset` - Malformed descriptor or unresolvable
    ///   asset
    pub async fn estimate_upload_size(
        &self,
        posts: &[PostDescriptor],
    ) -> Result<u64, UploadManagerError> {
        let sizes = try_join_all(posts.iter().map(|descriptor| async move {
            descriptor.validate()?;
            let resolved = self.resolver.resolve(&descriptor.asset).await?;
            Ok::<u64, UploadManagerError>(resolved.size)
        }))
        .await?;
        Ok(sizes.into_iter().sum())
    }

    /// Forwards an export progress sample into the aggregator.
    pub fn handle_transcode_progress(&mut self, post_id: &PostId, fraction: f64) {
        let emit = {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            session
                .progress
                .sample(post_id, ProgressStage::Transcoding(fraction));
            session.progress.poll_emit()
        };

        if let Some((fraction, throughput_bps)) = emit {
            self.emit(UploadEvent::OverallProgress {
                fraction,
                throughput_bps,
            });
        }
        self.publish_stats();
    }

    /// Applies an export outcome: dispatch to upload on success, terminal
    /// failure otherwise. Frees the transcoding slot either way.
    pub async fn handle_transcode_finished(
        &mut self,
        post_id: PostId,
        result: Result<TranscodeOutput, TranscodeError>,
    ) {
        let cancelled = {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            session.transcodes.finish(&post_id, result.is_ok());
            session.cancelled
        };

        match result {
            Err(error) => {
                self.fail_asset(post_id, AssetFailure::Transcode(error)).await;
            }
            Ok(output) => {
                tracing::info!(
                    "Transcode complete for post {} ({} bytes)",
                    post_id,
                    output.size
                );

                let dispatch = {
                    let Some(session) = self.session.as_mut() else {
                        return;
                    };
                    match session.entries.get_mut(&post_id) {
                        Some(entry) => {
                            entry.record.temp_file = Some(output.path.clone());
                            entry.record.total_bytes = output.size;
                            entry.record.state = RecordState::ReadyToUpload;
                            entry.source = ByteSource::File(output.path.clone());
                            session.progress.revise_total(&post_id, output.size);
                            Some(entry.record.clone())
                        }
                        None => None,
                    }
                };

                match dispatch {
                    Some(record) => {
                        self.persist(&record).await;
                        if cancelled {
                            self.abandon_asset(post_id).await;
                        } else {
                            {
                                let Some(session) = self.session.as_mut() else {
                                    return;
                                };
                                if let Some(entry) = session.entries.get_mut(&post_id) {
                                    entry.stage = AssetStage::Uploading;
                                }
                                session.active_workers += 1;
                            }
                            self.spawn_worker(record, ByteSource::File(output.path));
                        }
                    }
                    None => {
                        // No entry owns the output file anymore.
                        if let Err(error) = self.temp_files.delete(&output.path).await {
                            tracing::warn!(
                                "Failed to remove unowned transcode output: {}",
                                error
                            );
                        }
                    }
                }
            }
        }

        self.start_next_transcode().await;
        self.maybe_finish_batch();
        self.publish_stats();
    }

    /// Applies an acknowledged chunk to session accounting.
    pub fn handle_chunk_uploaded(&mut self, post_id: &PostId, bytes: u64) {
        let emit = {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            if let Some(entry) = session.entries.get_mut(post_id) {
                entry.record.bytes_uploaded =
                    (entry.record.bytes_uploaded + bytes).min(entry.record.total_bytes);
            }
            session
                .progress
                .sample(post_id, ProgressStage::Uploading(bytes));
            session.progress.poll_emit()
        };

        if let Some((fraction, throughput_bps)) = emit {
            self.emit(UploadEvent::OverallProgress {
                fraction,
                throughput_bps,
            });
        }
        self.publish_stats();
    }

    /// Finalizes a successfully uploaded asset: the record leaves durable
    /// storage (digest already acknowledged) and its temp file is removed.
    pub async fn handle_asset_uploaded(&mut self, post_id: PostId, digest: PostDigest) {
        let entry = {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            let entry = session.entries.remove(&post_id);
            if entry.is_some() {
                session.active_workers = session.active_workers.saturating_sub(1);
                session.completed += 1;
                session.progress.complete(&post_id);
            }
            entry
        };
        let Some(mut entry) = entry else { return };

        tracing::info!(
            "Post {} uploaded ({} bytes)",
            post_id,
            entry.record.total_bytes
        );

        if let Err(error) = self.store.delete(entry.record.id).await {
            tracing::warn!("Failed to delete record for post {}: {}", post_id, error);
        }
        if let Some(temp) = entry.record.temp_file.take() {
            if let Err(error) = self.temp_files.delete(&temp).await {
                tracing::warn!("Failed to remove temp file for post {}: {}", post_id, error);
            }
        }

        let emit = match self.session.as_mut() {
            Some(session) => session.progress.poll_emit(),
            None => None,
        };
        if let Some((fraction, throughput_bps)) = emit {
            self.emit(UploadEvent::OverallProgress {
                fraction,
                throughput_bps,
            });
        }

        self.emit(UploadEvent::AssetCompleted {
            post_id,
            metadata: Some(digest),
            is_video: entry.record.kind == MediaKind::Video,
            file_size: entry.record.total_bytes,
            error: None,
        });

        self.maybe_finish_batch();
        self.publish_stats();
    }

    /// Applies a terminal per-asset failure reported by a worker.
    pub async fn handle_asset_failed(&mut self, post_id: PostId, failure: AssetFailure) {
        self.fail_asset(post_id, failure).await;
        self.maybe_finish_batch();
        self.publish_stats();
    }

    /// Applies a worker stop at a chunk boundary after cancellation.
    pub async fn handle_worker_cancelled(&mut self, post_id: PostId) {
        {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            session.active_workers = session.active_workers.saturating_sub(1);
        }
        self.abandon_asset(post_id).await;
        self.maybe_finish_batch();
        self.publish_stats();
    }

    /// Registers an accepted asset and dispatches it into the pipeline.
    fn admit_entry(&mut self, record: UploadRecord, source: ByteSource) {
        let spawn = {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            let post_id = record.post_id.clone();
            session
                .progress
                .register(post_id.clone(), record.kind, record.total_bytes);

            if record.kind.requires_transcode() {
                session.entries.insert(
                    post_id.clone(),
                    AssetEntry {
                        record,
                        source,
                        stage: AssetStage::Queued,
                    },
                );
                session.transcodes.enqueue(post_id);
                None
            } else {
                session.active_workers += 1;
                session.entries.insert(
                    post_id,
                    AssetEntry {
                        record: record.clone(),
                        source: source.clone(),
                        stage: AssetStage::Uploading,
                    },
                );
                Some((record, source))
            }
        };

        if let Some((record, source)) = spawn {
            self.spawn_worker(record, source);
        }
    }

    /// Feeds a persisted record back into a resumed session. Returns false
    /// when the record could not be resumed and was reported as failed.
    async fn resume_record(&mut self, mut record: UploadRecord) -> bool {
        let post_id = record.post_id.clone();

        // A valid transcoded output skips re-transcoding entirely.
        if let Some(temp) = record.temp_file.clone() {
            if tokio::fs::metadata(&temp).await.is_ok() {
                record.state = RecordState::ReadyToUpload;
                self.admit_resumed(record, ByteSource::File(temp), AssetStage::Uploading)
                    .await;
                return true;
            }
            tracing::debug!(
                "Transcoded output for post {} is gone; restarting its pipeline",
                post_id
            );
            record.temp_file = None;
        }

        let resolved = match self.resolver.resolve(&record.asset).await {
            Ok(resolved) => resolved,
            Err(error) => {
                record.state = RecordState::Failed;
                self.persist(&record).await;
                if let Some(session) = self.session.as_mut() {
                    session.failed += 1;
                }
                self.emit(UploadEvent::AssetCompleted {
                    post_id,
                    metadata: None,
                    is_video: record.kind == MediaKind::Video,
                    file_size: record.total_bytes,
                    error: Some(AssetFailure::Malformed(error)),
                });
                return false;
            }
        };

        match record.kind {
            MediaKind::Photo => {
                record.state = RecordState::ReadyToUpload;
                self.admit_resumed(record, resolved.source, AssetStage::Uploading)
                    .await;
            }
            MediaKind::Video => {
                // Output lost: the asset restarts from transcoding.
                record.bytes_uploaded = 0;
                record.total_bytes = resolved.size;
                record.state = RecordState::Pending;
                self.admit_resumed(record, resolved.source, AssetStage::Queued)
                    .await;
            }
        }
        true
    }

    /// Registers a resumed record, pre-crediting its acknowledged bytes.
    async fn admit_resumed(&mut self, record: UploadRecord, source: ByteSource, stage: AssetStage) {
        self.persist(&record).await;

        let spawn = {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            let post_id = record.post_id.clone();
            session
                .progress
                .register(post_id.clone(), record.kind, record.total_bytes);
            session
                .progress
                .credit_uploaded(&post_id, record.bytes_uploaded);

            if stage == AssetStage::Queued {
                session.entries.insert(
                    post_id.clone(),
                    AssetEntry {
                        record,
                        source,
                        stage,
                    },
                );
                session.transcodes.enqueue(post_id);
                None
            } else {
                session.active_workers += 1;
                session.entries.insert(
                    post_id,
                    AssetEntry {
                        record: record.clone(),
                        source: source.clone(),
                        stage: AssetStage::Uploading,
                    },
                );
                Some((record, source))
            }
        };

        if let Some((record, source)) = spawn {
            self.spawn_worker(record, source);
        }
    }

    /// Grants the transcoding slot to the next queued video, if free, and
    /// spawns its export task.
    async fn start_next_transcode(&mut self) {
        let task = {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            if session.cancelled {
                return;
            }

            let mut task = None;
            while let Some(post_id) = session.transcodes.acquire_next() {
                match session.entries.get_mut(&post_id) {
                    Some(entry) => {
                        entry.stage = AssetStage::Transcoding;
                        entry.record.state = RecordState::Transcoding;
                        task = Some((post_id, entry.source.clone(), entry.record.clone()));
                        break;
                    }
                    None => {
                        // Entry vanished before its turn; free the slot.
                        session.transcodes.finish(&post_id, false);
                    }
                }
            }
            task
        };

        let Some((post_id, source, record)) = task else {
            return;
        };

        self.persist(&record).await;
        self.spawn_transcode(post_id, source);
    }

    /// Spawns the export task for one video asset.
    fn spawn_transcode(&self, post_id: PostId, source: ByteSource) {
        tracing::debug!("Starting transcode for post {}", post_id);

        let transcoder = Arc::clone(&self.transcoder);
        let temp_files = self.temp_files.clone();
        let constraints = self.constraints.clone();
        let timeout = self.config.transcode.transcode_timeout;
        let internal = self.internal_tx.clone();

        tokio::spawn(async move {
            let output = match temp_files.allocate(constraints.container).await {
                Ok(path) => path,
                Err(error) => {
                    let result = Err(TranscodeError::Failed {
                        reason: format!("temp allocation failed: {error}"),
                    });
                    let _ = internal.send(UploadCommand::TranscodeFinished { post_id, result });
                    return;
                }
            };

            let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
            let forward_to = internal.clone();
            let forward_post = post_id.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(fraction) = progress_rx.recv().await {
                    let _ = forward_to.send(UploadCommand::TranscodeProgressed {
                        post_id: forward_post.clone(),
                        fraction,
                    });
                }
            });

            let export = transcoder.transcode(&source, &output, &constraints, progress_tx);
            let result = match tokio::time::timeout(timeout, export).await {
                Ok(result) => result,
                Err(_) => Err(TranscodeError::Timeout {
                    seconds: timeout.as_secs(),
                }),
            };

            let _ = forwarder.await;
            let _ = internal.send(UploadCommand::TranscodeFinished { post_id, result });
        });
    }

    /// Spawns an upload worker for a finalized asset.
    fn spawn_worker(&self, record: UploadRecord, source: ByteSource) {
        tracing::debug!("Dispatching upload worker for post {}", record.post_id);

        let params = UploadWorkerParams {
            record,
            source,
            client: Arc::clone(&self.client),
            store: Arc::clone(&self.store),
            config: self.config.upload.clone(),
            cancel: self.cancel_tx.subscribe(),
            notify: self.internal_tx.clone(),
        };
        tokio::spawn(run_upload_worker(params));
    }

    /// Reports a post skipped during batch acceptance. No record exists.
    fn report_skipped_post(&mut self, post_id: PostId, failure: AssetFailure) {
        tracing::warn!("Skipping post {}: {}", post_id, failure);
        if let Some(session) = self.session.as_mut() {
            session.failed += 1;
        }
        self.emit(UploadEvent::AssetCompleted {
            post_id,
            metadata: None,
            is_video: false,
            file_size: 0,
            error: Some(failure),
        });
    }

    /// Moves an asset to terminal failure: record marked failed with its
    /// acknowledged offset preserved, temp file removed, outcome reported
    /// exactly once.
    async fn fail_asset(&mut self, post_id: PostId, failure: AssetFailure) {
        let entry = {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            let entry = session.entries.remove(&post_id);
            if let Some(entry) = &entry {
                if entry.stage == AssetStage::Uploading {
                    session.active_workers = session.active_workers.saturating_sub(1);
                }
                session.failed += 1;
                session.progress.remove(&post_id);
            }
            entry
        };
        let Some(mut entry) = entry else { return };

        tracing::warn!("Post {} failed: {}", post_id, failure);

        entry.record.state = RecordState::Failed;
        if let Some(temp) = entry.record.temp_file.take() {
            if let Err(error) = self.temp_files.delete(&temp).await {
                tracing::warn!("Failed to remove temp file for post {}: {}", post_id, error);
            }
        }
        self.persist(&entry.record).await;

        self.emit(UploadEvent::AssetCompleted {
            post_id,
            metadata: None,
            is_video: entry.record.kind == MediaKind::Video,
            file_size: entry.record.total_bytes,
            error: Some(failure),
        });
    }

    /// Abandons an asset after cancellation: record stays durable and
    /// resumable, temp file removed per the terminal-state cleanup rule.
    async fn abandon_asset(&mut self, post_id: PostId) {
        let entry = {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            session.progress.remove(&post_id);
            let entry = session.entries.remove(&post_id);
            if entry.is_some() {
                session.abandoned += 1;
            }
            entry
        };
        let Some(mut entry) = entry else { return };

        entry.record.state = RecordState::Abandoned;
        if let Some(temp) = entry.record.temp_file.take() {
            if let Err(error) = self.temp_files.delete(&temp).await {
                tracing::warn!("Failed to remove temp file for post {}: {}", post_id, error);
            }
        }
        self.persist(&entry.record).await;
    }

    /// Fires the terminal batch event once every owned asset has settled.
    fn maybe_finish_batch(&mut self) {
        let outcome = {
            let Some(session) = self.session.as_ref() else {
                return;
            };
            if session.cancelled {
                let drained =
                    session.active_workers == 0 && session.transcodes.active().is_none();
                drained.then(|| UploadEvent::BatchCancelled {
                    abandoned: session.abandoned,
                })
            } else if session.entries.is_empty() {
                Some(UploadEvent::BatchCompleted {
                    completed: session.completed,
                    failed: session.failed,
                })
            } else {
                None
            }
        };

        if let Some(event) = outcome {
            match &event {
                UploadEvent::BatchCompleted { completed, failed } => {
                    tracing::info!("Batch complete: {} uploaded, {} failed", completed, failed);
                }
                UploadEvent::BatchCancelled { abandoned } => {
                    tracing::info!("Batch cancelled: {} assets abandoned", abandoned);
                }
                _ => {}
            }
            // Final counters land in the snapshot before the session drops,
            // and the snapshot reads idle before the terminal event is
            // observable.
            self.publish_stats();
            self.session = None;
            self.publish_stats();
            self.emit(event);
        }
    }

    /// Tears the session down after a catastrophic storage failure during
    /// batch acceptance. Already-dispatched workers observe the cancel
    /// signal; their records stay durable for a later resume or clear.
    async fn abort_batch_accept(&mut self) {
        tracing::error!("Aborting batch accept after storage failure");
        self.cancel_tx.send_replace(true);
        self.session = None;
        self.publish_stats();
    }

    fn emit(&self, event: UploadEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Saves a record, logging instead of failing the pipeline: a missed
    /// save only moves the resumable offset backwards.
    async fn persist(&self, record: &UploadRecord) {
        if let Err(error) = self.store.save(record).await {
            tracing::warn!(
                "Failed to persist record for post {}: {}",
                record.post_id,
                error
            );
        }
    }

    fn reset_stats(&self) {
        let mut stats = self.stats.write();
        *stats = UploadStats {
            is_uploading: true,
            ..UploadStats::default()
        };
    }

    /// Publishes the shared snapshot handles read synchronously.
    fn publish_stats(&self) {
        let mut stats = self.stats.write();
        match &self.session {
            Some(session) => {
                stats.is_uploading = true;
                stats.overall_progress = session.progress.last_emitted();
                stats.throughput_bps = session.progress.throughput_bps();
                stats.total_bytes = session.progress.total_bytes();
                stats.video_bytes = session.progress.video_bytes();
                stats.photo_bytes = session.progress.photo_bytes();
                stats.accounted_bytes = session.progress.accounted_bytes();
                stats.assets_completed = session.completed;
                stats.assets_failed = session.failed;
            }
            None => stats.finish(),
        }
    }
}
