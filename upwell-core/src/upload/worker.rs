//! Per-asset upload worker task.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use super::client::{DigestMetadata, UploadApiClient};
use super::retry::RetryPolicy;
use super::UploadError;
use crate::asset::ByteSource;
use crate::config::UploadConfig;
use crate::engine::commands::UploadCommand;
use crate::engine::events::AssetFailure;
use crate::store::{RecordState, RecordStore, UploadRecord};

/// Parameters for spawning an upload worker.
pub struct UploadWorkerParams<U: UploadApiClient, S: RecordStore> {
    pub record: UploadRecord,
    pub source: ByteSource,
    pub client: Arc<U>,
    pub store: Arc<S>,
    pub config: UploadConfig,
    pub cancel: watch::Receiver<bool>,
    pub notify: mpsc::UnboundedSender<UploadCommand>,
}

/// Transfers one finalized asset in chunked requests and finalizes it with
/// the digest call.
///
/// The worker owns no session state: every outcome — acknowledged chunks,
/// terminal success, terminal failure, cancellation at a chunk boundary —
/// is reported back to the engine through the internal command channel,
/// which is the single serialization point for batch accounting. The
/// record's acknowledged offset is persisted after every chunk so a restart
/// resumes without re-sending bytes.
pub async fn run_upload_worker<U, S>(params: UploadWorkerParams<U, S>)
where
    U: UploadApiClient + 'static,
    S: RecordStore + 'static,
{
    let UploadWorkerParams {
        mut record,
        source,
        client,
        store,
        config,
        cancel,
        notify,
    } = params;

    let post_id = record.post_id.clone();
    let retry = RetryPolicy::from_config(&config);

    record.state = RecordState::Uploading;
    persist(&*store, &record).await;

    let total = record.total_bytes;
    let mut offset = record.bytes_uploaded;

    tracing::debug!(
        "Upload worker started for post {} ({} of {} bytes already acknowledged)",
        post_id,
        offset,
        total
    );

    while offset < total {
        if *cancel.borrow() {
            let _ = notify.send(UploadCommand::WorkerCancelled { post_id });
            return;
        }

        let len = (config.chunk_size as u64).min(total - offset) as usize;
        let bytes = match source.read_range(offset, len).await {
            Ok(bytes) if bytes.is_empty() => {
                let failure = AssetFailure::Upload(UploadError::Source {
                    reason: format!("source ended at {offset} of {total} bytes"),
                });
                let _ = notify.send(UploadCommand::AssetFailed { post_id, failure });
                return;
            }
            Ok(bytes) => bytes,
            Err(error) => {
                let failure = AssetFailure::Upload(UploadError::Source {
                    reason: error.to_string(),
                });
                let _ = notify.send(UploadCommand::AssetFailed { post_id, failure });
                return;
            }
        };

        let sent = bytes.len() as u64;
        let mut attempt = 1;
        loop {
            let request = client.upload_chunk(&record.post_id, &record.key, bytes.clone(), offset);
            let outcome = match tokio::time::timeout(config.chunk_timeout, request).await {
                Ok(outcome) => outcome,
                Err(_) => Err(UploadError::ChunkTimeout {
                    seconds: config.chunk_timeout.as_secs(),
                }),
            };

            match outcome {
                Ok(ack) => {
                    tracing::trace!(
                        "Post {}: chunk at offset {} acknowledged (server has {} bytes)",
                        record.post_id,
                        offset,
                        ack.received
                    );
                    break;
                }
                Err(error) if retry.should_retry(attempt, &error) => {
                    let delay = retry.delay_for(attempt);
                    tracing::warn!(
                        "Post {}: chunk at offset {} failed (attempt {}): {}; retrying in {:?}",
                        record.post_id,
                        offset,
                        attempt,
                        error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    let terminal = if error.is_retryable() {
                        UploadError::Failed { attempts: attempt }
                    } else {
                        error
                    };
                    let _ = notify.send(UploadCommand::AssetFailed {
                        post_id,
                        failure: AssetFailure::Upload(terminal),
                    });
                    return;
                }
            }
        }

        offset += sent;
        record.bytes_uploaded = offset;
        persist(&*store, &record).await;

        let _ = notify.send(UploadCommand::ChunkUploaded {
            post_id: record.post_id.clone(),
            bytes: sent,
        });
    }

    let metadata = DigestMetadata {
        key: record.key.clone(),
        kind: record.kind,
        total_bytes: total,
        gallery_id: record.gallery_id.clone(),
    };

    let mut attempt = 1;
    loop {
        match client.create_post_digest(&record.post_id, &metadata).await {
            Ok(digest) => {
                let _ = notify.send(UploadCommand::AssetUploaded { post_id, digest });
                return;
            }
            Err(error) if retry.should_retry(attempt, &error) => {
                tokio::time::sleep(retry.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(error) => {
                // The acknowledged offset stays persisted: a failed digest
                // never causes already uploaded bytes to be re-sent.
                let terminal = match error {
                    digest @ UploadError::Digest { .. } => digest,
                    other => UploadError::Digest {
                        reason: other.to_string(),
                    },
                };
                let _ = notify.send(UploadCommand::AssetFailed {
                    post_id,
                    failure: AssetFailure::Upload(terminal),
                });
                return;
            }
        }
    }
}

/// Saves the record, logging instead of failing the transfer: a missed save
/// only moves the resumable offset backwards.
async fn persist<S: RecordStore>(store: &S, record: &UploadRecord) {
    if let Err(error) = store.save(record).await {
        tracing::warn!(
            "Failed to persist record for post {}: {}",
            record.post_id,
            error
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::sync::{mpsc, watch};

    use super::*;
    use crate::asset::{AssetRef, MediaKind, PostId};
    use crate::engine::test_mocks::{InMemoryRecordStore, MockUploadClient};

    fn test_record(total: u64, uploaded: u64) -> UploadRecord {
        let mut record = UploadRecord::new(
            PostId::new("post-1"),
            "key-1".to_string(),
            AssetRef::new("asset-1"),
            MediaKind::Photo,
            total,
            "gallery-1".to_string(),
        );
        record.bytes_uploaded = uploaded;
        record
    }

    fn worker_config() -> UploadConfig {
        UploadConfig {
            chunk_size: 4,
            chunk_timeout: Duration::from_secs(5),
            max_retry_attempts: 3,
            base_retry_delay: Duration::from_millis(1),
            max_retry_delay: Duration::from_millis(5),
        }
    }

    async fn drain_until_terminal(
        rx: &mut mpsc::UnboundedReceiver<UploadCommand>,
    ) -> (Vec<u64>, Option<UploadCommand>) {
        let mut chunks = Vec::new();
        while let Some(command) = rx.recv().await {
            match command {
                UploadCommand::ChunkUploaded { bytes, .. } => chunks.push(bytes),
                terminal => return (chunks, Some(terminal)),
            }
        }
        (chunks, None)
    }

    #[tokio::test]
    async fn test_full_transfer_and_digest() {
        let client = Arc::new(MockUploadClient::new());
        let store = Arc::new(InMemoryRecordStore::new());
        let (notify, mut rx) = mpsc::unbounded_channel();
        let (_cancel_tx, cancel) = watch::channel(false);

        run_upload_worker(UploadWorkerParams {
            record: test_record(10, 0),
            source: ByteSource::Memory(Bytes::from_static(b"0123456789")),
            client: client.clone(),
            store,
            config: worker_config(),
            cancel,
            notify,
        })
        .await;

        let (chunks, terminal) = drain_until_terminal(&mut rx).await;
        assert_eq!(chunks, vec![4, 4, 2]);
        assert!(matches!(
            terminal,
            Some(UploadCommand::AssetUploaded { .. })
        ));

        let offsets = client.chunk_offsets(&PostId::new("post-1"));
        assert_eq!(offsets, vec![0, 4, 8]);
    }

    #[tokio::test]
    async fn test_resume_skips_acknowledged_offsets() {
        let client = Arc::new(MockUploadClient::new());
        let store = Arc::new(InMemoryRecordStore::new());
        let (notify, mut rx) = mpsc::unbounded_channel();
        let (_cancel_tx, cancel) = watch::channel(false);

        run_upload_worker(UploadWorkerParams {
            record: test_record(10, 8),
            source: ByteSource::Memory(Bytes::from_static(b"0123456789")),
            client: client.clone(),
            store,
            config: worker_config(),
            cancel,
            notify,
        })
        .await;

        let (chunks, terminal) = drain_until_terminal(&mut rx).await;
        assert_eq!(chunks, vec![2]);
        assert!(matches!(
            terminal,
            Some(UploadCommand::AssetUploaded { .. })
        ));

        let offsets = client.chunk_offsets(&PostId::new("post-1"));
        assert!(offsets.iter().all(|&offset| offset >= 8));
    }

    #[tokio::test]
    async fn test_transient_failures_retry_then_succeed() {
        let client = Arc::new(MockUploadClient::new());
        client.fail_chunks_transiently(2);
        let store = Arc::new(InMemoryRecordStore::new());
        let (notify, mut rx) = mpsc::unbounded_channel();
        let (_cancel_tx, cancel) = watch::channel(false);

        run_upload_worker(UploadWorkerParams {
            record: test_record(4, 0),
            source: ByteSource::Memory(Bytes::from_static(b"0123")),
            client,
            store,
            config: worker_config(),
            cancel,
            notify,
        })
        .await;

        let (chunks, terminal) = drain_until_terminal(&mut rx).await;
        assert_eq!(chunks, vec![4]);
        assert!(matches!(
            terminal,
            Some(UploadCommand::AssetUploaded { .. })
        ));
    }

    #[tokio::test]
    async fn test_retry_exhaustion_is_terminal() {
        let client = Arc::new(MockUploadClient::new());
        client.fail_chunks_transiently(100);
        let store = Arc::new(InMemoryRecordStore::new());
        let (notify, mut rx) = mpsc::unbounded_channel();
        let (_cancel_tx, cancel) = watch::channel(false);

        run_upload_worker(UploadWorkerParams {
            record: test_record(4, 0),
            source: ByteSource::Memory(Bytes::from_static(b"0123")),
            client,
            store,
            config: worker_config(),
            cancel,
            notify,
        })
        .await;

        let (chunks, terminal) = drain_until_terminal(&mut rx).await;
        assert!(chunks.is_empty());
        match terminal {
            Some(UploadCommand::AssetFailed { failure, .. }) => {
                assert!(matches!(
                    failure,
                    AssetFailure::Upload(UploadError::Failed { attempts: 3 })
                ));
            }
            _ => panic!("expected AssetFailed terminal command"),
        }
    }

    #[tokio::test]
    async fn test_digest_failure_preserves_offset() {
        let client = Arc::new(MockUploadClient::new());
        client.fail_digest_for(PostId::new("post-1"));
        let store = Arc::new(InMemoryRecordStore::new());
        let (notify, mut rx) = mpsc::unbounded_channel();
        let (_cancel_tx, cancel) = watch::channel(false);

        run_upload_worker(UploadWorkerParams {
            record: test_record(4, 0),
            source: ByteSource::Memory(Bytes::from_static(b"0123")),
            client,
            store: store.clone(),
            config: worker_config(),
            cancel,
            notify,
        })
        .await;

        let (chunks, terminal) = drain_until_terminal(&mut rx).await;
        assert_eq!(chunks, vec![4]);
        match terminal {
            Some(UploadCommand::AssetFailed { failure, .. }) => {
                assert!(matches!(
                    failure,
                    AssetFailure::Upload(UploadError::Digest { .. })
                ));
            }
            _ => panic!("expected AssetFailed terminal command"),
        }

        // All transferred bytes stay persisted for a later resume.
        let record = store.get(&PostId::new("post-1")).unwrap();
        assert_eq!(record.bytes_uploaded, 4);
    }

    #[tokio::test]
    async fn test_cancellation_stops_at_chunk_boundary() {
        let client = Arc::new(MockUploadClient::new());
        let store = Arc::new(InMemoryRecordStore::new());
        let (notify, mut rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel) = watch::channel(false);
        cancel_tx.send(true).unwrap();

        run_upload_worker(UploadWorkerParams {
            record: test_record(10, 0),
            source: ByteSource::Memory(Bytes::from_static(b"0123456789")),
            client: client.clone(),
            store,
            config: worker_config(),
            cancel,
            notify,
        })
        .await;

        let (chunks, terminal) = drain_until_terminal(&mut rx).await;
        assert!(chunks.is_empty());
        assert!(matches!(
            terminal,
            Some(UploadCommand::WorkerCancelled { .. })
        ));
        assert!(client.chunk_offsets(&PostId::new("post-1")).is_empty());
    }
}
