//! Mock implementations for testing the upload engine.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::asset::{
    AssetError, AssetRef, AssetResolver, ByteSource, MediaKind, PostId, ResolvedAsset,
};
use crate::store::{RecordStore, StoreError, UploadRecord};
use crate::transcode::{
    TranscodeConstraints, TranscodeError, TranscodeOutput, TranscodeService,
};
use crate::upload::UploadError;
use crate::upload::client::{ChunkAck, DigestMetadata, PostDigest, UploadApiClient};

// Test timing constants
const MOCK_TRANSCODE_DELAY_MS: u64 = 10;

/// Mock asset resolver backed by an in-memory library.
#[derive(Debug, Clone, Default)]
pub struct MockAssetResolver {
    assets: Arc<RwLock<HashMap<AssetRef, (MediaKind, Bytes)>>>,
}

impl MockAssetResolver {
    /// Creates an empty mock library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a photo asset with the given bytes.
    pub fn add_photo(&self, reference: &str, bytes: Bytes) {
        self.assets
            .write()
            .insert(AssetRef::new(reference), (MediaKind::Photo, bytes));
    }

    /// Adds a video asset with the given raw (pre-transcode) bytes.
    pub fn add_video(&self, reference: &str, bytes: Bytes) {
        self.assets
            .write()
            .insert(AssetRef::new(reference), (MediaKind::Video, bytes));
    }
}

#[async_trait]
impl AssetResolver for MockAssetResolver {
    async fn resolve(&self, asset: &AssetRef) -> Result<ResolvedAsset, AssetError> {
        let assets = self.assets.read();
        let (kind, bytes) = assets.get(asset).ok_or_else(|| AssetError::NotFound {
            asset: asset.clone(),
        })?;

        Ok(ResolvedAsset {
            kind: *kind,
            size: bytes.len() as u64,
            source: ByteSource::Memory(bytes.clone()),
        })
    }
}

/// Mock export service writing zero-filled output files.
///
/// Tracks the number of concurrently running exports so tests can assert
/// the single-slot discipline.
#[derive(Debug, Clone)]
pub struct MockTranscodeService {
    output_size: u64,
    should_fail: bool,
    delay: Duration,
    active: Arc<AtomicUsize>,
    max_observed: Arc<AtomicUsize>,
}

impl MockTranscodeService {
    /// Creates a mock service producing outputs of the given size.
    pub fn new(output_size: u64) -> Self {
        Self {
            output_size,
            should_fail: false,
            delay: Duration::from_millis(MOCK_TRANSCODE_DELAY_MS),
            active: Arc::new(AtomicUsize::new(0)),
            max_observed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Creates a mock service that fails every export.
    pub fn failing() -> Self {
        let mut service = Self::new(0);
        service.should_fail = true;
        service
    }

    /// Highest number of exports observed running at the same instant.
    pub fn max_concurrent(&self) -> usize {
        self.max_observed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscodeService for MockTranscodeService {
    async fn transcode(
        &self,
        _input: &ByteSource,
        output: &Path,
        _constraints: &TranscodeConstraints,
        progress: mpsc::UnboundedSender<f64>,
    ) -> Result<TranscodeOutput, TranscodeError> {
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_observed.fetch_max(running, Ordering::SeqCst);

        let result = async {
            for fraction in [0.25, 0.5, 0.75, 1.0] {
                let _ = progress.send(fraction);
                tokio::time::sleep(self.delay / 4).await;
            }

            if self.should_fail {
                return Err(TranscodeError::Failed {
                    reason: "mock export failure".to_string(),
                });
            }

            tokio::fs::write(output, vec![0u8; self.output_size as usize])
                .await
                .map_err(|error| TranscodeError::Failed {
                    reason: error.to_string(),
                })?;

            Ok(TranscodeOutput {
                path: output.to_path_buf(),
                size: self.output_size,
            })
        }
        .await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Mock upload API client recording every chunk request.
#[derive(Debug, Clone, Default)]
pub struct MockUploadClient {
    /// Every chunk request as (post, offset, length), in arrival order
    chunks: Arc<Mutex<Vec<(PostId, u64, usize)>>>,
    /// Total bytes accepted per post
    received: Arc<Mutex<HashMap<PostId, u64>>>,
    /// Remaining chunk requests to fail with a transient error
    transient_failures: Arc<AtomicU32>,
    /// Posts whose digest call must fail
    digest_failures: Arc<Mutex<HashSet<PostId>>>,
    /// Posts whose digest call succeeded
    digests: Arc<Mutex<Vec<PostId>>>,
    /// Artificial latency per chunk request, in milliseconds
    chunk_delay_ms: Arc<AtomicU32>,
}

impl MockUploadClient {
    /// Creates a mock client that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` chunk requests fail transiently.
    pub fn fail_chunks_transiently(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Delays every chunk request by the given number of milliseconds.
    pub fn set_chunk_delay_ms(&self, millis: u32) {
        self.chunk_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Makes the digest call fail for the given post.
    pub fn fail_digest_for(&self, post_id: PostId) {
        self.digest_failures.lock().insert(post_id);
    }

    /// Offsets of every accepted chunk for the post, in arrival order.
    pub fn chunk_offsets(&self, post_id: &PostId) -> Vec<u64> {
        self.chunks
            .lock()
            .iter()
            .filter(|(post, _, _)| post == post_id)
            .map(|(_, offset, _)| *offset)
            .collect()
    }

    /// Total bytes the mock service has accepted for the post.
    pub fn received_bytes(&self, post_id: &PostId) -> u64 {
        self.received.lock().get(post_id).copied().unwrap_or(0)
    }

    /// Posts finalized through the digest call, in completion order.
    pub fn digested_posts(&self) -> Vec<PostId> {
        self.digests.lock().clone()
    }
}

#[async_trait]
impl UploadApiClient for MockUploadClient {
    async fn upload_chunk(
        &self,
        post_id: &PostId,
        _key: &str,
        bytes: Bytes,
        offset: u64,
    ) -> Result<ChunkAck, UploadError> {
        let delay = self.chunk_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(UploadError::Transient {
                reason: "mock transient failure".to_string(),
            });
        }

        self.chunks
            .lock()
            .push((post_id.clone(), offset, bytes.len()));

        let mut received = self.received.lock();
        let total = received.entry(post_id.clone()).or_insert(0);
        *total += bytes.len() as u64;
        Ok(ChunkAck { received: *total })
    }

    async fn create_post_digest(
        &self,
        post_id: &PostId,
        metadata: &DigestMetadata,
    ) -> Result<PostDigest, UploadError> {
        if self.digest_failures.lock().contains(post_id) {
            return Err(UploadError::Digest {
                reason: "mock digest failure".to_string(),
            });
        }

        self.digests.lock().push(post_id.clone());
        Ok(PostDigest {
            post_id: post_id.clone(),
            payload: serde_json::json!({
                "post_id": post_id.as_str(),
                "bytes": metadata.total_bytes,
                "gallery_id": metadata.gallery_id,
            }),
        })
    }
}

/// In-memory record store for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecordStore {
    records: Arc<RwLock<HashMap<Uuid, UploadRecord>>>,
}

impl InMemoryRecordStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the record for a post, if any.
    pub fn get(&self, post_id: &PostId) -> Option<UploadRecord> {
        self.records
            .read()
            .values()
            .find(|record| &record.post_id == post_id)
            .cloned()
    }

    /// Number of records currently stored.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true when no records are stored.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Seeds a record directly, bypassing the engine.
    pub fn insert(&self, record: UploadRecord) {
        self.records.write().insert(record.id, record);
    }

    /// States of every stored record, in no particular order.
    pub fn states(&self) -> Vec<crate::store::RecordState> {
        self.records
            .read()
            .values()
            .map(|record| record.state)
            .collect()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn save(&self, record: &UploadRecord) -> Result<(), StoreError> {
        self.records.write().insert(record.id, record.clone());
        Ok(())
    }

    async fn fetch_incomplete(&self) -> Result<Vec<UploadRecord>, StoreError> {
        let mut records: Vec<UploadRecord> = self
            .records
            .read()
            .values()
            .filter(|record| record.state.is_resumable())
            .cloned()
            .collect();
        records.sort_by_key(|record| record.created_at);
        Ok(records)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.records
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::RecordNotFound { id })
    }

    async fn delete_where(
        &self,
        predicate: &(dyn for<'a> Fn(&'a UploadRecord) -> bool + Sync),
    ) -> Result<usize, StoreError> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, record| !predicate(record));
        Ok(before - records.len())
    }
}
