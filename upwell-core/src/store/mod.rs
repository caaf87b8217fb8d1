//! Durable upload records and the persistence gateway.
//!
//! Defines the record store interface used to survive process restarts,
//! together with the file-backed implementation and temporary file
//! management for transcoded output.

pub mod json_store;
pub mod temp_files;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use json_store::JsonRecordStore;
pub use temp_files::TempFileStore;

use crate::asset::{AssetRef, MediaKind, PostId};

/// Lifecycle state of a durable upload record.
///
/// `Complete` and `Failed` are terminal; `Abandoned` is terminal for the
/// session that produced it but remains resumable on the next startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordState {
    /// Accepted into a batch, not yet dispatched
    Pending,
    /// Video asset currently in the transcoding slot
    Transcoding,
    /// Byte source finalized, waiting for an upload worker
    ReadyToUpload,
    /// Upload worker actively transferring chunks
    Uploading,
    /// Digest acknowledged by the remote service
    Complete,
    /// Unrecoverable per-asset failure
    Failed,
    /// Cancelled mid-session; durable state kept for resumption
    Abandoned,
}

impl RecordState {
    /// Returns true once no further transitions occur within a session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecordState::Complete | RecordState::Failed | RecordState::Abandoned
        )
    }

    /// Returns true if a startup scan should feed this record back into a
    /// new batch session.
    pub fn is_resumable(&self) -> bool {
        !matches!(self, RecordState::Complete | RecordState::Failed)
    }
}

/// One durable upload record per post accepted into a batch.
///
/// Owned by the record store; the orchestrator references records during an
/// active session and deletes them only after the remote digest call has
/// succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: Uuid,
    pub post_id: PostId,
    pub key: String,
    pub asset: AssetRef,
    pub kind: MediaKind,
    pub state: RecordState,
    /// Bytes acknowledged by the remote service so far
    pub bytes_uploaded: u64,
    /// Known total size; for videos this is revised to the transcoded size
    /// once the export completes
    pub total_bytes: u64,
    /// Transcoded output path, video only
    pub temp_file: Option<PathBuf>,
    pub gallery_id: String,
    pub created_at: DateTime<Utc>,
}

impl UploadRecord {
    /// Creates a fresh record for a post entering a batch.
    pub fn new(
        post_id: PostId,
        key: String,
        asset: AssetRef,
        kind: MediaKind,
        total_bytes: u64,
        gallery_id: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            post_id,
            key,
            asset,
            kind,
            state: RecordState::Pending,
            bytes_uploaded: 0,
            total_bytes,
            temp_file: None,
            gallery_id,
            created_at: Utc::now(),
        }
    }

    /// Remaining bytes to transfer for this asset.
    pub fn bytes_remaining(&self) -> u64 {
        self.total_bytes.saturating_sub(self.bytes_uploaded)
    }
}

/// Durable persistence operations for upload records.
///
/// Saves are idempotent and may be issued after every chunk; saves for
/// distinct records may run concurrently, saves for the same record are
/// serialized by the implementation.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persists the record, replacing any prior snapshot with the same id.
    ///
    /// # Errors
    /// - `StoreError::Io` - Backing storage write failure
    /// - `StoreError::Serialization` - Record could not be encoded
    async fn save(&self, record: &UploadRecord) -> Result<(), StoreError>;

    /// Fetches all records a startup scan should resume.
    ///
    /// # Errors
    /// - `StoreError::Io` - Backing storage read failure
    async fn fetch_incomplete(&self) -> Result<Vec<UploadRecord>, StoreError>;

    /// Deletes the record with the given id.
    ///
    /// # Errors
    /// - `StoreError::RecordNotFound` - No record with that id
    /// - `StoreError::Io` - Backing storage delete failure
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    /// Deletes every record matching the predicate, returning the count.
    ///
    /// # Errors
    /// - `StoreError::Io` - Backing storage failure
    async fn delete_where(
        &self,
        predicate: &(dyn for<'a> Fn(&'a UploadRecord) -> bool + Sync),
    ) -> Result<usize, StoreError>;
}

/// Errors that occur during record persistence.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Requested record does not exist
    #[error("Upload record {id} not found")]
    RecordNotFound { id: Uuid },

    /// Record could not be encoded or decoded
    #[error("Record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Standard I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_state_classification() {
        assert!(RecordState::Complete.is_terminal());
        assert!(RecordState::Failed.is_terminal());
        assert!(RecordState::Abandoned.is_terminal());
        assert!(!RecordState::Uploading.is_terminal());

        assert!(RecordState::Abandoned.is_resumable());
        assert!(RecordState::Uploading.is_resumable());
        assert!(!RecordState::Complete.is_resumable());
        assert!(!RecordState::Failed.is_resumable());
    }

    #[test]
    fn test_record_bytes_remaining() {
        let mut record = UploadRecord::new(
            PostId::new("post-1"),
            "key".to_string(),
            AssetRef::new("asset-1"),
            MediaKind::Photo,
            1_000,
            "gallery-1".to_string(),
        );

        assert_eq!(record.bytes_remaining(), 1_000);
        record.bytes_uploaded = 400;
        assert_eq!(record.bytes_remaining(), 600);
        record.bytes_uploaded = 1_200;
        assert_eq!(record.bytes_remaining(), 0);
    }
}
