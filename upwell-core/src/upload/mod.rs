//! Chunked asset transfer to the remote service.
//!
//! One worker task per asset transfers the finalized byte source in chunk
//! sized requests, persists the acknowledged offset after every chunk, and
//! finalizes the post with a digest call. Transient failures retry with
//! bounded exponential backoff before becoming terminal.

pub mod client;
pub mod retry;
pub mod worker;

pub use client::{ChunkAck, DigestMetadata, HttpUploadClient, PostDigest, UploadApiClient};
pub use retry::RetryPolicy;
pub use worker::{UploadWorkerParams, run_upload_worker};

/// Errors that occur while transferring an asset.
///
/// `Transient` and `ChunkTimeout` are retried under the configured policy;
/// every other variant is terminal for the asset.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UploadError {
    /// Recoverable network failure; retried with backoff
    #[error("Transient upload failure: {reason}")]
    Transient { reason: String },

    /// Chunk request exceeded its time budget; retried with backoff
    #[error("Chunk timed out after {seconds} seconds")]
    ChunkTimeout { seconds: u64 },

    /// Remote service rejected the request outright
    #[error("Upload rejected with status {status}")]
    Rejected { status: u16 },

    /// Retries exhausted without a successful transfer
    #[error("Upload failed after {attempts} attempts")]
    Failed { attempts: u32 },

    /// Post-creation digest call failed; uploaded bytes are preserved
    #[error("Digest call failed: {reason}")]
    Digest { reason: String },

    /// Local byte source could not be read or the request could not be
    /// prepared; nothing was sent
    #[error("Upload source unreadable: {reason}")]
    Source { reason: String },
}

impl UploadError {
    /// Returns true for failures the retry policy may recover from.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UploadError::Transient { .. } | UploadError::ChunkTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability_classification() {
        assert!(
            UploadError::Transient {
                reason: "connection reset".to_string()
            }
            .is_retryable()
        );
        assert!(UploadError::ChunkTimeout { seconds: 30 }.is_retryable());

        assert!(!UploadError::Rejected { status: 403 }.is_retryable());
        assert!(!UploadError::Failed { attempts: 5 }.is_retryable());
        assert!(
            !UploadError::Digest {
                reason: "bad metadata".to_string()
            }
            .is_retryable()
        );
    }
}
