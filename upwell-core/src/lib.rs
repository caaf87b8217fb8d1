//! Upwell Core - Batch media upload orchestration
//!
//! This crate provides the building blocks for crash-resilient bulk media
//! upload: the batch orchestration engine, single-slot video transcoding
//! coordination, chunked resumable transfer workers, durable record
//! persistence, and monotonic aggregate progress reporting.

pub mod asset;
pub mod config;
pub mod engine;
pub mod progress;
pub mod store;
pub mod tracing_setup;
pub mod transcode;
pub mod upload;

// Re-export main types for convenient access
pub use asset::{AssetError, AssetRef, MediaKind, PostDescriptor, PostId};
pub use config::UpwellConfig;
pub use engine::{
    AssetFailure, UploadEvent, UploadManagerError, UploadManagerHandle, spawn_upload_manager,
};
pub use store::{JsonRecordStore, StoreError, UploadRecord};
pub use transcode::TranscodeError;
pub use upload::UploadError;

/// Core errors that can bubble up from any Upwell subsystem.
///
/// High-level error types representing failures in core functionality.
#[derive(Debug, thiserror::Error)]
pub enum UpwellError {
    #[error("Engine error: {0}")]
    Engine(#[from] UploadManagerError),

    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    #[error("Transcode error: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpwellError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            UpwellError::Engine(error) => match error {
                UploadManagerError::AlreadyUploading => {
                    "An upload is already in progress".to_string()
                }
                UploadManagerError::NoActiveBatch => "No upload is in progress".to_string(),
                _ => "Upload engine error occurred".to_string(),
            },
            UpwellError::Asset(AssetError::MalformedPost { reason }) => {
                format!("Post cannot be uploaded: {reason}")
            }
            UpwellError::Asset(_) => "Media asset could not be read".to_string(),
            UpwellError::Transcode(_) => "Video processing failed".to_string(),
            UpwellError::Upload(_) => "Upload failed".to_string(),
            UpwellError::Storage(_) => "Storage error occurred".to_string(),
            UpwellError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            UpwellError::Asset(AssetError::MalformedPost { .. })
                | UpwellError::Engine(UploadManagerError::AlreadyUploading)
        )
    }
}

pub type Result<T> = std::result::Result<T, UpwellError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages() {
        let busy = UpwellError::Engine(UploadManagerError::AlreadyUploading);
        assert_eq!(busy.user_message(), "An upload is already in progress");
        assert!(busy.is_user_error());

        let malformed = UpwellError::Asset(AssetError::MalformedPost {
            reason: "empty post id".to_string(),
        });
        assert!(malformed.user_message().contains("empty post id"));
        assert!(malformed.is_user_error());

        let transcode = UpwellError::Transcode(TranscodeError::Failed {
            reason: "encoder crashed".to_string(),
        });
        assert_eq!(transcode.user_message(), "Video processing failed");
        assert!(!transcode.is_user_error());
    }
}
