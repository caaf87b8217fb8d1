//! Video transcoding stage.
//!
//! Wraps the external export engine behind a trait seam and enforces the
//! single-active-session discipline: video assets transcode strictly one
//! at a time while uploads of other assets proceed concurrently.

pub mod coordinator;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use coordinator::{TranscodeCoordinator, TranscodeState};

use crate::asset::ByteSource;

/// Fixed output constraints for exported video.
///
/// The policy is owned by this component and applied to every export; it
/// is deliberately not configurable per call.
#[derive(Debug, Clone)]
pub struct TranscodeConstraints {
    /// Output container extension
    pub container: &'static str,
    /// Target video bitrate in kbps
    pub video_bitrate_kbps: u32,
    /// Target audio bitrate in kbps
    pub audio_bitrate_kbps: u32,
    /// Audio sample rate in Hz
    pub audio_sample_rate: u32,
    /// Audio channel count
    pub audio_channels: u8,
}

impl Default for TranscodeConstraints {
    fn default() -> Self {
        Self {
            container: "mp4",
            video_bitrate_kbps: 2500, // 2.5 Mbps
            audio_bitrate_kbps: 128,
            audio_sample_rate: 44_100,
            audio_channels: 2,
        }
    }
}

/// Result of a completed export.
#[derive(Debug, Clone)]
pub struct TranscodeOutput {
    pub path: PathBuf,
    pub size: u64,
}

/// External export engine producing an output file from a source asset.
///
/// Implementations report fractional completion through the progress
/// sender; the coordinator tags samples with the owning asset.
#[async_trait]
pub trait TranscodeService: Send + Sync {
    /// Exports the source into `output` under the given constraints.
    ///
    /// # Errors
    /// - `TranscodeError::Failed` - Export engine reported a failure
    async fn transcode(
        &self,
        input: &ByteSource,
        output: &Path,
        constraints: &TranscodeConstraints,
        progress: mpsc::UnboundedSender<f64>,
    ) -> Result<TranscodeOutput, TranscodeError>;
}

/// Errors from the transcoding stage. All variants are terminal for the
/// affected asset; transcoding is never retried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TranscodeError {
    /// Export engine failed
    #[error("Transcode failed: {reason}")]
    Failed { reason: String },

    /// Export exceeded the configured time budget
    #[error("Transcode timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// Session was cancelled before the export finished
    #[error("Transcode cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_constraints_policy() {
        let constraints = TranscodeConstraints::default();
        assert_eq!(constraints.container, "mp4");
        assert_eq!(constraints.video_bitrate_kbps, 2500);
        assert_eq!(constraints.audio_channels, 2);
    }
}
