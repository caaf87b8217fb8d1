//! Centralized configuration for Upwell.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::path::PathBuf;
use std::time::Duration;

/// Central configuration for all Upwell components.
///
/// Groups related configuration settings into logical sections.
#[derive(Debug, Clone, Default)]
pub struct UpwellConfig {
    pub upload: UploadConfig,
    pub transcode: TranscodeConfig,
    pub storage: StorageConfig,
    pub progress: ProgressConfig,
    pub api: ApiConfig,
}

/// Chunked upload behavior and retry limits.
///
/// Controls chunk sizing, per-chunk timeouts, and the bounded
/// exponential backoff applied to transient transfer failures.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Size of each upload chunk in bytes
    pub chunk_size: usize,
    /// Timeout for a single chunk request
    pub chunk_timeout: Duration,
    /// Maximum retry attempts per chunk before the asset fails
    pub max_retry_attempts: u32,
    /// Base delay for exponential backoff between retries
    pub base_retry_delay: Duration,
    /// Cap on the backoff delay
    pub max_retry_delay: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: 524_288, // 512 KiB
            chunk_timeout: Duration::from_secs(30),
            max_retry_attempts: 5,
            base_retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(30),
        }
    }
}

/// Video transcoding stage configuration.
///
/// The output constraints themselves are a fixed policy owned by the
/// transcode module; this section only bounds how long a single export
/// may run before it is treated as failed.
#[derive(Debug, Clone)]
pub struct TranscodeConfig {
    /// Timeout for a single transcode operation
    pub transcode_timeout: Duration,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            transcode_timeout: Duration::from_secs(600), // 10 minutes
        }
    }
}

/// Durable record and temporary file placement.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding one JSON snapshot per upload record
    pub records_dir: PathBuf,
    /// Directory for transcoded temporary files
    pub temp_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = std::env::temp_dir().join("upwell");
        Self {
            records_dir: base.join("records"),
            temp_dir: base.join("tmp"),
        }
    }
}

/// Progress emission tuning.
///
/// Controls callback flood protection and the throughput sampling window.
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Minimum increase in overall fraction before a new progress
    /// event is emitted
    pub min_emit_delta: f64,
    /// Minimum elapsed time between throughput recalculations
    pub throughput_window: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            min_emit_delta: 0.01,
            throughput_window: Duration::from_millis(500),
        }
    }
}

/// Remote API client configuration.
///
/// Controls HTTP timeouts and identification for the upload endpoint.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// HTTP request timeout for upload and digest calls
    pub request_timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: &'static str,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            user_agent: "upwell/0.1.0",
        }
    }
}
