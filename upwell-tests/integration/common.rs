//! Shared helpers for integration tests.

use std::time::Duration;

use tokio::sync::mpsc;
use upwell_core::config::UpwellConfig;
use upwell_core::engine::UploadEvent;

/// Builds an engine configuration rooted in the given sandbox directory,
/// tuned for fast deterministic tests.
pub fn sandbox_config(dir: &tempfile::TempDir) -> UpwellConfig {
    let mut config = UpwellConfig::default();
    config.storage.records_dir = dir.path().join("records");
    config.storage.temp_dir = dir.path().join("tmp");
    config.upload.chunk_size = 2048;
    config.upload.base_retry_delay = Duration::from_millis(1);
    config.upload.max_retry_delay = Duration::from_millis(5);
    config.progress.min_emit_delta = 0.01;
    config.progress.throughput_window = Duration::from_millis(0);
    config
}

/// Receives the next event or panics after a generous timeout.
pub async fn recv_event(events: &mut mpsc::UnboundedReceiver<UploadEvent>) -> UploadEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Collects events until the batch reaches terminal state.
pub async fn collect_until_batch_end(
    events: &mut mpsc::UnboundedReceiver<UploadEvent>,
) -> Vec<UploadEvent> {
    let mut collected = Vec::new();
    loop {
        let event = recv_event(events).await;
        let done = matches!(
            event,
            UploadEvent::BatchCompleted { .. } | UploadEvent::BatchCancelled { .. }
        );
        collected.push(event);
        if done {
            return collected;
        }
    }
}

/// Extracts the emitted overall-progress fractions, in order.
pub fn progress_fractions(events: &[UploadEvent]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|event| match event {
            UploadEvent::OverallProgress { fraction, .. } => Some(*fraction),
            _ => None,
        })
        .collect()
}
