//! A complete upload lifecycle as an application would drive it.

use std::sync::{Arc, Once};
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use tokio::sync::mpsc;
use upwell_core::asset::{PostDescriptor, PostId};
use upwell_core::config::UpwellConfig;
use upwell_core::engine::spawn_upload_manager;
use upwell_core::engine::test_mocks::{
    MockAssetResolver, MockTranscodeService, MockUploadClient,
};
use upwell_core::engine::UploadEvent;
use upwell_core::store::JsonRecordStore;
use upwell_core::tracing_setup::init_tracing;

static TRACING: Once = Once::new();

/// Initializes the production tracing stack once for the whole target,
/// writing the debug log into a throwaway directory.
fn init_test_tracing() {
    TRACING.call_once(|| {
        let logs_dir = std::env::temp_dir().join("upwell-e2e-logs");
        if let Err(error) = init_tracing(tracing::Level::WARN, Some(&logs_dir)) {
            eprintln!("tracing setup failed: {error}");
        }
    });
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<UploadEvent>) -> UploadEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_full_upload_cycle() -> Result<()> {
    init_test_tracing();

    let dir = tempfile::tempdir()?;
    let mut config = UpwellConfig::default();
    config.storage.records_dir = dir.path().join("records");
    config.storage.temp_dir = dir.path().join("tmp");
    config.upload.chunk_size = 4096;
    config.progress.min_emit_delta = 0.01;
    config.progress.throughput_window = Duration::from_millis(0);

    let resolver = Arc::new(MockAssetResolver::new());
    resolver.add_photo("vacation.jpg", Bytes::from(vec![1u8; 100_000]));
    resolver.add_video("vacation.mov", Bytes::from(vec![2u8; 500_000]));

    let client = Arc::new(MockUploadClient::new());
    let store = Arc::new(JsonRecordStore::new(config.storage.records_dir.clone()));

    let (handle, mut events) = spawn_upload_manager(
        config,
        resolver,
        Arc::new(MockTranscodeService::new(200_000)),
        client.clone(),
        store,
    );

    // Startup: nothing cached, sandbox gets cleared.
    assert_eq!(handle.check_cached_uploads().await?, 0);
    assert!(!handle.is_uploading());

    // Pre-flight: the caller sizes the batch before committing to it.
    let posts = vec![
        PostDescriptor::new("post-photo", "key-1", "vacation.jpg"),
        PostDescriptor::new("post-video", "key-2", "vacation.mov"),
    ];
    let estimate = handle.estimate_upload_size(posts.clone()).await?;
    assert_eq!(estimate, 600_000);

    // Upload and watch the whole lifecycle go by.
    handle.start_new_upload(posts, "gallery-trip").await?;
    assert!(handle.is_uploading());

    let mut saw_progress = false;
    let mut asset_events = 0;
    loop {
        match next_event(&mut events).await {
            UploadEvent::BatchStarted { assets, .. } => assert_eq!(assets, 2),
            UploadEvent::OverallProgress { fraction, .. } => {
                saw_progress = true;
                assert!((0.0..=1.0).contains(&fraction));
            }
            UploadEvent::AssetCompleted { error, .. } => {
                assert!(error.is_none());
                asset_events += 1;
            }
            UploadEvent::BatchCompleted { completed, failed } => {
                assert_eq!(completed, 2);
                assert_eq!(failed, 0);
                break;
            }
            UploadEvent::BatchCancelled { .. } => panic!("nothing was cancelled"),
        }
    }
    assert!(saw_progress);
    assert_eq!(asset_events, 2);
    assert!(!handle.is_uploading());

    // The video travelled at its transcoded size.
    assert_eq!(
        client.received_bytes(&PostId::new("post-video")),
        200_000
    );

    // A second startup scan finds a clean slate.
    assert_eq!(handle.check_cached_uploads().await?, 0);

    assert!(handle.is_running());
    handle.shutdown().await?;
    Ok(())
}
