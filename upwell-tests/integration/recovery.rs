//! Crash-resilient resumption across engine restarts.

use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use upwell_core::asset::{PostDescriptor, PostId};
use upwell_core::engine::spawn_upload_manager;
use upwell_core::engine::test_mocks::{
    MockAssetResolver, MockTranscodeService, MockUploadClient,
};
use upwell_core::engine::UploadEvent;
use upwell_core::store::{JsonRecordStore, RecordStore};

use crate::common::{collect_until_batch_end, recv_event, sandbox_config};

#[tokio::test]
async fn test_cancelled_batch_resumes_after_restart() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = sandbox_config(&dir);
    config.upload.chunk_size = 1024; // eight chunks leave room to cancel mid-transfer
    let records_dir = config.storage.records_dir.clone();

    let resolver = Arc::new(MockAssetResolver::new());
    resolver.add_photo("photo", Bytes::from(vec![7u8; 8_192]));

    // First run: slow chunks so cancellation lands mid-transfer.
    let first_client = Arc::new(MockUploadClient::new());
    first_client.set_chunk_delay_ms(30);

    let (first_handle, mut first_events) = spawn_upload_manager(
        config.clone(),
        resolver.clone(),
        Arc::new(MockTranscodeService::new(1_024)),
        first_client,
        Arc::new(JsonRecordStore::new(records_dir.clone())),
    );

    first_handle
        .start_new_upload(
            vec![PostDescriptor::new("photo-post", "key", "photo")],
            "gallery-resume",
        )
        .await?;

    // Wait until at least one chunk is acknowledged, then cancel.
    loop {
        if matches!(
            recv_event(&mut first_events).await,
            UploadEvent::OverallProgress { .. }
        ) {
            break;
        }
    }
    first_handle.cancel_upload().await?;

    let collected = collect_until_batch_end(&mut first_events).await;
    assert!(matches!(
        collected.last(),
        Some(UploadEvent::BatchCancelled { .. })
    ));
    first_handle.shutdown().await?;

    // The durable record carries the acknowledged offset.
    let persisted = JsonRecordStore::new(records_dir.clone())
        .fetch_incomplete()
        .await?;
    assert_eq!(persisted.len(), 1);
    let acknowledged = persisted[0].bytes_uploaded;
    assert!(acknowledged > 0, "cancellation must not lose the offset");
    assert!(acknowledged < 8_192);

    // Second run: a fresh engine resumes from the persisted offset.
    let second_client = Arc::new(MockUploadClient::new());
    let (second_handle, mut second_events) = spawn_upload_manager(
        config,
        resolver,
        Arc::new(MockTranscodeService::new(1_024)),
        second_client.clone(),
        Arc::new(JsonRecordStore::new(records_dir.clone())),
    );

    let resumed = second_handle.check_cached_uploads().await?;
    assert_eq!(resumed, 1);
    assert!(second_handle.is_uploading());

    let collected = collect_until_batch_end(&mut second_events).await;
    assert!(matches!(
        collected.last(),
        Some(UploadEvent::BatchCompleted {
            completed: 1,
            failed: 0
        })
    ));

    // No acknowledged byte was re-sent.
    let offsets = second_client.chunk_offsets(&PostId::new("photo-post"));
    assert!(!offsets.is_empty());
    assert!(offsets.iter().all(|&offset| offset >= acknowledged));
    assert_eq!(
        second_client.received_bytes(&PostId::new("photo-post")),
        8_192 - acknowledged
    );

    // Completion removed the durable record.
    let remaining = JsonRecordStore::new(records_dir)
        .fetch_incomplete()
        .await?;
    assert!(remaining.is_empty());

    second_handle.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_startup_scan_with_nothing_to_resume() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = sandbox_config(&dir);
    let temp_dir = config.storage.temp_dir.clone();

    // Stale transcoded leftovers from some long-gone run.
    tokio::fs::create_dir_all(&temp_dir).await?;
    for name in ["a.mp4", "b.mp4", "c.mp4"] {
        tokio::fs::write(temp_dir.join(name), b"stale output").await?;
    }

    let (handle, _events) = spawn_upload_manager(
        config,
        Arc::new(MockAssetResolver::new()),
        Arc::new(MockTranscodeService::new(1_024)),
        Arc::new(MockUploadClient::new()),
        Arc::new(JsonRecordStore::new(dir.path().join("records"))),
    );

    let resumed = handle.check_cached_uploads().await?;
    assert_eq!(resumed, 0);
    assert!(!handle.is_uploading());

    let mut entries = tokio::fs::read_dir(&temp_dir).await?;
    assert!(
        entries.next_entry().await?.is_none(),
        "sandbox must be empty after the scan"
    );

    handle.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_interrupted_video_retranscodes_when_output_lost() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = sandbox_config(&dir);
    let records_dir = config.storage.records_dir.clone();

    let resolver = Arc::new(MockAssetResolver::new());
    resolver.add_video("video", Bytes::from(vec![9u8; 16_384]));

    // A record interrupted mid-transcode: no temp file was ever recorded.
    let record = {
        let mut record = upwell_core::store::UploadRecord::new(
            PostId::new("video-post"),
            "key".to_string(),
            upwell_core::asset::AssetRef::new("video"),
            upwell_core::asset::MediaKind::Video,
            16_384,
            "gallery-video".to_string(),
        );
        record.state = upwell_core::store::RecordState::Transcoding;
        record
    };
    let seed_store = JsonRecordStore::new(records_dir.clone());
    seed_store.save(&record).await?;

    let transcoder = Arc::new(MockTranscodeService::new(4_096));
    let client = Arc::new(MockUploadClient::new());
    let (handle, mut events) = spawn_upload_manager(
        config,
        resolver,
        transcoder.clone(),
        client.clone(),
        Arc::new(JsonRecordStore::new(records_dir)),
    );

    let resumed = handle.check_cached_uploads().await?;
    assert_eq!(resumed, 1);

    let collected = collect_until_batch_end(&mut events).await;
    assert!(matches!(
        collected.last(),
        Some(UploadEvent::BatchCompleted {
            completed: 1,
            failed: 0
        })
    ));

    // The pipeline restarted: one export ran and the transcoded size was
    // transferred from offset zero.
    assert_eq!(transcoder.max_concurrent(), 1);
    assert_eq!(client.received_bytes(&PostId::new("video-post")), 4_096);

    handle.shutdown().await?;
    Ok(())
}
