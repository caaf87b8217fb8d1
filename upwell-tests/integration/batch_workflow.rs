//! Full batch workflows against the file-backed record store.

use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use upwell_core::asset::{PostDescriptor, PostId};
use upwell_core::engine::spawn_upload_manager;
use upwell_core::engine::test_mocks::{
    MockAssetResolver, MockTranscodeService, MockUploadClient,
};
use upwell_core::engine::UploadEvent;
use upwell_core::store::JsonRecordStore;

use crate::common::{collect_until_batch_end, progress_fractions, sandbox_config};

#[tokio::test]
async fn test_mixed_batch_with_durable_store() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = sandbox_config(&dir);
    let records_dir = config.storage.records_dir.clone();
    let temp_dir = config.storage.temp_dir.clone();

    let resolver = Arc::new(MockAssetResolver::new());
    for index in 0..3 {
        resolver.add_photo(&format!("photo-{index}"), Bytes::from(vec![index as u8; 6_000]));
    }
    for index in 0..2 {
        resolver.add_video(&format!("video-{index}"), Bytes::from(vec![index as u8; 20_000]));
    }

    let transcoder = Arc::new(MockTranscodeService::new(8_000));
    let client = Arc::new(MockUploadClient::new());
    let store = Arc::new(JsonRecordStore::new(records_dir.clone()));

    let (handle, mut events) = spawn_upload_manager(
        config,
        resolver,
        transcoder.clone(),
        client.clone(),
        store,
    );

    let mut posts: Vec<PostDescriptor> = (0..3)
        .map(|index| {
            PostDescriptor::new(format!("photo-post-{index}"), "key", format!("photo-{index}"))
        })
        .collect();
    posts.extend((0..2).map(|index| {
        PostDescriptor::new(format!("video-post-{index}"), "key", format!("video-{index}"))
    }));

    // Pre-flight estimate counts videos at their raw sizes.
    let estimate = handle.estimate_upload_size(posts.clone()).await?;
    assert_eq!(estimate, 3 * 6_000 + 2 * 20_000);

    handle.start_new_upload(posts, "gallery-mixed").await?;
    assert!(handle.is_uploading());

    let collected = collect_until_batch_end(&mut events).await;

    assert!(matches!(
        collected.last(),
        Some(UploadEvent::BatchCompleted {
            completed: 5,
            failed: 0
        })
    ));

    let asset_events = collected
        .iter()
        .filter(|event| matches!(event, UploadEvent::AssetCompleted { .. }))
        .count();
    assert_eq!(asset_events, 5);

    let fractions = progress_fractions(&collected);
    assert!(fractions.windows(2).all(|pair| pair[1] >= pair[0]));
    assert_eq!(fractions.last().copied(), Some(1.0));

    // Transcodes ran strictly one at a time even with two videos queued.
    assert_eq!(transcoder.max_concurrent(), 1);

    // Every video transferred at its transcoded size.
    for index in 0..2 {
        let post = PostId::new(format!("video-post-{index}"));
        assert_eq!(client.received_bytes(&post), 8_000);
    }

    // Terminal success leaves neither records nor temp files behind.
    let mut record_entries = tokio::fs::read_dir(&records_dir).await?;
    assert!(record_entries.next_entry().await?.is_none());
    let mut temp_entries = tokio::fs::read_dir(&temp_dir).await?;
    assert!(temp_entries.next_entry().await?.is_none());

    assert!(!handle.is_uploading());
    handle.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_stats_snapshot_tracks_kind_split() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = sandbox_config(&dir);

    let resolver = Arc::new(MockAssetResolver::new());
    resolver.add_photo("photo", Bytes::from(vec![1u8; 10_000]));
    resolver.add_video("video", Bytes::from(vec![2u8; 50_000]));

    let store = Arc::new(JsonRecordStore::new(config.storage.records_dir.clone()));
    let (handle, mut events) = spawn_upload_manager(
        config,
        resolver,
        Arc::new(MockTranscodeService::new(20_000)),
        Arc::new(MockUploadClient::new()),
        store,
    );

    handle
        .start_new_upload(
            vec![
                PostDescriptor::new("photo-post", "key", "photo"),
                PostDescriptor::new("video-post", "key", "video"),
            ],
            "gallery-split",
        )
        .await?;

    let _ = collect_until_batch_end(&mut events).await;

    let stats = handle.current_stats();
    assert_eq!(stats.photo_bytes, 10_000);
    assert_eq!(stats.video_bytes, 20_000);
    assert_eq!(stats.total_bytes, 30_000);
    assert_eq!(stats.accounted_bytes, 30_000);
    assert_eq!(stats.assets_completed, 2);
    assert_eq!(stats.assets_failed, 0);

    handle.shutdown().await?;
    Ok(())
}
