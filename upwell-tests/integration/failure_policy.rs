//! Failure policy: retries, terminal failures, and offset preservation.

use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use upwell_core::asset::{PostDescriptor, PostId};
use upwell_core::engine::spawn_upload_manager;
use upwell_core::engine::test_mocks::{
    MockAssetResolver, MockTranscodeService, MockUploadClient,
};
use upwell_core::engine::{AssetFailure, UploadEvent};
use upwell_core::store::{JsonRecordStore, RecordState};
use upwell_core::upload::UploadError;

use crate::common::{collect_until_batch_end, sandbox_config};

#[tokio::test]
async fn test_transient_chunk_failures_recover_in_place() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = sandbox_config(&dir);

    let resolver = Arc::new(MockAssetResolver::new());
    resolver.add_photo("photo", Bytes::from(vec![1u8; 8_192]));

    let client = Arc::new(MockUploadClient::new());
    client.fail_chunks_transiently(2);

    let store = Arc::new(JsonRecordStore::new(config.storage.records_dir.clone()));
    let (handle, mut events) = spawn_upload_manager(
        config,
        resolver,
        Arc::new(MockTranscodeService::new(1_024)),
        client.clone(),
        store,
    );

    handle
        .start_new_upload(
            vec![PostDescriptor::new("photo-post", "key", "photo")],
            "gallery-retry",
        )
        .await?;

    let collected = collect_until_batch_end(&mut events).await;

    // The two transient failures were absorbed by in-place retries.
    assert!(matches!(
        collected.last(),
        Some(UploadEvent::BatchCompleted {
            completed: 1,
            failed: 0
        })
    ));
    assert_eq!(client.received_bytes(&PostId::new("photo-post")), 8_192);

    handle.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_digest_failure_is_terminal_but_preserves_offset() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = sandbox_config(&dir);
    let records_dir = config.storage.records_dir.clone();

    let resolver = Arc::new(MockAssetResolver::new());
    resolver.add_photo("photo", Bytes::from(vec![1u8; 8_192]));

    let client = Arc::new(MockUploadClient::new());
    client.fail_digest_for(PostId::new("photo-post"));

    let store = Arc::new(JsonRecordStore::new(records_dir.clone()));
    let (handle, mut events) = spawn_upload_manager(
        config,
        resolver,
        Arc::new(MockTranscodeService::new(1_024)),
        client.clone(),
        store,
    );

    handle
        .start_new_upload(
            vec![PostDescriptor::new("photo-post", "key", "photo")],
            "gallery-digest",
        )
        .await?;

    let collected = collect_until_batch_end(&mut events).await;

    assert!(matches!(
        collected.last(),
        Some(UploadEvent::BatchCompleted {
            completed: 0,
            failed: 1
        })
    ));

    let digest_error = collected.iter().any(|event| {
        matches!(
            event,
            UploadEvent::AssetCompleted {
                error: Some(AssetFailure::Upload(UploadError::Digest { .. })),
                ..
            }
        )
    });
    assert!(digest_error, "asset must report the digest failure");

    // All bytes were transferred exactly once and the terminal record still
    // carries the full acknowledged offset.
    assert_eq!(client.received_bytes(&PostId::new("photo-post")), 8_192);

    let mut entries = tokio::fs::read_dir(&records_dir).await?;
    let entry = entries
        .next_entry()
        .await?
        .expect("the failed record must survive");
    let record: upwell_core::store::UploadRecord =
        serde_json::from_slice(&tokio::fs::read(entry.path()).await?)?;
    assert_eq!(record.state, RecordState::Failed);
    assert_eq!(record.bytes_uploaded, 8_192);

    // clear_cached_uploads purges the terminal leftover.
    handle.clear_cached_uploads().await?;
    let mut entries = tokio::fs::read_dir(&records_dir).await?;
    assert!(entries.next_entry().await?.is_none());

    handle.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_unresolvable_asset_fails_only_itself() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = sandbox_config(&dir);

    let resolver = Arc::new(MockAssetResolver::new());
    resolver.add_photo("photo", Bytes::from(vec![1u8; 4_096]));

    let store = Arc::new(JsonRecordStore::new(config.storage.records_dir.clone()));
    let (handle, mut events) = spawn_upload_manager(
        config,
        resolver,
        Arc::new(MockTranscodeService::new(1_024)),
        Arc::new(MockUploadClient::new()),
        store,
    );

    handle
        .start_new_upload(
            vec![
                PostDescriptor::new("good-post", "key", "photo"),
                PostDescriptor::new("ghost-post", "key", "nonexistent"),
            ],
            "gallery-partial",
        )
        .await?;

    let collected = collect_until_batch_end(&mut events).await;
    assert!(matches!(
        collected.last(),
        Some(UploadEvent::BatchCompleted {
            completed: 1,
            failed: 1
        })
    ));

    let ghost_failed = collected.iter().any(|event| {
        matches!(
            event,
            UploadEvent::AssetCompleted {
                post_id,
                error: Some(AssetFailure::Malformed(_)),
                ..
            } if post_id == &PostId::new("ghost-post")
        )
    });
    assert!(ghost_failed);

    handle.shutdown().await?;
    Ok(())
}
