//! Integration tests for batch orchestration through the engine actor.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::sync::mpsc;

    use crate::asset::{MediaKind, PostDescriptor, PostId};
    use crate::config::UpwellConfig;
    use crate::engine::spawn_upload_manager;
    use crate::engine::test_mocks::{
        InMemoryRecordStore, MockAssetResolver, MockTranscodeService, MockUploadClient,
    };
    use crate::engine::{AssetFailure, UploadEvent, UploadManagerError};
    use crate::store::{RecordState, UploadRecord};
    use crate::transcode::TranscodeError;

    const PHOTO_SIZE: usize = 1_000_000;
    const VIDEO_RAW_SIZE: usize = 5_000_000;
    const VIDEO_TRANSCODED_SIZE: u64 = 2_000_000;

    fn test_config(dir: &tempfile::TempDir) -> UpwellConfig {
        let mut config = UpwellConfig::default();
        config.storage.records_dir = dir.path().join("records");
        config.storage.temp_dir = dir.path().join("tmp");
        config.upload.chunk_size = 262_144; // 256 KiB keeps chunk counts small
        config.upload.base_retry_delay = Duration::from_millis(1);
        config.upload.max_retry_delay = Duration::from_millis(5);
        config.progress.min_emit_delta = 0.01;
        config.progress.throughput_window = Duration::from_millis(0);
        config
    }

    async fn recv_event(events: &mut mpsc::UnboundedReceiver<UploadEvent>) -> UploadEvent {
        tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    /// Collects events until the batch reaches terminal state.
    async fn collect_until_batch_end(
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

    fn asset_outcomes(events: &[UploadEvent]) -> Vec<(PostId, bool, u64, bool)> {
        events
            .iter()
            .filter_map(|event| match event {
                UploadEvent::AssetCompleted {
                    post_id,
                    is_video,
                    file_size,
                    error,
                    ..
                } => Some((post_id.clone(), *is_video, *file_size, error.is_none())),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_photo_and_video_batch_completes() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Arc::new(MockAssetResolver::new());
        resolver.add_photo("photo-asset", Bytes::from(vec![1u8; PHOTO_SIZE]));
        resolver.add_video("video-asset", Bytes::from(vec![2u8; VIDEO_RAW_SIZE]));

        let transcoder = Arc::new(MockTranscodeService::new(VIDEO_TRANSCODED_SIZE));
        let client = Arc::new(MockUploadClient::new());
        let store = Arc::new(InMemoryRecordStore::new());

        let (handle, mut events) = spawn_upload_manager(
            test_config(&dir),
            resolver,
            transcoder,
            client.clone(),
            store.clone(),
        );

        handle
            .start_new_upload(
                vec![
                    PostDescriptor::new("photo-1", "key-a", "photo-asset"),
                    PostDescriptor::new("video-1", "key-b", "video-asset"),
                ],
                "gallery-1",
            )
            .await
            .unwrap();
        assert!(handle.is_uploading());

        let collected = collect_until_batch_end(&mut events).await;

        assert!(matches!(
            collected.first(),
            Some(UploadEvent::BatchStarted { assets: 2, .. })
        ));
        assert!(matches!(
            collected.last(),
            Some(UploadEvent::BatchCompleted {
                completed: 2,
                failed: 0
            })
        ));

        // Exactly one terminal event per asset, with the video reported at
        // its transcoded size.
        let outcomes = asset_outcomes(&collected);
        assert_eq!(outcomes.len(), 2);
        for (post_id, is_video, file_size, ok) in &outcomes {
            assert!(ok, "asset {post_id} should succeed");
            if *is_video {
                assert_eq!(*file_size, VIDEO_TRANSCODED_SIZE);
            } else {
                assert_eq!(*file_size, PHOTO_SIZE as u64);
            }
        }

        // Emitted overall progress never decreases and ends at 1.0.
        let fractions: Vec<f64> = collected
            .iter()
            .filter_map(|event| match event {
                UploadEvent::OverallProgress { fraction, .. } => Some(*fraction),
                _ => None,
            })
            .collect();
        assert!(!fractions.is_empty());
        assert!(fractions.windows(2).all(|pair| pair[1] >= pair[0]));
        assert_eq!(*fractions.last().unwrap(), 1.0);

        // Video counted at its transcoded size once known.
        let stats = handle.current_stats();
        assert!(!stats.is_uploading);
        assert_eq!(stats.total_bytes, PHOTO_SIZE as u64 + VIDEO_TRANSCODED_SIZE);
        assert_eq!(stats.accounted_bytes, PHOTO_SIZE as u64 + VIDEO_TRANSCODED_SIZE);
        assert_eq!(stats.assets_completed, 2);

        // Exact bytes transferred, and no record survives a digested post.
        assert_eq!(
            client.received_bytes(&PostId::new("photo-1")),
            PHOTO_SIZE as u64
        );
        assert_eq!(
            client.received_bytes(&PostId::new("video-1")),
            VIDEO_TRANSCODED_SIZE
        );
        assert!(store.is_empty());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_while_uploading_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Arc::new(MockAssetResolver::new());
        resolver.add_video("video-asset", Bytes::from(vec![2u8; 4096]));

        let (handle, mut events) = spawn_upload_manager(
            test_config(&dir),
            resolver,
            Arc::new(MockTranscodeService::new(2048)),
            Arc::new(MockUploadClient::new()),
            Arc::new(InMemoryRecordStore::new()),
        );

        handle
            .start_new_upload(
                vec![PostDescriptor::new("video-1", "key", "video-asset")],
                "gallery-1",
            )
            .await
            .unwrap();
        assert!(handle.is_uploading());

        // The transcode is still running: a second batch must be rejected
        // without disturbing the first.
        let rejected = handle
            .start_new_upload(
                vec![PostDescriptor::new("video-2", "key", "video-asset")],
                "gallery-2",
            )
            .await;
        assert!(matches!(
            rejected,
            Err(UploadManagerError::AlreadyUploading)
        ));

        let collected = collect_until_batch_end(&mut events).await;
        assert!(matches!(
            collected.last(),
            Some(UploadEvent::BatchCompleted {
                completed: 1,
                failed: 0
            })
        ));
        assert!(!handle.is_uploading());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_transcode_failure_keeps_batch_running() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Arc::new(MockAssetResolver::new());
        resolver.add_photo("photo-asset", Bytes::from(vec![1u8; 8192]));
        resolver.add_video("video-asset", Bytes::from(vec![2u8; 16_384]));

        let store = Arc::new(InMemoryRecordStore::new());
        let (handle, mut events) = spawn_upload_manager(
            test_config(&dir),
            resolver,
            Arc::new(MockTranscodeService::failing()),
            Arc::new(MockUploadClient::new()),
            store.clone(),
        );

        handle
            .start_new_upload(
                vec![
                    PostDescriptor::new("photo-1", "key-a", "photo-asset"),
                    PostDescriptor::new("video-1", "key-b", "video-asset"),
                ],
                "gallery-1",
            )
            .await
            .unwrap();

        let collected = collect_until_batch_end(&mut events).await;

        // Partial success: the batch still completes.
        assert!(matches!(
            collected.last(),
            Some(UploadEvent::BatchCompleted {
                completed: 1,
                failed: 1
            })
        ));

        let mut photo_ok = false;
        let mut video_failed = false;
        for event in &collected {
            if let UploadEvent::AssetCompleted {
                post_id, error, ..
            } = event
            {
                if post_id == &PostId::new("photo-1") {
                    photo_ok = error.is_none();
                }
                if post_id == &PostId::new("video-1") {
                    video_failed = matches!(
                        error,
                        Some(AssetFailure::Transcode(TranscodeError::Failed { .. }))
                    );
                }
            }
        }
        assert!(photo_ok, "photo must complete cleanly");
        assert!(video_failed, "video must report its transcode failure");

        // The failed video keeps a terminal record; the photo's is gone.
        assert!(store.get(&PostId::new("photo-1")).is_none());
        assert_eq!(
            store.get(&PostId::new("video-1")).map(|record| record.state),
            Some(RecordState::Failed)
        );

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_single_transcode_slot_across_batch() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Arc::new(MockAssetResolver::new());
        for index in 0..4 {
            resolver.add_video(&format!("video-{index}"), Bytes::from(vec![3u8; 4096]));
        }

        let transcoder = Arc::new(MockTranscodeService::new(2048));
        let (handle, mut events) = spawn_upload_manager(
            test_config(&dir),
            resolver,
            transcoder.clone(),
            Arc::new(MockUploadClient::new()),
            Arc::new(InMemoryRecordStore::new()),
        );

        let posts = (0..4)
            .map(|index| {
                PostDescriptor::new(format!("post-{index}"), "key", format!("video-{index}"))
            })
            .collect();
        handle.start_new_upload(posts, "gallery-1").await.unwrap();

        let collected = collect_until_batch_end(&mut events).await;
        assert!(matches!(
            collected.last(),
            Some(UploadEvent::BatchCompleted {
                completed: 4,
                failed: 0
            })
        ));

        assert_eq!(
            transcoder.max_concurrent(),
            1,
            "only one export session may run at a time"
        );

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_posts_are_skipped_individually() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Arc::new(MockAssetResolver::new());
        resolver.add_photo("photo-asset", Bytes::from(vec![1u8; 4096]));

        let (handle, mut events) = spawn_upload_manager(
            test_config(&dir),
            resolver,
            Arc::new(MockTranscodeService::new(1024)),
            Arc::new(MockUploadClient::new()),
            Arc::new(InMemoryRecordStore::new()),
        );

        handle
            .start_new_upload(
                vec![
                    PostDescriptor::new("", "key", "photo-asset"),
                    PostDescriptor::new("post-2", "key", "missing-asset"),
                    PostDescriptor::new("post-3", "key", "photo-asset"),
                ],
                "gallery-1",
            )
            .await
            .unwrap();

        let collected = collect_until_batch_end(&mut events).await;
        assert!(matches!(
            collected.last(),
            Some(UploadEvent::BatchCompleted {
                completed: 1,
                failed: 2
            })
        ));

        let outcomes = asset_outcomes(&collected);
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes.iter().filter(|(_, _, _, ok)| *ok).count(), 1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_keeps_records_resumable() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Arc::new(MockAssetResolver::new());
        resolver.add_photo("photo-asset", Bytes::from(vec![1u8; 8192]));
        resolver.add_video("video-asset", Bytes::from(vec![2u8; 8192]));

        let client = Arc::new(MockUploadClient::new());
        client.set_chunk_delay_ms(50);
        let store = Arc::new(InMemoryRecordStore::new());

        let mut config = test_config(&dir);
        config.upload.chunk_size = 2048; // multiple chunks per asset

        let (handle, mut events) = spawn_upload_manager(
            config,
            resolver,
            Arc::new(MockTranscodeService::new(4096)),
            client,
            store.clone(),
        );

        handle
            .start_new_upload(
                vec![
                    PostDescriptor::new("photo-1", "key-a", "photo-asset"),
                    PostDescriptor::new("video-1", "key-b", "video-asset"),
                ],
                "gallery-1",
            )
            .await
            .unwrap();

        handle.cancel_upload().await.unwrap();

        let collected = collect_until_batch_end(&mut events).await;
        assert!(matches!(
            collected.last(),
            Some(UploadEvent::BatchCancelled { .. })
        ));
        assert!(!handle.is_uploading());

        // Durable state survives cancellation for the next startup.
        let remaining = store.states();
        assert!(!remaining.is_empty());
        assert!(
            remaining
                .iter()
                .all(|state| *state == RecordState::Abandoned)
        );

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_resume_never_resends_acknowledged_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Arc::new(MockAssetResolver::new());
        resolver.add_photo("photo-asset", Bytes::from(vec![1u8; 8192]));

        let client = Arc::new(MockUploadClient::new());
        let store = Arc::new(InMemoryRecordStore::new());

        // A previous run acknowledged 6144 of 8192 bytes.
        let mut record = UploadRecord::new(
            PostId::new("photo-1"),
            "key-a".to_string(),
            crate::asset::AssetRef::new("photo-asset"),
            MediaKind::Photo,
            8192,
            "gallery-1".to_string(),
        );
        record.state = RecordState::Uploading;
        record.bytes_uploaded = 6144;
        store.insert(record);

        let mut config = test_config(&dir);
        config.upload.chunk_size = 2048;

        let (handle, mut events) = spawn_upload_manager(
            config,
            resolver,
            Arc::new(MockTranscodeService::new(1024)),
            client.clone(),
            store.clone(),
        );

        let resumed = handle.check_cached_uploads().await.unwrap();
        assert_eq!(resumed, 1);

        let collected = collect_until_batch_end(&mut events).await;
        assert!(matches!(
            collected.last(),
            Some(UploadEvent::BatchCompleted {
                completed: 1,
                failed: 0
            })
        ));

        // Only offsets at or past the acknowledged byte count were sent.
        let offsets = client.chunk_offsets(&PostId::new("photo-1"));
        assert_eq!(offsets, vec![6144]);
        assert_eq!(client.received_bytes(&PostId::new("photo-1")), 2048);
        assert!(store.is_empty());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_resume_with_valid_temp_file_skips_transcode() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);

        // Transcoded output from the interrupted run is still on disk.
        tokio::fs::create_dir_all(&config.storage.temp_dir)
            .await
            .unwrap();
        let temp_path = config.storage.temp_dir.join("leftover.mp4");
        tokio::fs::write(&temp_path, vec![0u8; 4096]).await.unwrap();

        let store = Arc::new(InMemoryRecordStore::new());
        let mut record = UploadRecord::new(
            PostId::new("video-1"),
            "key-b".to_string(),
            crate::asset::AssetRef::new("video-asset"),
            MediaKind::Video,
            4096,
            "gallery-1".to_string(),
        );
        record.state = RecordState::ReadyToUpload;
        record.temp_file = Some(temp_path.clone());
        store.insert(record);

        let transcoder = Arc::new(MockTranscodeService::new(4096));
        let (handle, mut events) = spawn_upload_manager(
            config,
            Arc::new(MockAssetResolver::new()),
            transcoder.clone(),
            Arc::new(MockUploadClient::new()),
            store.clone(),
        );

        let resumed = handle.check_cached_uploads().await.unwrap();
        assert_eq!(resumed, 1);

        let collected = collect_until_batch_end(&mut events).await;
        assert!(matches!(
            collected.last(),
            Some(UploadEvent::BatchCompleted {
                completed: 1,
                failed: 0
            })
        ));

        // The export service was never touched.
        assert_eq!(transcoder.max_concurrent(), 0);
        // The temp file is gone once the asset completed.
        assert!(!temp_path.exists());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_check_cached_uploads_empty_clears_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);

        tokio::fs::create_dir_all(&config.storage.temp_dir)
            .await
            .unwrap();
        for name in ["stale-1.mp4", "stale-2.mp4"] {
            tokio::fs::write(config.storage.temp_dir.join(name), b"stale")
                .await
                .unwrap();
        }
        let temp_dir = config.storage.temp_dir.clone();

        let store = Arc::new(InMemoryRecordStore::new());
        let (handle, _events) = spawn_upload_manager(
            config,
            Arc::new(MockAssetResolver::new()),
            Arc::new(MockTranscodeService::new(1024)),
            Arc::new(MockUploadClient::new()),
            store.clone(),
        );

        let resumed = handle.check_cached_uploads().await.unwrap();
        assert_eq!(resumed, 0);
        assert!(!handle.is_uploading());

        // Sandbox emptied, store untouched (it was already empty).
        let mut entries = tokio::fs::read_dir(&temp_dir).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
        assert!(store.is_empty());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_estimate_upload_size() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Arc::new(MockAssetResolver::new());
        resolver.add_photo("photo-asset", Bytes::from(vec![1u8; 1_000]));
        resolver.add_video("video-asset", Bytes::from(vec![2u8; 5_000]));

        let (handle, _events) = spawn_upload_manager(
            test_config(&dir),
            resolver,
            Arc::new(MockTranscodeService::new(1024)),
            Arc::new(MockUploadClient::new()),
            Arc::new(InMemoryRecordStore::new()),
        );

        let estimate = handle
            .estimate_upload_size(vec![
                PostDescriptor::new("post-1", "key", "photo-asset"),
                PostDescriptor::new("post-2", "key", "video-asset"),
            ])
            .await
            .unwrap();
        assert_eq!(estimate, 6_000);

        let malformed = handle
            .estimate_upload_size(vec![PostDescriptor::new("", "key", "photo-asset")])
            .await;
        assert!(matches!(malformed, Err(UploadManagerError::Asset(_))));

        handle.shutdown().await.unwrap();
    }
}
