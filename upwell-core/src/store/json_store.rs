//! File-backed record store implementation.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use uuid::Uuid;

use super::{RecordStore, StoreError, UploadRecord};

/// File system-based record store.
///
/// Persists each upload record as an individual JSON snapshot named by its
/// id. Writes go through a temporary file followed by a rename so a crash
/// mid-save never leaves a truncated snapshot behind.
pub struct JsonRecordStore {
    records_dir: PathBuf,
}

impl JsonRecordStore {
    /// Creates a record store rooted at the given directory.
    pub fn new(records_dir: PathBuf) -> Self {
        Self { records_dir }
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.records_dir.join(format!("{id}.json"))
    }

    async fn read_all(&self) -> Result<Vec<UploadRecord>, StoreError> {
        let mut records = Vec::new();

        let mut entries = match fs::read_dir(&self.records_dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(error) => return Err(error.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }

            let raw = fs::read(&path).await?;
            match serde_json::from_slice::<UploadRecord>(&raw) {
                Ok(record) => records.push(record),
                Err(error) => {
                    // A corrupt snapshot must not poison the whole scan.
                    tracing::warn!(
                        "Skipping unreadable record snapshot {}: {}",
                        path.display(),
                        error
                    );
                }
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl RecordStore for JsonRecordStore {
    async fn save(&self, record: &UploadRecord) -> Result<(), StoreError> {
        fs::create_dir_all(&self.records_dir).await?;

        let path = self.record_path(record.id);
        let staging = path.with_extension("json.tmp");
        let encoded = serde_json::to_vec_pretty(record)?;

        fs::write(&staging, &encoded).await?;
        fs::rename(&staging, &path).await?;
        Ok(())
    }

    async fn fetch_incomplete(&self) -> Result<Vec<UploadRecord>, StoreError> {
        let mut records: Vec<UploadRecord> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|record| record.state.is_resumable())
            .collect();

        // Oldest first so resumption preserves original dispatch priority.
        records.sort_by_key(|record| record.created_at);
        Ok(records)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let path = self.record_path(id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::RecordNotFound { id })
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn delete_where(
        &self,
        predicate: &(dyn for<'a> Fn(&'a UploadRecord) -> bool + Sync),
    ) -> Result<usize, StoreError> {
        let mut removed = 0;
        for record in self.read_all().await? {
            if predicate(&record) {
                fs::remove_file(self.record_path(record.id)).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{AssetRef, MediaKind, PostId};
    use crate::store::RecordState;

    fn test_record(post: &str, state: RecordState) -> UploadRecord {
        let mut record = UploadRecord::new(
            PostId::new(post),
            "key".to_string(),
            AssetRef::new(format!("asset-{post}")),
            MediaKind::Photo,
            1_000,
            "gallery-1".to_string(),
        );
        record.state = state;
        record
    }

    #[tokio::test]
    async fn test_save_and_fetch_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRecordStore::new(dir.path().to_path_buf());

        let record = test_record("post-1", RecordState::Uploading);
        store.save(&record).await.unwrap();

        let fetched = store.fetch_incomplete().await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, record.id);
        assert_eq!(fetched[0].post_id, record.post_id);
        assert_eq!(fetched[0].state, RecordState::Uploading);
    }

    #[tokio::test]
    async fn test_fetch_skips_terminal_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRecordStore::new(dir.path().to_path_buf());

        store
            .save(&test_record("post-1", RecordState::Complete))
            .await
            .unwrap();
        store
            .save(&test_record("post-2", RecordState::Failed))
            .await
            .unwrap();
        store
            .save(&test_record("post-3", RecordState::Abandoned))
            .await
            .unwrap();

        let fetched = store.fetch_incomplete().await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].post_id, PostId::new("post-3"));
    }

    #[tokio::test]
    async fn test_save_is_idempotent_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRecordStore::new(dir.path().to_path_buf());

        let mut record = test_record("post-1", RecordState::Uploading);
        store.save(&record).await.unwrap();
        record.bytes_uploaded = 512;
        store.save(&record).await.unwrap();
        store.save(&record).await.unwrap();

        let fetched = store.fetch_incomplete().await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].bytes_uploaded, 512);
    }

    #[tokio::test]
    async fn test_delete_missing_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRecordStore::new(dir.path().to_path_buf());

        let result = store.delete(Uuid::new_v4()).await;
        assert!(matches!(result, Err(StoreError::RecordNotFound { .. })));
    }

    #[tokio::test]
    async fn test_delete_where_purges_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRecordStore::new(dir.path().to_path_buf());

        store
            .save(&test_record("post-1", RecordState::Complete))
            .await
            .unwrap();
        store
            .save(&test_record("post-2", RecordState::Failed))
            .await
            .unwrap();
        store
            .save(&test_record("post-3", RecordState::Pending))
            .await
            .unwrap();

        let removed = store
            .delete_where(&|record| record.state.is_terminal())
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let remaining = store.fetch_incomplete().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].post_id, PostId::new("post-3"));
    }

    #[tokio::test]
    async fn test_fetch_from_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRecordStore::new(dir.path().join("never-created"));

        assert!(store.fetch_incomplete().await.unwrap().is_empty());
    }
}
