use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use mockalchemy_core::{Record, record_id};

use super::StorageBackend;
use super::atomic::write_bytes_atomic;
use crate::errors::{StorageError, StorageResult};

/// One pretty-printed JSON array per collection at `<dir>/<collection>.json`.
///
/// Snapshots carry no version marker; a schema change simply loads whatever
/// fields were saved.
#[derive(Debug)]
pub struct LocalFileBackend {
    dir: PathBuf,
    // serializes read-modify-write cycles on the snapshot files
    lock: Mutex<()>,
}

impl LocalFileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshot_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}.json"))
    }

    async fn read(&self, collection: &str) -> StorageResult<Option<Vec<Record>>> {
        let path = self.snapshot_path(collection);
        blocking(move || read_snapshot(&path)).await
    }

    async fn write(&self, collection: &str, records: Vec<Record>) -> StorageResult<()> {
        let path = self.snapshot_path(collection);
        blocking(move || {
            let data = serde_json::to_vec_pretty(&records)?;
            write_bytes_atomic(&path, &data)
        })
        .await
    }

    async fn modify<F>(&self, collection: &str, apply: F) -> StorageResult<()>
    where
        F: FnOnce(&mut Vec<Record>) + Send,
    {
        let _guard = self.lock.lock().await;
        let mut records = self.read(collection).await?.unwrap_or_default();
        apply(&mut records);
        self.write(collection, records).await
    }
}

#[async_trait]
impl StorageBackend for LocalFileBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn load(&self, collection: &str) -> StorageResult<Option<Vec<Record>>> {
        let _guard = self.lock.lock().await;
        self.read(collection).await
    }

    async fn save_all(&self, collection: &str, records: &[Record]) -> StorageResult<()> {
        let _guard = self.lock.lock().await;
        self.write(collection, records.to_vec()).await
    }

    async fn create_one(&self, collection: &str, record: &Record) -> StorageResult<()> {
        let record = record.clone();
        self.modify(collection, move |records| {
            let id = record_id(&record).map(str::to_string);
            records.retain(|existing| id.is_none() || record_id(existing) != id.as_deref());
            records.push(record);
        })
        .await
    }

    async fn update_one(&self, collection: &str, id: &str, record: &Record) -> StorageResult<()> {
        let record = record.clone();
        self.modify(collection, move |records| {
            match records
                .iter_mut()
                .find(|existing| record_id(existing) == Some(id))
            {
                Some(existing) => *existing = record,
                None => records.push(record),
            }
        })
        .await
    }

    async fn delete_one(&self, collection: &str, id: &str) -> StorageResult<()> {
        self.modify(collection, |records| {
            records.retain(|existing| record_id(existing) != Some(id));
        })
        .await
    }
}

fn read_snapshot(path: &Path) -> StorageResult<Option<Vec<Record>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

async fn blocking<T, F>(task: F) -> StorageResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> StorageResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| StorageError::Unavailable(format!("blocking task failed: {err}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("mockalchemy_local_{}", uuid::Uuid::new_v4()))
    }

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().expect("object")
    }

    #[tokio::test]
    async fn missing_snapshot_loads_as_none() {
        let backend = LocalFileBackend::new(temp_dir());
        assert!(backend.load("users").await.expect("load").is_none());
    }

    #[tokio::test]
    async fn save_all_writes_a_json_array_per_collection() {
        let dir = temp_dir();
        let backend = LocalFileBackend::new(&dir);
        let records = vec![record(json!({"id": "u1", "name": "Ada"}))];
        backend.save_all("users", &records).await.expect("save");

        let content = std::fs::read_to_string(dir.join("users.json")).expect("snapshot file");
        let parsed: serde_json::Value = serde_json::from_str(&content).expect("json");
        assert_eq!(parsed, json!([{"id": "u1", "name": "Ada"}]));
        assert_eq!(backend.load("users").await.expect("load"), Some(records));

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn incremental_updates_rewrite_the_snapshot() {
        let dir = temp_dir();
        let backend = LocalFileBackend::new(&dir);
        backend
            .create_one("users", &record(json!({"id": "u1"})))
            .await
            .expect("create");
        backend
            .create_one("users", &record(json!({"id": "u2"})))
            .await
            .expect("create");
        backend
            .update_one("users", "u1", &record(json!({"id": "u1", "name": "Ada"})))
            .await
            .expect("update");
        backend.delete_one("users", "u2").await.expect("delete");

        let records = backend.load("users").await.expect("load").expect("snapshot");
        assert_eq!(records, vec![record(json!({"id": "u1", "name": "Ada"}))]);

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_an_error() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).expect("dir");
        std::fs::write(dir.join("users.json"), b"not json").expect("write");
        let backend = LocalFileBackend::new(&dir);
        assert!(matches!(backend.load("users").await, Err(StorageError::Json(_))));
        std::fs::remove_dir_all(dir).ok();
    }
}
