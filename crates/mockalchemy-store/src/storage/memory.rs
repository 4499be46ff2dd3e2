use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use mockalchemy_core::{Record, record_id};

use super::StorageBackend;
use crate::errors::StorageResult;

/// In-process snapshots; survive store rebuilds within one process only.
///
/// Each write happens under one lock acquisition, so concurrent mirrors
/// of the same collection never overwrite each other.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    snapshots: Mutex<HashMap<String, Vec<Record>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, collection: &str) -> Option<Vec<Record>> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .cloned()
    }

    fn modify(&self, collection: &str, apply: impl FnOnce(&mut Vec<Record>)) {
        let mut snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        apply(snapshots.entry(collection.to_string()).or_default());
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, collection: &str) -> StorageResult<Option<Vec<Record>>> {
        Ok(self.snapshot(collection))
    }

    async fn save_all(&self, collection: &str, records: &[Record]) -> StorageResult<()> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(collection.to_string(), records.to_vec());
        Ok(())
    }

    async fn create_one(&self, collection: &str, record: &Record) -> StorageResult<()> {
        let id = record_id(record);
        self.modify(collection, |records| {
            records.retain(|existing| id.is_none() || record_id(existing) != id);
            records.push(record.clone());
        });
        Ok(())
    }

    async fn update_one(&self, collection: &str, id: &str, record: &Record) -> StorageResult<()> {
        self.modify(collection, |records| {
            match records
                .iter_mut()
                .find(|existing| record_id(existing) == Some(id))
            {
                Some(existing) => *existing = record.clone(),
                None => records.push(record.clone()),
            }
        });
        Ok(())
    }

    async fn delete_one(&self, collection: &str, id: &str) -> StorageResult<()> {
        let mut snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(records) = snapshots.get_mut(collection) {
            records.retain(|existing| record_id(existing) != Some(id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use serde_json::json;

    fn record(id: &str) -> Record {
        json!({"id": id}).as_object().cloned().expect("object")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_creates_all_land_in_the_snapshot() {
        let backend = Arc::new(MemoryBackend::new());
        let mut tasks = Vec::new();
        for index in 0..64 {
            let backend = Arc::clone(&backend);
            tasks.push(tokio::spawn(async move {
                backend
                    .create_one("users", &record(&format!("u{index}")))
                    .await
            }));
        }
        for task in tasks {
            task.await.expect("task").expect("create");
        }

        let snapshot = backend.snapshot("users").expect("snapshot");
        assert_eq!(snapshot.len(), 64);
    }

    #[tokio::test]
    async fn delete_of_unknown_collection_creates_nothing() {
        let backend = MemoryBackend::new();
        backend.delete_one("users", "u1").await.expect("delete");
        assert!(backend.snapshot("users").is_none());

        backend.create_one("users", &record("u1")).await.expect("create");
        backend.create_one("users", &record("u1")).await.expect("create again");
        backend.update_one("users", "u2", &record("u2")).await.expect("upsert");
        assert_eq!(
            backend.snapshot("users"),
            Some(vec![record("u1"), record("u2")])
        );
    }
}
