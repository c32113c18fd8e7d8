//! Metadata object-storage backend.
//!
//! The orchestrator persists its aggregates in a per-tenant bucket through
//! this trait. Real deployments back it with object storage; tests and local
//! runs use [`MemoryStorage`].

use async_trait::async_trait;
use dashmap::DashMap;

use flotilla_common::{Error, Result};

/// A flat key/value object store with prefix listing.
///
/// Keys are slash-separated paths (`clusters/byName/c1`). Writes are
/// atomic per key; there is no cross-key transaction.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Read an object; not-found when the key does not exist
    async fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// Create or overwrite an object
    async fn write(&self, key: &str, data: Vec<u8>) -> Result<()>;

    /// Remove an object; not-found when the key does not exist
    async fn delete(&self, key: &str) -> Result<()>;

    /// List the keys under a prefix, in unspecified order
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// In-memory [`ObjectStorage`] used by tests and single-process runs.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: DashMap<String, Vec<u8>>,
}

impl MemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::not_found("object", key))
    }

    async fn write(&self, key: &str, data: Vec<u8>) -> Result<()> {
        self.objects.insert(key.to_string(), data);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("object", key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_read_round_trip() {
        let storage = MemoryStorage::new();
        storage
            .write("clusters/byName/c1", b"payload".to_vec())
            .await
            .expect("write");
        let data = storage.read("clusters/byName/c1").await.expect("read");
        assert_eq!(data, b"payload");
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let storage = MemoryStorage::new();
        let err = storage.read("clusters/byName/ghost").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let storage = MemoryStorage::new();
        let err = storage.delete("clusters/byName/ghost").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_filters_by_prefix() {
        let storage = MemoryStorage::new();
        storage
            .write("clusters/byName/c1", vec![1])
            .await
            .expect("write");
        storage
            .write("clusters/byName/c2", vec![2])
            .await
            .expect("write");
        storage
            .write("subnets/byName/s1", vec![3])
            .await
            .expect("write");

        let mut keys = storage.list("clusters/byName/").await.expect("list");
        keys.sort();
        assert_eq!(keys, vec!["clusters/byName/c1", "clusters/byName/c2"]);
    }
}
