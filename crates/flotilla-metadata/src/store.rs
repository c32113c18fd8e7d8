//! Transactional metadata persistence.
//!
//! Records live in a per-tenant bucket, one folder per record kind, each entry
//! written under both `byName/` and `byID/`. Access goes through a
//! per-record reader/writer lock: [`FolderStore::alter`] serializes with other
//! alters and with inspects of the same record, while inspects of one record
//! run in parallel with each other. There is no cross-record transaction.

use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use flotilla_common::{Error, Result, METADATA_BUCKET_PREFIX};
use flotilla_provider::ObjectStorage;

/// A record persistable in a metadata folder.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Human name of the record kind, used in errors ("cluster", "subnet")
    const KIND: &'static str;
    /// Folder under the bucket ("clusters", "subnets")
    const FOLDER: &'static str;

    /// Provider-side or synthetic identifier
    fn id(&self) -> &str;
    /// Unique name within the tenant
    fn name(&self) -> &str;
}

/// Typed store over one metadata folder.
pub struct FolderStore<T> {
    storage: Arc<dyn ObjectStorage>,
    bucket: String,
    locks: DashMap<String, Arc<RwLock<()>>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Record> FolderStore<T> {
    /// Store for `tenant`, bucket `<prefix>-<tenant>`.
    pub fn new(storage: Arc<dyn ObjectStorage>, tenant: &str) -> Self {
        Self::with_bucket(storage, format!("{}-{}", METADATA_BUCKET_PREFIX, tenant))
    }

    /// Store over an explicitly named bucket (provider override).
    pub fn with_bucket(storage: Arc<dyn ObjectStorage>, bucket: String) -> Self {
        Self {
            storage,
            bucket,
            locks: DashMap::new(),
            _marker: PhantomData,
        }
    }

    fn key_by_name(&self, name: &str) -> String {
        format!("{}/{}/byName/{}", self.bucket, T::FOLDER, name)
    }

    fn key_by_id(&self, id: &str) -> String {
        format!("{}/{}/byID/{}", self.bucket, T::FOLDER, id)
    }

    fn lock_for(&self, name: &str) -> Arc<RwLock<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    async fn read_unlocked(&self, name: &str) -> Result<T> {
        let data = self
            .storage
            .read(&self.key_by_name(name))
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    Error::not_found(T::KIND, name)
                } else {
                    e
                }
            })?;
        serde_json::from_slice(&data).map_err(|e| {
            Error::inconsistent(format!("failed to decode {} '{}': {}", T::KIND, name, e))
        })
    }

    async fn write_unlocked(&self, record: &T) -> Result<()> {
        let data = serde_json::to_vec(record).map_err(|e| {
            Error::inconsistent(format!(
                "failed to encode {} '{}': {}",
                T::KIND,
                record.name(),
                e
            ))
        })?;
        self.storage
            .write(&self.key_by_name(record.name()), data.clone())
            .await?;
        self.storage
            .write(&self.key_by_id(record.id()), data)
            .await
    }

    /// Atomic single-record read.
    pub async fn read(&self, name: &str) -> Result<T> {
        let lock = self.lock_for(name);
        let _guard = lock.read().await;
        self.read_unlocked(name).await
    }

    /// Read a record through its `byID/` entry.
    pub async fn read_by_id(&self, id: &str) -> Result<T> {
        let data = self.storage.read(&self.key_by_id(id)).await.map_err(|e| {
            if e.is_not_found() {
                Error::not_found(T::KIND, id)
            } else {
                e
            }
        })?;
        let record: T = serde_json::from_slice(&data).map_err(|e| {
            Error::inconsistent(format!("failed to decode {} '{}': {}", T::KIND, id, e))
        })?;
        // Re-read under the name lock so the view is consistent with alters.
        self.read(record.name()).await
    }

    /// Atomic single-record overwrite.
    pub async fn write(&self, record: &T) -> Result<()> {
        let lock = self.lock_for(record.name());
        let _guard = lock.write().await;
        self.write_unlocked(record).await
    }

    /// Create a record, refusing a name collision.
    pub async fn create(&self, record: &T) -> Result<()> {
        let lock = self.lock_for(record.name());
        let _guard = lock.write().await;
        match self.read_unlocked(record.name()).await {
            Ok(_) => Err(Error::duplicate(T::KIND, record.name())),
            Err(e) if e.is_not_found() => self.write_unlocked(record).await,
            Err(e) => Err(e),
        }
    }

    /// Remove a record; not-found when it does not exist.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let lock = self.lock_for(name);
        let _guard = lock.write().await;
        let record = self.read_unlocked(name).await?;
        self.storage.delete(&self.key_by_name(name)).await?;
        // The byID entry may already be gone after a half-completed delete.
        match self.storage.delete(&self.key_by_id(record.id())).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Iterate every record in the folder; an error from `cb` short-circuits
    /// the walk.
    pub async fn browse(&self, mut cb: impl FnMut(T) -> Result<()>) -> Result<()> {
        let prefix = format!("{}/{}/byName/", self.bucket, T::FOLDER);
        for key in self.storage.list(&prefix).await? {
            let data = self.storage.read(&key).await?;
            let record: T = serde_json::from_slice(&data).map_err(|e| {
                Error::inconsistent(format!("failed to decode {} at '{}': {}", T::KIND, key, e))
            })?;
            cb(record)?;
        }
        Ok(())
    }

    /// Read-modify-write under the record's exclusive lock.
    ///
    /// The mutator sees the freshly read record; when it returns an error
    /// nothing is written. Concurrent alters of the same record serialize.
    pub async fn alter<R>(
        &self,
        name: &str,
        mutator: impl FnOnce(&mut T) -> Result<R>,
    ) -> Result<R> {
        let lock = self.lock_for(name);
        let _guard = lock.write().await;
        let mut record = self.read_unlocked(name).await?;
        let outcome = mutator(&mut record)?;
        self.write_unlocked(&record).await?;
        debug!(kind = T::KIND, name = name, "altered metadata");
        Ok(outcome)
    }

    /// Run a viewer over a cloned view of the record under a shared lock.
    pub async fn inspect<R>(&self, name: &str, viewer: impl FnOnce(&T) -> Result<R>) -> Result<R> {
        let lock = self.lock_for(name);
        let _guard = lock.read().await;
        let record = self.read_unlocked(name).await?;
        viewer(&record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{ClusterAggregate, ClusterIdentity};
    use flotilla_provider::MemoryStorage;

    fn store() -> Arc<FolderStore<ClusterAggregate>> {
        Arc::new(FolderStore::new(
            Arc::new(MemoryStorage::new()),
            "test-tenant",
        ))
    }

    fn aggregate(name: &str) -> ClusterAggregate {
        ClusterAggregate::new(ClusterIdentity {
            name: name.to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_create_read_delete_cycle() {
        let store = store();
        store.create(&aggregate("c1")).await.expect("create");
        let read = store.read("c1").await.expect("read");
        assert_eq!(read.identity.name, "c1");

        store.delete("c1").await.expect("delete");
        assert!(store.read("c1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_create_refuses_duplicates() {
        let store = store();
        store.create(&aggregate("c1")).await.expect("create");
        let err = store.create(&aggregate("c1")).await.unwrap_err();
        assert!(matches!(
            err.kind(),
            flotilla_common::ErrorKind::Duplicate { .. }
        ));
    }

    #[tokio::test]
    async fn test_second_delete_is_not_found() {
        let store = store();
        store.create(&aggregate("c1")).await.expect("create");
        store.delete("c1").await.expect("delete");
        assert!(store.delete("c1").await.unwrap_err().is_not_found());
    }

    /// Story: a failing mutator leaves the stored record untouched
    #[tokio::test]
    async fn test_alter_discards_on_mutator_error() {
        let store = store();
        store.create(&aggregate("c1")).await.expect("create");

        let result: Result<()> = store
            .alter("c1", |c| {
                c.properties.nodes_mut()?.global_last_index = 99;
                Err(Error::invalid_request("changed my mind"))
            })
            .await;
        assert!(result.is_err());

        let read = store.read("c1").await.expect("read");
        assert_eq!(
            read.properties.nodes().expect("nodes").global_last_index,
            0
        );
    }

    /// Story: concurrent alters never lose an update (S6)
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_alters_serialize() {
        let store = store();
        store.create(&aggregate("c1")).await.expect("create");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .alter("c1", |c| {
                        let nodes = c.properties.nodes_mut()?;
                        nodes.global_last_index += 1;
                        Ok(nodes.global_last_index)
                    })
                    .await
            }));
        }

        let mut assigned = Vec::new();
        for handle in handles {
            assigned.push(handle.await.expect("join").expect("alter"));
        }
        assigned.sort_unstable();
        assigned.dedup();
        // Every alter observed a distinct predecessor value.
        assert_eq!(assigned.len(), 16);

        let read = store.read("c1").await.expect("read");
        assert_eq!(
            read.properties.nodes().expect("nodes").global_last_index,
            16
        );
    }

    #[tokio::test]
    async fn test_browse_short_circuits_on_callback_error() {
        let store = store();
        store.create(&aggregate("c1")).await.expect("create");
        store.create(&aggregate("c2")).await.expect("create");
        store.create(&aggregate("c3")).await.expect("create");

        let mut seen = 0;
        let result = store
            .browse(|_| {
                seen += 1;
                if seen == 2 {
                    return Err(Error::internal("walk", "stop here"));
                }
                Ok(())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(seen, 2);
    }

    #[tokio::test]
    async fn test_entries_are_written_under_both_folders() {
        let storage = Arc::new(MemoryStorage::new());
        let store: FolderStore<ClusterAggregate> =
            FolderStore::new(storage.clone(), "test-tenant");
        store.create(&aggregate("c1")).await.expect("create");

        storage
            .read("0.flotilla-test-tenant/clusters/byName/c1")
            .await
            .expect("byName entry");
        storage
            .read("0.flotilla-test-tenant/clusters/byID/c1")
            .await
            .expect("byID entry");
    }
}
