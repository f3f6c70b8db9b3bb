//! In-memory object store for testing.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::batch::DELETE_CHUNK_SIZE;
use crate::storage::{ObjectStore, StorageError};

/// ObjectStore backed by a map of `(bucket, key)` to bytes.
///
/// Records every delete call so tests can check chunking, and can be told to
/// reject puts for given keys.
#[derive(Debug)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<BTreeMap<(String, String), Vec<u8>>>>,
    delete_calls: Arc<RwLock<Vec<(String, Vec<String>)>>>,
    failing_puts: Arc<RwLock<BTreeSet<String>>>,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(BTreeMap::new())),
            delete_calls: Arc::new(RwLock::new(Vec::new())),
            failing_puts: Arc::new(RwLock::new(BTreeSet::new())),
        }
    }

    pub async fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub async fn get_string(&self, bucket: &str, key: &str) -> Option<String> {
        self.get(bucket, key)
            .await
            .and_then(|bytes| String::from_utf8(bytes).ok())
    }

    /// Delete calls as (bucket, keys), in order.
    pub async fn delete_calls(&self) -> Vec<(String, Vec<String>)> {
        self.delete_calls.read().await.clone()
    }

    /// Puts to this key fail, in any bucket.
    pub async fn fail_put(&self, key: &str) {
        self.failing_puts.write().await.insert(key.to_string());
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<(), StorageError> {
        if self.failing_puts.read().await.contains(key) {
            return Err(StorageError::Put {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: "access denied".to_string(),
            });
        }
        self.objects
            .write()
            .await
            .insert((bucket.to_string(), key.to_string()), data);
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|(b, key)| b == bucket && key.starts_with(prefix))
            .map(|(_, key)| key.clone())
            .collect())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), StorageError> {
        if keys.len() > DELETE_CHUNK_SIZE {
            return Err(StorageError::TooManyKeys(keys.len()));
        }
        self.delete_calls
            .write()
            .await
            .push((bucket.to_string(), keys.to_vec()));
        let mut objects = self.objects.write().await;
        for key in keys {
            objects.remove(&(bucket.to_string(), key.clone()));
        }
        Ok(())
    }
}
