//! Object store abstraction.
//!
//! Certificates, keys and per-vehicle configs are written to a blob store
//! keyed by bucket and key. `S3ObjectStore` is the production backend.

mod s3;

pub use s3::S3ObjectStore;

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::error;

use crate::batch::DELETE_CHUNK_SIZE;
use crate::vehicle::VehicleDescriptor;

/// Certificate chain file name under a vehicle prefix.
pub const CERT_FILE_NAME: &str = "cert.crt";
/// Private key file name under a vehicle prefix.
pub const PRIVATE_KEY_FILE_NAME: &str = "pri.key";
/// Runtime config file name under a vehicle prefix.
pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("put {bucket}/{key} failed: {message}")]
    Put {
        bucket: String,
        key: String,
        message: String,
    },

    #[error("list {bucket}/{prefix} failed: {message}")]
    List {
        bucket: String,
        prefix: String,
        message: String,
    },

    #[error("delete in {bucket} failed: {message}")]
    Delete { bucket: String, message: String },

    #[error("too many keys in one delete: {0} (max {DELETE_CHUNK_SIZE})")]
    TooManyKeys(usize),
}

/// Blob store used as a sink for provisioning artifacts.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` at `bucket/key`, with an integrity check on upload.
    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<(), StorageError>;

    /// All keys in `bucket` starting with `prefix`.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Delete up to `DELETE_CHUNK_SIZE` keys in one call.
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), StorageError>;
}

/// Deletes `keys` from `bucket` in chunks the store accepts.
///
/// Every chunk is attempted; the first error is returned after all ran.
pub async fn delete_keys(
    store: &dyn ObjectStore,
    bucket: &str,
    keys: &[String],
) -> Result<(), StorageError> {
    let mut first_error = None;
    for chunk in keys.chunks(DELETE_CHUNK_SIZE) {
        if let Err(e) = store.delete_objects(bucket, chunk).await {
            error!(bucket, keys = chunk.len(), "Object deletion failed: {}", e);
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Groups the keys produced by `key_fn` for each vehicle by bucket.
pub fn keys_by_bucket<F>(vehicles: &[VehicleDescriptor], key_fn: F) -> BTreeMap<String, Vec<String>>
where
    F: Fn(&VehicleDescriptor) -> Vec<String>,
{
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for vehicle in vehicles {
        grouped
            .entry(vehicle.storage.bucket.clone())
            .or_default()
            .extend(key_fn(vehicle));
    }
    grouped
}

/// Writes a certificate chain and private key under the vehicle prefix.
pub async fn put_certificate_material(
    store: &dyn ObjectStore,
    vehicle: &VehicleDescriptor,
    certificate_pem: &str,
    private_key_pem: &str,
) -> Result<(), StorageError> {
    let location = &vehicle.storage;
    store
        .put(
            &location.bucket,
            &location.object_key(CERT_FILE_NAME),
            certificate_pem.as_bytes().to_vec(),
        )
        .await?;
    store
        .put(
            &location.bucket,
            &location.object_key(PRIVATE_KEY_FILE_NAME),
            private_key_pem.as_bytes().to_vec(),
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryObjectStore;
    use crate::vehicle::StorageLocation;

    #[tokio::test]
    async fn test_delete_keys_chunks_large_batches() {
        let store = MemoryObjectStore::new();
        let keys: Vec<String> = (0..2500).map(|i| format!("v{}/cert.crt", i)).collect();
        for key in &keys {
            store.put("bucket", key, b"x".to_vec()).await.unwrap();
        }

        delete_keys(&store, "bucket", &keys).await.unwrap();

        let calls = store.delete_calls().await;
        assert_eq!(
            calls.iter().map(|(_, k)| k.len()).collect::<Vec<_>>(),
            vec![1000, 1000, 500]
        );
        assert!(store.list("bucket", "").await.unwrap().is_empty());
    }

    #[test]
    fn test_keys_by_bucket_groups_vehicles() {
        let vehicles = vec![
            VehicleDescriptor::registry("a", StorageLocation::new("b1", "a")),
            VehicleDescriptor::registry("b", StorageLocation::new("b2", "b")),
            VehicleDescriptor::registry("c", StorageLocation::new("b1", "c")),
        ];
        let grouped = keys_by_bucket(&vehicles, |v| vec![v.storage.object_key(CERT_FILE_NAME)]);
        assert_eq!(grouped["b1"], vec!["a/cert.crt", "c/cert.crt"]);
        assert_eq!(grouped["b2"], vec!["b/cert.crt"]);
    }
}
