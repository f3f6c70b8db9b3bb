//! S3-backed object store.

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use base64::Engine;
use tracing::debug;

use super::{ObjectStore, StorageError};
use crate::batch::DELETE_CHUNK_SIZE;

/// Object store over Amazon S3.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Bucket names are lowercase and carry no surrounding whitespace.
fn bucket_name(bucket: &str) -> String {
    bucket.trim().to_lowercase()
}

/// Base64 MD5 digest for the Content-MD5 header.
fn content_md5(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(md5::compute(data).0)
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<(), StorageError> {
        let bucket = bucket_name(bucket);
        let md5 = content_md5(&data);
        debug!(bucket = %bucket, key, bytes = data.len(), "Putting object");

        self.client
            .put_object()
            .bucket(&bucket)
            .key(key)
            .content_md5(md5)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::Put {
                bucket: bucket.clone(),
                key: key.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let bucket = bucket_name(bucket);
        let list_error = |message: String| StorageError::List {
            bucket: bucket.clone(),
            prefix: prefix.to_string(),
            message,
        };

        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| list_error(DisplayErrorContext(&e).to_string()))?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );
        }
        Ok(keys)
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), StorageError> {
        if keys.is_empty() {
            return Ok(());
        }
        if keys.len() > DELETE_CHUNK_SIZE {
            return Err(StorageError::TooManyKeys(keys.len()));
        }
        let bucket = bucket_name(bucket);
        let delete_error = |message: String| StorageError::Delete {
            bucket: bucket.clone(),
            message,
        };

        let objects = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| delete_error(e.to_string()))?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|e| delete_error(e.to_string()))?;

        let output = self
            .client
            .delete_objects()
            .bucket(&bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| delete_error(DisplayErrorContext(&e).to_string()))?;

        if let Some(first) = output.errors().first() {
            return Err(delete_error(format!(
                "{} of {} keys not deleted, first: {} ({})",
                output.errors().len(),
                keys.len(),
                first.key().unwrap_or_default(),
                first.message().unwrap_or_default()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_md5_matches_known_digest() {
        // md5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(content_md5(b""), "1B2M2Y8AsgTpgAmY7PhCfg==");
    }

    #[test]
    fn test_bucket_name_trims_and_lowercases() {
        assert_eq!(bucket_name(" Fleet-Bucket\n"), "fleet-bucket");
        assert_eq!(bucket_name("fleet-bucket"), "fleet-bucket");
    }
}
