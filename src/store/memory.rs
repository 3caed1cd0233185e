//! In-memory object store
//!
//! Implements [`ObjectStore`] over a mutex-guarded map. Used by the test
//! suite and by library callers that want a dry run. Supports fault
//! injection per operation so retry and fail-open paths can be exercised.

use super::{
    CompletedPart, CreateMultipartRequest, ObjectHeader, ObjectStore, PutObjectOutput,
    PutObjectRequest,
};
use crate::content::{digest_bytes, DigestAlgorithm};
use crate::error::{StoreError, StoreResult};
use crate::metadata::MetadataMap;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// Store operation, used for call counting and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Head,
    Put,
    CreateMultipart,
    UploadPart,
    CompleteMultipart,
    AbortMultipart,
    BucketLocation,
}

/// A stored object
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: String,
    pub metadata: MetadataMap,
    pub storage_class: String,
    pub encryption: String,
    pub e_tag: String,
}

impl StoredObject {
    fn header(&self) -> ObjectHeader {
        ObjectHeader {
            content_length: self.body.len() as u64,
            metadata: self.metadata.clone(),
            e_tag: Some(self.e_tag.clone()),
            content_type: Some(self.content_type.clone()),
        }
    }
}

#[derive(Debug, Default)]
struct Bucket {
    location: Option<String>,
    objects: BTreeMap<String, StoredObject>,
}

#[derive(Debug)]
struct PendingUpload {
    request: CreateMultipartRequest,
    parts: BTreeMap<i32, Bytes>,
}

impl PendingUpload {
    fn targets(&self, bucket: &str, key: &str) -> bool {
        self.request.bucket == bucket && self.request.key == key
    }
}

#[derive(Debug)]
struct Fault {
    error: StoreError,
    remaining: u32,
}

#[derive(Default)]
pub struct MemoryStore {
    buckets: Mutex<HashMap<String, Bucket>>,
    uploads: Mutex<HashMap<String, PendingUpload>>,
    faults: Mutex<HashMap<Operation, Fault>>,
    next_upload_id: AtomicU64,
    calls: Mutex<HashMap<Operation, u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty bucket in the default region
    pub fn create_bucket(&self, bucket: &str) {
        self.create_bucket_in(bucket, None);
    }

    pub fn create_bucket_in(&self, bucket: &str, location: Option<&str>) {
        self.buckets.lock().entry(bucket.to_string()).or_insert_with(|| Bucket {
            location: location.map(str::to_string),
            objects: BTreeMap::new(),
        });
    }

    /// Fetch a stored object
    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.buckets
            .lock()
            .get(bucket)
            .and_then(|b| b.objects.get(key).cloned())
    }

    /// All keys in a bucket, sorted
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .lock()
            .get(bucket)
            .map(|b| b.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Seed an object directly, bypassing call counting
    pub fn insert_object(&self, bucket: &str, key: &str, body: &[u8], metadata: MetadataMap) {
        let object = StoredObject {
            body: Bytes::copy_from_slice(body),
            content_type: "application/octet-stream".to_string(),
            metadata,
            storage_class: "STANDARD".to_string(),
            encryption: "AES256".to_string(),
            e_tag: etag_for(body),
        };
        self.buckets
            .lock()
            .entry(bucket.to_string())
            .or_default()
            .objects
            .insert(key.to_string(), object);
    }

    /// Make the next `times` calls of `operation` fail with `error`
    pub fn inject_fault(&self, operation: Operation, error: StoreError, times: u32) {
        self.faults.lock().insert(
            operation,
            Fault {
                error,
                remaining: times,
            },
        );
    }

    /// Number of calls made for an operation, including failed ones
    pub fn call_count(&self, operation: Operation) -> u64 {
        self.calls.lock().get(&operation).copied().unwrap_or(0)
    }

    /// Objects created, single-shot or multipart
    pub fn put_count(&self) -> u64 {
        self.call_count(Operation::Put) + self.call_count(Operation::CompleteMultipart)
    }

    /// Multipart uploads neither completed nor aborted
    pub fn pending_uploads(&self) -> usize {
        self.uploads.lock().len()
    }

    fn enter(&self, operation: Operation) -> StoreResult<()> {
        *self.calls.lock().entry(operation).or_insert(0) += 1;

        let mut faults = self.faults.lock();
        if let Some(fault) = faults.get_mut(&operation) {
            if fault.remaining > 0 {
                fault.remaining -= 1;
                return Err(fault.error.clone());
            }
        }
        Ok(())
    }

    fn store(&self, bucket: &str, key: &str, object: StoredObject) -> StoreResult<()> {
        let mut buckets = self.buckets.lock();
        let target = buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::NoSuchBucket(bucket.to_string()))?;
        target.objects.insert(key.to_string(), object);
        Ok(())
    }
}

fn etag_for(body: &[u8]) -> String {
    format!("\"{}\"", digest_bytes(body).hex(DigestAlgorithm::Md5))
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectHeader> {
        self.enter(Operation::Head)?;

        self.buckets
            .lock()
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .map(StoredObject::header)
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn put_object(&self, request: PutObjectRequest) -> StoreResult<PutObjectOutput> {
        self.enter(Operation::Put)?;

        let e_tag = etag_for(&request.body);
        let object = StoredObject {
            body: request.body,
            content_type: request.content_type,
            metadata: request.metadata,
            storage_class: request.storage_class.as_str().to_string(),
            encryption: request.encryption.algorithm().to_string(),
            e_tag: e_tag.clone(),
        };
        self.store(&request.bucket, &request.key, object)?;

        Ok(PutObjectOutput {
            e_tag: Some(e_tag),
            version_id: None,
        })
    }

    async fn create_multipart_upload(&self, request: CreateMultipartRequest) -> StoreResult<String> {
        self.enter(Operation::CreateMultipart)?;

        if !self.buckets.lock().contains_key(&request.bucket) {
            return Err(StoreError::NoSuchBucket(request.bucket));
        }

        let upload_id = format!("upload-{}", self.next_upload_id.fetch_add(1, Ordering::Relaxed));
        self.uploads.lock().insert(
            upload_id.clone(),
            PendingUpload {
                request,
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StoreResult<String> {
        self.enter(Operation::UploadPart)?;

        let mut uploads = self.uploads.lock();
        let upload = uploads
            .get_mut(upload_id)
            .filter(|u| u.targets(bucket, key))
            .ok_or_else(|| StoreError::NoSuchUpload(upload_id.to_string()))?;

        let e_tag = etag_for(&body);
        upload.parts.insert(part_number, body);
        Ok(e_tag)
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> StoreResult<PutObjectOutput> {
        self.enter(Operation::CompleteMultipart)?;

        let upload = {
            let mut uploads = self.uploads.lock();
            let known = uploads
                .get(upload_id)
                .is_some_and(|u| u.targets(bucket, key));
            if known {
                uploads.remove(upload_id)
            } else {
                None
            }
        }
        .ok_or_else(|| StoreError::NoSuchUpload(upload_id.to_string()))?;

        let mut body = BytesMut::new();
        for part in &parts {
            let data = upload.parts.get(&part.part_number).ok_or_else(|| {
                StoreError::InvalidRequest(format!("part {} was never uploaded", part.part_number))
            })?;
            body.extend_from_slice(data);
        }

        let e_tag = format!("\"{}-{}\"", upload_id, parts.len());
        let object = StoredObject {
            body: body.freeze(),
            content_type: upload.request.content_type,
            metadata: upload.request.metadata,
            storage_class: upload.request.storage_class.as_str().to_string(),
            encryption: upload.request.encryption.algorithm().to_string(),
            e_tag: e_tag.clone(),
        };
        self.store(bucket, key, object)?;

        Ok(PutObjectOutput {
            e_tag: Some(e_tag),
            version_id: None,
        })
    }

    async fn abort_multipart_upload(&self, _bucket: &str, _key: &str, upload_id: &str) -> StoreResult<()> {
        self.enter(Operation::AbortMultipart)?;
        self.uploads
            .lock()
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NoSuchUpload(upload_id.to_string()))
    }

    async fn bucket_location(&self, bucket: &str) -> StoreResult<Option<String>> {
        self.enter(Operation::BucketLocation)?;
        self.buckets
            .lock()
            .get(bucket)
            .map(|b| b.location.clone())
            .ok_or_else(|| StoreError::NoSuchBucket(bucket.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Encryption, StorageClass};
    use std::sync::Arc;

    fn put_request(key: &str, body: &'static [u8]) -> PutObjectRequest {
        PutObjectRequest {
            bucket: "bucket".into(),
            key: key.into(),
            body: Bytes::from_static(body),
            content_type: "text/plain".into(),
            metadata: MetadataMap::new(),
            storage_class: StorageClass::Standard,
            encryption: Encryption::Aes256,
        }
    }

    #[tokio::test]
    async fn test_head_missing_is_not_found() {
        let store = MemoryStore::new();
        store.create_bucket("bucket");

        let err = store.head_object("bucket", "nope").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert_eq!(store.call_count(Operation::Head), 1);
    }

    #[tokio::test]
    async fn test_put_then_head() {
        let store = MemoryStore::new();
        store.create_bucket("bucket");

        store.put_object(put_request("a/b.txt", b"hello")).await.unwrap();
        let header = store.head_object("bucket", "a/b.txt").await.unwrap();
        assert_eq!(header.content_length, 5);
        assert_eq!(header.content_type.as_deref(), Some("text/plain"));
        assert_eq!(store.keys("bucket"), vec!["a/b.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_put_missing_bucket() {
        let store = MemoryStore::new();
        let err = store.put_object(put_request("k", b"x")).await.unwrap_err();
        assert_eq!(err, StoreError::NoSuchBucket("bucket".into()));
    }

    #[tokio::test]
    async fn test_fault_injection_counts_down() {
        let store = MemoryStore::new();
        store.create_bucket("bucket");
        store.inject_fault(Operation::Put, StoreError::Throttled("SlowDown".into()), 2);

        assert!(store.put_object(put_request("k", b"x")).await.is_err());
        assert!(store.put_object(put_request("k", b"x")).await.is_err());
        assert!(store.put_object(put_request("k", b"x")).await.is_ok());
        assert_eq!(store.call_count(Operation::Put), 3);
    }

    #[tokio::test]
    async fn test_multipart_lifecycle() {
        let store = MemoryStore::new();
        store.create_bucket("bucket");

        let request = CreateMultipartRequest {
            bucket: "bucket".into(),
            key: "big".into(),
            content_type: "application/octet-stream".into(),
            metadata: MetadataMap::new(),
            storage_class: StorageClass::Standard,
            encryption: Encryption::Aes256,
        };
        let upload_id = store.create_multipart_upload(request).await.unwrap();

        // Parts may arrive out of order
        let e2 = store
            .upload_part("bucket", "big", &upload_id, 2, Bytes::from_static(b"world"))
            .await
            .unwrap();
        let e1 = store
            .upload_part("bucket", "big", &upload_id, 1, Bytes::from_static(b"hello "))
            .await
            .unwrap();

        let parts = vec![
            CompletedPart { part_number: 1, e_tag: e1 },
            CompletedPart { part_number: 2, e_tag: e2 },
        ];
        store
            .complete_multipart_upload("bucket", "big", &upload_id, parts)
            .await
            .unwrap();

        assert_eq!(&store.object("bucket", "big").unwrap().body[..], b"hello world");
        assert_eq!(store.pending_uploads(), 0);
        assert_eq!(store.put_count(), 1);
    }

    #[tokio::test]
    async fn test_abort_multipart() {
        let store = MemoryStore::new();
        store.create_bucket("bucket");
        let request = CreateMultipartRequest {
            bucket: "bucket".into(),
            key: "big".into(),
            content_type: "application/octet-stream".into(),
            metadata: MetadataMap::new(),
            storage_class: StorageClass::Standard,
            encryption: Encryption::Aes256,
        };
        let upload_id = store.create_multipart_upload(request).await.unwrap();
        store.abort_multipart_upload("bucket", "big", &upload_id).await.unwrap();

        assert_eq!(store.pending_uploads(), 0);
        assert!(store.object("bucket", "big").is_none());
    }

    #[tokio::test]
    async fn test_bucket_location() {
        let store = MemoryStore::new();
        store.create_bucket_in("eu", Some("eu-west-1"));
        store.create_bucket("us");

        assert_eq!(store.bucket_location("eu").await.unwrap().as_deref(), Some("eu-west-1"));
        assert_eq!(store.bucket_location("us").await.unwrap(), None);
        assert!(store.bucket_location("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_puts() {
        let store = Arc::new(MemoryStore::new());
        store.create_bucket("bucket");

        let mut handles = Vec::new();
        for i in 0..50 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let mut request = put_request("", b"x");
                request.key = format!("dir/{}", i);
                store.put_object(request).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.keys("bucket").len(), 50);
    }
}
