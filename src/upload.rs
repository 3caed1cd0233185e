//! Object creation for files and directory markers
//!
//! Every object carries the gateway metadata built from the local stat
//! snapshot. Files additionally carry all four content digests, reused from
//! the comparator when it already hashed the file.
//!
//! Files up to one part in size go out as a single put. Larger files use a
//! multipart upload with up to [`MAX_PARTS_IN_FLIGHT`] concurrent part
//! transfers, all covered by the one [`UPLOAD_WEIGHT`] admission permit.
//! A failed multipart upload is aborted before the error is returned.

use crate::content::filetype::GENERIC_BINARY;
use crate::content::{content_type_for_file, digest_file, HashBundle};
use crate::error::{EntryError, EntryResult, StoreError, StoreResult};
use crate::fs::LocalStat;
use crate::limiter::{AdmissionLimiter, MARKER_WEIGHT, UPLOAD_WEIGHT};
use crate::metadata::{encode_digests, FileAttributes, MetadataMap, RootSquash};
use crate::store::{
    CompletedPart, CreateMultipartRequest, Encryption, ObjectStore, PutObjectOutput,
    PutObjectRequest, StorageClass,
};
use bytes::Bytes;
use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Multipart part size (8 MiB)
pub const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;

/// Concurrent part transfers per multipart upload
pub const MAX_PARTS_IN_FLIGHT: usize = UPLOAD_WEIGHT as usize;

/// Result of a successful create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub key: String,
    pub bytes: u64,
    pub e_tag: Option<String>,
    pub version_id: Option<String>,
}

pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    limiter: Arc<AdmissionLimiter>,
    bucket: String,
    storage_class: StorageClass,
    encryption: Encryption,
    squash: Option<RootSquash>,
    part_size: usize,
}

impl Uploader {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        limiter: Arc<AdmissionLimiter>,
        bucket: impl Into<String>,
        storage_class: StorageClass,
        encryption: Encryption,
        squash: Option<RootSquash>,
    ) -> Self {
        Self {
            store,
            limiter,
            bucket: bucket.into(),
            storage_class,
            encryption,
            squash,
            part_size: DEFAULT_PART_SIZE,
        }
    }

    /// Override the multipart threshold and part size
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Upload a regular file
    pub async fn upload_file(
        &self,
        path: &Path,
        key: &str,
        stat: &LocalStat,
        hashes: Option<HashBundle>,
    ) -> EntryResult<UploadReceipt> {
        let content_type = sniff(path).await;

        let hashes = match hashes {
            Some(hashes) => hashes,
            None => {
                let owned = path.to_path_buf();
                blocking(move || digest_file(&owned))
                    .await
                    .map_err(|source| EntryError::Digest {
                        path: path.to_path_buf(),
                        source,
                    })?
            }
        };

        let mut metadata = FileAttributes::from_stat(stat, self.squash).encode();
        encode_digests(&mut metadata, &hashes);

        let _permit = self
            .limiter
            .acquire(UPLOAD_WEIGHT)
            .await
            .map_err(|e| self.failed(path, key, e))?;

        let result = if stat.size <= self.part_size as u64 {
            self.put_single(path, key, content_type, metadata).await
        } else {
            self.put_multipart(path, key, content_type, metadata).await
        };

        let (bytes, output) = result?;
        info!("Uploaded {} to s3://{}/{}", path.display(), self.bucket, key);

        Ok(UploadReceipt {
            key: key.to_string(),
            bytes,
            e_tag: output.e_tag,
            version_id: output.version_id,
        })
    }

    /// Create the zero-length marker object for a directory
    pub async fn upload_directory_marker(
        &self,
        path: &Path,
        key: &str,
        stat: &LocalStat,
    ) -> EntryResult<UploadReceipt> {
        let request = PutObjectRequest {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            body: Bytes::new(),
            content_type: GENERIC_BINARY.to_string(),
            metadata: FileAttributes::from_stat(stat, self.squash).encode(),
            storage_class: self.storage_class,
            encryption: self.encryption.clone(),
        };

        let store = &self.store;
        let request = &request;
        let output = self
            .limiter
            .call("PutObject", MARKER_WEIGHT, move || store.put_object(request.clone()))
            .await
            .map_err(|e| self.failed(path, key, e))?;

        info!("Uploaded {} to s3://{}/{}", path.display(), self.bucket, key);

        Ok(UploadReceipt {
            key: key.to_string(),
            bytes: 0,
            e_tag: output.e_tag,
            version_id: output.version_id,
        })
    }

    async fn put_single(
        &self,
        path: &Path,
        key: &str,
        content_type: String,
        metadata: MetadataMap,
    ) -> EntryResult<(u64, PutObjectOutput)> {
        let body = tokio::fs::read(path).await.map_err(|source| EntryError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let bytes = body.len() as u64;

        let request = PutObjectRequest {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            body: Bytes::from(body),
            content_type,
            metadata,
            storage_class: self.storage_class,
            encryption: self.encryption.clone(),
        };

        let store = &self.store;
        let request = &request;
        let output = self
            .limiter
            .retry("PutObject", move || store.put_object(request.clone()))
            .await
            .map_err(|e| self.failed(path, key, e))?;

        Ok((bytes, output))
    }

    async fn put_multipart(
        &self,
        path: &Path,
        key: &str,
        content_type: String,
        metadata: MetadataMap,
    ) -> EntryResult<(u64, PutObjectOutput)> {
        let create = CreateMultipartRequest {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            content_type,
            metadata,
            storage_class: self.storage_class,
            encryption: self.encryption.clone(),
        };

        let store = &self.store;
        let create = &create;
        let upload_id = self
            .limiter
            .retry("CreateMultipartUpload", move || {
                store.create_multipart_upload(create.clone())
            })
            .await
            .map_err(|e| self.failed(path, key, e))?;

        debug!("Started multipart upload {} for {}", upload_id, key);

        let outcome = match self.upload_parts(path, key, &upload_id).await {
            Ok((bytes, parts)) => {
                let upload_id = upload_id.as_str();
                let parts = &parts;
                self.limiter
                    .retry("CompleteMultipartUpload", move || {
                        store.complete_multipart_upload(create.bucket.as_str(), key, upload_id, parts.clone())
                    })
                    .await
                    .map(|output| (bytes, output))
                    .map_err(|e| self.failed(path, key, e))
            }
            Err(e) => Err(e),
        };

        if outcome.is_err() {
            self.abort(key, &upload_id).await;
        }
        outcome
    }

    /// Read the file part by part, keeping up to MAX_PARTS_IN_FLIGHT transfers running
    async fn upload_parts(
        &self,
        path: &Path,
        key: &str,
        upload_id: &str,
    ) -> EntryResult<(u64, Vec<CompletedPart>)> {
        let read_error = |source: io::Error| EntryError::Read {
            path: path.to_path_buf(),
            source,
        };

        let mut file = tokio::fs::File::open(path).await.map_err(read_error)?;
        let mut in_flight: VecDeque<JoinHandle<StoreResult<CompletedPart>>> = VecDeque::new();
        let mut completed = Vec::new();
        let mut total: u64 = 0;
        let mut part_number: i32 = 0;

        let result = loop {
            let chunk = match read_chunk(&mut file, self.part_size).await {
                Ok(chunk) => chunk,
                Err(e) => break Err(read_error(e)),
            };
            if chunk.is_empty() && part_number > 0 {
                break Ok(());
            }

            part_number += 1;
            total += chunk.len() as u64;
            let last = chunk.len() < self.part_size;
            in_flight.push_back(self.spawn_part(key, upload_id, part_number, chunk));

            if in_flight.len() >= MAX_PARTS_IN_FLIGHT || last {
                if let Err(e) = drain(&mut in_flight, &mut completed, !last).await {
                    break Err(self.failed(path, key, e));
                }
            }
            if last {
                break Ok(());
            }
        };

        if let Err(e) = result {
            for handle in in_flight {
                handle.abort();
            }
            return Err(e);
        }

        if let Err(e) = drain(&mut in_flight, &mut completed, false).await {
            return Err(self.failed(path, key, e));
        }

        completed.sort_by_key(|p| p.part_number);
        Ok((total, completed))
    }

    fn spawn_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> JoinHandle<StoreResult<CompletedPart>> {
        let store = Arc::clone(&self.store);
        let limiter = Arc::clone(&self.limiter);
        let bucket = self.bucket.clone();
        let key = key.to_string();
        let upload_id = upload_id.to_string();

        tokio::spawn(async move {
            let (store, bucket, key, upload_id, body) = (&store, &bucket, &key, &upload_id, &body);
            let e_tag = limiter
                .retry("UploadPart", move || {
                    store.upload_part(bucket, key, upload_id, part_number, body.clone())
                })
                .await?;
            Ok(CompletedPart { part_number, e_tag })
        })
    }

    async fn abort(&self, key: &str, upload_id: &str) {
        let store = &self.store;
        let bucket = self.bucket.as_str();
        let result = self
            .limiter
            .retry_cleanup("AbortMultipartUpload", move || {
                store.abort_multipart_upload(bucket, key, upload_id)
            })
            .await;

        match result {
            Ok(()) => debug!("Aborted multipart upload {} for {}", upload_id, key),
            Err(e) => warn!("Unable to abort multipart upload {} for {}: {}", upload_id, key, e),
        }
    }

    fn failed(&self, path: &Path, key: &str, err: StoreError) -> EntryError {
        if err.is_cancelled() {
            return EntryError::Cancelled {
                path: path.to_path_buf(),
            };
        }
        error!(
            "Failed to upload {} to s3://{}/{}: {}",
            path.display(),
            self.bucket,
            key,
            err
        );
        EntryError::Upload {
            path: path.to_path_buf(),
            source: err,
        }
    }
}

/// Await finished part transfers. With `keep_window` set, only the oldest
/// transfer is awaited so the next part can be read while the rest run.
async fn drain(
    in_flight: &mut VecDeque<JoinHandle<StoreResult<CompletedPart>>>,
    completed: &mut Vec<CompletedPart>,
    keep_window: bool,
) -> StoreResult<()> {
    while let Some(handle) = in_flight.pop_front() {
        let part = handle
            .await
            .map_err(|e| StoreError::Backend(format!("part transfer task failed: {}", e)))??;
        completed.push(part);

        if keep_window {
            break;
        }
    }
    Ok(())
}

async fn read_chunk(file: &mut tokio::fs::File, size: usize) -> io::Result<Bytes> {
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(Bytes::from(buf))
}

async fn sniff(path: &Path) -> String {
    let owned = path.to_path_buf();
    match blocking(move || content_type_for_file(&owned)).await {
        Ok(content_type) => content_type,
        Err(e) => {
            debug!("Content type detection failed for {}: {}", path.display(), e);
            GENERIC_BINARY.to_string()
        }
    }
}

async fn blocking<T, F>(f: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}
