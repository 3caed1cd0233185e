//! S3 transport for [`ObjectStore`]
//!
//! Thin adapter over `aws-sdk-s3`. Retries are disabled in the SDK client
//! because every call already runs under the admission limiter's retry
//! policy; SDK errors are flattened into [`StoreError`] so the classifier can
//! treat them uniformly.

use super::{
    CompletedPart, CreateMultipartRequest, ObjectHeader, ObjectStore, PutObjectOutput,
    PutObjectRequest,
};
use crate::error::{ConfigError, StoreError, StoreResult};
use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart as S3CompletedPart, ServerSideEncryption,
    StorageClass as S3StorageClass,
};
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::debug;

pub struct S3Store {
    client: Client,
}

impl S3Store {
    /// Resolve credentials and region from the environment, optionally
    /// pinned to a named profile or explicit region
    pub async fn connect(region: Option<String>, profile: Option<String>) -> Result<Self, ConfigError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).retry_config(RetryConfig::disabled());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }

        let sdk_config = loader.load().await;
        if sdk_config.region().is_none() {
            return Err(ConfigError::BackendInit(
                "no region configured; pass --region or set AWS_REGION".to_string(),
            ));
        }

        debug!(region = ?sdk_config.region(), "S3 client configured");
        Ok(Self {
            client: Client::new(&sdk_config),
        })
    }
}

/// Flatten an SDK error into a [`StoreError`]
fn map_error<E>(err: SdkError<E, HttpResponse>, bucket: &str, key: &str) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();

    match &err {
        SdkError::TimeoutError(_) => return StoreError::Timeout(message),
        SdkError::DispatchFailure(_) => {
            return StoreError::Unavailable {
                status: 0,
                message,
            }
        }
        SdkError::ConstructionFailure(_) => return StoreError::InvalidRequest(message),
        _ => {}
    }

    let status = err.raw_response().map(|r| r.status().as_u16()).unwrap_or(0);
    let code = err.as_service_error().and_then(|e| e.code()).unwrap_or_default();

    match (status, code) {
        (_, "NoSuchBucket") => StoreError::NoSuchBucket(bucket.to_string()),
        (_, "NoSuchUpload") => StoreError::NoSuchUpload(message),
        (404, _) | (_, "NotFound") | (_, "NoSuchKey") => StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
        (_, "SlowDown") | (_, "Throttling") | (_, "ThrottlingException") | (_, "RequestLimitExceeded") => {
            StoreError::Throttled(message)
        }
        (_, "RequestTimeout") => StoreError::Timeout(message),
        (403, _) | (_, "AccessDenied") | (_, "InvalidAccessKeyId") | (_, "SignatureDoesNotMatch") => {
            StoreError::AccessDenied(message)
        }
        (429, _) => StoreError::Throttled(message),
        (500..=599, _) => StoreError::Unavailable { status, message },
        (400, _) => StoreError::InvalidRequest(message),
        _ => StoreError::Backend(message),
    }
}

fn normalize_location(constraint: &str) -> Option<String> {
    match constraint {
        "" => None,
        "EU" => Some("eu-west-1".to_string()),
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectHeader> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_error(e, bucket, key))?;

        Ok(ObjectHeader {
            content_length: output.content_length().unwrap_or(0).max(0) as u64,
            metadata: output.metadata().cloned().unwrap_or_default(),
            e_tag: output.e_tag().map(str::to_string),
            content_type: output.content_type().map(str::to_string),
        })
    }

    async fn put_object(&self, request: PutObjectRequest) -> StoreResult<PutObjectOutput> {
        let output = self
            .client
            .put_object()
            .bucket(&request.bucket)
            .key(&request.key)
            .body(ByteStream::from(request.body))
            .content_type(&request.content_type)
            .set_metadata(Some(request.metadata))
            .storage_class(S3StorageClass::from(request.storage_class.as_str()))
            .server_side_encryption(ServerSideEncryption::from(request.encryption.algorithm()))
            .set_ssekms_key_id(request.encryption.kms_key_id().map(str::to_string))
            .send()
            .await
            .map_err(|e| map_error(e, &request.bucket, &request.key))?;

        Ok(PutObjectOutput {
            e_tag: output.e_tag().map(str::to_string),
            version_id: output.version_id().map(str::to_string),
        })
    }

    async fn create_multipart_upload(&self, request: CreateMultipartRequest) -> StoreResult<String> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&request.bucket)
            .key(&request.key)
            .content_type(&request.content_type)
            .set_metadata(Some(request.metadata))
            .storage_class(S3StorageClass::from(request.storage_class.as_str()))
            .server_side_encryption(ServerSideEncryption::from(request.encryption.algorithm()))
            .set_ssekms_key_id(request.encryption.kms_key_id().map(str::to_string))
            .send()
            .await
            .map_err(|e| map_error(e, &request.bucket, &request.key))?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StoreError::Backend("CreateMultipartUpload returned no upload id".to_string()))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StoreResult<String> {
        let output = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| map_error(e, bucket, key))?;

        output
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| StoreError::Backend(format!("UploadPart {} returned no ETag", part_number)))
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> StoreResult<PutObjectOutput> {
        let parts = parts
            .into_iter()
            .map(|p| S3CompletedPart::builder().part_number(p.part_number).e_tag(p.e_tag).build())
            .collect();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(parts)).build())
            .send()
            .await
            .map_err(|e| map_error(e, bucket, key))?;

        Ok(PutObjectOutput {
            e_tag: output.e_tag().map(str::to_string),
            version_id: output.version_id().map(str::to_string),
        })
    }

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> StoreResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| map_error(e, bucket, key))?;
        Ok(())
    }

    async fn bucket_location(&self, bucket: &str) -> StoreResult<Option<String>> {
        let output = self
            .client
            .get_bucket_location()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| map_error(e, bucket, ""))?;

        Ok(output
            .location_constraint()
            .and_then(|c| normalize_location(c.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_location() {
        assert_eq!(normalize_location(""), None);
        assert_eq!(normalize_location("EU").as_deref(), Some("eu-west-1"));
        assert_eq!(normalize_location("ap-south-1").as_deref(), Some("ap-south-1"));
    }
}
