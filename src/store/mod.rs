//! Object store capability surface
//!
//! The sync engine needs only a handful of calls from the backend: a
//! metadata probe, a single-shot put, the multipart lifecycle and a bucket
//! location lookup. [`ObjectStore`] captures exactly that set so the engine
//! can run against [`MemoryStore`] in tests and against S3 in production.

pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

pub use memory::{MemoryStore, Operation};
#[cfg(feature = "s3")]
pub use s3::S3Store;

use crate::error::{ConfigError, StoreResult};
use crate::metadata::MetadataMap;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;

/// Remote object attributes relevant to comparison
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectHeader {
    pub content_length: u64,
    pub metadata: MetadataMap,
    /// Never used for verification
    pub e_tag: Option<String>,
    pub content_type: Option<String>,
}

/// Storage class applied to uploaded objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageClass {
    #[default]
    Standard,
    StandardIa,
    OnezoneIa,
    IntelligentTiering,
    Glacier,
    DeepArchive,
    Outposts,
}

impl StorageClass {
    pub const ALL: [StorageClass; 7] = [
        StorageClass::Standard,
        StorageClass::StandardIa,
        StorageClass::OnezoneIa,
        StorageClass::IntelligentTiering,
        StorageClass::Glacier,
        StorageClass::DeepArchive,
        StorageClass::Outposts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageClass::Standard => "STANDARD",
            StorageClass::StandardIa => "STANDARD_IA",
            StorageClass::OnezoneIa => "ONEZONE_IA",
            StorageClass::IntelligentTiering => "INTELLIGENT_TIERING",
            StorageClass::Glacier => "GLACIER",
            StorageClass::DeepArchive => "DEEP_ARCHIVE",
            StorageClass::Outposts => "OUTPOSTS",
        }
    }
}

impl FromStr for StorageClass {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StorageClass::ALL
            .into_iter()
            .find(|class| class.as_str() == s)
            .ok_or_else(|| ConfigError::InvalidStorageClass(s.to_string()))
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-side encryption applied to uploaded objects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encryption {
    Aes256,
    AwsKms { key_id: String },
}

impl Encryption {
    /// Build from the `--encryption-algorithm` / `--kms-key` pair
    pub fn parse(algorithm: &str, kms_key: &str) -> Result<Self, ConfigError> {
        match algorithm {
            "AES256" => Ok(Encryption::Aes256),
            "aws:kms" => Ok(Encryption::AwsKms {
                key_id: kms_key.to_string(),
            }),
            other => Err(ConfigError::InvalidEncryption(other.to_string())),
        }
    }

    pub fn algorithm(&self) -> &'static str {
        match self {
            Encryption::Aes256 => "AES256",
            Encryption::AwsKms { .. } => "aws:kms",
        }
    }

    pub fn kms_key_id(&self) -> Option<&str> {
        match self {
            Encryption::Aes256 => None,
            Encryption::AwsKms { key_id } => Some(key_id),
        }
    }
}

impl Default for Encryption {
    fn default() -> Self {
        Encryption::Aes256
    }
}

/// Single-shot create request
#[derive(Debug, Clone)]
pub struct PutObjectRequest {
    pub bucket: String,
    pub key: String,
    pub body: Bytes,
    pub content_type: String,
    pub metadata: MetadataMap,
    pub storage_class: StorageClass,
    pub encryption: Encryption,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutObjectOutput {
    pub e_tag: Option<String>,
    pub version_id: Option<String>,
}

/// Start of a multipart upload; carries everything but the body
#[derive(Debug, Clone)]
pub struct CreateMultipartRequest {
    pub bucket: String,
    pub key: String,
    pub content_type: String,
    pub metadata: MetadataMap,
    pub storage_class: StorageClass,
    pub encryption: Encryption,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based
    pub part_number: i32,
    pub e_tag: String,
}

/// Minimal backend capability set used by the sync engine
///
/// Implementations must tolerate many concurrent callers creating sibling
/// and parent/child keys at the same time.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch object attributes. A missing object is `StoreError::NotFound`.
    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectHeader>;

    async fn put_object(&self, request: PutObjectRequest) -> StoreResult<PutObjectOutput>;

    /// Returns the upload id
    async fn create_multipart_upload(&self, request: CreateMultipartRequest) -> StoreResult<String>;

    /// Returns the part's entity tag
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StoreResult<String>;

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> StoreResult<PutObjectOutput>;

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> StoreResult<()>;

    /// Region constraint of a bucket; `None` for the default region
    async fn bucket_location(&self, bucket: &str) -> StoreResult<Option<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_class_parse() {
        for class in StorageClass::ALL {
            assert_eq!(class.as_str().parse::<StorageClass>().unwrap(), class);
        }
        assert!(matches!(
            "FAST".parse::<StorageClass>(),
            Err(ConfigError::InvalidStorageClass(_))
        ));
        assert!("standard".parse::<StorageClass>().is_err());
    }

    #[test]
    fn test_encryption_parse() {
        assert_eq!(Encryption::parse("AES256", "aws/s3").unwrap(), Encryption::Aes256);

        let kms = Encryption::parse("aws:kms", "alias/key").unwrap();
        assert_eq!(kms.algorithm(), "aws:kms");
        assert_eq!(kms.kms_key_id(), Some("alias/key"));

        assert!(Encryption::parse("ROT13", "aws/s3").is_err());
    }
}
