//! Error types for s3-tree-sync
//!
//! This module defines the error hierarchy for a sync run:
//! - Usage errors (malformed arguments, exit code 2)
//! - Configuration errors (invalid options, unreadable source, bucket check,
//!   exit code 1, raised before any traversal)
//! - Object store errors, plus the classifier that maps them to
//!   not-found / transient / fatal
//! - Per-entry errors, which are logged and counted but never abort the run
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - Only failures that stop the run from starting are fatal
//! - Preserve error chains for debugging

use std::path::PathBuf;
use thiserror::Error;

/// Exit code for a successful run
pub const EXIT_SUCCESS: u8 = 0;

/// Exit code for configuration or operational failures
pub const EXIT_FAILURE: u8 = 1;

/// Exit code for malformed command lines
pub const EXIT_USAGE: u8 = 2;

/// Top-level error type for a sync run
#[derive(Error, Debug)]
pub enum SyncError {
    /// Malformed command line
    #[error("{0}")]
    Usage(String),

    /// Destination is not an `s3://bucket[/prefix]` URL
    #[error("Destination is not a valid S3 URL: {0}")]
    InvalidDestination(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Failed to walk the source root
    #[error("Walk failed: {0}")]
    Walk(#[from] EntryError),

    /// Run interrupted before all work completed
    #[error("Sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            SyncError::Usage(_) | SyncError::InvalidDestination(_) => EXIT_USAGE,
            _ => EXIT_FAILURE,
        }
    }
}

/// Configuration errors, all fatal before traversal starts
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Unknown storage class
    #[error("Invalid --storage-class value: {0}")]
    InvalidStorageClass(String),

    /// Unknown server-side encryption algorithm
    #[error("Invalid --encryption-algorithm value: {0}")]
    InvalidEncryption(String),

    /// Negative retry count
    #[error("Invalid --max-retries value: {0}")]
    InvalidMaxRetries(i64),

    /// Unparseable or non-positive backoff delay
    #[error("Invalid --max-backoff-delay value: {0}")]
    InvalidBackoffDelay(String),

    /// Concurrency budget too small for a file upload
    #[error("Invalid --max-concurrent value {count}: must be at least {min}")]
    InvalidConcurrency { count: u32, min: u32 },

    /// Invalid worker count
    #[error("Invalid worker count {count}: must be between 1 and {max}")]
    InvalidWorkerCount { count: usize, max: usize },

    /// Source root cannot be opened
    #[error("Unable to open source directory {path}: {reason}")]
    SourceUnreadable { path: PathBuf, reason: String },

    /// Root-squash substitute could not be resolved
    #[error("Unable to resolve root-squash user '{user}': {reason}")]
    RootSquashLookup { user: String, reason: String },

    /// Bucket location lookup failed
    #[error("Unable to get location for S3 bucket {bucket}: {reason}")]
    BucketCheck { bucket: String, reason: String },

    /// Backend client could not be constructed
    #[error("Failed to initialize object store client: {0}")]
    BackendInit(String),

    /// Binary was built without a transport
    #[error("No object store transport available: rebuild with the s3 feature")]
    BackendUnavailable,
}

/// Errors returned by an [`ObjectStore`](crate::store::ObjectStore) call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Object does not exist
    #[error("Not found: s3://{bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Bucket does not exist
    #[error("The specified bucket does not exist: {0}")]
    NoSuchBucket(String),

    /// Request was throttled by the service
    #[error("Request throttled: {0}")]
    Throttled(String),

    /// Request timed out
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Service or network unavailable
    #[error("Service unavailable (status {status}): {message}")]
    Unavailable { status: u16, message: String },

    /// Credentials rejected or insufficient permissions
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Request rejected as malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown multipart upload id
    #[error("No such upload: {0}")]
    NoSuchUpload(String),

    /// Any other backend failure
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Run-scoped cancellation fired
    #[error("Operation cancelled")]
    Cancelled,
}

impl StoreError {
    /// Check if this error is the run-scoped cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StoreError::Cancelled)
    }
}

/// How a call site should treat a backend failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Expected signal: the object does not exist yet
    NotFound,
    /// Worth retrying under the retry policy
    Transient,
    /// Retrying will not help
    Fatal,
}

/// Maps a raw backend error to an [`ErrorClass`].
///
/// Injected into the admission limiter so probe and upload call sites share
/// one notion of "not found" and "retryable".
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &StoreError) -> ErrorClass;
}

/// Classifier for the [`StoreError`] variants produced by the bundled stores
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl ErrorClassifier for DefaultClassifier {
    fn classify(&self, error: &StoreError) -> ErrorClass {
        match error {
            StoreError::NotFound { .. } => ErrorClass::NotFound,
            StoreError::Throttled(_) | StoreError::Timeout(_) | StoreError::Unavailable { .. } => {
                ErrorClass::Transient
            }
            StoreError::NoSuchBucket(_)
            | StoreError::AccessDenied(_)
            | StoreError::InvalidRequest(_)
            | StoreError::NoSuchUpload(_)
            | StoreError::Backend(_)
            | StoreError::Cancelled => ErrorClass::Fatal,
        }
    }
}

/// Per-entry failures: logged, counted, never fatal
#[derive(Error, Debug)]
pub enum EntryError {
    /// stat() failed
    #[error("Unable to get status of {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Directory could not be opened
    #[error("Unable to open directory {path}: {source}")]
    OpenDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Directory listing failed part way
    #[error("Unable to read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File could not be opened or read for upload
    #[error("Unable to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Digest computation failed
    #[error("Unable to get hashes for {path}: {source}")]
    Digest {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Upload call failed after retries
    #[error("Failed to upload {path}: {source}")]
    Upload {
        path: PathBuf,
        #[source]
        source: StoreError,
    },

    /// Run was cancelled before the entry finished
    #[error("Cancelled while processing {path}")]
    Cancelled { path: PathBuf },
}

/// Result type alias for SyncError
pub type Result<T> = std::result::Result<T, SyncError>;

/// Result type alias for StoreError
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for EntryError
pub type EntryResult<T> = std::result::Result<T, EntryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(SyncError::Usage("Missing destination".into()).exit_code(), EXIT_USAGE);
        assert_eq!(
            SyncError::InvalidDestination("not-an-s3-url".into()).exit_code(),
            EXIT_USAGE
        );
        assert_eq!(
            SyncError::Config(ConfigError::InvalidStorageClass("FAST".into())).exit_code(),
            EXIT_FAILURE
        );
        assert_eq!(SyncError::Cancelled.exit_code(), EXIT_FAILURE);
    }

    #[test]
    fn test_invalid_destination_message() {
        let err = SyncError::InvalidDestination("not-an-s3-url".into());
        assert_eq!(err.to_string(), "Destination is not a valid S3 URL: not-an-s3-url");
    }

    #[test]
    fn test_default_classifier() {
        let classifier = DefaultClassifier;
        let not_found = StoreError::NotFound {
            bucket: "b".into(),
            key: "k".into(),
        };
        assert_eq!(classifier.classify(&not_found), ErrorClass::NotFound);
        assert_eq!(
            classifier.classify(&StoreError::Throttled("SlowDown".into())),
            ErrorClass::Transient
        );
        assert_eq!(
            classifier.classify(&StoreError::Unavailable {
                status: 503,
                message: "busy".into()
            }),
            ErrorClass::Transient
        );
        assert_eq!(
            classifier.classify(&StoreError::AccessDenied("nope".into())),
            ErrorClass::Fatal
        );
        assert_eq!(classifier.classify(&StoreError::Cancelled), ErrorClass::Fatal);
    }

    #[test]
    fn test_error_conversion() {
        let config_err = ConfigError::BucketCheck {
            bucket: "missing".into(),
            reason: "NoSuchBucket".into(),
        };
        let sync_err: SyncError = config_err.into();
        assert!(matches!(sync_err, SyncError::Config(ConfigError::BucketCheck { .. })));
        assert_eq!(sync_err.exit_code(), EXIT_FAILURE);
    }
}
