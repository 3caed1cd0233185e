//! s3-tree-sync - One-way, idempotent sync of a local tree into S3
//!
//! Copies a local directory tree into an S3 bucket, recording POSIX
//! ownership, permissions and timestamps in the object metadata schema used
//! by AWS Storage Gateway file shares. Repeated runs only upload entries
//! whose metadata or content changed.
//!
//! # Features
//!
//! - **Gateway metadata**: `file-owner`, `file-group`, `file-permissions`,
//!   `file-ctime` and `file-mtime` on every object, with optional root
//!   squashing.
//!
//! - **Content verification**: MD5, SHA-1, SHA-256 and SHA-512 computed in
//!   one read pass; the strongest digest present remotely decides whether an
//!   unchanged-looking file is really in sync.
//!
//! - **Bounded concurrency**: a fixed worker pool walks the tree and a
//!   weighted admission limiter bounds outstanding S3 requests, with
//!   exponential backoff and a shared retry budget.
//!
//! - **Large files**: bodies over 8 MiB go out as multipart uploads with
//!   several parts in flight.
//!
//! # Architecture
//!
//! ```text
//!   local tree ──► walker ──► handler ──► comparator ──► uploader
//!                    ▲           │                          │
//!                    └── subdirs ┘                          ▼
//!                                                 admission limiter
//!                                                           │
//!                                                           ▼
//!                                                     ObjectStore
//! ```
//!
//! # Example
//!
//! ```bash
//! # Sync /data/projects as s3://archive/projects/...
//! s3-tree-sync /data/projects s3://archive
//!
//! # Sync only the contents, under a prefix, with a spinner
//! s3-tree-sync /data/projects/ s3://archive/backup -p
//! ```

pub mod cli;
pub mod compare;
pub mod config;
pub mod content;
pub mod error;
pub mod fs;
pub mod limiter;
pub mod metadata;
pub mod progress;
pub mod shutdown;
pub mod store;
pub mod upload;
pub mod walker;

pub use config::{CliArgs, DestinationUrl, SourceSpec, SyncConfig};
pub use error::{Result, SyncError};
pub use shutdown::Shutdown;
pub use store::{MemoryStore, ObjectStore};
pub use walker::{SyncReport, SyncRun, SyncStats};
