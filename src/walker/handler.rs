//! Per-entry processing
//!
//! Each task is statted, probed, compared and, when needed, uploaded.
//! Directories are then listed into the queue whether or not their marker
//! upload succeeded. Failures are logged and counted; nothing here aborts
//! the run.

use crate::compare::{Decision, Mismatch};
use crate::error::{EntryError, ErrorClass, StoreError};
use crate::fs::LocalStat;
use crate::limiter::PROBE_WEIGHT;
use crate::store::ObjectHeader;
use crate::walker::coordinator::SyncContext;
use crate::walker::queue::EntryTask;
use crate::walker::tree::walk;
use tracing::{debug, warn};

/// What happened to one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    Uploaded { bytes: u64 },
    InSync,
    /// Neither a regular file nor a directory
    Skipped,
    Failed,
    Cancelled,
}

/// Object key for an entry: segments joined by single `/`, directories
/// with a trailing `/`
pub fn object_key(prefix: &str, rel_path: &str, name: &str, is_dir: bool) -> String {
    let mut key = String::with_capacity(prefix.len() + rel_path.len() + name.len() + 2);

    for segment in [prefix, rel_path, name] {
        let segment = segment.trim_matches('/');
        if segment.is_empty() {
            continue;
        }
        if !key.is_empty() {
            key.push('/');
        }
        key.push_str(segment);
    }

    if is_dir {
        key.push('/');
    }
    key
}

/// Relative path of a child entry
pub fn join_rel(rel_path: &str, name: &str) -> String {
    if rel_path.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", rel_path, name)
    }
}

/// Process one directory entry
pub async fn handle_entry(ctx: &SyncContext, task: EntryTask) -> EntryOutcome {
    let path = task.path();

    let stat = match LocalStat::read(&path).await {
        Ok(stat) => stat,
        Err(source) => {
            warn!("{}", EntryError::Stat { path, source });
            ctx.stats.record_error();
            return EntryOutcome::Failed;
        }
    };

    let entry_type = stat.entry_type();
    if !entry_type.is_file() && !entry_type.is_dir() {
        debug!("Skipping {} ({:?})", path.display(), entry_type);
        ctx.stats.record_skipped();
        return EntryOutcome::Skipped;
    }

    let is_dir = entry_type.is_dir();
    if is_dir {
        ctx.stats.record_dir();
    } else {
        ctx.stats.record_file();
    }

    // Non-UTF-8 names are keyed lossily; the local path stays exact
    let name = task.name.to_string_lossy();
    let key = object_key(&ctx.prefix, &task.rel_path, &name, is_dir);

    let remote = match probe(ctx, &key).await {
        Ok(remote) => remote,
        Err(_) => return EntryOutcome::Cancelled,
    };

    let decision = if is_dir || remote.is_none() {
        ctx.comparator.decide(&path, &stat, remote.as_ref(), is_dir)
    } else {
        let comparator = ctx.comparator;
        let owned = path.clone();
        match tokio::task::spawn_blocking(move || {
            comparator.decide(&owned, &stat, remote.as_ref(), false)
        })
        .await
        {
            Ok(decision) => decision,
            Err(e) => {
                warn!("Unable to verify {}: {}", path.display(), e);
                Decision {
                    must_upload: true,
                    reason: Some(Mismatch::DigestUnavailable),
                    hashes: None,
                }
            }
        }
    };

    let outcome = if decision.must_upload {
        let result = if is_dir {
            ctx.uploader.upload_directory_marker(&path, &key, &stat).await
        } else {
            ctx.uploader
                .upload_file(&path, &key, &stat, decision.hashes)
                .await
        };

        match result {
            Ok(receipt) => {
                ctx.stats.record_upload(receipt.bytes);
                EntryOutcome::Uploaded {
                    bytes: receipt.bytes,
                }
            }
            Err(EntryError::Cancelled { .. }) => return EntryOutcome::Cancelled,
            Err(e) => {
                // Upload failures were already logged by the uploader
                if !matches!(e, EntryError::Upload { .. }) {
                    warn!("{}", e);
                }
                ctx.stats.record_error();
                EntryOutcome::Failed
            }
        }
    } else {
        debug!("{} is in sync with s3://{}/{}", path.display(), ctx.bucket(), key);
        ctx.stats.record_in_sync();
        EntryOutcome::InSync
    };

    if is_dir {
        let child_rel = join_rel(&task.rel_path, &name);
        match walk(ctx, &child_rel, &path, None).await {
            Ok(_) => {}
            Err(EntryError::Cancelled { .. }) => return EntryOutcome::Cancelled,
            Err(e) => {
                warn!("{}", e);
                ctx.stats.record_error();
            }
        }
    }

    outcome
}

/// Fetch the remote header. Not-found and failed probes both mean "upload";
/// only cancellation is returned as an error.
async fn probe(ctx: &SyncContext, key: &str) -> Result<Option<ObjectHeader>, StoreError> {
    let store = &ctx.store;
    let bucket = ctx.bucket();

    match ctx
        .limiter
        .call("HeadObject", PROBE_WEIGHT, move || store.head_object(bucket, key))
        .await
    {
        Ok(header) => Ok(Some(header)),
        Err(e) if e.is_cancelled() => Err(e),
        Err(e) => {
            if ctx.limiter.classify(&e) == ErrorClass::NotFound {
                debug!("s3://{}/{} not found", bucket, key);
            } else {
                warn!("HeadObject on s3://{}/{} failed; will resync object: {}", bucket, key, e);
                ctx.stats.record_error();
            }
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DestinationUrl, SourceSpec, SyncConfig};
    use crate::error::DefaultClassifier;
    use crate::metadata::{keys, RootSquash};
    use crate::shutdown::Shutdown;
    use crate::store::{MemoryStore, Operation};
    use crate::walker::coordinator::SyncStats;
    use std::ffi::OsString;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn context(store: Arc<MemoryStore>, prefix_url: &str) -> SyncContext {
        let mut config = SyncConfig::new(
            SourceSpec::parse("./"),
            DestinationUrl::parse(prefix_url).unwrap(),
        );
        config.max_retries = 3;
        SyncContext::new(
            &config,
            store,
            Arc::new(DefaultClassifier),
            Arc::new(SyncStats::new()),
            Shutdown::new(),
        )
    }

    fn task(dir: &Path, name: &str) -> EntryTask {
        EntryTask::new("", dir, OsString::from(name))
    }

    #[test]
    fn test_object_key() {
        assert_eq!(object_key("", "", "file.txt", false), "file.txt");
        assert_eq!(object_key("", "", "dir", true), "dir/");
        assert_eq!(object_key("pre/", "a/b", "c", false), "pre/a/b/c");
        assert_eq!(object_key("pre/", "a/b", "c", true), "pre/a/b/c/");
        assert_eq!(object_key("pre/", "", "c", false), "pre/c");
    }

    #[test]
    fn test_object_key_never_doubles_separator() {
        let key = object_key("/pre//", "/a/b/", "/c", true);
        assert_eq!(key, "pre/a/b/c/");
        assert!(!key.contains("//"));
    }

    #[test]
    fn test_join_rel() {
        assert_eq!(join_rel("", "a"), "a");
        assert_eq!(join_rel("a", "b"), "a/b");
    }

    #[tokio::test]
    async fn test_new_file_is_uploaded() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("new.txt"), b"fresh").unwrap();
        let store = Arc::new(MemoryStore::new());
        store.create_bucket("bucket");
        let ctx = context(store.clone(), "s3://bucket/pre");

        let outcome = handle_entry(&ctx, task(dir.path(), "new.txt")).await;

        assert_eq!(outcome, EntryOutcome::Uploaded { bytes: 5 });
        let object = store.object("bucket", "pre/new.txt").unwrap();
        assert_eq!(&object.body[..], b"fresh");
        assert!(object.metadata.contains_key(keys::SHA512));
    }

    #[tokio::test]
    async fn test_in_sync_file_is_not_uploaded() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("same.txt"), b"same").unwrap();
        let store = Arc::new(MemoryStore::new());
        store.create_bucket("bucket");
        let ctx = context(store.clone(), "s3://bucket");

        handle_entry(&ctx, task(dir.path(), "same.txt")).await;
        let outcome = handle_entry(&ctx, task(dir.path(), "same.txt")).await;

        assert_eq!(outcome, EntryOutcome::InSync);
        assert_eq!(store.put_count(), 1);
    }

    #[tokio::test]
    async fn test_changed_content_forces_upload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        fs::write(&path, b"version-1").unwrap();
        let store = Arc::new(MemoryStore::new());
        store.create_bucket("bucket");
        let ctx = context(store.clone(), "s3://bucket");

        handle_entry(&ctx, task(dir.path(), "doc.txt")).await;

        // Same size and attributes, different bytes
        let mut object = store.object("bucket", "doc.txt").unwrap();
        let stat = LocalStat::read(&path).await.unwrap();
        object.metadata.insert(keys::SHA512.to_string(), "0".repeat(128));
        store.insert_object("bucket", "doc.txt", &object.body, object.metadata);
        assert_eq!(LocalStat::read(&path).await.unwrap(), stat);

        let outcome = handle_entry(&ctx, task(dir.path(), "doc.txt")).await;
        assert_eq!(outcome, EntryOutcome::Uploaded { bytes: 9 });
        assert_eq!(store.put_count(), 2);
    }

    #[tokio::test]
    async fn test_directory_marker_and_children() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/a"), b"a").unwrap();
        let store = Arc::new(MemoryStore::new());
        store.create_bucket("bucket");
        let ctx = context(store.clone(), "s3://bucket");

        let outcome = handle_entry(&ctx, task(dir.path(), "sub")).await;
        assert_eq!(outcome, EntryOutcome::Uploaded { bytes: 0 });
        assert_eq!(store.object("bucket", "sub/").unwrap().body.len(), 0);

        let child = ctx.queue.receiver().try_recv().unwrap();
        assert_eq!(child.rel_path, "sub");
        assert_eq!(child.name, "a");
    }

    #[tokio::test]
    async fn test_directory_recursed_when_marker_fails() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/a"), b"a").unwrap();
        let store = Arc::new(MemoryStore::new());
        store.create_bucket("bucket");
        store.inject_fault(Operation::Put, StoreError::AccessDenied("denied".into()), 1);
        let ctx = context(store.clone(), "s3://bucket");

        let outcome = handle_entry(&ctx, task(dir.path(), "sub")).await;

        assert_eq!(outcome, EntryOutcome::Failed);
        assert_eq!(ctx.stats.errors(), 1);
        assert_eq!(ctx.queue.pending(), 1);
    }

    #[tokio::test]
    async fn test_probe_failure_fails_open() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("f"), b"data").unwrap();
        let store = Arc::new(MemoryStore::new());
        store.create_bucket("bucket");
        store.inject_fault(Operation::Head, StoreError::AccessDenied("denied".into()), 1);
        let ctx = context(store.clone(), "s3://bucket");

        let outcome = handle_entry(&ctx, task(dir.path(), "f")).await;

        assert_eq!(outcome, EntryOutcome::Uploaded { bytes: 4 });
        assert_eq!(ctx.stats.errors(), 1);
    }

    #[tokio::test]
    async fn test_not_found_is_not_an_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("f"), b"data").unwrap();
        let store = Arc::new(MemoryStore::new());
        store.create_bucket("bucket");
        let ctx = context(store.clone(), "s3://bucket");

        handle_entry(&ctx, task(dir.path(), "f")).await;
        assert_eq!(ctx.stats.errors(), 0);
    }

    #[tokio::test]
    async fn test_missing_entry_counts_error() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.create_bucket("bucket");
        let ctx = context(store.clone(), "s3://bucket");

        let outcome = handle_entry(&ctx, task(dir.path(), "vanished")).await;

        assert_eq!(outcome, EntryOutcome::Failed);
        assert_eq!(ctx.stats.errors(), 1);
        assert_eq!(store.call_count(Operation::Head), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_special_files_are_skipped() {
        use std::os::unix::net::UnixListener;

        let dir = tempdir().unwrap();
        let _listener = UnixListener::bind(dir.path().join("sock")).unwrap();
        let store = Arc::new(MemoryStore::new());
        store.create_bucket("bucket");
        let ctx = context(store.clone(), "s3://bucket");

        let outcome = handle_entry(&ctx, task(dir.path(), "sock")).await;

        assert_eq!(outcome, EntryOutcome::Skipped);
        assert_eq!(store.call_count(Operation::Head), 0);
    }

    #[tokio::test]
    async fn test_root_squash_in_both_paths() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("owned"), b"x").unwrap();
        let stat = LocalStat::read(&dir.path().join("owned")).await.unwrap();

        let store = Arc::new(MemoryStore::new());
        store.create_bucket("bucket");
        let mut config = SyncConfig::new(
            SourceSpec::parse("./"),
            DestinationUrl::parse("s3://bucket").unwrap(),
        );
        config.root_squash = Some(RootSquash { uid: 65534, gid: 65534 });
        let ctx = SyncContext::new(
            &config,
            store.clone(),
            Arc::new(DefaultClassifier),
            Arc::new(SyncStats::new()),
            Shutdown::new(),
        );

        handle_entry(&ctx, task(dir.path(), "owned")).await;
        let object = store.object("bucket", "owned").unwrap();
        let expected_uid = if stat.uid == 0 { 65534 } else { stat.uid };
        assert_eq!(object.metadata[keys::OWNER], expected_uid.to_string());

        // Comparison squashes the same way, so a rerun converges
        let outcome = handle_entry(&ctx, task(dir.path(), "owned")).await;
        assert_eq!(outcome, EntryOutcome::InSync);
    }
}
