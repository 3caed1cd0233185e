//! Sync coordinator - orchestrates one run
//!
//! The coordinator is responsible for:
//! - Checking the source root and the destination bucket before any work
//! - Building the shared limiter, uploader and comparator
//! - Starting the worker pool and seeding it with the source root
//! - Waiting on the pending-work barrier (or the shutdown signal)
//! - Final statistics

use crate::compare::Comparator;
use crate::config::SyncConfig;
use crate::error::{
    ConfigError, DefaultClassifier, EntryError, ErrorClassifier, Result, StoreError, SyncError,
};
use crate::limiter::{AdmissionLimiter, RetryPolicy};
use crate::shutdown::Shutdown;
use crate::store::ObjectStore;
use crate::upload::Uploader;
use crate::walker::handler::handle_entry;
use crate::walker::queue::WorkQueue;
use crate::walker::tree::walk;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Counters shared by all workers
#[derive(Debug, Default)]
pub struct SyncStats {
    files: AtomicU64,
    dirs: AtomicU64,
    uploaded: AtomicU64,
    bytes_uploaded: AtomicU64,
    in_sync: AtomicU64,
    skipped: AtomicU64,
    errors: AtomicU64,
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_file(&self) {
        self.files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dir(&self) {
        self.dirs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upload(&self, bytes: u64) {
        self.uploaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_in_sync(&self) {
        self.in_sync.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Point-in-time copy for display
    pub fn snapshot(&self, elapsed: Duration) -> SyncProgress {
        SyncProgress {
            files: self.files.load(Ordering::Relaxed),
            dirs: self.dirs.load(Ordering::Relaxed),
            uploaded: self.uploaded.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            in_sync: self.in_sync.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            elapsed,
        }
    }
}

/// Progress information for display
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncProgress {
    /// Regular files seen
    pub files: u64,

    /// Directories seen
    pub dirs: u64,

    /// Objects created
    pub uploaded: u64,

    /// Bytes sent in file bodies
    pub bytes_uploaded: u64,

    /// Entries whose object already matched
    pub in_sync: u64,

    /// Special files ignored
    pub skipped: u64,

    /// Per-entry failures
    pub errors: u64,

    /// Elapsed time
    pub elapsed: Duration,
}

impl SyncProgress {
    /// Entries (files and directories) per second
    pub fn entries_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.files + self.dirs) as f64 / secs
        } else {
            0.0
        }
    }
}

/// Result of a finished run
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub stats: SyncProgress,

    /// Backend retries across the run
    pub retries: u64,

    /// Time taken for the run
    pub duration: Duration,

    /// Whether the run completed (vs was interrupted)
    pub completed: bool,
}

/// State shared by the walker and every entry handler
pub struct SyncContext {
    pub store: Arc<dyn ObjectStore>,
    pub limiter: Arc<AdmissionLimiter>,
    pub uploader: Uploader,
    pub comparator: Comparator,

    /// Normalized key prefix, empty or ending in `/`
    pub prefix: String,

    pub queue: WorkQueue,
    pub stats: Arc<SyncStats>,
    pub shutdown: Shutdown,
}

impl SyncContext {
    pub fn new(
        config: &SyncConfig,
        store: Arc<dyn ObjectStore>,
        classifier: Arc<dyn ErrorClassifier>,
        stats: Arc<SyncStats>,
        shutdown: Shutdown,
    ) -> Self {
        let policy = RetryPolicy::from_limits(config.max_retries, config.max_backoff);
        let limiter = Arc::new(AdmissionLimiter::with_classifier(
            config.max_concurrent,
            policy,
            classifier,
            shutdown.clone(),
        ));

        let uploader = Uploader::new(
            Arc::clone(&store),
            Arc::clone(&limiter),
            config.destination.bucket.clone(),
            config.storage_class,
            config.encryption.clone(),
            config.root_squash,
        )
        .with_part_size(config.part_size);

        Self {
            store,
            limiter,
            uploader,
            comparator: Comparator::new(config.root_squash, config.ignore_timestamps),
            prefix: config.destination.prefix.clone(),
            queue: WorkQueue::new(),
            stats,
            shutdown,
        }
    }

    pub fn bucket(&self) -> &str {
        self.uploader.bucket()
    }
}

/// One sync run from a source tree into a bucket
pub struct SyncRun {
    config: SyncConfig,
    store: Arc<dyn ObjectStore>,
    classifier: Arc<dyn ErrorClassifier>,
    stats: Arc<SyncStats>,
    shutdown: Shutdown,
}

impl SyncRun {
    pub fn new(config: SyncConfig, store: Arc<dyn ObjectStore>, shutdown: Shutdown) -> Self {
        Self {
            config,
            store,
            classifier: Arc::new(DefaultClassifier),
            stats: Arc::new(SyncStats::new()),
            shutdown,
        }
    }

    /// Replace the backend error classifier
    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Live counters, for progress display while the run is going
    pub fn stats(&self) -> Arc<SyncStats> {
        Arc::clone(&self.stats)
    }

    /// Run the sync to completion
    pub async fn run(self) -> Result<SyncReport> {
        let start_time = Instant::now();
        let root = self.config.source.base.clone();

        // The source root must be readable before anything else happens
        let _listing = tokio::fs::read_dir(&root)
            .await
            .map_err(|e| ConfigError::SourceUnreadable {
                path: root.clone(),
                reason: e.to_string(),
            })?;

        let ctx = Arc::new(SyncContext::new(
            &self.config,
            Arc::clone(&self.store),
            Arc::clone(&self.classifier),
            Arc::clone(&self.stats),
            self.shutdown.clone(),
        ));

        if self.config.check_bucket {
            check_bucket(&ctx).await?;
        }

        info!(
            source = %self.config.source.display_path().display(),
            destination = %self.config.destination.to_display_string(),
            workers = self.config.workers,
            "Starting sync"
        );

        let workers = spawn_workers(&ctx, self.config.workers);

        // Hold the barrier open while the root directory is dispatched
        ctx.queue.hold();
        let root_result = walk(&ctx, "", &root, self.config.source.filter.as_deref()).await;
        ctx.queue.complete();

        let root_error = match root_result {
            Ok(count) => {
                debug!(entries = count, "Root directory dispatched");
                None
            }
            Err(EntryError::Cancelled { .. }) => None,
            Err(e) => {
                error!("{}", e);
                Some(e)
            }
        };

        let drained = ctx.queue.wait_idle(&self.shutdown).await;
        if !drained {
            info!("Shutdown signal received");
        }

        ctx.queue.close();
        join_workers(workers).await;

        if let Some(e) = root_error {
            return Err(SyncError::Walk(e));
        }

        let duration = start_time.elapsed();
        let stats = self.stats.snapshot(duration);
        let completed = drained && !self.shutdown.is_triggered();

        info!(
            files = stats.files,
            dirs = stats.dirs,
            uploaded = stats.uploaded,
            bytes = stats.bytes_uploaded,
            in_sync = stats.in_sync,
            errors = stats.errors,
            duration_secs = duration.as_secs(),
            "Sync finished"
        );

        Ok(SyncReport {
            stats,
            retries: ctx.limiter.retries(),
            duration,
            completed,
        })
    }
}

/// Confirm the destination bucket exists and log its region
async fn check_bucket(ctx: &SyncContext) -> Result<()> {
    let store = &ctx.store;
    let bucket = ctx.bucket();

    match ctx
        .limiter
        .retry("GetBucketLocation", move || store.bucket_location(bucket))
        .await
    {
        Ok(region) => {
            info!(
                bucket = %bucket,
                region = region.as_deref().unwrap_or("us-east-1"),
                "Destination bucket found"
            );
            Ok(())
        }
        Err(StoreError::Cancelled) => Err(SyncError::Cancelled),
        Err(e) => Err(ConfigError::BucketCheck {
            bucket: bucket.to_string(),
            reason: e.to_string(),
        }
        .into()),
    }
}

fn spawn_workers(ctx: &Arc<SyncContext>, count: usize) -> Vec<JoinHandle<()>> {
    let workers: Vec<_> = (0..count.max(1))
        .map(|id| tokio::spawn(worker_loop(id, Arc::clone(ctx))))
        .collect();

    debug!(count = workers.len(), "Workers spawned");
    workers
}

async fn join_workers(workers: Vec<JoinHandle<()>>) {
    for worker in workers {
        if let Err(e) = worker.await {
            warn!(error = %e, "Worker failed to join cleanly");
        }
    }
}

/// Marks a task finished even if its handler panics
struct Completion<'a>(&'a WorkQueue);

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        self.0.complete();
    }
}

async fn worker_loop(id: usize, ctx: Arc<SyncContext>) {
    let receiver = ctx.queue.receiver();
    let mut handled: u64 = 0;

    while let Ok(task) = receiver.recv().await {
        let _done = Completion(&ctx.queue);

        // Drain without processing once shutdown has fired
        if ctx.shutdown.is_triggered() {
            continue;
        }

        handle_entry(&ctx, task).await;
        handled += 1;
    }

    debug!(worker = id, entries = handled, "Worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DestinationUrl, SourceSpec};
    use crate::store::MemoryStore;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn config(source: &Path, destination: &str) -> SyncConfig {
        let source = format!("{}/", source.display());
        let mut config = SyncConfig::new(
            SourceSpec::parse(&source),
            DestinationUrl::parse(destination).unwrap(),
        );
        config.workers = 4;
        config
    }

    #[test]
    fn test_sync_progress_rates() {
        let progress = SyncProgress {
            files: 900,
            dirs: 100,
            elapsed: Duration::from_secs(10),
            ..Default::default()
        };
        assert!((progress.entries_per_second() - 100.0).abs() < 0.01);

        let idle = SyncProgress::default();
        assert_eq!(idle.entries_per_second(), 0.0);
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = SyncStats::new();
        stats.record_file();
        stats.record_dir();
        stats.record_upload(42);
        stats.record_in_sync();
        stats.record_error();

        let snap = stats.snapshot(Duration::ZERO);
        assert_eq!(snap.files, 1);
        assert_eq!(snap.dirs, 1);
        assert_eq!(snap.uploaded, 1);
        assert_eq!(snap.bytes_uploaded, 42);
        assert_eq!(snap.in_sync, 1);
        assert_eq!(snap.errors, 1);
    }

    #[tokio::test]
    async fn test_run_uploads_tree() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("a/b/file.txt"), b"hello").unwrap();
        fs::write(dir.path().join("top.txt"), b"top").unwrap();

        let store = Arc::new(MemoryStore::new());
        store.create_bucket("bucket");

        let run = SyncRun::new(
            config(dir.path(), "s3://bucket"),
            store.clone(),
            Shutdown::new(),
        );
        let report = run.run().await.unwrap();

        assert!(report.completed);
        assert_eq!(store.keys("bucket"), vec!["a/", "a/b/", "a/b/file.txt", "top.txt"]);
        assert_eq!(report.stats.files, 2);
        assert_eq!(report.stats.dirs, 2);
        assert_eq!(report.stats.uploaded, 4);
        assert_eq!(report.stats.bytes_uploaded, 8);
        assert_eq!(report.stats.errors, 0);
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/data.bin"), b"0123456789").unwrap();

        let store = Arc::new(MemoryStore::new());
        store.create_bucket("bucket");

        SyncRun::new(config(dir.path(), "s3://bucket/pre"), store.clone(), Shutdown::new())
            .run()
            .await
            .unwrap();
        let puts = store.put_count();
        assert_eq!(puts, 2);

        let report = SyncRun::new(config(dir.path(), "s3://bucket/pre"), store.clone(), Shutdown::new())
            .run()
            .await
            .unwrap();

        assert_eq!(store.put_count(), puts);
        assert_eq!(report.stats.in_sync, 2);
        assert_eq!(report.stats.uploaded, 0);
    }

    #[tokio::test]
    async fn test_missing_source_is_config_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing");
        let store = Arc::new(MemoryStore::new());
        store.create_bucket("bucket");

        let err = SyncRun::new(config(&missing, "s3://bucket"), store.clone(), Shutdown::new())
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Config(ConfigError::SourceUnreadable { .. })));
        assert_eq!(store.call_count(crate::store::Operation::Head), 0);
    }

    #[tokio::test]
    async fn test_source_file_is_config_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        std::fs::write(&file, b"not a directory").unwrap();
        let store = Arc::new(MemoryStore::new());
        store.create_bucket("bucket");

        let err = SyncRun::new(config(&file, "s3://bucket"), store.clone(), Shutdown::new())
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Config(ConfigError::SourceUnreadable { .. })));
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_bucket_fails_check() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("f"), b"x").unwrap();
        let store = Arc::new(MemoryStore::new());

        let err = SyncRun::new(config(dir.path(), "s3://nope"), store.clone(), Shutdown::new())
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Config(ConfigError::BucketCheck { .. })));
        assert_eq!(err.exit_code(), crate::error::EXIT_FAILURE);
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_triggered_shutdown_reports_incomplete() {
        let dir = tempdir().unwrap();
        for i in 0..20 {
            fs::write(dir.path().join(format!("f{}", i)), b"x").unwrap();
        }
        let store = Arc::new(MemoryStore::new());
        store.create_bucket("bucket");

        let shutdown = Shutdown::new();
        shutdown.trigger();

        let mut cfg = config(dir.path(), "s3://bucket");
        cfg.check_bucket = false;
        let report = SyncRun::new(cfg, store.clone(), shutdown).run().await.unwrap();

        assert!(!report.completed);
        assert_eq!(store.put_count(), 0);
    }
}
