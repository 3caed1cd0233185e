//! Admission limiter for backend calls
//!
//! A weighted semaphore bounds the number of outstanding backend requests.
//! A metadata probe or directory marker takes [`PROBE_WEIGHT`] slots, a file
//! upload takes [`UPLOAD_WEIGHT`] because it may fan out into several
//! concurrent part transfers. Calls run under the retry policy while the
//! permit is held.
//!
//! The run-scoped [`Shutdown`] aborts pending acquisitions and backoff
//! sleeps. Calls already in flight finish on their own.

use super::retry::{RetryPolicy, RetryQuota, NO_RETRY_INCREMENT, RETRY_COST, TIMEOUT_RETRY_COST};
use crate::error::{DefaultClassifier, ErrorClass, ErrorClassifier, StoreError, StoreResult};
use crate::shutdown::Shutdown;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, warn};

/// Slots taken by a metadata probe
pub const PROBE_WEIGHT: u32 = 1;

/// Slots taken by a zero-length directory marker create
pub const MARKER_WEIGHT: u32 = 1;

/// Slots taken by a file upload
pub const UPLOAD_WEIGHT: u32 = 5;

pub struct AdmissionLimiter {
    semaphore: Semaphore,
    capacity: u32,
    policy: RetryPolicy,
    quota: RetryQuota,
    classifier: Arc<dyn ErrorClassifier>,
    shutdown: Shutdown,
    retries: AtomicU64,
}

impl AdmissionLimiter {
    /// Limiter with `capacity` slots and the default error classifier
    pub fn new(capacity: u32, policy: RetryPolicy, shutdown: Shutdown) -> Self {
        Self::with_classifier(capacity, policy, Arc::new(DefaultClassifier), shutdown)
    }

    pub fn with_classifier(
        capacity: u32,
        policy: RetryPolicy,
        classifier: Arc<dyn ErrorClassifier>,
        shutdown: Shutdown,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Semaphore::new(capacity as usize),
            capacity,
            policy,
            quota: RetryQuota::for_concurrency(capacity),
            classifier,
            shutdown,
            retries: AtomicU64::new(0),
        }
    }

    /// Classify a backend error with the injected classifier
    pub fn classify(&self, error: &StoreError) -> ErrorClass {
        self.classifier.classify(error)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Retries performed so far, across all calls
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Wait for `weight` slots. Weights above capacity are clamped.
    pub async fn acquire(&self, weight: u32) -> StoreResult<SemaphorePermit<'_>> {
        let weight = weight.clamp(1, self.capacity);
        tokio::select! {
            biased;
            _ = self.shutdown.triggered() => Err(StoreError::Cancelled),
            permit = self.semaphore.acquire_many(weight) => {
                permit.map_err(|_| StoreError::Cancelled)
            }
        }
    }

    /// Run `op` under the retry policy without taking slots
    ///
    /// Only errors classified as transient are retried. A retry needs both
    /// an attempt left and enough tokens in the shared quota.
    pub async fn retry<F, Fut, T>(&self, op_name: &str, op: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        self.run_with_retries(op_name, op, true).await
    }

    /// Like [`retry`](Self::retry), but ignores shutdown
    ///
    /// For cleanup calls that must still reach the backend after the run
    /// was cancelled, such as aborting a multipart upload.
    pub async fn retry_cleanup<F, Fut, T>(&self, op_name: &str, op: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        self.run_with_retries(op_name, op, false).await
    }

    async fn run_with_retries<F, Fut, T>(
        &self,
        op_name: &str,
        mut op: F,
        cancellable: bool,
    ) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut attempt: u32 = 1;
        let mut last_cost: Option<u32> = None;

        loop {
            if cancellable && self.shutdown.is_triggered() {
                return Err(StoreError::Cancelled);
            }

            let err = match op().await {
                Ok(value) => {
                    self.quota.refund(last_cost.unwrap_or(NO_RETRY_INCREMENT));
                    if attempt > 1 {
                        debug!("{} succeeded after {} attempts", op_name, attempt);
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if self.classifier.classify(&err) != ErrorClass::Transient {
                return Err(err);
            }

            if attempt >= self.policy.max_attempts {
                warn!("{} failed after {} attempts: {}", op_name, attempt, err);
                return Err(err);
            }

            let cost = match err {
                StoreError::Timeout(_) => TIMEOUT_RETRY_COST,
                _ => RETRY_COST,
            };
            if !self.quota.try_acquire(cost) {
                warn!("{} not retried, retry quota exhausted: {}", op_name, err);
                return Err(err);
            }
            last_cost = Some(cost);

            let delay = self.policy.delay_before(attempt);
            debug!(
                "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                op_name, attempt, self.policy.max_attempts, err, delay
            );
            self.retries.fetch_add(1, Ordering::Relaxed);

            if cancellable {
                tokio::select! {
                    biased;
                    _ = self.shutdown.triggered() => return Err(StoreError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            } else {
                tokio::time::sleep(delay).await;
            }

            attempt += 1;
        }
    }

    /// Take `weight` slots, then run `op` under the retry policy
    pub async fn call<F, Fut, T>(&self, op_name: &str, weight: u32, op: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let _permit = self.acquire(weight).await?;
        self.retry(op_name, op).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn limiter(capacity: u32, attempts: u32) -> AdmissionLimiter {
        AdmissionLimiter::new(capacity, RetryPolicy::test(attempts), Shutdown::new())
    }

    /// Run `call` with an op that fails with `error` for the first `failures` attempts
    async fn run_failing(
        limiter: &AdmissionLimiter,
        error: StoreError,
        failures: u32,
    ) -> (StoreResult<u32>, u32) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = limiter
            .call("op", PROBE_WEIGHT, || {
                let counter = Arc::clone(&counter);
                let error = error.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < failures {
                        Err(error)
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        (result, calls.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let limiter = limiter(10, 5);
        let (result, calls) = run_failing(&limiter, StoreError::Throttled("SlowDown".into()), 2).await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls, 3);
        assert_eq!(limiter.retries(), 2);
        assert_eq!(limiter.available(), 10);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let limiter = limiter(10, 5);
        let (result, calls) = run_failing(&limiter, StoreError::AccessDenied("no".into()), 10).await;

        assert!(matches!(result, Err(StoreError::AccessDenied(_))));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let limiter = limiter(10, 5);
        let not_found = StoreError::NotFound {
            bucket: "b".into(),
            key: "k".into(),
        };
        let (result, calls) = run_failing(&limiter, not_found, 10).await;

        assert_eq!(limiter.classify(&result.unwrap_err()), ErrorClass::NotFound);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_attempt_limit() {
        let limiter = limiter(10, 3);
        let (result, calls) = run_failing(&limiter, StoreError::Timeout("slow".into()), 10).await;

        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_disabled_retries_make_one_attempt() {
        let limiter = AdmissionLimiter::new(10, RetryPolicy::disabled(), Shutdown::new());
        let (result, calls) = run_failing(&limiter, StoreError::Throttled("SlowDown".into()), 10).await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_quota_exhaustion_stops_retries() {
        // capacity 1 => quota of 5 tokens, enough for a single retry
        let limiter = limiter(1, 10);
        let (result, calls) = run_failing(&limiter, StoreError::Throttled("SlowDown".into()), 10).await;

        assert!(result.is_err());
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn test_custom_classifier() {
        struct AllTransient;
        impl ErrorClassifier for AllTransient {
            fn classify(&self, _: &StoreError) -> ErrorClass {
                ErrorClass::Transient
            }
        }

        let limiter = AdmissionLimiter::with_classifier(
            10,
            RetryPolicy::test(2),
            Arc::new(AllTransient),
            Shutdown::new(),
        );
        let (_, calls) = run_failing(&limiter, StoreError::AccessDenied("retry me".into()), 10).await;

        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn test_acquire_blocks_at_capacity() {
        let limiter = Arc::new(limiter(5, 1));
        let held = limiter.acquire(UPLOAD_WEIGHT).await.unwrap();
        assert_eq!(limiter.available(), 0);

        let waiter = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.acquire(PROBE_WEIGHT).await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_retry_stops_after_shutdown() {
        let shutdown = Shutdown::new();
        let limiter = AdmissionLimiter::new(5, RetryPolicy::test(3), shutdown.clone());
        shutdown.trigger();

        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = limiter
            .retry("op", || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert_eq!(result, Err(StoreError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cleanup_runs_after_shutdown() {
        let shutdown = Shutdown::new();
        let limiter = AdmissionLimiter::new(5, RetryPolicy::test(3), shutdown.clone());
        shutdown.trigger();

        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = limiter
            .retry_cleanup("op", || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(StoreError::Throttled("SlowDown".into()))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_pending_acquire() {
        let shutdown = Shutdown::new();
        let limiter = Arc::new(AdmissionLimiter::new(5, RetryPolicy::test(1), shutdown.clone()));
        let _held = limiter.acquire(UPLOAD_WEIGHT).await.unwrap();

        let waiter = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.acquire(PROBE_WEIGHT).await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.trigger();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(StoreError::Cancelled));
    }
}
