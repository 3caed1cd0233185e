//! Bounded backend concurrency plus retry discipline

pub mod admission;
pub mod retry;

pub use admission::{AdmissionLimiter, MARKER_WEIGHT, PROBE_WEIGHT, UPLOAD_WEIGHT};
pub use retry::{RetryPolicy, RetryQuota};
