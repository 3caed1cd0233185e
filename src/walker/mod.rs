//! Concurrent tree walker
//!
//! This module walks the local source tree with a fixed pool of async
//! workers. Directory listings feed an unbounded task queue; each worker
//! handles one entry at a time (stat, probe, compare, upload) and lists
//! subdirectories back into the queue.
//!
//! # Architecture
//!
//! ```text
//!                     ┌─────────────────────────┐
//!                     │        SyncRun          │
//!                     │  - source / bucket check│
//!                     │  - walk(source root)    │
//!                     └───────────┬─────────────┘
//!                                 │ EntryTask (16 names per read batch)
//!                                 ▼
//!                     ┌─────────────────────────┐
//!                     │       WorkQueue         │
//!                     │  - async-channel        │◄──────────────┐
//!                     │  - pending counter      │               │
//!                     └───────────┬─────────────┘               │
//!       ┌─────────────────────────┼─────────────────────────┐   │
//!       │                         │                         │   │
//! ┌─────▼─────┐             ┌─────▼─────┐             ┌─────▼─────┐
//! │  Worker 1 │             │  Worker 2 │             │  Worker N │
//! │ stat      │             │ stat      │             │ stat      │
//! │ HeadObject│             │ HeadObject│             │ HeadObject│
//! │ compare   │             │ compare   │             │ compare   │
//! │ upload    │             │ upload    │             │ upload    │
//! └─────┬─────┘             └─────┬─────┘             └─────┬─────┘
//!       └─────────────────────────┼─────────────────────────┘
//!                                 ▼
//!                     ┌─────────────────────────┐
//!                     │    AdmissionLimiter     │
//!                     │  - weighted slots       │
//!                     │  - retry + backoff      │
//!                     └───────────┬─────────────┘
//!                                 ▼
//!                            ObjectStore
//! ```
//!
//! The run is finished when the pending counter drops to zero: every task
//! decrements it only after its handler, including any subdirectory
//! listing, has returned.

pub mod coordinator;
pub mod handler;
pub mod queue;
pub mod tree;

pub use coordinator::{SyncContext, SyncProgress, SyncReport, SyncRun, SyncStats};
pub use handler::{handle_entry, object_key, EntryOutcome};
pub use queue::{EntryTask, WorkQueue};
pub use tree::{walk, READ_BATCH};
