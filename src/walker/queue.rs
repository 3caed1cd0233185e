//! Entry work queue with a pending-work barrier
//!
//! Directory reads push one [`EntryTask`] per matching name. A fixed pool of
//! workers pulls tasks off an unbounded channel, so the number of entries
//! being processed at once is bounded by the pool size no matter how wide
//! or deep the tree is.
//!
//! The pending counter is incremented before a task is sent and decremented
//! once its handler has finished, including any directory read the handler
//! did. It reaches zero only when the whole tree has been processed.

use crate::shutdown::Shutdown;
use async_channel::{unbounded, Receiver, Sender};
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

/// One directory entry to process
#[derive(Debug, Clone)]
pub struct EntryTask {
    /// Path of the parent relative to the source base, `""` at the top
    pub rel_path: String,
    /// Parent directory on disk
    pub dir_path: PathBuf,
    /// Leaf name
    pub name: OsString,
}

impl EntryTask {
    pub fn new(rel_path: impl Into<String>, dir_path: impl Into<PathBuf>, name: OsString) -> Self {
        Self {
            rel_path: rel_path.into(),
            dir_path: dir_path.into(),
            name,
        }
    }

    /// Full local path of the entry
    pub fn path(&self) -> PathBuf {
        self.dir_path.join(&self.name)
    }
}

pub struct WorkQueue {
    sender: Sender<EntryTask>,
    receiver: Receiver<EntryTask>,
    pending: AtomicU64,
    idle: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            pending: AtomicU64::new(0),
            idle: Notify::new(),
        }
    }

    /// Register and enqueue a task. Returns false once the queue is closed.
    pub fn submit(&self, task: EntryTask) -> bool {
        self.pending.fetch_add(1, Ordering::SeqCst);
        match self.sender.try_send(task) {
            Ok(()) => true,
            Err(_) => {
                self.complete();
                false
            }
        }
    }

    /// Mark one task finished
    pub fn complete(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Hold the barrier open while work is produced outside a task
    pub fn hold(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::SeqCst)
    }

    /// Tasks waiting for a worker
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Receiver handle for a worker
    pub fn receiver(&self) -> Receiver<EntryTask> {
        self.receiver.clone()
    }

    /// Wait until no work is pending. Returns false if shutdown fired first.
    pub async fn wait_idle(&self, shutdown: &Shutdown) -> bool {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.pending() == 0 {
                return true;
            }

            tokio::select! {
                _ = shutdown.triggered() => return false,
                _ = &mut notified => {}
            }
        }
    }

    /// Stop accepting tasks and wake idle workers
    pub fn close(&self) {
        self.sender.close();
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}
