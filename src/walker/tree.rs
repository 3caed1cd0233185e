//! Directory enumeration
//!
//! [`walk`] lists one directory in batches of [`READ_BATCH`] names and
//! submits an [`EntryTask`] per name to the work queue. It returns as soon
//! as the listing is exhausted; the submitted work finishes later and is
//! observed through the queue's pending counter.

use crate::error::{EntryError, EntryResult};
use crate::walker::coordinator::SyncContext;
use crate::walker::queue::EntryTask;
use std::ffi::{OsStr, OsString};
use std::path::Path;
use tracing::debug;

/// Names read before a batch is dispatched
pub const READ_BATCH: usize = 16;

/// Dispatch every entry of `dir_path` matching `filter`
///
/// `rel_path` is the directory's path relative to the source base and is
/// carried into each task for key construction. A filter restricts the
/// listing to the one child with that name.
///
/// Returns the number of tasks dispatched. Entries dispatched before a
/// listing error stay queued.
pub async fn walk(
    ctx: &SyncContext,
    rel_path: &str,
    dir_path: &Path,
    filter: Option<&str>,
) -> EntryResult<usize> {
    let mut entries = tokio::fs::read_dir(dir_path)
        .await
        .map_err(|source| EntryError::OpenDir {
            path: dir_path.to_path_buf(),
            source,
        })?;

    let filter = filter.map(OsStr::new);
    let mut batch: Vec<OsString> = Vec::with_capacity(READ_BATCH);
    let mut dispatched = 0;

    loop {
        if ctx.shutdown.is_triggered() {
            return Err(EntryError::Cancelled {
                path: dir_path.to_path_buf(),
            });
        }

        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(source) => {
                dispatch(ctx, rel_path, dir_path, &mut batch)?;
                return Err(EntryError::ReadDir {
                    path: dir_path.to_path_buf(),
                    source,
                });
            }
        };

        let name = entry.file_name();
        if filter.is_some_and(|wanted| name.as_os_str() != wanted) {
            continue;
        }

        batch.push(name);
        if batch.len() == READ_BATCH {
            dispatched += dispatch(ctx, rel_path, dir_path, &mut batch)?;
        }
    }

    dispatched += dispatch(ctx, rel_path, dir_path, &mut batch)?;
    debug!(dir = %dir_path.display(), entries = dispatched, "Directory dispatched");

    Ok(dispatched)
}

fn dispatch(
    ctx: &SyncContext,
    rel_path: &str,
    dir_path: &Path,
    batch: &mut Vec<OsString>,
) -> EntryResult<usize> {
    let count = batch.len();
    for name in batch.drain(..) {
        if !ctx.queue.submit(EntryTask::new(rel_path, dir_path, name)) {
            return Err(EntryError::Cancelled {
                path: dir_path.to_path_buf(),
            });
        }
    }
    Ok(count)
}
