//! Sync decision for one entry
//!
//! Given the local stat snapshot and the remote object header, decide
//! whether the entry must be (re)uploaded. Checks run in a fixed order and
//! the first failure wins:
//!
//! 1. size (files only)
//! 2. owner / group, after root squashing
//! 3. permission bits
//! 4. ctime / mtime, unless timestamps are ignored
//! 5. content digest (files only): the strongest digest present in the
//!    remote metadata is recomputed locally; skipped when none is present
//!
//! The ETag is never consulted. Missing or malformed metadata counts as a
//! mismatch, and a local read failure while hashing forces an upload.

use crate::content::{digest_file, DigestAlgorithm, HashBundle};
use crate::fs::LocalStat;
use crate::metadata::{self, keys, FileAttributes, MetadataError, MetadataMap, RootSquash};
use crate::store::ObjectHeader;
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// Why an entry must be uploaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    /// No remote object, or the probe failed
    Missing,
    Size { local: u64, remote: u64 },
    Owner { local: u32, remote: Option<u32> },
    Group { local: u32, remote: Option<u32> },
    Permissions { local: u16, remote: Option<u16> },
    Ctime { local: i64, remote: Option<i64> },
    Mtime { local: i64, remote: Option<i64> },
    Digest { algorithm: DigestAlgorithm },
    /// The local file could not be hashed
    DigestUnavailable,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn or_missing<T: fmt::Display>(value: &Option<T>) -> String {
            value
                .as_ref()
                .map_or_else(|| "missing".to_string(), |v| v.to_string())
        }

        match self {
            Mismatch::Missing => write!(f, "object does not exist"),
            Mismatch::Size { local, remote } => write!(f, "size {} != {}", local, remote),
            Mismatch::Owner { local, remote } => write!(f, "owner {} != {}", local, or_missing(remote)),
            Mismatch::Group { local, remote } => write!(f, "group {} != {}", local, or_missing(remote)),
            Mismatch::Permissions { local, remote } => write!(
                f,
                "permissions {:04o} != {}",
                local,
                remote.map_or_else(|| "missing".to_string(), |p| format!("{:04o}", p))
            ),
            Mismatch::Ctime { local, remote } => write!(f, "ctime {} != {}", local, or_missing(remote)),
            Mismatch::Mtime { local, remote } => write!(f, "mtime {} != {}", local, or_missing(remote)),
            Mismatch::Digest { algorithm } => write!(f, "{} digest differs", algorithm),
            Mismatch::DigestUnavailable => write!(f, "local digest unavailable"),
        }
    }
}

/// Outcome of [`Comparator::decide`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub must_upload: bool,
    pub reason: Option<Mismatch>,
    /// Digests computed during verification, reusable by the uploader
    pub hashes: Option<HashBundle>,
}

impl Decision {
    fn in_sync() -> Self {
        Self {
            must_upload: false,
            reason: None,
            hashes: None,
        }
    }

    fn upload(reason: Mismatch) -> Self {
        Self {
            must_upload: true,
            reason: Some(reason),
            hashes: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Comparator {
    pub squash: Option<RootSquash>,
    pub ignore_timestamps: bool,
}

impl Comparator {
    pub fn new(squash: Option<RootSquash>, ignore_timestamps: bool) -> Self {
        Self {
            squash,
            ignore_timestamps,
        }
    }

    /// Decide whether `path` must be uploaded
    ///
    /// Blocking when a digest has to be computed: call from `spawn_blocking`
    /// for files.
    pub fn decide(
        &self,
        path: &Path,
        stat: &LocalStat,
        remote: Option<&ObjectHeader>,
        is_dir: bool,
    ) -> Decision {
        let Some(remote) = remote else {
            return Decision::upload(Mismatch::Missing);
        };

        if let Some(mismatch) = self.metadata_mismatch(stat, remote, is_dir) {
            info!("{}: {}", path.display(), mismatch);
            return Decision::upload(mismatch);
        }

        if is_dir {
            return Decision::in_sync();
        }

        let Some((algorithm, expected)) = select_digest(&remote.metadata) else {
            debug!("{}: no remote digest, trusting metadata", path.display());
            return Decision::in_sync();
        };

        match digest_file(path) {
            Ok(hashes) => {
                if hashes.hex(algorithm).eq_ignore_ascii_case(expected) {
                    Decision::in_sync()
                } else {
                    let mismatch = Mismatch::Digest { algorithm };
                    info!("{}: {}", path.display(), mismatch);
                    Decision {
                        must_upload: true,
                        reason: Some(mismatch),
                        hashes: Some(hashes),
                    }
                }
            }
            Err(e) => {
                warn!("Unable to get hashes for {}: {}", path.display(), e);
                Decision::upload(Mismatch::DigestUnavailable)
            }
        }
    }

    /// Checks 1 to 4 in order; `None` when all pass
    pub fn metadata_mismatch(&self, stat: &LocalStat, remote: &ObjectHeader, is_dir: bool) -> Option<Mismatch> {
        if !is_dir && remote.content_length != stat.size {
            return Some(Mismatch::Size {
                local: stat.size,
                remote: remote.content_length,
            });
        }

        let local = FileAttributes::from_stat(stat, self.squash);
        let map = &remote.metadata;

        let owner = metadata::decode_id(keys::OWNER, map).ok();
        if owner != Some(local.uid) {
            return Some(Mismatch::Owner {
                local: local.uid,
                remote: owner,
            });
        }

        let group = metadata::decode_id(keys::GROUP, map).ok();
        if group != Some(local.gid) {
            return Some(Mismatch::Group {
                local: local.gid,
                remote: group,
            });
        }

        let permissions = metadata::decode_permissions(map).ok();
        if permissions != Some(local.permissions) {
            return Some(Mismatch::Permissions {
                local: local.permissions,
                remote: permissions,
            });
        }

        if self.ignore_timestamps {
            return None;
        }

        let ctime = decode_time(keys::CTIME, map);
        if ctime != Some(local.ctime_ns) {
            return Some(Mismatch::Ctime {
                local: local.ctime_ns,
                remote: ctime,
            });
        }

        let mtime = decode_time(keys::MTIME, map);
        if mtime != Some(local.mtime_ns) {
            return Some(Mismatch::Mtime {
                local: local.mtime_ns,
                remote: mtime,
            });
        }

        None
    }
}

fn decode_time(key: &'static str, map: &MetadataMap) -> Option<i64> {
    match metadata::decode_timestamp(key, map) {
        Ok(ns) => Some(ns),
        Err(MetadataError::Invalid { value, .. }) => {
            debug!("Unparseable {} value '{}'", key, value);
            None
        }
        Err(MetadataError::Missing { .. }) => None,
    }
}

/// Strongest digest present in remote metadata, with its expected hex value
pub fn select_digest(metadata: &MetadataMap) -> Option<(DigestAlgorithm, &str)> {
    DigestAlgorithm::PREFERENCE.into_iter().find_map(|algorithm| {
        metadata
            .get(algorithm.metadata_key())
            .filter(|value| !value.is_empty())
            .map(|value| (algorithm, value.as_str()))
    })
}
