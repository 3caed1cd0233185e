//! Object metadata codec
//!
//! Converts local POSIX attributes and digest bundles to and from the string
//! metadata schema that File Gateway style products read back as file
//! attributes:
//!
//! | key                | value                                |
//! |--------------------|--------------------------------------|
//! | `file-owner`       | uid, decimal                         |
//! | `file-group`       | gid, decimal                         |
//! | `file-permissions` | low 12 mode bits, 4-digit octal      |
//! | `file-ctime`       | nanoseconds since epoch, `"<n>ns"`   |
//! | `file-mtime`       | nanoseconds since epoch, `"<n>ns"`   |
//! | `md5` .. `sha512`  | lowercase hex digest                 |
//! | `user-agent`       | tool identification tag             |
//!
//! Decoding is strict: anything that does not parse is reported as
//! [`MetadataError::Invalid`] so the comparator can treat it as a mismatch.

use crate::content::{DigestAlgorithm, HashBundle};
use crate::fs::LocalStat;
use std::collections::HashMap;
use thiserror::Error;

/// Metadata keys understood by the gateway
pub mod keys {
    pub const OWNER: &str = "file-owner";
    pub const GROUP: &str = "file-group";
    pub const PERMISSIONS: &str = "file-permissions";
    pub const CTIME: &str = "file-ctime";
    pub const MTIME: &str = "file-mtime";
    pub const MD5: &str = "md5";
    pub const SHA1: &str = "sha1";
    pub const SHA256: &str = "sha256";
    pub const SHA512: &str = "sha512";
    pub const USER_AGENT: &str = "user-agent";
}

/// Value written under [`keys::USER_AGENT`]
pub const AGENT_TAG: &str = "s3-tree-sync";

/// String-keyed object metadata
pub type MetadataMap = HashMap<String, String>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("metadata key '{key}' is missing")]
    Missing { key: &'static str },

    #[error("metadata key '{key}' has invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Substitute owner recorded for local root-owned entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootSquash {
    pub uid: u32,
    pub gid: u32,
}

impl RootSquash {
    pub fn squash_uid(&self, uid: u32) -> u32 {
        if uid == 0 {
            self.uid
        } else {
            uid
        }
    }

    pub fn squash_gid(&self, gid: u32) -> u32 {
        if gid == 0 {
            self.gid
        } else {
            gid
        }
    }
}

/// POSIX attributes as they are recorded remotely
///
/// Built only through [`FileAttributes::from_stat`], which is where root
/// squashing happens for both the comparison and the upload path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttributes {
    pub uid: u32,
    pub gid: u32,
    pub permissions: u16,
    pub ctime_ns: i64,
    pub mtime_ns: i64,
}

impl FileAttributes {
    pub fn from_stat(stat: &LocalStat, squash: Option<RootSquash>) -> Self {
        let (uid, gid) = match squash {
            Some(squash) => (squash.squash_uid(stat.uid), squash.squash_gid(stat.gid)),
            None => (stat.uid, stat.gid),
        };

        Self {
            uid,
            gid,
            permissions: stat.permissions().bits() as u16,
            ctime_ns: stat.ctime_ns,
            mtime_ns: stat.mtime_ns,
        }
    }

    /// Encode the attribute keys plus the agent tag
    pub fn encode(&self) -> MetadataMap {
        let mut map = MetadataMap::with_capacity(10);
        map.insert(keys::OWNER.to_string(), encode_id(self.uid));
        map.insert(keys::GROUP.to_string(), encode_id(self.gid));
        map.insert(keys::PERMISSIONS.to_string(), encode_permissions(self.permissions));
        map.insert(keys::CTIME.to_string(), encode_timestamp(self.ctime_ns));
        map.insert(keys::MTIME.to_string(), encode_timestamp(self.mtime_ns));
        map.insert(keys::USER_AGENT.to_string(), AGENT_TAG.to_string());
        map
    }
}

/// Add all four hex digests to a metadata map
pub fn encode_digests(map: &mut MetadataMap, hashes: &HashBundle) {
    for algorithm in DigestAlgorithm::PREFERENCE {
        map.insert(algorithm.metadata_key().to_string(), hashes.hex(algorithm));
    }
}

pub fn encode_id(id: u32) -> String {
    id.to_string()
}

pub fn decode_id(key: &'static str, map: &MetadataMap) -> Result<u32, MetadataError> {
    let value = lookup(key, map)?;
    value.parse::<u32>().map_err(|_| invalid(key, value))
}

pub fn encode_permissions(bits: u16) -> String {
    format!("{:04o}", bits & 0o7777)
}

pub fn decode_permissions(map: &MetadataMap) -> Result<u16, MetadataError> {
    let key = keys::PERMISSIONS;
    let value = lookup(key, map)?;
    u16::from_str_radix(value, 8).map_err(|_| invalid(key, value))
}

pub fn encode_timestamp(nanos: i64) -> String {
    format!("{}ns", nanos)
}

/// Decode `"<integer><unit>"` into nanoseconds
///
/// `ns` is what this codec writes; `us`/`µs`, `ms`, `s`, `m` and `h` are also
/// accepted for values written by other tools.
pub fn decode_timestamp(key: &'static str, map: &MetadataMap) -> Result<i64, MetadataError> {
    let value = lookup(key, map)?;
    parse_nanos(value).ok_or_else(|| invalid(key, value))
}

fn parse_nanos(value: &str) -> Option<i64> {
    let (negative, rest) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };

    let digits_end = rest.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }
    let (digits, unit) = rest.split_at(digits_end);

    let scale: i64 = match unit {
        "ns" => 1,
        "us" | "µs" | "μs" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60 * 1_000_000_000,
        "h" => 3_600 * 1_000_000_000,
        _ => return None,
    };

    let magnitude = digits.parse::<i64>().ok()?.checked_mul(scale)?;
    Some(if negative { -magnitude } else { magnitude })
}

fn lookup<'a>(key: &'static str, map: &'a MetadataMap) -> Result<&'a str, MetadataError> {
    map.get(key)
        .map(String::as_str)
        .ok_or(MetadataError::Missing { key })
}

fn invalid(key: &'static str, value: &str) -> MetadataError {
    MetadataError::Invalid {
        key,
        value: value.to_string(),
    }
}
