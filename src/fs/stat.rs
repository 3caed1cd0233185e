//! Local stat snapshot
//!
//! Captures the POSIX attributes the comparator and uploader need from one
//! `stat()` call. Symlinks are followed, so a link to a regular file is
//! treated as that file.
//!
//! Timestamp fields differ between platform stat layouts, so they are read
//! only through [`StatTimes`].

use std::fs::Metadata;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// File type derived from the `st_mode` type bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    File,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
    Unknown,
}

impl EntryType {
    /// Convert from a full mode value
    pub fn from_mode(mode: u32) -> Self {
        match mode & 0o170000 {
            0o100000 => EntryType::File,        // S_IFREG
            0o040000 => EntryType::Directory,   // S_IFDIR
            0o120000 => EntryType::Symlink,     // S_IFLNK
            0o060000 => EntryType::BlockDevice, // S_IFBLK
            0o020000 => EntryType::CharDevice,  // S_IFCHR
            0o010000 => EntryType::Fifo,        // S_IFIFO
            0o140000 => EntryType::Socket,      // S_IFSOCK
            _ => EntryType::Unknown,
        }
    }

    pub fn is_file(&self) -> bool {
        *self == EntryType::File
    }

    pub fn is_dir(&self) -> bool {
        *self == EntryType::Directory
    }

    /// Anything that is neither a regular file nor a directory
    pub fn is_special(&self) -> bool {
        !self.is_file() && !self.is_dir()
    }
}

/// Permission bits (setuid/setgid/sticky plus rwx)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions(pub u32);

impl Permissions {
    /// Create from full mode (strips type bits)
    pub fn from_mode(mode: u32) -> Self {
        Self(mode & 0o7777)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

/// Nanosecond status-change and modification times of a stat result
pub trait StatTimes {
    fn ctime_ns(&self) -> i64;
    fn mtime_ns(&self) -> i64;
}

#[cfg(target_os = "linux")]
impl StatTimes for Metadata {
    fn ctime_ns(&self) -> i64 {
        use std::os::linux::fs::MetadataExt as LinuxMetadataExt;
        epoch_nanos(self.st_ctime(), self.st_ctime_nsec())
    }

    fn mtime_ns(&self) -> i64 {
        use std::os::linux::fs::MetadataExt as LinuxMetadataExt;
        epoch_nanos(self.st_mtime(), self.st_mtime_nsec())
    }
}

#[cfg(not(target_os = "linux"))]
impl StatTimes for Metadata {
    fn ctime_ns(&self) -> i64 {
        epoch_nanos(self.ctime(), self.ctime_nsec())
    }

    fn mtime_ns(&self) -> i64 {
        epoch_nanos(self.mtime(), self.mtime_nsec())
    }
}

/// Attributes of one local entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalStat {
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Status-change time, nanoseconds since the epoch
    pub ctime_ns: i64,
    /// Modification time, nanoseconds since the epoch
    pub mtime_ns: i64,
}

impl LocalStat {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            size: metadata.size(),
            mode: metadata.mode(),
            uid: metadata.uid(),
            gid: metadata.gid(),
            ctime_ns: metadata.ctime_ns(),
            mtime_ns: metadata.mtime_ns(),
        }
    }

    /// stat() a path, following symlinks
    pub async fn read(path: &Path) -> io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        Ok(Self::from_metadata(&metadata))
    }

    pub fn entry_type(&self) -> EntryType {
        EntryType::from_mode(self.mode)
    }

    pub fn permissions(&self) -> Permissions {
        Permissions::from_mode(self.mode)
    }
}

fn epoch_nanos(secs: i64, nsec: i64) -> i64 {
    secs.saturating_mul(1_000_000_000).saturating_add(nsec)
}
