//! Multi-digest content hashing
//!
//! Computes MD5, SHA-1, SHA-256 and SHA-512 together in one sequential read
//! pass, so a file is read from storage exactly once no matter how many
//! digests the comparator or uploader end up needing.
//!
//! The digests are cryptographic because they are persisted as object
//! metadata and compared across runs and tools, unlike the fast
//! non-cryptographic checksums used for local duplicate detection.

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Read buffer size for the hashing pass (1 MiB)
pub const DIGEST_BUFFER_SIZE: usize = 1024 * 1024;

/// A digest algorithm recorded in object metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha512,
    Sha256,
    Sha1,
    Md5,
}

impl DigestAlgorithm {
    /// Strongest first: the order in which remote digests are consulted
    pub const PREFERENCE: [DigestAlgorithm; 4] = [
        DigestAlgorithm::Sha512,
        DigestAlgorithm::Sha256,
        DigestAlgorithm::Sha1,
        DigestAlgorithm::Md5,
    ];

    /// Object metadata key holding this digest
    pub fn metadata_key(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha512 => "sha512",
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha1 => "sha1",
            DigestAlgorithm::Md5 => "md5",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DigestAlgorithm::Sha512 => "SHA-512",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha1 => "SHA-1",
            DigestAlgorithm::Md5 => "MD5",
        };
        f.write_str(name)
    }
}

/// All four digests of one byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashBundle {
    pub md5: [u8; 16],
    pub sha1: [u8; 20],
    pub sha256: [u8; 32],
    pub sha512: [u8; 64],
}

impl HashBundle {
    /// Raw digest bytes for an algorithm
    pub fn digest(&self, algorithm: DigestAlgorithm) -> &[u8] {
        match algorithm {
            DigestAlgorithm::Sha512 => &self.sha512,
            DigestAlgorithm::Sha256 => &self.sha256,
            DigestAlgorithm::Sha1 => &self.sha1,
            DigestAlgorithm::Md5 => &self.md5,
        }
    }

    /// Lowercase hex encoding, as stored in object metadata
    pub fn hex(&self, algorithm: DigestAlgorithm) -> String {
        hex::encode(self.digest(algorithm))
    }
}

/// Incremental hasher feeding every algorithm from the same buffer
struct MultiHasher {
    md5: Md5,
    sha1: Sha1,
    sha256: Sha256,
    sha512: Sha512,
}

impl MultiHasher {
    fn new() -> Self {
        Self {
            md5: Md5::new(),
            sha1: Sha1::new(),
            sha256: Sha256::new(),
            sha512: Sha512::new(),
        }
    }

    fn update(&mut self, data: &[u8]) {
        self.md5.update(data);
        self.sha1.update(data);
        self.sha256.update(data);
        self.sha512.update(data);
    }

    fn finish(self) -> HashBundle {
        let mut bundle = HashBundle {
            md5: [0; 16],
            sha1: [0; 20],
            sha256: [0; 32],
            sha512: [0; 64],
        };
        bundle.md5.copy_from_slice(&self.md5.finalize());
        bundle.sha1.copy_from_slice(&self.sha1.finalize());
        bundle.sha256.copy_from_slice(&self.sha256.finalize());
        bundle.sha512.copy_from_slice(&self.sha512.finalize());
        bundle
    }
}

/// Hash a stream to EOF in fixed-size chunks
pub fn digest_reader<R: Read>(mut reader: R) -> io::Result<HashBundle> {
    let mut hasher = MultiHasher::new();
    let mut buffer = vec![0u8; DIGEST_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finish())
}

/// Hash a file on disk. Blocking: call from `spawn_blocking` in async code.
pub fn digest_file(path: &Path) -> io::Result<HashBundle> {
    let file = File::open(path)?;
    digest_reader(file)
}

/// Hash an in-memory buffer
pub fn digest_bytes(data: &[u8]) -> HashBundle {
    let mut hasher = MultiHasher::new();
    hasher.update(data);
    hasher.finish()
}
