//! Content analysis module for digests and Content-Type detection
//!
//! This module provides functions for:
//! - Computing MD5/SHA-1/SHA-256/SHA-512 in a single read pass
//! - Detecting Content-Type using magic bytes (MIME type detection)

pub mod checksum;
pub mod filetype;

pub use checksum::{digest_bytes, digest_file, digest_reader, DigestAlgorithm, HashBundle};
pub use filetype::{content_type_for_file, detect_file_type, sniff_content_type};
