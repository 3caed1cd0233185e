//! Content-Type detection using magic bytes
//!
//! Uses the `infer` crate to detect file types from magic bytes (file headers).
//! Falls back to a plain-text check when no signature matches, and finally to
//! a generic binary type. Extensions are never consulted.
//!
//! Only the first [`SNIFF_LEN`] bytes of a file are read.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Content type used for unrecognised binary data and directory markers
pub const GENERIC_BINARY: &str = "application/octet-stream";

/// Content type used for recognisable text
pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Number of header bytes inspected
pub const SNIFF_LEN: usize = 8192;

/// Detect the MIME type of a file from its header bytes
///
/// Returns the detected MIME type as a string, or None if the type is unknown.
///
/// # Example
///
/// ```
/// use s3_tree_sync::content::filetype::detect_file_type;
///
/// // PNG file magic bytes
/// let png_header = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
/// assert_eq!(detect_file_type(png_header), Some("image/png".to_string()));
///
/// // Unknown content
/// let unknown = &[0x00, 0x01, 0x02, 0x03];
/// assert_eq!(detect_file_type(unknown), None);
/// ```
pub fn detect_file_type(header: &[u8]) -> Option<String> {
    infer::get(header).map(|kind| kind.mime_type().to_string())
}

/// Choose a Content-Type for a header buffer
///
/// Magic-byte match first, then UTF-8 text without NUL bytes, otherwise
/// [`GENERIC_BINARY`]. An empty header counts as text.
pub fn sniff_content_type(header: &[u8]) -> String {
    if let Some(mime) = detect_file_type(header) {
        return mime;
    }

    if looks_like_text(header) {
        TEXT_PLAIN.to_string()
    } else {
        GENERIC_BINARY.to_string()
    }
}

fn looks_like_text(header: &[u8]) -> bool {
    if header.contains(&0) {
        return false;
    }

    match std::str::from_utf8(header) {
        Ok(_) => true,
        // A multi-byte sequence cut off by the sniff window is still text
        Err(e) => e.error_len().is_none() && header.len() - e.valid_up_to() < 4,
    }
}

/// Read up to [`SNIFF_LEN`] bytes of a file and pick its Content-Type.
/// Blocking: call from `spawn_blocking` in async code.
pub fn content_type_for_file(path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    let mut header = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64).read_to_end(&mut header)?;
    Ok(sniff_content_type(&header))
}
