//! Fixed-width PETSCII fields.  Disk names, disk ids, and filenames are
//! stored right-padded with shifted spaces (0xA0).

use std::io;

use crate::disk::DiskError;

/// The shifted space used to pad fixed-width fields.
pub const PADDING_BYTE: u8 = 0xa0;

/// Pad `bytes` out to `width` bytes.  Fails if the input is wider than the
/// field, or if its last byte is the padding byte, since such a value cannot
/// be recovered by [`unpad`].
pub fn pad_bytes(bytes: &[u8], width: usize) -> io::Result<Vec<u8>> {
    if bytes.len() > width {
        return Err(DiskError::NameTooLong.into());
    }
    if bytes.last() == Some(&PADDING_BYTE) {
        return Err(DiskError::AmbiguousPadding.into());
    }
    let mut padded = Vec::with_capacity(width);
    padded.extend_from_slice(bytes);
    padded.resize(width, PADDING_BYTE);
    Ok(padded)
}

/// Pad a string out to `width` bytes.  Characters are stored one byte each,
/// so anything outside U+0000..U+00FF is rejected.
pub fn pad_string(string: &str, width: usize) -> io::Result<Vec<u8>> {
    pad_bytes(&encode(string)?, width)
}

/// Strip trailing padding bytes.
pub fn unpad(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|&b| b != PADDING_BYTE)
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

/// Strip trailing padding bytes and decode the remainder.
pub fn unpad_bytes(bytes: &[u8]) -> String {
    decode(unpad(bytes))
}

/// Map a string onto single bytes.
pub fn encode(string: &str) -> io::Result<Vec<u8>> {
    string
        .chars()
        .map(|c| u8::try_from(c).map_err(|_| io::Error::from(DiskError::InvalidCharacter)))
        .collect()
}

/// Map single bytes onto a string.
pub fn decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
