//! Structs and functions for reading and writing 1541 disk images.
//!
//! A `D64` owns the image bytes.  Everything on the disk (the BAM, directory
//! blocks, file blocks) is accessed through small views that borrow a block
//! from the image, so reading a structure never copies it.

mod allocator;
mod bam;
mod block;
mod d64;
mod error;
mod image;
mod validation;

pub mod chain;
pub mod directory;
pub mod fs;
pub mod geometry;

use std::fmt;

use crate::petscii;

pub use self::allocator::{Allocator, DirectoryTrackOnly, OutwardFromDirectory, TrackPolicy};
pub use self::bam::{Bam, BamEntry};
pub use self::block::{Location, LocationIterator, Position, BLOCK_SIZE};
pub use self::d64::D64;
pub use self::directory::{DirectoryBlock, DirectoryEntry, FileAttributes, FileType};
pub use self::error::DiskError;
pub use self::fs::DiskFs;
pub use self::validation::ValidationError;

/// The track holding the BAM and the directory.
pub const DIRECTORY_TRACK: u8 = 18;
pub const FIRST_DIRECTORY_SECTOR: u8 = 1;
pub const BAM_LOCATION: Location = Location(DIRECTORY_TRACK, 0);
/// The BAM only describes the first 35 tracks.
pub const LAST_BAM_TRACK: u8 = 35;

/// Sectors skipped between successive blocks of a file.
pub const FILE_INTERLEAVE: u8 = 10;
/// Sectors skipped between successive directory blocks.
pub const DIRECTORY_INTERLEAVE: u8 = 3;

const DRIVE_FORMAT: u8 = b'A';
const DOS_VERSION: [u8; 2] = *b"2A";
const DISK_NAME_SIZE: usize = 16;

/// The two-byte disk identifier written at format time.  It is usually shown
/// as two Petscii characters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Id([u8; 2]);

impl Id {
    pub fn from_bytes(bytes: &[u8]) -> Id {
        bytes.into()
    }
}

impl AsRef<[u8]> for Id {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl<'a> From<&'a [u8]> for Id {
    fn from(bytes: &[u8]) -> Id {
        // Best-effort only.  Use the first two bytes for the Id, using zeros
        // for any byte not present.
        Id([
            bytes.first().copied().unwrap_or(0),
            bytes.get(1).copied().unwrap_or(0),
        ])
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", petscii::decode(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id() {
        assert_eq!(Id::from_bytes(b"AB").as_ref(), b"AB");
        assert_eq!(Id::from_bytes(b"A").as_ref(), &[b'A', 0]);
        assert_eq!(Id::from_bytes(b"").as_ref(), &[0, 0]);
        assert_eq!(Id::from_bytes(b"XYZ").to_string(), "XY");
    }
}
