//! This is a Rust library for reading and writing Commodore 1541 floppy disk
//! images in the "D64" format: 35 tracks, 683 blocks of 256 bytes each, laid
//! out exactly as the drive wrote them.
//!
//! Features:
//!
//! * Track/sector addressing across the 1541's four speed zones.
//! * Format disk images, and read and write the Block Availability Map (BAM).
//! * Emulate the 1541 DOS's "next available track and sector" algorithm when
//! laying out files and growing the directory.
//! * Iterate directory entries.
//! * Read, write, and delete program (PRG) and sequential (SEQ) files.
//! * Validate the consistency of disk images.
//! * Expose a disk as a small read-only filesystem, for extraction tools.
//! * A sample `d64tool` program for creating, listing, and extracting images.
//!
//! Current shortcomings:
//!
//! * Relative (REL) and user (USR) files are listed but can't be read.
//! * 40-track images and images with error tables are not accepted.
//!
//! # Example
//!
//! The following example formats an in-memory disk, writes a program to it,
//! and prints a directory listing:
//!
//! ```
//! use std::io;
//! use d64::disk::{FileType, D64};
//! # fn main() -> io::Result<()> {
//!
//! let mut disk = D64::new("MY DISK", b"01")?;
//!
//! // A program file starts with its two-byte load address.
//! disk.write_file("HELLO", FileType::PRG, &[0x01, 0x08, 0x60])?;
//!
//! println!("{}", disk);
//! for item in disk.directory()? {
//!     let (_, entry) = item?;
//!     println!("{}", entry);
//! }
//! println!("{} blocks free.", disk.bam()?.blocks_free());
//! assert_eq!(disk.read_file("HELLO")?, vec![0x01, 0x08, 0x60]);
//! # Ok(())
//! # }
//! ```
//!
//! ```text
//! 0 "MY DISK         " 01 2A
//! 1    "HELLO"           prg
//! 663 blocks free.
//! ```
//!
//! # Design of disk image access
//!
//! The whole image lives in one buffer, owned by `D64`.  Each on-disk
//! structure is a thin view over a 256-byte block borrowed from that buffer:
//!
//! 1. `Bam` interprets the header block at 18/0.
//! 2. `DirectoryBlock` and `DirectoryEntry` interpret the directory chain.
//! 3. `RawBlock` and `ProgramBlock` interpret file data blocks.
//!
//! Views are generic over their backing (`&[u8]` for reading, `&mut [u8]`
//! for writing), so the borrow checker keeps a reader from observing a
//! half-written block.  Allocation is done by an `Allocator`, which is
//! handed the BAM on every call rather than holding on to it.
//!
//! # License
//!
//! D64 is distributed under the terms of both the MIT license and the
//! Apache License (Version 2.0).

pub mod disk;
pub mod petscii;

mod util;
