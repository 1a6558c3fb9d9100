//! CBM DOS directories

use std::collections::HashSet;
use std::fmt;
use std::fmt::Write;
use std::io;

use crate::disk::block::{Location, Position, BLOCK_SIZE};
use crate::disk::{DiskError, D64};
use crate::petscii;

const FILE_TYPE_DEL: u8 = 0x00;
const FILE_TYPE_SEQ: u8 = 0x01;
const FILE_TYPE_PRG: u8 = 0x02;
const FILE_TYPE_USR: u8 = 0x03;
const FILE_TYPE_REL: u8 = 0x04;
const FILE_ATTRIB_FILE_TYPE_MASK: u8 = 0x0F;
const FILE_ATTRIB_UNUSED_MASK: u8 = 0x10;
const FILE_ATTRIB_SAVE_WITH_REPLACE_MASK: u8 = 0x20;
const FILE_ATTRIB_LOCKED_MASK: u8 = 0x40;
const FILE_ATTRIB_CLOSED_MASK: u8 = 0x80;

/// A free directory slot has an attribute byte of zero.
const SCRATCHED: u8 = 0x00;

/// A directory entry categorizes files as SEQ, PRG, USR, or REL, along with a
/// pseudo-file-type of DEL to indicate deleted files.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum FileType {
    DEL,
    SEQ,
    PRG,
    USR,
    REL,
    Unknown(u8),
}

impl FileType {
    /// Parse a file type name, ignoring case.
    pub fn from_string(string: &str) -> Option<FileType> {
        match string.to_uppercase().as_str() {
            "DEL" => Some(FileType::DEL),
            "SEQ" => Some(FileType::SEQ),
            "PRG" => Some(FileType::PRG),
            "USR" => Some(FileType::USR),
            "REL" => Some(FileType::REL),
            _ => None,
        }
    }

    /// The three-letter suffix used when exporting files, or `???` for an
    /// unrecognized type.
    pub fn extension(&self) -> &'static str {
        match self {
            FileType::DEL => "DEL",
            FileType::SEQ => "SEQ",
            FileType::PRG => "PRG",
            FileType::USR => "USR",
            FileType::REL => "REL",
            FileType::Unknown(_) => "???",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            FileType::DEL => "del",
            FileType::SEQ => "seq",
            FileType::PRG => "prg",
            FileType::USR => "usr",
            FileType::REL => "rel",
            FileType::Unknown(_) => "unk",
        })
    }
}

/// We introduce the term "file attributes" to refer to the full 8-bit
/// directory entry field which contains the file type along with several flags.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FileAttributes {
    /// Bits 0-3 indicate the file type.
    pub file_type: FileType,
    /// Bit 4 is unused, but we store it anyway so we can reproduce this field
    /// verbatim.
    pub unused_bit: bool,
    /// Bit 5 is the "save with replace" flag.
    pub save_with_replace_flag: bool,
    /// Bit 6 is the "locked" flag, indicated by a "<" in directory listings.
    pub locked_flag: bool,
    /// Bit 7 is the "closed" flag.  Files are normally closed, so this bit is
    /// normally set. Unclosed files are indicated in directory listings
    /// with a "*", leading to such files being known as "splat files".
    pub closed_flag: bool,
}

impl FileAttributes {
    /// Attributes of an ordinary closed file of the given type.
    pub fn closed(file_type: FileType) -> FileAttributes {
        FileAttributes {
            file_type,
            unused_bit: false,
            save_with_replace_flag: false,
            locked_flag: false,
            closed_flag: true,
        }
    }

    /// Parse a byte into a `FileAttributes` struct.
    pub fn from_byte(byte: u8) -> FileAttributes {
        let file_type = match byte & FILE_ATTRIB_FILE_TYPE_MASK {
            FILE_TYPE_DEL => FileType::DEL,
            FILE_TYPE_SEQ => FileType::SEQ,
            FILE_TYPE_PRG => FileType::PRG,
            FILE_TYPE_USR => FileType::USR,
            FILE_TYPE_REL => FileType::REL,
            b => FileType::Unknown(b),
        };
        FileAttributes {
            file_type,
            unused_bit: byte & FILE_ATTRIB_UNUSED_MASK != 0,
            save_with_replace_flag: byte & FILE_ATTRIB_SAVE_WITH_REPLACE_MASK != 0,
            locked_flag: byte & FILE_ATTRIB_LOCKED_MASK != 0,
            closed_flag: byte & FILE_ATTRIB_CLOSED_MASK != 0,
        }
    }

    /// Generate the byte which encodes this `FileAttributes` struct.
    pub fn to_byte(&self) -> u8 {
        let mut byte = match self.file_type {
            FileType::DEL => FILE_TYPE_DEL,
            FileType::SEQ => FILE_TYPE_SEQ,
            FileType::PRG => FILE_TYPE_PRG,
            FileType::USR => FILE_TYPE_USR,
            FileType::REL => FILE_TYPE_REL,
            FileType::Unknown(b) => b & FILE_ATTRIB_FILE_TYPE_MASK,
        };
        if self.unused_bit {
            byte |= FILE_ATTRIB_UNUSED_MASK;
        }
        if self.save_with_replace_flag {
            byte |= FILE_ATTRIB_SAVE_WITH_REPLACE_MASK;
        }
        if self.locked_flag {
            byte |= FILE_ATTRIB_LOCKED_MASK;
        }
        if self.closed_flag {
            byte |= FILE_ATTRIB_CLOSED_MASK;
        }
        byte
    }
}

impl fmt::Display for FileAttributes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            if self.closed_flag { ' ' } else { '*' },
            self.file_type,
            match (self.locked_flag, self.save_with_replace_flag) {
                (true, false) => "<",
                (false, true) => "@",
                (true, true) => "<@",
                (false, false) => " ",
            },
        )
    }
}

impl fmt::Debug for FileAttributes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // This is different from the Display impl in that there is no padding.
        if !self.closed_flag {
            f.write_char('*')?;
        }
        <FileType as fmt::Debug>::fmt(&self.file_type, f)?;
        f.write_str(match (self.locked_flag, self.save_with_replace_flag) {
            (true, false) => "<",
            (false, true) => "@",
            (true, true) => "<@",
            (false, false) => "",
        })
    }
}

pub const ENTRY_SIZE: usize = 32;
pub const ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / ENTRY_SIZE;
pub const FILENAME_LENGTH: usize = 16;
const ENTRY_FILE_ATTRIBUTE_OFFSET: usize = 0x02;
const ENTRY_FIRST_SECTOR_OFFSET: usize = 0x03;
const ENTRY_FILENAME_OFFSET: usize = 0x05;
const ENTRY_FILE_SIZE_OFFSET: usize = 0x1E;

/// The link stored in the last block of a directory chain.
const DIRECTORY_TERMINATOR: Location = Location(0, 0xFF);

/// A view of one 32-byte directory entry.  The first two bytes belong to the
/// enclosing block's chain link and are not touched here.
pub struct DirectoryEntry<B> {
    bytes: B,
}

impl<B: AsRef<[u8]>> DirectoryEntry<B> {
    pub fn new(bytes: B) -> DirectoryEntry<B> {
        assert_eq!(bytes.as_ref().len(), ENTRY_SIZE);
        DirectoryEntry { bytes }
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        self.bytes.as_ref()
    }

    #[inline]
    pub fn attribute_byte(&self) -> u8 {
        self.bytes()[ENTRY_FILE_ATTRIBUTE_OFFSET]
    }

    pub fn attributes(&self) -> FileAttributes {
        FileAttributes::from_byte(self.attribute_byte())
    }

    #[inline]
    pub fn file_type(&self) -> FileType {
        self.attributes().file_type
    }

    /// A scratched entry is a free slot.
    #[inline]
    pub fn is_scratched(&self) -> bool {
        self.attribute_byte() == SCRATCHED
    }

    pub fn first_location(&self) -> Location {
        Location::from_bytes(&self.bytes()[ENTRY_FIRST_SECTOR_OFFSET..])
    }

    /// The raw, padded filename.
    pub fn filename_bytes(&self) -> &[u8] {
        &self.bytes()[ENTRY_FILENAME_OFFSET..ENTRY_FILENAME_OFFSET + FILENAME_LENGTH]
    }

    pub fn filename(&self) -> String {
        petscii::unpad_bytes(self.filename_bytes())
    }

    /// The file size in blocks, as recorded in the entry.
    pub fn block_count(&self) -> u16 {
        let bytes = self.bytes();
        u16::from_le_bytes([bytes[ENTRY_FILE_SIZE_OFFSET], bytes[ENTRY_FILE_SIZE_OFFSET + 1]])
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> DirectoryEntry<B> {
    #[inline]
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.bytes.as_mut()
    }

    pub fn set_attributes(&mut self, attributes: &FileAttributes) {
        self.bytes_mut()[ENTRY_FILE_ATTRIBUTE_OFFSET] = attributes.to_byte();
    }

    /// Mark this entry as a closed file of the given type.
    pub fn set_file_type(&mut self, file_type: FileType) {
        self.set_attributes(&FileAttributes::closed(file_type));
    }

    /// Return this slot to the free pool.
    pub fn scratch(&mut self) {
        self.bytes_mut()[ENTRY_FILE_ATTRIBUTE_OFFSET] = SCRATCHED;
    }

    pub fn set_first_location(&mut self, location: Location) {
        location.write_bytes(&mut self.bytes_mut()[ENTRY_FIRST_SECTOR_OFFSET..]);
    }

    /// Store a filename, padded to the field width.
    pub fn set_filename(&mut self, filename: &str) -> io::Result<()> {
        let padded = petscii::pad_string(filename, FILENAME_LENGTH)?;
        self.bytes_mut()[ENTRY_FILENAME_OFFSET..ENTRY_FILENAME_OFFSET + FILENAME_LENGTH]
            .copy_from_slice(&padded);
        Ok(())
    }

    pub fn set_block_count(&mut self, blocks: u16) {
        self.bytes_mut()[ENTRY_FILE_SIZE_OFFSET..ENTRY_FILE_SIZE_OFFSET + 2]
            .copy_from_slice(&blocks.to_le_bytes());
    }

    /// Record a size given in bytes as a whole number of 256-byte blocks,
    /// rounding up.
    pub fn set_byte_len(&mut self, len: usize) {
        let blocks = (len + BLOCK_SIZE - 1) / BLOCK_SIZE;
        self.set_block_count(blocks.min(u16::MAX as usize) as u16);
    }

    /// Clear everything but the chain link bytes.
    pub fn clear(&mut self) {
        for b in self.bytes_mut()[ENTRY_FILE_ATTRIBUTE_OFFSET..].iter_mut() {
            *b = 0;
        }
    }
}

impl<B: AsRef<[u8]>> fmt::Display for DirectoryEntry<B> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:<4} {:18}{}",
            self.block_count(),
            format!("\"{}\"", self.filename()),
            self.attributes()
        )?;
        if f.alternate() {
            write!(f, " {}", self.first_location())?;
        }
        Ok(())
    }
}

impl<B: AsRef<[u8]>> fmt::Debug for DirectoryEntry<B> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "\"{}\",{},{:?} @ {}",
            self.filename(),
            self.block_count(),
            self.attributes(),
            self.first_location()
        )
    }
}

/// A view of one directory block: a chain link followed by eight entries.
/// Only the link of the first entry slot is meaningful.
pub struct DirectoryBlock<B> {
    block: B,
}

impl<B: AsRef<[u8]>> DirectoryBlock<B> {
    pub fn new(block: B) -> DirectoryBlock<B> {
        assert_eq!(block.as_ref().len(), BLOCK_SIZE);
        DirectoryBlock { block }
    }

    /// The next block in the directory chain, if any.
    pub fn next(&self) -> Option<Location> {
        let link = Location::from_bytes(self.block.as_ref());
        if link.is_null() {
            None
        } else {
            Some(link)
        }
    }

    pub fn entry(&self, index: usize) -> DirectoryEntry<&[u8]> {
        let offset = index * ENTRY_SIZE;
        DirectoryEntry::new(&self.block.as_ref()[offset..offset + ENTRY_SIZE])
    }

    pub fn entries(&self) -> impl Iterator<Item = DirectoryEntry<&[u8]>> {
        (0..ENTRIES_PER_BLOCK).map(move |i| self.entry(i))
    }

    /// Return the index of the first free slot in this block.
    pub fn next_available(&self) -> Option<usize> {
        self.entries().position(|e| e.is_scratched())
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> DirectoryBlock<B> {
    /// Empty the block and mark it as the end of the chain.
    pub fn init(&mut self) {
        for b in self.block.as_mut().iter_mut() {
            *b = 0;
        }
        self.set_next(DIRECTORY_TERMINATOR);
    }

    pub fn set_next(&mut self, location: Location) {
        location.write_bytes(self.block.as_mut());
    }

    pub fn entry_mut(&mut self, index: usize) -> DirectoryEntry<&mut [u8]> {
        let offset = index * ENTRY_SIZE;
        DirectoryEntry::new(&mut self.block.as_mut()[offset..offset + ENTRY_SIZE])
    }
}

/// Convert an entry index within a block into its position.
pub fn entry_position(location: Location, index: usize) -> Position {
    Position {
        location,
        offset: (index * ENTRY_SIZE) as u8,
        size: ENTRY_SIZE as u8,
    }
}

/// Iterate over the occupied entries of a disk's directory, in directory
/// order.
pub struct DirectoryIterator<'a> {
    disk: &'a D64,
    block: Option<(Location, &'a [u8])>,
    next_block: Option<Location>,
    index: usize,
    visited_blocks: HashSet<Location>,
}

impl<'a> DirectoryIterator<'a> {
    pub fn new(disk: &'a D64, start: Location) -> DirectoryIterator<'a> {
        DirectoryIterator {
            disk,
            block: None,
            next_block: Some(start),
            index: 0,
            visited_blocks: HashSet::new(),
        }
    }
}

impl<'a> Iterator for DirectoryIterator<'a> {
    type Item = io::Result<(Position, DirectoryEntry<&'a [u8]>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((location, block)) = self.block {
                while self.index < ENTRIES_PER_BLOCK {
                    let index = self.index;
                    self.index += 1;
                    let offset = index * ENTRY_SIZE;
                    let entry = DirectoryEntry::new(&block[offset..offset + ENTRY_SIZE]);
                    if !entry.is_scratched() {
                        return Some(Ok((entry_position(location, index), entry)));
                    }
                }
                self.block = None;
            }

            let location = self.next_block.take()?;
            // Loop detection.
            if !self.visited_blocks.insert(location) {
                return Some(Err(DiskError::ChainLoop.into()));
            }
            let block = match self.disk.block(location) {
                Ok(block) => block,
                Err(e) => return Some(Err(e)),
            };
            self.next_block = DirectoryBlock::new(block).next();
            self.block = Some((location, block));
            self.index = 0;
        }
    }
}
