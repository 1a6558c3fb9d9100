use std::collections::HashSet;
use std::fmt;
use std::io::{self, Write};
use std::path::Path;

use log::{debug, warn};

use crate::disk::bam::Bam;
use crate::disk::block::{Location, LocationIterator, Position};
use crate::disk::chain::{BlockShape, ChainIterator, ChainReader, ChainWriter, FileBlock};
use crate::disk::directory::{
    self, DirectoryBlock, DirectoryEntry, DirectoryIterator, FileAttributes, FileType,
};
use crate::disk::error::DiskError;
use crate::disk::geometry::{self, IMAGE_SIZE};
use crate::disk::image::Image;
use crate::disk::validation::{self, ValidationError};
use crate::disk::{Id, BAM_LOCATION, DIRECTORY_TRACK, FIRST_DIRECTORY_SECTOR};
use crate::petscii;
use crate::util;

/// A 35-track 1541 disk image in D64 format.  The image is held whole in
/// memory (or mapped read-only from a file); every structure on it is read
/// and written through views borrowed from this value.
pub struct D64 {
    image: Image,
}

impl D64 {
    fn from_image(image: Image) -> io::Result<D64> {
        if image.len() != IMAGE_SIZE {
            return Err(DiskError::InvalidLayout.into());
        }
        Ok(D64 { image })
    }

    /// Create a blank, unformatted in-memory image.
    pub fn open_memory() -> D64 {
        D64 {
            image: Image::open_memory(IMAGE_SIZE),
        }
    }

    /// Create a freshly formatted in-memory image.
    pub fn new(name: &str, id: &[u8]) -> io::Result<D64> {
        let mut d64 = D64::open_memory();
        d64.format(name, id)?;
        Ok(d64)
    }

    /// Load an image from a copy of its bytes.  The buffer must be exactly
    /// the size of a 35-track image.
    pub fn from_bytes(bytes: &[u8]) -> io::Result<D64> {
        if bytes.len() != IMAGE_SIZE {
            return Err(DiskError::InvalidLayout.into());
        }
        Self::from_image(Image::from_bytes(bytes))
    }

    /// Map an existing image file read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<D64> {
        Self::from_image(Image::open_read_only(path)?)
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_bytes()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.image.into_vec()
    }

    fn block_offset(location: Location) -> io::Result<usize> {
        let offset = location.offset()?;
        // The zone table describes tracks this image doesn't have.
        if location.0 > geometry::TRACKS {
            return Err(DiskError::InvalidAddress.into());
        }
        Ok(offset)
    }

    /// Borrow the 256 bytes of a block.
    pub fn block(&self, location: Location) -> io::Result<&[u8]> {
        let offset = Self::block_offset(location)?;
        Ok(self.image.slice(offset, crate::disk::BLOCK_SIZE))
    }

    pub fn block_mut(&mut self, location: Location) -> io::Result<&mut [u8]> {
        let offset = Self::block_offset(location)?;
        self.image.slice_mut(offset, crate::disk::BLOCK_SIZE)
    }

    pub fn bam(&self) -> io::Result<Bam<&[u8]>> {
        Ok(Bam::new(self.block(BAM_LOCATION)?))
    }

    pub fn bam_mut(&mut self) -> io::Result<Bam<&mut [u8]>> {
        Ok(Bam::new(self.block_mut(BAM_LOCATION)?))
    }

    pub fn disk_name(&self) -> io::Result<String> {
        Ok(self.bam()?.disk_name())
    }

    pub fn disk_id(&self) -> io::Result<Id> {
        Ok(self.bam()?.disk_id())
    }

    /// The first block of the directory, as recorded in the BAM.
    pub fn directory_location(&self) -> io::Result<Location> {
        Ok(self.bam()?.directory_location())
    }

    pub fn directory_root(&self) -> io::Result<DirectoryBlock<&[u8]>> {
        let location = self.directory_location()?;
        Ok(DirectoryBlock::new(self.block(location)?))
    }

    /// Write an empty filesystem: a fresh BAM with its own block and the
    /// first directory block marked used, and an empty directory.
    pub fn format(&mut self, name: &str, id: &[u8]) -> io::Result<()> {
        let directory = Location::new(DIRECTORY_TRACK, FIRST_DIRECTORY_SECTOR);
        {
            let mut bam = self.bam_mut()?;
            bam.init(name, id)?;
            bam.set_directory_location(directory);
            bam.alloc(BAM_LOCATION)?;
            bam.alloc(directory)?;
        }
        DirectoryBlock::new(self.block_mut(directory)?).init();
        debug!("formatted disk {:?} id {}", name, Id::from_bytes(id));
        Ok(())
    }

    /// Iterate over the occupied directory entries.
    pub fn directory(&self) -> io::Result<DirectoryIterator<'_>> {
        Ok(DirectoryIterator::new(self, self.directory_location()?))
    }

    /// Find a file by name.
    pub fn find(&self, name: &str) -> io::Result<(Position, DirectoryEntry<&[u8]>)> {
        let name = petscii::encode(name)?;
        for item in self.directory()? {
            let (position, entry) = item?;
            if petscii::unpad(entry.filename_bytes()) == &name[..] {
                return Ok((position, entry));
            }
        }
        Err(DiskError::NotFound.into())
    }

    pub fn entry_mut(&mut self, position: Position) -> io::Result<DirectoryEntry<&mut [u8]>> {
        let block = self.block_mut(position.location)?;
        Ok(DirectoryEntry::new(&mut block[position.range()]))
    }

    /// Return the first free directory slot, extending the directory chain
    /// with a new block from the directory track when every slot is taken.
    pub fn next_free_directory_entry(&mut self) -> io::Result<Position> {
        let mut location = self.directory_location()?;
        let mut visited_blocks = HashSet::new();
        loop {
            if !visited_blocks.insert(location) {
                return Err(DiskError::ChainLoop.into());
            }
            let block = DirectoryBlock::new(self.block(location)?);
            if let Some(index) = block.next_available() {
                return Ok(directory::entry_position(location, index));
            }
            match block.next() {
                Some(next) => location = next,
                None => break,
            }
        }

        let new_location = {
            let mut bam = self.bam_mut()?;
            let mut allocator = bam.new_directory_allocator();
            allocator.alloc(&mut bam).map_err(|e| {
                if DiskError::from_io_error(&e) == Some(DiskError::DiskFull) {
                    DiskError::DirectoryFull.into()
                } else {
                    e
                }
            })?
        };
        DirectoryBlock::new(self.block_mut(new_location)?).init();
        DirectoryBlock::new(self.block_mut(location)?).set_next(new_location);
        debug!("extended directory {} -> {}", location, new_location);
        Ok(directory::entry_position(new_location, 0))
    }

    /// View the first block of a file in the shape its type calls for.
    pub fn file_block<B: AsRef<[u8]>>(
        &self,
        entry: &DirectoryEntry<B>,
    ) -> io::Result<FileBlock<&[u8]>> {
        let shape = BlockShape::for_file_type(entry.file_type())?;
        Ok(FileBlock::new(shape, self.block(entry.first_location())?))
    }

    pub fn chain<B: AsRef<[u8]>>(&self, entry: &DirectoryEntry<B>) -> io::Result<ChainIterator<'_>> {
        let shape = BlockShape::for_file_type(entry.file_type())?;
        Ok(ChainIterator::new(self, entry.first_location(), shape))
    }

    pub fn reader<B: AsRef<[u8]>>(&self, entry: &DirectoryEntry<B>) -> io::Result<ChainReader<'_>> {
        let shape = BlockShape::for_file_type(entry.file_type())?;
        Ok(ChainReader::new(self, entry.first_location(), shape))
    }

    /// Read a whole file.  Programs begin with their load address.
    pub fn read_file(&self, name: &str) -> io::Result<Vec<u8>> {
        let (_, entry) = self.find(name)?;
        let mut bytes = vec![];
        io::Read::read_to_end(&mut self.reader(&entry)?, &mut bytes)?;
        Ok(bytes)
    }

    /// Create a file holding `data`.  Program data must begin with its
    /// two-byte load address.  Returns the position of the new directory
    /// entry.
    pub fn write_file(&mut self, name: &str, file_type: FileType, data: &[u8]) -> io::Result<Position> {
        self.image.check_writability()?;
        petscii::pad_string(name, directory::FILENAME_LENGTH)?;
        let shape = BlockShape::for_file_type(file_type)?;
        if shape == BlockShape::Program && data.len() < 2 {
            return Err(DiskError::ShortProgram.into());
        }
        match self.find(name) {
            Ok(_) => return Err(DiskError::FileExists.into()),
            Err(ref e) if DiskError::from_io_error(e) == Some(DiskError::NotFound) => {}
            Err(e) => return Err(e),
        }

        let position = self.next_free_directory_entry()?;
        let mut allocator = self.bam()?.new_allocator();
        let first = allocator.alloc(&mut self.bam_mut()?)?;
        {
            let mut entry = self.entry_mut(position)?;
            entry.clear();
            entry.set_filename(name)?;
            entry.set_first_location(first);
            entry.set_byte_len(data.len());
            // Left unclosed until the whole chain is on disk.
            entry.set_attributes(&FileAttributes {
                closed_flag: false,
                ..FileAttributes::closed(file_type)
            });
        }

        let written = {
            let mut writer = ChainWriter::new(self, &mut allocator);
            match shape {
                BlockShape::Program => writer.write_program(first, [data[0], data[1]], &data[2..]),
                BlockShape::Raw => writer.write_sequential(first, data),
            }
        };
        let blocks = match written {
            Ok(blocks) => blocks,
            Err(e) => {
                // Record what actually made it onto the disk.
                let blocks = {
                    let block = self.block(position.location)?;
                    let entry = DirectoryEntry::new(&block[position.range()]);
                    self.chain(&entry)?.locations()?.len()
                };
                let mut entry = self.entry_mut(position)?;
                entry.set_block_count(blocks as u16);
                // An unclosed DEL has no attribute bits and would read as a free slot.
                if entry.is_scratched() {
                    entry.set_file_type(file_type);
                }
                warn!("{:?} left unclosed after {} blocks: {}", name, blocks, e);
                return Err(e);
            }
        };
        {
            let mut entry = self.entry_mut(position)?;
            entry.set_block_count(blocks as u16);
            entry.set_file_type(file_type);
        }
        debug!(
            "wrote {:?} ({} bytes, {} blocks) starting at {}",
            name,
            data.len(),
            blocks,
            first
        );
        Ok(position)
    }

    /// Scratch a file: free every block of its chain and release its
    /// directory slot.
    pub fn delete_file(&mut self, name: &str) -> io::Result<()> {
        self.image.check_writability()?;
        let (position, locations) = {
            let (position, entry) = self.find(name)?;
            (position, self.chain(&entry)?.locations()?)
        };
        {
            let mut bam = self.bam_mut()?;
            for location in &locations {
                bam.free(*location)?;
            }
        }
        self.entry_mut(position)?.scratch();
        debug!("scratched {:?}, freed {} blocks", name, locations.len());
        Ok(())
    }

    /// Check the image for inconsistencies.
    pub fn validate(&self) -> io::Result<Vec<ValidationError>> {
        validation::validate(self)
    }

    /// Write a hex dump of every block.
    pub fn dump(&self, writer: &mut dyn Write) -> io::Result<()> {
        for location in LocationIterator::new() {
            self.dump_block(writer, location)?;
        }
        Ok(())
    }

    pub fn dump_block(&self, writer: &mut dyn Write, location: Location) -> io::Result<()> {
        writeln!(writer)?;
        writeln!(writer, "track {:02} sector {:02}", location.0, location.1)?;
        writeln!(writer, "{}", util::hex(self.block(location)?))?;
        Ok(())
    }
}

/// The header line of a directory listing.
impl fmt::Display for D64 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let bam = self.bam().map_err(|_| fmt::Error)?;
        write!(
            f,
            "0 \"{:<16}\" {} {}",
            bam.disk_name(),
            bam.disk_id(),
            petscii::decode(&bam.dos_version())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::chain::{C64_LOAD_ADDRESS, DATA_SIZE};
    use crate::disk::directory::ENTRIES_PER_BLOCK;
    use crate::disk::BLOCK_SIZE;

    fn program(len: usize) -> Vec<u8> {
        let mut bytes = C64_LOAD_ADDRESS.to_vec();
        bytes.extend((0..len).map(|i| i as u8));
        bytes
    }

    #[test]
    fn test_format() {
        let disk = D64::new("TESTNAME", b"\x01\x02").unwrap();
        let bytes = disk.as_bytes();
        assert_eq!(bytes.len(), 174_848);
        let bam_offset = 0x16500;
        assert_eq!(&bytes[bam_offset..bam_offset + 4], &[18, 1, b'A', 0]);
        assert_eq!(&bytes[bam_offset + 0x90..bam_offset + 0x98], b"TESTNAME");
        assert_eq!(&bytes[bam_offset + 0xA2..bam_offset + 0xA7], &[0x01, 0x02, 0xA0, b'2', b'A']);

        let bam = disk.bam().unwrap();
        for track in 1..=35 {
            let sectors = geometry::sectors_per_track(track).unwrap();
            let expected = if track == DIRECTORY_TRACK { sectors - 2 } else { sectors };
            assert_eq!(bam.entry(track).unwrap().free_sectors, expected);
        }
        assert!(!bam.available(Location(18, 0)).unwrap());
        assert!(!bam.available(Location(18, 1)).unwrap());

        let root = disk.directory_root().unwrap();
        assert_eq!(root.next(), None);
        assert_eq!(&disk.block(Location(18, 1)).unwrap()[..2], &[0, 0xFF]);
        assert_eq!(disk.directory().unwrap().count(), 0);
        assert_eq!(disk.disk_name().unwrap(), "TESTNAME");
        assert_eq!(disk.to_string(), "0 \"TESTNAME        \" \u{1}\u{2} 2A");
    }

    #[test]
    fn test_format_rejects_bad_arguments() {
        let mut disk = D64::open_memory();
        let e = disk.format("SEVENTEEN LETTERS", b"01").unwrap_err();
        assert_eq!(e, DiskError::NameTooLong);
        let e = disk.format("OK", b"012").unwrap_err();
        assert_eq!(e, DiskError::InvalidId);
    }

    #[test]
    fn test_from_bytes() {
        let disk = D64::new("ROUND TRIP", b"RT").unwrap();
        let copy = D64::from_bytes(disk.as_bytes()).unwrap();
        assert_eq!(copy.disk_name().unwrap(), "ROUND TRIP");
        let e = D64::from_bytes(&vec![0u8; IMAGE_SIZE - 1]).err().unwrap();
        assert_eq!(e, DiskError::InvalidLayout);
        let e = D64::from_bytes(&vec![0u8; IMAGE_SIZE + 256]).err().unwrap();
        assert_eq!(e, DiskError::InvalidLayout);
        assert_eq!(disk.into_bytes().len(), IMAGE_SIZE);
    }

    #[test]
    fn test_block_addressing() {
        let disk = D64::open_memory();
        assert_eq!(disk.block(Location(1, 0)).unwrap().len(), BLOCK_SIZE);
        assert_eq!(disk.block(Location(35, 16)).unwrap().len(), BLOCK_SIZE);
        for location in &[Location(0, 0), Location(36, 0), Location(40, 0), Location(1, 21)] {
            assert_eq!(disk.block(*location).unwrap_err(), DiskError::InvalidAddress);
        }
    }

    #[test]
    fn test_write_and_read_files() {
        let mut disk = D64::new("FILES", b"01").unwrap();
        let prg = program(1000);
        let seq = (0..300).map(|i| (i % 251) as u8).collect::<Vec<_>>();
        disk.write_file("GAME", FileType::PRG, &prg).unwrap();
        disk.write_file("NOTES", FileType::SEQ, &seq).unwrap();
        disk.write_file("EMPTY", FileType::SEQ, &[]).unwrap();

        assert_eq!(disk.read_file("GAME").unwrap(), prg);
        assert_eq!(disk.read_file("NOTES").unwrap(), seq);
        assert_eq!(disk.read_file("EMPTY").unwrap(), Vec::<u8>::new());

        let (position, entry) = disk.find("GAME").unwrap();
        assert_eq!(position.location, Location(18, 1));
        assert_eq!(position.offset, 0);
        assert_eq!(entry.file_type(), FileType::PRG);
        assert_eq!(entry.first_location(), Location(19, 0));
        assert_eq!(entry.block_count() as usize, (prg.len() + DATA_SIZE - 1) / DATA_SIZE);
        match disk.file_block(&entry).unwrap() {
            FileBlock::Program(block) => assert_eq!(block.load_address(), C64_LOAD_ADDRESS),
            FileBlock::Raw(_) => panic!("expected a program block"),
        }

        let names = disk
            .directory()
            .unwrap()
            .map(|r| r.unwrap().1.filename())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["GAME", "NOTES", "EMPTY"]);
        assert_eq!(disk.validate().unwrap(), vec![]);
    }

    #[test]
    fn test_write_file_errors() {
        let mut disk = D64::new("ERRORS", b"01").unwrap();
        disk.write_file("ONCE", FileType::SEQ, b"data").unwrap();
        let e = disk.write_file("ONCE", FileType::SEQ, b"again").unwrap_err();
        assert_eq!(e, DiskError::FileExists);
        let e = disk.write_file("SHORT", FileType::PRG, &[0x01]).unwrap_err();
        assert_eq!(e, DiskError::ShortProgram);
        let e = disk.write_file("USER", FileType::USR, b"data").unwrap_err();
        assert_eq!(e, DiskError::UnsupportedFormat);
        let e = disk.write_file("A NAME TOO LONG!!", FileType::SEQ, b"").unwrap_err();
        assert_eq!(e, DiskError::NameTooLong);
        let e = disk.read_file("MISSING").unwrap_err();
        assert_eq!(e, DiskError::NotFound);
        assert_eq!(e.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_names_outside_latin1() {
        let mut disk = D64::new("LATIN1", b"01").unwrap();
        disk.write_file("?", FileType::SEQ, b"question").unwrap();
        let e = disk.find("\u{3a9}").unwrap_err();
        assert_eq!(e, DiskError::InvalidCharacter);
        assert_eq!(e.kind(), io::ErrorKind::InvalidInput);
        let e = disk.write_file("\u{3a9}", FileType::SEQ, b"omega").unwrap_err();
        assert_eq!(e, DiskError::InvalidCharacter);
        assert_eq!(disk.read_file("?").unwrap(), b"question");
        assert!(D64::new("\u{263a}", b"01").is_err());
    }

    #[test]
    fn test_directory_grows_then_fills() {
        let mut disk = D64::new("MANY", b"01").unwrap();
        let mut blocks = vec![Location(18, 1)];
        // 18 of the directory track's 19 blocks can hold entries.
        let capacity = 18 * ENTRIES_PER_BLOCK;
        for i in 0..capacity {
            let position = disk.write_file(&format!("FILE{}", i), FileType::SEQ, &[i as u8]).unwrap();
            if *blocks.last().unwrap() != position.location {
                assert_eq!(position.location.0, DIRECTORY_TRACK);
                assert_eq!(position.offset, 0);
                blocks.push(position.location);
            }
        }
        assert_eq!(blocks.len(), 18);
        assert_eq!(&blocks[..3], &[Location(18, 1), Location(18, 4), Location(18, 7)]);

        let e = disk.write_file("ONE MORE", FileType::SEQ, b"x").unwrap_err();
        assert_eq!(e, DiskError::DirectoryFull);

        // Scratching a file frees its slot for reuse.
        disk.delete_file("FILE0").unwrap();
        let position = disk.write_file("ONE MORE", FileType::SEQ, b"x").unwrap();
        assert_eq!(position.location, Location(18, 1));
        assert_eq!(position.offset, 0);
    }

    #[test]
    fn test_delete_frees_blocks() {
        let mut disk = D64::new("DELETE", b"01").unwrap();
        let free_before = disk.bam().unwrap().blocks_free();
        disk.write_file("BIG", FileType::PRG, &program(5000)).unwrap();
        let used = free_before - disk.bam().unwrap().blocks_free();
        assert_eq!(used, (5002 + DATA_SIZE - 1) / DATA_SIZE);
        disk.delete_file("BIG").unwrap();
        assert_eq!(disk.bam().unwrap().blocks_free(), free_before);
        assert_eq!(disk.find("BIG").unwrap_err(), DiskError::NotFound);
        assert_eq!(disk.delete_file("BIG").unwrap_err(), DiskError::NotFound);
    }

    #[test]
    fn test_disk_full() {
        let mut disk = D64::new("FULL", b"01").unwrap();
        let capacity = disk.bam().unwrap().blocks_free();
        let e = disk
            .write_file("TOO BIG", FileType::SEQ, &vec![0x55; (capacity + 1) * DATA_SIZE])
            .unwrap_err();
        assert_eq!(e, DiskError::DiskFull);
        // Nothing is rolled back.
        assert_eq!(disk.bam().unwrap().blocks_free(), 0);

        // The partial file is listed as unclosed and holds exactly the data
        // that fit, with no stale bytes from earlier files.
        let (_, entry) = disk.find("TOO BIG").unwrap();
        assert!(!entry.attributes().closed_flag);
        assert_eq!(entry.file_type(), FileType::SEQ);
        assert_eq!(entry.block_count() as usize, capacity);
        assert!(entry.to_string().contains("*seq"));
        assert_eq!(disk.read_file("TOO BIG").unwrap(), vec![0x55; capacity * DATA_SIZE]);
        assert_eq!(disk.validate().unwrap(), vec![]);

        disk.delete_file("TOO BIG").unwrap();
        assert_eq!(disk.bam().unwrap().blocks_free(), capacity);
    }

    #[test]
    fn test_disk_full_after_delete() {
        let mut disk = D64::new("FULL", b"01").unwrap();
        let capacity = disk.bam().unwrap().blocks_free();
        disk.write_file("OLD", FileType::SEQ, &vec![0xAA; capacity * DATA_SIZE])
            .unwrap();
        disk.delete_file("OLD").unwrap();

        let e = disk
            .write_file("NEW", FileType::PRG, &vec![0x11; capacity * DATA_SIZE + 10])
            .unwrap_err();
        assert_eq!(e, DiskError::DiskFull);
        let (_, entry) = disk.find("NEW").unwrap();
        assert!(!entry.attributes().closed_flag);
        let content = disk.read_file("NEW").unwrap();
        assert_eq!(content.len(), capacity * DATA_SIZE);
        assert!(content.iter().all(|&b| b == 0x11));
        assert_eq!(disk.validate().unwrap(), vec![]);

        disk.delete_file("NEW").unwrap();
        let e = disk
            .write_file("GONE", FileType::DEL, &vec![0x22; (capacity + 1) * DATA_SIZE])
            .unwrap_err();
        assert_eq!(e, DiskError::DiskFull);
        let (_, entry) = disk.find("GONE").unwrap();
        assert_eq!(entry.file_type(), FileType::DEL);
        assert_eq!(entry.block_count() as usize, capacity);
        assert_eq!(disk.validate().unwrap(), vec![]);
    }

    #[test]
    fn test_dump_block() {
        let disk = D64::new("DUMP", b"01").unwrap();
        let mut out = vec![];
        disk.dump_block(&mut out, Location(18, 1)).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("\ntrack 18 sector 01\n0000: 00 ff 00 00"));
    }
}
