//! File data is stored as a singly linked chain of blocks.  The first two
//! bytes of every block link to the next one; in the last block the link
//! track is zero and the link sector holds the number of data bytes used.

use std::collections::HashSet;
use std::io;

use log::{trace, warn};

use crate::disk::allocator::{Allocator, TrackPolicy};
use crate::disk::block::{Location, BLOCK_SIZE};
use crate::disk::directory::FileType;
use crate::disk::error::DiskError;
use crate::disk::D64;

/// Data bytes in a chained block, after the link.
pub const DATA_SIZE: usize = BLOCK_SIZE - 2;
/// Data bytes in the first block of a program, after the load address.
pub const PROGRAM_DATA_SIZE: usize = DATA_SIZE - 2;
/// The customary load address of a C64 BASIC program, $0801.
pub const C64_LOAD_ADDRESS: [u8; 2] = [0x01, 0x08];

const DATA_OFFSET: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainLink {
    Next(Location),
    Tail(usize), // used data bytes
}

impl ChainLink {
    /// Decode a block's link.  A byte count larger than the data area is
    /// clamped to it.
    #[inline]
    pub fn new(block: &[u8]) -> ChainLink {
        if block[0] == 0x00 {
            ChainLink::Tail((block[1] as usize).min(DATA_SIZE))
        } else {
            ChainLink::Next(Location::new(block[0], block[1]))
        }
    }

    #[inline]
    pub fn to_bytes(&self, bytes: &mut [u8]) {
        assert!(bytes.len() >= 2);
        match self {
            ChainLink::Next(location) => location.write_bytes(bytes),
            ChainLink::Tail(size) => {
                assert!(*size <= DATA_SIZE);
                bytes[0] = 0x00;
                bytes[1] = *size as u8;
            }
        }
    }
}

/// Which on-disk shape the first block of a file takes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockShape {
    /// Link, load address, then data.
    Program,
    /// Link, then data.
    Raw,
}

impl BlockShape {
    /// DEL and SEQ files are raw chains, PRG files start with a program
    /// block.  USR and REL files, and unrecognized types, are not supported.
    pub fn for_file_type(file_type: FileType) -> io::Result<BlockShape> {
        match file_type {
            FileType::DEL | FileType::SEQ => Ok(BlockShape::Raw),
            FileType::PRG => Ok(BlockShape::Program),
            FileType::USR | FileType::REL | FileType::Unknown(_) => {
                Err(DiskError::UnsupportedFormat.into())
            }
        }
    }
}

/// A view of a block holding a link and up to 254 data bytes.
pub struct RawBlock<B> {
    block: B,
}

impl<B: AsRef<[u8]>> RawBlock<B> {
    pub fn new(block: B) -> RawBlock<B> {
        assert_eq!(block.as_ref().len(), BLOCK_SIZE);
        RawBlock { block }
    }

    #[inline]
    pub fn link(&self) -> ChainLink {
        ChainLink::new(self.block.as_ref())
    }

    pub fn next(&self) -> Option<Location> {
        match self.link() {
            ChainLink::Next(location) => Some(location),
            ChainLink::Tail(_) => None,
        }
    }

    /// Data bytes held by this block.
    pub fn len(&self) -> usize {
        match self.link() {
            ChainLink::Next(_) => DATA_SIZE,
            ChainLink::Tail(size) => size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The data held by this block, trimmed on the last block.
    pub fn bytes(&self) -> &[u8] {
        &self.block.as_ref()[DATA_OFFSET..DATA_OFFSET + self.len()]
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> RawBlock<B> {
    pub fn set_next(&mut self, location: Location) {
        ChainLink::Next(location).to_bytes(self.block.as_mut());
    }

    /// Fill the data area, zeroing whatever `data` doesn't cover.  The link
    /// is left alone.
    pub fn write_data(&mut self, data: &[u8]) -> io::Result<()> {
        if data.len() > DATA_SIZE {
            return Err(DiskError::CapacityExceeded.into());
        }
        let area = &mut self.block.as_mut()[DATA_OFFSET..];
        area[..data.len()].copy_from_slice(data);
        for b in area[data.len()..].iter_mut() {
            *b = 0;
        }
        Ok(())
    }

    /// Make this the last block of its chain, holding exactly `end`.
    pub fn truncate(&mut self, end: &[u8]) -> io::Result<()> {
        self.write_data(end)?;
        ChainLink::Tail(end.len()).to_bytes(self.block.as_mut());
        Ok(())
    }
}

/// A view of the first block of a program file.  The load address occupies
/// the first two data bytes, and counts toward the block's length: a program
/// read back as a flat file starts with its load address.
pub struct ProgramBlock<B> {
    raw: RawBlock<B>,
}

impl<B: AsRef<[u8]>> ProgramBlock<B> {
    pub fn new(block: B) -> ProgramBlock<B> {
        ProgramBlock {
            raw: RawBlock::new(block),
        }
    }

    pub fn load_address(&self) -> [u8; 2] {
        let bytes = self.raw.block.as_ref();
        [bytes[DATA_OFFSET], bytes[DATA_OFFSET + 1]]
    }

    #[inline]
    pub fn next(&self) -> Option<Location> {
        self.raw.next()
    }

    /// Data bytes held by this block, including the load address.
    #[inline]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The load address followed by the program data.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        self.raw.bytes()
    }

    /// The program data following the load address.
    pub fn payload(&self) -> &[u8] {
        let bytes = self.bytes();
        &bytes[bytes.len().min(2)..]
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> ProgramBlock<B> {
    pub fn set_load_address(&mut self, address: [u8; 2]) {
        self.raw.block.as_mut()[DATA_OFFSET..DATA_OFFSET + 2].copy_from_slice(&address);
    }

    pub fn set_next(&mut self, location: Location) {
        self.raw.set_next(location);
    }

    fn write_payload(&mut self, payload: &[u8]) -> io::Result<()> {
        if payload.len() > PROGRAM_DATA_SIZE {
            return Err(DiskError::CapacityExceeded.into());
        }
        let load_address = self.load_address();
        let mut data = Vec::with_capacity(2 + payload.len());
        data.extend_from_slice(&load_address);
        data.extend_from_slice(payload);
        self.raw.write_data(&data)
    }

    /// Make this a single-block program holding exactly `payload` after the
    /// load address.
    pub fn truncate(&mut self, payload: &[u8]) -> io::Result<()> {
        self.write_payload(payload)?;
        ChainLink::Tail(2 + payload.len()).to_bytes(self.raw.block.as_mut());
        Ok(())
    }
}

/// One block of a file chain, in whichever shape it takes.
pub enum FileBlock<B> {
    Program(ProgramBlock<B>),
    Raw(RawBlock<B>),
}

impl<B: AsRef<[u8]>> FileBlock<B> {
    pub fn new(shape: BlockShape, block: B) -> FileBlock<B> {
        match shape {
            BlockShape::Program => FileBlock::Program(ProgramBlock::new(block)),
            BlockShape::Raw => FileBlock::Raw(RawBlock::new(block)),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            FileBlock::Program(block) => block.bytes(),
            FileBlock::Raw(block) => block.bytes(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            FileBlock::Program(block) => block.len(),
            FileBlock::Raw(block) => block.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn next(&self) -> Option<Location> {
        match self {
            FileBlock::Program(block) => block.next(),
            FileBlock::Raw(block) => block.next(),
        }
    }
}

/// A ChainBlock is the result of a chain iteration, and provides the block
/// view and the location from which it was read.
pub struct ChainBlock<'a> {
    pub location: Location,
    pub block: FileBlock<&'a [u8]>,
}

/// Walk a file chain.  The first block takes the given shape; every later
/// block is raw.
pub struct ChainIterator<'a> {
    disk: &'a D64,
    shape: BlockShape,
    next_block: Option<Location>,
    visited_blocks: HashSet<Location>,
}

impl<'a> ChainIterator<'a> {
    /// Create a new chain iterator starting at the specified location.
    pub fn new(disk: &'a D64, start: Location, shape: BlockShape) -> ChainIterator<'a> {
        ChainIterator {
            disk,
            shape,
            next_block: Some(start),
            visited_blocks: HashSet::new(),
        }
    }

    /// Read the entire chain and return a list of locations.
    pub fn locations(self) -> io::Result<Vec<Location>> {
        self.map(|r| r.map(|cb| cb.location)).collect()
    }

    /// Read the entire chain and return the number of data bytes it holds.
    pub fn byte_len(self) -> io::Result<usize> {
        self.map(|r| r.map(|cb| cb.block.len())).sum()
    }
}

impl<'a> Iterator for ChainIterator<'a> {
    type Item = io::Result<ChainBlock<'a>>;

    fn next(&mut self) -> Option<io::Result<ChainBlock<'a>>> {
        let location = self.next_block.take()?;

        // Loop detection.
        if !self.visited_blocks.insert(location) {
            return Some(Err(DiskError::ChainLoop.into()));
        }

        let bytes = match self.disk.block(location) {
            Ok(bytes) => bytes,
            Err(e) => return Some(Err(e)),
        };
        if bytes[0] == 0x00 && bytes[1] as usize > DATA_SIZE {
            warn!(
                "last block {} claims {} data bytes; using {}",
                location, bytes[1], DATA_SIZE
            );
        }
        let block = FileBlock::new(self.shape, bytes);
        self.shape = BlockShape::Raw;
        self.next_block = block.next();
        Some(Ok(ChainBlock { location, block }))
    }
}

/// ChainReader objects implement the Read trait and are used to read a byte
/// stream represented as a series of chained blocks on the disk image.
pub struct ChainReader<'a> {
    chain: ChainIterator<'a>,
    data: &'a [u8],
    eof: bool,
}

impl<'a> ChainReader<'a> {
    pub fn new(disk: &'a D64, start: Location, shape: BlockShape) -> ChainReader<'a> {
        ChainReader {
            chain: ChainIterator::new(disk, start, shape),
            data: &[],
            eof: false,
        }
    }
}

impl<'a> io::Read for ChainReader<'a> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut total_nbytes = 0;
        while total_nbytes < buf.len() && !self.eof {
            if self.data.is_empty() {
                match self.chain.next() {
                    Some(Ok(chain_block)) => match chain_block.block {
                        FileBlock::Program(block) => self.data = block.raw.block_bytes(),
                        FileBlock::Raw(block) => self.data = block.block_bytes(),
                    },
                    Some(Err(e)) => {
                        self.eof = true;
                        return Err(e);
                    }
                    None => self.eof = true,
                }
                continue;
            }
            let nbytes = self.data.len().min(buf.len() - total_nbytes);
            buf[total_nbytes..total_nbytes + nbytes].copy_from_slice(&self.data[..nbytes]);
            self.data = &self.data[nbytes..];
            total_nbytes += nbytes;
        }
        Ok(total_nbytes)
    }
}

impl<'a> RawBlock<&'a [u8]> {
    /// The trimmed data, borrowed for as long as the underlying block.
    fn block_bytes(&self) -> &'a [u8] {
        let block: &'a [u8] = self.block;
        &block[DATA_OFFSET..DATA_OFFSET + self.len()]
    }
}

/// Lays out file data in newly allocated blocks.  The first block must
/// already be allocated; each further block is taken from the allocator.
/// A failure part way through leaves the blocks allocated so far in place,
/// chained and terminated after the last one written.
pub struct ChainWriter<'a, P> {
    disk: &'a mut D64,
    allocator: &'a mut Allocator<P>,
}

impl<'a, P: TrackPolicy> ChainWriter<'a, P> {
    pub fn new(disk: &'a mut D64, allocator: &'a mut Allocator<P>) -> ChainWriter<'a, P> {
        ChainWriter { disk, allocator }
    }

    /// Write a program starting at `start`.  Returns the number of blocks
    /// used.
    pub fn write_program(
        &mut self,
        start: Location,
        load_address: [u8; 2],
        payload: &[u8],
    ) -> io::Result<usize> {
        let (chunk, rest) = payload.split_at(payload.len().min(PROGRAM_DATA_SIZE));
        let next = self.next_location(rest);
        let mut block = ProgramBlock::new(self.disk.block_mut(start)?);
        block.set_load_address(load_address);
        trace!("program block {} holds {} bytes", start, chunk.len());
        match next {
            Ok(Some(next)) => {
                block.write_payload(chunk)?;
                block.set_next(next);
                Ok(1 + self.write_raw_blocks(next, rest)?)
            }
            Ok(None) => {
                block.truncate(chunk)?;
                Ok(1)
            }
            Err(e) => {
                // End the chain here so the data written so far stays readable.
                block.truncate(chunk)?;
                Err(e)
            }
        }
    }

    /// Write sequential data starting at `start`.  Returns the number of
    /// blocks used.
    pub fn write_sequential(&mut self, start: Location, data: &[u8]) -> io::Result<usize> {
        self.write_raw_blocks(start, data)
    }

    fn write_raw_blocks(&mut self, start: Location, data: &[u8]) -> io::Result<usize> {
        let mut location = start;
        let mut remaining = data;
        let mut blocks = 0;
        loop {
            let (chunk, rest) = remaining.split_at(remaining.len().min(DATA_SIZE));
            let next = self.next_location(rest);
            let mut block = RawBlock::new(self.disk.block_mut(location)?);
            trace!("raw block {} holds {} bytes", location, chunk.len());
            blocks += 1;
            match next {
                Ok(Some(next)) => {
                    block.write_data(chunk)?;
                    block.set_next(next);
                    location = next;
                    remaining = rest;
                }
                Ok(None) => {
                    block.truncate(chunk)?;
                    return Ok(blocks);
                }
                Err(e) => {
                    block.truncate(chunk)?;
                    return Err(e);
                }
            }
        }
    }

    /// Allocate the block following the current one, if more data remains.
    fn next_location(&mut self, rest: &[u8]) -> io::Result<Option<Location>> {
        if rest.is_empty() {
            return Ok(None);
        }
        let mut bam = self.disk.bam_mut()?;
        Ok(Some(self.allocator.alloc(&mut bam)?))
    }
}
