//! The Block Availability Map lives in the header block at 18/0, alongside
//! the disk name, disk id, and the location of the first directory block.

use std::fmt;
use std::fmt::Write;
use std::io;

use crate::disk::allocator::{Allocator, DirectoryTrackOnly, OutwardFromDirectory};
use crate::disk::block::{Location, BLOCK_SIZE};
use crate::disk::error::DiskError;
use crate::disk::{geometry, Id};
use crate::disk::{
    DIRECTORY_INTERLEAVE, DIRECTORY_TRACK, DISK_NAME_SIZE, DOS_VERSION, DRIVE_FORMAT,
    FILE_INTERLEAVE, LAST_BAM_TRACK,
};
use crate::petscii::{self, PADDING_BYTE};

const DIRECTORY_LOCATION_OFFSET: usize = 0x00;
const DRIVE_FORMAT_OFFSET: usize = 0x02;
const ENTRIES_OFFSET: usize = 0x04;
const ENTRY_SIZE: usize = 4;
const DISK_NAME_OFFSET: usize = 0x90;
const DISK_ID_OFFSET: usize = 0xA2;
const DOS_VERSION_OFFSET: usize = 0xA5;
const PADDING_OFFSETS: &[usize] = &[0xA0, 0xA1, 0xA4, 0xA7, 0xA8, 0xA9, 0xAA];

/// Bits in a BAM entry's three-byte sector map, whether or not the track
/// has that many sectors.
const MAP_BITS: u8 = 24;

/// One track's free sector count and free sector bitmap.  Bit `n` of the
/// map is set when sector `n` is free.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BamEntry {
    pub free_sectors: u8,
    pub sector_map: u32,
}

impl BamEntry {
    /// An entry for a track of `sectors` sectors with every bit of the map
    /// set.
    pub fn new(sectors: u8) -> BamEntry {
        BamEntry {
            free_sectors: sectors,
            sector_map: (1 << MAP_BITS) - 1,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> BamEntry {
        assert!(bytes.len() >= ENTRY_SIZE);
        BamEntry {
            free_sectors: bytes[0],
            sector_map: bytes[1] as u32 | (bytes[2] as u32) << 8 | (bytes[3] as u32) << 16,
        }
    }

    pub fn write_bytes(&self, bytes: &mut [u8]) {
        assert!(bytes.len() >= ENTRY_SIZE);
        bytes[0] = self.free_sectors;
        bytes[1] = self.sector_map as u8;
        bytes[2] = (self.sector_map >> 8) as u8;
        bytes[3] = (self.sector_map >> 16) as u8;
    }

    #[inline]
    pub fn has_availability(&self) -> bool {
        self.free_sectors > 0
    }

    #[inline]
    pub fn is_free(&self, sector: u8) -> bool {
        self.sector_map & (1 << sector) != 0
    }

    /// Count the free bits belonging to the first `sectors` sectors.
    pub fn count_free(&self, sectors: u8) -> u8 {
        (self.sector_map & ((1u32 << sectors) - 1)).count_ones() as u8
    }
}

/// A view of the header block.  `B` is any 256-byte buffer: a borrowed
/// block of a disk image, or an owned copy.
pub struct Bam<B> {
    block: B,
}

impl<B: AsRef<[u8]>> Bam<B> {
    pub fn new(block: B) -> Bam<B> {
        assert_eq!(block.as_ref().len(), BLOCK_SIZE);
        Bam { block }
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        self.block.as_ref()
    }

    /// The first block of the directory chain.
    pub fn directory_location(&self) -> Location {
        Location::from_bytes(&self.bytes()[DIRECTORY_LOCATION_OFFSET..])
    }

    pub fn drive_format(&self) -> u8 {
        self.bytes()[DRIVE_FORMAT_OFFSET]
    }

    /// The raw, padded disk name.
    pub fn disk_name_bytes(&self) -> &[u8] {
        &self.bytes()[DISK_NAME_OFFSET..DISK_NAME_OFFSET + DISK_NAME_SIZE]
    }

    pub fn disk_name(&self) -> String {
        petscii::unpad_bytes(self.disk_name_bytes())
    }

    pub fn disk_id(&self) -> Id {
        Id::from_bytes(&self.bytes()[DISK_ID_OFFSET..DISK_ID_OFFSET + 2])
    }

    pub fn dos_version(&self) -> [u8; 2] {
        [
            self.bytes()[DOS_VERSION_OFFSET],
            self.bytes()[DOS_VERSION_OFFSET + 1],
        ]
    }

    /// Return the entry for a track, or `OutOfRange` if the BAM has no entry
    /// for it.
    pub fn entry(&self, track: u8) -> io::Result<BamEntry> {
        let offset = entry_offset(track)?;
        Ok(BamEntry::from_bytes(&self.bytes()[offset..offset + ENTRY_SIZE]))
    }

    /// Report whether a block is marked free.
    pub fn available(&self, location: Location) -> io::Result<bool> {
        check_sector(location)?;
        Ok(self.entry(location.0)?.is_free(location.1))
    }

    /// Return the number of blocks free on the disk, not counting the
    /// directory track.  This matches the "blocks free" line of a directory
    /// listing, and is taken from the free sector counts rather than the
    /// bitmaps.
    pub fn blocks_free(&self) -> usize {
        (1..=LAST_BAM_TRACK)
            .filter(|&track| track != DIRECTORY_TRACK)
            .filter_map(|track| self.entry(track).ok())
            .map(|entry| entry.free_sectors as usize)
            .sum()
    }

    fn sectors_where(&self, free: bool) -> Vec<Location> {
        let mut locations = vec![];
        for track in 1..=LAST_BAM_TRACK {
            let (entry, sectors) = match (self.entry(track), geometry::sectors_per_track(track)) {
                (Ok(entry), Ok(sectors)) => (entry, sectors),
                _ => continue,
            };
            for sector in 0..sectors {
                if entry.is_free(sector) == free {
                    locations.push(Location::new(track, sector));
                }
            }
        }
        locations
    }

    pub fn free_sectors(&self) -> Vec<Location> {
        self.sectors_where(true)
    }

    pub fn allocated_sectors(&self) -> Vec<Location> {
        self.sectors_where(false)
    }

    /// An allocator for file data, starting just past the directory track.
    pub fn new_allocator(&self) -> Allocator<OutwardFromDirectory> {
        Allocator::new(
            self,
            Location::new(DIRECTORY_TRACK + 1, 0),
            FILE_INTERLEAVE,
            OutwardFromDirectory,
        )
    }

    /// An allocator for directory blocks, confined to the directory track.
    pub fn new_directory_allocator(&self) -> Allocator<DirectoryTrackOnly> {
        Allocator::new(
            self,
            self.directory_location(),
            DIRECTORY_INTERLEAVE,
            DirectoryTrackOnly,
        )
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Bam<B> {
    #[inline]
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.block.as_mut()
    }

    /// Write a fresh header: every sector of every track free, the given disk
    /// name and id, and the 1541 format markers.  Nothing is written unless
    /// both the name and the id are acceptable.
    pub fn init(&mut self, name: &str, id: &[u8]) -> io::Result<()> {
        let name = petscii::pad_string(name, DISK_NAME_SIZE)?;
        if id.len() != 2 {
            return Err(DiskError::InvalidId.into());
        }

        let bytes = self.bytes_mut();
        for b in bytes.iter_mut() {
            *b = 0;
        }
        bytes[DRIVE_FORMAT_OFFSET] = DRIVE_FORMAT;
        for track in 1..=LAST_BAM_TRACK {
            let offset = entry_offset(track)?;
            BamEntry::new(geometry::sectors_per_track(track)?)
                .write_bytes(&mut bytes[offset..offset + ENTRY_SIZE]);
        }
        bytes[DISK_NAME_OFFSET..DISK_NAME_OFFSET + DISK_NAME_SIZE].copy_from_slice(&name);
        bytes[DISK_ID_OFFSET..DISK_ID_OFFSET + 2].copy_from_slice(id);
        bytes[DOS_VERSION_OFFSET..DOS_VERSION_OFFSET + 2].copy_from_slice(&DOS_VERSION);
        for &offset in PADDING_OFFSETS {
            bytes[offset] = PADDING_BYTE;
        }
        Ok(())
    }

    pub fn set_directory_location(&mut self, location: Location) {
        location.write_bytes(&mut self.bytes_mut()[DIRECTORY_LOCATION_OFFSET..]);
    }

    fn write_entry(&mut self, track: u8, entry: &BamEntry) -> io::Result<()> {
        let offset = entry_offset(track)?;
        entry.write_bytes(&mut self.bytes_mut()[offset..offset + ENTRY_SIZE]);
        Ok(())
    }

    /// Mark a block as used.  Fails with `TrackFull` if the track's free
    /// count is already zero, or `Conflict` if the block is already used.
    pub fn alloc(&mut self, location: Location) -> io::Result<()> {
        check_sector(location)?;
        let mut entry = self.entry(location.0)?;
        if !entry.has_availability() {
            return Err(DiskError::TrackFull.into());
        }
        if !entry.is_free(location.1) {
            return Err(DiskError::Conflict.into());
        }
        entry.sector_map &= !(1 << location.1);
        entry.free_sectors -= 1;
        self.write_entry(location.0, &entry)
    }

    /// Mark a block as free.  Fails with `Conflict` if it is already free.
    pub fn free(&mut self, location: Location) -> io::Result<()> {
        check_sector(location)?;
        let mut entry = self.entry(location.0)?;
        if entry.is_free(location.1) {
            return Err(DiskError::Conflict.into());
        }
        entry.sector_map |= 1 << location.1;
        entry.free_sectors = entry.free_sectors.wrapping_add(1);
        self.write_entry(location.0, &entry)
    }
}

fn entry_offset(track: u8) -> io::Result<usize> {
    if track < 1 || track > LAST_BAM_TRACK {
        return Err(DiskError::OutOfRange.into());
    }
    Ok(ENTRIES_OFFSET + (track - 1) as usize * ENTRY_SIZE)
}

/// A sector the track doesn't have has no meaningful bit in the map.
fn check_sector(location: Location) -> io::Result<()> {
    entry_offset(location.0)?;
    match geometry::sectors_per_track(location.0) {
        Ok(sectors) if location.1 < sectors => Ok(()),
        _ => Err(DiskError::OutOfRange.into()),
    }
}

impl<B: AsRef<[u8]>> fmt::Debug for Bam<B> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for track in 1..=LAST_BAM_TRACK {
            let (entry, sectors) = match (self.entry(track), geometry::sectors_per_track(track)) {
                (Ok(entry), Ok(sectors)) => (entry, sectors),
                _ => return Err(fmt::Error),
            };
            write!(f, "t{:02}: [{:02}/{:02}] ", track, entry.free_sectors, sectors)?;
            for sector in 0..sectors {
                f.write_char(if entry.is_free(sector) { '.' } else { 'x' })?;
            }
            f.write_char('\n')?;
        }
        writeln!(f, "{} blocks free.", self.blocks_free())
    }
}
