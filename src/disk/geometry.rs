//! The 1541 zone table.  Outer tracks are longer and hold more sectors, so
//! the disk is divided into four speed zones with decreasing sector counts.

use std::io;

use crate::disk::block::{Location, BLOCK_SIZE};
use crate::disk::error::DiskError;

/// Tracks present on a standard disk image.
pub const TRACKS: u8 = 35;
/// The highest track number any 1541 zone describes.
pub const LAST_ADDRESSABLE_TRACK: u8 = 40;
/// Blocks on a standard 35-track disk image.
pub const TOTAL_BLOCKS: usize = 683;
/// Size in bytes of a standard 35-track disk image.
pub const IMAGE_SIZE: usize = TOTAL_BLOCKS * BLOCK_SIZE;

/// A contiguous range of tracks sharing one sector count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Zone {
    pub first_track: u8,
    pub last_track: u8,
    pub sectors: u8,
    /// Blocks preceding the first track of this zone.
    pub sector_offset: u16,
}

impl Zone {
    #[inline]
    fn tracks(&self) -> usize {
        (self.last_track - self.first_track + 1) as usize
    }

    #[inline]
    fn blocks(&self) -> usize {
        self.tracks() * self.sectors as usize
    }

    #[inline]
    fn contains(&self, track: u8) -> bool {
        self.first_track <= track && track <= self.last_track
    }
}

#[rustfmt::skip]
pub static ZONES: [Zone; 4] = [
    Zone { first_track: 1,  last_track: 17, sectors: 21, sector_offset: 0 },
    Zone { first_track: 18, last_track: 24, sectors: 19, sector_offset: 357 },
    Zone { first_track: 25, last_track: 30, sectors: 18, sector_offset: 490 },
    Zone { first_track: 31, last_track: 40, sectors: 17, sector_offset: 598 },
];

/// Find the zone describing a track.
pub fn lookup(track: u8) -> io::Result<&'static Zone> {
    ZONES
        .iter()
        .find(|zone| zone.contains(track))
        .ok_or_else(|| DiskError::InvalidAddress.into())
}

/// Return the number of sectors on the given track.
#[inline]
pub fn sectors_per_track(track: u8) -> io::Result<u8> {
    Ok(lookup(track)?.sectors)
}

/// Compute the byte offset of a block within the flat image.
pub fn offset(location: Location) -> io::Result<usize> {
    let Location(track, sector) = location;
    if track < 1 {
        return Err(DiskError::InvalidAddress.into());
    }
    let zone = lookup(track)?;
    if sector >= zone.sectors {
        return Err(DiskError::InvalidAddress.into());
    }
    let block = zone.sector_offset as usize
        + (track - zone.first_track) as usize * zone.sectors as usize
        + sector as usize;
    Ok(block * BLOCK_SIZE)
}

/// Recover the track and sector stored at a byte offset.  The offset must
/// fall on a block boundary.
pub fn location(offset: usize) -> io::Result<Location> {
    if offset % BLOCK_SIZE != 0 {
        return Err(DiskError::InvalidAddress.into());
    }
    let block = offset / BLOCK_SIZE;
    for zone in ZONES.iter() {
        let first = zone.sector_offset as usize;
        if block >= first && block < first + zone.blocks() {
            let index = block - first;
            let track = zone.first_track as usize + index / zone.sectors as usize;
            let sector = index % zone.sectors as usize;
            return Ok(Location::new(track as u8, sector as u8));
        }
    }
    Err(DiskError::InvalidAddress.into())
}
