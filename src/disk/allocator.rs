//! Block selection.  Successive blocks of a file are spread around a track by
//! a fixed interleave, so the drive has time to process one block before the
//! next passes under the head, and tracks are consumed outward from the
//! directory track to keep seeks short.

use std::io;

use log::{debug, trace};

use crate::disk::bam::Bam;
use crate::disk::block::Location;
use crate::disk::error::DiskError;
use crate::disk::geometry;
use crate::disk::{DIRECTORY_TRACK, LAST_BAM_TRACK};

/// Decide which track to search once the current one is exhausted.
pub trait TrackPolicy {
    /// Return the track to try after `current`, or `None` when no tracks
    /// remain.
    fn next_track(&self, current: u8) -> Option<u8>;
}

impl<F: Fn(u8) -> Option<u8>> TrackPolicy for F {
    #[inline]
    fn next_track(&self, current: u8) -> Option<u8> {
        self(current)
    }
}

/// The 1541 file policy: from the directory track upward to the last track,
/// then from just below the directory track down to track 1.
#[derive(Clone, Copy, Debug, Default)]
pub struct OutwardFromDirectory;

impl TrackPolicy for OutwardFromDirectory {
    fn next_track(&self, current: u8) -> Option<u8> {
        if current >= DIRECTORY_TRACK {
            if current < LAST_BAM_TRACK {
                Some(current + 1)
            } else {
                Some(DIRECTORY_TRACK - 1)
            }
        } else if current > 1 {
            Some(current - 1)
        } else {
            None
        }
    }
}

/// Never leave the starting track.
#[derive(Clone, Copy, Debug, Default)]
pub struct DirectoryTrackOnly;

impl TrackPolicy for DirectoryTrackOnly {
    #[inline]
    fn next_track(&self, _current: u8) -> Option<u8> {
        None
    }
}

/// Hands out free blocks one at a time.  The allocator always knows the
/// block it will return next (the lookahead); a null lookahead means the
/// search has run out of tracks and the next `alloc()` reports `DiskFull`.
///
/// An allocator holds no reference to the BAM, so the BAM is passed to each
/// call.  Use one allocator per file being laid out.
#[derive(Debug)]
pub struct Allocator<P> {
    lookahead: Location,
    stagger: u8,
    policy: P,
}

impl<P: TrackPolicy> Allocator<P> {
    /// Create an allocator whose first block is the first free block found
    /// by searching from `start`.
    pub fn new<B: AsRef<[u8]>>(bam: &Bam<B>, start: Location, stagger: u8, policy: P) -> Self {
        let mut allocator = Allocator {
            lookahead: Location::NULL,
            stagger,
            policy,
        };
        allocator.lookahead = allocator.search(bam, start);
        allocator
    }

    /// The block the next call to `alloc()` will return.
    #[inline]
    pub fn lookahead(&self) -> Location {
        self.lookahead
    }

    #[inline]
    pub fn stagger(&self) -> u8 {
        self.stagger
    }

    /// Mark the lookahead block as used, return it, and find the next one.
    pub fn alloc<B: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        bam: &mut Bam<B>,
    ) -> io::Result<Location> {
        // The lookahead may have been taken by someone else since it was
        // chosen.
        if !self.lookahead.is_null() && !bam.available(self.lookahead).unwrap_or(false) {
            self.lookahead = self.search(bam, self.lookahead);
        }
        if self.lookahead.is_null() {
            debug!("allocator exhausted all permitted tracks");
            return Err(DiskError::DiskFull.into());
        }

        let location = self.lookahead;
        bam.alloc(location)?;
        self.lookahead = self.search(bam, location);
        trace!("allocated {}, next {}", location, self.lookahead);
        Ok(location)
    }

    /// Find the first free block at or after `start`, following the track
    /// policy.  Returns the null location when none remains.
    fn search<B: AsRef<[u8]>>(&self, bam: &Bam<B>, start: Location) -> Location {
        let mut visited_tracks = 0u64;
        let mut track = start.0;
        let mut sector = start.1;
        loop {
            // A track outside the BAM ends the search.
            if bam.entry(track).is_err() || visited_tracks & (1 << track) != 0 {
                return Location::NULL;
            }
            visited_tracks |= 1 << track;

            if let Some(sector) = self.scan_track(bam, track, sector) {
                return Location::new(track, sector);
            }
            trace!("track {} exhausted", track);
            track = match self.policy.next_track(track) {
                Some(track) => track,
                None => return Location::NULL,
            };
            sector = 0;
        }
    }

    /// Search a track for a free sector, starting at `start` and stepping by
    /// the interleave.  Every sector is checked at most once, and every
    /// sector is checked before giving up.
    fn scan_track<B: AsRef<[u8]>>(&self, bam: &Bam<B>, track: u8, start: u8) -> Option<u8> {
        let entry = bam.entry(track).ok()?;
        let sectors = geometry::sectors_per_track(track).ok()?;
        if !entry.has_availability() {
            return None;
        }

        let mut checked = 0u32;
        let mut sector = if start < sectors { start } else { 0 };
        loop {
            checked |= 1 << sector;
            if entry.is_free(sector) {
                return Some(sector);
            }
            if checked.count_ones() >= sectors as u32 {
                return None;
            }
            sector = interleave(sector, self.stagger, sectors);
            // Some interleave and track size pairs revisit sectors before
            // covering the track; fall back to the next unchecked sector.
            while checked & (1 << sector) != 0 {
                sector = (sector + 1) % sectors;
            }
        }
    }
}

/// Step `stagger` sectors forward.  Wrapping past the end of the track lands
/// on `1 + overflow`, never on sector 0.
fn interleave(sector: u8, stagger: u8, sectors: u8) -> u8 {
    let sectors = sectors as u16;
    let mut next = sector as u16 + stagger as u16;
    if next >= sectors {
        next = 1 + next % sectors;
        if next >= sectors {
            next %= sectors;
        }
    }
    next as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::block::BLOCK_SIZE;
    use crate::disk::{DIRECTORY_INTERLEAVE, FILE_INTERLEAVE};

    fn formatted_bam() -> Bam<Vec<u8>> {
        let mut bam = Bam::new(vec![0u8; BLOCK_SIZE]);
        bam.init("ALLOC", b"AA").unwrap();
        bam.set_directory_location(Location(18, 1));
        bam.alloc(Location(18, 0)).unwrap();
        bam.alloc(Location(18, 1)).unwrap();
        bam
    }

    #[test]
    fn test_interleave_wraps_past_sector_zero() {
        assert_eq!(interleave(0, 10, 21), 10);
        assert_eq!(interleave(10, 10, 21), 20);
        assert_eq!(interleave(20, 10, 21), 10);
        assert_eq!(interleave(10, 10, 19), 2);
        assert_eq!(interleave(16, 3, 19), 1);
        assert_eq!(interleave(18, 1, 19), 1);
    }

    #[test]
    fn test_every_sector_is_reachable() {
        // Leave exactly one free sector on a track and make sure the scan
        // finds it from every starting point, for every zone.
        for &(track, sectors) in &[(1u8, 21u8), (18, 19), (25, 18), (31, 17)] {
            for &stagger in &[1u8, DIRECTORY_INTERLEAVE, FILE_INTERLEAVE, 16] {
                for target in 0..sectors {
                    let mut bam = Bam::new(vec![0u8; BLOCK_SIZE]);
                    bam.init("", b"00").unwrap();
                    for sector in (0..sectors).filter(|&s| s != target) {
                        bam.alloc(Location(track, sector)).unwrap();
                    }
                    let allocator = Allocator::new(&bam, Location(track, 0), stagger, DirectoryTrackOnly);
                    for start in 0..sectors {
                        assert_eq!(
                            allocator.scan_track(&bam, track, start),
                            Some(target),
                            "track {} stagger {} start {}",
                            track,
                            stagger,
                            start
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_default_track_order() {
        let policy = OutwardFromDirectory;
        let mut order = vec![];
        let mut track = Some(DIRECTORY_TRACK + 1);
        while let Some(t) = track {
            order.push(t);
            track = policy.next_track(t);
        }
        let expected = (19..=35).chain((1..=17).rev()).collect::<Vec<u8>>();
        assert_eq!(order, expected);
    }

    #[test]
    fn test_file_allocation_sequence() {
        let mut bam = formatted_bam();
        let mut allocator = bam.new_allocator();
        assert_eq!(allocator.lookahead(), Location(19, 0));
        let locations = (0..4)
            .map(|_| allocator.alloc(&mut bam).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(
            locations,
            vec![Location(19, 0), Location(19, 10), Location(19, 2), Location(19, 12)]
        );
        for location in &locations {
            assert!(!bam.available(*location).unwrap());
        }
    }

    #[test]
    fn test_allocate_until_full() {
        let mut bam = formatted_bam();
        let mut allocator = bam.new_allocator();
        let mut count = 0;
        let mut previous_track = 19;
        loop {
            match allocator.alloc(&mut bam) {
                Ok(location) => {
                    assert_ne!(location.0, DIRECTORY_TRACK);
                    // Tracks are consumed in policy order, never revisited.
                    if location.0 != previous_track {
                        assert_eq!(OutwardFromDirectory.next_track(previous_track), Some(location.0));
                        previous_track = location.0;
                    }
                    count += 1;
                }
                Err(e) => {
                    assert_eq!(e, DiskError::DiskFull);
                    break;
                }
            }
        }
        assert_eq!(count, 683 - 19);
        assert_eq!(bam.blocks_free(), 0);
        assert_eq!(previous_track, 1);
        assert!(allocator.lookahead().is_null());
    }

    #[test]
    fn test_directory_allocation_stays_on_track() {
        let mut bam = formatted_bam();
        let mut allocator = bam.new_directory_allocator();
        assert_eq!(allocator.stagger(), DIRECTORY_INTERLEAVE);
        let first = allocator.alloc(&mut bam).unwrap();
        assert_eq!(first, Location(18, 4));
        assert_eq!(allocator.alloc(&mut bam).unwrap(), Location(18, 7));
        let mut count = 2;
        while let Ok(location) = allocator.alloc(&mut bam) {
            assert_eq!(location.0, DIRECTORY_TRACK);
            count += 1;
        }
        assert_eq!(count, 19 - 2);
        assert_eq!(bam.entry(DIRECTORY_TRACK).unwrap().free_sectors, 0);
    }

    #[test]
    fn test_stale_lookahead_is_skipped() {
        let mut bam = formatted_bam();
        let mut allocator = bam.new_allocator();
        bam.alloc(Location(19, 0)).unwrap();
        let location = allocator.alloc(&mut bam).unwrap();
        assert_eq!(location, Location(19, 10));
    }

    #[test]
    fn test_closure_policy() {
        let mut bam = formatted_bam();
        let mut allocator = Allocator::new(&bam, Location(1, 0), 1, |t: u8| {
            if t < 2 {
                Some(t + 1)
            } else {
                None
            }
        });
        for _ in 0..(21 * 2) {
            let location = allocator.alloc(&mut bam).unwrap();
            assert!(location.0 == 1 || location.0 == 2);
        }
        assert_eq!(allocator.alloc(&mut bam).unwrap_err(), DiskError::DiskFull);
    }
}
