use std::fmt;
use std::io;

use crate::disk::geometry;

pub const BLOCK_SIZE: usize = 256;

/// A track and sector address.  Track zero never names a real block; it
/// terminates chains.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug, PartialOrd, Ord)]
pub struct Location(pub u8, pub u8); // Track and sector

impl Location {
    /// The "no address" value.
    pub const NULL: Location = Location(0, 0);

    #[inline]
    pub fn new(track: u8, sector: u8) -> Location {
        Location(track, sector)
    }

    pub fn from_bytes(bytes: &[u8]) -> Location {
        assert!(bytes.len() >= 2);
        Location(bytes[0], bytes[1])
    }

    pub fn write_bytes(&self, bytes: &mut [u8]) {
        assert!(bytes.len() >= 2);
        bytes[0] = self.0;
        bytes[1] = self.1;
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Byte offset of this block within a flat image.
    #[inline]
    pub fn offset(&self) -> io::Result<usize> {
        geometry::offset(*self)
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.offset().is_ok()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({},{})", self.0, self.1)
    }
}

/// A byte range within a block, such as one directory entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Position {
    pub location: Location,
    pub offset: u8,
    pub size: u8,
}

impl Position {
    #[inline]
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset as usize..self.offset as usize + self.size as usize
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "({},{}@0x{:02x})",
            self.location.0, self.location.1, self.offset
        )
    }
}

/// Visit every block of a standard disk image in image order.
pub struct LocationIterator {
    last_track: u8,
    next: Option<Location>,
}

impl LocationIterator {
    pub fn new() -> LocationIterator {
        LocationIterator {
            last_track: geometry::TRACKS,
            next: Some(Location::new(1, 0)),
        }
    }
}

impl Default for LocationIterator {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for LocationIterator {
    type Item = Location;

    fn next(&mut self) -> Option<Location> {
        let location = self.next?;

        let mut next_location = location;
        next_location.1 += 1;
        // Every track up to last_track is in the zone table.
        let sectors = geometry::sectors_per_track(next_location.0).unwrap_or(0);
        if next_location.1 >= sectors {
            next_location.0 += 1;
            next_location.1 = 0;
            if next_location.0 > self.last_track {
                self.next = None;
                return Some(location);
            }
        }
        self.next = Some(next_location);
        Some(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_bytes() {
        let mut bytes = [0u8; 4];
        Location(18, 4).write_bytes(&mut bytes[1..]);
        assert_eq!(bytes, [0, 18, 4, 0]);
        assert_eq!(Location::from_bytes(&bytes[1..3]), Location(18, 4));
        assert!(Location::NULL.is_null());
        assert!(!Location(18, 0).is_null());
        assert!(Location(18, 0).is_valid());
        assert!(!Location(18, 19).is_valid());
    }

    #[test]
    fn test_location_iterator() {
        let locations = LocationIterator::new().collect::<Vec<_>>();
        assert_eq!(locations.len(), geometry::TOTAL_BLOCKS);
        assert_eq!(locations[0], Location(1, 0));
        assert_eq!(locations[21], Location(2, 0));
        assert_eq!(*locations.last().unwrap(), Location(35, 16));
        for (index, location) in locations.iter().enumerate() {
            assert_eq!(location.offset().unwrap(), index * BLOCK_SIZE);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(Location(18, 1).to_string(), "(18,1)");
        let position = Position {
            location: Location(18, 1),
            offset: 0x20,
            size: 0x20,
        };
        assert_eq!(position.to_string(), "(18,1@0x20)");
        assert_eq!(position.range(), 0x20..0x40);
    }
}
