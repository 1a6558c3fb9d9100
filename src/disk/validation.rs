use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::io;

use log::debug;

use crate::disk::block::{Location, LocationIterator};
use crate::disk::directory::DirectoryBlock;
use crate::disk::error::DiskError;
use crate::disk::geometry;
use crate::disk::{D64, BAM_LOCATION, LAST_BAM_TRACK};

const SYSTEM_OWNER: &str = "CBM DOS";

/// A validation error represents an inconsistency in the disk image found by
/// the validate() function.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("System sector not allocated: {0}")]
    SystemSectorNotAllocated(Location),
    #[error("Sector misallocated: {0}")]
    SectorMisallocated(Location),
    #[error("Sector {0} misoccupied by file: {1:?}")]
    SectorMisoccupied(Location, String),
    #[error("Sector {0} occupied by multiple files, including at least: {1:?} {2:?}")]
    SectorOveroccupied(Location, String, String),
    #[error("Track {track} free count is {recorded}, but its map shows {actual}")]
    FreeCountMismatch { track: u8, recorded: u8, actual: u8 },
    #[error("Error scanning {1:?}: {0}")]
    FileScanError(DiskError, String),
}

/// Walk the directory chain, returning the locations of its blocks.
fn directory_locations(disk: &D64) -> io::Result<Vec<Location>> {
    let mut locations = vec![];
    let mut next = Some(disk.directory_location()?);
    while let Some(location) = next {
        if locations.contains(&location) {
            return Err(DiskError::ChainLoop.into());
        }
        locations.push(location);
        next = DirectoryBlock::new(disk.block(location)?).next();
    }
    Ok(locations)
}

/// Check the consistency of the provided disk.  Unlike the "validate" ("v0:")
/// command in CBM DOS, this is a read-only operation and does not attempt any
/// repairs.  A list of validation errors is returned.
pub fn validate(disk: &D64) -> io::Result<Vec<ValidationError>> {
    let mut errors: Vec<ValidationError> = vec![];
    let bam = disk.bam()?;

    // Free counts must agree with the bitmaps.
    for track in 1..=LAST_BAM_TRACK {
        let entry = bam.entry(track)?;
        let actual = entry.count_free(geometry::sectors_per_track(track)?);
        if entry.free_sectors != actual {
            errors.push(ValidationError::FreeCountMismatch {
                track,
                recorded: entry.free_sectors,
                actual,
            });
        }
    }

    // Build a list of all occupied sectors and their owners, starting with
    // the header and the directory chain.
    let mut system_sectors = vec![BAM_LOCATION];
    system_sectors.extend(directory_locations(disk)?);
    let mut occupied_sector_map: HashMap<Location, String> = system_sectors
        .iter()
        .map(|&location| (location, SYSTEM_OWNER.to_string()))
        .collect();

    for item in disk.directory()? {
        let (_, entry) = item?;
        let filename = entry.filename();
        let locations = match disk.chain(&entry).and_then(|chain| chain.locations()) {
            Ok(locations) => locations,
            Err(e) => match DiskError::from_io_error(&e) {
                Some(e) => {
                    errors.push(ValidationError::FileScanError(e, filename));
                    continue;
                }
                None => return Err(e),
            },
        };
        for location in locations {
            match occupied_sector_map.entry(location) {
                Entry::Occupied(owner) => {
                    errors.push(ValidationError::SectorOveroccupied(
                        location,
                        owner.get().clone(),
                        filename.clone(),
                    ));
                }
                Entry::Vacant(v) => {
                    v.insert(filename.clone());
                }
            };
        }
    }

    let allocated_sectors = bam.allocated_sectors().into_iter().collect::<HashSet<_>>();

    // Confirm all system sectors are still allocated.
    for location in &system_sectors {
        if !allocated_sectors.contains(location) {
            errors.push(ValidationError::SystemSectorNotAllocated(*location));
        }
    }

    // Walk every block in order so the report is stable.
    for location in LocationIterator::new().filter(|l| l.0 <= LAST_BAM_TRACK) {
        let allocated = allocated_sectors.contains(&location);
        match occupied_sector_map.get(&location) {
            None if allocated => errors.push(ValidationError::SectorMisallocated(location)),
            Some(owner) if !allocated && owner != SYSTEM_OWNER => {
                errors.push(ValidationError::SectorMisoccupied(location, owner.clone()));
            }
            _ => {}
        }
    }

    debug!("validation found {} problems", errors.len());
    Ok(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::directory::FileType;

    fn disk_with_files() -> D64 {
        let mut disk = D64::new("VALIDATE", b"01").unwrap();
        disk.write_file("FIRST", FileType::SEQ, &vec![1u8; 600]).unwrap();
        disk.write_file("SECOND", FileType::PRG, &vec![2u8; 300]).unwrap();
        disk
    }

    #[test]
    fn test_clean_disk() {
        assert_eq!(disk_with_files().validate().unwrap(), vec![]);
        assert_eq!(D64::new("EMPTY", b"01").unwrap().validate().unwrap(), vec![]);
    }

    #[test]
    fn test_misallocated_and_misoccupied() {
        let mut disk = disk_with_files();
        let (_, entry) = disk.find("FIRST").unwrap();
        let first = entry.first_location();
        {
            let mut bam = disk.bam_mut().unwrap();
            bam.free(first).unwrap();
            bam.alloc(Location(1, 0)).unwrap();
        }
        let errors = disk.validate().unwrap();
        assert_eq!(
            errors,
            vec![
                ValidationError::SectorMisallocated(Location(1, 0)),
                ValidationError::SectorMisoccupied(first, "FIRST".to_string()),
            ]
        );
    }

    #[test]
    fn test_system_sector_not_allocated() {
        let mut disk = disk_with_files();
        disk.bam_mut().unwrap().free(Location(18, 1)).unwrap();
        let errors = disk.validate().unwrap();
        assert_eq!(errors, vec![ValidationError::SystemSectorNotAllocated(Location(18, 1))]);
    }

    #[test]
    fn test_shared_block() {
        let mut disk = disk_with_files();
        let first = disk.find("FIRST").unwrap().1.first_location();
        let position = disk.find("SECOND").unwrap().0;
        // Point SECOND at FIRST's chain and abandon its own blocks.
        let abandoned = {
            let entry = disk.find("SECOND").unwrap().1;
            disk.chain(&entry).unwrap().locations().unwrap()
        };
        {
            let mut entry = disk.entry_mut(position).unwrap();
            entry.set_file_type(FileType::SEQ);
            entry.set_first_location(first);
        }
        let errors = disk.validate().unwrap();
        assert!(errors.contains(&ValidationError::SectorOveroccupied(
            first,
            "FIRST".to_string(),
            "SECOND".to_string()
        )));
        for location in abandoned {
            assert!(errors.contains(&ValidationError::SectorMisallocated(location)));
        }
    }

    #[test]
    fn test_free_count_mismatch() {
        let mut disk = disk_with_files();
        let offset = BAM_LOCATION.offset().unwrap() + 4 * 5;
        let mut bytes = disk.into_bytes();
        bytes[offset] -= 1;
        disk = D64::from_bytes(&bytes).unwrap();
        assert_eq!(
            disk.validate().unwrap(),
            vec![ValidationError::FreeCountMismatch {
                track: 5,
                recorded: 20,
                actual: 21
            }]
        );
    }

    #[test]
    fn test_file_scan_error() {
        let mut disk = disk_with_files();
        let first = disk.find("FIRST").unwrap().1.first_location();
        // Make the first block link to itself.
        first.write_bytes(&mut disk.block_mut(first).unwrap()[0..2]);
        let errors = disk.validate().unwrap();
        assert_eq!(errors[0], ValidationError::FileScanError(DiskError::ChainLoop, "FIRST".to_string()));
        assert!(errors[1..]
            .iter()
            .all(|e| matches!(e, ValidationError::SectorMisallocated(_))));
    }
}
