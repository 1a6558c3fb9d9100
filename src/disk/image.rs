use std::fs::File;
use std::io;
use std::path::Path;

use memmap::{Mmap, MmapOptions};

use crate::disk::error::DiskError;

/// Backing storage for a disk image: either a read-only file mapping or an
/// owned in-memory buffer.  Writing an image back to the host is left to the
/// caller, which takes the bytes whole.
pub enum Image {
    ReadOnlyMap(Mmap),
    Memory(Box<[u8]>),
}

impl Image {
    pub fn open_memory(length: usize) -> Image {
        Image::Memory(vec![0; length].into_boxed_slice())
    }

    pub fn from_bytes(bytes: &[u8]) -> Image {
        Image::Memory(bytes.to_vec().into_boxed_slice())
    }

    pub fn open_read_only<P: AsRef<Path>>(path: P) -> io::Result<Image> {
        let file = File::open(path)?;
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Ok(Image::ReadOnlyMap(mmap))
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Image::ReadOnlyMap(mmap) => &mmap[..],
            Image::Memory(array) => &array[..],
        }
    }

    pub fn check_writability(&self) -> io::Result<()> {
        match self {
            Image::ReadOnlyMap(_) => Err(DiskError::ReadOnly.into()),
            Image::Memory(_) => Ok(()),
        }
    }

    /// Borrow `length` bytes at `offset`.  A range past the end of the
    /// image means the caller computed a bad offset, which is a bug.
    pub fn slice(&self, offset: usize, length: usize) -> &[u8] {
        self.check_bounds(offset, length);
        &self.as_bytes()[offset..offset + length]
    }

    pub fn slice_mut(&mut self, offset: usize, length: usize) -> io::Result<&mut [u8]> {
        self.check_bounds(offset, length);
        match self {
            Image::ReadOnlyMap(_) => Err(DiskError::ReadOnly.into()),
            Image::Memory(array) => Ok(&mut array[offset..offset + length]),
        }
    }

    fn check_bounds(&self, offset: usize, length: usize) {
        assert!(
            offset + length <= self.len(),
            "block range 0x{:x}+0x{:x} exceeds image size 0x{:x}",
            offset,
            length,
            self.len()
        );
    }

    /// Copy out the whole image.
    pub fn into_vec(self) -> Vec<u8> {
        match self {
            Image::ReadOnlyMap(mmap) => mmap[..].to_vec(),
            Image::Memory(array) => array.into_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_image() {
        let mut image = Image::open_memory(512);
        assert_eq!(image.len(), 512);
        image.check_writability().unwrap();
        image.slice_mut(256, 2).unwrap().copy_from_slice(&[0x12, 0x34]);
        assert_eq!(image.slice(255, 3), &[0x00, 0x12, 0x34]);
        assert_eq!(image.into_vec()[256], 0x12);
    }

    #[test]
    #[should_panic]
    fn test_out_of_bounds_is_a_bug() {
        let image = Image::open_memory(256);
        image.slice(1, 256);
    }
}
