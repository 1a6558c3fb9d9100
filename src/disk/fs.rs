//! A read-only filesystem view of a disk image, for extraction tools.
//!
//! The tree has two levels.  The root (`.`) holds a single directory named
//! after the disk, and that directory holds one file per occupied directory
//! entry, named `FILENAME.EXT` where `EXT` is the file type (`???` when the
//! type is unrecognized).  Files are opened as `DISKNAME/FILENAME.EXT`.

use std::collections::BTreeMap;
use std::io;
use std::time::SystemTime;

use log::warn;

use crate::disk::chain::ChainReader;
use crate::disk::directory::{DirectoryEntry, FileType};
use crate::disk::error::DiskError;
use crate::disk::D64;

/// The root of the tree.
pub const ROOT: &str = ".";

/// Information about one node of the tree.  The disk format records no
/// timestamps, so `modified` is always the Unix epoch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Metadata {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: SystemTime,
    pub file_type: Option<FileType>,
}

impl Metadata {
    fn directory(name: &str) -> Metadata {
        Metadata {
            name: name.to_string(),
            is_dir: true,
            size: 0,
            modified: SystemTime::UNIX_EPOCH,
            file_type: None,
        }
    }
}

/// The filesystem view.  It borrows the disk, so the disk can't change
/// while the view exists.
pub struct DiskFs<'a> {
    disk: &'a D64,
    name: String,
    files: BTreeMap<String, DirectoryEntry<&'a [u8]>>,
}

impl<'a> DiskFs<'a> {
    pub fn new(disk: &'a D64) -> io::Result<DiskFs<'a>> {
        let name = disk.disk_name()?;
        let mut files = BTreeMap::new();
        for item in disk.directory()? {
            let (_, entry) = item?;
            let file_name = format!("{}.{}", entry.filename(), entry.file_type().extension());
            files.insert(file_name, entry);
        }
        Ok(DiskFs { disk, name, files })
    }

    /// The name of the directory holding the files.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the file name within the disk directory, if `path` names one.
    fn file_name<'p>(&self, path: &'p str) -> Option<&'p str> {
        path.strip_prefix(self.name.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
    }

    fn file_metadata(&self, name: &str, entry: &DirectoryEntry<&'a [u8]>) -> Metadata {
        // Unsupported file types have no chain to measure.
        let size = match self.disk.chain(entry) {
            Ok(chain) => chain.byte_len().unwrap_or_else(|e| {
                warn!("cannot measure {:?}: {}", name, e);
                0
            }),
            Err(_) => 0,
        };
        Metadata {
            name: name.to_string(),
            is_dir: false,
            size: size as u64,
            modified: SystemTime::UNIX_EPOCH,
            file_type: Some(entry.file_type()),
        }
    }

    pub fn metadata(&self, path: &str) -> io::Result<Metadata> {
        if path == ROOT {
            return Ok(Metadata::directory(ROOT));
        }
        if path == self.name {
            return Ok(Metadata::directory(&self.name));
        }
        match self.file_name(path).and_then(|name| self.files.get_key_value(name)) {
            Some((name, entry)) => Ok(self.file_metadata(name, entry)),
            None => Err(DiskError::NotFound.into()),
        }
    }

    /// Open a node for reading.  Reading a directory yields no bytes.
    pub fn open(&self, path: &str) -> io::Result<FsHandle<'a>> {
        let metadata = self.metadata(path)?;
        let content = if metadata.is_dir {
            Content::Directory
        } else {
            let entry = self
                .file_name(path)
                .and_then(|name| self.files.get(name))
                .ok_or(DiskError::NotFound)?;
            match self.disk.reader(entry) {
                Ok(reader) => Content::File(reader),
                Err(_) => Content::Unsupported,
            }
        };
        Ok(FsHandle { metadata, content })
    }

    /// List a directory, sorted by name.
    pub fn read_dir(&self, path: &str) -> io::Result<Vec<Metadata>> {
        if path == ROOT {
            return Ok(vec![Metadata::directory(&self.name)]);
        }
        if path != self.name {
            return Err(DiskError::NotFound.into());
        }
        Ok(self
            .files
            .iter()
            .map(|(name, entry)| self.file_metadata(name, entry))
            .collect())
    }
}

enum Content<'a> {
    Directory,
    File(ChainReader<'a>),
    Unsupported,
}

/// An open node of a [`DiskFs`].
pub struct FsHandle<'a> {
    metadata: Metadata,
    content: Content<'a>,
}

impl<'a> FsHandle<'a> {
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

impl<'a> io::Read for FsHandle<'a> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.content {
            Content::Directory => Ok(0),
            Content::File(ref mut reader) => reader.read(buf),
            Content::Unsupported => Err(DiskError::UnsupportedFormat.into()),
        }
    }
}

impl D64 {
    /// Build a read-only filesystem view of this disk.
    pub fn fs(&self) -> io::Result<DiskFs<'_>> {
        DiskFs::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_single_program() {
        let mut disk = D64::new("TESTNAME", b"\x01\x02").unwrap();
        let data = (0..700).map(|i| (i % 256) as u8).collect::<Vec<_>>();
        disk.write_file("HELLO", FileType::PRG, &data).unwrap();

        let fs = disk.fs().unwrap();
        let root = fs.read_dir(".").unwrap();
        assert_eq!(root.len(), 1);
        assert_eq!(root[0].name, "TESTNAME");
        assert!(root[0].is_dir);

        let files = fs.read_dir("TESTNAME").unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "HELLO.PRG");
        assert!(!files[0].is_dir);
        assert_eq!(files[0].size, data.len() as u64);
        assert_eq!(files[0].modified, SystemTime::UNIX_EPOCH);

        let mut handle = fs.open("TESTNAME/HELLO.PRG").unwrap();
        assert_eq!(handle.metadata().size, 700);
        let mut content = vec![];
        handle.read_to_end(&mut content).unwrap();
        assert_eq!(content, data);
    }

    #[test]
    fn test_small_reads() {
        let mut disk = D64::new("READS", b"01").unwrap();
        let data = (0..600).map(|i| (i * 3) as u8).collect::<Vec<_>>();
        disk.write_file("SEQ", FileType::SEQ, &data).unwrap();
        let fs = disk.fs().unwrap();
        let mut handle = fs.open("READS/SEQ.SEQ").unwrap();
        let mut content = vec![];
        let mut buf = [0u8; 7];
        loop {
            let n = handle.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            content.extend_from_slice(&buf[..n]);
        }
        assert_eq!(content, data);
    }

    #[test]
    fn test_listing_is_sorted() {
        let mut disk = D64::new("SORTED", b"01").unwrap();
        for name in &["ZEBRA", "APPLE", "MANGO"] {
            disk.write_file(name, FileType::SEQ, name.as_bytes()).unwrap();
        }
        let fs = disk.fs().unwrap();
        let names = fs
            .read_dir("SORTED")
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["APPLE.SEQ", "MANGO.SEQ", "ZEBRA.SEQ"]);
    }

    #[test]
    fn test_not_found() {
        let disk = D64::new("EMPTY", b"01").unwrap();
        let fs = disk.fs().unwrap();
        assert!(fs.read_dir("EMPTY").unwrap().is_empty());
        for path in &["nothing", "EMPTY/FILE.PRG", "OTHER/FILE.PRG", "EMPTYX", ""] {
            let e = fs.open(path).err().unwrap();
            assert_eq!(e.kind(), io::ErrorKind::NotFound, "path {:?}", path);
        }
        assert_eq!(fs.read_dir("OTHER").unwrap_err(), DiskError::NotFound);

        let mut handle = fs.open(".").unwrap();
        assert!(handle.metadata().is_dir);
        let mut buf = [0u8; 4];
        assert_eq!(handle.read(&mut buf).unwrap(), 0);
        assert!(fs.open("EMPTY").unwrap().metadata().is_dir);
    }

    #[test]
    fn test_unsupported_types() {
        let mut disk = D64::new("ODD", b"01").unwrap();
        let position = disk.write_file("USER", FileType::SEQ, b"hello").unwrap();
        disk.entry_mut(position).unwrap().set_file_type(FileType::USR);
        let position = disk.write_file("WEIRD", FileType::SEQ, b"hello").unwrap();
        disk.entry_mut(position).unwrap().set_file_type(FileType::Unknown(7));

        let fs = disk.fs().unwrap();
        let files = fs.read_dir("ODD").unwrap();
        let names = files.iter().map(|m| m.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["USER.USR", "WEIRD.???"]);
        assert!(files.iter().all(|m| m.size == 0));

        let mut handle = fs.open("ODD/USER.USR").unwrap();
        let mut content = vec![];
        let e = handle.read_to_end(&mut content).unwrap_err();
        assert_eq!(e, DiskError::UnsupportedFormat);
    }
}
