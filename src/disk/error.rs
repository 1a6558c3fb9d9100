use std::io;

/// Errors that can be returned from disk image operations.  These are
/// generally converted into `io::Error`.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum DiskError {
    /// Unknown error
    #[error("unknown error")]
    Unknown,
    /// Malformed track/sector, or one outside the disk geometry
    #[error("bad track or sector")]
    InvalidAddress,
    /// BAM entry lookup outside the representable track/sector range
    #[error("BAM entry out of range")]
    OutOfRange,
    /// Double allocation or double free of the same block
    #[error("BAM conflict: block is already in the requested state")]
    Conflict,
    /// The BAM free count for the track is already zero
    #[error("no free sectors remain on track")]
    TrackFull,
    /// The allocator has exhausted every track permitted by its policy
    #[error("disk is full")]
    DiskFull,
    /// No room left on the directory track for another directory block
    #[error("no room left in directory track")]
    DirectoryFull,
    /// Payload larger than the single block which must hold it
    #[error("payload exceeds block capacity")]
    CapacityExceeded,
    /// USR/REL files, or an unrecognized file type byte
    #[error("unsupported file format")]
    UnsupportedFormat,
    /// File or path not found
    #[error("file not found")]
    NotFound,
    /// A file with the specified filename already exists
    #[error("a file with the specified filename already exists")]
    FileExists,
    /// The image buffer is not the size of a 35-track disk
    #[error("invalid layout")]
    InvalidLayout,
    /// Name exceeds the width of its field
    #[error("name exceeds maximum length")]
    NameTooLong,
    /// A disk id must be exactly two bytes
    #[error("disk id must be exactly two bytes")]
    InvalidId,
    /// The string ends with the padding byte and could not be recovered after padding
    #[error("string ends with the padding byte")]
    AmbiguousPadding,
    /// A character outside U+0000..U+00FF, which has no byte on disk
    #[error("character cannot be stored on disk")]
    InvalidCharacter,
    /// A chain visits the same block twice
    #[error("chain loop detected")]
    ChainLoop,
    /// A program file must begin with its two-byte load address
    #[error("program is missing its load address")]
    ShortProgram,
    /// Attempt to modify an image that was opened read-only
    #[error("disk image is read-only")]
    ReadOnly,
}

impl From<DiskError> for io::Error {
    fn from(error: DiskError) -> io::Error {
        use self::DiskError::*;
        use std::io::ErrorKind::*;
        match error {
            Unknown => io::Error::new(Other, error),
            InvalidAddress => io::Error::new(InvalidInput, error),
            OutOfRange => io::Error::new(InvalidInput, error),
            Conflict => io::Error::new(InvalidInput, error),
            TrackFull => io::Error::new(Other, error),
            DiskFull => io::Error::new(Other, error),
            DirectoryFull => io::Error::new(Other, error),
            CapacityExceeded => io::Error::new(InvalidInput, error),
            UnsupportedFormat => io::Error::new(InvalidData, error),
            self::DiskError::NotFound => io::Error::new(io::ErrorKind::NotFound, error),
            FileExists => io::Error::new(InvalidInput, error),
            InvalidLayout => io::Error::new(InvalidData, error),
            NameTooLong => io::Error::new(InvalidInput, error),
            InvalidId => io::Error::new(InvalidInput, error),
            AmbiguousPadding => io::Error::new(InvalidInput, error),
            InvalidCharacter => io::Error::new(InvalidInput, error),
            ChainLoop => io::Error::new(InvalidData, error),
            ShortProgram => io::Error::new(InvalidInput, error),
            ReadOnly => io::Error::new(PermissionDenied, error),
        }
    }
}

impl From<io::Error> for DiskError {
    fn from(error: io::Error) -> DiskError {
        DiskError::from_io_error(&error).unwrap_or(DiskError::Unknown)
    }
}

impl DiskError {
    /// If the provided `io::Error` contains a `DiskError`, return the
    /// underlying `DiskError`.  If not, return None.
    pub fn from_io_error(error: &io::Error) -> Option<DiskError> {
        error
            .get_ref()
            .and_then(|e| e.downcast_ref::<DiskError>())
            .cloned()
    }
}

impl PartialEq<io::Error> for DiskError {
    fn eq(&self, other: &io::Error) -> bool {
        matches!(DiskError::from_io_error(other), Some(ref e) if e == self)
    }
}

impl PartialEq<DiskError> for io::Error {
    fn eq(&self, other: &DiskError) -> bool {
        matches!(DiskError::from_io_error(self), Some(ref e) if e == other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_round_trip() {
        let e: io::Error = DiskError::Conflict.into();
        assert_eq!(e.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(DiskError::from_io_error(&e), Some(DiskError::Conflict));
        assert!(e == DiskError::Conflict);
        assert!(e != DiskError::DiskFull);

        let e: io::Error = DiskError::NotFound.into();
        assert_eq!(e.kind(), io::ErrorKind::NotFound);

        let plain = io::Error::new(io::ErrorKind::Other, "plain");
        assert_eq!(DiskError::from_io_error(&plain), None);
        assert_eq!(DiskError::from(plain), DiskError::Unknown);
    }
}
