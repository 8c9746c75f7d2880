//! Error types for shared memory operations

use thiserror::Error;

/// Errors that can occur during shared memory operations
#[derive(Error, Debug)]
pub enum ShmError {
    /// Segment or region not found
    #[error("Segment not found: {name}")]
    NotFound {
        /// Segment path or region name
        name: String,
    },

    /// Permission denied
    #[error("Permission denied accessing segment: {name}")]
    PermissionDenied {
        /// Segment path
        name: String,
    },

    /// Existing segment or region has a different size than requested
    #[error("Size mismatch for {name}: expected {expected} bytes, found {found}")]
    SizeMismatch {
        /// Segment path or region name
        name: String,
        /// Size requested by this process
        expected: usize,
        /// Size recorded by the creator
        found: usize,
    },

    /// Not enough space left in the segment for a new region
    #[error("Out of shared memory for region {name}: requested {requested} bytes, {available} available")]
    OutOfSpace {
        /// Region name
        name: String,
        /// Requested size in bytes
        requested: usize,
        /// Bytes left in the segment
        available: usize,
    },

    /// Region index has no free entry
    #[error("Region index full, cannot register {name}")]
    IndexFull {
        /// Region name
        name: String,
    },

    /// Region name empty, too long or containing NUL
    #[error("Invalid region name: {name:?}")]
    InvalidName {
        /// Offending name
        name: String,
    },

    /// Segment header magic does not match
    #[error("Segment corrupted or not a collie segment: {path}")]
    Corrupted {
        /// Segment path
        path: String,
    },

    /// Size computation overflowed `usize`
    #[error("Requested shared memory size overflows usize")]
    SizeOverflow,

    /// Memory alignment error
    #[error("Memory alignment error: address {address:#x} not aligned to {alignment}")]
    AlignmentError {
        /// Memory address
        address: usize,
        /// Required alignment
        alignment: usize,
    },

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },

    /// Nix system call error
    #[error("System call error: {source}")]
    Nix {
        /// Source nix error
        #[from]
        source: nix::Error,
    },
}

/// Result type for shared memory operations
pub type ShmResult<T> = Result<T, ShmError>;

impl ShmError {
    /// Map an `open(2)` failure on `path` to the matching variant.
    pub(crate) fn from_open(path: &std::path::Path, source: std::io::Error) -> Self {
        let name = path.display().to_string();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { name },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { name },
            _ => Self::Io { source },
        }
    }
}
