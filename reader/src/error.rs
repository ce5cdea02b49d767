use crate::Location;
use std::fmt;

/// Errors produced by byte-level reads.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReadError {
    /// The bytes exist but have not been fetched yet. The offset is relative to the start of the
    /// paged source identified by `source`.
    ///
    /// This is a signal for [`crate::with_load_scope`], not a failure.
    NotLoaded {
        /// Identifies the [`crate::PagedReader`] that faulted.
        source: u64,
        /// Offset of the first byte needed.
        offset: u64,
        /// Number of bytes needed.
        len: u64,
    },

    /// The read extends past the end of the view.
    OutOfBounds {
        /// Where the read started.
        location: Location,
        /// Offset of the read, relative to the view.
        offset: u64,
        /// Length of the read.
        len: u64,
        /// Size of the view.
        size: u64,
    },

    /// A NUL-terminated string ran to the end of the view.
    MissingNulTerminator {
        /// Where the string started.
        location: Location,
    },

    /// A fixed-width integer straddles two MSF blocks. Byte and string reads are stitched across
    /// blocks; integer reads are not.
    CrossBlockRead {
        /// Where the read started.
        location: Location,
        /// Length of the read.
        len: u64,
    },
}

impl std::error::Error for ReadError {}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotLoaded { offset, len, .. } => {
                write!(f, "data not loaded: {len} bytes at offset 0x{offset:x}")
            }
            Self::OutOfBounds {
                location,
                offset,
                len,
                size,
            } => write!(
                f,
                "read of {len} bytes at offset 0x{offset:x} is out of bounds (size 0x{size:x}) at {location}"
            ),
            Self::MissingNulTerminator { location } => {
                write!(f, "string is missing its NUL terminator at {location}")
            }
            Self::CrossBlockRead { location, len } => write!(
                f,
                "not yet implemented: {len}-byte integer read spanning MSF blocks at {location}"
            ),
        }
    }
}

/// Returns `true` if `e` is (or wraps) a missing-data fault. Code that recovers from read errors
/// must let faults through, or the load scope will never fetch the missing bytes.
pub fn is_fault(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<ReadError>(),
        Some(ReadError::NotLoaded { .. })
    )
}

/// Maps an out-of-bounds read to `Ok(None)`. Used while probing magic numbers, where a file that is
/// too small to hold the header is simply a different format.
pub fn mismatch_on_out_of_bounds<T>(r: Result<T, ReadError>) -> Result<Option<T>, ReadError> {
    match r {
        Ok(value) => Ok(Some(value)),
        Err(ReadError::OutOfBounds { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}
