//! Random-access byte readers for debug-information containers.
//!
//! Every decoder in this workspace is written against the [`Reader`] trait. A `Reader` is a
//! bounded window over some byte source: an in-memory buffer, a sub-range of another reader, a
//! block-indirected MSF stream, or a [`PagedReader`] whose bytes are fetched on demand from a
//! [`Loader`].
//!
//! Reads are synchronous. When a [`PagedReader`] is asked for bytes that are not resident yet, the
//! read fails with [`ReadError::NotLoaded`] (a "fault") instead of blocking. [`with_load_scope`]
//! turns such a synchronous computation into an asynchronous one: it runs the computation, fetches
//! whatever range faulted, and runs the computation again from the start until it completes.
//!
//! # References
//! * <https://github.com/microsoft/microsoft-pdb>

#![forbid(unsafe_code)]
#![forbid(unused_must_use)]
#![warn(missing_docs)]
#![allow(clippy::len_without_is_empty)]

mod error;
mod guid;
mod loader;
mod location;
mod logger;
mod paged;
mod scope;
mod slice;
mod sub;

#[cfg(test)]
mod tests;

pub use error::{ReadError, is_fault, mismatch_on_out_of_bounds};
pub use guid::Guid;
pub use loader::{BufferLoader, FileLoader, Loader};
pub use location::{Location, StreamId};
pub use logger::{CapturingLogger, DeferredLogger, LogEntry, Logger, NullLogger, TracingLogger};
pub use paged::{DEFAULT_CHUNK_SHIFT, PagedReader};
pub use scope::with_load_scope;
pub use slice::{BufferReader, SliceReader};
pub use sub::SubReader;

use bstr::ByteSlice;
use zerocopy::{FromBytes, IntoBytes};

/// Result type for byte-level reads.
pub type ReadResult<T> = Result<T, ReadError>;

/// A bounded, random-access view of bytes.
///
/// Offsets are relative to the start of the view. All reads are bounds-checked against
/// [`Reader::size`] before the underlying source is touched, so an out-of-range read is always an
/// [`ReadError::OutOfBounds`] error and never a fault.
///
/// Implementations provide the small set of primitives; the string and copy helpers are built on
/// top of them.
pub trait Reader: Clone {
    /// The reader type that sub-views are built over. Sub-views of sub-views collapse to a single
    /// level of indirection over this type.
    type Base: Reader;

    /// The size of this view in bytes.
    fn size(&self) -> u64;

    /// Describes where `offset` lives in the underlying file, for diagnostics.
    fn locate(&self, offset: u64) -> Location;

    /// Reads one byte.
    fn u8(&self, offset: u64) -> ReadResult<u8>;

    /// Reads a little-endian `u16`.
    fn u16(&self, offset: u64) -> ReadResult<u16>;

    /// Reads a little-endian `u32`.
    fn u32(&self, offset: u64) -> ReadResult<u32>;

    /// Finds the first byte equal to `value` in `from..to`. If `to` is `None`, the search runs to
    /// the end of the view.
    fn find_byte(&self, value: u8, from: u64, to: Option<u64>) -> ReadResult<Option<u64>>;

    /// Calls `f` with consecutive slices that together cover `offset..offset + len`.
    fn enumerate_bytes(&self, offset: u64, len: u64, f: &mut dyn FnMut(&[u8])) -> ReadResult<()>;

    /// Creates a sub-view starting at `offset`. The length is clamped to the bytes remaining in
    /// this view; `None` means "everything after `offset`".
    fn sub_view(&self, offset: u64, len: Option<u64>) -> SubReader<Self::Base>;

    /// Checks that `offset..offset + len` lies within this view.
    fn check_range(&self, offset: u64, len: u64) -> ReadResult<()> {
        let size = self.size();
        match offset.checked_add(len) {
            Some(end) if end <= size => Ok(()),
            _ => Err(ReadError::OutOfBounds {
                location: self.locate(offset),
                offset,
                len,
                size,
            }),
        }
    }

    /// Reads a little-endian `u64`.
    fn u64(&self, offset: u64) -> ReadResult<u64> {
        let mut buf = [0u8; 8];
        self.copy_bytes_into(offset, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Copies bytes into `out`, which determines the length.
    fn copy_bytes_into(&self, offset: u64, out: &mut [u8]) -> ReadResult<()> {
        let mut pos = 0;
        self.enumerate_bytes(offset, out.len() as u64, &mut |piece| {
            out[pos..pos + piece.len()].copy_from_slice(piece);
            pos += piece.len();
        })
    }

    /// Copies `len` bytes into a new vector.
    fn copy_bytes(&self, offset: u64, len: u64) -> ReadResult<Vec<u8>> {
        self.check_range(offset, len)?;
        let mut out = Vec::with_capacity(len as usize);
        self.enumerate_bytes(offset, len, &mut |piece| out.extend_from_slice(piece))?;
        Ok(out)
    }

    /// Decodes `len` bytes as UTF-8. Invalid sequences are replaced rather than rejected.
    fn read_utf8(&self, offset: u64, len: u64) -> ReadResult<String> {
        let bytes = self.copy_bytes(offset, len)?;
        Ok(bytes.to_str_lossy().into_owned())
    }

    /// Decodes a fixed-width, NUL-padded string field.
    fn read_utf8_fixed(&self, offset: u64, len: u64) -> ReadResult<String> {
        self.check_range(offset, len)?;
        let len = match self.find_byte(0, offset, Some(offset + len))? {
            Some(nul) => nul - offset,
            None => len,
        };
        self.read_utf8(offset, len)
    }

    /// Decodes a NUL-terminated string. The NUL is required.
    fn read_utf8_c_string(&self, offset: u64) -> ReadResult<String> {
        let Some(nul) = self.find_byte(0, offset, None)? else {
            return Err(ReadError::MissingNulTerminator {
                location: self.locate(offset),
            });
        };
        self.read_utf8(offset, nul - offset)
    }

    /// Reads a fixed-layout structure. `T` should use unaligned little-endian field types.
    fn read_struct<T: FromBytes + IntoBytes>(&self, offset: u64) -> ReadResult<T> {
        let mut value = T::new_zeroed();
        self.copy_bytes_into(offset, value.as_mut_bytes())?;
        Ok(value)
    }

    /// Reads a 16-byte GUID in the Windows mixed-endian layout.
    fn read_guid(&self, offset: u64) -> ReadResult<Guid> {
        let mut bytes = [0u8; 16];
        self.copy_bytes_into(offset, &mut bytes)?;
        Ok(Guid::from_bytes_le(&bytes))
    }
}
