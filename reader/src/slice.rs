//! Readers over bytes that are entirely in memory.

use crate::{Location, ReadError, ReadResult, Reader, SubReader};
use std::sync::Arc;

/// A reader over a borrowed byte slice. Offsets are file offsets.
#[derive(Copy, Clone, Debug)]
pub struct SliceReader<'a> {
    data: &'a [u8],
}

impl<'a> SliceReader<'a> {
    /// Wraps `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

/// A reader over an owned, shared buffer. Offsets are file offsets.
#[derive(Clone, Debug)]
pub struct BufferReader {
    data: Arc<[u8]>,
}

impl BufferReader {
    /// Takes ownership of `data`.
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }

    /// The bytes behind this reader.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

fn range(data: &[u8], offset: u64, len: u64) -> ReadResult<&[u8]> {
    let size = data.len() as u64;
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(&data[offset as usize..end as usize]),
        _ => Err(ReadError::OutOfBounds {
            location: Location::at_file_offset(offset),
            offset,
            len,
            size,
        }),
    }
}

fn find(data: &[u8], value: u8, from: u64, to: Option<u64>) -> ReadResult<Option<u64>> {
    let to = to.unwrap_or(data.len() as u64);
    let haystack = range(data, from, to.saturating_sub(from))?;
    Ok(haystack
        .iter()
        .position(|&b| b == value)
        .map(|i| from + i as u64))
}

macro_rules! impl_memory_reader {
    ($t:ty, $data:ident => $bytes:expr) => {
        impl Reader for $t {
            type Base = Self;

            fn size(&self) -> u64 {
                let $data = self;
                $bytes.len() as u64
            }

            fn locate(&self, offset: u64) -> Location {
                Location::at_file_offset(offset)
            }

            fn u8(&self, offset: u64) -> ReadResult<u8> {
                let $data = self;
                Ok(range($bytes, offset, 1)?[0])
            }

            fn u16(&self, offset: u64) -> ReadResult<u16> {
                let $data = self;
                let b = range($bytes, offset, 2)?;
                Ok(u16::from_le_bytes([b[0], b[1]]))
            }

            fn u32(&self, offset: u64) -> ReadResult<u32> {
                let $data = self;
                let b = range($bytes, offset, 4)?;
                Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            }

            fn find_byte(&self, value: u8, from: u64, to: Option<u64>) -> ReadResult<Option<u64>> {
                let $data = self;
                find($bytes, value, from, to)
            }

            fn enumerate_bytes(
                &self,
                offset: u64,
                len: u64,
                f: &mut dyn FnMut(&[u8]),
            ) -> ReadResult<()> {
                let $data = self;
                f(range($bytes, offset, len)?);
                Ok(())
            }

            fn sub_view(&self, offset: u64, len: Option<u64>) -> SubReader<Self> {
                SubReader::new(self.clone(), offset, len)
            }
        }
    };
}

impl_memory_reader!(SliceReader<'_>, r => r.data);
impl_memory_reader!(BufferReader, r => &r.data[..]);
