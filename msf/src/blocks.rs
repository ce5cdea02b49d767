use crate::pages::BlockMapper;
use stacksize_reader::{Location, ReadError, ReadResult, Reader, StreamId, SubReader};
use std::rc::Rc;

/// A stream within an MSF file, read through its block list.
///
/// Stream offset `o` lives in block `blocks[o / block_size]` at offset `o % block_size`. Reads
/// that fit within one block go straight to the base reader. Byte, string and search reads that
/// span blocks are split per block. Fixed-width integer reads that span blocks fail with
/// [`ReadError::CrossBlockRead`].
#[derive(Clone)]
pub struct BlocksReader<R> {
    base: R,
    blocks: Rc<[u32]>,
    block_shift: u32,
    size: u64,
    stream: StreamId,
}

impl<R: Reader> BlocksReader<R> {
    /// Creates a reader for a stream of `size` bytes stored in `blocks`.
    pub fn new(base: R, blocks: Rc<[u32]>, block_shift: u32, size: u32, stream: StreamId) -> Self {
        Self {
            base,
            blocks,
            block_shift,
            size: size as u64,
            stream,
        }
    }

    /// The blocks that hold this stream, in stream order.
    pub fn block_indexes(&self) -> &[u32] {
        &self.blocks
    }

    /// The reader over the whole MSF file.
    pub fn base(&self) -> &R {
        &self.base
    }

    /// Which stream this is.
    pub fn stream(&self) -> StreamId {
        self.stream
    }

    fn mapper(&self) -> BlockMapper<'_> {
        BlockMapper::new(&self.blocks, self.block_shift, self.size)
    }

    /// Maps a fixed-width read to a file offset. The read must not leave its block.
    fn map_fixed(&self, offset: u64, len: u64) -> ReadResult<u64> {
        self.check_range(offset, len)?;
        if offset >> self.block_shift != (offset + len - 1) >> self.block_shift {
            return Err(ReadError::CrossBlockRead {
                location: self.locate(offset),
                len,
            });
        }
        self.mapper().map_offset(offset).ok_or_else(|| self.bad_block(offset))
    }

    fn bad_block(&self, offset: u64) -> ReadError {
        ReadError::OutOfBounds {
            location: self.locate(offset),
            offset,
            len: 0,
            size: self.size,
        }
    }
}

impl<R: Reader> Reader for BlocksReader<R> {
    type Base = Self;

    fn size(&self) -> u64 {
        self.size
    }

    fn locate(&self, offset: u64) -> Location {
        let file_offset = self
            .mapper()
            .map_offset(offset)
            .and_then(|o| self.base.locate(o).file_offset);
        Location {
            file_offset,
            stream: Some((self.stream, offset)),
        }
    }

    fn u8(&self, offset: u64) -> ReadResult<u8> {
        self.base.u8(self.map_fixed(offset, 1)?)
    }

    fn u16(&self, offset: u64) -> ReadResult<u16> {
        self.base.u16(self.map_fixed(offset, 2)?)
    }

    fn u32(&self, offset: u64) -> ReadResult<u32> {
        self.base.u32(self.map_fixed(offset, 4)?)
    }

    fn find_byte(&self, value: u8, from: u64, to: Option<u64>) -> ReadResult<Option<u64>> {
        let to = to.unwrap_or(self.size);
        self.check_range(from, to.saturating_sub(from))?;

        let mapper = self.mapper();
        let mut pos = from;
        while pos < to {
            let Some((file_offset, run)) = mapper.map(pos, to - pos) else {
                return Err(self.bad_block(pos));
            };
            if let Some(found) = self
                .base
                .find_byte(value, file_offset, Some(file_offset + run))?
            {
                return Ok(Some(pos + (found - file_offset)));
            }
            pos += run;
        }
        Ok(None)
    }

    fn enumerate_bytes(&self, offset: u64, len: u64, f: &mut dyn FnMut(&[u8])) -> ReadResult<()> {
        self.check_range(offset, len)?;

        let mapper = self.mapper();
        let end = offset + len;
        let mut pos = offset;
        while pos < end {
            let Some((file_offset, run)) = mapper.map(pos, end - pos) else {
                return Err(self.bad_block(pos));
            };
            self.base.enumerate_bytes(file_offset, run, f)?;
            pos += run;
        }
        Ok(())
    }

    fn sub_view(&self, offset: u64, len: Option<u64>) -> SubReader<Self> {
        SubReader::new(self.clone(), offset, len)
    }
}

impl<R> std::fmt::Debug for BlocksReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlocksReader")
            .field("stream", &self.stream)
            .field("size", &self.size)
            .field("blocks", &self.blocks.len())
            .finish()
    }
}
