//! Maps stream offsets to file offsets.

/// Maps byte ranges within a stream to byte ranges within the MSF file.
pub(crate) struct BlockMapper<'a> {
    blocks: &'a [u32],
    block_shift: u32,
    stream_size: u64,
}

impl<'a> BlockMapper<'a> {
    pub(crate) fn new(blocks: &'a [u32], block_shift: u32, stream_size: u64) -> Self {
        Self {
            blocks,
            block_shift,
            stream_size,
        }
    }

    /// Maps a single stream offset to a file offset.
    pub(crate) fn map_offset(&self, pos: u64) -> Option<u64> {
        let block = *self.blocks.get((pos >> self.block_shift) as usize)?;
        let within = crate::offset_within_block(pos, self.block_shift);
        Some(((block as u64) << self.block_shift) + within)
    }

    /// Maps a byte offset and a length within a stream to a contiguous run of bytes within the MSF
    /// file.
    ///
    /// Returns `(file_offset, transfer_len)` where `transfer_len` is the length of the longest
    /// prefix of the requested range that is contiguous in the file. Adjacent blocks that are also
    /// adjacent in the file are merged into one run.
    ///
    /// Returns `None` if `pos` is at or past the end of the stream, or `bytes_wanted` is zero.
    pub(crate) fn map(&self, pos: u64, bytes_wanted: u64) -> Option<(u64, u64)> {
        if pos >= self.stream_size {
            return None;
        }
        let max_transfer = (self.stream_size - pos).min(bytes_wanted);
        if max_transfer == 0 {
            return None;
        }

        let block_size = 1u64 << self.block_shift;
        let first_index = (pos >> self.block_shift) as usize;
        let file_offset = self.map_offset(pos)?;

        let mut transfer = block_size - crate::offset_within_block(pos, self.block_shift);
        let mut prev_block = self.blocks[first_index];
        for &block in &self.blocks[first_index + 1..] {
            if transfer >= max_transfer || block != prev_block.wrapping_add(1) {
                break;
            }
            transfer += block_size;
            prev_block = block;
        }

        Some((file_offset, transfer.min(max_transfer)))
    }
}
