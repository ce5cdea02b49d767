//! Reads Multi-Stream Files (MSF). MSF is the underlying container format used by Program
//! Database (PDB) files.
//!
//! MSF files contain a set of numbered _streams_. Each stream is like a file; a stream is a
//! sequence of bytes.
//!
//! The bytes stored within a single stream are usually not stored sequentially on disk. The file
//! is divided into fixed-size _blocks_ (also called pages), and each stream is described by a list
//! of the blocks that hold its data. The list of streams and their blocks is itself stored in
//! blocks; that list is the _stream directory_.
//!
//! This crate only reads. It presents each stream as a [`BlocksReader`], a [`Reader`] whose
//! offsets are translated through the stream's block list. Because it is built on [`Reader`], it
//! works over partially-loaded files.
//!
//! # References
//! * <https://llvm.org/docs/PDB/index.html>
//! * <https://llvm.org/docs/PDB/MsfFile.html>
//! * <https://github.com/microsoft/microsoft-pdb>

#![forbid(unused_must_use)]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod blocks;
mod pages;


pub use blocks::BlocksReader;

use anyhow::{Result, bail};
use stacksize_reader::{Reader, StreamId, mismatch_on_out_of_bounds};
use std::mem::size_of;
use std::rc::Rc;
use tracing::{debug, trace};
use zerocopy::{LE, U32};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// The value of `magic` for "big" MSF files.
pub const MSF_BIG_MAGIC: [u8; 32] = *b"Microsoft C/C++ MSF 7.00\r\n\x1a\x44\x53\x00\x00\x00";

/// This size is used to mark a stream as "invalid". We treat such streams as empty.
pub const NIL_STREAM_SIZE: u32 = 0xffff_ffff;

/// The header of the PDB/MSF file. This is at file offset 0.
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
#[allow(dead_code)]
struct MsfHeader {
    /// Identifies this file as a PDB.
    magic: [u8; 32],

    /// The size of each block, in bytes.
    block_size: U32<LE>,

    /// Block number of the active FPM.
    active_fpm: U32<LE>,

    /// The number of blocks in this MSF file.
    num_blocks: U32<LE>,

    /// Size of the Stream Directory, in bytes.
    stream_dir_size: U32<LE>,

    /// Only used by the pre-"Big MSF" encoding.
    stream_dir_small_page_map: U32<LE>,

    /// The block which contains the Stream Directory Map: the list of blocks which contain the
    /// Stream Directory.
    stream_dir_map_block: U32<LE>,
}

static_assertions::const_assert_eq!(size_of::<MsfHeader>(), 0x38);

/// The fixed parameters of an MSF file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SuperBlock {
    /// Size in bytes of each block. Always a power of two.
    pub block_size: u32,
    /// The number of blocks in the file.
    pub block_count: u32,
    /// Size of the stream directory, in bytes.
    pub directory_size: u32,
    /// The block that lists the blocks of the stream directory.
    pub directory_map_block: u32,
}

impl SuperBlock {
    /// `log2(block_size)`
    pub fn block_shift(&self) -> u32 {
        self.block_size.trailing_zeros()
    }
}

/// Converts a block number to a file offset.
pub fn block_to_offset(block: u32, block_shift: u32) -> u64 {
    (block as u64) << block_shift
}

/// Gets the byte offset within a block, for a given offset within a stream.
pub fn offset_within_block(offset: u64, block_shift: u32) -> u64 {
    offset & ((1u64 << block_shift) - 1)
}

/// The number of blocks needed to hold `size` bytes.
pub fn num_blocks_for_size(size: u32, block_shift: u32) -> u32 {
    ((size as u64 + (1u64 << block_shift) - 1) >> block_shift) as u32
}

/// Reads the MSF file header.
///
/// Returns `Ok(None)` if the file does not start with the MSF magic, which means it is some other
/// kind of file. A file too short to hold the magic is also "some other kind of file".
pub fn parse_superblock<R: Reader>(reader: &R) -> Result<Option<SuperBlock>> {
    let Some(header) = mismatch_on_out_of_bounds(reader.read_struct::<MsfHeader>(0))? else {
        return Ok(None);
    };
    if header.magic != MSF_BIG_MAGIC {
        return Ok(None);
    }

    let block_size = header.block_size.get();
    if !block_size.is_power_of_two() {
        bail!("The MSF header specifies a block size ({block_size}) that is not a power of two.");
    }

    let sb = SuperBlock {
        block_size,
        block_count: header.num_blocks.get(),
        directory_size: header.stream_dir_size.get(),
        directory_map_block: header.stream_dir_map_block.get(),
    };
    debug!(?sb, "MSF superblock");
    Ok(Some(sb))
}

/// Reads the stream directory and returns one reader per stream, indexed by stream number.
pub fn parse_stream_directory<R: Reader>(
    reader: &R,
    sb: &SuperBlock,
) -> Result<Vec<BlocksReader<R>>> {
    let shift = sb.block_shift();

    if sb.directory_size as u64 > reader.size() {
        bail!(
            "The stream directory size ({}) is larger than the file ({}).",
            sb.directory_size,
            reader.size()
        );
    }

    let num_dir_blocks = num_blocks_for_size(sb.directory_size, shift);
    let dir_map_offset = block_to_offset(sb.directory_map_block, shift);
    reader.check_range(dir_map_offset, num_dir_blocks as u64 * 4)?;
    let mut dir_blocks = Vec::with_capacity(num_dir_blocks as usize);
    for i in 0..num_dir_blocks as u64 {
        dir_blocks.push(reader.u32(dir_map_offset + i * 4)?);
    }

    let dir = BlocksReader::new(
        reader.clone(),
        dir_blocks.into(),
        shift,
        sb.directory_size,
        StreamId::Directory,
    );

    let num_streams = dir.u32(0)?;
    if num_streams as u64 * 4 + 4 > dir.size() {
        bail!("The stream directory is too small for {num_streams} streams.");
    }

    let mut sizes = Vec::with_capacity(num_streams as usize);
    for i in 0..num_streams as u64 {
        sizes.push(dir.u32(4 + i * 4)?);
    }

    let mut pos = 4 + num_streams as u64 * 4;
    let mut streams = Vec::with_capacity(num_streams as usize);
    for (i, &declared_size) in sizes.iter().enumerate() {
        let size = if declared_size == NIL_STREAM_SIZE {
            0
        } else {
            declared_size
        };

        let num_blocks = num_blocks_for_size(size, shift);
        if pos + num_blocks as u64 * 4 > dir.size() {
            bail!("Stream {i} needs {num_blocks} blocks, but the stream directory ends first.");
        }
        let mut blocks = Vec::with_capacity(num_blocks as usize);
        for _ in 0..num_blocks {
            blocks.push(dir.u32(pos)?);
            pos += 4;
        }

        trace!(stream = i, size, num_blocks, "stream");
        streams.push(BlocksReader::new(
            reader.clone(),
            Rc::from(blocks),
            shift,
            size,
            StreamId::Index(i as u32),
        ));
    }

    Ok(streams)
}
