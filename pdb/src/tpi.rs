//! Type Information Stream (TPI) and ID Information Stream (IPI)
//!
//! Layout of a Type Stream:
//!
//! * `TypeStreamHeader` - specifies lots of important parameters
//! * Type Record Data
//!
//! The TPI (stream 2) holds type records. The IPI (stream 4) has the same layout and holds ID
//! records, such as `LF_FUNC_ID`, which `S_GPROC32_ID` symbols point to. The hash streams that
//! the header points to are not read; records are located by scanning the record data.

use crate::StreamIndexU16;
use anyhow::{Result, bail};
use stacksize_codeview::{TypeIndex, TypesOutcome, parse_types};
use stacksize_reader::{Logger, Reader, SubReader};
use std::mem::size_of;
use tracing::debug;
use zerocopy::{I32, LE, U32};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// The header of the TPI stream.
#[allow(missing_docs)]
#[derive(Clone, Eq, PartialEq, IntoBytes, FromBytes, KnownLayout, Immutable, Unaligned, Debug)]
#[repr(C)]
pub struct TypeStreamHeader {
    pub version: U32<LE>,
    pub header_size: U32<LE>,
    pub type_index_begin: U32<LE>,
    pub type_index_end: U32<LE>,
    /// The number of bytes of type record data following the `TypeStreamHeader`.
    pub type_record_bytes: U32<LE>,

    pub hash_stream_index: StreamIndexU16,
    pub hash_aux_stream_index: StreamIndexU16,

    /// The size of each hash key in the Hash Value Substream. For the current version of TPI,
    /// this value should always be 4.
    pub hash_key_size: U32<LE>,
    pub num_hash_buckets: U32<LE>,
    pub hash_value_buffer_offset: I32<LE>,
    pub hash_value_buffer_length: U32<LE>,

    pub index_offset_buffer_offset: I32<LE>,
    pub index_offset_buffer_length: U32<LE>,

    pub hash_adj_buffer_offset: I32<LE>,
    pub hash_adj_buffer_length: U32<LE>,
}

/// The size of the `TypeStreamHeader` structure.
pub const TPI_STREAM_HEADER_LEN: usize = size_of::<TypeStreamHeader>();

static_assertions::const_assert_eq!(TPI_STREAM_HEADER_LEN, 56);

/// The expected value of `TypeStreamHeader::version`.
pub const TYPE_STREAM_VERSION_2004: u32 = 20040203;

/// The decoded fields of a [`TypeStreamHeader`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TypeStreamInfo {
    #[allow(missing_docs)]
    pub version: u32,
    /// Offset of the type record data within the stream.
    pub header_size: u32,
    /// The type index of the first record.
    pub type_index_begin: TypeIndex,
    /// One past the type index of the last record.
    pub type_index_end: TypeIndex,
    #[allow(missing_docs)]
    pub type_record_bytes: u32,
}

/// A TPI or IPI stream: its header and a reader over its record data.
#[derive(Clone, Debug)]
pub struct TypeStream<B> {
    #[allow(missing_docs)]
    pub info: TypeStreamInfo,
    /// The type records, starting at offset 0.
    pub records: SubReader<B>,
}

impl<B: Reader> TypeStream<B> {
    /// The number of records the header declares.
    pub fn num_types(&self) -> u32 {
        self.info
            .type_index_end
            .0
            .saturating_sub(self.info.type_index_begin.0)
    }

    /// Builds the type table, numbering records from `type_index_begin`.
    pub fn parse_types(&self, logger: &dyn Logger) -> Result<TypesOutcome<SubReader<B>>> {
        parse_types(
            &self.records,
            0,
            self.info.type_index_begin.0,
            logger,
        )
    }
}

/// Reads the header of a TPI or IPI stream.
///
/// Returns `Ok(None)` if the stream is empty, which is how PDBs without an IPI stream look.
pub fn parse_tpi_stream<R: Reader>(stream: &R) -> Result<Option<TypeStream<R::Base>>> {
    if stream.size() == 0 {
        return Ok(None);
    }
    if stream.size() < TPI_STREAM_HEADER_LEN as u64 {
        bail!("The type stream does not contain enough data for a valid header.");
    }

    let header: TypeStreamHeader = stream.read_struct(0)?;
    let info = TypeStreamInfo {
        version: header.version.get(),
        header_size: header.header_size.get(),
        type_index_begin: TypeIndex(header.type_index_begin.get()),
        type_index_end: TypeIndex(header.type_index_end.get()),
        type_record_bytes: header.type_record_bytes.get(),
    };
    debug!(?info, "type stream header");

    if (info.header_size as usize) < TPI_STREAM_HEADER_LEN {
        bail!(
            "The type stream header size ({}) is smaller than the header.",
            info.header_size
        );
    }
    if info.version != TYPE_STREAM_VERSION_2004 {
        debug!(version = info.version, "unexpected type stream version");
    }

    let records = stream.sub_view(
        info.header_size as u64,
        Some(info.type_record_bytes as u64),
    );
    if records.size() != info.type_record_bytes as u64 {
        bail!("The type record data extends beyond the end of the type stream.");
    }

    Ok(Some(TypeStream { info, records }))
}
