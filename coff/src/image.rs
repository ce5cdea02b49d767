//! File headers, data directories and debug directory entries.
//!
//! # References
//! * <https://learn.microsoft.com/en-us/windows/win32/debug/pe-format>

use core::mem::size_of;
use static_assertions::const_assert_eq;
use zerocopy::{LE, U16, U32};
use zerocopy_derive::*;

/// `MZ`, at offset 0 of a PE image.
pub const IMAGE_DOS_SIGNATURE: u16 = 0x5a4d;

/// Offset of the field holding the file offset of the PE signature.
pub const IMAGE_DOS_LFANEW_OFFSET: u64 = 0x3c;

/// `PE\0\0`
pub const IMAGE_NT_SIGNATURE: u32 = 0x0000_4550;

/// x64. This is the only machine whose stack layout we understand.
pub const IMAGE_FILE_MACHINE_AMD64: u16 = 0x8664;

pub const IMAGE_NT_OPTIONAL_HDR32_MAGIC: u16 = 0x10b;
pub const IMAGE_NT_OPTIONAL_HDR64_MAGIC: u16 = 0x20b;

/// Offset of the data directory array within a 32-bit optional header.
pub const IMAGE_OPTIONAL_HEADER32_DATA_DIRECTORY_OFFSET: u64 = 96;
/// Offset of the data directory array within a 64-bit optional header.
pub const IMAGE_OPTIONAL_HEADER64_DATA_DIRECTORY_OFFSET: u64 = 112;

pub const IMAGE_DIRECTORY_ENTRY_DEBUG: u64 = 6;

pub const IMAGE_DEBUG_TYPE_CODEVIEW: u32 = 2;

/// `RSDS`, the signature of a CodeView 7.0 debug entry that names an external PDB.
pub const CV_SIGNATURE_RSDS: u32 = 0x5344_5352;

#[repr(C)]
#[derive(
    Clone,
    Default,
    Debug,
    Eq,
    PartialEq,
    IntoBytes,
    FromBytes,
    Immutable,
    KnownLayout,
    Unaligned,
)]
pub struct IMAGE_FILE_HEADER {
    pub machine: U16<LE>,
    pub number_of_sections: U16<LE>,
    pub time_date_stamp: U32<LE>,
    pub pointer_to_symbol_table: U32<LE>,
    pub number_of_symbols: U32<LE>,
    pub size_of_optional_header: U16<LE>,
    pub characteristics: U16<LE>,
}

pub const IMAGE_SIZEOF_FILE_HEADER: usize = 20;
const_assert_eq!(size_of::<IMAGE_FILE_HEADER>(), IMAGE_SIZEOF_FILE_HEADER);

#[repr(C)]
#[derive(
    Clone,
    Default,
    Debug,
    Eq,
    PartialEq,
    IntoBytes,
    FromBytes,
    Immutable,
    KnownLayout,
    Unaligned,
)]
pub struct IMAGE_DATA_DIRECTORY {
    pub virtual_address: U32<LE>,
    pub size: U32<LE>,
}

const_assert_eq!(size_of::<IMAGE_DATA_DIRECTORY>(), 8);

#[repr(C)]
#[derive(
    Clone,
    Default,
    Debug,
    Eq,
    PartialEq,
    IntoBytes,
    FromBytes,
    Immutable,
    KnownLayout,
    Unaligned,
)]
pub struct IMAGE_DEBUG_DIRECTORY {
    pub characteristics: U32<LE>,
    pub time_date_stamp: U32<LE>,
    pub major_version: U16<LE>,
    pub minor_version: U16<LE>,
    pub type_: U32<LE>,
    pub size_of_data: U32<LE>,
    pub address_of_raw_data: U32<LE>,
    pub pointer_to_raw_data: U32<LE>,
}

pub const IMAGE_SIZEOF_DEBUG_DIRECTORY: usize = 28;
const_assert_eq!(size_of::<IMAGE_DEBUG_DIRECTORY>(), IMAGE_SIZEOF_DEBUG_DIRECTORY);
