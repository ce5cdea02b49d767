//! CodeView decoding for stack size analysis
//!
//! CodeView is the debugging format used for PE/COFF images on Windows. Type records live in the
//! TPI and IPI streams of a PDB, or in the `.debug$T` section of an object file. Symbol records
//! live in PDB module streams, or in the `.debug$S` sections of an object file.
//!
//! This crate decodes just enough of both to find functions, their frame sizes and locals, and to
//! compute how much stack a caller reserves when calling a function under the x64 Windows ABI.
//!
//! All decoding goes through [`Reader`](stacksize_reader::Reader), so it works over partially
//! loaded files inside a load scope.
//!
//! # References
//!
//! * [CodeView Symbols](https://llvm.org/docs/PDB/CodeViewSymbols.html)
//! * [CodeView Type Records](https://llvm.org/docs/PDB/CodeViewTypes.html)
//! * [`cvinfo.h`](https://github.com/microsoft/microsoft-pdb/blob/805655a28bd8198004be2ac27e6e0290121a5e89/include/cvinfo.h)

#![forbid(unsafe_code)]
#![forbid(unused_must_use)]
#![warn(missing_docs)]

pub mod parser;
pub mod syms;
pub mod types;

pub use syms::{Function, Local, scan_functions, scan_locals, scan_module_symbols};
pub use types::{
    Type, TypeIndex, TypeRecord, TypeServerRef, TypeTable, TypesOutcome, parse_types,
    parse_types_section, resolve_type,
};

/// Signature at the start of `.debug$S` and `.debug$T` sections and PDB module streams.
pub const CV_SIGNATURE_C13: u32 = 4;

/// Rounds `n` up to a multiple of `alignment`, which must be a power of two.
pub fn align_up(n: u64, alignment: u64) -> u64 {
    let mask = alignment - 1;
    (n + mask) & !mask
}
