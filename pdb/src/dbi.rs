//! Provides access to the DBI Stream (Debug Information).
//!
//! The DBI Stream lists the modules (compilands / translation units) that compose an executable.
//! Each Module Info record names the object file and the Module Stream that holds the module's
//! symbols. The DBI is stream 3.
//!
//! Only the header and the Modules Substream are decoded. The section contribution, section map,
//! sources and optional debug header substreams are skipped.
//!
//! * <https://llvm.org/docs/PDB/DbiStream.html>
//! * <https://github.com/microsoft/microsoft-pdb/blob/805655a28bd8198004be2ac27e6e0290121a5e89/langapi/include/pdb.h#L860>

use crate::StreamIndexU16;
use anyhow::{Result, bail};
use stacksize_codeview::align_up;
use stacksize_reader::{Logger, Reader, mismatch_on_out_of_bounds};
use std::mem::size_of;
use tracing::{debug, trace};
use zerocopy::{I32, LE, U16, U32};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// The header of the DBI (Debug Information) stream.
#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned, Debug, Clone)]
#[allow(missing_docs)]
pub struct DbiStreamHeader {
    /// Always -1
    pub signature: I32<LE>,

    /// One of the `DBI_STREAM_VERSION_*` values; typically, `DBI_STREAM_VERSION_V110`.
    pub version: U32<LE>,

    /// The number of times this PDB has been modified. This value must match the same field
    /// within the PE header.
    pub age: U32<LE>,

    pub global_symbol_index_stream: StreamIndexU16,
    pub build_number: U16<LE>,
    pub public_symbol_index_stream: StreamIndexU16,
    pub pdb_dll_version: U16<LE>,
    pub global_symbol_stream: StreamIndexU16,
    pub pdb_dll_rbld: U16<LE>,

    // Substreams
    pub mod_info_size: I32<LE>,
    pub section_contribution_size: I32<LE>,
    pub section_map_size: I32<LE>,
    pub source_info_size: I32<LE>,
    pub type_server_map_size: I32<LE>,
    /// This field is _not_ a substream size.
    pub mfc_type_server_index: U32<LE>,
    pub optional_dbg_header_size: I32<LE>,
    pub edit_and_continue_size: I32<LE>,

    pub flags: U16<LE>,
    pub machine: U16<LE>,
    pub padding: U32<LE>,
}

static_assertions::const_assert_eq!(size_of::<DbiStreamHeader>(), DBI_STREAM_HEADER_LEN as usize);

/// The Modules Substream starts immediately after the header.
pub const DBI_STREAM_HEADER_LEN: u64 = 64;

/// MSVC version 11.0
pub const DBI_STREAM_VERSION_V110: u32 = 20091201;

/// Describes one section contribution.
///
/// See `SC` in `dbicommon.h`.
#[allow(missing_docs)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned, Clone, Debug)]
#[repr(C)]
pub struct SectionContribEntry {
    /// One-based section index. 0 and 0xffff mean "no section".
    pub section: U16<LE>,
    pub padding1: [u8; 2],
    pub offset: I32<LE>,
    pub size: I32<LE>,
    pub characteristics: U32<LE>,
    /// The zero-based module index of the module containing this section contribution.
    pub module_index: U16<LE>,
    pub padding2: [u8; 2],
    pub data_crc: U32<LE>,
    pub reloc_crc: U32<LE>,
}

/// The fixed-size part of a Module Info record. It is followed by two NUL-terminated strings:
/// the module name and the object file name.
///
/// See `dbi.h`, `MODI_60_Persist`
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned, Clone, Debug)]
#[repr(C)]
pub struct ModuleInfoFixed {
    /// Not reliably set. Ignored.
    pub unused1: U32<LE>,

    /// This module's first section contribution.
    pub section_contrib: SectionContribEntry,

    /// * bit 0: set to 1 if this module has been written since DBI opened
    /// * bit 1: set to 1 if this module has EC symbolic information
    /// * bits 8-15: index into TSM list for this mods server
    pub flags: U16<LE>,

    /// Stream index of the Module Stream for this module, which contains the symbols and line data
    /// for this module. If this is 0xffff, then this module does not have a module stream.
    pub stream: StreamIndexU16,

    /// Size of the symbols substream within the Module Stream, including its signature.
    pub sym_byte_size: U32<LE>,

    /// Size of the C11 Line Data in the Module Stream. C11 line data is obsolete.
    pub c11_byte_size: U32<LE>,

    /// Size of the C13 Line Data in the Module Stream.
    pub c13_byte_size: U32<LE>,

    /// Number of files contributing to this module.
    pub source_file_count: U16<LE>,

    #[allow(missing_docs)]
    pub padding: [u8; 2],
    #[allow(missing_docs)]
    pub unused2: U32<LE>,
    #[allow(missing_docs)]
    pub source_file_name_index: U32<LE>,
    #[allow(missing_docs)]
    pub pdb_file_path_name_index: U32<LE>,
}

static_assertions::const_assert_eq!(size_of::<SectionContribEntry>(), 28);
static_assertions::const_assert_eq!(size_of::<ModuleInfoFixed>(), 64);

/// The first section contribution of a module.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SectionContrib {
    /// Zero-based section index.
    pub section_index: u32,
    #[allow(missing_docs)]
    pub offset: i32,
    #[allow(missing_docs)]
    pub size: i32,
}

/// A decoded Module Info record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModuleInfo {
    /// Position of this record in the Modules Substream.
    pub index: u32,
    /// The Module Stream, if the module has one.
    pub stream: Option<u32>,
    /// See [`ModuleInfoFixed::sym_byte_size`].
    pub sym_byte_size: u32,
    #[allow(missing_docs)]
    pub c11_byte_size: u32,
    #[allow(missing_docs)]
    pub c13_byte_size: u32,
    #[allow(missing_docs)]
    pub section_contrib: Option<SectionContrib>,
    /// The name of the module. For object files passed directly to the linker, this is the path
    /// of the object file. For static libraries, this is the object file within the library.
    pub module_name: String,
    /// The object file or library that the linker read.
    pub obj_file: String,
}

/// The parts of the DBI stream that are decoded.
#[derive(Clone, Debug, Default)]
pub struct DbiStream {
    #[allow(missing_docs)]
    pub age: u32,
    /// `IMAGE_FILE_MACHINE_*` of the linked image.
    pub machine: u16,
    #[allow(missing_docs)]
    pub modules: Vec<ModuleInfo>,
}

/// Reads the DBI header and the Module Info records.
///
/// An empty stream has no modules. A Module Info record that is cut off by the end of the
/// substream is reported to `logger` as `incomplete module info entry` and ends the walk; the
/// records before it are still returned.
pub fn parse_dbi_stream<R: Reader>(stream: &R, logger: &dyn Logger) -> Result<DbiStream> {
    if stream.size() == 0 {
        debug!("DBI stream is empty");
        return Ok(DbiStream::default());
    }

    let header: DbiStreamHeader = stream.read_struct(0)?;
    let mod_info_size = header.mod_info_size.get();
    if mod_info_size < 0 {
        bail!("Substream mod_info_size length in DBI header is invalid (is negative)");
    }
    let modules_reader = stream.sub_view(DBI_STREAM_HEADER_LEN, Some(mod_info_size as u64));
    if modules_reader.size() != mod_info_size as u64 {
        bail!(
            "Substream mod_info_size length in DBI header is invalid. It extends beyond the end of the stream."
        );
    }

    let mut modules = Vec::new();
    let mut offset = 0;
    loop {
        offset = align_up(offset, 4);
        if offset >= modules_reader.size() {
            break;
        }
        let Some((module, next)) = parse_module(&modules_reader, offset, modules.len() as u32)?
        else {
            logger.log(
                "incomplete module info entry",
                &modules_reader.locate(offset),
            );
            break;
        };
        trace!(index = module.index, name = %module.module_name, stream = ?module.stream, "module");
        modules.push(module);
        offset = next;
    }

    debug!(num_modules = modules.len(), "DBI modules");
    Ok(DbiStream {
        age: header.age.get(),
        machine: header.machine.get(),
        modules,
    })
}

/// Decodes the record at `offset`. Returns the record and the offset just past it, or `None` if
/// the record does not fit.
fn parse_module<R: Reader>(
    reader: &R,
    offset: u64,
    index: u32,
) -> Result<Option<(ModuleInfo, u64)>> {
    let Some(fixed) = mismatch_on_out_of_bounds(reader.read_struct::<ModuleInfoFixed>(offset))?
    else {
        return Ok(None);
    };

    let name_offset = offset + size_of::<ModuleInfoFixed>() as u64;
    let Some(name_end) = reader.find_byte(0, name_offset, None)? else {
        return Ok(None);
    };
    let obj_offset = name_end + 1;
    if obj_offset >= reader.size() {
        return Ok(None);
    }
    let Some(obj_end) = reader.find_byte(0, obj_offset, None)? else {
        return Ok(None);
    };

    let contrib = &fixed.section_contrib;
    let section_contrib = match contrib.section.get() {
        0 | 0xffff => None,
        section => Some(SectionContrib {
            section_index: section as u32 - 1,
            offset: contrib.offset.get(),
            size: contrib.size.get(),
        }),
    };

    let module = ModuleInfo {
        index,
        stream: fixed.stream.get(),
        sym_byte_size: fixed.sym_byte_size.get(),
        c11_byte_size: fixed.c11_byte_size.get(),
        c13_byte_size: fixed.c13_byte_size.get(),
        section_contrib,
        module_name: reader.read_utf8(name_offset, name_end - name_offset)?,
        obj_file: reader.read_utf8(obj_offset, obj_end - obj_offset)?,
    };
    Ok(Some((module, obj_end + 1)))
}
