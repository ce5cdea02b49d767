//! Reads Portable Executable (PE) images and COFF object files (Windows binaries).
//!
//! Only as much of the format is decoded as is needed to find CodeView debug information: the
//! section table, the debug directory of PE images, and the `RSDS` record that names an image's
//! PDB. Both formats are read through a [`Reader`], so the file does not need to be fully loaded.
//!
//! # References
//! * <https://learn.microsoft.com/en-us/windows/win32/debug/pe-format>

#![allow(non_camel_case_types)]
#![allow(missing_docs)]
#![forbid(unsafe_code)]

mod image;
mod section;

#[cfg(test)]
mod tests;

pub use image::*;
pub use section::*;

use anyhow::{Result, bail};
use stacksize_reader::{Guid, Reader, SubReader, mismatch_on_out_of_bounds};
use tracing::debug;

/// Whether a file is a linked image or an object file.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CoffKind {
    /// A PE image (`.exe`, `.dll`), which starts with an `MZ` header.
    Pe,
    /// A COFF object file (`.obj`), which starts directly with a COFF file header.
    Object,
}

/// The decoded headers of a PE image or COFF object file.
#[derive(Clone, Debug)]
pub struct CoffFile {
    pub kind: CoffKind,
    /// File offset of the COFF file header.
    pub file_header_offset: u64,
    pub file_header: IMAGE_FILE_HEADER,
    /// The magic of the optional header, if there is one.
    pub optional_header_magic: Option<u16>,
    pub sections: Vec<Section>,
    /// Empty for object files.
    pub debug_directory: Vec<DebugDirectoryEntry>,
}

/// An entry in the debug directory of a PE image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DebugDirectoryEntry {
    pub type_: u32,
    pub size: u32,
    pub rva: u32,
    pub file_offset: u32,
}

/// Identifies the PDB that holds the debug information for a PE image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PdbReference {
    pub guid: Guid,
    pub age: u32,
    /// The path to the PDB, as recorded by the linker.
    pub path: String,
}

/// Parses the headers of a PE image or COFF object file.
///
/// Returns `Ok(None)` if the file is not one: the PE signature is wrong, or the machine is not
/// x64. Callers use this to fall back to other formats.
pub fn parse<R: Reader>(reader: &R) -> Result<Option<CoffFile>> {
    let (kind, file_header_offset) = if mismatch_on_out_of_bounds(reader.u16(0))?
        == Some(IMAGE_DOS_SIGNATURE)
    {
        let Some(pe_offset) = mismatch_on_out_of_bounds(reader.u32(IMAGE_DOS_LFANEW_OFFSET))?
        else {
            return Ok(None);
        };
        let pe_offset = pe_offset as u64;
        if mismatch_on_out_of_bounds(reader.u32(pe_offset))? != Some(IMAGE_NT_SIGNATURE) {
            debug!("MZ header present but PE signature is missing");
            return Ok(None);
        }
        (CoffKind::Pe, pe_offset + 4)
    } else {
        (CoffKind::Object, 0)
    };

    let Some(file_header) =
        mismatch_on_out_of_bounds(reader.read_struct::<IMAGE_FILE_HEADER>(file_header_offset))?
    else {
        return Ok(None);
    };
    if file_header.machine.get() != IMAGE_FILE_MACHINE_AMD64 {
        debug!(
            machine = file_header.machine.get(),
            "not an x64 COFF file header"
        );
        return Ok(None);
    }

    let optional_header_offset = file_header_offset + IMAGE_SIZEOF_FILE_HEADER as u64;
    let optional_header_size = file_header.size_of_optional_header.get() as u64;
    let optional_header_magic = if optional_header_size >= 2 {
        Some(reader.u16(optional_header_offset)?)
    } else {
        None
    };

    let section_table_offset = optional_header_offset + optional_header_size;
    let num_sections = file_header.number_of_sections.get() as u64;
    let mut sections = Vec::with_capacity(num_sections as usize);
    for i in 0..num_sections {
        let header = reader.read_struct::<IMAGE_SECTION_HEADER>(
            section_table_offset + i * IMAGE_SIZEOF_SECTION_HEADER as u64,
        )?;
        sections.push(Section::from(&header));
    }

    let mut file = CoffFile {
        kind,
        file_header_offset,
        file_header,
        optional_header_magic,
        sections,
        debug_directory: Vec::new(),
    };

    if kind == CoffKind::Pe {
        file.debug_directory =
            file.parse_debug_directory(reader, optional_header_offset, optional_header_size)?;
    }

    Ok(Some(file))
}

impl CoffFile {
    fn parse_debug_directory<R: Reader>(
        &self,
        reader: &R,
        optional_header_offset: u64,
        optional_header_size: u64,
    ) -> Result<Vec<DebugDirectoryEntry>> {
        let data_directory_offset = match self.optional_header_magic {
            Some(IMAGE_NT_OPTIONAL_HDR32_MAGIC) => IMAGE_OPTIONAL_HEADER32_DATA_DIRECTORY_OFFSET,
            Some(IMAGE_NT_OPTIONAL_HDR64_MAGIC) => IMAGE_OPTIONAL_HEADER64_DATA_DIRECTORY_OFFSET,
            Some(magic) => {
                debug!("unrecognized optional header magic 0x{magic:x}");
                return Ok(Vec::new());
            }
            None => return Ok(Vec::new()),
        };

        // The directory is only present if the optional header is big enough to hold slot 6.
        let slot_offset = data_directory_offset + IMAGE_DIRECTORY_ENTRY_DEBUG * 8;
        if optional_header_size < slot_offset + 8 {
            return Ok(Vec::new());
        }

        let dir = reader.read_struct::<IMAGE_DATA_DIRECTORY>(optional_header_offset + slot_offset)?;
        let (rva, size) = (dir.virtual_address.get(), dir.size.get());
        if size == 0 {
            return Ok(Vec::new());
        }

        let dir_reader = self.reader_for_rva(reader, rva, size)?;
        let num_entries = size as u64 / IMAGE_SIZEOF_DEBUG_DIRECTORY as u64;
        let mut entries = Vec::with_capacity(num_entries as usize);
        for i in 0..num_entries {
            let e = dir_reader
                .read_struct::<IMAGE_DEBUG_DIRECTORY>(i * IMAGE_SIZEOF_DEBUG_DIRECTORY as u64)?;
            entries.push(DebugDirectoryEntry {
                type_: e.type_.get(),
                size: e.size_of_data.get(),
                rva: e.address_of_raw_data.get(),
                file_offset: e.pointer_to_raw_data.get(),
            });
        }
        Ok(entries)
    }

    /// Iterates the sections whose name is `name`. Section names are not unique; object files
    /// often have several `.debug$S` sections.
    pub fn find_sections_by_name<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Section> {
        self.sections.iter().filter(move |s| s.name == name)
    }

    /// A reader over the file data of `section`.
    pub fn section_reader<R: Reader>(&self, reader: &R, section: &Section) -> SubReader<R::Base> {
        reader.sub_view(section.data_offset as u64, Some(section.data_size as u64))
    }

    /// Readers over the file data of every section named `name`.
    pub fn section_readers<R: Reader>(&self, reader: &R, name: &str) -> Vec<SubReader<R::Base>> {
        self.find_sections_by_name(name)
            .map(|s| self.section_reader(reader, s))
            .collect()
    }

    /// Translates `rva..rva + len` to a file offset. The range must lie within a single section.
    pub fn resolve_rva(&self, rva: u32, len: u32) -> Result<u64> {
        let Some(section) = self.sections.iter().find(|s| s.contains_rva(rva, len)) else {
            bail!("RVA range 0x{rva:x}+0x{len:x} is not within any section");
        };
        Ok(section.data_offset as u64 + (rva - section.virtual_address) as u64)
    }

    /// A reader over `rva..rva + len`.
    pub fn reader_for_rva<R: Reader>(
        &self,
        reader: &R,
        rva: u32,
        len: u32,
    ) -> Result<SubReader<R::Base>> {
        let offset = self.resolve_rva(rva, len)?;
        Ok(reader.sub_view(offset, Some(len as u64)))
    }

    /// Translates a code location (a zero-based section index and an offset within it, as
    /// recorded in CodeView procedure symbols) to a file offset. Returns `None` unless the
    /// section is executable.
    pub fn code_file_offset(&self, section_index: u32, offset: u32) -> Option<u64> {
        let section = self.sections.get(section_index as usize)?;
        if !section.characteristics.is_exec() || offset >= section.data_size {
            return None;
        }
        Some(section.data_offset as u64 + offset as u64)
    }

    /// Finds the `RSDS` CodeView entry in the debug directory, which names the PDB that goes with
    /// this image.
    pub fn pdb_reference<R: Reader>(&self, reader: &R) -> Result<Option<PdbReference>> {
        for entry in self.debug_directory.iter() {
            if entry.type_ != IMAGE_DEBUG_TYPE_CODEVIEW {
                continue;
            }
            let r = reader.sub_view(entry.file_offset as u64, Some(entry.size as u64));
            if mismatch_on_out_of_bounds(r.u32(0))? != Some(CV_SIGNATURE_RSDS) {
                debug!("CodeView debug entry is not RSDS");
                continue;
            }
            return Ok(Some(PdbReference {
                guid: r.read_guid(4)?,
                age: r.u32(20)?,
                path: r.read_utf8_c_string(24)?,
            }));
        }
        Ok(None)
    }
}
