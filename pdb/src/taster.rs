//! Determines whether a given file is a PDB/MSF file, a PE image, or a COFF object file.

use anyhow::Result;
use stacksize_coff::CoffKind;
use stacksize_reader::Reader;
use std::fmt;

/// Enumerates the kinds of files that are recognized.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Flavor {
    /// An ordinary PDB file.
    Pdb,
    /// A PE image (`.exe`, `.dll`).
    Pe,
    /// A COFF object file (`.obj`).
    Coff,
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Flavor::Pdb => "PDB",
            Flavor::Pe => "PE image",
            Flavor::Coff => "COFF object",
        })
    }
}

/// Determines what kind of file `reader` holds. Returns `Ok(None)` if it is none of them.
///
/// PDB is tried first: a PDB never starts with `MZ`, but a short, unrecognized file could pass
/// for a COFF header more easily than for the MSF magic.
pub fn what_flavor<R: Reader>(reader: &R) -> Result<Option<Flavor>> {
    if stacksize_msf::parse_superblock(reader)?.is_some() {
        return Ok(Some(Flavor::Pdb));
    }
    Ok(stacksize_coff::parse(reader)?.map(|coff| match coff.kind {
        CoffKind::Pe => Flavor::Pe,
        CoffKind::Object => Flavor::Coff,
    }))
}
