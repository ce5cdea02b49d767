//! PDB Info Stream (aka the PDB Stream)
//!
//! Only the fixed header and the unique ID are decoded; the named stream table and feature list
//! that follow them are not needed to find functions or types.
//!
//! # References
//! * <https://llvm.org/docs/PDB/PdbStream.html>

use anyhow::{Result, bail};
use stacksize_reader::{Guid, Reader};
use std::fmt;
use std::mem::size_of;
use tracing::debug;
use zerocopy::{LE, U32};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// The header of the PDB Info stream.
#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Unaligned, Debug)]
#[repr(C)]
#[allow(missing_docs)]
pub struct PdbiStreamHeader {
    pub version: U32<LE>,
    pub signature: U32<LE>,
    pub age: U32<LE>,
    // This is followed by the unique ID if the version number is higher than VC70_DEPRECATED.
}

#[allow(missing_docs)]
pub const PDBI_VERSION_VC70_DEPRECATED: u32 = 19990604;
#[allow(missing_docs)]
pub const PDBI_VERSION_VC140: u32 = 20140508;

fn pdbi_has_unique_id(version: u32) -> bool {
    version > PDBI_VERSION_VC70_DEPRECATED
}

/// The identity of a PDB: what a PE image's `RSDS` record must match.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PdbInfo {
    /// One of the `PDBI_VERSION_*` values.
    pub version: u32,
    /// A timestamp, on old PDBs. Unused since the unique ID was introduced.
    pub signature: u32,
    /// The number of times this PDB has been written.
    pub age: u32,
    /// Older PDBs (pre-VC7, i.e. before 2000) do not contain a GUID.
    pub unique_id: Option<Guid>,
}

impl fmt::Display for PdbInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.unique_id {
            Some(guid) => write!(f, "{guid} age {}", self.age),
            None => write!(f, "signature 0x{:08x} age {}", self.signature, self.age),
        }
    }
}

/// Parses the header of the PDB Info stream (stream 1).
pub fn parse_pdbi_stream<R: Reader>(stream: &R) -> Result<PdbInfo> {
    if stream.size() < size_of::<PdbiStreamHeader>() as u64 {
        bail!(
            "The PDB Info stream is too small ({} bytes) to contain its header.",
            stream.size()
        );
    }
    let header: PdbiStreamHeader = stream.read_struct(0)?;
    let version = header.version.get();
    let unique_id = if pdbi_has_unique_id(version) {
        Some(stream.read_guid(size_of::<PdbiStreamHeader>() as u64)?)
    } else {
        None
    };

    let info = PdbInfo {
        version,
        signature: header.signature.get(),
        age: header.age.get(),
        unique_id,
    };
    debug!(%info, version, "PDB info");
    Ok(info)
}
