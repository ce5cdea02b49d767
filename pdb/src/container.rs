//! Provides one reader type over whole input files and the streams inside PDB files.

use stacksize_msf::BlocksReader;
use stacksize_reader::{Location, PagedReader, ReadResult, Reader, SubReader};

/// A reader over one of the byte sources a [`crate::Project`] works with: a whole input file, or
/// a stream within a PDB file.
///
/// Functions and type tables found in any input are expressed over this one type, so that
/// functions from an object file can be combined with the type table of a PDB.
#[derive(Clone, Debug)]
pub enum ProjectReader {
    /// A whole input file. COFF sections are sub-views of this.
    File(PagedReader),
    /// A stream within a PDB file.
    Stream(BlocksReader<PagedReader>),
}

impl ProjectReader {
    /// The paged reader that this reader's bytes ultimately come from.
    pub fn source(&self) -> &PagedReader {
        match self {
            Self::File(r) => r,
            Self::Stream(r) => r.base(),
        }
    }
}

macro_rules! dispatch {
    ($self:expr, $r:ident => $e:expr) => {
        match $self {
            ProjectReader::File($r) => $e,
            ProjectReader::Stream($r) => $e,
        }
    };
}

impl Reader for ProjectReader {
    type Base = Self;

    fn size(&self) -> u64 {
        dispatch!(self, r => r.size())
    }

    fn locate(&self, offset: u64) -> Location {
        dispatch!(self, r => r.locate(offset))
    }

    fn u8(&self, offset: u64) -> ReadResult<u8> {
        dispatch!(self, r => r.u8(offset))
    }

    fn u16(&self, offset: u64) -> ReadResult<u16> {
        dispatch!(self, r => r.u16(offset))
    }

    fn u32(&self, offset: u64) -> ReadResult<u32> {
        dispatch!(self, r => r.u32(offset))
    }

    fn find_byte(&self, value: u8, from: u64, to: Option<u64>) -> ReadResult<Option<u64>> {
        dispatch!(self, r => r.find_byte(value, from, to))
    }

    fn enumerate_bytes(&self, offset: u64, len: u64, f: &mut dyn FnMut(&[u8])) -> ReadResult<()> {
        dispatch!(self, r => r.enumerate_bytes(offset, len, f))
    }

    fn sub_view(&self, offset: u64, len: Option<u64>) -> SubReader<Self> {
        SubReader::new(self.clone(), offset, len)
    }
}
