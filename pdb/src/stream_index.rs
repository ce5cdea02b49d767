use std::fmt::Display;
use zerocopy::{LE, U16};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Identifies a stream in a PDB file.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
#[repr(transparent)]
pub struct Stream(u16);

impl Stream {
    // Some streams have a fixed index.

    /// Index of the PDB Information Stream. It contains version information and information to
    /// connect this PDB to the executable.
    pub const PDB: Stream = Stream(1);

    /// Index of the Type Information Stream. It contains type records.
    pub const TPI: Stream = Stream(2);

    /// Debug Information Stream (DBI).
    pub const DBI: Stream = Stream(3);

    /// ID records: function IDs, build info, string IDs.
    pub const IPI: Stream = Stream(4);
}

impl From<Stream> for u32 {
    fn from(value: Stream) -> Self {
        value.0 as u32
    }
}

impl Display for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// A reserved stream index meaning "no stream at all", in `u16`.
pub const NIL_STREAM_INDEX: u16 = 0xffff;

/// A `u16` stream index as stored in PDB data structures. `0xffff` means "no stream".
#[derive(Copy, Clone, Eq, PartialEq, IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned)]
#[repr(transparent)]
pub struct StreamIndexU16(pub U16<LE>);

impl StreamIndexU16 {
    /// Gets the stream index, or `None` for NIL.
    pub fn get(self) -> Option<u32> {
        match self.0.get() {
            NIL_STREAM_INDEX => None,
            index => Some(index as u32),
        }
    }
}

impl std::fmt::Debug for StreamIndexU16 {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.get() {
            Some(index) => write!(f, "{index}"),
            None => f.write_str("NIL"),
        }
    }
}
