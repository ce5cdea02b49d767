use std::fmt;
use uuid::Uuid;

/// A GUID, as found in PDB info streams, `RSDS` debug entries, and `LF_TYPESERVER2` records.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
pub struct Guid(pub Uuid);

impl Guid {
    /// Decodes the on-disk layout: a little-endian `u32`, two little-endian `u16`s, then 8 bytes.
    pub fn from_bytes_le(bytes: &[u8; 16]) -> Self {
        Self(Uuid::from_bytes_le(*bytes))
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}
