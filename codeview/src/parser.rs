//! Support for parsing byte-oriented data

use crate::types::TypeIndex;
use anyhow::{Result, bail};
use stacksize_reader::{Location, ReadError, ReadResult, Reader};
use zerocopy::{FromBytes, IntoBytes};

/// A cursor over a [`Reader`], for use in decoding CodeView records.
///
/// Every read advances the cursor. A failed fixed-width read leaves the cursor where it was.
#[derive(Clone)]
pub struct Parser<'r, R> {
    reader: &'r R,
    pos: u64,
}

impl<'r, R: Reader> Parser<'r, R> {
    /// Starts a new parser at `pos`.
    pub fn new(reader: &'r R, pos: u64) -> Self {
        Self { reader, pos }
    }

    /// The offset of the next byte to be parsed.
    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// Where the next byte lives, for diagnostics.
    pub fn location(&self) -> Location {
        self.reader.locate(self.pos)
    }

    /// Skips `n` bytes. Fails if that would move past the end of the reader.
    pub fn skip(&mut self, n: u64) -> ReadResult<()> {
        self.reader.check_range(self.pos, n)?;
        self.pos += n;
        Ok(())
    }

    #[allow(missing_docs)]
    pub fn u8(&mut self) -> ReadResult<u8> {
        let value = self.reader.u8(self.pos)?;
        self.pos += 1;
        Ok(value)
    }

    #[allow(missing_docs)]
    pub fn u16(&mut self) -> ReadResult<u16> {
        let value = self.reader.u16(self.pos)?;
        self.pos += 2;
        Ok(value)
    }

    #[allow(missing_docs)]
    pub fn u32(&mut self) -> ReadResult<u32> {
        let value = self.reader.u32(self.pos)?;
        self.pos += 4;
        Ok(value)
    }

    /// Parses a 32-bit TypeIndex.
    pub fn type_index(&mut self) -> ReadResult<TypeIndex> {
        Ok(TypeIndex(self.u32()?))
    }

    /// Parses a copy of a fixed-layout structure.
    pub fn get<T: FromBytes + IntoBytes>(&mut self) -> ReadResult<T> {
        let value = self.reader.read_struct::<T>(self.pos)?;
        self.pos += size_of::<T>() as u64;
        Ok(value)
    }

    /// Parses a NUL-terminated string. Invalid UTF-8 is replaced.
    pub fn strz(&mut self) -> ReadResult<String> {
        let Some(nul) = self.reader.find_byte(0, self.pos, None)? else {
            return Err(ReadError::MissingNulTerminator {
                location: self.location(),
            });
        };
        let s = self.reader.read_utf8(self.pos, nul - self.pos)?;
        self.pos = nul + 1;
        Ok(s)
    }

    /// Parses a numeric leaf. Values below `LF_NUMERIC` are stored inline in the leaf itself;
    /// larger values follow a leaf that gives their width.
    ///
    /// Negative values are returned as their two's complement.
    pub fn number(&mut self) -> Result<u64> {
        let start = self.pos;
        let leaf = self.u16()?;
        if leaf < LF_NUMERIC {
            return Ok(leaf as u64);
        }

        let value = match leaf {
            LF_CHAR => self.u8()? as i8 as i64 as u64,
            LF_SHORT => self.u16()? as i16 as i64 as u64,
            LF_USHORT => self.u16()? as u64,
            LF_LONG => self.u32()? as i32 as i64 as u64,
            LF_ULONG => self.u32()? as u64,
            LF_QUADWORD | LF_UQUADWORD => {
                let value = self.reader.u64(self.pos)?;
                self.pos += 8;
                value
            }
            _ => {
                self.pos = start;
                bail!(
                    "unsupported numeric leaf 0x{leaf:04x} at {}",
                    self.reader.locate(start)
                );
            }
        };
        Ok(value)
    }
}

const LF_NUMERIC: u16 = 0x8000;
const LF_CHAR: u16 = 0x8000;
const LF_SHORT: u16 = 0x8001;
const LF_USHORT: u16 = 0x8002;
const LF_LONG: u16 = 0x8003;
const LF_ULONG: u16 = 0x8004;
const LF_QUADWORD: u16 = 0x8009;
const LF_UQUADWORD: u16 = 0x800a;
