use crate::{Location, ReadResult, Reader};

/// A window into another reader.
///
/// Sub-views never nest: taking a sub-view of a `SubReader<R>` produces another `SubReader<R>`
/// over the same base, with the offsets added together.
#[derive(Clone, Debug)]
pub struct SubReader<R> {
    base: R,
    offset: u64,
    size: u64,
}

impl<R: Reader> SubReader<R> {
    /// Creates a view of `base` starting at `offset`. The size is clamped so that the view never
    /// extends past the end of `base`.
    pub fn new(base: R, offset: u64, len: Option<u64>) -> Self {
        let base_size = base.size();
        let offset = offset.min(base_size);
        let remaining = base_size - offset;
        let size = len.map_or(remaining, |len| len.min(remaining));
        Self { base, offset, size }
    }

    /// The reader this view is over.
    pub fn base(&self) -> &R {
        &self.base
    }

    /// The offset of this view within its base.
    pub fn base_offset(&self) -> u64 {
        self.offset
    }
}

impl<R: Reader> Reader for SubReader<R> {
    type Base = R;

    fn size(&self) -> u64 {
        self.size
    }

    fn locate(&self, offset: u64) -> Location {
        self.base.locate(self.offset + offset)
    }

    fn u8(&self, offset: u64) -> ReadResult<u8> {
        self.check_range(offset, 1)?;
        self.base.u8(self.offset + offset)
    }

    fn u16(&self, offset: u64) -> ReadResult<u16> {
        self.check_range(offset, 2)?;
        self.base.u16(self.offset + offset)
    }

    fn u32(&self, offset: u64) -> ReadResult<u32> {
        self.check_range(offset, 4)?;
        self.base.u32(self.offset + offset)
    }

    fn find_byte(&self, value: u8, from: u64, to: Option<u64>) -> ReadResult<Option<u64>> {
        let to = to.unwrap_or(self.size);
        self.check_range(from, to.saturating_sub(from))?;
        Ok(self
            .base
            .find_byte(value, self.offset + from, Some(self.offset + to))?
            .map(|found| found - self.offset))
    }

    fn enumerate_bytes(&self, offset: u64, len: u64, f: &mut dyn FnMut(&[u8])) -> ReadResult<()> {
        self.check_range(offset, len)?;
        self.base.enumerate_bytes(self.offset + offset, len, f)
    }

    fn sub_view(&self, offset: u64, len: Option<u64>) -> SubReader<R> {
        let offset = offset.min(self.size);
        let remaining = self.size - offset;
        SubReader {
            base: self.base.clone(),
            offset: self.offset + offset,
            size: len.map_or(remaining, |len| len.min(remaining)),
        }
    }
}
