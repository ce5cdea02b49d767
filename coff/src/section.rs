//! Image section
//!
//! # References
//! * <https://learn.microsoft.com/en-us/windows/win32/api/winnt/ns-winnt-image_section_header>

use bstr::BStr;
use core::fmt::Debug;
use core::mem::size_of;
use static_assertions::const_assert_eq;
use zerocopy::{LE, U16, U32};
use zerocopy_derive::*;

#[derive(Copy, Clone, Eq, PartialEq, Default, Hash)]
#[repr(transparent)]
pub struct SectionCharacteristics(pub u32);

bitflags::bitflags! {
    impl SectionCharacteristics: u32 {
        const IMAGE_SCN_CNT_CODE                   = 0x00000020;  // Section contains code.
        const IMAGE_SCN_CNT_INITIALIZED_DATA       = 0x00000040;  // Section contains initialized data.
        const IMAGE_SCN_CNT_UNINITIALIZED_DATA     = 0x00000080;  // Section contains uninitialized data.
        const IMAGE_SCN_LNK_INFO                   = 0x00000200;  // Section contains comments or some other type of information.
        const IMAGE_SCN_LNK_REMOVE                 = 0x00000800;  // Section contents will not become part of image.
        const IMAGE_SCN_LNK_COMDAT                 = 0x00001000;  // Section contents comdat.
        const IMAGE_SCN_MEM_DISCARDABLE            = 0x02000000;  // Section can be discarded.
        const IMAGE_SCN_MEM_EXECUTE                = 0x20000000;  // Section is executable.
        const IMAGE_SCN_MEM_READ                   = 0x40000000;  // Section is readable.
        const IMAGE_SCN_MEM_WRITE                  = 0x80000000;  // Section is writeable.
    }
}

impl SectionCharacteristics {
    /// Returns true if this contains `IMAGE_SCN_MEM_EXECUTE`
    pub fn is_exec(self) -> bool {
        self.intersects(Self::IMAGE_SCN_MEM_EXECUTE)
    }

    /// Returns true if the section is dropped at link time, as `.debug$S` and `.debug$T` are.
    pub fn is_removed(self) -> bool {
        self.intersects(Self::IMAGE_SCN_LNK_REMOVE | Self::IMAGE_SCN_MEM_DISCARDABLE)
    }
}

impl Debug for SectionCharacteristics {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "[{:08x}", self.0)?;
        if self.is_exec() {
            write!(f, " exec")?;
        }
        if self.is_removed() {
            write!(f, " discard")?;
        }
        write!(f, "]")
    }
}

pub const IMAGE_SIZEOF_SHORT_NAME: usize = 8;

#[repr(C)]
#[derive(
    Clone,
    Default,
    Debug,
    Eq,
    PartialEq,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
    Unaligned,
)]
pub struct IMAGE_SECTION_HEADER {
    pub name: [u8; IMAGE_SIZEOF_SHORT_NAME],
    pub physical_address_or_virtual_size: U32<LE>,
    pub virtual_address: U32<LE>,
    pub size_of_raw_data: U32<LE>,
    pub pointer_to_raw_data: U32<LE>,
    pub pointer_to_relocations: U32<LE>,
    pub pointer_to_linenumbers: U32<LE>,
    pub number_of_relocations: U16<LE>,
    pub number_of_linenumbers: U16<LE>,
    pub characteristics: U32<LE>,
}

impl IMAGE_SECTION_HEADER {
    pub fn name(&self) -> &BStr {
        BStr::new(if let Some(i) = self.name.iter().position(|&b| b == 0) {
            &self.name[..i]
        } else {
            &self.name
        })
    }
}

pub const IMAGE_SIZEOF_SECTION_HEADER: usize = 40;

const_assert_eq!(
    size_of::<IMAGE_SECTION_HEADER>(),
    IMAGE_SIZEOF_SECTION_HEADER
);

/// A decoded section table entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Section {
    /// Up to 8 bytes, with NUL padding removed. Names are not unique.
    pub name: String,
    /// Only meaningful in images.
    pub virtual_size: u32,
    /// Only meaningful in images.
    pub virtual_address: u32,
    pub data_size: u32,
    pub data_offset: u32,
    pub characteristics: SectionCharacteristics,
}

impl From<&IMAGE_SECTION_HEADER> for Section {
    fn from(h: &IMAGE_SECTION_HEADER) -> Self {
        Self {
            name: h.name().to_string(),
            virtual_size: h.physical_address_or_virtual_size.get(),
            virtual_address: h.virtual_address.get(),
            data_size: h.size_of_raw_data.get(),
            data_offset: h.pointer_to_raw_data.get(),
            characteristics: SectionCharacteristics(h.characteristics.get()),
        }
    }
}

impl Section {
    /// Returns `true` if `rva..rva + len` lies within the bytes of this section that are backed by
    /// file data.
    pub fn contains_rva(&self, rva: u32, len: u32) -> bool {
        let start = self.virtual_address as u64;
        let end = start + self.virtual_size.min(self.data_size) as u64;
        let rva = rva as u64;
        start <= rva && rva + len as u64 <= end
    }
}
