//! Decodes type records and resolves type indexes to sizes and names.
//!
//! A type stream is a sequence of records, each `[u16 size][u16 kind][payload]`, where `size`
//! counts the kind and the payload. Records are numbered in stream order starting at the stream's
//! first type index (0x1000 unless a TPI header says otherwise). Indexes below that are built-in
//! types; see [`primitive`].
//!
//! # References
//! * [`cvinfo.h`](https://github.com/microsoft/microsoft-pdb/blob/805655a28bd8198004be2ac27e6e0290121a5e89/include/cvinfo.h)
//! * <https://llvm.org/docs/PDB/TpiStream.html>

pub mod primitive;


pub use primitive::primitive_type;

use crate::CV_SIGNATURE_C13;
use crate::parser::Parser;
use anyhow::Result;
use bitflags::bitflags;
use pretty_hex::PrettyHex;
use stacksize_reader::{Guid, Location, Logger, Reader, is_fault, mismatch_on_out_of_bounds};
use std::fmt;
use tracing::{debug, trace};
use zerocopy::{LE, U16, U32};
use zerocopy_derive::*;

/// Identifies a type record or a built-in type.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TypeIndex(pub u32);

impl fmt::Debug for TypeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl fmt::Display for TypeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// The index of the first record in a type stream that has no header of its own.
pub const TYPE_INDEX_BEGIN: u32 = 0x1000;

/// The kind of a type record.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Leaf(pub u16);

macro_rules! leaves {
    ($( $name:ident = $value:expr, )*) => {
        #[allow(missing_docs)]
        impl Leaf {
            $(
                pub const $name: Leaf = Leaf($value);
            )*

            /// The `cvinfo.h` name of this kind, if it is one this crate knows about.
            pub fn name(self) -> Option<&'static str> {
                match self {
                    $( Self::$name => Some(stringify!($name)), )*
                    _ => None,
                }
            }
        }
    }
}

leaves! {
    LF_MODIFIER = 0x1001,
    LF_POINTER = 0x1002,
    LF_PROCEDURE = 0x1008,
    LF_MFUNCTION = 0x1009,
    LF_ARGLIST = 0x1201,
    LF_FIELDLIST = 0x1203,
    LF_ARRAY = 0x1503,
    LF_CLASS = 0x1504,
    LF_STRUCTURE = 0x1505,
    LF_UNION = 0x1506,
    LF_ENUM = 0x1507,
    LF_TYPESERVER2 = 0x1515,
    LF_FUNC_ID = 0x1601,
    LF_MFUNC_ID = 0x1602,
    LF_BUILDINFO = 0x1603,
    LF_STRING_ID = 0x1605,
    LF_UDT_SRC_LINE = 0x1606,
}

impl fmt::Debug for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "Leaf(0x{:04x})", self.0),
        }
    }
}

/// Calling convention: near right-to-left push, caller pops the stack. This is the only calling
/// convention used for x64 code.
pub const CV_CALL_NEAR_C: u8 = 0x00;

/// Pointer kind: 32-bit pointer.
pub const CV_PTR_NEAR32: u8 = 0x0a;
/// Pointer kind: 64-bit pointer.
pub const CV_PTR_64: u8 = 0x0c;

/// For `LF_POINTER`
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned, Debug)]
#[repr(C)]
#[allow(missing_docs)]
pub struct PointerFixed {
    pub ty: U32<LE>,
    pub attr: U32<LE>,
}

impl PointerFixed {
    /// The pointer kind, e.g. [`CV_PTR_64`].
    pub fn kind(&self) -> u8 {
        (self.attr.get() & 0x1f) as u8
    }

    #[allow(missing_docs)]
    pub fn is_volatile(&self) -> bool {
        self.attr.get() & (1 << 9) != 0
    }

    #[allow(missing_docs)]
    pub fn is_const(&self) -> bool {
        self.attr.get() & (1 << 10) != 0
    }
}

/// For `LF_MODIFIER`
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned, Debug)]
#[repr(C)]
#[allow(missing_docs)]
pub struct ModifierFixed {
    pub ty: U32<LE>,
    pub attr: U16<LE>,
}

bitflags! {
    /// Flags for `LF_MODIFIER`. See `CV_modifier_t` in `cvinfo.h`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ModifierFlags: u16 {
        #[allow(missing_docs)]
        const CONST = 0x0001;
        #[allow(missing_docs)]
        const VOLATILE = 0x0002;
        #[allow(missing_docs)]
        const UNALIGNED = 0x0004;
    }
}

/// For `LF_PROCEDURE`
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned, Debug)]
#[repr(C)]
#[allow(missing_docs)]
pub struct ProcedureFixed {
    pub return_value: U32<LE>,
    pub call: u8,
    pub attributes: u8,
    pub num_params: U16<LE>,
    pub arg_list: U32<LE>,
}

/// For `LF_MFUNCTION`
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned, Debug)]
#[repr(C)]
#[allow(missing_docs)]
pub struct MemberFunctionFixed {
    pub return_value: U32<LE>,
    pub class: U32<LE>,
    pub this: U32<LE>,
    pub call: u8,
    pub attributes: u8,
    pub num_params: U16<LE>,
    pub arg_list: U32<LE>,
    pub this_adjust: U32<LE>,
}

/// For `LF_ARRAY`. Followed by a numeric leaf (the size in bytes) and a name.
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned, Debug)]
#[repr(C)]
#[allow(missing_docs)]
pub struct ArrayFixed {
    pub element_type: U32<LE>,
    pub index_type: U32<LE>,
}

/// For `LF_CLASS` and `LF_STRUCTURE`. Followed by a numeric leaf (the size in bytes) and a name.
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned, Debug)]
#[repr(C)]
#[allow(missing_docs)]
pub struct StructFixed {
    pub num_elements: U16<LE>,
    pub property: U16<LE>,
    pub field_list: U32<LE>,
    pub derivation_list: U32<LE>,
    pub vtable_shape: U32<LE>,
}

/// For `LF_UNION`. Followed by a numeric leaf (the size in bytes) and a name.
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned, Debug)]
#[repr(C)]
#[allow(missing_docs)]
pub struct UnionFixed {
    pub num_elements: U16<LE>,
    pub property: U16<LE>,
    pub field_list: U32<LE>,
}

/// For `LF_ENUM`. Followed by a name.
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned, Debug)]
#[repr(C)]
#[allow(missing_docs)]
pub struct EnumFixed {
    pub num_elements: U16<LE>,
    pub property: U16<LE>,
    pub underlying_type: U32<LE>,
    pub field_list: U32<LE>,
}

bitflags! {
    /// Properties of aggregate and enum types. See `CV_prop_t` in `cvinfo.h`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UdtProperties: u16 {
        #[allow(missing_docs)]
        const PACKED = 1 << 0;
        #[allow(missing_docs)]
        const CTOR = 1 << 1;
        #[allow(missing_docs)]
        const OVLOPS = 1 << 2;
        #[allow(missing_docs)]
        const ISNESTED = 1 << 3;
        #[allow(missing_docs)]
        const CNESTED = 1 << 4;
        #[allow(missing_docs)]
        const OPASSIGN = 1 << 5;
        #[allow(missing_docs)]
        const OPCAST = 1 << 6;
        /// This is a forward declaration; the definition is in another record.
        const FWDREF = 1 << 7;
        #[allow(missing_docs)]
        const SCOPED = 1 << 8;
    }
}

/// For `LF_FUNC_ID` (scope, type) and `LF_MFUNC_ID` (parent class, type). Followed by a name.
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned, Debug)]
#[repr(C)]
#[allow(missing_docs)]
pub struct FuncIdFixed {
    pub scope: U32<LE>,
    pub func_type: U32<LE>,
}

/// For `LF_TYPESERVER2`. Followed by the path of the PDB.
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned, Debug)]
#[repr(C)]
#[allow(missing_docs)]
pub struct TypeServer2Fixed {
    pub guid: [u8; 16],
    pub age: U32<LE>,
}

static_assertions::const_assert_eq!(size_of::<PointerFixed>(), 8);
static_assertions::const_assert_eq!(size_of::<ModifierFixed>(), 6);
static_assertions::const_assert_eq!(size_of::<ProcedureFixed>(), 12);
static_assertions::const_assert_eq!(size_of::<MemberFunctionFixed>(), 24);
static_assertions::const_assert_eq!(size_of::<StructFixed>(), 16);
static_assertions::const_assert_eq!(size_of::<TypeServer2Fixed>(), 20);

/// Identifies the PDB that holds the types of an object file compiled with `/Zi`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TypeServerRef {
    /// Path of the PDB, as recorded by the compiler.
    pub path: String,
    #[allow(missing_docs)]
    pub guid: Guid,
    #[allow(missing_docs)]
    pub age: u32,
}

/// A decoded type record. Only the fields needed for sizes, names and calling conventions are
/// kept.
#[derive(Clone, Debug, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum TypeRecord {
    Pointer {
        pointee: TypeIndex,
        kind: u8,
        is_const: bool,
        is_volatile: bool,
    },
    Modifier {
        underlying: TypeIndex,
        is_const: bool,
        is_volatile: bool,
    },
    /// `LF_CLASS` or `LF_STRUCTURE`
    Structure {
        name: String,
        byte_size: u64,
        forward_ref: bool,
    },
    Union {
        name: String,
        byte_size: u64,
        forward_ref: bool,
    },
    Array {
        element: TypeIndex,
        byte_size: u64,
    },
    Enum {
        name: String,
        underlying: TypeIndex,
    },
    Procedure {
        param_count: u16,
        calling_convention: u8,
    },
    MemberFunction {
        this_type: TypeIndex,
        param_count: u16,
        calling_convention: u8,
    },
    FunctionId {
        target_type: TypeIndex,
    },
    MemberFunctionId {
        target_type: TypeIndex,
    },
    TypeServer(TypeServerRef),
    Unknown(Leaf),
}

impl TypeRecord {
    /// Decodes the record that starts at `offset`.
    pub fn decode<R: Reader>(reader: &R, offset: u64) -> Result<Self> {
        let record_len = reader.u16(offset)? as u64;
        let kind = Leaf(reader.u16(offset + 2)?);
        let payload = reader.sub_view(offset + 4, Some(record_len.saturating_sub(2)));
        let mut p = Parser::new(&payload, 0);

        let record = match kind {
            Leaf::LF_POINTER => {
                let fixed: PointerFixed = p.get()?;
                Self::Pointer {
                    pointee: TypeIndex(fixed.ty.get()),
                    kind: fixed.kind(),
                    is_const: fixed.is_const(),
                    is_volatile: fixed.is_volatile(),
                }
            }

            Leaf::LF_MODIFIER => {
                let fixed: ModifierFixed = p.get()?;
                let flags = ModifierFlags::from_bits_retain(fixed.attr.get());
                Self::Modifier {
                    underlying: TypeIndex(fixed.ty.get()),
                    is_const: flags.contains(ModifierFlags::CONST),
                    is_volatile: flags.contains(ModifierFlags::VOLATILE),
                }
            }

            Leaf::LF_CLASS | Leaf::LF_STRUCTURE => {
                let fixed: StructFixed = p.get()?;
                let byte_size = p.number()?;
                Self::Structure {
                    name: p.strz()?,
                    byte_size,
                    forward_ref: UdtProperties::from_bits_retain(fixed.property.get())
                        .contains(UdtProperties::FWDREF),
                }
            }

            Leaf::LF_UNION => {
                let fixed: UnionFixed = p.get()?;
                let byte_size = p.number()?;
                Self::Union {
                    name: p.strz()?,
                    byte_size,
                    forward_ref: UdtProperties::from_bits_retain(fixed.property.get())
                        .contains(UdtProperties::FWDREF),
                }
            }

            Leaf::LF_ARRAY => {
                let fixed: ArrayFixed = p.get()?;
                Self::Array {
                    element: TypeIndex(fixed.element_type.get()),
                    byte_size: p.number()?,
                }
            }

            Leaf::LF_ENUM => {
                let fixed: EnumFixed = p.get()?;
                Self::Enum {
                    name: p.strz()?,
                    underlying: TypeIndex(fixed.underlying_type.get()),
                }
            }

            Leaf::LF_PROCEDURE => {
                let fixed: ProcedureFixed = p.get()?;
                Self::Procedure {
                    param_count: fixed.num_params.get(),
                    calling_convention: fixed.call,
                }
            }

            Leaf::LF_MFUNCTION => {
                let fixed: MemberFunctionFixed = p.get()?;
                Self::MemberFunction {
                    this_type: TypeIndex(fixed.this.get()),
                    param_count: fixed.num_params.get(),
                    calling_convention: fixed.call,
                }
            }

            Leaf::LF_FUNC_ID => {
                let fixed: FuncIdFixed = p.get()?;
                Self::FunctionId {
                    target_type: TypeIndex(fixed.func_type.get()),
                }
            }

            Leaf::LF_MFUNC_ID => {
                let fixed: FuncIdFixed = p.get()?;
                Self::MemberFunctionId {
                    target_type: TypeIndex(fixed.func_type.get()),
                }
            }

            Leaf::LF_TYPESERVER2 => {
                let fixed: TypeServer2Fixed = p.get()?;
                Self::TypeServer(TypeServerRef {
                    guid: Guid::from_bytes_le(&fixed.guid),
                    age: fixed.age.get(),
                    path: p.strz()?,
                })
            }

            _ => Self::Unknown(kind),
        };
        Ok(record)
    }
}

/// The byte offset of each record in a type stream.
#[derive(Clone)]
pub struct TypeTable<R> {
    reader: R,
    first_index: u32,
    offsets: Vec<u64>,
}

impl<R: Reader> TypeTable<R> {
    /// The reader that the record offsets refer to.
    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// The type index of the first record.
    pub fn first_index(&self) -> TypeIndex {
        TypeIndex(self.first_index)
    }

    /// The number of records.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// The offset of a record within [`Self::reader`]. Returns `None` for built-in types and for
    /// indexes past the end of the table.
    pub fn record_offset(&self, type_index: TypeIndex) -> Option<u64> {
        let i = type_index.0.checked_sub(self.first_index)?;
        self.offsets.get(i as usize).copied()
    }

    /// Where a record lives, for diagnostics.
    pub fn locate(&self, type_index: TypeIndex) -> Location {
        match self.record_offset(type_index) {
            Some(offset) => self.reader.locate(offset),
            None => Location::default(),
        }
    }

    /// Decodes a record. Returns `None` if `type_index` is not in this table.
    pub fn record(&self, type_index: TypeIndex) -> Result<Option<TypeRecord>> {
        match self.record_offset(type_index) {
            Some(offset) => Ok(Some(TypeRecord::decode(&self.reader, offset)?)),
            None => Ok(None),
        }
    }
}

impl<R> fmt::Debug for TypeTable<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeTable")
            .field("first_index", &TypeIndex(self.first_index))
            .field("len", &self.offsets.len())
            .finish()
    }
}

/// The result of scanning a type stream.
#[derive(Clone, Debug)]
pub enum TypesOutcome<R> {
    /// The stream holds the types.
    Table(TypeTable<R>),
    /// The stream only points at a PDB that holds the types.
    SeparatePdb(TypeServerRef),
}

/// Scans the type records in `reader` starting at `start`, numbering them from `first_index`.
///
/// Scanning stops at the end of the reader or at a record whose size is too small to hold its
/// kind. If an `LF_TYPESERVER2` record is found, the scan stops and the referenced PDB is returned
/// instead of a table.
pub fn parse_types<R: Reader>(
    reader: &R,
    start: u64,
    first_index: u32,
    logger: &dyn Logger,
) -> Result<TypesOutcome<R>> {
    let mut offsets = Vec::new();
    let mut pos = start;
    while pos + 4 <= reader.size() {
        let record_len = reader.u16(pos)? as u64;
        if record_len < 2 {
            logger.log(
                &format!("type record has unusual size: {record_len}"),
                &reader.locate(pos),
            );
            break;
        }

        if Leaf(reader.u16(pos + 2)?) == Leaf::LF_TYPESERVER2 {
            if let TypeRecord::TypeServer(server) = TypeRecord::decode(reader, pos)? {
                debug!(path = %server.path, guid = %server.guid, "types are in a separate PDB");
                return Ok(TypesOutcome::SeparatePdb(server));
            }
        }

        offsets.push(pos);
        pos += 2 + record_len;
    }

    trace!(num_records = offsets.len(), "scanned type records");
    Ok(TypesOutcome::Table(TypeTable {
        reader: reader.clone(),
        first_index,
        offsets,
    }))
}

/// Scans a `.debug$T` section. Returns `Ok(None)` if the section does not start with the CodeView
/// signature.
pub fn parse_types_section<R: Reader>(
    reader: &R,
    logger: &dyn Logger,
) -> Result<Option<TypesOutcome<R>>> {
    match mismatch_on_out_of_bounds(reader.u32(0))? {
        Some(CV_SIGNATURE_C13) => {}
        _ => return Ok(None),
    }
    Ok(Some(parse_types(reader, 4, TYPE_INDEX_BEGIN, logger)?))
}

/// The size and name of a type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Type {
    #[allow(missing_docs)]
    pub byte_size: u64,
    /// A C++-like spelling of the type, e.g. `const int *`.
    pub name: String,
}

/// Pointers and modifiers nest; a malformed stream could make them cycle.
const MAX_TYPE_DEPTH: u32 = 64;

/// Resolves a type index to its size and name.
///
/// Returns `Ok(None)` for types that cannot be resolved; the reason is sent to `logger`. Errors
/// are only returned for faults, so that a load scope can fetch the missing bytes.
pub fn resolve_type<R: Reader>(
    type_index: TypeIndex,
    table: &TypeTable<R>,
    logger: &dyn Logger,
) -> Result<Option<Type>> {
    resolve_nested(type_index, table, logger, 0)
}

fn resolve_nested<R: Reader>(
    type_index: TypeIndex,
    table: &TypeTable<R>,
    logger: &dyn Logger,
    depth: u32,
) -> Result<Option<Type>> {
    if type_index.0 < table.first_index {
        return Ok(primitive_type(type_index));
    }

    let Some(offset) = table.record_offset(type_index) else {
        logger.log(
            &format!("type index {type_index} is past the end of the type table"),
            &Location::default(),
        );
        return Ok(None);
    };
    let location = table.reader.locate(offset);

    if depth >= MAX_TYPE_DEPTH {
        logger.log("type records are nested too deeply", &location);
        return Ok(None);
    }

    let record = match TypeRecord::decode(&table.reader, offset) {
        Ok(record) => record,
        Err(e) if is_fault(&e) => return Err(e),
        Err(e) => {
            logger.log(&format!("could not decode type record: {e}"), &location);
            let len = 16u64.min(table.reader.size() - offset);
            if let Ok(bytes) = table.reader.copy_bytes(offset, len) {
                trace!("record bytes:\n{:?}", bytes.hex_dump());
            }
            return Ok(None);
        }
    };

    let nested = |ti| resolve_nested(ti, table, logger, depth + 1);
    let name_or_unknown = |ty: Option<Type>| ty.map_or_else(|| "?".to_string(), |ty| ty.name);

    let ty = match record {
        TypeRecord::Pointer {
            pointee,
            kind,
            is_const,
            ..
        } => {
            let byte_size = match kind {
                CV_PTR_64 => 8,
                CV_PTR_NEAR32 => 4,
                _ => {
                    logger.log(&format!("unsupported pointer kind: 0x{kind:x}"), &location);
                    return Ok(None);
                }
            };
            let mut name = name_or_unknown(nested(pointee)?);
            if name.ends_with('*') {
                name.push('*');
            } else {
                name.push_str(" *");
            }
            if is_const {
                name.push_str("const");
            }
            Type { byte_size, name }
        }

        TypeRecord::Modifier {
            underlying,
            is_const,
            is_volatile,
        } => {
            let Some(inner) = nested(underlying)? else {
                return Ok(None);
            };
            let mut name = inner.name;
            if is_volatile {
                name = format!("volatile {name}");
            }
            if is_const {
                name = format!("const {name}");
            }
            Type {
                byte_size: inner.byte_size,
                name,
            }
        }

        TypeRecord::Structure {
            name, byte_size, ..
        }
        | TypeRecord::Union {
            name, byte_size, ..
        } => Type { byte_size, name },

        TypeRecord::Array { element, byte_size } => Type {
            byte_size,
            name: format!("{}[]", name_or_unknown(nested(element)?)),
        },

        TypeRecord::Enum { name, underlying } => {
            let Some(inner) = nested(underlying)? else {
                logger.log(
                    &format!("enum {name} has unknown underlying type: {underlying}"),
                    &location,
                );
                return Ok(None);
            };
            Type {
                byte_size: inner.byte_size,
                name,
            }
        }

        TypeRecord::Procedure { .. } | TypeRecord::MemberFunction { .. } => Type {
            byte_size: 0,
            name: "<func>".to_string(),
        },

        TypeRecord::FunctionId { .. }
        | TypeRecord::MemberFunctionId { .. }
        | TypeRecord::TypeServer(_) => {
            logger.log("type index refers to an ID record, not a type", &location);
            return Ok(None);
        }

        TypeRecord::Unknown(kind) => {
            logger.log(&format!("unsupported type record kind: {kind:?}"), &location);
            return Ok(None);
        }
    };
    Ok(Some(ty))
}
