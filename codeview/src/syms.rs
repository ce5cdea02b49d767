//! Decodes symbol records. Finds functions in `.debug$S` sections and PDB module streams, their
//! frame sizes and locals, and computes the stack space their callers reserve.
//!
//! # References
//!
//! * [`cvinfo.h`](https://github.com/microsoft/microsoft-pdb/blob/805655a28bd8198004be2ac27e6e0290121a5e89/include/cvinfo.h)
//! * [CodeView Symbols](https://llvm.org/docs/PDB/CodeViewSymbols.html)

#[cfg(test)]
mod tests;

use crate::types::{CV_CALL_NEAR_C, Type, TypeIndex, TypeRecord, TypeTable, resolve_type};
use crate::{CV_SIGNATURE_C13, align_up};
use anyhow::Result;
use bitflags::bitflags;
use stacksize_reader::{Location, Logger, Reader, SubReader, is_fault, mismatch_on_out_of_bounds};
use std::fmt;
use tracing::trace;
use zerocopy::{LE, U16, U32};
use zerocopy_derive::*;

/// Subsection of a `.debug$S` section that holds symbol records.
pub const DEBUG_S_SYMBOLS: u32 = 0xf1;

/// The kind of a symbol record.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct SymKind(pub u16);

#[allow(missing_docs)]
impl SymKind {
    pub const S_END: SymKind = SymKind(0x0006);
    pub const S_FRAMEPROC: SymKind = SymKind(0x1012);
    pub const S_OBJNAME: SymKind = SymKind(0x1101);
    pub const S_BLOCK32: SymKind = SymKind(0x1103);
    pub const S_LPROC32: SymKind = SymKind(0x110f);
    pub const S_GPROC32: SymKind = SymKind(0x1110);
    pub const S_REGREL32: SymKind = SymKind(0x1111);
    pub const S_LPROC32_ID: SymKind = SymKind(0x1146);
    pub const S_GPROC32_ID: SymKind = SymKind(0x1147);
    pub const S_PROC_ID_END: SymKind = SymKind(0x114f);
}

impl fmt::Debug for SymKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymKind(0x{:04x})", self.0)
    }
}

/// The fixed part of `S_GPROC32` and `S_GPROC32_ID`, after the record header. Followed by the
/// function name. See `PROCSYM32` in `cvinfo.h`.
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned, Debug)]
#[repr(C)]
#[allow(missing_docs)]
pub struct ProcFixed {
    pub p_parent: U32<LE>,
    pub p_end: U32<LE>,
    pub p_next: U32<LE>,

    /// The length in bytes of the procedure instruction stream.
    pub proc_len: U32<LE>,

    pub debug_start: U32<LE>,
    pub debug_end: U32<LE>,

    /// A `TypeIndex` for `S_GPROC32`, or an item ID (an index into the IPI) for `S_GPROC32_ID`.
    pub proc_type: U32<LE>,

    pub offset: U32<LE>,
    /// One-based section number.
    pub segment: U16<LE>,
    pub flags: u8,
}

bitflags! {
    /// Flags describing a procedure symbol.
    ///
    /// See: `CV_PROCFLAGS` in `cvinfo.h`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    pub struct ProcFlags: u8 {
        /// Frame pointer present.
        const NOFPO = 1 << 0;
        /// Interrupt return.
        const INT = 1 << 1;
        /// Far return.
        const FAR = 1 << 2;
        /// Does not return.
        const NEVER = 1 << 3;
        /// Label isn't fallen into.
        const NOTREACHED = 1 << 4;
        /// Custom calling convention.
        const CUST_CALL = 1 << 5;
        /// Marked as `noinline`.
        const NOINLINE = 1 << 6;
        /// Has debug information for optimized code.
        const OPTDBGINFO = 1 << 7;
    }
}

/// The fixed part of `S_REGREL32`. Followed by the name. See `REGREL32` in `cvinfo.h`.
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned, Debug)]
#[repr(C)]
#[allow(missing_docs)]
pub struct RegRelFixed {
    pub offset: U32<LE>,
    pub ty: U32<LE>,
    pub register: U16<LE>,
}

static_assertions::const_assert_eq!(size_of::<ProcFixed>(), 35);
static_assertions::const_assert_eq!(size_of::<RegRelFixed>(), 10);

const RECORD_HEADER_LEN: u64 = 4;

/// A function found in a symbol stream.
#[derive(Clone)]
pub struct Function<B> {
    #[allow(missing_docs)]
    pub name: String,
    /// The symbol stream that holds the function's records.
    pub reader: SubReader<B>,
    /// Offset of the function's `S_GPROC32` record within `reader`.
    pub byte_offset: u64,
    /// Frame size from the `S_FRAMEPROC` record, if there was one.
    pub self_stack_size: Option<u32>,
    /// Zero-based index of the section that holds the code. Relocations are not applied, so in
    /// object files this is the value the compiler wrote.
    pub code_section_index: Option<u32>,
    /// Offset of the code within its section.
    pub code_offset: u32,
    /// Number of bytes of machine code.
    pub code_size: u32,
    /// `true` if `type_id` is an item ID (`S_GPROC32_ID`) rather than a type index.
    pub has_func_id_type: bool,
    #[allow(missing_docs)]
    pub type_id: TypeIndex,
}

impl<B> fmt::Debug for Function<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("byte_offset", &self.byte_offset)
            .field("self_stack_size", &self.self_stack_size)
            .field("type_id", &self.type_id)
            .field("has_func_id_type", &self.has_func_id_type)
            .finish_non_exhaustive()
    }
}

/// A parameter or local variable addressed relative to a register.
#[derive(Clone)]
pub struct Local<B> {
    #[allow(missing_docs)]
    pub name: String,
    /// Offset from the register; the register is assumed to be `RSP`.
    pub sp_offset: u32,
    #[allow(missing_docs)]
    pub type_id: TypeIndex,
    /// The symbol stream that holds the `S_REGREL32` record.
    pub reader: SubReader<B>,
    /// Offset of the `S_REGREL32` record within `reader`.
    pub record_offset: u64,
}

impl<B> fmt::Debug for Local<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Local")
            .field("name", &self.name)
            .field("sp_offset", &self.sp_offset)
            .field("type_id", &self.type_id)
            .finish_non_exhaustive()
    }
}

impl<B: Reader> Local<B> {
    /// Resolves the type of this local. Logs `local has unknown type` if it cannot be resolved.
    pub fn get_type<T: Reader>(
        &self,
        type_table: &TypeTable<T>,
        logger: &dyn Logger,
    ) -> Result<Option<Type>> {
        let ty = resolve_type(self.type_id, type_table, logger)?;
        if ty.is_none() {
            logger.log(
                &format!("local has unknown type: 0x{:x}", self.type_id.0),
                &self.reader.locate(self.record_offset),
            );
        }
        Ok(ty)
    }
}

/// Finds the functions in a `.debug$S` section.
///
/// Returns `Ok(None)` if the section does not start with the CodeView signature.
pub fn scan_functions<R: Reader>(
    reader: &R,
    logger: &dyn Logger,
) -> Result<Option<Vec<Function<R::Base>>>> {
    if mismatch_on_out_of_bounds(reader.u32(0))? != Some(CV_SIGNATURE_C13) {
        return Ok(None);
    }

    let mut functions = Vec::new();
    let mut offset = 4;
    loop {
        offset = align_up(offset, 4);
        if offset >= reader.size() {
            break;
        }
        let subsection_type = reader.u32(offset)?;
        let subsection_size = reader.u32(offset + 4)? as u64;
        offset += 8;

        if subsection_type == DEBUG_S_SYMBOLS {
            let subsection = reader.sub_view(offset, Some(subsection_size));
            scan_records(&subsection, 0, &mut functions, logger)?;
        }
        offset += subsection_size;
    }

    trace!(num_functions = functions.len(), "scanned .debug$S");
    Ok(Some(functions))
}

/// Finds the functions in a PDB module stream. `sym_size` is the size of the symbol records,
/// including the signature, as given by the module's DBI entry.
///
/// Returns `Ok(None)` if the stream does not start with the CodeView signature.
pub fn scan_module_symbols<R: Reader>(
    stream: &R,
    sym_size: u32,
    logger: &dyn Logger,
) -> Result<Option<Vec<Function<R::Base>>>> {
    let symbols = stream.sub_view(0, Some(sym_size as u64));
    if mismatch_on_out_of_bounds(symbols.u32(0))? != Some(CV_SIGNATURE_C13) {
        return Ok(None);
    }

    let mut functions = Vec::new();
    scan_records(&symbols, 4, &mut functions, logger)?;
    Ok(Some(functions))
}

fn scan_records<B: Reader>(
    reader: &SubReader<B>,
    start: u64,
    out: &mut Vec<Function<B>>,
    logger: &dyn Logger,
) -> Result<()> {
    let first_new = out.len();
    let mut offset = start;
    while offset < reader.size() {
        let record_size = reader.u16(offset)? as u64;
        if record_size < 2 {
            logger.log(
                &format!("record has unusual size: {record_size}"),
                &reader.locate(offset),
            );
            break;
        }

        match SymKind(reader.u16(offset + 2)?) {
            kind @ (SymKind::S_GPROC32 | SymKind::S_GPROC32_ID) => {
                let fixed: ProcFixed = reader.read_struct(offset + RECORD_HEADER_LEN)?;
                let name_offset = offset + RECORD_HEADER_LEN + size_of::<ProcFixed>() as u64;
                out.push(Function {
                    name: reader.read_utf8_c_string(name_offset)?,
                    reader: reader.clone(),
                    byte_offset: offset,
                    self_stack_size: None,
                    code_section_index: fixed.segment.get().checked_sub(1).map(u32::from),
                    code_offset: fixed.offset.get(),
                    code_size: fixed.proc_len.get(),
                    has_func_id_type: kind == SymKind::S_GPROC32_ID,
                    type_id: TypeIndex(fixed.proc_type.get()),
                });
            }

            SymKind::S_FRAMEPROC => {
                // The first field of FRAMEPROCSYM is the total frame size.
                let frame_size = reader.u32(offset + RECORD_HEADER_LEN)?;
                match out[first_new..].last_mut() {
                    Some(function) => function.self_stack_size = Some(frame_size),
                    None => logger.log(
                        "found S_FRAMEPROC with no corresponding S_GPROC32",
                        &reader.locate(offset),
                    ),
                }
            }

            _ => {}
        }

        offset += record_size + 2;
    }
    Ok(())
}

/// Finds the locals of the function whose record starts at `offset`.
///
/// Walks forward until the `S_END` that closes the function, or an `S_PROC_ID_END`.
pub fn scan_locals<B: Reader>(
    reader: &SubReader<B>,
    mut offset: u64,
    logger: &dyn Logger,
) -> Result<Vec<Local<B>>> {
    let mut locals = Vec::new();
    let mut depth: u32 = 1;
    while offset < reader.size() {
        let record_size = reader.u16(offset)? as u64;
        if record_size < 2 {
            logger.log(
                &format!("record has unusual size: {record_size}"),
                &reader.locate(offset),
            );
            break;
        }

        match SymKind(reader.u16(offset + 2)?) {
            SymKind::S_REGREL32 => {
                let fixed: RegRelFixed = reader.read_struct(offset + RECORD_HEADER_LEN)?;
                let name_offset = offset + RECORD_HEADER_LEN + size_of::<RegRelFixed>() as u64;
                locals.push(Local {
                    name: reader.read_utf8_c_string(name_offset)?,
                    sp_offset: fixed.offset.get(),
                    type_id: TypeIndex(fixed.ty.get()),
                    reader: reader.clone(),
                    record_offset: offset,
                });
            }
            SymKind::S_BLOCK32 => depth += 1,
            SymKind::S_END => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            SymKind::S_PROC_ID_END => break,
            _ => {}
        }

        offset += record_size + 2;
    }
    Ok(locals)
}

impl<B: Reader> Function<B> {
    /// The function's parameters and locals.
    pub fn locals(&self, logger: &dyn Logger) -> Result<Vec<Local<B>>> {
        scan_locals(&self.reader, self.byte_offset, logger)
    }

    /// The number of bytes a caller reserves on the stack for a call to this function: the
    /// 32-byte register shadow area plus 8 bytes for each parameter past the fourth.
    ///
    /// `type_index_table` is consulted for `S_GPROC32_ID` functions, whose type is an item ID. If
    /// it is `None`, item IDs are looked up in `type_table`, which is where object files keep
    /// them.
    ///
    /// Returns `-1` if the size cannot be determined; the reason is sent to `logger`.
    pub fn caller_stack_size<T: Reader>(
        &self,
        type_table: &TypeTable<T>,
        type_index_table: Option<&TypeTable<T>>,
        logger: &dyn Logger,
    ) -> Result<i64> {
        let location = self.reader.locate(self.byte_offset);
        let mut type_id = self.type_id;

        if self.has_func_id_type {
            let id_table = type_index_table.unwrap_or(type_table);
            let Some(record) = record_or_log(id_table, type_id, logger, &location)? else {
                return Ok(-1);
            };
            match record {
                Some(
                    TypeRecord::FunctionId { target_type }
                    | TypeRecord::MemberFunctionId { target_type },
                ) => type_id = target_type,
                other => {
                    logger.log(
                        &format!("expected a function ID record for {type_id}, found {other:?}"),
                        &location,
                    );
                    return Ok(-1);
                }
            }
        }

        let Some(record) = record_or_log(type_table, type_id, logger, &location)? else {
            return Ok(-1);
        };
        let (mut param_count, calling_convention, this_type) = match record {
            Some(TypeRecord::Procedure {
                param_count,
                calling_convention,
            }) => (param_count as i64, calling_convention, None),
            Some(TypeRecord::MemberFunction {
                this_type,
                param_count,
                calling_convention,
            }) => (param_count as i64, calling_convention, Some(this_type)),
            other => {
                logger.log(
                    &format!("expected a procedure type record for {type_id}, found {other:?}"),
                    &location,
                );
                return Ok(-1);
            }
        };

        if calling_convention != CV_CALL_NEAR_C {
            logger.log(
                &format!("unsupported calling convention: 0x{calling_convention:x}"),
                &location,
            );
            return Ok(-1);
        }

        // Static member functions have no `this` (T_NOTYPE). Otherwise `this` is assumed to take
        // one register slot like any other pointer parameter.
        if this_type.is_some_and(|t| t.0 != 0) {
            param_count += 1;
        }
        Ok(param_count.max(4) * 8)
    }
}

/// Decodes a record, sending decode errors to `logger` as `Ok(None)`. Faults are returned so that
/// a load scope can fetch the missing bytes.
fn record_or_log<T: Reader>(
    table: &TypeTable<T>,
    type_id: TypeIndex,
    logger: &dyn Logger,
    location: &Location,
) -> Result<Option<Option<TypeRecord>>> {
    match table.record(type_id) {
        Ok(record) => Ok(Some(record)),
        Err(e) if is_fault(&e) => Err(e),
        Err(e) => {
            logger.log(&format!("could not decode type record {type_id}: {e}"), location);
            Ok(None)
        }
    }
}
