use super::*;
use crate::types::tests::TypeStream;
use crate::types::{Leaf, TypesOutcome, parse_types, parse_types_section};
use stacksize_reader::{
    BufferLoader, CapturingLogger, NullLogger, PagedReader, SliceReader, with_load_scope,
};
use std::rc::Rc;

const CV_CALL_NEAR_FAST: u8 = 0x04;

/// Builds a run of symbol records.
#[derive(Default)]
struct SymStream {
    bytes: Vec<u8>,
}

impl SymStream {
    fn record(&mut self, kind: SymKind, payload: &[u8]) -> u64 {
        let offset = self.bytes.len() as u64;
        self.bytes
            .extend_from_slice(&(payload.len() as u16 + 2).to_le_bytes());
        self.bytes.extend_from_slice(&kind.0.to_le_bytes());
        self.bytes.extend_from_slice(payload);
        offset
    }

    fn proc(&mut self, kind: SymKind, type_id: u32, name: &str) -> u64 {
        let mut p = Vec::new();
        p.extend_from_slice(&[0; 12]); // parent, end, next
        p.extend_from_slice(&0x20u32.to_le_bytes()); // proc_len
        p.extend_from_slice(&[0; 8]); // debug_start, debug_end
        p.extend_from_slice(&type_id.to_le_bytes());
        p.extend_from_slice(&0x10u32.to_le_bytes()); // offset
        p.extend_from_slice(&1u16.to_le_bytes()); // segment
        p.push(ProcFlags::NOFPO.bits());
        p.extend_from_slice(name.as_bytes());
        p.push(0);
        self.record(kind, &p)
    }

    fn frameproc(&mut self, frame_size: u32) {
        let mut p = frame_size.to_le_bytes().to_vec();
        p.extend_from_slice(&[0; 22]);
        self.record(SymKind::S_FRAMEPROC, &p);
    }

    fn regrel(&mut self, sp_offset: u32, ty: u32, name: &str) {
        let mut p = sp_offset.to_le_bytes().to_vec();
        p.extend_from_slice(&ty.to_le_bytes());
        p.extend_from_slice(&335u16.to_le_bytes()); // CV_AMD64_RSP
        p.extend_from_slice(name.as_bytes());
        p.push(0);
        self.record(SymKind::S_REGREL32, &p);
    }

    fn block(&mut self) {
        self.record(SymKind::S_BLOCK32, &[0; 19]);
    }

    fn end(&mut self) {
        self.record(SymKind::S_END, &[]);
    }
}

/// Wraps symbol runs in `.debug$S` framing: the signature, then one subsection per run.
fn debug_s(subsections: &[(u32, &[u8])]) -> Vec<u8> {
    let mut out = CV_SIGNATURE_C13.to_le_bytes().to_vec();
    for &(kind, data) in subsections {
        out.extend_from_slice(&kind.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
        while out.len() % 4 != 0 {
            out.push(0);
        }
    }
    out
}

fn type_table(types: &TypeStream) -> TypeTable<SliceReader<'_>> {
    match parse_types_section(&SliceReader::new(&types.bytes), &NullLogger).unwrap() {
        Some(TypesOutcome::Table(table)) => table,
        other => panic!("expected a type table, got {other:?}"),
    }
}

fn functions<'a>(section: &'a [u8], logger: &dyn Logger) -> Vec<Function<SliceReader<'a>>> {
    scan_functions(&SliceReader::new(section), logger)
        .unwrap()
        .expect("section should have the CodeView signature")
}

#[test]
fn caller_stack_size_counts_parameters() {
    let mut types = TypeStream::new();
    let mut syms = SymStream::default();
    let mut expected: Vec<(String, i64)> = Vec::new();
    for (param_count, size) in [(0, 32), (1, 32), (2, 32), (4, 32), (5, 40), (6, 48)] {
        let ty = types.procedure(param_count, CV_CALL_NEAR_C);
        syms.proc(SymKind::S_GPROC32, ty, &format!("f{param_count}"));
        syms.end();
        expected.push((format!("f{param_count}"), size));
    }

    let section = debug_s(&[(DEBUG_S_SYMBOLS, &syms.bytes)]);
    let table = type_table(&types);
    let logger = CapturingLogger::new();
    let functions = functions(&section, &logger);
    let actual: Vec<(String, i64)> = functions
        .iter()
        .map(|f| {
            let size = f.caller_stack_size(&table, None, &logger).unwrap();
            (f.name.clone(), size)
        })
        .collect();
    assert_eq!(actual, expected);
    assert!(logger.messages().is_empty(), "{:?}", logger.messages());
}

#[test]
fn member_functions_count_this() {
    let mut types = TypeStream::new();
    let class = types.structure(Leaf::LF_CLASS, "Widget", &[8, 0], 0);
    let method = types.member_function(class, 4, CV_CALL_NEAR_C);
    let static_method = types.member_function(0, 4, CV_CALL_NEAR_C);

    let mut syms = SymStream::default();
    syms.proc(SymKind::S_GPROC32, method, "Widget::draw");
    syms.end();
    syms.proc(SymKind::S_GPROC32, static_method, "Widget::create");
    syms.end();

    let section = debug_s(&[(DEBUG_S_SYMBOLS, &syms.bytes)]);
    let table = type_table(&types);
    let functions = functions(&section, &NullLogger);
    assert_eq!(
        functions[0]
            .caller_stack_size(&table, None, &NullLogger)
            .unwrap(),
        40
    );
    assert_eq!(
        functions[1]
            .caller_stack_size(&table, None, &NullLogger)
            .unwrap(),
        32
    );
}

#[test]
fn unsupported_types_give_minus_one() {
    let mut types = TypeStream::new();
    let fastcall = types.procedure(2, CV_CALL_NEAR_FAST);
    let ptr = types.pointer(TypeIndex::T_INT4.0, 0xc | (8 << 13));
    let id = types.func_id(Leaf::LF_FUNC_ID, fastcall, "fast");

    let mut syms = SymStream::default();
    syms.proc(SymKind::S_GPROC32, fastcall, "fast");
    syms.end();
    syms.proc(SymKind::S_GPROC32, ptr, "not_a_function");
    syms.end();
    syms.proc(SymKind::S_GPROC32_ID, ptr, "id_is_not_an_id");
    syms.end();
    syms.proc(SymKind::S_GPROC32, id, "type_is_an_id");
    syms.end();

    let section = debug_s(&[(DEBUG_S_SYMBOLS, &syms.bytes)]);
    let table = type_table(&types);
    let logger = CapturingLogger::new();
    for f in functions(&section, &NullLogger) {
        assert_eq!(f.caller_stack_size(&table, None, &logger).unwrap(), -1, "{}", f.name);
    }

    let messages = logger.messages();
    assert_eq!(messages.len(), 4, "{messages:?}");
    assert_eq!(messages[0], "unsupported calling convention: 0x4");
    assert!(messages[1].starts_with("expected a procedure type record"));
    assert!(messages[2].starts_with("expected a function ID record"));
    assert!(messages[3].starts_with("expected a procedure type record"));
}

#[test]
fn function_ids_resolve_through_the_id_table() {
    // Object files keep item IDs and types in one table.
    let mut types = TypeStream::new();
    let proc = types.procedure(5, CV_CALL_NEAR_C);
    let id = types.func_id(Leaf::LF_FUNC_ID, proc, "callee");

    let mut syms = SymStream::default();
    syms.proc(SymKind::S_GPROC32_ID, id, "callee");
    syms.record(SymKind::S_PROC_ID_END, &[]);

    let section = debug_s(&[(DEBUG_S_SYMBOLS, &syms.bytes)]);
    let table = type_table(&types);
    let functions = functions(&section, &NullLogger);
    assert_eq!(functions.len(), 1);
    assert!(functions[0].has_func_id_type);
    assert_eq!(
        functions[0]
            .caller_stack_size(&table, None, &NullLogger)
            .unwrap(),
        40
    );

    // PDBs keep them apart.
    let mut ids = TypeStream::new();
    let separate_id = ids.func_id(Leaf::LF_FUNC_ID, proc, "callee");
    assert_eq!(separate_id, id - 1);
    let id_table = type_table(&ids);
    let mut f = functions[0].clone();
    f.type_id = TypeIndex(separate_id);
    assert_eq!(
        f.caller_stack_size(&table, Some(&id_table), &NullLogger)
            .unwrap(),
        40
    );
}

#[test]
fn frame_sizes_and_code_ranges() {
    let mut syms = SymStream::default();
    let first = syms.proc(SymKind::S_GPROC32, 0x1000, "with_frame");
    syms.frameproc(0x28);
    syms.end();
    syms.proc(SymKind::S_GPROC32, 0x1000, "without_frame");
    syms.end();

    let mut orphan = SymStream::default();
    orphan.frameproc(0x10);

    let section = debug_s(&[
        (DEBUG_S_SYMBOLS, &syms.bytes),
        (0xf4, &[1, 2, 3, 4, 5]), // file checksums
        (DEBUG_S_SYMBOLS, &orphan.bytes),
    ]);
    let logger = CapturingLogger::new();
    let functions = functions(&section, &logger);
    assert_eq!(functions.len(), 2);

    let f = &functions[0];
    assert_eq!(f.name, "with_frame");
    assert_eq!(f.byte_offset, first);
    assert_eq!(f.self_stack_size, Some(0x28));
    assert_eq!(f.code_section_index, Some(0));
    assert_eq!(f.code_offset, 0x10);
    assert_eq!(f.code_size, 0x20);
    assert!(!f.has_func_id_type);
    assert_eq!(f.reader.locate(f.byte_offset).file_offset, Some(12));

    assert_eq!(functions[1].self_stack_size, None);
    assert_eq!(
        logger.messages(),
        vec!["found S_FRAMEPROC with no corresponding S_GPROC32".to_string()]
    );
}

#[test]
fn malformed_record_stops_the_scan() {
    let mut syms = SymStream::default();
    syms.proc(SymKind::S_GPROC32, 0x1000, "before");
    syms.bytes.extend_from_slice(&[0, 0, 0, 0]);
    syms.proc(SymKind::S_GPROC32, 0x1000, "after");

    let section = debug_s(&[(DEBUG_S_SYMBOLS, &syms.bytes)]);
    let logger = CapturingLogger::new();
    let functions = functions(&section, &logger);
    assert_eq!(functions.len(), 1);
    assert_eq!(functions[0].name, "before");
    assert_eq!(
        logger.messages(),
        vec!["record has unusual size: 0".to_string()]
    );
}

#[test]
fn unaligned_subsection_end() {
    #[rustfmt::skip]
    let section: &[u8] = &[
        0x04, 0x00, 0x00, 0x00,         // signature
        0xf1, 0x00, 0x00, 0x00,         // DEBUG_S_SYMBOLS
        0x09, 0x00, 0x00, 0x00,         // subsection size
        0x07, 0x00, 0x01, 0x00,         // S_COMPILE
        0x01, 0x02, 0x03, 0x04, 0x05,
        0x00, 0x00, 0x00,               // padding
    ];
    let logger = CapturingLogger::new();
    assert!(functions(section, &logger).is_empty());
    assert!(logger.messages().is_empty());
}

#[test]
fn wrong_signature_is_a_mismatch() {
    let reader = SliceReader::new(&[2, 0, 0, 0, 0xf1, 0, 0, 0, 0, 0, 0, 0]);
    assert!(scan_functions(&reader, &NullLogger).unwrap().is_none());
    assert!(
        scan_functions(&SliceReader::new(&[4, 0]), &NullLogger)
            .unwrap()
            .is_none()
    );
    assert!(
        scan_module_symbols(&SliceReader::new(&[1, 0, 0, 0]), 4, &NullLogger)
            .unwrap()
            .is_none()
    );
}

#[test]
fn module_symbols_stop_at_sym_size() {
    let mut stream = SymStream::default();
    stream.bytes.extend_from_slice(&CV_SIGNATURE_C13.to_le_bytes());
    stream.proc(SymKind::S_GPROC32, 0x1000, "in_module");
    stream.frameproc(8);
    stream.end();
    let sym_size = stream.bytes.len() as u32;
    // Line information follows the symbols in a module stream.
    stream.proc(SymKind::S_GPROC32, 0x1000, "past_the_symbols");

    let reader = SliceReader::new(&stream.bytes);
    let functions = scan_module_symbols(&reader, sym_size, &NullLogger)
        .unwrap()
        .unwrap();
    assert_eq!(functions.len(), 1);
    assert_eq!(functions[0].name, "in_module");
    assert_eq!(functions[0].byte_offset, 4);
    assert_eq!(functions[0].self_stack_size, Some(8));
}

#[test]
fn locals_follow_block_nesting() {
    let mut types = TypeStream::new();
    let p_int = types.pointer(TypeIndex::T_INT4.0, 0xc | (8 << 13));

    let mut syms = SymStream::default();
    syms.proc(SymKind::S_GPROC32, 0x1000, "outer");
    syms.regrel(0x30, TypeIndex::T_INT4.0, "a");
    syms.block();
    syms.regrel(0x20, p_int, "b");
    syms.end();
    syms.regrel(0x28, 0x9999, "c");
    syms.end();
    syms.proc(SymKind::S_GPROC32_ID, 0x1000, "next");
    syms.regrel(0x8, TypeIndex::T_QUAD.0, "x");
    syms.record(SymKind::S_PROC_ID_END, &[]);
    syms.regrel(0x8, TypeIndex::T_QUAD.0, "not_a_local");

    let section = debug_s(&[(DEBUG_S_SYMBOLS, &syms.bytes)]);
    let functions = functions(&section, &NullLogger);
    assert_eq!(functions.len(), 2);

    let locals = functions[0].locals(&NullLogger).unwrap();
    let names: Vec<(&str, u32)> = locals
        .iter()
        .map(|l| (l.name.as_str(), l.sp_offset))
        .collect();
    assert_eq!(names, [("a", 0x30), ("b", 0x20), ("c", 0x28)]);

    let next = functions[1].locals(&NullLogger).unwrap();
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].name, "x");

    let table = type_table(&types);
    let logger = CapturingLogger::new();
    let a = locals[0].get_type(&table, &logger).unwrap().unwrap();
    assert_eq!((a.byte_size, a.name.as_str()), (4, "int"));
    let b = locals[1].get_type(&table, &logger).unwrap().unwrap();
    assert_eq!((b.byte_size, b.name.as_str()), (8, "int *"));
    assert!(logger.messages().is_empty());

    assert_eq!(locals[2].get_type(&table, &logger).unwrap(), None);
    let messages = logger.messages();
    assert_eq!(
        messages.last().map(String::as_str),
        Some("local has unknown type: 0x9999")
    );
}

#[test]
fn truncated_procedure_record_gives_minus_one() {
    let mut types = TypeStream::new();
    let truncated = types.add(Leaf::LF_PROCEDURE, &[3, 0, 0, 0, 0, 0]);
    let good = types.procedure(6, CV_CALL_NEAR_C);

    let mut syms = SymStream::default();
    syms.proc(SymKind::S_GPROC32, truncated, "truncated");
    syms.end();
    syms.proc(SymKind::S_GPROC32, good, "good");
    syms.end();

    let section = debug_s(&[(DEBUG_S_SYMBOLS, &syms.bytes)]);
    let table = type_table(&types);
    let logger = CapturingLogger::new();
    let sizes: Vec<i64> = functions(&section, &NullLogger)
        .iter()
        .map(|f| f.caller_stack_size(&table, None, &logger).unwrap())
        .collect();
    assert_eq!(sizes, [-1, 48]);

    let messages = logger.messages();
    assert_eq!(messages.len(), 1, "{messages:?}");
    assert!(messages[0].starts_with("could not decode type record 0x1000"));
}

#[test]
fn primitive_locals() {
    let cases: &[(&str, u32, u64, &str)] = &[
        ("c", 0x70, 1, "char"),
        ("sc", 0x10, 1, "signed char"),
        ("uc", 0x20, 1, "unsigned char"),
        ("ss", 0x11, 2, "short"),
        ("us", 0x21, 2, "unsigned short"),
        ("f", 0x40, 4, "float"),
        ("si", 0x74, 4, "int"),
        ("sl", 0x12, 4, "long"),
        ("ui", 0x75, 4, "unsigned"),
        ("ul", 0x22, 4, "unsigned long"),
        ("wc", 0x71, 4, "wchar_t"),
        ("d", 0x41, 8, "double"),
        // The x64 compiler gives long double the type of double.
        ("ld", 0x41, 8, "double"),
        ("sll", 0x13, 8, "long long"),
        ("ull", 0x23, 8, "unsigned long long"),
        ("b", 0x30, 1, "bool"),
        ("pv", 0x603, 8, "void *"),
        ("pc", 0x670, 8, "char *"),
        ("pwc", 0x671, 8, "wchar_t *"),
        ("pi", 0x674, 8, "int *"),
        ("pd", 0x641, 8, "double *"),
        ("np", 0x103, 8, "std::nullptr_t"),
    ];

    let mut syms = SymStream::default();
    syms.proc(SymKind::S_GPROC32, 0x1000, "primitives");
    for (i, &(name, type_id, _, _)) in cases.iter().enumerate() {
        syms.regrel(i as u32 * 8, type_id, name);
    }
    syms.end();

    let section = debug_s(&[(DEBUG_S_SYMBOLS, &syms.bytes)]);
    let functions = functions(&section, &NullLogger);
    let locals = functions[0].locals(&NullLogger).unwrap();
    assert_eq!(locals.len(), cases.len());

    // Built-in types need no records.
    let types = TypeStream::new();
    let table = type_table(&types);
    let logger = CapturingLogger::new();
    for (local, &(name, _, byte_size, type_name)) in locals.iter().zip(cases) {
        assert_eq!(local.name, name);
        let ty = local
            .get_type(&table, &logger)
            .unwrap()
            .unwrap_or_else(|| panic!("{name} did not resolve"));
        assert_eq!((ty.byte_size, ty.name.as_str()), (byte_size, type_name), "{name}");
    }
    assert!(logger.messages().is_empty(), "{:?}", logger.messages());
}

#[tokio::test]
async fn stack_sizes_over_paged_readers() -> anyhow::Result<()> {
    let mut types = TypeStream::new();
    let mut syms = SymStream::default();
    for i in 0..40 {
        let ty = types.procedure(i % 8, CV_CALL_NEAR_C);
        syms.proc(SymKind::S_GPROC32, ty, &format!("function_{i}"));
        syms.frameproc(i as u32 * 16);
        syms.end();
    }
    let section = debug_s(&[(DEBUG_S_SYMBOLS, &syms.bytes)]);

    let sym_loader = Rc::new(BufferLoader::new(section));
    let type_loader = Rc::new(BufferLoader::new(types.bytes.clone()));
    let sym_reader = PagedReader::with_chunk_size(sym_loader.clone(), 64)?;
    let type_reader = PagedReader::with_chunk_size(type_loader, 64)?;

    let logger = CapturingLogger::new();
    let sizes = with_load_scope(&[&sym_reader, &type_reader], &logger, |logger| {
        let Some(functions) = scan_functions(&sym_reader, logger)? else {
            anyhow::bail!("missing signature");
        };
        let TypesOutcome::Table(table) = parse_types(&type_reader, 4, 0x1000, logger)? else {
            anyhow::bail!("unexpected type server");
        };
        functions
            .iter()
            .map(|f| {
                let size = f.caller_stack_size(&table, None, logger)?;
                Ok((f.self_stack_size, size))
            })
            .collect::<anyhow::Result<Vec<_>>>()
    })
    .await?;

    assert_eq!(sizes.len(), 40);
    for (i, &(self_size, caller_size)) in sizes.iter().enumerate() {
        assert_eq!(self_size, Some(i as u32 * 16));
        assert_eq!(caller_size, ((i % 8).max(4) * 8) as i64);
    }
    assert!(logger.messages().is_empty());
    assert!(sym_loader.read_count() > 1);
    Ok(())
}
