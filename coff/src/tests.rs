use super::*;
use stacksize_reader::SliceReader;

#[static_init::dynamic]
static INIT_LOGGER: () = {
    tracing_subscriber::fmt::fmt()
        .compact()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .with_test_writer()
        .without_time()
        .with_ansi(false)
        .init();
};

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Writes a 40-byte section header.
fn put_section(
    buf: &mut [u8],
    offset: usize,
    name: &[u8],
    va: u32,
    vsize: u32,
    size: u32,
    data: u32,
) {
    buf[offset..offset + name.len()].copy_from_slice(name);
    put_u32(buf, offset + 8, vsize);
    put_u32(buf, offset + 12, va);
    put_u32(buf, offset + 16, size);
    put_u32(buf, offset + 20, data);
}

const TEXT: SectionCharacteristics = SectionCharacteristics::IMAGE_SCN_CNT_CODE
    .union(SectionCharacteristics::IMAGE_SCN_MEM_EXECUTE)
    .union(SectionCharacteristics::IMAGE_SCN_MEM_READ);

const DEBUG: SectionCharacteristics = SectionCharacteristics::IMAGE_SCN_CNT_INITIALIZED_DATA
    .union(SectionCharacteristics::IMAGE_SCN_MEM_DISCARDABLE)
    .union(SectionCharacteristics::IMAGE_SCN_MEM_READ);

/// An object file with `.text` and two `.debug$S` sections.
fn make_object() -> Vec<u8> {
    let mut obj = vec![0u8; 0x200];
    put_u16(&mut obj, 0, IMAGE_FILE_MACHINE_AMD64);
    put_u16(&mut obj, 2, 3);
    put_section(&mut obj, 20, b".text", 0, 0, 0x10, 0x100);
    put_section(&mut obj, 60, b".debug$S", 0, 0, 8, 0x110);
    put_section(&mut obj, 100, b".debug$S", 0, 0, 4, 0x120);
    put_u32(&mut obj, 20 + 36, TEXT.bits());
    put_u32(&mut obj, 60 + 36, DEBUG.bits());
    put_u32(&mut obj, 100 + 36, DEBUG.bits());
    obj[0x110..0x118].copy_from_slice(b"firstsec");
    obj[0x120..0x124].copy_from_slice(b"2nd!");
    obj
}

#[rustfmt::skip]
const TEST_GUID: [u8; 16] = [
    0x67, 0x45, 0x23, 0x01, 0xab, 0x89, 0xef, 0xcd,
    0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef,
];

/// A 64-bit PE image with a single `.rdata` section that holds the debug directory and an `RSDS`
/// record.
fn make_pe() -> Vec<u8> {
    let mut pe = vec![0u8; 0x400];
    put_u16(&mut pe, 0, IMAGE_DOS_SIGNATURE);
    put_u32(&mut pe, 0x3c, 0x40);
    put_u32(&mut pe, 0x40, IMAGE_NT_SIGNATURE);

    // COFF file header at 0x44, optional header at 0x58
    put_u16(&mut pe, 0x44, IMAGE_FILE_MACHINE_AMD64);
    put_u16(&mut pe, 0x46, 1);
    put_u16(&mut pe, 0x44 + 16, 240);
    put_u16(&mut pe, 0x58, IMAGE_NT_OPTIONAL_HDR64_MAGIC);

    // Data directory slot 6 (debug)
    put_u32(&mut pe, 0x58 + 112 + 48, 0x1000);
    put_u32(&mut pe, 0x58 + 112 + 52, 28);

    // Section table at 0x58 + 240
    put_section(&mut pe, 0x148, b".rdata", 0x1000, 0x100, 0x200, 0x200);

    // Debug directory entry at RVA 0x1000 (file 0x200)
    put_u32(&mut pe, 0x200 + 12, IMAGE_DEBUG_TYPE_CODEVIEW);
    put_u32(&mut pe, 0x200 + 16, 24 + 12);
    put_u32(&mut pe, 0x200 + 20, 0x1020);
    put_u32(&mut pe, 0x200 + 24, 0x220);

    put_u32(&mut pe, 0x220, CV_SIGNATURE_RSDS);
    pe[0x224..0x234].copy_from_slice(&TEST_GUID);
    put_u32(&mut pe, 0x234, 7);
    pe[0x238..0x244].copy_from_slice(b"C:\\x\\a.pdb\0\0");
    pe
}

#[test]
fn object_sections() {
    let data = make_object();
    let reader = SliceReader::new(&data);
    let file = parse(&reader).unwrap().unwrap();
    assert_eq!(file.kind, CoffKind::Object);
    assert_eq!(file.optional_header_magic, None);
    assert_eq!(file.sections.len(), 3);
    assert_eq!(file.sections[0].name, ".text");
    assert!(file.debug_directory.is_empty());

    let debug_s = file.section_readers(&reader, ".debug$S");
    assert_eq!(debug_s.len(), 2);
    assert_eq!(debug_s[0].read_utf8(0, 8).unwrap(), "firstsec");
    assert_eq!(debug_s[1].size(), 4);
    assert_eq!(debug_s[1].read_utf8(0, 4).unwrap(), "2nd!");
    assert_eq!(file.find_sections_by_name(".debug$T").count(), 0);

    assert_eq!(file.code_file_offset(0, 4), Some(0x104));
    assert_eq!(file.code_file_offset(0, 0x10), None);
    assert_eq!(file.code_file_offset(9, 0), None);
    // `.debug$S` is not code.
    assert_eq!(file.code_file_offset(1, 0), None);

    assert_eq!(file.sections[0].characteristics, TEXT);
    assert_eq!(format!("{:?}", file.sections[0].characteristics), "[60000020 exec]");
    assert!(file.sections[1].characteristics.is_removed());
    assert_eq!(format!("{:?}", file.sections[1].characteristics), "[42000040 discard]");
}

#[test]
fn wrong_machine_is_a_mismatch() {
    let mut data = make_object();
    put_u16(&mut data, 0, 0x014c);
    assert!(parse(&SliceReader::new(&data)).unwrap().is_none());
}

#[test]
fn tiny_file_is_a_mismatch() {
    assert!(parse(&SliceReader::new(&[0x64])).unwrap().is_none());
    assert!(parse(&SliceReader::new(b"MZ")).unwrap().is_none());
}

#[test]
fn mz_without_pe_signature_is_a_mismatch() {
    let mut data = make_pe();
    put_u32(&mut data, 0x40, 0x1234);
    assert!(parse(&SliceReader::new(&data)).unwrap().is_none());
}

#[test]
fn pe_debug_directory() {
    let data = make_pe();
    let reader = SliceReader::new(&data);
    let file = parse(&reader).unwrap().unwrap();
    assert_eq!(file.kind, CoffKind::Pe);
    assert_eq!(file.file_header_offset, 0x44);
    assert_eq!(file.optional_header_magic, Some(IMAGE_NT_OPTIONAL_HDR64_MAGIC));
    assert_eq!(file.sections[0].name, ".rdata");
    assert_eq!(
        file.debug_directory,
        vec![DebugDirectoryEntry {
            type_: IMAGE_DEBUG_TYPE_CODEVIEW,
            size: 36,
            rva: 0x1020,
            file_offset: 0x220,
        }]
    );

    let pdb = file.pdb_reference(&reader).unwrap().unwrap();
    assert_eq!(pdb.guid.to_string(), "01234567-89ab-cdef-0123-456789abcdef");
    assert_eq!(pdb.age, 7);
    assert_eq!(pdb.path, "C:\\x\\a.pdb");
}

#[test]
fn resolve_rva() {
    let data = make_pe();
    let file = parse(&SliceReader::new(&data)).unwrap().unwrap();
    assert_eq!(file.resolve_rva(0x1000, 28).unwrap(), 0x200);
    assert_eq!(file.resolve_rva(0x1010, 0xf0).unwrap(), 0x210);
    // Past the end of the virtual size.
    assert!(file.resolve_rva(0x10f0, 0x20).is_err());
    assert!(file.resolve_rva(0x800, 4).is_err());
}
