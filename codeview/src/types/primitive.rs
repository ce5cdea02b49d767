//! Primitive types
//!
//! Type indexes below the first record index of a type stream are not records. Bits 0-7 select a
//! built-in type and bits 8-11 select a pointer mode.

use super::{Type, TypeIndex};

/// Pointer mode for a near 64-bit pointer to a built-in type.
pub const PRIMITIVE_MODE_64_POINTER: u32 = 6;

macro_rules! primitives {
    (
        $(
            (
                $value:expr,
                $name:ident,
                $size:expr,
                $description:expr
            ),
        )*
    ) => {
        /// The built-in types: `(index, byte size, C/C++ name)`, sorted by index.
        pub static PRIMITIVES: &[(u32, u64, &str)] = &[
            $(
                ($value, $size, $description),
            )*
        ];

        impl TypeIndex {
            $(
                #[doc = concat!("Primitive type: `", $description, "`")]
                pub const $name: TypeIndex = TypeIndex($value);
            )*
        }
    }
}

primitives! {
    // number, cvinfo.h name, byte size, C/C++ name
    (0x0003, T_VOID, 0, "void"),
    (0x0010, T_CHAR, 1, "signed char"),
    (0x0011, T_SHORT, 2, "short"),
    (0x0012, T_LONG, 4, "long"),
    (0x0013, T_QUAD, 8, "long long"),
    (0x0020, T_UCHAR, 1, "unsigned char"),
    (0x0021, T_USHORT, 2, "unsigned short"),
    (0x0022, T_ULONG, 4, "unsigned long"),
    (0x0023, T_UQUAD, 8, "unsigned long long"),
    (0x0030, T_BOOL08, 1, "bool"),
    (0x0031, T_BOOL16, 2, "bool(u16)"),
    (0x0032, T_BOOL32, 4, "bool(u32)"),
    (0x0033, T_BOOL64, 8, "bool(u64)"),
    (0x0040, T_REAL32, 4, "float"),
    (0x0041, T_REAL64, 8, "double"),
    (0x0070, T_RCHAR, 1, "char"), // "char" is distinct from "signed char" and "unsigned char"
    (0x0071, T_WCHAR, 4, "wchar_t"),
    (0x0074, T_INT4, 4, "int"),
    (0x0075, T_UINT4, 4, "unsigned"),
    (0x0103, T_PVOID, 8, "std::nullptr_t"),
}

fn lookup(index: u32) -> Option<(u64, &'static str)> {
    let i = PRIMITIVES
        .binary_search_by_key(&index, |entry| entry.0)
        .ok()?;
    let (_, size, name) = PRIMITIVES[i];
    Some((size, name))
}

/// Resolves a built-in type, or a 64-bit pointer to one.
pub fn primitive_type(type_index: TypeIndex) -> Option<Type> {
    if let Some((byte_size, name)) = lookup(type_index.0) {
        return Some(Type {
            byte_size,
            name: name.to_string(),
        });
    }

    let mode = (type_index.0 >> 8) & 0xf;
    let base = type_index.0 & 0xff;
    if mode == PRIMITIVE_MODE_64_POINTER && type_index.0 >> 12 == 0 && base < 0x80 {
        let (_, name) = lookup(base)?;
        return Some(Type {
            byte_size: 8,
            name: format!("{name} *"),
        });
    }

    None
}

#[test]
fn table_is_sorted() {
    assert!(PRIMITIVES.windows(2).all(|w| w[0].0 < w[1].0));
}

#[test]
fn primitive_sizes_and_names() {
    let cases: &[(u32, u64, &str)] = &[
        (0x10, 1, "signed char"),
        (0x13, 8, "long long"),
        (0x23, 8, "unsigned long long"),
        (0x31, 2, "bool(u16)"),
        (0x41, 8, "double"),
        (0x70, 1, "char"),
        (0x74, 4, "int"),
        (0x75, 4, "unsigned"),
        (0x603, 8, "void *"),
        (0x610, 8, "signed char *"),
        (0x641, 8, "double *"),
        (0x675, 8, "unsigned *"),
        (0x103, 8, "std::nullptr_t"),
    ];
    for &(index, byte_size, name) in cases {
        let ty = primitive_type(TypeIndex(index)).unwrap();
        assert_eq!(ty.byte_size, byte_size, "0x{index:x}");
        assert_eq!(ty.name, name, "0x{index:x}");
    }

    assert!(primitive_type(TypeIndex(0x00)).is_none());
    assert!(primitive_type(TypeIndex(0x403)).is_none());
    assert!(primitive_type(TypeIndex(0x6ff)).is_none());
}
