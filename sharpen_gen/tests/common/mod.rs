//! In-memory writer for small ECMA-335 images.
//!
//! Produces a PE32 file with one `.text` section holding the CLI header and a
//! metadata root with `#~`, `#Strings`, `#US`, `#GUID` and `#Blob` streams.
//! All heap and table indexes are two bytes wide.

#![allow(dead_code)]

use rustc_hash::FxHashMap;

pub const PUBLIC_STATIC: u16 = 0x0006 | 0x0010;
pub const PUBLIC_INSTANCE: u16 = 0x0006;
pub const PRIVATE_STATIC: u16 = 0x0001 | 0x0010;

const FIELD_PUBLIC: u16 = 0x0006;
const FIELD_STATIC: u16 = 0x0010;
const FIELD_LITERAL: u16 = 0x0040;

const TYPE_PUBLIC: u32 = 0x0000_0001;
const TYPE_NESTED_PUBLIC: u32 = 0x0000_0002;
const TYPE_SEQUENTIAL: u32 = 0x0000_0008;
const TYPE_EXPLICIT: u32 = 0x0000_0010;
const TYPE_SEALED: u32 = 0x0000_0100;

const OBJECT_REF: u32 = 1;
const VALUE_TYPE_REF: u32 = 2;
const ENUM_REF: u32 = 3;
const MULTICAST_DELEGATE_REF: u32 = 4;

/// Signature blob helpers.
pub mod sig {
    pub const VOID: &[u8] = &[0x01];
    pub const BOOL: &[u8] = &[0x02];
    pub const CHAR: &[u8] = &[0x03];
    pub const I1: &[u8] = &[0x04];
    pub const U1: &[u8] = &[0x05];
    pub const I2: &[u8] = &[0x06];
    pub const U2: &[u8] = &[0x07];
    pub const I4: &[u8] = &[0x08];
    pub const U4: &[u8] = &[0x09];
    pub const I8: &[u8] = &[0x0A];
    pub const U8: &[u8] = &[0x0B];
    pub const R4: &[u8] = &[0x0C];
    pub const R8: &[u8] = &[0x0D];
    pub const STRING: &[u8] = &[0x0E];
    pub const NINT: &[u8] = &[0x18];
    pub const NUINT: &[u8] = &[0x19];
    pub const OBJECT: &[u8] = &[0x1C];

    pub fn ptr(inner: &[u8]) -> Vec<u8> {
        let mut out = vec![0x0F];
        out.extend_from_slice(inner);
        out
    }

    pub fn byref(inner: &[u8]) -> Vec<u8> {
        let mut out = vec![0x10];
        out.extend_from_slice(inner);
        out
    }

    pub fn szarray(inner: &[u8]) -> Vec<u8> {
        let mut out = vec![0x1D];
        out.extend_from_slice(inner);
        out
    }

    /// `valuetype` of a TypeDef row.
    pub fn value_type(type_def: u32) -> Vec<u8> {
        let mut out = vec![0x11];
        out.extend(compressed(type_def << 2));
        out
    }

    /// `valuetype` of a TypeRef row.
    pub fn external_value_type(type_ref: u32) -> Vec<u8> {
        let mut out = vec![0x11];
        out.extend(compressed((type_ref << 2) | 1));
        out
    }

    /// `delegate* unmanaged<int, void>`.
    pub fn fnptr() -> Vec<u8> {
        vec![0x1B, 0x09, 0x01, 0x01, 0x08]
    }

    fn with_convention(convention: u8, ret: &[u8], params: &[&[u8]]) -> Vec<u8> {
        let mut out = vec![convention];
        out.extend(compressed(params.len() as u32));
        out.extend_from_slice(ret);
        for param in params {
            out.extend_from_slice(param);
        }
        out
    }

    pub fn method(ret: &[u8], params: &[&[u8]]) -> Vec<u8> {
        with_convention(0x00, ret, params)
    }

    pub fn instance_method(ret: &[u8], params: &[&[u8]]) -> Vec<u8> {
        with_convention(0x20, ret, params)
    }

    pub fn generic_method(ret: &[u8], params: &[&[u8]]) -> Vec<u8> {
        let mut out = vec![0x10, 0x01];
        out.extend(compressed(params.len() as u32));
        out.extend_from_slice(ret);
        for param in params {
            out.extend_from_slice(param);
        }
        out
    }

    pub fn field(ty: &[u8]) -> Vec<u8> {
        let mut out = vec![0x06];
        out.extend_from_slice(ty);
        out
    }

    pub fn compressed(value: u32) -> Vec<u8> {
        match value {
            0..=0x7F => vec![value as u8],
            0x80..=0x3FFF => vec![0x80 | (value >> 8) as u8, value as u8],
            _ => vec![
                0xC0 | (value >> 24) as u8,
                (value >> 16) as u8,
                (value >> 8) as u8,
                value as u8,
            ],
        }
    }
}

/// Custom attribute value blobs.
pub mod blob {
    use super::sig::compressed;

    pub enum Named<'a> {
        String(&'a str, &'a str),
        NullString(&'a str),
        Types(&'a str, &'a [&'a str]),
        Int(&'a str, i32),
    }

    fn ser_string(out: &mut Vec<u8>, s: &str) {
        out.extend(compressed(s.len() as u32));
        out.extend_from_slice(s.as_bytes());
    }

    pub fn args(fixed_strings: &[&str], named: &[Named<'_>]) -> Vec<u8> {
        let mut out = vec![0x01, 0x00];
        for s in fixed_strings {
            ser_string(&mut out, s);
        }
        out.extend((named.len() as u16).to_le_bytes());
        for arg in named {
            out.push(0x53);
            match arg {
                Named::String(name, value) => {
                    out.push(0x0E);
                    ser_string(&mut out, name);
                    ser_string(&mut out, value);
                }
                Named::NullString(name) => {
                    out.push(0x0E);
                    ser_string(&mut out, name);
                    out.push(0xFF);
                }
                Named::Types(name, types) => {
                    out.extend([0x1D, 0x50]);
                    ser_string(&mut out, name);
                    out.extend((types.len() as u32).to_le_bytes());
                    for ty in *types {
                        ser_string(&mut out, ty);
                    }
                }
                Named::Int(name, value) => {
                    out.push(0x08);
                    ser_string(&mut out, name);
                    out.extend(value.to_le_bytes());
                }
            }
        }
        out
    }

    pub fn string(value: &str) -> Vec<u8> {
        args(&[value], &[])
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Parent {
    Method(u32),
    Param(u32),
    TypeDef(u32),
    Assembly,
}

impl Parent {
    fn coded(self) -> u16 {
        let (row, tag) = match self {
            Parent::Method(row) => (row, 0),
            Parent::TypeDef(row) => (row, 3),
            Parent::Param(row) => (row, 4),
            Parent::Assembly => (1, 14),
        };
        ((row << 5) | tag) as u16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Class,
    /// Sequential value type.
    Struct,
    /// Value type with auto layout.
    AutoStruct,
    /// Value type with explicit layout.
    ExplicitStruct,
    Enum,
    Delegate,
}

/// Well-known attribute constructors, as MemberRef rows.
#[derive(Debug, Clone, Copy)]
pub struct Attributes {
    pub unmanaged_callers_only: u32,
    pub export: u32,
    pub c99_type: u32,
    pub c99_decl_code: u32,
    pub c99_include: u32,
}

#[derive(Default)]
pub struct ImageBuilder {
    strings: Vec<u8>,
    string_offsets: FxHashMap<String, u16>,
    blobs: Vec<u8>,
    assembly_name: Option<String>,

    type_refs: Vec<[u16; 3]>,
    type_defs: Vec<(u32, u16, u16, u16, u16, u16)>,
    fields: Vec<[u16; 3]>,
    methods: Vec<(u16, u16, u16, u16)>,
    params: Vec<[u16; 3]>,
    member_refs: Vec<[u16; 3]>,
    custom_attributes: Vec<[u16; 3]>,
    class_layouts: Vec<(u16, u32, u16)>,
    nested: Vec<[u16; 2]>,
}

impl ImageBuilder {
    /// A builder whose Assembly row is named `assembly_name`. The first four
    /// TypeRefs are `System.Object`, `System.ValueType`, `System.Enum` and
    /// `System.MulticastDelegate`; TypeDef row 1 is `<Module>`.
    pub fn new(assembly_name: &str) -> Self {
        let mut builder = Self::without_assembly();
        builder.assembly_name = Some(assembly_name.to_owned());
        builder
    }

    pub fn without_assembly() -> Self {
        let mut builder = Self {
            strings: vec![0],
            blobs: vec![0],
            ..Self::default()
        };
        builder.type_ref("System", "Object");
        builder.type_ref("System", "ValueType");
        builder.type_ref("System", "Enum");
        builder.type_ref("System", "MulticastDelegate");
        let module = builder.string("<Module>");
        builder.type_defs.push((0, module, 0, 0, 1, 1));
        builder
    }

    pub fn string(&mut self, s: &str) -> u16 {
        if s.is_empty() {
            return 0;
        }
        if let Some(offset) = self.string_offsets.get(s) {
            return *offset;
        }
        let offset = self.strings.len() as u16;
        self.strings.extend_from_slice(s.as_bytes());
        self.strings.push(0);
        self.string_offsets.insert(s.to_owned(), offset);
        offset
    }

    pub fn blob(&mut self, bytes: &[u8]) -> u16 {
        let offset = self.blobs.len() as u16;
        self.blobs.extend(sig::compressed(bytes.len() as u32));
        self.blobs.extend_from_slice(bytes);
        offset
    }

    /// Adds a TypeRef scoped to the module; returns its row.
    pub fn type_ref(&mut self, namespace: &str, name: &str) -> u32 {
        let row = [(1 << 2), self.string(name), self.string(namespace)];
        self.type_refs.push(row);
        self.type_refs.len() as u32
    }

    /// Adds a TypeRef plus a `.ctor` MemberRef on it; returns the MemberRef row.
    pub fn attribute_ctor(&mut self, namespace: &str, name: &str, params: &[&[u8]]) -> u32 {
        let type_ref = self.type_ref(namespace, name);
        let signature = sig::instance_method(sig::VOID, params);
        let row = [
            ((type_ref << 3) | 1) as u16,
            self.string(".ctor"),
            self.blob(&signature),
        ];
        self.member_refs.push(row);
        self.member_refs.len() as u32
    }

    pub fn sharpen_attributes(&mut self) -> Attributes {
        Attributes {
            unmanaged_callers_only: self.attribute_ctor(
                "System.Runtime.InteropServices",
                "UnmanagedCallersOnlyAttribute",
                &[],
            ),
            export: self.attribute_ctor("Sharpen", "ExportAttribute", &[]),
            c99_type: self.attribute_ctor("Sharpen", "C99TypeAttribute", &[sig::STRING]),
            c99_decl_code: self.attribute_ctor("Sharpen", "C99DeclCodeAttribute", &[sig::STRING]),
            c99_include: self.attribute_ctor("Sharpen", "C99IncludeAttribute", &[sig::STRING]),
        }
    }

    /// Adds a top-level type; fields and methods added next belong to it.
    pub fn type_def(&mut self, namespace: &str, name: &str, kind: TypeKind) -> u32 {
        self.push_type(namespace, name, kind, TYPE_PUBLIC)
    }

    pub fn nested_type_def(&mut self, enclosing: u32, name: &str, kind: TypeKind) -> u32 {
        let row = self.push_type("", name, kind, TYPE_NESTED_PUBLIC);
        self.nested.push([row as u16, enclosing as u16]);
        row
    }

    fn push_type(&mut self, namespace: &str, name: &str, kind: TypeKind, visibility: u32) -> u32 {
        let (flags, base) = match kind {
            TypeKind::Class => (visibility, OBJECT_REF),
            TypeKind::Struct => (visibility | TYPE_SEQUENTIAL | TYPE_SEALED, VALUE_TYPE_REF),
            TypeKind::AutoStruct => (visibility | TYPE_SEALED, VALUE_TYPE_REF),
            TypeKind::ExplicitStruct => (visibility | TYPE_EXPLICIT | TYPE_SEALED, VALUE_TYPE_REF),
            TypeKind::Enum => (visibility | TYPE_SEALED, ENUM_REF),
            TypeKind::Delegate => (visibility | TYPE_SEALED, MULTICAST_DELEGATE_REF),
        };
        let row = (
            flags,
            self.string(name),
            self.string(namespace),
            ((base << 2) | 1) as u16,
            self.fields.len() as u16 + 1,
            self.methods.len() as u16 + 1,
        );
        self.type_defs.push(row);
        self.type_defs.len() as u32
    }

    pub fn field(&mut self, name: &str, ty: &[u8]) -> u32 {
        self.push_field(FIELD_PUBLIC, name, ty)
    }

    pub fn static_field(&mut self, name: &str, ty: &[u8]) -> u32 {
        self.push_field(FIELD_PUBLIC | FIELD_STATIC, name, ty)
    }

    /// Adds the `value__` field and one literal member.
    pub fn enum_fields(&mut self, underlying: &[u8], self_type: u32) -> u32 {
        let value = self.push_field(FIELD_PUBLIC | 0x0200 | 0x0400, "value__", underlying);
        self.push_field(
            FIELD_PUBLIC | FIELD_STATIC | FIELD_LITERAL,
            "First",
            &sig::value_type(self_type),
        );
        value
    }

    fn push_field(&mut self, flags: u16, name: &str, ty: &[u8]) -> u32 {
        let row = [flags, self.string(name), self.blob(&sig::field(ty))];
        self.fields.push(row);
        self.fields.len() as u32
    }

    /// Adds a method to the last type; params added next belong to it.
    pub fn method(&mut self, name: &str, flags: u16, signature: &[u8]) -> u32 {
        let row = (
            flags,
            self.string(name),
            self.blob(signature),
            self.params.len() as u16 + 1,
        );
        self.methods.push(row);
        self.methods.len() as u32
    }

    /// Sequence 0 is the return value.
    pub fn param(&mut self, sequence: u16, name: &str) -> u32 {
        let row = [0, sequence, self.string(name)];
        self.params.push(row);
        self.params.len() as u32
    }

    pub fn custom_attribute(&mut self, parent: Parent, ctor: u32, value: &[u8]) {
        let row = [parent.coded(), ((ctor << 3) | 3) as u16, self.blob(value)];
        self.custom_attributes.push(row);
    }

    pub fn class_layout(&mut self, type_def: u32, packing: u16, size: u32) {
        self.class_layouts.push((packing, size, type_def as u16));
    }

    pub fn build(mut self) -> Vec<u8> {
        let assembly_name = self
            .assembly_name
            .clone()
            .map(|name| self.string(&name));
        let module_name = self.string("Module.dll");
        let tables = self.tables_stream(module_name, assembly_name);
        let metadata = metadata_root(&[
            ("#~", tables),
            ("#Strings", pad4(self.strings.clone())),
            ("#US", vec![0; 4]),
            ("#GUID", vec![0; 16]),
            ("#Blob", pad4(self.blobs.clone())),
        ]);
        pe_image(&metadata)
    }

    fn tables_stream(&self, module_name: u16, assembly_name: Option<u16>) -> Vec<u8> {
        let mut present: Vec<(u8, u32, Vec<u8>)> = Vec::new();
        let mut table = |id: u8, rows: usize, bytes: Vec<u8>| {
            if rows > 0 {
                present.push((id, rows as u32, bytes));
            }
        };

        let mut module = Vec::new();
        module.extend(0u16.to_le_bytes());
        module.extend(module_name.to_le_bytes());
        module.extend([0u8; 6]);
        table(0x00, 1, module);

        table(0x01, self.type_refs.len(), flat16(&self.type_refs));

        let mut type_defs = Vec::new();
        for (flags, name, namespace, extends, fields, methods) in &self.type_defs {
            type_defs.extend(flags.to_le_bytes());
            for cell in [name, namespace, extends, fields, methods] {
                type_defs.extend(cell.to_le_bytes());
            }
        }
        table(0x02, self.type_defs.len(), type_defs);

        table(0x04, self.fields.len(), flat16(&self.fields));

        let mut methods = Vec::new();
        for (flags, name, signature, params) in &self.methods {
            methods.extend(0u32.to_le_bytes());
            methods.extend(0u16.to_le_bytes());
            for cell in [flags, name, signature, params] {
                methods.extend(cell.to_le_bytes());
            }
        }
        table(0x06, self.methods.len(), methods);

        table(0x08, self.params.len(), flat16(&self.params));
        table(0x0A, self.member_refs.len(), flat16(&self.member_refs));
        table(0x0C, self.custom_attributes.len(), flat16(&self.custom_attributes));

        let mut layouts = Vec::new();
        for (packing, size, parent) in &self.class_layouts {
            layouts.extend(packing.to_le_bytes());
            layouts.extend(size.to_le_bytes());
            layouts.extend(parent.to_le_bytes());
        }
        table(0x0F, self.class_layouts.len(), layouts);

        if let Some(name) = assembly_name {
            let mut assembly = Vec::new();
            assembly.extend(0x8004u32.to_le_bytes());
            assembly.extend([1u8, 0, 0, 0, 0, 0, 0, 0]);
            assembly.extend(0u32.to_le_bytes());
            assembly.extend(0u16.to_le_bytes());
            assembly.extend(name.to_le_bytes());
            assembly.extend(0u16.to_le_bytes());
            table(0x20, 1, assembly);
        }

        table(0x29, self.nested.len(), flat16(&self.nested));

        let mut out = Vec::new();
        out.extend(0u32.to_le_bytes());
        out.extend([2u8, 0, 0, 1]);
        let valid = present.iter().fold(0u64, |mask, (id, _, _)| mask | (1 << id));
        out.extend(valid.to_le_bytes());
        out.extend(0u64.to_le_bytes());
        for (_, rows, _) in &present {
            out.extend(rows.to_le_bytes());
        }
        for (_, _, bytes) in &present {
            out.extend_from_slice(bytes);
        }
        pad4(out)
    }
}

fn flat16<const N: usize>(rows: &[[u16; N]]) -> Vec<u8> {
    rows.iter()
        .flat_map(|row| row.iter().flat_map(|cell| cell.to_le_bytes()))
        .collect()
}

fn pad4(mut bytes: Vec<u8>) -> Vec<u8> {
    bytes.resize(bytes.len().next_multiple_of(4), 0);
    bytes
}

pub fn metadata_root(streams: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let header_len: usize = 32
        + streams
            .iter()
            .map(|(name, _)| 8 + (name.len() + 1).next_multiple_of(4))
            .sum::<usize>();

    let mut out = Vec::new();
    out.extend(0x424A_5342u32.to_le_bytes());
    out.extend(1u16.to_le_bytes());
    out.extend(1u16.to_le_bytes());
    out.extend(0u32.to_le_bytes());
    out.extend(12u32.to_le_bytes());
    out.extend(b"v4.0.30319\0\0");
    out.extend(0u16.to_le_bytes());
    out.extend((streams.len() as u16).to_le_bytes());

    let mut offset = header_len;
    for (name, bytes) in streams {
        out.extend((offset as u32).to_le_bytes());
        out.extend((bytes.len() as u32).to_le_bytes());
        let mut padded = name.as_bytes().to_vec();
        padded.push(0);
        out.extend(pad4(padded));
        offset += bytes.len();
    }
    for (_, bytes) in streams {
        out.extend_from_slice(bytes);
    }
    out
}

const TEXT_RVA: u32 = 0x2000;
const TEXT_RAW: u32 = 0x200;
const CLI_HEADER_SIZE: u32 = 72;

/// Wraps a metadata root in a minimal PE32 image.
pub fn pe_image(metadata: &[u8]) -> Vec<u8> {
    let text_len = (CLI_HEADER_SIZE as usize + metadata.len()).next_multiple_of(0x200) as u32;
    let mut out = vec![0u8; TEXT_RAW as usize];

    out[0..2].copy_from_slice(b"MZ");
    out[0x3C..0x40].copy_from_slice(&0x80u32.to_le_bytes());

    let pe = 0x80;
    out[pe..pe + 4].copy_from_slice(b"PE\0\0");
    out[pe + 4..pe + 6].copy_from_slice(&0x014Cu16.to_le_bytes());
    out[pe + 6..pe + 8].copy_from_slice(&1u16.to_le_bytes());
    out[pe + 20..pe + 22].copy_from_slice(&0xE0u16.to_le_bytes());
    out[pe + 22..pe + 24].copy_from_slice(&0x2102u16.to_le_bytes());

    let optional = pe + 24;
    out[optional..optional + 2].copy_from_slice(&0x010Bu16.to_le_bytes());
    out[optional + 92..optional + 96].copy_from_slice(&16u32.to_le_bytes());
    let cli_dir = optional + 96 + 14 * 8;
    out[cli_dir..cli_dir + 4].copy_from_slice(&TEXT_RVA.to_le_bytes());
    out[cli_dir + 4..cli_dir + 8].copy_from_slice(&CLI_HEADER_SIZE.to_le_bytes());

    let section = optional + 0xE0;
    out[section..section + 5].copy_from_slice(b".text");
    out[section + 8..section + 12].copy_from_slice(&text_len.to_le_bytes());
    out[section + 12..section + 16].copy_from_slice(&TEXT_RVA.to_le_bytes());
    out[section + 16..section + 20].copy_from_slice(&text_len.to_le_bytes());
    out[section + 20..section + 24].copy_from_slice(&TEXT_RAW.to_le_bytes());

    let mut cli = Vec::new();
    cli.extend(CLI_HEADER_SIZE.to_le_bytes());
    cli.extend(2u16.to_le_bytes());
    cli.extend(5u16.to_le_bytes());
    cli.extend((TEXT_RVA + CLI_HEADER_SIZE).to_le_bytes());
    cli.extend((metadata.len() as u32).to_le_bytes());
    cli.extend(1u32.to_le_bytes());
    cli.resize(CLI_HEADER_SIZE as usize, 0);

    out.extend(cli);
    out.extend_from_slice(metadata);
    out.resize((TEXT_RAW + text_len) as usize, 0);
    out
}

/// A PE32 image with no CLI header directory.
pub fn native_image() -> Vec<u8> {
    let mut image = pe_image(&[]);
    let cli_dir = 0x80 + 24 + 96 + 14 * 8;
    image[cli_dir..cli_dir + 8].fill(0);
    image
}

/// `Example.Managed.Exports.MyExport(int a) -> int`, exported as `FancyName`.
pub fn fancy_name_image() -> Vec<u8> {
    let mut b = ImageBuilder::new("Example.Managed");
    let attrs = b.sharpen_attributes();
    b.type_def("Example.Managed", "Exports", TypeKind::Class);
    let method = b.method("MyExport", PUBLIC_STATIC, &sig::method(sig::I4, &[sig::I4]));
    b.param(1, "a");
    b.custom_attribute(
        Parent::Method(method),
        attrs.unmanaged_callers_only,
        &blob::args(&[], &[blob::Named::String("EntryPoint", "FancyName")]),
    );
    b.build()
}
