//! Method and field signature blobs (ECMA-335 II.23.2).

use super::{CodedIndex, MetadataError, Result, check_depth, reader::Reader};
use crate::managed_type::ManagedType;

mod element {
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0A;
    pub const U8: u8 = 0x0B;
    pub const R4: u8 = 0x0C;
    pub const R8: u8 = 0x0D;
    pub const STRING: u8 = 0x0E;
    pub const PTR: u8 = 0x0F;
    pub const BYREF: u8 = 0x10;
    pub const VALUETYPE: u8 = 0x11;
    pub const CLASS: u8 = 0x12;
    pub const VAR: u8 = 0x13;
    pub const ARRAY: u8 = 0x14;
    pub const GENERICINST: u8 = 0x15;
    pub const TYPEDBYREF: u8 = 0x16;
    pub const I: u8 = 0x18;
    pub const U: u8 = 0x19;
    pub const FNPTR: u8 = 0x1B;
    pub const OBJECT: u8 = 0x1C;
    pub const SZARRAY: u8 = 0x1D;
    pub const MVAR: u8 = 0x1E;
    pub const CMOD_REQD: u8 = 0x1F;
    pub const CMOD_OPT: u8 = 0x20;
    pub const SENTINEL: u8 = 0x41;
    pub const PINNED: u8 = 0x45;
}

const HAS_THIS: u8 = 0x20;
const GENERIC: u8 = 0x10;
const FIELD: u8 = 0x06;

/// Decoded MethodDefSig / MethodRefSig.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    pub has_this: bool,
    pub generic_params: u32,
    pub return_type: ManagedType,
    pub params: Vec<ManagedType>,
}

impl MethodSignature {
    pub fn parse(blob: &[u8]) -> Result<Self> {
        let mut r = Reader::new(blob);
        let convention = r.u8("method signature")?;
        let generic_params = if convention & GENERIC != 0 {
            r.compressed_u32("generic parameter count")?
        } else {
            0
        };
        let count = r.compressed_u32("parameter count")?;
        let return_type = read_type(&mut r, 0)?;

        let mut params = Vec::with_capacity(count as usize);
        for _ in 0..count {
            if r.peek_u8("parameter")? == element::SENTINEL {
                r.skip(1, "vararg sentinel")?;
            }
            params.push(read_type(&mut r, 0)?);
        }

        Ok(Self {
            has_this: convention & HAS_THIS != 0,
            generic_params,
            return_type,
            params,
        })
    }
}

/// Decodes a FieldSig into the field's type.
pub fn parse_field(blob: &[u8]) -> Result<ManagedType> {
    let mut r = Reader::new(blob);
    let kind = r.u8("field signature")?;
    if kind != FIELD {
        return Err(MetadataError::Malformed {
            what: "field signature",
            detail: format!("expected {FIELD:#04x}, found {kind:#04x}"),
        });
    }
    read_type(&mut r, 0)
}

/// Decodes a TypeSpec blob.
pub fn parse_type_spec(blob: &[u8]) -> Result<ManagedType> {
    read_type(&mut Reader::new(blob), 0)
}

fn read_type(r: &mut Reader<'_>, depth: usize) -> Result<ManagedType> {
    check_depth("element type", depth)?;
    skip_custom_modifiers(r)?;
    let nested = depth + 1;
    let tag = r.u8("element type")?;
    let ty = match tag {
        element::VOID => ManagedType::Void,
        element::BOOLEAN => ManagedType::Bool,
        element::CHAR => ManagedType::Char,
        element::I1 => ManagedType::SByte,
        element::U1 => ManagedType::Byte,
        element::I2 => ManagedType::Short,
        element::U2 => ManagedType::UShort,
        element::I4 => ManagedType::Int,
        element::U4 => ManagedType::UInt,
        element::I8 => ManagedType::Long,
        element::U8 => ManagedType::ULong,
        element::R4 => ManagedType::Float,
        element::R8 => ManagedType::Double,
        element::I => ManagedType::NInt,
        element::U => ManagedType::NUInt,
        element::STRING => ManagedType::String,
        element::OBJECT => ManagedType::Object,
        element::TYPEDBYREF => ManagedType::TypedReference,
        element::PTR => ManagedType::Pointer(Box::new(read_type(r, nested)?)),
        element::BYREF => ManagedType::ByRef(Box::new(read_type(r, nested)?)),
        element::PINNED => read_type(r, nested)?,
        element::VALUETYPE => ManagedType::ValueType(read_type_token(r)?),
        element::CLASS => ManagedType::Class(read_type_token(r)?),
        element::VAR => ManagedType::GenericParam(r.compressed_u32("generic parameter")?),
        element::MVAR => ManagedType::MethodGenericParam(r.compressed_u32("generic parameter")?),
        element::SZARRAY => ManagedType::SzArray(Box::new(read_type(r, nested)?)),
        element::ARRAY => {
            let element = Box::new(read_type(r, nested)?);
            let rank = r.compressed_u32("array rank")?;
            let sizes = r.compressed_u32("array sizes")?;
            for _ in 0..sizes {
                r.compressed_u32("array size")?;
            }
            let bounds = r.compressed_u32("array bounds")?;
            for _ in 0..bounds {
                r.compressed_u32("array lower bound")?;
            }
            ManagedType::Array { element, rank }
        }
        element::GENERICINST => {
            let _kind = r.u8("generic instance kind")?;
            let base = read_type_token(r)?;
            let count = r.compressed_u32("generic argument count")?;
            let arguments = (0..count)
                .map(|_| read_type(r, nested))
                .collect::<Result<Vec<_>>>()?;
            ManagedType::GenericInstance { base, arguments }
        }
        element::FNPTR => {
            // The pointee signature is consumed but only its shape matters.
            let _ = read_nested_method(r, nested)?;
            ManagedType::FunctionPointer
        }
        other => {
            return Err(MetadataError::Malformed {
                what: "element type",
                detail: format!("unknown element type {other:#04x}"),
            });
        }
    };
    Ok(ty)
}

fn read_nested_method(r: &mut Reader<'_>, depth: usize) -> Result<()> {
    let convention = r.u8("function pointer signature")?;
    if convention & GENERIC != 0 {
        r.compressed_u32("generic parameter count")?;
    }
    let count = r.compressed_u32("parameter count")?;
    read_type(r, depth)?;
    for _ in 0..count {
        if r.peek_u8("parameter")? == element::SENTINEL {
            r.skip(1, "vararg sentinel")?;
        }
        read_type(r, depth)?;
    }
    Ok(())
}

fn skip_custom_modifiers(r: &mut Reader<'_>) -> Result<()> {
    while !r.is_empty() {
        match r.peek_u8("custom modifier")? {
            element::CMOD_REQD | element::CMOD_OPT => {
                r.skip(1, "custom modifier")?;
                r.compressed_u32("custom modifier type")?;
            }
            _ => break,
        }
    }
    Ok(())
}

fn read_type_token(r: &mut Reader<'_>) -> Result<super::Token> {
    let raw = r.compressed_u32("type reference")?;
    CodedIndex::TypeDefOrRef
        .decode(raw)?
        .ok_or(MetadataError::BadIndex {
            what: "type reference",
            index: raw,
        })
}
