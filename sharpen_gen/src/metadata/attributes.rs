//! Custom attribute value blobs (ECMA-335 II.23.3).

use super::{MetadataError, Result, check_depth, reader::Reader};
use crate::managed_type::ManagedType;

const PROLOG: u16 = 0x0001;
const NAMED_FIELD: u8 = 0x53;
const NAMED_PROPERTY: u8 = 0x54;

const SERIALIZATION_TYPE: u8 = 0x50;
const TAGGED_OBJECT: u8 = 0x51;
const ENUM: u8 = 0x55;

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Bool(bool),
    Char(u16),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(Option<String>),
    /// A `System.Type` argument, as its serialized type name.
    Type(Option<String>),
    Array(Option<Vec<AttributeValue>>),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(Some(s)) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedKind {
    Field,
    Property,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedArgument {
    pub kind: NamedKind,
    pub name: String,
    pub value: AttributeValue,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeArguments {
    pub fixed: Vec<AttributeValue>,
    pub named: Vec<NamedArgument>,
}

impl AttributeArguments {
    /// Decodes `blob` given the parameter types of the attribute constructor.
    pub fn parse(blob: &[u8], constructor_params: &[ManagedType]) -> Result<Self> {
        // An empty blob stands for a parameterless attribute with no named args.
        if blob.is_empty() && constructor_params.is_empty() {
            return Ok(Self::default());
        }

        let mut r = Reader::new(blob);
        let prolog = r.u16("custom attribute prolog")?;
        if prolog != PROLOG {
            return Err(MetadataError::Malformed {
                what: "custom attribute",
                detail: format!("bad prolog {prolog:#06x}"),
            });
        }

        let fixed = constructor_params
            .iter()
            .map(|param| {
                let ty = ArgType::from_managed(param)?;
                read_value(&mut r, &ty, 0)
            })
            .collect::<Result<Vec<_>>>()?;

        let count = if r.is_empty() {
            0
        } else {
            r.u16("named argument count")?
        };
        let mut named = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let kind = match r.u8("named argument kind")? {
                NAMED_FIELD => NamedKind::Field,
                NAMED_PROPERTY => NamedKind::Property,
                other => {
                    return Err(MetadataError::Malformed {
                        what: "named argument",
                        detail: format!("unknown kind {other:#04x}"),
                    });
                }
            };
            let ty = ArgType::read(&mut r, 0)?;
            let name = read_ser_string(&mut r)?.ok_or(MetadataError::Malformed {
                what: "named argument",
                detail: "null name".into(),
            })?;
            let value = read_value(&mut r, &ty, 0)?;
            named.push(NamedArgument { kind, name, value });
        }

        Ok(Self { fixed, named })
    }

    pub fn named(&self, name: &str) -> Option<&AttributeValue> {
        self.named
            .iter()
            .find(|argument| argument.name == name)
            .map(|argument| &argument.value)
    }
}

/// The subset of types an attribute argument can have.
#[derive(Debug, Clone, PartialEq)]
enum ArgType {
    Bool,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    String,
    Type,
    Boxed,
    SzArray(Box<ArgType>),
}

impl ArgType {
    fn from_element(tag: u8) -> Option<Self> {
        Some(match tag {
            0x02 => ArgType::Bool,
            0x03 => ArgType::Char,
            0x04 => ArgType::I1,
            0x05 => ArgType::U1,
            0x06 => ArgType::I2,
            0x07 => ArgType::U2,
            0x08 => ArgType::I4,
            0x09 => ArgType::U4,
            0x0A => ArgType::I8,
            0x0B => ArgType::U8,
            0x0C => ArgType::R4,
            0x0D => ArgType::R8,
            0x0E => ArgType::String,
            SERIALIZATION_TYPE => ArgType::Type,
            TAGGED_OBJECT => ArgType::Boxed,
            _ => return None,
        })
    }

    fn from_managed(ty: &ManagedType) -> Result<Self> {
        Ok(match ty {
            ManagedType::Bool => ArgType::Bool,
            ManagedType::Char => ArgType::Char,
            ManagedType::SByte => ArgType::I1,
            ManagedType::Byte => ArgType::U1,
            ManagedType::Short => ArgType::I2,
            ManagedType::UShort => ArgType::U2,
            ManagedType::Int => ArgType::I4,
            ManagedType::UInt => ArgType::U4,
            ManagedType::Long => ArgType::I8,
            ManagedType::ULong => ArgType::U8,
            ManagedType::Float => ArgType::R4,
            ManagedType::Double => ArgType::R8,
            ManagedType::String => ArgType::String,
            ManagedType::Object => ArgType::Boxed,
            // The only class a constructor parameter may have is System.Type.
            ManagedType::Class(_) => ArgType::Type,
            ManagedType::SzArray(element) => ArgType::SzArray(Box::new(Self::from_managed(element)?)),
            other => {
                return Err(MetadataError::Unsupported(format!(
                    "custom attribute argument of type {other}"
                )));
            }
        })
    }

    /// Reads a FieldOrPropType.
    fn read(r: &mut Reader<'_>, depth: usize) -> Result<Self> {
        check_depth("attribute argument type", depth)?;
        match r.u8("attribute argument type")? {
            0x1D => Ok(ArgType::SzArray(Box::new(Self::read(r, depth + 1)?))),
            ENUM => Err(MetadataError::Unsupported(
                "enum-typed custom attribute argument".into(),
            )),
            tag => Self::from_element(tag).ok_or(MetadataError::Malformed {
                what: "attribute argument type",
                detail: format!("unknown type tag {tag:#04x}"),
            }),
        }
    }
}

fn read_value(r: &mut Reader<'_>, ty: &ArgType, depth: usize) -> Result<AttributeValue> {
    check_depth("attribute argument", depth)?;
    Ok(match ty {
        ArgType::Bool => AttributeValue::Bool(r.u8("bool argument")? != 0),
        ArgType::Char => AttributeValue::Char(r.u16("char argument")?),
        ArgType::I1 => AttributeValue::Int(i64::from(r.u8("int argument")? as i8)),
        ArgType::U1 => AttributeValue::UInt(u64::from(r.u8("int argument")?)),
        ArgType::I2 => AttributeValue::Int(i64::from(r.u16("int argument")? as i16)),
        ArgType::U2 => AttributeValue::UInt(u64::from(r.u16("int argument")?)),
        ArgType::I4 => AttributeValue::Int(i64::from(r.u32("int argument")? as i32)),
        ArgType::U4 => AttributeValue::UInt(u64::from(r.u32("int argument")?)),
        ArgType::I8 => AttributeValue::Int(r.u64("int argument")? as i64),
        ArgType::U8 => AttributeValue::UInt(r.u64("int argument")?),
        ArgType::R4 => AttributeValue::Float(f64::from(f32::from_bits(r.u32("float argument")?))),
        ArgType::R8 => AttributeValue::Float(f64::from_bits(r.u64("float argument")?)),
        ArgType::String => AttributeValue::String(read_ser_string(r)?),
        ArgType::Type => AttributeValue::Type(read_ser_string(r)?),
        ArgType::Boxed => {
            let inner = ArgType::read(r, depth + 1)?;
            read_value(r, &inner, depth + 1)?
        }
        ArgType::SzArray(element) => {
            let len = r.u32("array length")?;
            if len == u32::MAX {
                AttributeValue::Array(None)
            } else {
                let items = (0..len)
                    .map(|_| read_value(r, element, depth + 1))
                    .collect::<Result<Vec<_>>>()?;
                AttributeValue::Array(Some(items))
            }
        }
    })
}

fn read_ser_string(r: &mut Reader<'_>) -> Result<Option<String>> {
    if r.peek_u8("serialized string")? == 0xFF {
        r.skip(1, "serialized string")?;
        return Ok(None);
    }
    let len = r.compressed_u32("serialized string length")? as usize;
    let bytes = r.bytes(len, "serialized string")?;
    String::from_utf8(bytes.to_vec())
        .map(Some)
        .map_err(|_| MetadataError::InvalidUtf8 {
            what: "serialized string",
        })
}
