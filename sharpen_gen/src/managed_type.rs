use std::fmt;

use crate::metadata::Token;

/// A managed type as it appears in a method or field signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ManagedType {
    Void,
    Bool,
    Char,

    SByte,
    Byte,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    NInt,
    NUInt,

    Float,
    Double,

    String,
    Object,
    TypedReference,

    Pointer(Box<ManagedType>),
    ByRef(Box<ManagedType>),
    FunctionPointer,

    ValueType(Token),
    Class(Token),

    SzArray(Box<ManagedType>),
    Array { element: Box<ManagedType>, rank: u32 },
    GenericInstance { base: Token, arguments: Vec<ManagedType> },
    /// `!n`, a type-level generic parameter.
    GenericParam(u32),
    /// `!!n`, a method-level generic parameter.
    MethodGenericParam(u32),
}

impl ManagedType {
    /// The C# keyword for primitive types.
    pub fn keyword(&self) -> Option<&'static str> {
        Some(match self {
            ManagedType::Void => "void",
            ManagedType::Bool => "bool",
            ManagedType::Char => "char",
            ManagedType::SByte => "sbyte",
            ManagedType::Byte => "byte",
            ManagedType::Short => "short",
            ManagedType::UShort => "ushort",
            ManagedType::Int => "int",
            ManagedType::UInt => "uint",
            ManagedType::Long => "long",
            ManagedType::ULong => "ulong",
            ManagedType::NInt => "nint",
            ManagedType::NUInt => "nuint",
            ManagedType::Float => "float",
            ManagedType::Double => "double",
            ManagedType::String => "string",
            ManagedType::Object => "object",
            _ => return None,
        })
    }

    /// Native spelling of a blittable primitive.
    pub fn c99_primitive(&self) -> Option<&'static str> {
        Some(match self {
            ManagedType::Void => "void",
            ManagedType::SByte => "int8_t",
            ManagedType::Byte => "uint8_t",
            ManagedType::Short => "int16_t",
            ManagedType::UShort => "uint16_t",
            ManagedType::Int => "int32_t",
            ManagedType::UInt => "uint32_t",
            ManagedType::Long => "int64_t",
            ManagedType::ULong => "uint64_t",
            ManagedType::NInt => "intptr_t",
            ManagedType::NUInt => "uintptr_t",
            ManagedType::Float => "float",
            ManagedType::Double => "double",
            ManagedType::Char => "SHARPEN_WCHAR",
            _ => return None,
        })
    }
}

/// Signature-level rendering; named types show their token since resolving
/// names needs the owning module.
impl fmt::Display for ManagedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(keyword) = self.keyword() {
            return f.write_str(keyword);
        }
        match self {
            ManagedType::TypedReference => f.write_str("TypedReference"),
            ManagedType::Pointer(inner) => write!(f, "{inner}*"),
            ManagedType::ByRef(inner) => write!(f, "ref {inner}"),
            ManagedType::FunctionPointer => f.write_str("delegate*"),
            ManagedType::ValueType(token) | ManagedType::Class(token) => {
                write!(f, "{:?}#{}", token.table, token.row)
            }
            ManagedType::SzArray(inner) => write!(f, "{inner}[]"),
            ManagedType::Array { element, rank } => {
                write!(f, "{element}[{}]", ",".repeat(rank.saturating_sub(1) as usize))
            }
            ManagedType::GenericInstance { base, arguments } => {
                write!(f, "{:?}#{}<", base.table, base.row)?;
                for (i, argument) in arguments.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{argument}")?;
                }
                f.write_str(">")
            }
            ManagedType::GenericParam(n) => write!(f, "!{n}"),
            ManagedType::MethodGenericParam(n) => write!(f, "!!{n}"),
            _ => unreachable!("primitives are handled by keyword()"),
        }
    }
}
