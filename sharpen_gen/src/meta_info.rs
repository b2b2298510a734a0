use std::ops::Range;

use crate::metadata::Token;

mod type_flags {
    pub const VISIBILITY_MASK: u32 = 0x0000_0007;
    pub const PUBLIC: u32 = 0x0000_0001;
    pub const LAYOUT_MASK: u32 = 0x0000_0018;
    pub const SEQUENTIAL: u32 = 0x0000_0008;
    pub const EXPLICIT: u32 = 0x0000_0010;
    pub const INTERFACE: u32 = 0x0000_0020;
}

mod member_flags {
    pub const ACCESS_MASK: u16 = 0x0007;
    pub const PUBLIC: u16 = 0x0006;
    pub const STATIC: u16 = 0x0010;
    pub const LITERAL: u16 = 0x0040;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeLayout {
    Auto,
    Sequential,
    Explicit,
}

#[derive(Debug, Clone)]
pub struct TypeInfo {
    pub token: Token,
    pub namespace: String,
    pub name: String,
    pub flags: u32,
    /// Full name of the base type, when it has one.
    pub base: Option<String>,
    pub enclosing: Option<u32>,
    pub(crate) fields: Range<u32>,
    pub(crate) methods: Range<u32>,
}

impl TypeInfo {
    pub fn is_public(&self) -> bool {
        self.flags & type_flags::VISIBILITY_MASK == type_flags::PUBLIC
    }

    pub fn is_nested(&self) -> bool {
        self.enclosing.is_some()
    }

    pub fn is_interface(&self) -> bool {
        self.flags & type_flags::INTERFACE != 0
    }

    pub fn is_enum(&self) -> bool {
        self.base.as_deref() == Some("System.Enum")
    }

    pub fn is_value_type(&self) -> bool {
        self.is_enum() || self.base.as_deref() == Some("System.ValueType")
    }

    pub fn layout(&self) -> TypeLayout {
        match self.flags & type_flags::LAYOUT_MASK {
            type_flags::SEQUENTIAL => TypeLayout::Sequential,
            type_flags::EXPLICIT => TypeLayout::Explicit,
            _ => TypeLayout::Auto,
        }
    }

    pub fn owns_method(&self, row: u32) -> bool {
        self.methods.contains(&row)
    }

    /// Namespace-qualified name; empty namespaces are omitted.
    pub fn qualified_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }
}

#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub token: Token,
    pub name: String,
    pub flags: u16,
    pub(crate) signature: u32,
    pub(crate) params: Range<u32>,
}

impl MethodInfo {
    pub fn is_public(&self) -> bool {
        self.flags & member_flags::ACCESS_MASK == member_flags::PUBLIC
    }

    pub fn is_static(&self) -> bool {
        self.flags & member_flags::STATIC != 0
    }
}

#[derive(Debug, Clone)]
pub struct ParamInfo {
    pub token: Token,
    /// 0 is the return value, parameters count from 1.
    pub sequence: u16,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub token: Token,
    pub name: String,
    pub flags: u16,
    pub(crate) signature: u32,
}

impl FieldInfo {
    pub fn is_static(&self) -> bool {
        self.flags & member_flags::STATIC != 0
    }

    pub fn is_literal(&self) -> bool {
        self.flags & member_flags::LITERAL != 0
    }

    /// Instance storage, i.e. what contributes to a value type's layout.
    pub fn is_instance(&self) -> bool {
        !self.is_static() && !self.is_literal()
    }
}

/// A custom attribute with its type resolved by name.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub parent: Token,
    pub constructor: Token,
    pub namespace: String,
    pub name: String,
    pub(crate) value: u32,
}

impl Attribute {
    pub fn is(&self, full_name: &str) -> bool {
        full_name
            .strip_prefix(self.namespace.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .is_some_and(|rest| rest == self.name)
    }
}
