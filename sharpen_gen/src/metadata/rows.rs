//! Typed views over the rows the generator reads.

use super::{CodedIndex, Metadata, Result, TableId, Token};

#[derive(Debug, Clone, Copy)]
pub struct TypeRefRow {
    pub scope: Option<Token>,
    pub name: u32,
    pub namespace: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct TypeDefRow {
    pub flags: u32,
    pub name: u32,
    pub namespace: u32,
    pub extends: Option<Token>,
    pub field_list: u32,
    pub method_list: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldRow {
    pub flags: u16,
    pub name: u32,
    pub signature: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct MethodDefRow {
    pub impl_flags: u16,
    pub flags: u16,
    pub name: u32,
    pub signature: u32,
    pub param_list: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ParamRow {
    pub flags: u16,
    pub sequence: u16,
    pub name: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct MemberRefRow {
    pub parent: Option<Token>,
    pub name: u32,
    pub signature: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct CustomAttributeRow {
    pub parent: Option<Token>,
    pub constructor: Option<Token>,
    pub value: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ClassLayoutRow {
    pub packing: u16,
    pub size: u32,
    pub parent: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct NestedClassRow {
    pub nested: u32,
    pub enclosing: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct AssemblyRow {
    pub name: u32,
}

impl Metadata {
    fn u16_cell(&self, table: TableId, row: u32, column: usize) -> Result<u16> {
        // Two byte columns always decode to values that fit.
        Ok(self.cell(table, row, column)? as u16)
    }

    pub fn type_ref(&self, row: u32) -> Result<TypeRefRow> {
        let t = TableId::TypeRef;
        Ok(TypeRefRow {
            scope: self.coded(t, row, 0, CodedIndex::ResolutionScope)?,
            name: self.cell(t, row, 1)?,
            namespace: self.cell(t, row, 2)?,
        })
    }

    pub fn type_def(&self, row: u32) -> Result<TypeDefRow> {
        let t = TableId::TypeDef;
        Ok(TypeDefRow {
            flags: self.cell(t, row, 0)?,
            name: self.cell(t, row, 1)?,
            namespace: self.cell(t, row, 2)?,
            extends: self.coded(t, row, 3, CodedIndex::TypeDefOrRef)?,
            field_list: self.cell(t, row, 4)?,
            method_list: self.cell(t, row, 5)?,
        })
    }

    pub fn field(&self, row: u32) -> Result<FieldRow> {
        let t = TableId::Field;
        Ok(FieldRow {
            flags: self.u16_cell(t, row, 0)?,
            name: self.cell(t, row, 1)?,
            signature: self.cell(t, row, 2)?,
        })
    }

    pub fn method_def(&self, row: u32) -> Result<MethodDefRow> {
        let t = TableId::MethodDef;
        Ok(MethodDefRow {
            impl_flags: self.u16_cell(t, row, 1)?,
            flags: self.u16_cell(t, row, 2)?,
            name: self.cell(t, row, 3)?,
            signature: self.cell(t, row, 4)?,
            param_list: self.cell(t, row, 5)?,
        })
    }

    pub fn param(&self, row: u32) -> Result<ParamRow> {
        let t = TableId::Param;
        Ok(ParamRow {
            flags: self.u16_cell(t, row, 0)?,
            sequence: self.u16_cell(t, row, 1)?,
            name: self.cell(t, row, 2)?,
        })
    }

    pub fn member_ref(&self, row: u32) -> Result<MemberRefRow> {
        let t = TableId::MemberRef;
        Ok(MemberRefRow {
            parent: self.coded(t, row, 0, CodedIndex::MemberRefParent)?,
            name: self.cell(t, row, 1)?,
            signature: self.cell(t, row, 2)?,
        })
    }

    pub fn custom_attribute(&self, row: u32) -> Result<CustomAttributeRow> {
        let t = TableId::CustomAttribute;
        Ok(CustomAttributeRow {
            parent: self.coded(t, row, 0, CodedIndex::HasCustomAttribute)?,
            constructor: self.coded(t, row, 1, CodedIndex::CustomAttributeType)?,
            value: self.cell(t, row, 2)?,
        })
    }

    pub fn class_layout(&self, row: u32) -> Result<ClassLayoutRow> {
        let t = TableId::ClassLayout;
        Ok(ClassLayoutRow {
            packing: self.u16_cell(t, row, 0)?,
            size: self.cell(t, row, 1)?,
            parent: self.cell(t, row, 2)?,
        })
    }

    pub fn nested_class(&self, row: u32) -> Result<NestedClassRow> {
        let t = TableId::NestedClass;
        Ok(NestedClassRow {
            nested: self.cell(t, row, 0)?,
            enclosing: self.cell(t, row, 1)?,
        })
    }

    pub fn assembly(&self) -> Result<Option<AssemblyRow>> {
        if self.row_count(TableId::Assembly) == 0 {
            return Ok(None);
        }
        Ok(Some(AssemblyRow {
            name: self.cell(TableId::Assembly, 1, 7)?,
        }))
    }

    pub fn type_spec_signature(&self, row: u32) -> Result<u32> {
        self.cell(TableId::TypeSpec, row, 0)
    }

    /// Rows `start..end` of a list column, where `end` comes from the next
    /// owner row or runs to the end of the table.
    pub(crate) fn list_range(
        &self,
        owner: TableId,
        row: u32,
        column: usize,
        list: TableId,
    ) -> Result<std::ops::Range<u32>> {
        let start = self.cell(owner, row, column)?;
        let end = if row < self.row_count(owner) {
            self.cell(owner, row + 1, column)?
        } else {
            self.row_count(list) + 1
        };
        let start = start.min(self.row_count(list) + 1);
        Ok(start..end.max(start))
    }
}
