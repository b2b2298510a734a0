//! The `#~` tables stream: schema for every ECMA-335 table, row/column
//! widths, and raw cell access.

use super::{MetadataError, Result, reader::Reader};

pub const TABLE_COUNT: usize = 0x2D;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TableId {
    Module = 0x00,
    TypeRef = 0x01,
    TypeDef = 0x02,
    FieldPtr = 0x03,
    Field = 0x04,
    MethodPtr = 0x05,
    MethodDef = 0x06,
    ParamPtr = 0x07,
    Param = 0x08,
    InterfaceImpl = 0x09,
    MemberRef = 0x0A,
    Constant = 0x0B,
    CustomAttribute = 0x0C,
    FieldMarshal = 0x0D,
    DeclSecurity = 0x0E,
    ClassLayout = 0x0F,
    FieldLayout = 0x10,
    StandAloneSig = 0x11,
    EventMap = 0x12,
    EventPtr = 0x13,
    Event = 0x14,
    PropertyMap = 0x15,
    PropertyPtr = 0x16,
    Property = 0x17,
    MethodSemantics = 0x18,
    MethodImpl = 0x19,
    ModuleRef = 0x1A,
    TypeSpec = 0x1B,
    ImplMap = 0x1C,
    FieldRva = 0x1D,
    EncLog = 0x1E,
    EncMap = 0x1F,
    Assembly = 0x20,
    AssemblyProcessor = 0x21,
    AssemblyOs = 0x22,
    AssemblyRef = 0x23,
    AssemblyRefProcessor = 0x24,
    AssemblyRefOs = 0x25,
    File = 0x26,
    ExportedType = 0x27,
    ManifestResource = 0x28,
    NestedClass = 0x29,
    GenericParam = 0x2A,
    MethodSpec = 0x2B,
    GenericParamConstraint = 0x2C,
}

impl TableId {
    pub const ALL: [TableId; TABLE_COUNT] = [
        TableId::Module,
        TableId::TypeRef,
        TableId::TypeDef,
        TableId::FieldPtr,
        TableId::Field,
        TableId::MethodPtr,
        TableId::MethodDef,
        TableId::ParamPtr,
        TableId::Param,
        TableId::InterfaceImpl,
        TableId::MemberRef,
        TableId::Constant,
        TableId::CustomAttribute,
        TableId::FieldMarshal,
        TableId::DeclSecurity,
        TableId::ClassLayout,
        TableId::FieldLayout,
        TableId::StandAloneSig,
        TableId::EventMap,
        TableId::EventPtr,
        TableId::Event,
        TableId::PropertyMap,
        TableId::PropertyPtr,
        TableId::Property,
        TableId::MethodSemantics,
        TableId::MethodImpl,
        TableId::ModuleRef,
        TableId::TypeSpec,
        TableId::ImplMap,
        TableId::FieldRva,
        TableId::EncLog,
        TableId::EncMap,
        TableId::Assembly,
        TableId::AssemblyProcessor,
        TableId::AssemblyOs,
        TableId::AssemblyRef,
        TableId::AssemblyRefProcessor,
        TableId::AssemblyRefOs,
        TableId::File,
        TableId::ExportedType,
        TableId::ManifestResource,
        TableId::NestedClass,
        TableId::GenericParam,
        TableId::MethodSpec,
        TableId::GenericParamConstraint,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// A row reference: table plus 1-based row number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token {
    pub table: TableId,
    pub row: u32,
}

impl Token {
    pub fn new(table: TableId, row: u32) -> Self {
        Self { table, row }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodedIndex {
    TypeDefOrRef,
    HasConstant,
    HasCustomAttribute,
    HasFieldMarshal,
    HasDeclSecurity,
    MemberRefParent,
    HasSemantics,
    MethodDefOrRef,
    MemberForwarded,
    Implementation,
    CustomAttributeType,
    ResolutionScope,
    TypeOrMethodDef,
}

impl CodedIndex {
    /// Tables in tag order; `None` marks tags ECMA-335 leaves unused.
    fn tables(self) -> &'static [Option<TableId>] {
        use TableId::*;
        match self {
            CodedIndex::TypeDefOrRef => &[Some(TypeDef), Some(TypeRef), Some(TypeSpec)],
            CodedIndex::HasConstant => &[Some(Field), Some(Param), Some(Property)],
            CodedIndex::HasCustomAttribute => &[
                Some(MethodDef),
                Some(Field),
                Some(TypeRef),
                Some(TypeDef),
                Some(Param),
                Some(InterfaceImpl),
                Some(MemberRef),
                Some(Module),
                Some(DeclSecurity),
                Some(Property),
                Some(Event),
                Some(StandAloneSig),
                Some(ModuleRef),
                Some(TypeSpec),
                Some(Assembly),
                Some(AssemblyRef),
                Some(File),
                Some(ExportedType),
                Some(ManifestResource),
                Some(GenericParam),
                Some(GenericParamConstraint),
                Some(MethodSpec),
            ],
            CodedIndex::HasFieldMarshal => &[Some(Field), Some(Param)],
            CodedIndex::HasDeclSecurity => &[Some(TypeDef), Some(MethodDef), Some(Assembly)],
            CodedIndex::MemberRefParent => &[
                Some(TypeDef),
                Some(TypeRef),
                Some(ModuleRef),
                Some(MethodDef),
                Some(TypeSpec),
            ],
            CodedIndex::HasSemantics => &[Some(Event), Some(Property)],
            CodedIndex::MethodDefOrRef => &[Some(MethodDef), Some(MemberRef)],
            CodedIndex::MemberForwarded => &[Some(Field), Some(MethodDef)],
            CodedIndex::Implementation => &[Some(File), Some(AssemblyRef), Some(ExportedType)],
            CodedIndex::CustomAttributeType => {
                &[None, None, Some(MethodDef), Some(MemberRef), None]
            }
            CodedIndex::ResolutionScope => {
                &[Some(Module), Some(ModuleRef), Some(AssemblyRef), Some(TypeRef)]
            }
            CodedIndex::TypeOrMethodDef => &[Some(TypeDef), Some(MethodDef)],
        }
    }

    fn tag_bits(self) -> u32 {
        let tags = self.tables().len() as u32;
        u32::BITS - (tags - 1).leading_zeros()
    }

    /// Splits a raw coded value; `None` for a null reference.
    pub fn decode(self, value: u32) -> Result<Option<Token>> {
        let bits = self.tag_bits();
        let tag = (value & ((1 << bits) - 1)) as usize;
        let row = value >> bits;
        if row == 0 {
            return Ok(None);
        }
        match self.tables().get(tag).copied().flatten() {
            Some(table) => Ok(Some(Token::new(table, row))),
            None => Err(MetadataError::BadIndex {
                what: "coded index tag",
                index: value,
            }),
        }
    }

    fn width(self, rows: &[u32; TABLE_COUNT]) -> usize {
        let limit = 1u32 << (16 - self.tag_bits());
        let largest = self
            .tables()
            .iter()
            .flatten()
            .map(|table| rows[table.index()])
            .max()
            .unwrap_or(0);
        if largest < limit { 2 } else { 4 }
    }
}

#[derive(Debug, Clone, Copy)]
enum Column {
    U16,
    U32,
    Str,
    Guid,
    Blob,
    Index(TableId),
    Coded(CodedIndex),
}

fn schema(table: TableId) -> &'static [Column] {
    use CodedIndex as C;
    use Column::*;
    match table {
        TableId::Module => &[U16, Str, Guid, Guid, Guid],
        TableId::TypeRef => &[Coded(C::ResolutionScope), Str, Str],
        TableId::TypeDef => &[
            U32,
            Str,
            Str,
            Coded(C::TypeDefOrRef),
            Index(TableId::Field),
            Index(TableId::MethodDef),
        ],
        TableId::FieldPtr => &[Index(TableId::Field)],
        TableId::Field => &[U16, Str, Blob],
        TableId::MethodPtr => &[Index(TableId::MethodDef)],
        TableId::MethodDef => &[U32, U16, U16, Str, Blob, Index(TableId::Param)],
        TableId::ParamPtr => &[Index(TableId::Param)],
        TableId::Param => &[U16, U16, Str],
        TableId::InterfaceImpl => &[Index(TableId::TypeDef), Coded(C::TypeDefOrRef)],
        TableId::MemberRef => &[Coded(C::MemberRefParent), Str, Blob],
        // The constant type byte is followed by a padding byte.
        TableId::Constant => &[U16, Coded(C::HasConstant), Blob],
        TableId::CustomAttribute => &[
            Coded(C::HasCustomAttribute),
            Coded(C::CustomAttributeType),
            Blob,
        ],
        TableId::FieldMarshal => &[Coded(C::HasFieldMarshal), Blob],
        TableId::DeclSecurity => &[U16, Coded(C::HasDeclSecurity), Blob],
        TableId::ClassLayout => &[U16, U32, Index(TableId::TypeDef)],
        TableId::FieldLayout => &[U32, Index(TableId::Field)],
        TableId::StandAloneSig => &[Blob],
        TableId::EventMap => &[Index(TableId::TypeDef), Index(TableId::Event)],
        TableId::EventPtr => &[Index(TableId::Event)],
        TableId::Event => &[U16, Str, Coded(C::TypeDefOrRef)],
        TableId::PropertyMap => &[Index(TableId::TypeDef), Index(TableId::Property)],
        TableId::PropertyPtr => &[Index(TableId::Property)],
        TableId::Property => &[U16, Str, Blob],
        TableId::MethodSemantics => &[U16, Index(TableId::MethodDef), Coded(C::HasSemantics)],
        TableId::MethodImpl => &[
            Index(TableId::TypeDef),
            Coded(C::MethodDefOrRef),
            Coded(C::MethodDefOrRef),
        ],
        TableId::ModuleRef => &[Str],
        TableId::TypeSpec => &[Blob],
        TableId::ImplMap => &[U16, Coded(C::MemberForwarded), Str, Index(TableId::ModuleRef)],
        TableId::FieldRva => &[U32, Index(TableId::Field)],
        TableId::EncLog => &[U32, U32],
        TableId::EncMap => &[U32],
        TableId::Assembly => &[U32, U16, U16, U16, U16, U32, Blob, Str, Str],
        TableId::AssemblyProcessor => &[U32],
        TableId::AssemblyOs => &[U32, U32, U32],
        TableId::AssemblyRef => &[U16, U16, U16, U16, U32, Blob, Str, Str, Blob],
        TableId::AssemblyRefProcessor => &[U32, Index(TableId::AssemblyRef)],
        TableId::AssemblyRefOs => &[U32, U32, U32, Index(TableId::AssemblyRef)],
        TableId::File => &[U32, Str, Blob],
        TableId::ExportedType => &[U32, U32, Str, Str, Coded(C::Implementation)],
        TableId::ManifestResource => &[U32, U32, Str, Coded(C::Implementation)],
        TableId::NestedClass => &[Index(TableId::TypeDef), Index(TableId::TypeDef)],
        TableId::GenericParam => &[U16, U16, Coded(C::TypeOrMethodDef), Str],
        TableId::MethodSpec => &[Coded(C::MethodDefOrRef), Blob],
        TableId::GenericParamConstraint => {
            &[Index(TableId::GenericParam), Coded(C::TypeDefOrRef)]
        }
    }
}

#[derive(Debug, Clone, Default)]
struct TableLayout {
    rows: u32,
    /// Absolute offset of the first row in the image.
    offset: usize,
    row_size: usize,
    /// (offset within row, width) per column.
    columns: Vec<(usize, usize)>,
}

/// Decoded `#~` header plus the layout of every present table.
#[derive(Debug, Clone)]
pub struct Tables {
    layouts: Vec<TableLayout>,
}

impl Tables {
    /// Parses the tables stream occupying `stream` inside `data`.
    pub(crate) fn parse(data: &[u8], stream: std::ops::Range<usize>) -> Result<Self> {
        let mut r = Reader::at(&data[..stream.end], stream.start);
        r.skip(4, "tables stream header")?;
        let _major = r.u8("tables stream version")?;
        let _minor = r.u8("tables stream version")?;
        let heap_sizes = r.u8("tables heap sizes")?;
        r.skip(1, "tables stream header")?;
        let valid = r.u64("tables valid mask")?;
        let _sorted = r.u64("tables sorted mask")?;

        if valid >> TABLE_COUNT != 0 {
            return Err(MetadataError::Unsupported(format!(
                "tables stream declares unknown tables (mask {valid:#x})"
            )));
        }

        let mut rows = [0u32; TABLE_COUNT];
        for table in TableId::ALL {
            if valid & (1u64 << table.index()) != 0 {
                rows[table.index()] = r.u32("table row count")?;
            }
        }
        // Some compilers append an extra dword after the row counts.
        if heap_sizes & 0x40 != 0 {
            r.skip(4, "tables extra data")?;
        }

        let string_width = if heap_sizes & 0x01 != 0 { 4 } else { 2 };
        let guid_width = if heap_sizes & 0x02 != 0 { 4 } else { 2 };
        let blob_width = if heap_sizes & 0x04 != 0 { 4 } else { 2 };

        let mut offset = r.pos();
        let mut layouts = Vec::with_capacity(TABLE_COUNT);
        for table in TableId::ALL {
            let mut columns = Vec::new();
            let mut row_size = 0;
            for column in schema(table) {
                let width = match column {
                    Column::U16 => 2,
                    Column::U32 => 4,
                    Column::Str => string_width,
                    Column::Guid => guid_width,
                    Column::Blob => blob_width,
                    Column::Index(target) => {
                        if rows[target.index()] < (1 << 16) { 2 } else { 4 }
                    }
                    Column::Coded(coded) => coded.width(&rows),
                };
                columns.push((row_size, width));
                row_size += width;
            }

            let table_rows = rows[table.index()];
            layouts.push(TableLayout {
                rows: table_rows,
                offset,
                row_size,
                columns,
            });
            offset += row_size * table_rows as usize;
        }

        if offset > stream.end {
            return Err(MetadataError::Truncated {
                what: "metadata tables",
                offset: stream.end,
            });
        }

        Ok(Self { layouts })
    }

    pub fn row_count(&self, table: TableId) -> u32 {
        self.layouts[table.index()].rows
    }

    /// Raw value of `column` in 1-based `row` of `table`.
    pub(crate) fn cell(&self, data: &[u8], table: TableId, row: u32, column: usize) -> Result<u32> {
        let layout = &self.layouts[table.index()];
        if row == 0 || row > layout.rows {
            return Err(MetadataError::BadIndex {
                what: "table row",
                index: row,
            });
        }
        let (column_offset, width) = layout.columns[column];
        let at = layout.offset + layout.row_size * (row as usize - 1) + column_offset;
        Reader::at(data, at).index(width, "table cell")
    }
}
