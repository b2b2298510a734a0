//! ECMA-335 metadata reader.
//!
//! Works on an owned copy of the image; every accessor returns a
//! [`MetadataError`] instead of panicking on malformed input.

use std::ops::Range;

pub mod attributes;
mod pe;
mod reader;
mod rows;
pub mod signature;
mod streams;
pub mod tables;

pub use pe::CliHeader;
pub use rows::{
    AssemblyRow, ClassLayoutRow, CustomAttributeRow, FieldRow, MemberRefRow, MethodDefRow,
    NestedClassRow, ParamRow, TypeDefRow, TypeRefRow,
};
pub use tables::{CodedIndex, TableId, Token};

use reader::Reader;
use streams::StreamLayout;
use tables::Tables;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetadataError {
    #[error("not a PE image: {0}")]
    NotPe(&'static str),
    #[error("PE image has no CLI header; not a managed module")]
    NotManaged,
    #[error("RVA {rva:#x} is not mapped by any section")]
    UnmappedRva { rva: u32 },
    #[error("truncated {what} at offset {offset:#x}")]
    Truncated { what: &'static str, offset: usize },
    #[error("bad metadata signature {0:#010x}")]
    BadSignature(u32),
    #[error("metadata stream {0} is missing")]
    MissingStream(&'static str),
    #[error("unsupported metadata: {0}")]
    Unsupported(String),
    #[error("{what} {index:#x} is out of range")]
    BadIndex { what: &'static str, index: u32 },
    #[error("malformed {what}: {detail}")]
    Malformed { what: &'static str, detail: String },
    #[error("{what} is not valid UTF-8")]
    InvalidUtf8 { what: &'static str },
}

pub type Result<T, E = MetadataError> = std::result::Result<T, E>;

/// Deepest type nesting accepted in signature and custom attribute blobs.
pub const MAX_TYPE_DEPTH: usize = 64;

fn check_depth(what: &'static str, depth: usize) -> Result<()> {
    if depth > MAX_TYPE_DEPTH {
        return Err(MetadataError::Malformed {
            what,
            detail: format!("type nesting exceeds {MAX_TYPE_DEPTH} levels"),
        });
    }
    Ok(())
}

/// A parsed metadata image: heaps plus table layout.
#[derive(Debug, Clone)]
pub struct Metadata {
    data: Vec<u8>,
    cli: CliHeader,
    streams: StreamLayout,
    tables: Tables,
}

impl Metadata {
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        let (cli, root) = pe::locate_metadata(&data)?;
        let streams = StreamLayout::parse(&data, root)?;
        let tables = Tables::parse(&data, streams.tables.clone())?;

        tracing::debug!(
            version = %streams.version,
            types = tables.row_count(TableId::TypeDef),
            methods = tables.row_count(TableId::MethodDef),
            "parsed metadata"
        );

        Ok(Self {
            data,
            cli,
            streams,
            tables,
        })
    }

    pub fn cli_header(&self) -> CliHeader {
        self.cli
    }

    /// Runtime version string from the metadata root, e.g. `v4.0.30319`.
    pub fn version(&self) -> &str {
        &self.streams.version
    }

    pub fn row_count(&self, table: TableId) -> u32 {
        self.tables.row_count(table)
    }

    pub(crate) fn cell(&self, table: TableId, row: u32, column: usize) -> Result<u32> {
        self.tables.cell(&self.data, table, row, column)
    }

    pub(crate) fn coded(
        &self,
        table: TableId,
        row: u32,
        column: usize,
        coded: CodedIndex,
    ) -> Result<Option<Token>> {
        coded.decode(self.cell(table, row, column)?)
    }

    /// `#Strings` heap entry; index 0 is the empty string.
    pub fn string(&self, index: u32) -> Result<&str> {
        let heap = heap_slice(&self.data, self.streams.strings.as_ref())?;
        if index == 0 {
            return Ok("");
        }
        let bytes = Reader::at(heap, index as usize).nul_terminated("#Strings entry")?;
        std::str::from_utf8(bytes).map_err(|_| MetadataError::InvalidUtf8 {
            what: "#Strings entry",
        })
    }

    /// `#Blob` heap entry without its length prefix.
    pub fn blob(&self, index: u32) -> Result<&[u8]> {
        let heap = heap_slice(&self.data, self.streams.blob.as_ref())?;
        if index as usize >= heap.len() {
            return Err(MetadataError::BadIndex {
                what: "#Blob index",
                index,
            });
        }
        let mut r = Reader::at(heap, index as usize);
        let len = r.compressed_u32("#Blob length")? as usize;
        r.bytes(len, "#Blob entry")
    }

    pub fn guid(&self, index: u32) -> Result<Option<[u8; 16]>> {
        if index == 0 {
            return Ok(None);
        }
        let heap = heap_slice(&self.data, self.streams.guid.as_ref())?;
        let bytes = Reader::at(heap, (index as usize - 1) * 16).bytes(16, "#GUID entry")?;
        let mut guid = [0u8; 16];
        guid.copy_from_slice(bytes);
        Ok(Some(guid))
    }
}

fn heap_slice<'a>(data: &'a [u8], range: Option<&Range<usize>>) -> Result<&'a [u8]> {
    match range {
        Some(range) => Ok(&data[range.clone()]),
        None => Ok(&[]),
    }
}
