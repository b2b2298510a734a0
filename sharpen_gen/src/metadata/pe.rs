//! Just enough PE/COFF to find the CLI header and the metadata root.

use std::ops::Range;

use super::{MetadataError, Result, reader::Reader};

const DOS_SIGNATURE: u16 = 0x5A4D; // "MZ"
const PE_SIGNATURE: u32 = 0x0000_4550; // "PE\0\0"
const PE32_MAGIC: u16 = 0x010B;
const PE32_PLUS_MAGIC: u16 = 0x020B;
const CLI_HEADER_DIRECTORY: usize = 14;
const SECTION_HEADER_SIZE: usize = 40;

#[derive(Debug, Clone, Copy)]
struct Section {
    virtual_address: u32,
    virtual_size: u32,
    raw_size: u32,
    raw_pointer: u32,
}

impl Section {
    fn contains(&self, rva: u32) -> bool {
        let size = self.virtual_size.max(self.raw_size);
        rva >= self.virtual_address && rva - self.virtual_address < size
    }
}

/// CLI header fields the generator cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CliHeader {
    pub runtime_major: u16,
    pub runtime_minor: u16,
    pub flags: u32,
}

/// Returns the CLI header and the file range of the metadata root.
pub(crate) fn locate_metadata(data: &[u8]) -> Result<(CliHeader, Range<usize>)> {
    let mut r = Reader::new(data);
    if r.u16("DOS header").map_err(|_| MetadataError::NotPe("file too small"))? != DOS_SIGNATURE {
        return Err(MetadataError::NotPe("missing MZ signature"));
    }
    let pe_offset = Reader::at(data, 0x3C).u32("e_lfanew")? as usize;

    let mut r = Reader::at(data, pe_offset);
    if r.u32("PE signature")? != PE_SIGNATURE {
        return Err(MetadataError::NotPe("missing PE signature"));
    }
    let _machine = r.u16("COFF machine")?;
    let section_count = r.u16("COFF section count")? as usize;
    r.skip(12, "COFF header")?;
    let optional_header_size = r.u16("COFF optional header size")? as usize;
    let _characteristics = r.u16("COFF characteristics")?;

    let optional_header = r.pos();
    let (directory_count_at, directories_at) = match r.u16("optional header magic")? {
        PE32_MAGIC => (92, 96),
        PE32_PLUS_MAGIC => (108, 112),
        _ => return Err(MetadataError::NotPe("unknown optional header magic")),
    };

    let directory_count =
        Reader::at(data, optional_header + directory_count_at).u32("data directory count")? as usize;
    if directory_count <= CLI_HEADER_DIRECTORY {
        return Err(MetadataError::NotManaged);
    }
    let mut dir = Reader::at(data, optional_header + directories_at + CLI_HEADER_DIRECTORY * 8);
    let cli_rva = dir.u32("CLI header directory")?;
    if cli_rva == 0 {
        return Err(MetadataError::NotManaged);
    }

    let sections = read_sections(data, optional_header + optional_header_size, section_count)?;

    let mut cli = Reader::at(data, rva_to_offset(&sections, cli_rva)?);
    let _cb = cli.u32("CLI header size")?;
    let runtime_major = cli.u16("CLI runtime version")?;
    let runtime_minor = cli.u16("CLI runtime version")?;
    let metadata_rva = cli.u32("metadata directory")?;
    let metadata_size = cli.u32("metadata directory")? as usize;
    let flags = cli.u32("CLI flags")?;

    let start = rva_to_offset(&sections, metadata_rva)?;
    let end = start
        .checked_add(metadata_size)
        .filter(|end| *end <= data.len())
        .ok_or(MetadataError::Truncated {
            what: "metadata root",
            offset: start,
        })?;

    Ok((
        CliHeader {
            runtime_major,
            runtime_minor,
            flags,
        },
        start..end,
    ))
}

fn read_sections(data: &[u8], table_at: usize, count: usize) -> Result<Vec<Section>> {
    (0..count)
        .map(|index| {
            let mut r = Reader::at(data, table_at + index * SECTION_HEADER_SIZE);
            r.skip(8, "section name")?;
            Ok(Section {
                virtual_size: r.u32("section header")?,
                virtual_address: r.u32("section header")?,
                raw_size: r.u32("section header")?,
                raw_pointer: r.u32("section header")?,
            })
        })
        .collect()
}

fn rva_to_offset(sections: &[Section], rva: u32) -> Result<usize> {
    sections
        .iter()
        .find(|section| section.contains(rva))
        .ok_or(MetadataError::UnmappedRva { rva })
        .and_then(|section| {
            (section.raw_pointer as usize)
                .checked_add((rva - section.virtual_address) as usize)
                .filter(|offset| u32::try_from(*offset).is_ok())
                .ok_or(MetadataError::UnmappedRva { rva })
        })
}
