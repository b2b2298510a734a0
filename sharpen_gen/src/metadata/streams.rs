use std::ops::Range;

use super::{MetadataError, Result, reader::Reader};

const METADATA_SIGNATURE: u32 = 0x424A_5342; // "BSJB"

/// Metadata root: version string and the absolute file range of each stream.
#[derive(Debug, Clone)]
pub(crate) struct StreamLayout {
    pub version: String,
    pub tables: Range<usize>,
    pub strings: Option<Range<usize>>,
    pub blob: Option<Range<usize>>,
    pub guid: Option<Range<usize>>,
}

impl StreamLayout {
    pub fn parse(data: &[u8], root: Range<usize>) -> Result<Self> {
        let data = &data[..root.end];
        let mut r = Reader::at(data, root.start);

        let signature = r.u32("metadata signature")?;
        if signature != METADATA_SIGNATURE {
            return Err(MetadataError::BadSignature(signature));
        }
        r.skip(8, "metadata root")?; // major, minor, reserved
        let version_len = r.u32("metadata version length")? as usize;
        let version = r.bytes(version_len, "metadata version")?;
        let version = String::from_utf8_lossy(version)
            .trim_end_matches('\0')
            .to_owned();
        let _flags = r.u16("metadata flags")?;
        let stream_count = r.u16("metadata stream count")?;

        let mut tables = None;
        let mut strings = None;
        let mut blob = None;
        let mut guid = None;

        for _ in 0..stream_count {
            let offset = r.u32("stream header")? as usize;
            let size = r.u32("stream header")? as usize;
            let name_at = r.pos();
            let name = r.nul_terminated("stream name")?;
            // Names are padded to a four byte boundary.
            let padded = (r.pos() - name_at).next_multiple_of(4);
            r = Reader::at(data, name_at + padded);

            let start = root.start + offset;
            let range = start..start + size;
            if range.end > root.end {
                return Err(MetadataError::Truncated {
                    what: "metadata stream",
                    offset: start,
                });
            }

            match name {
                b"#~" => tables = Some(range),
                b"#Strings" => strings = Some(range),
                b"#Blob" => blob = Some(range),
                b"#GUID" => guid = Some(range),
                b"#US" => {}
                b"#-" => {
                    return Err(MetadataError::Unsupported(
                        "uncompressed (#-) tables stream".into(),
                    ));
                }
                other => {
                    tracing::debug!(
                        stream = %String::from_utf8_lossy(other),
                        "ignoring unknown metadata stream"
                    );
                }
            }
        }

        Ok(Self {
            version,
            tables: tables.ok_or(MetadataError::MissingStream("#~"))?,
            strings,
            blob,
            guid,
        })
    }
}
