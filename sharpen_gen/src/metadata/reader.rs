use super::{MetadataError, Result};

/// Little-endian cursor over a byte slice; every read is bounds checked.
#[derive(Clone)]
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn at(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub(crate) fn bytes(&mut self, len: usize, what: &'static str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(MetadataError::Truncated {
                what,
                offset: self.pos,
            })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub(crate) fn skip(&mut self, len: usize, what: &'static str) -> Result<()> {
        self.bytes(len, what).map(|_| ())
    }

    pub(crate) fn u8(&mut self, what: &'static str) -> Result<u8> {
        Ok(self.bytes(1, what)?[0])
    }

    pub(crate) fn peek_u8(&self, what: &'static str) -> Result<u8> {
        self.clone().u8(what)
    }

    pub(crate) fn u16(&mut self, what: &'static str) -> Result<u16> {
        let b = self.bytes(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self, what: &'static str) -> Result<u32> {
        let b = self.bytes(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u64(&mut self, what: &'static str) -> Result<u64> {
        let b = self.bytes(8, what)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    /// Reads a 2- or 4-byte little-endian index.
    pub(crate) fn index(&mut self, width: usize, what: &'static str) -> Result<u32> {
        match width {
            2 => self.u16(what).map(u32::from),
            _ => self.u32(what),
        }
    }

    /// ECMA-335 II.23.2 compressed unsigned integer.
    pub(crate) fn compressed_u32(&mut self, what: &'static str) -> Result<u32> {
        let first = self.u8(what)?;
        if first & 0x80 == 0 {
            return Ok(u32::from(first));
        }
        if first & 0xC0 == 0x80 {
            let second = self.u8(what)?;
            return Ok((u32::from(first & 0x3F) << 8) | u32::from(second));
        }
        if first & 0xE0 == 0xC0 {
            let rest = self.bytes(3, what)?;
            return Ok((u32::from(first & 0x1F) << 24)
                | (u32::from(rest[0]) << 16)
                | (u32::from(rest[1]) << 8)
                | u32::from(rest[2]));
        }
        Err(MetadataError::Malformed {
            what,
            detail: format!("invalid compressed integer lead byte {first:#04x}"),
        })
    }

    /// Bytes up to (not including) the next NUL; the NUL is consumed.
    pub(crate) fn nul_terminated(&mut self, what: &'static str) -> Result<&'a [u8]> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        let len = rest.iter().position(|b| *b == 0).ok_or(MetadataError::Truncated {
            what,
            offset: self.pos,
        })?;
        let bytes = &rest[..len];
        self.pos += len + 1;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressed_integers_use_one_two_or_four_bytes() {
        let data = [0x03, 0x7F, 0x80, 0x80, 0xBF, 0xFF, 0xC0, 0x00, 0x40, 0x00];
        let mut r = Reader::new(&data);
        assert_eq!(r.compressed_u32("n").unwrap(), 0x03);
        assert_eq!(r.compressed_u32("n").unwrap(), 0x7F);
        assert_eq!(r.compressed_u32("n").unwrap(), 0x80);
        assert_eq!(r.compressed_u32("n").unwrap(), 0x3FFF);
        assert_eq!(r.compressed_u32("n").unwrap(), 0x4000);
        assert!(r.is_empty());
    }

    #[test]
    fn reading_past_the_end_is_an_error() {
        let mut r = Reader::new(&[1, 2, 3]);
        assert!(matches!(
            r.u32("field"),
            Err(MetadataError::Truncated { what: "field", offset: 0 })
        ));
    }

    #[test]
    fn reserved_compressed_lead_byte_is_rejected() {
        let mut r = Reader::new(&[0xE0]);
        assert!(matches!(
            r.compressed_u32("n"),
            Err(MetadataError::Malformed { .. })
        ));
    }

    #[test]
    fn nul_terminated_consumes_the_terminator() {
        let mut r = Reader::new(b"#~\0\0rest");
        assert_eq!(r.nul_terminated("name").unwrap(), b"#~");
        assert_eq!(r.pos(), 3);
    }
}
