//! On-disk layout constants and byte-level helpers
//!
//! Modules are little-endian throughout. The file opens with a fixed
//! header, followed by four marker-tagged section tables, the
//! subroutine bodies, and finally the string heap:
//!
//! ```text
//! header:   magic[4]  mtime_ms: i64  reserved: u32  rtinfo_offset: u32
//! sections: marker[4] + byte_len: u16, in order SUBT RTIT IMPT STRT
//! bodies:   per-subroutine instruction streams
//! heap:     per-string u16 len + utf8 payload
//! ```

use super::error::ModuleError;

/// File magic
pub const MAGIC: [u8; 4] = *b"FABM";
/// Subroutine offset table marker
pub const MARKER_SUBT: [u8; 4] = *b"SUBT";
/// Runtime info table marker
pub const MARKER_RTIT: [u8; 4] = *b"RTIT";
/// Import table marker
pub const MARKER_IMPT: [u8; 4] = *b"IMPT";
/// String offset table marker
pub const MARKER_STRT: [u8; 4] = *b"STRT";

/// Byte size of the fixed header
pub const HEADER_LEN: u32 = 20;
/// Byte size of a section prelude (marker + length)
pub const SECTION_PRELUDE_LEN: u32 = 6;

/// Cursor over an in-memory section payload
pub(crate) struct SliceReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn u8(&mut self) -> Result<u8, ModuleError> {
        let byte = *self.bytes.get(self.pos).ok_or(ModuleError::Truncated)?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn u16(&mut self) -> Result<u16, ModuleError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32, ModuleError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    /// A length-prefixed UTF-8 string
    pub fn lstr(&mut self) -> Result<String, ModuleError> {
        let len = self.u16()? as usize;
        let end = self.pos.checked_add(len).ok_or(ModuleError::Truncated)?;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(ModuleError::Truncated)?;
        self.pos = end;
        String::from_utf8(slice.to_vec()).map_err(|_| ModuleError::InvalidUtf8)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ModuleError> {
        let end = self.pos.checked_add(N).ok_or(ModuleError::Truncated)?;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(ModuleError::Truncated)?;
        self.pos = end;
        let mut array = [0u8; N];
        array.copy_from_slice(slice);
        Ok(array)
    }
}

/// Append a length-prefixed UTF-8 string
pub(crate) fn push_lstr(out: &mut Vec<u8>, text: &str) -> Result<(), ModuleError> {
    let len = u16::try_from(text.len())
        .map_err(|_| ModuleError::StringTooLong { len: text.len() })?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(text.as_bytes());
    Ok(())
}
