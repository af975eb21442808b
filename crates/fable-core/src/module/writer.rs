//! Module container serialization

use std::io::Write;

use chrono::Utc;

use crate::bytecode::{CompiledSubroutine, CompiledUnit};

use super::error::ModuleError;
use super::format::{
    push_lstr, HEADER_LEN, MAGIC, MARKER_IMPT, MARKER_RTIT, MARKER_STRT, MARKER_SUBT,
    SECTION_PRELUDE_LEN,
};

/// Serializes a compiled unit into the container layout
#[derive(Debug, Clone)]
pub struct ModuleWriter {
    timestamp_ms: i64,
}

impl Default for ModuleWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleWriter {
    /// Create a writer stamped with the current time
    #[must_use]
    pub fn new() -> Self {
        Self {
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }

    /// Create a writer with an explicit modification timestamp
    #[must_use]
    pub fn with_timestamp(timestamp_ms: i64) -> Self {
        Self { timestamp_ms }
    }

    /// Serialize a compiled unit to bytes
    pub fn to_bytes(&self, unit: &CompiledUnit) -> Result<Vec<u8>, ModuleError> {
        let bodies: Vec<Vec<u8>> = unit.subroutines.iter().map(|s| s.body.encode()).collect();

        let rtit = Self::runtime_info_payload(&unit.subroutines)?;
        let impt = Self::import_payload(&unit.includes)?;

        let heap: Result<Vec<Vec<u8>>, ModuleError> = unit
            .strings
            .iter()
            .map(|s| {
                let mut entry = Vec::with_capacity(2 + s.len());
                push_lstr(&mut entry, s)?;
                Ok(entry)
            })
            .collect();
        let heap = heap?;

        let subt_len = 2 + 4 * unit.subroutines.len();
        let strt_len = 2 + 4 * unit.strings.len();
        Self::check_section("SUBT", subt_len)?;
        Self::check_section("RTIT", rtit.len())?;
        Self::check_section("IMPT", impt.len())?;
        Self::check_section("STRT", strt_len)?;

        let bodies_start = HEADER_LEN
            + 4 * SECTION_PRELUDE_LEN
            + subt_len as u32
            + rtit.len() as u32
            + impt.len() as u32
            + strt_len as u32;

        let mut body_offsets = Vec::with_capacity(bodies.len());
        let mut cursor = bodies_start;
        for body in &bodies {
            body_offsets.push(cursor);
            cursor += body.len() as u32;
        }
        let mut string_offsets = Vec::with_capacity(heap.len());
        for entry in &heap {
            string_offsets.push(cursor);
            cursor += entry.len() as u32;
        }

        let rtinfo_offset = HEADER_LEN + SECTION_PRELUDE_LEN + subt_len as u32;

        let mut out = Vec::with_capacity(cursor as usize);
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&self.timestamp_ms.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&rtinfo_offset.to_le_bytes());

        Self::section(&mut out, MARKER_SUBT, &offset_table(&body_offsets));
        Self::section(&mut out, MARKER_RTIT, &rtit);
        Self::section(&mut out, MARKER_IMPT, &impt);
        Self::section(&mut out, MARKER_STRT, &offset_table(&string_offsets));

        for body in &bodies {
            out.extend_from_slice(body);
        }
        for entry in &heap {
            out.extend_from_slice(entry);
        }
        Ok(out)
    }

    /// Serialize a compiled unit to a writer
    pub fn write(&self, unit: &CompiledUnit, out: &mut impl Write) -> Result<(), ModuleError> {
        let bytes = self.to_bytes(unit)?;
        out.write_all(&bytes)?;
        Ok(())
    }

    fn runtime_info_payload(subroutines: &[CompiledSubroutine]) -> Result<Vec<u8>, ModuleError> {
        let mut payload = Vec::new();
        for sub in subroutines {
            payload.push(sub.kind as u8);
            push_lstr(&mut payload, &sub.name)?;

            let block_count = u16::try_from(sub.dialogue_blocks.len())
                .map_err(|_| ModuleError::SectionTooLarge { marker: "RTIT" })?;
            payload.extend_from_slice(&block_count.to_le_bytes());
            for (box_name, name) in &sub.dialogue_blocks {
                push_lstr(&mut payload, box_name)?;
                push_lstr(&mut payload, name)?;
            }

            let param_count = u8::try_from(sub.params.len()).map_err(|_| {
                ModuleError::TooManyParams {
                    count: sub.params.len(),
                }
            })?;
            payload.push(param_count);
            for param in &sub.params {
                push_lstr(&mut payload, param)?;
            }
        }
        Ok(payload)
    }

    fn import_payload(includes: &[String]) -> Result<Vec<u8>, ModuleError> {
        let mut payload = Vec::new();
        let count = u16::try_from(includes.len())
            .map_err(|_| ModuleError::SectionTooLarge { marker: "IMPT" })?;
        payload.extend_from_slice(&count.to_le_bytes());
        for path in includes {
            push_lstr(&mut payload, path)?;
        }
        Ok(payload)
    }

    fn check_section(marker: &'static str, len: usize) -> Result<(), ModuleError> {
        if len > usize::from(u16::MAX) {
            return Err(ModuleError::SectionTooLarge { marker });
        }
        Ok(())
    }

    fn section(out: &mut Vec<u8>, marker: [u8; 4], payload: &[u8]) {
        out.extend_from_slice(&marker);
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(payload);
    }
}

fn offset_table(offsets: &[u32]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + 4 * offsets.len());
    payload.extend_from_slice(&(offsets.len() as u16).to_le_bytes());
    for offset in offsets {
        payload.extend_from_slice(&offset.to_le_bytes());
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let unit = CompiledUnit {
            subroutines: vec![],
            includes: vec![],
            strings: vec![],
        };
        let bytes = ModuleWriter::with_timestamp(1234).to_bytes(&unit).unwrap();
        assert_eq!(&bytes[..4], b"FABM");
        assert_eq!(i64::from_le_bytes(bytes[4..12].try_into().unwrap()), 1234);
        // reserved
        assert_eq!(u32::from_le_bytes(bytes[12..16].try_into().unwrap()), 0);
        // rtinfo offset points at the RTIT marker
        let rtinfo = u32::from_le_bytes(bytes[16..20].try_into().unwrap()) as usize;
        assert_eq!(&bytes[rtinfo..rtinfo + 4], b"RTIT");
    }

    #[test]
    fn sections_appear_in_order() {
        let unit = CompiledUnit {
            subroutines: vec![],
            includes: vec!["lib/a.fab".to_string()],
            strings: vec!["hello".to_string()],
        };
        let bytes = ModuleWriter::with_timestamp(0).to_bytes(&unit).unwrap();
        let find = |m: &[u8]| {
            bytes
                .windows(4)
                .position(|w| w == m)
                .unwrap_or_else(|| panic!("marker {m:?} missing"))
        };
        let subt = find(b"SUBT");
        let rtit = find(b"RTIT");
        let impt = find(b"IMPT");
        let strt = find(b"STRT");
        assert!(subt < rtit && rtit < impt && impt < strt);
    }
}
