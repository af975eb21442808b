//! Seekable module containers with lazy body loading
//!
//! A [`Module`] wraps any `Read + Seek` source. Loading reads the
//! header and the four section tables eagerly and nothing else;
//! subroutine bodies and string heap entries decode on first access
//! and are cached by index, so repeated access never re-reads the
//! source. [`ModuleRegistry`] keys loaded modules by the import path
//! other modules use to reach them.

mod error;
mod format;
mod writer;

pub use error::ModuleError;
pub use writer::ModuleWriter;

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::rc::Rc;

use crate::ast::SubroutineKind;
use crate::bytecode::{StrId, Subroutine};

use format::{SliceReader, MAGIC, MARKER_IMPT, MARKER_RTIT, MARKER_STRT, MARKER_SUBT};

/// Anything a module can be loaded from
pub trait ModuleSource: Read + Seek {}

impl<T: Read + Seek> ModuleSource for T {}

/// Metadata for one subroutine, decoded from the runtime info table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubroutineInfo {
    /// Chapter, scene, or function
    pub kind: SubroutineKind,
    /// Declared name
    pub name: String,
    /// Dialogue blocks in declaration order, parallel to the body's
    /// block start table
    pub blocks: Vec<DialogueBlockInfo>,
    /// Parameter names in declaration order
    pub params: Vec<String>,
}

/// Names of one dialogue block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueBlockInfo {
    /// Presentation box the block renders into
    pub box_name: String,
    /// Block name (generated names included)
    pub name: String,
}

/// A loaded module with lazily decoded bodies and strings
pub struct Module {
    name: String,
    timestamp_ms: i64,
    source: RefCell<Box<dyn ModuleSource>>,
    sub_offsets: Vec<u32>,
    body_ends: Vec<u32>,
    info: Vec<SubroutineInfo>,
    imports: Vec<String>,
    str_offsets: Vec<u32>,
    subs: RefCell<Vec<Option<Rc<Subroutine>>>>,
    strings: RefCell<Vec<Option<Rc<str>>>>,
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("timestamp_ms", &self.timestamp_ms)
            .field("subroutines", &self.info.len())
            .field("imports", &self.imports)
            .field("strings", &self.str_offsets.len())
            .finish_non_exhaustive()
    }
}

impl Module {
    /// Load a module: header and section tables only. Bodies and
    /// strings stay on the source until first accessed.
    pub fn load(
        mut source: impl ModuleSource + 'static,
        name: impl Into<String>,
    ) -> Result<Self, ModuleError> {
        let mut header = [0u8; 20];
        source.read_exact(&mut header)?;
        if header[..4] != MAGIC {
            return Err(ModuleError::BadMagic);
        }
        let timestamp_ms = i64::from_le_bytes(header[4..12].try_into().unwrap_or_default());

        let subt = read_section(&mut source, MARKER_SUBT)?;
        let rtit = read_section(&mut source, MARKER_RTIT)?;
        let impt = read_section(&mut source, MARKER_IMPT)?;
        let strt = read_section(&mut source, MARKER_STRT)?;

        let sub_offsets = parse_offset_table(&subt)?;
        let info = parse_runtime_info(&rtit, sub_offsets.len())?;
        let imports = parse_imports(&impt)?;
        let str_offsets = parse_offset_table(&strt)?;

        let file_len = u32::try_from(source.seek(SeekFrom::End(0))?)
            .map_err(|_| ModuleError::Truncated)?;

        // Bodies are written contiguously, then the string heap; each
        // body ends where the next region begins.
        let heap_start = str_offsets.first().copied().unwrap_or(file_len);
        let mut body_ends = Vec::with_capacity(sub_offsets.len());
        for (i, _) in sub_offsets.iter().enumerate() {
            body_ends.push(sub_offsets.get(i + 1).copied().unwrap_or(heap_start));
        }

        let sub_count = sub_offsets.len();
        let str_count = str_offsets.len();
        Ok(Self {
            name: name.into(),
            timestamp_ms,
            source: RefCell::new(Box::new(source)),
            sub_offsets,
            body_ends,
            info,
            imports,
            str_offsets,
            subs: RefCell::new(vec![None; sub_count]),
            strings: RefCell::new(vec![None; str_count]),
        })
    }

    /// Read only the modification timestamp from a module header
    pub fn peek_timestamp(reader: &mut impl Read) -> Result<i64, ModuleError> {
        let mut header = [0u8; 12];
        reader.read_exact(&mut header)?;
        if header[..4] != MAGIC {
            return Err(ModuleError::BadMagic);
        }
        Ok(i64::from_le_bytes(
            header[4..12].try_into().unwrap_or_default(),
        ))
    }

    /// The name this module was loaded under
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Modification timestamp of the source script, UTC millis
    #[must_use]
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    /// Number of subroutines in the module
    #[must_use]
    pub fn subroutine_count(&self) -> usize {
        self.sub_offsets.len()
    }

    /// Number of entries in the string table
    #[must_use]
    pub fn string_count(&self) -> usize {
        self.str_offsets.len()
    }

    /// Import paths in declaration order
    #[must_use]
    pub fn imports(&self) -> &[String] {
        &self.imports
    }

    /// Runtime info for a subroutine
    #[must_use]
    pub fn info(&self, index: usize) -> Option<&SubroutineInfo> {
        self.info.get(index)
    }

    /// Find a subroutine index by name
    #[must_use]
    pub fn find(&self, name: &str) -> Option<usize> {
        self.info.iter().position(|i| i.name == name)
    }

    /// The body of a subroutine, decoding it on first access
    pub fn subroutine(&self, index: usize) -> Result<Rc<Subroutine>, ModuleError> {
        if let Some(Some(cached)) = self.subs.borrow().get(index) {
            return Ok(Rc::clone(cached));
        }
        let offset = *self
            .sub_offsets
            .get(index)
            .ok_or(ModuleError::IndexOutOfRange {
                what: "subroutine",
                index,
                len: self.sub_offsets.len(),
            })?;
        let end = self.body_ends[index];
        let len = end.saturating_sub(offset) as usize;

        let mut source = self.source.borrow_mut();
        source.seek(SeekFrom::Start(u64::from(offset)))?;
        let mut buf = vec![0u8; len];
        source.read_exact(&mut buf)?;
        drop(source);

        let body = Rc::new(Subroutine::decode(&buf)?);
        self.subs.borrow_mut()[index] = Some(Rc::clone(&body));
        Ok(body)
    }

    /// A string table entry, decoding it on first access
    pub fn string(&self, id: StrId) -> Result<Rc<str>, ModuleError> {
        let index = usize::from(id.0);
        if let Some(Some(cached)) = self.strings.borrow().get(index) {
            return Ok(Rc::clone(cached));
        }
        let offset = *self
            .str_offsets
            .get(index)
            .ok_or(ModuleError::IndexOutOfRange {
                what: "string",
                index,
                len: self.str_offsets.len(),
            })?;

        let mut source = self.source.borrow_mut();
        source.seek(SeekFrom::Start(u64::from(offset)))?;
        let mut len_bytes = [0u8; 2];
        source.read_exact(&mut len_bytes)?;
        let mut buf = vec![0u8; usize::from(u16::from_le_bytes(len_bytes))];
        source.read_exact(&mut buf)?;
        drop(source);

        let text = String::from_utf8(buf).map_err(|_| ModuleError::InvalidUtf8)?;
        let text: Rc<str> = Rc::from(text.as_str());
        self.strings.borrow_mut()[index] = Some(Rc::clone(&text));
        Ok(text)
    }
}

/// Loaded modules keyed by the import path used to reach them
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, Rc<Module>>,
}

impl ModuleRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module under an import path, replacing any previous
    /// entry for that path
    pub fn insert(&mut self, path: impl Into<String>, module: Rc<Module>) {
        self.modules.insert(path.into(), module);
    }

    /// Look up a module by import path
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Rc<Module>> {
        self.modules.get(path).map(Rc::clone)
    }

    /// Remove a module by import path
    pub fn remove(&mut self, path: &str) -> Option<Rc<Module>> {
        self.modules.remove(path)
    }

    /// Number of registered modules
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

fn read_section(
    source: &mut impl ModuleSource,
    expected: [u8; 4],
) -> Result<Vec<u8>, ModuleError> {
    let mut marker = [0u8; 4];
    source.read_exact(&mut marker)?;
    if marker != expected {
        return Err(ModuleError::BadMarker {
            expected,
            found: marker,
        });
    }
    let mut len_bytes = [0u8; 2];
    source.read_exact(&mut len_bytes)?;
    let mut payload = vec![0u8; usize::from(u16::from_le_bytes(len_bytes))];
    source.read_exact(&mut payload)?;
    Ok(payload)
}

fn parse_offset_table(payload: &[u8]) -> Result<Vec<u32>, ModuleError> {
    let mut r = SliceReader::new(payload);
    let count = r.u16()? as usize;
    let mut offsets = Vec::with_capacity(count);
    for _ in 0..count {
        offsets.push(r.u32()?);
    }
    Ok(offsets)
}

fn parse_runtime_info(payload: &[u8], count: usize) -> Result<Vec<SubroutineInfo>, ModuleError> {
    let mut r = SliceReader::new(payload);
    let mut info = Vec::with_capacity(count);
    for _ in 0..count {
        let kind_byte = r.u8()?;
        let kind = SubroutineKind::try_from(kind_byte)
            .map_err(ModuleError::InvalidKind)?;
        let name = r.lstr()?;

        let block_count = r.u16()? as usize;
        let mut blocks = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            blocks.push(DialogueBlockInfo {
                box_name: r.lstr()?,
                name: r.lstr()?,
            });
        }

        let param_count = usize::from(r.u8()?);
        let mut params = Vec::with_capacity(param_count);
        for _ in 0..param_count {
            params.push(r.lstr()?);
        }
        info.push(SubroutineInfo {
            kind,
            name,
            blocks,
            params,
        });
    }
    Ok(info)
}

fn parse_imports(payload: &[u8]) -> Result<Vec<String>, ModuleError> {
    let mut r = SliceReader::new(payload);
    let count = r.u16()? as usize;
    let mut imports = Vec::with_capacity(count);
    for _ in 0..count {
        imports.push(r.lstr()?);
    }
    Ok(imports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Compiler;
    use crate::parser::Parser;
    use std::io::Cursor;

    const SCRIPT: &str = "\
include \"lib/common.fab\" as common;

function greet($who) {
  $greeted = $who;
}

scene \"Intro\" {
  $gold = 10;
<narrator intro>
  \"Welcome.\"
<end>
  common.fade_in(200);
}
";

    fn build_module_bytes(source: &str, timestamp: i64) -> Vec<u8> {
        let (unit, diagnostics) = Parser::parse(source);
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        let compiled = Compiler::compile(&unit).unwrap();
        ModuleWriter::with_timestamp(timestamp)
            .to_bytes(&compiled)
            .unwrap()
    }

    #[test]
    fn round_trip_preserves_runtime_info() {
        let bytes = build_module_bytes(SCRIPT, 77);
        let module = Module::load(Cursor::new(bytes), "main").unwrap();

        assert_eq!(module.timestamp_ms(), 77);
        assert_eq!(module.subroutine_count(), 2);
        assert_eq!(module.imports(), ["lib/common.fab"]);

        let greet = module.info(0).unwrap();
        assert_eq!(greet.kind, SubroutineKind::Function);
        assert_eq!(greet.name, "greet");
        assert_eq!(greet.params, ["$who"]);
        assert!(greet.blocks.is_empty());

        let intro = module.info(1).unwrap();
        assert_eq!(intro.kind, SubroutineKind::Scene);
        assert_eq!(intro.blocks.len(), 1);
        assert_eq!(intro.blocks[0].box_name, "narrator");
        assert_eq!(intro.blocks[0].name, "intro");
    }

    #[test]
    fn round_trip_preserves_bodies_and_strings() {
        let (unit, _) = Parser::parse(SCRIPT);
        let compiled = Compiler::compile(&unit).unwrap();
        let bytes = ModuleWriter::with_timestamp(0).to_bytes(&compiled).unwrap();
        let module = Module::load(Cursor::new(bytes), "main").unwrap();

        for (index, sub) in compiled.subroutines.iter().enumerate() {
            let body = module.subroutine(index).unwrap();
            assert_eq!(*body, sub.body, "body {index} differs");
        }
        for (index, text) in compiled.strings.iter().enumerate() {
            let loaded = module.string(StrId(index as u16)).unwrap();
            assert_eq!(loaded.as_ref(), text.as_str());
        }
    }

    #[test]
    fn empty_module_round_trips() {
        let bytes = build_module_bytes("", 31);
        let module = Module::load(Cursor::new(bytes), "empty").unwrap();
        assert_eq!(module.timestamp_ms(), 31);
        assert_eq!(module.subroutine_count(), 0);
        assert_eq!(module.string_count(), 0);
        assert!(module.imports().is_empty());
    }

    /// Read+Seek wrapper that counts read calls
    struct CountingSource {
        inner: Cursor<Vec<u8>>,
        reads: Rc<RefCell<usize>>,
    }

    impl Read for CountingSource {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            *self.reads.borrow_mut() += 1;
            self.inner.read(buf)
        }
    }

    impl Seek for CountingSource {
        fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    #[test]
    fn bodies_and_strings_load_once() {
        let bytes = build_module_bytes(SCRIPT, 0);
        let reads = Rc::new(RefCell::new(0usize));
        let source = CountingSource {
            inner: Cursor::new(bytes),
            reads: Rc::clone(&reads),
        };
        let module = Module::load(source, "main").unwrap();

        let first = module.subroutine(1).unwrap();
        let after_first = *reads.borrow();
        let second = module.subroutine(1).unwrap();
        assert_eq!(*reads.borrow(), after_first, "cached body re-read the source");
        assert!(Rc::ptr_eq(&first, &second));

        let s1 = module.string(StrId(0)).unwrap();
        let after_string = *reads.borrow();
        let s2 = module.string(StrId(0)).unwrap();
        assert_eq!(*reads.borrow(), after_string, "cached string re-read the source");
        assert_eq!(s1, s2);
    }

    #[test]
    fn peek_timestamp_reads_header_only() {
        let bytes = build_module_bytes(SCRIPT, 424_242);
        let mut cursor = Cursor::new(bytes);
        assert_eq!(Module::peek_timestamp(&mut cursor).unwrap(), 424_242);
        // Only the 12 header bytes were consumed
        assert_eq!(cursor.position(), 12);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = build_module_bytes(SCRIPT, 0);
        bytes[0] = b'X';
        assert!(matches!(
            Module::load(Cursor::new(bytes.clone()), "main"),
            Err(ModuleError::BadMagic)
        ));
        assert!(matches!(
            Module::peek_timestamp(&mut Cursor::new(bytes)),
            Err(ModuleError::BadMagic)
        ));
    }

    #[test]
    fn corrupted_marker_is_rejected() {
        let bytes = build_module_bytes(SCRIPT, 0);
        // Clobber the SUBT marker
        let pos = bytes.windows(4).position(|w| w == b"SUBT").unwrap();
        let mut bad = bytes;
        bad[pos] = b'Z';
        assert!(matches!(
            Module::load(Cursor::new(bad), "main"),
            Err(ModuleError::BadMarker { .. })
        ));
    }

    #[test]
    fn out_of_range_indexes_are_errors() {
        let bytes = build_module_bytes(SCRIPT, 0);
        let module = Module::load(Cursor::new(bytes), "main").unwrap();
        assert!(matches!(
            module.subroutine(99),
            Err(ModuleError::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            module.string(StrId(999)),
            Err(ModuleError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn registry_stores_by_import_path() {
        let bytes = build_module_bytes(SCRIPT, 0);
        let module = Rc::new(Module::load(Cursor::new(bytes), "main").unwrap());
        let mut registry = ModuleRegistry::new();
        assert!(registry.is_empty());
        registry.insert("main.fab", Rc::clone(&module));
        assert_eq!(registry.len(), 1);
        let found = registry.get("main.fab").unwrap();
        assert_eq!(found.name(), "main");
        assert!(registry.get("other.fab").is_none());
    }
}
