//! `ElfSymbolResolver`: the concrete implementation of the out-of-scope ELF
//! symbol extractor collaborator (`(elf path, address) ->
//! (file, function, line, local disassembly)`). The core only depends on
//! the [`SymbolResolver`] trait; this is just one real implementation of it,
//! grounded the way the teacher wraps `object`/DWARF readers in its own
//! `symbols.rs`.
//!
//! Local disassembly is intentionally not produced here — an address is
//! allowed to have no disassembly at all, and recovering
//! jump/branch shape from raw ELF bytes is outside this component's
//! responsibility (it would belong to the external extractor this trait
//! stands in for).

use std::path::Path;
use std::rc::Rc;

use addr2line::Context;
use memmap2::Mmap;
use rustc_hash::FxHashMap;

use crate::name::{NameRecord, SymbolResolver};

pub struct ElfSymbolResolver {
    context: Context<addr2line::gimli::EndianRcSlice<addr2line::gimli::RunTimeEndian>>,
    demangle: bool,
    // Keeps the mapping alive for the resolver's lifetime even though the
    // DWARF data was already copied into `context` during construction.
    _mmap: Mmap,
    // The Transition Recorder classifies function-boundary crossings by
    // `Rc::ptr_eq` on these handles (src/recorder.rs), so equal strings
    // across calls must share one allocation, not just equal content.
    interned_files: FxHashMap<String, Rc<str>>,
    interned_functions: FxHashMap<String, Rc<str>>,
}

impl ElfSymbolResolver {
    pub fn open(elf_path: &Path, demangle: bool) -> std::io::Result<Self> {
        let file = std::fs::File::open(elf_path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let object = addr2line::object::File::parse(&*mmap)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let context = Context::new(&object)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(ElfSymbolResolver {
            context,
            demangle,
            _mmap: mmap,
            interned_files: FxHashMap::default(),
            interned_functions: FxHashMap::default(),
        })
    }

    fn strip(&self, file: &str, strip_prefix: &str) -> String {
        if !strip_prefix.is_empty() {
            if let Some(stripped) = file.strip_prefix(strip_prefix) {
                return stripped.to_string();
            }
        }
        file.to_string()
    }

    fn intern_file(&mut self, file: String) -> Rc<str> {
        self.interned_files
            .entry(file)
            .or_insert_with_key(|k| Rc::from(k.as_str()))
            .clone()
    }

    fn intern_function(&mut self, function: String) -> Rc<str> {
        self.interned_functions
            .entry(function)
            .or_insert_with_key(|k| Rc::from(k.as_str()))
            .clone()
    }
}

impl SymbolResolver for ElfSymbolResolver {
    fn lookup(&mut self, addr: u32, strip_prefix: &str) -> Option<NameRecord> {
        let mut frames = self.context.find_frames(addr as u64).ok()?;
        let frame = frames.next().ok().flatten()?;

        let function_name = frame.function.as_ref().and_then(|f| {
            if self.demangle {
                f.demangle().ok().map(|s| s.into_owned())
            } else {
                f.raw_name().ok().map(|s| s.into_owned())
            }
        })?;

        let location = frame.location?;
        let file = location.file.map(|f| self.strip(f, strip_prefix))?;
        let line = location.line.unwrap_or(0);

        Some(NameRecord {
            address: addr,
            file: self.intern_file(file),
            function: self.intern_function(function_name),
            line,
            assembly: Vec::new(),
        })
    }
}

/// A fixed, in-memory symbol table, for driving tests without a real ELF
/// file. Interns by content so that equal `(file, function)` strings always
/// share one `Rc<str>`, as every resolver implementation must.
#[derive(Default)]
pub struct StaticSymbolResolver {
    table: Vec<(u32, u32, Rc<str>, Rc<str>, u32)>,
    interned_files: rustc_hash::FxHashMap<String, Rc<str>>,
    interned_functions: rustc_hash::FxHashMap<String, Rc<str>>,
}

impl StaticSymbolResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `[start, start+len)` as belonging to `function` in `file`.
    pub fn add_function(&mut self, file: &str, function: &str, start: u32, len: u32, line: u32) {
        let file = self
            .interned_files
            .entry(file.to_string())
            .or_insert_with(|| Rc::from(file))
            .clone();
        let function = self
            .interned_functions
            .entry(function.to_string())
            .or_insert_with(|| Rc::from(function))
            .clone();
        self.table.push((start, start + len, file, function, line));
    }
}

impl SymbolResolver for StaticSymbolResolver {
    fn lookup(&mut self, addr: u32, _strip_prefix: &str) -> Option<NameRecord> {
        let (start, _end, file, function, line) = self
            .table
            .iter()
            .find(|(start, end, ..)| addr >= *start && addr < *end)?
            .clone();
        Some(NameRecord {
            address: start,
            file,
            function,
            line,
            assembly: Vec::new(),
        })
    }
}
