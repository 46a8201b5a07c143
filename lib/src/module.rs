//! The module store: the in-memory structured module every rewriting session
//! operates on.
//!
//! The store owns one ordered sequence per section and is only ever mutated
//! through a [`SectionRewriter`][crate::rewrite::SectionRewriter]; callers
//! receive descriptor copies, never references into the store.

use std::path::Path;

use crate::error::Error;
use crate::instrs::Instruction;
use crate::types::{FuncType, GlobalType, Limits, ValType};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ImportEntry {
    pub module: String,
    pub name: String,
    pub kind: ImportKind,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ImportKind {
    Func(u32),
    Table(TableEntry),
    Memory(MemoryEntry),
    Global(GlobalType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TableEntry {
    pub element: ValType,
    pub limits: Limits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MemoryEntry {
    pub limits: Limits,
    pub shared: bool,
    pub memory64: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct GlobalEntry {
    pub ty: GlobalType,
    pub init: Vec<Instruction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExportKind {
    Func,
    Table,
    Memory,
    Global,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ExportEntry {
    pub name: String,
    pub kind: ExportKind,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ElementMode {
    Active {
        table_index: u32,
        offset: Vec<Instruction>,
    },
    Passive,
    Declared,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ElementEntry {
    pub mode: ElementMode,
    pub func_indices: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CodeEntry {
    /// Run-length encoded local declarations, as laid out in the binary.
    pub locals: Vec<(u32, ValType)>,
    /// The body in nested form.
    pub body: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DataMode {
    Active {
        memory_index: u32,
        offset: Vec<Instruction>,
    },
    Passive,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DataEntry {
    pub mode: DataMode,
    pub init: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CustomEntry {
    pub name: String,
    pub data: Vec<u8>,
}

/// One `index -> name` association in a name sub-table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NameAssoc {
    pub index: u32,
    pub name: String,
}

/// The parsed "name" custom section: three sub-tables, each kept sorted by
/// index with indices unique.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct NameSection {
    pub func_names: Vec<NameAssoc>,
    pub global_names: Vec<NameAssoc>,
    pub data_names: Vec<NameAssoc>,
}

impl NameSection {
    pub fn is_empty(&self) -> bool {
        self.func_names.is_empty() && self.global_names.is_empty() && self.data_names.is_empty()
    }
}

/// A structured WebAssembly module.
///
/// Equality compares every section, which is what lets callers snapshot a
/// module and verify that a failed operation left it untouched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub(crate) types: Vec<FuncType>,
    pub(crate) imports: Vec<ImportEntry>,
    /// Type index per locally defined function; positionally 1:1 with `code`.
    pub(crate) functions: Vec<u32>,
    pub(crate) tables: Vec<TableEntry>,
    pub(crate) memories: Vec<MemoryEntry>,
    pub(crate) globals: Vec<GlobalEntry>,
    pub(crate) exports: Vec<ExportEntry>,
    pub(crate) start: Option<u32>,
    pub(crate) elements: Vec<ElementEntry>,
    pub(crate) code: Vec<CodeEntry>,
    pub(crate) datas: Vec<DataEntry>,
    /// Whether the input carried a data-count section; the count itself is
    /// re-derived at emission.
    pub(crate) has_data_count: bool,
    pub(crate) names: Option<NameSection>,
    /// Custom sections other than "name", raw, in input order.
    pub(crate) customs: Vec<CustomEntry>,
    // Running counts of function- and global-kind imports. Maintained by
    // `insert_import`/`remove_import`; all import mutation goes through
    // those methods.
    num_func_imports: u32,
    num_global_imports: u32,
}

impl Module {
    /// Parses a binary module.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        crate::parse::parse(bytes)
    }

    /// Reads and parses a binary module from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::from_bytes(&std::fs::read(path)?)
    }

    /// Serializes the module back to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        crate::emit::encode(self)
    }

    /// Serializes the module and writes it to a file.
    pub fn emit_binary(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    /// Number of function-kind imports: the size of the implicit prefix of
    /// the function index space.
    pub(crate) fn num_func_imports(&self) -> u32 {
        self.num_func_imports
    }

    /// Number of global-kind imports: the prefix of the global index space.
    pub(crate) fn num_global_imports(&self) -> u32 {
        self.num_global_imports
    }

    pub(crate) fn insert_import(&mut self, pos: usize, entry: ImportEntry) {
        match entry.kind {
            ImportKind::Func(_) => self.num_func_imports += 1,
            ImportKind::Global(_) => self.num_global_imports += 1,
            _ => {}
        }
        self.imports.insert(pos, entry);
    }

    pub(crate) fn push_import(&mut self, entry: ImportEntry) {
        let end = self.imports.len();
        self.insert_import(end, entry);
    }

    pub(crate) fn remove_import(&mut self, pos: usize) -> ImportEntry {
        let entry = self.imports.remove(pos);
        match entry.kind {
            ImportKind::Func(_) => self.num_func_imports -= 1,
            ImportKind::Global(_) => self.num_global_imports -= 1,
            _ => {}
        }
        entry
    }

    /// The function index occupied by the function-kind import at import
    /// section position `pos` (the count of function-kind imports before it).
    pub(crate) fn func_index_of_import(&self, pos: usize) -> u32 {
        self.imports[..pos]
            .iter()
            .filter(|i| matches!(i.kind, ImportKind::Func(_)))
            .count() as u32
    }

    /// The name section, created on first use.
    pub(crate) fn names_mut(&mut self) -> &mut NameSection {
        self.names.get_or_insert_with(NameSection::default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GlobalType;

    fn func_import(module: &str, name: &str, ty: u32) -> ImportEntry {
        ImportEntry {
            module: module.to_owned(),
            name: name.to_owned(),
            kind: ImportKind::Func(ty),
        }
    }

    #[test]
    fn import_counts_track_insert_and_remove() {
        let mut m = Module::default();
        assert_eq!(m.num_func_imports(), 0);

        m.push_import(func_import("env", "log", 0));
        m.push_import(ImportEntry {
            module: "env".to_owned(),
            name: "g".to_owned(),
            kind: ImportKind::Global(GlobalType {
                val_type: ValType::I32,
                mutable: false,
            }),
        });
        m.insert_import(0, func_import("env", "abort", 1));
        assert_eq!(m.num_func_imports(), 2);
        assert_eq!(m.num_global_imports(), 1);

        // Function index space positions skip non-function imports.
        assert_eq!(m.func_index_of_import(0), 0);
        assert_eq!(m.func_index_of_import(1), 1);

        let removed = m.remove_import(1);
        assert_eq!(removed.name, "log");
        assert_eq!(m.num_func_imports(), 1);
        assert_eq!(m.num_global_imports(), 1);
    }
}
