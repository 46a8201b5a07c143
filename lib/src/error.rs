//! Error types.

use crate::fixup::IndexSpace;
use crate::types::ValType;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Thrown by `insert`/`delete` when a locator does not resolve to exactly
    /// one entity.
    #[error("locator matched {matched} entries where exactly one was required")]
    AmbiguousLocator { matched: usize },

    /// A delete was requested for an entity that is still referenced from
    /// elsewhere in the module.
    #[error("{space} index {index} is still referenced and cannot be deleted")]
    DanglingReference { space: IndexSpace, index: u32 },

    /// A code-section locator named an imported function. Code bodies only
    /// exist for locally defined functions.
    #[error("function index {0} names an imported function")]
    ImportedFunction(u32),

    /// Structural edits of the table and memory sections are not supported;
    /// those sections can only be queried and updated in place.
    #[error("structural edits of the {0} section are not supported")]
    UnsupportedEdit(&'static str),

    /// A global initializer whose value disagrees with the declared value
    /// type of the global.
    #[error("global initializer mismatch: declared {declared}, got a {actual} value")]
    InitTypeMismatch { declared: ValType, actual: ValType },

    /// An entity handed to `insert` or `update` left out a field the
    /// operation cannot do without.
    #[error("a value for `{0}` is required for this operation")]
    FieldRequired(&'static str),

    /// Name subsection entries are keyed by a unique index.
    #[error("a name entry for index {0} already exists in this subsection")]
    DuplicateName(u32),

    /// The module already carries a start function.
    #[error("the module already has a start function")]
    StartAlreadySet,

    /// A flat instruction sequence whose terminators do not balance its
    /// `block`/`loop`/`if` headers.
    #[error("flat instruction sequence is not balanced: {0}")]
    UnbalancedSequence(&'static str),

    #[error("unrecognized value type token `{0}`")]
    UnknownTypeToken(String),

    /// Input uses a construct the module store does not model (GC types,
    /// element expression lists, tags, and the like).
    #[error("unsupported wasm construct: {0}")]
    UnsupportedWasm(&'static str),

    #[error(transparent)]
    Parse(#[from] wasmparser::BinaryReaderError),

    #[error(transparent)]
    IoError(#[from] std::io::Error),
}
