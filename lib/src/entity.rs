//! Entity descriptors: the user-facing view of one row in one section.
//!
//! The same struct serves as query template and result. Every field is
//! optional; in a query an unset field matches anything, and in `update` an
//! unset field leaves the stored value untouched. `select` returns fully
//! populated copies with no back-reference into the module.

use crate::error::Error;
use crate::instrs::Instruction;
use crate::types::{ConstValue, NameKind, ValType};

/// One function signature in the type section.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Type {
    pub typeidx: Option<u32>,
    pub args: Option<Vec<ValType>>,
    pub rets: Option<Vec<ValType>>,
}

impl Type {
    pub fn new(args: Vec<ValType>, rets: Vec<ValType>) -> Self {
        Type {
            typeidx: None,
            args: Some(args),
            rets: Some(rets),
        }
    }

    pub fn at(typeidx: u32) -> Self {
        Type {
            typeidx: Some(typeidx),
            ..Default::default()
        }
    }

    /// Builds a signature from textual type tokens (`"i32"`, `"i64"`,
    /// `"f32"`, `"f64"`), rejecting anything else with
    /// [`Error::UnknownTypeToken`](crate::error::Error::UnknownTypeToken).
    pub fn from_tokens<A, R>(args: A, rets: R) -> Result<Self, Error>
    where
        A: IntoIterator,
        A::Item: AsRef<str>,
        R: IntoIterator,
        R::Item: AsRef<str>,
    {
        let args = args
            .into_iter()
            .map(|t| ValType::from_token(t.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let rets = rets
            .into_iter()
            .map(|t| ValType::from_token(t.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Type::new(args, rets))
    }
}

/// A function-kind import. `importidx` is the position in the import
/// section; `typeidx` the signature it carries.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Import {
    pub importidx: Option<u32>,
    pub module: Option<String>,
    pub name: Option<String>,
    pub typeidx: Option<u32>,
}

impl Import {
    pub fn new(module: impl Into<String>, name: impl Into<String>, typeidx: u32) -> Self {
        Import {
            importidx: None,
            module: Some(module.into()),
            name: Some(name.into()),
            typeidx: Some(typeidx),
        }
    }
}

/// A locally defined function. `funcidx` is in the *global* function index
/// space (imported functions first).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Function {
    pub funcidx: Option<u32>,
    pub typeidx: Option<u32>,
}

impl Function {
    pub fn with_type(typeidx: u32) -> Self {
        Function {
            funcidx: None,
            typeidx: Some(typeidx),
        }
    }

    pub fn at(funcidx: u32) -> Self {
        Function {
            funcidx: Some(funcidx),
            typeidx: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub tableidx: Option<u32>,
    pub min: Option<u64>,
    pub max: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Memory {
    pub memidx: Option<u32>,
    pub min: Option<u64>,
    pub max: Option<u64>,
}

/// A defined global. `globalidx` is in the full global index space
/// (imported globals first), symmetric with the function index split.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Global {
    pub globalidx: Option<u32>,
    pub valtype: Option<ValType>,
    pub mutable: Option<bool>,
    pub val: Option<ConstValue>,
}

impl Global {
    pub fn new(valtype: ValType, mutable: bool, val: ConstValue) -> Self {
        Global {
            globalidx: None,
            valtype: Some(valtype),
            mutable: Some(mutable),
            val: Some(val),
        }
    }

    pub fn at(globalidx: u32) -> Self {
        Global {
            globalidx: Some(globalidx),
            ..Default::default()
        }
    }
}

/// A function-kind export. `funcidx` is the exported function's index in the
/// global function index space.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Export {
    pub exportidx: Option<u32>,
    pub name: Option<String>,
    pub funcidx: Option<u32>,
}

impl Export {
    pub fn new(name: impl Into<String>, funcidx: u32) -> Self {
        Export {
            exportidx: None,
            name: Some(name.into()),
            funcidx: Some(funcidx),
        }
    }
}

/// The optional start function singleton.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Start {
    pub funcidx: Option<u32>,
}

/// An active element segment.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub elemidx: Option<u32>,
    pub tableidx: Option<u32>,
    pub offset: Option<i32>,
    pub funcidx_list: Option<Vec<u32>>,
}

/// One addressable local: the flattening of the run-length encoded local
/// declarations into indices `0..n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Local {
    pub idx: u32,
    pub val_type: ValType,
}

/// A code body. `funcidx` is global function index space; `instrs` is the
/// flat instruction view.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Code {
    pub funcidx: Option<u32>,
    pub locals: Option<Vec<Local>>,
    pub instrs: Option<Vec<Instruction>>,
}

impl Code {
    pub fn new(locals: Vec<Local>, instrs: Vec<Instruction>) -> Self {
        Code {
            funcidx: None,
            locals: Some(locals),
            instrs: Some(instrs),
        }
    }

    pub fn at(funcidx: u32) -> Self {
        Code {
            funcidx: Some(funcidx),
            ..Default::default()
        }
    }
}

/// A data segment (active, offset expressed as an `i32.const`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Data {
    pub dataidx: Option<u32>,
    pub offset: Option<i32>,
    pub init: Option<Vec<u8>>,
}

/// One entry of a name sub-table in the "name" custom section. The kind is
/// mandatory: it routes the operation to the function-, global-, or
/// data-name sub-table.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomName {
    pub kind: NameKind,
    pub idx: Option<u32>,
    pub name: Option<String>,
}

impl CustomName {
    /// A match-anything query against one sub-table.
    pub fn any(kind: NameKind) -> Self {
        CustomName {
            kind,
            idx: None,
            name: None,
        }
    }

    pub fn new(kind: NameKind, idx: u32, name: impl Into<String>) -> Self {
        CustomName {
            kind,
            idx: Some(idx),
            name: Some(name.into()),
        }
    }
}
