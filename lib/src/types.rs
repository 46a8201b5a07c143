//! Value types and the small section vocabulary shared across the module
//! store, the entity descriptors, and the binary boundary.

use std::fmt;

use crate::error::Error;
use crate::instrs::Instruction;

/// A WebAssembly value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValType {
    I32,
    I64,
    F32,
    F64,
    V128,
    FuncRef,
    ExternRef,
}

impl ValType {
    /// Maps a human-readable type token (`"i32"`, `"i64"`, `"f32"`, `"f64"`)
    /// to a value type.
    pub fn from_token(token: &str) -> Result<Self, Error> {
        match token {
            "i32" => Ok(ValType::I32),
            "i64" => Ok(ValType::I64),
            "f32" => Ok(ValType::F32),
            "f64" => Ok(ValType::F64),
            other => Err(Error::UnknownTypeToken(other.to_owned())),
        }
    }
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValType::I32 => "i32",
            ValType::I64 => "i64",
            ValType::F32 => "f32",
            ValType::F64 => "f64",
            ValType::V128 => "v128",
            ValType::FuncRef => "funcref",
            ValType::ExternRef => "externref",
        };
        f.write_str(name)
    }
}

impl TryFrom<wasmparser::ValType> for ValType {
    type Error = Error;

    fn try_from(ty: wasmparser::ValType) -> Result<Self, Error> {
        match ty {
            wasmparser::ValType::I32 => Ok(ValType::I32),
            wasmparser::ValType::I64 => Ok(ValType::I64),
            wasmparser::ValType::F32 => Ok(ValType::F32),
            wasmparser::ValType::F64 => Ok(ValType::F64),
            wasmparser::ValType::V128 => Ok(ValType::V128),
            wasmparser::ValType::Ref(r) if r.is_func_ref() => Ok(ValType::FuncRef),
            wasmparser::ValType::Ref(r) if r.is_extern_ref() => Ok(ValType::ExternRef),
            wasmparser::ValType::Ref(_) => Err(Error::UnsupportedWasm("typed reference")),
        }
    }
}

impl From<ValType> for wasm_encoder::ValType {
    fn from(ty: ValType) -> Self {
        match ty {
            ValType::I32 => wasm_encoder::ValType::I32,
            ValType::I64 => wasm_encoder::ValType::I64,
            ValType::F32 => wasm_encoder::ValType::F32,
            ValType::F64 => wasm_encoder::ValType::F64,
            ValType::V128 => wasm_encoder::ValType::V128,
            ValType::FuncRef => wasm_encoder::ValType::Ref(wasm_encoder::RefType::FUNCREF),
            ValType::ExternRef => wasm_encoder::ValType::Ref(wasm_encoder::RefType::EXTERNREF),
        }
    }
}

/// A function signature: one row of the type section.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FuncType {
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

/// Table and memory size bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub min: u64,
    pub max: Option<u64>,
}

/// The declared type of a global: its value type and mutability flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalType {
    pub val_type: ValType,
    pub mutable: bool,
}

/// The discriminant routing a custom-name query to one of the three
/// sub-tables of the "name" section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Function,
    Global,
    Data,
}

/// A typed numeric constant, used for global initializers.
#[derive(Debug, Clone, Copy)]
pub enum ConstValue {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

// Bit-pattern comparison for the float arms, matching [`Instruction`].
impl PartialEq for ConstValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ConstValue::I32(a), ConstValue::I32(b)) => a == b,
            (ConstValue::I64(a), ConstValue::I64(b)) => a == b,
            (ConstValue::F32(a), ConstValue::F32(b)) => a.to_bits() == b.to_bits(),
            (ConstValue::F64(a), ConstValue::F64(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for ConstValue {}

impl ConstValue {
    pub fn val_type(&self) -> ValType {
        match self {
            ConstValue::I32(_) => ValType::I32,
            ConstValue::I64(_) => ValType::I64,
            ConstValue::F32(_) => ValType::F32,
            ConstValue::F64(_) => ValType::F64,
        }
    }

    /// The single constant instruction initializing a global of this value.
    pub fn to_instruction(self) -> Instruction {
        match self {
            ConstValue::I32(v) => Instruction::I32Const(v),
            ConstValue::I64(v) => Instruction::I64Const(v),
            ConstValue::F32(v) => Instruction::F32Const(v),
            ConstValue::F64(v) => Instruction::F64Const(v),
        }
    }

    /// Reads a constant back out of an initializer instruction, when the
    /// initializer is a plain numeric constant.
    pub fn from_instruction(instr: &Instruction) -> Option<Self> {
        match instr {
            Instruction::I32Const(v) => Some(ConstValue::I32(*v)),
            Instruction::I64Const(v) => Some(ConstValue::I64(*v)),
            Instruction::F32Const(v) => Some(ConstValue::F32(*v)),
            Instruction::F64Const(v) => Some(ConstValue::F64(*v)),
            _ => None,
        }
    }
}
