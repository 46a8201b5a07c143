//! Encodes a [`Module`] back to binary form, emitting sections in the
//! order the format requires and skipping sections with no entries.

use std::borrow::Cow;

use wasm_encoder::{
    CodeSection, ConstExpr, CustomSection, DataCountSection, DataSection, ElementSection,
    Elements, Encode, EntityType, ExportSection, Function, FunctionSection, GlobalSection,
    ImportSection, MemorySection, NameMap, NameSection, StartSection, TableSection, TypeSection,
};

use crate::error::Error;
use crate::instrs::{flatten, BlockType, Instruction};
use crate::module::{
    DataMode, ElementMode, ExportKind, ImportKind, MemoryEntry, Module, NameAssoc, TableEntry,
};
use crate::types::{GlobalType, ValType};

pub(crate) fn encode(module: &Module) -> Result<Vec<u8>, Error> {
    let mut out = wasm_encoder::Module::new();

    if !module.types.is_empty() {
        let mut types = TypeSection::new();
        for ty in &module.types {
            types.function(
                ty.params.iter().map(|&t| t.into()),
                ty.results.iter().map(|&t| t.into()),
            );
        }
        out.section(&types);
    }

    if !module.imports.is_empty() {
        let mut imports = ImportSection::new();
        for import in &module.imports {
            imports.import(&import.module, &import.name, entity_type(&import.kind));
        }
        out.section(&imports);
    }

    if !module.functions.is_empty() {
        let mut functions = FunctionSection::new();
        for &typeidx in &module.functions {
            functions.function(typeidx);
        }
        out.section(&functions);
    }

    if !module.tables.is_empty() {
        let mut tables = TableSection::new();
        for table in &module.tables {
            tables.table(table_type(table));
        }
        out.section(&tables);
    }

    if !module.memories.is_empty() {
        let mut memories = MemorySection::new();
        for memory in &module.memories {
            memories.memory(memory_type(memory));
        }
        out.section(&memories);
    }

    if !module.globals.is_empty() {
        let mut globals = GlobalSection::new();
        for global in &module.globals {
            globals.global(global_type(&global.ty), &encode_const_expr(&global.init));
        }
        out.section(&globals);
    }

    if !module.exports.is_empty() {
        let mut exports = ExportSection::new();
        for export in &module.exports {
            exports.export(&export.name, export_kind(export.kind), export.index);
        }
        out.section(&exports);
    }

    if let Some(function_index) = module.start {
        out.section(&StartSection { function_index });
    }

    if !module.elements.is_empty() {
        let mut elements = ElementSection::new();
        for element in &module.elements {
            let items = Elements::Functions(&element.func_indices);
            match &element.mode {
                ElementMode::Active {
                    table_index,
                    offset,
                } => {
                    elements.active(
                        (*table_index != 0).then_some(*table_index),
                        &encode_const_expr(offset),
                        items,
                    );
                }
                ElementMode::Passive => {
                    elements.passive(items);
                }
                ElementMode::Declared => {
                    elements.declared(items);
                }
            }
        }
        out.section(&elements);
    }

    if module.has_data_count {
        out.section(&DataCountSection {
            count: module.datas.len() as u32,
        });
    }

    if !module.code.is_empty() {
        let mut code = CodeSection::new();
        for entry in &module.code {
            let locals = entry.locals.iter().map(|&(count, ty)| (count, ty.into()));
            let mut func = Function::new(locals);
            for instr in flatten(&entry.body) {
                match &instr {
                    Instruction::Raw(bytes) => {
                        func.raw(bytes.iter().copied());
                    }
                    other => {
                        if let Some(lowered) = lower(other) {
                            func.instruction(&lowered);
                        }
                    }
                }
            }
            func.instruction(&wasm_encoder::Instruction::End);
            code.function(&func);
        }
        out.section(&code);
    }

    if !module.datas.is_empty() {
        let mut datas = DataSection::new();
        for data in &module.datas {
            match &data.mode {
                DataMode::Active {
                    memory_index,
                    offset,
                } => {
                    datas.active(
                        *memory_index,
                        &encode_const_expr(offset),
                        data.init.iter().copied(),
                    );
                }
                DataMode::Passive => {
                    datas.passive(data.init.iter().copied());
                }
            }
        }
        out.section(&datas);
    }

    if let Some(names) = &module.names {
        if !names.is_empty() {
            let mut section = NameSection::new();
            if !names.func_names.is_empty() {
                section.functions(&name_map(&names.func_names));
            }
            if !names.global_names.is_empty() {
                section.globals(&name_map(&names.global_names));
            }
            if !names.data_names.is_empty() {
                section.data(&name_map(&names.data_names));
            }
            out.section(&section);
        }
    }

    for custom in &module.customs {
        out.section(&CustomSection {
            name: Cow::Borrowed(custom.name.as_str()),
            data: Cow::Borrowed(custom.data.as_slice()),
        });
    }

    let bytes = out.finish();
    tracing::debug!(len = bytes.len(), "encoded module");
    Ok(bytes)
}

fn entity_type(kind: &ImportKind) -> EntityType {
    match kind {
        ImportKind::Func(typeidx) => EntityType::Function(*typeidx),
        ImportKind::Table(table) => EntityType::Table(table_type(table)),
        ImportKind::Memory(memory) => EntityType::Memory(memory_type(memory)),
        ImportKind::Global(global) => EntityType::Global(global_type(global)),
    }
}

fn table_type(table: &TableEntry) -> wasm_encoder::TableType {
    wasm_encoder::TableType {
        element_type: ref_type(table.element),
        table64: false,
        minimum: table.limits.min,
        maximum: table.limits.max,
        shared: false,
    }
}

fn memory_type(memory: &MemoryEntry) -> wasm_encoder::MemoryType {
    wasm_encoder::MemoryType {
        minimum: memory.limits.min,
        maximum: memory.limits.max,
        memory64: memory.memory64,
        shared: memory.shared,
        page_size_log2: None,
    }
}

fn global_type(ty: &GlobalType) -> wasm_encoder::GlobalType {
    wasm_encoder::GlobalType {
        val_type: ty.val_type.into(),
        mutable: ty.mutable,
        shared: false,
    }
}

// Only reference types reach this point; tables carry nothing else.
fn ref_type(ty: ValType) -> wasm_encoder::RefType {
    match ty {
        ValType::ExternRef => wasm_encoder::RefType::EXTERNREF,
        _ => wasm_encoder::RefType::FUNCREF,
    }
}

fn export_kind(kind: ExportKind) -> wasm_encoder::ExportKind {
    match kind {
        ExportKind::Func => wasm_encoder::ExportKind::Func,
        ExportKind::Table => wasm_encoder::ExportKind::Table,
        ExportKind::Memory => wasm_encoder::ExportKind::Memory,
        ExportKind::Global => wasm_encoder::ExportKind::Global,
    }
}

/// Single-constant initializers take the dedicated constructors; anything
/// else is lowered instruction by instruction into a raw expression.
fn encode_const_expr(instrs: &[Instruction]) -> ConstExpr {
    match instrs {
        [Instruction::I32Const(v)] => ConstExpr::i32_const(*v),
        [Instruction::I64Const(v)] => ConstExpr::i64_const(*v),
        [Instruction::F32Const(v)] => ConstExpr::f32_const(*v),
        [Instruction::F64Const(v)] => ConstExpr::f64_const(*v),
        [Instruction::GlobalGet(g)] => ConstExpr::global_get(*g),
        [Instruction::RefFunc(f)] => ConstExpr::ref_func(*f),
        _ => {
            let mut bytes = Vec::new();
            for instr in flatten(instrs) {
                match &instr {
                    Instruction::Raw(raw) => bytes.extend_from_slice(raw),
                    other => {
                        if let Some(lowered) = lower(other) {
                            lowered.encode(&mut bytes);
                        }
                    }
                }
            }
            ConstExpr::raw(bytes)
        }
    }
}

fn name_map(assocs: &[NameAssoc]) -> NameMap {
    let mut map = NameMap::new();
    for assoc in assocs {
        map.append(assoc.index, &assoc.name);
    }
    map
}

fn lower(instr: &Instruction) -> Option<wasm_encoder::Instruction<'static>> {
    use wasm_encoder::Instruction as Enc;
    Some(match instr {
        Instruction::Raw(_) => return None,
        Instruction::Block { ty, .. } => Enc::Block(lower_block_type(ty)),
        Instruction::Loop { ty, .. } => Enc::Loop(lower_block_type(ty)),
        Instruction::If { ty, .. } => Enc::If(lower_block_type(ty)),
        Instruction::Else => Enc::Else,
        Instruction::End => Enc::End,
        Instruction::Unreachable => Enc::Unreachable,
        Instruction::Nop => Enc::Nop,
        Instruction::Return => Enc::Return,
        Instruction::Drop => Enc::Drop,
        Instruction::Select => Enc::Select,
        Instruction::Br(depth) => Enc::Br(*depth),
        Instruction::BrIf(depth) => Enc::BrIf(*depth),
        Instruction::Call(funcidx) => Enc::Call(*funcidx),
        Instruction::CallIndirect {
            type_index,
            table_index,
        } => Enc::CallIndirect {
            type_index: *type_index,
            table_index: *table_index,
        },
        Instruction::RefFunc(funcidx) => Enc::RefFunc(*funcidx),
        Instruction::LocalGet(idx) => Enc::LocalGet(*idx),
        Instruction::LocalSet(idx) => Enc::LocalSet(*idx),
        Instruction::LocalTee(idx) => Enc::LocalTee(*idx),
        Instruction::GlobalGet(idx) => Enc::GlobalGet(*idx),
        Instruction::GlobalSet(idx) => Enc::GlobalSet(*idx),
        Instruction::I32Const(v) => Enc::I32Const(*v),
        Instruction::I64Const(v) => Enc::I64Const(*v),
        Instruction::F32Const(v) => Enc::F32Const(*v),
        Instruction::F64Const(v) => Enc::F64Const(*v),
    })
}

fn lower_block_type(ty: &BlockType) -> wasm_encoder::BlockType {
    match ty {
        BlockType::Empty => wasm_encoder::BlockType::Empty,
        BlockType::Result(ty) => wasm_encoder::BlockType::Result((*ty).into()),
        BlockType::Func(typeidx) => wasm_encoder::BlockType::FunctionType(*typeidx),
    }
}
