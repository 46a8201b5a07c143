//! Decodes a binary module into the structured [`Module`] representation.
//!
//! Decoding is strict about shape but permissive about instructions: any
//! operator outside the modeled set is captured verbatim as
//! [`Instruction::Raw`] so its bytes survive a rewrite untouched.

use wasmparser::{
    CompositeInnerType, DataKind, ElementItems, ElementKind, Encoding, FunctionBody, KnownCustom,
    Name, Operator, Parser, Payload, TableInit, TypeRef,
};

use crate::error::Error;
use crate::instrs::{fold, BlockType, Instruction};
use crate::module::{
    CustomEntry, DataEntry, DataMode, ElementEntry, ElementMode, ExportEntry, ExportKind,
    GlobalEntry, ImportEntry, ImportKind, MemoryEntry, Module, NameAssoc, TableEntry,
};
use crate::types::{FuncType, GlobalType, Limits, ValType};

pub(crate) fn parse(bytes: &[u8]) -> Result<Module, Error> {
    let mut module = Module::default();
    for payload in Parser::new(0).parse_all(bytes) {
        match payload? {
            Payload::Version { encoding, .. } => {
                if encoding != Encoding::Module {
                    return Err(Error::UnsupportedWasm("component encoding"));
                }
            }
            Payload::TypeSection(reader) => {
                for rec_group in reader {
                    for ty in rec_group?.into_types() {
                        let CompositeInnerType::Func(func) = &ty.composite_type.inner else {
                            return Err(Error::UnsupportedWasm("gc types"));
                        };
                        module.types.push(FuncType {
                            params: convert_val_types(func.params())?,
                            results: convert_val_types(func.results())?,
                        });
                    }
                }
            }
            Payload::ImportSection(reader) => {
                for import in reader {
                    let import = import?;
                    module.push_import(ImportEntry {
                        module: import.module.to_string(),
                        name: import.name.to_string(),
                        kind: convert_import_kind(import.ty)?,
                    });
                }
            }
            Payload::FunctionSection(reader) => {
                for typeidx in reader {
                    module.functions.push(typeidx?);
                }
            }
            Payload::TableSection(reader) => {
                for table in reader {
                    let table = table?;
                    if !matches!(table.init, TableInit::RefNull) {
                        return Err(Error::UnsupportedWasm("table init expressions"));
                    }
                    module.tables.push(TableEntry {
                        element: ValType::try_from(wasmparser::ValType::Ref(
                            table.ty.element_type,
                        ))?,
                        limits: Limits {
                            min: table.ty.initial,
                            max: table.ty.maximum,
                        },
                    });
                }
            }
            Payload::MemorySection(reader) => {
                for memory in reader {
                    let memory = memory?;
                    module.memories.push(MemoryEntry {
                        limits: Limits {
                            min: memory.initial,
                            max: memory.maximum,
                        },
                        shared: memory.shared,
                        memory64: memory.memory64,
                    });
                }
            }
            Payload::GlobalSection(reader) => {
                for global in reader {
                    let global = global?;
                    module.globals.push(GlobalEntry {
                        ty: convert_global_type(global.ty)?,
                        init: parse_const_expr(&global.init_expr, bytes)?,
                    });
                }
            }
            Payload::ExportSection(reader) => {
                for export in reader {
                    let export = export?;
                    module.exports.push(ExportEntry {
                        name: export.name.to_string(),
                        kind: convert_export_kind(export.kind)?,
                        index: export.index,
                    });
                }
            }
            Payload::StartSection { func, .. } => module.start = Some(func),
            Payload::ElementSection(reader) => {
                for element in reader {
                    module.elements.push(parse_element(element?, bytes)?);
                }
            }
            Payload::DataCountSection { .. } => module.has_data_count = true,
            Payload::CodeSectionStart { .. } => {}
            Payload::CodeSectionEntry(body) => {
                module.code.push(parse_code(&body, bytes)?);
            }
            Payload::DataSection(reader) => {
                for data in reader {
                    let data = data?;
                    let mode = match data.kind {
                        DataKind::Active {
                            memory_index,
                            offset_expr,
                        } => DataMode::Active {
                            memory_index,
                            offset: parse_const_expr(&offset_expr, bytes)?,
                        },
                        DataKind::Passive => DataMode::Passive,
                    };
                    module.datas.push(DataEntry {
                        mode,
                        init: data.data.to_vec(),
                    });
                }
            }
            Payload::CustomSection(reader) => match reader.as_known() {
                KnownCustom::Name(name_reader) => {
                    let names = module.names_mut();
                    for subsection in name_reader {
                        match subsection? {
                            Name::Function(map) => {
                                names.func_names = convert_name_map(map)?;
                            }
                            Name::Global(map) => {
                                names.global_names = convert_name_map(map)?;
                            }
                            Name::Data(map) => {
                                names.data_names = convert_name_map(map)?;
                            }
                            // Local, label, and the other sub-tables are not
                            // modeled and do not survive a round trip.
                            _ => {}
                        }
                    }
                }
                _ => module.customs.push(CustomEntry {
                    name: reader.name().to_string(),
                    data: reader.data().to_vec(),
                }),
            },
            Payload::TagSection(_) => return Err(Error::UnsupportedWasm("exception tags")),
            Payload::End(_) => {}
            _ => return Err(Error::UnsupportedWasm("unrecognized section")),
        }
    }
    tracing::debug!(
        types = module.types.len(),
        functions = module.functions.len(),
        code = module.code.len(),
        "parsed module"
    );
    Ok(module)
}

fn convert_val_types(types: &[wasmparser::ValType]) -> Result<Vec<ValType>, Error> {
    types.iter().map(|ty| ValType::try_from(*ty)).collect()
}

fn convert_import_kind(ty: TypeRef) -> Result<ImportKind, Error> {
    Ok(match ty {
        TypeRef::Func(typeidx) => ImportKind::Func(typeidx),
        TypeRef::Table(table) => ImportKind::Table(TableEntry {
            element: ValType::try_from(wasmparser::ValType::Ref(table.element_type))?,
            limits: Limits {
                min: table.initial,
                max: table.maximum,
            },
        }),
        TypeRef::Memory(memory) => ImportKind::Memory(MemoryEntry {
            limits: Limits {
                min: memory.initial,
                max: memory.maximum,
            },
            shared: memory.shared,
            memory64: memory.memory64,
        }),
        TypeRef::Global(global) => ImportKind::Global(convert_global_type(global)?),
        TypeRef::Tag(_) => return Err(Error::UnsupportedWasm("exception tags")),
    })
}

fn convert_global_type(ty: wasmparser::GlobalType) -> Result<GlobalType, Error> {
    if ty.shared {
        return Err(Error::UnsupportedWasm("shared globals"));
    }
    Ok(GlobalType {
        val_type: ValType::try_from(ty.content_type)?,
        mutable: ty.mutable,
    })
}

fn convert_export_kind(kind: wasmparser::ExternalKind) -> Result<ExportKind, Error> {
    Ok(match kind {
        wasmparser::ExternalKind::Func => ExportKind::Func,
        wasmparser::ExternalKind::Table => ExportKind::Table,
        wasmparser::ExternalKind::Memory => ExportKind::Memory,
        wasmparser::ExternalKind::Global => ExportKind::Global,
        wasmparser::ExternalKind::Tag => return Err(Error::UnsupportedWasm("exception tags")),
    })
}

fn convert_name_map(map: wasmparser::NameMap) -> Result<Vec<NameAssoc>, Error> {
    let mut out = Vec::new();
    for naming in map {
        let naming = naming?;
        out.push(NameAssoc {
            index: naming.index,
            name: naming.name.to_string(),
        });
    }
    Ok(out)
}

fn parse_element(element: wasmparser::Element, bytes: &[u8]) -> Result<ElementEntry, Error> {
    let mode = match element.kind {
        ElementKind::Active {
            table_index,
            offset_expr,
        } => ElementMode::Active {
            table_index: table_index.unwrap_or(0),
            offset: parse_const_expr(&offset_expr, bytes)?,
        },
        ElementKind::Passive => ElementMode::Passive,
        ElementKind::Declared => ElementMode::Declared,
    };
    let func_indices = match element.items {
        ElementItems::Functions(reader) => {
            reader.into_iter().collect::<Result<Vec<u32>, _>>()?
        }
        ElementItems::Expressions(_, reader) => {
            let mut out = Vec::new();
            for expr in reader {
                let instrs = parse_const_expr(&expr?, bytes)?;
                match instrs.as_slice() {
                    [Instruction::RefFunc(funcidx)] => out.push(*funcidx),
                    _ => return Err(Error::UnsupportedWasm("element item expressions")),
                }
            }
            out
        }
    };
    Ok(ElementEntry { mode, func_indices })
}

fn parse_code(body: &FunctionBody, bytes: &[u8]) -> Result<crate::module::CodeEntry, Error> {
    let mut locals = Vec::new();
    for local in body.get_locals_reader()? {
        let (count, ty) = local?;
        locals.push((count, ValType::try_from(ty)?));
    }
    let mut flat = parse_operators(body.get_operators_reader()?, bytes)?;
    // The body's own terminator is implicit in the structured form.
    match flat.pop() {
        Some(Instruction::End) => {}
        _ => return Err(Error::UnbalancedSequence("function body")),
    }
    Ok(crate::module::CodeEntry {
        locals,
        body: fold(&flat)?,
    })
}

/// Constant expressions share the operator grammar, so they reuse the same
/// conversion and drop the trailing terminator.
fn parse_const_expr(expr: &wasmparser::ConstExpr, bytes: &[u8]) -> Result<Vec<Instruction>, Error> {
    let mut flat = parse_operators(expr.get_operators_reader(), bytes)?;
    match flat.pop() {
        Some(Instruction::End) => {}
        _ => return Err(Error::UnbalancedSequence("constant expression")),
    }
    Ok(flat)
}

fn parse_operators(
    mut reader: wasmparser::OperatorsReader,
    bytes: &[u8],
) -> Result<Vec<Instruction>, Error> {
    let mut out = Vec::new();
    while !reader.eof() {
        let start = reader.original_position();
        let op = reader.read()?;
        let end = reader.original_position();
        out.push(convert_operator(&op, &bytes[start..end])?);
    }
    Ok(out)
}

fn convert_operator(op: &Operator, raw: &[u8]) -> Result<Instruction, Error> {
    Ok(match op {
        Operator::Block { blockty } => Instruction::Block {
            ty: convert_block_type(*blockty)?,
            body: Vec::new(),
        },
        Operator::Loop { blockty } => Instruction::Loop {
            ty: convert_block_type(*blockty)?,
            body: Vec::new(),
        },
        Operator::If { blockty } => Instruction::If {
            ty: convert_block_type(*blockty)?,
            then_body: Vec::new(),
            else_body: Vec::new(),
        },
        Operator::Else => Instruction::Else,
        Operator::End => Instruction::End,
        Operator::Unreachable => Instruction::Unreachable,
        Operator::Nop => Instruction::Nop,
        Operator::Return => Instruction::Return,
        Operator::Drop => Instruction::Drop,
        Operator::Select => Instruction::Select,
        Operator::Br { relative_depth } => Instruction::Br(*relative_depth),
        Operator::BrIf { relative_depth } => Instruction::BrIf(*relative_depth),
        Operator::Call { function_index } => Instruction::Call(*function_index),
        Operator::CallIndirect {
            type_index,
            table_index,
        } => Instruction::CallIndirect {
            type_index: *type_index,
            table_index: *table_index,
        },
        Operator::RefFunc { function_index } => Instruction::RefFunc(*function_index),
        Operator::LocalGet { local_index } => Instruction::LocalGet(*local_index),
        Operator::LocalSet { local_index } => Instruction::LocalSet(*local_index),
        Operator::LocalTee { local_index } => Instruction::LocalTee(*local_index),
        Operator::GlobalGet { global_index } => Instruction::GlobalGet(*global_index),
        Operator::GlobalSet { global_index } => Instruction::GlobalSet(*global_index),
        Operator::I32Const { value } => Instruction::I32Const(*value),
        Operator::I64Const { value } => Instruction::I64Const(*value),
        Operator::F32Const { value } => Instruction::F32Const(f32::from_bits(value.bits())),
        Operator::F64Const { value } => Instruction::F64Const(f64::from_bits(value.bits())),
        _ => Instruction::Raw(raw.to_vec()),
    })
}

fn convert_block_type(blockty: wasmparser::BlockType) -> Result<BlockType, Error> {
    Ok(match blockty {
        wasmparser::BlockType::Empty => BlockType::Empty,
        wasmparser::BlockType::Type(ty) => BlockType::Result(ValType::try_from(ty)?),
        wasmparser::BlockType::FuncType(typeidx) => BlockType::Func(typeidx),
    })
}

#[cfg(test)]
mod tests {
    use crate::instrs::Instruction;
    use crate::module::{ImportKind, Module};
    use crate::types::ValType;

    fn build(wat: &str) -> Module {
        let bytes = wat::parse_str(wat).unwrap();
        Module::from_bytes(&bytes).unwrap()
    }

    #[test]
    fn sections_land_in_their_stores() {
        let module = build(
            r#"(module
                (import "env" "log" (func (param i32)))
                (memory 1)
                (global $g (mut i32) (i32.const 7))
                (func (export "run") (param i32) (result i32)
                    local.get 0
                    call 0
                    global.get $g)
            )"#,
        );
        assert_eq!(module.num_func_imports(), 1);
        assert_eq!(module.functions.len(), 1);
        assert_eq!(module.memories.len(), 1);
        assert_eq!(module.globals.len(), 1);
        assert_eq!(module.exports.len(), 1);
        assert!(matches!(module.imports[0].kind, ImportKind::Func(_)));
    }

    #[test]
    fn unmodeled_operators_are_kept_raw() {
        let module = build(
            r#"(module
                (memory 1)
                (func (result i32)
                    i32.const 0
                    i32.load)
            )"#,
        );
        let body = &module.code[0].body;
        assert_eq!(body[0], Instruction::I32Const(0));
        assert!(matches!(body[1], Instruction::Raw(_)));
    }

    #[test]
    fn nested_control_flow_is_folded() {
        let module = build(
            r#"(module
                (func (param i32) (result i32)
                    local.get 0
                    if (result i32)
                        i32.const 1
                    else
                        i32.const 2
                    end)
            )"#,
        );
        let body = &module.code[0].body;
        match &body[1] {
            Instruction::If {
                then_body,
                else_body,
                ..
            } => {
                assert_eq!(then_body.as_slice(), &[Instruction::I32Const(1)]);
                assert_eq!(else_body.as_slice(), &[Instruction::I32Const(2)]);
            }
            other => panic!("expected folded if, got {other:?}"),
        }
    }

    #[test]
    fn global_initializers_decode_to_constants() {
        let module = build(r#"(module (global i64 (i64.const -3)))"#);
        assert_eq!(module.globals[0].ty.val_type, ValType::I64);
        assert_eq!(
            module.globals[0].init.as_slice(),
            &[Instruction::I64Const(-3)]
        );
    }
}
