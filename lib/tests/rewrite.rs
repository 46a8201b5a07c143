//! End-to-end section editing: every edit goes through a [`SectionRewriter`]
//! handle and is checked against the module's other sections afterwards.

use wasm_splice::entity;
use wasm_splice::rewrite::{
    Codes, Datas, Elements, Exports, Functions, Globals, Imports, Memories, Names, Starts, Tables,
    Types,
};
use wasm_splice::types::{ConstValue, NameKind, ValType};
use wasm_splice::{Error, Instruction, Module, SectionRewriter};

fn module(wat: &str) -> Module {
    Module::from_bytes(&wat::parse_str(wat).unwrap()).unwrap()
}

const BASE: &str = r#"(module
    (type $sig (func (param i32) (result i32)))
    (import "env" "log" (func $log (param i32)))
    (func $id (type $sig) local.get 0)
    (func $fwd (type $sig) local.get 0 call $log local.get 0 call $id)
    (export "fwd" (func $fwd))
)"#;

#[test]
fn appending_a_type_shifts_nothing() {
    let mut module = module(BASE);

    let mut types = SectionRewriter::<Types>::new(&mut module);
    types
        .insert(None, &entity::Type::new(vec![ValType::I64], vec![]))
        .unwrap();

    assert_eq!(types.select(&entity::Type::default()).unwrap().len(), 3);
    // No reference moved: both local functions still use type 0.
    let functions = SectionRewriter::<Functions>::new(&mut module);
    for func in functions.select(&entity::Function::default()).unwrap() {
        assert_eq!(func.typeidx, Some(0));
    }
}

#[test]
fn type_entities_accept_textual_type_tokens() {
    let mut module = module(BASE);

    let entry = entity::Type::from_tokens(["i32", "i64"], ["f64"]).unwrap();
    let mut types = SectionRewriter::<Types>::new(&mut module);
    types.insert(None, &entry).unwrap();

    let found = types.select(&entity::Type::at(2)).unwrap();
    assert_eq!(found[0].args, Some(vec![ValType::I32, ValType::I64]));
    assert_eq!(found[0].rets, Some(vec![ValType::F64]));

    let err = entity::Type::from_tokens(["i31"], Vec::<&str>::new()).unwrap_err();
    assert!(matches!(err, Error::UnknownTypeToken(ref token) if token == "i31"));
}

#[test]
fn inserting_a_type_at_the_front_repairs_type_references() {
    let mut module = module(BASE);

    let mut types = SectionRewriter::<Types>::new(&mut module);
    types
        .insert(Some(&entity::Type::at(0)), &entity::Type::new(vec![], vec![]))
        .unwrap();

    // $sig moved from 0 to 1 and the import's inline signature from 1 to 2.
    let imports = SectionRewriter::<Imports>::new(&mut module);
    let import = &imports.select(&entity::Import::default()).unwrap()[0];
    assert_eq!(import.typeidx, Some(2));

    let functions = SectionRewriter::<Functions>::new(&mut module);
    for func in functions.select(&entity::Function::default()).unwrap() {
        assert_eq!(func.typeidx, Some(1));
    }
}

#[test]
fn deleting_a_referenced_type_is_rejected_atomically() {
    let mut module = module(BASE);
    let before = module.clone();

    let mut types = SectionRewriter::<Types>::new(&mut module);
    let err = types.delete(&entity::Type::at(1)).unwrap_err();
    assert!(matches!(err, Error::DanglingReference { index: 1, .. }));
    assert_eq!(module, before);
}

#[test]
fn deleting_an_exported_function_is_rejected_atomically() {
    let mut module = module(BASE);
    let before = module.clone();

    // $fwd is function 2 in the global index space (one import ahead of it).
    let mut functions = SectionRewriter::<Functions>::new(&mut module);
    let err = functions.delete(&entity::Function::at(2)).unwrap_err();
    assert!(matches!(err, Error::DanglingReference { index: 2, .. }));
    assert_eq!(module, before);
}

#[test]
fn deleting_an_unreferenced_function_shifts_later_references() {
    let mut module = module(BASE);

    // $id is function 1; deleting it shifts $fwd from 2 to 1, including the
    // call inside $fwd's own body and the export record.
    let mut codes = SectionRewriter::<Codes>::new(&mut module);
    codes.delete(&entity::Code::at(1)).unwrap();
    let mut functions = SectionRewriter::<Functions>::new(&mut module);
    let err = functions.delete(&entity::Function::at(1)).unwrap_err();
    assert!(matches!(err, Error::DanglingReference { index: 1, .. }));

    // The call to $id still dangles, so rewrite the body first.
    let mut codes = SectionRewriter::<Codes>::new(&mut module);
    codes
        .update(
            &entity::Code::at(1),
            &entity::Code {
                funcidx: None,
                locals: None,
                instrs: Some(vec![
                    Instruction::LocalGet(0),
                    Instruction::Call(0),
                    Instruction::LocalGet(0),
                ]),
            },
        )
        .unwrap();
    let mut functions = SectionRewriter::<Functions>::new(&mut module);
    functions.delete(&entity::Function::at(1)).unwrap();

    let exports = SectionRewriter::<Exports>::new(&mut module);
    let export = &exports.select(&entity::Export::default()).unwrap()[0];
    assert_eq!(export.funcidx, Some(1));

    let bytes = module.to_bytes().unwrap();
    wasmparser::validate(&bytes).unwrap();
}

#[test]
fn function_queries_use_the_global_index_space() {
    let mut module = module(BASE);

    // Index 0 is the import, so it is invisible to the function section.
    let functions = SectionRewriter::<Functions>::new(&mut module);
    assert!(functions.select(&entity::Function::at(0)).unwrap().is_empty());
    assert_eq!(functions.select(&entity::Function::at(1)).unwrap().len(), 1);

    let codes = SectionRewriter::<Codes>::new(&mut module);
    let err = codes.select(&entity::Code::at(0)).unwrap_err();
    assert!(matches!(err, Error::ImportedFunction(0)));
}

#[test]
fn inserting_an_import_shifts_local_function_references() {
    let mut module = module(BASE);

    let mut imports = SectionRewriter::<Imports>::new(&mut module);
    imports
        .insert(
            Some(&entity::Import {
                importidx: Some(0),
                ..Default::default()
            }),
            &entity::Import::new("env", "trace", 1),
        )
        .unwrap();

    // $log moved to 1, $id to 2, $fwd to 3.
    let exports = SectionRewriter::<Exports>::new(&mut module);
    let export = &exports.select(&entity::Export::default()).unwrap()[0];
    assert_eq!(export.funcidx, Some(3));

    let codes = SectionRewriter::<Codes>::new(&mut module);
    let body = codes.select(&entity::Code::at(3)).unwrap()[0]
        .instrs
        .clone()
        .unwrap();
    assert!(body.contains(&Instruction::Call(1)));
    assert!(body.contains(&Instruction::Call(2)));

    let bytes = module.to_bytes().unwrap();
    wasmparser::validate(&bytes).unwrap();
}

#[test]
fn deleting_an_import_requires_no_remaining_references() {
    let mut module = module(BASE);
    let before = module.clone();

    let mut imports = SectionRewriter::<Imports>::new(&mut module);
    let err = imports
        .delete(&entity::Import {
            name: Some("log".to_string()),
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, Error::DanglingReference { index: 0, .. }));
    assert_eq!(module, before);
}

#[test]
fn global_inserts_validate_the_initializer_type() {
    let mut module = module(BASE);

    let mut globals = SectionRewriter::<Globals>::new(&mut module);
    globals
        .insert(None, &entity::Global::new(ValType::I32, true, ConstValue::I32(9)))
        .unwrap();

    let err = globals
        .insert(None, &entity::Global::new(ValType::I64, false, ConstValue::I32(1)))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::InitTypeMismatch {
            declared: ValType::I64,
            actual: ValType::I32,
        }
    ));

    globals
        .update(
            &entity::Global::at(0),
            &entity::Global {
                val: Some(ConstValue::I32(42)),
                ..Default::default()
            },
        )
        .unwrap();
    let found = globals.select(&entity::Global::at(0)).unwrap();
    assert_eq!(found[0].val, Some(ConstValue::I32(42)));
    assert_eq!(found[0].mutable, Some(true));
}

#[test]
fn inserting_a_global_at_the_front_repairs_global_references() {
    let mut module = module(
        r#"(module
            (global $g (mut i32) (i32.const 1))
            (func (result i32) global.get $g)
        )"#,
    );

    let mut globals = SectionRewriter::<Globals>::new(&mut module);
    globals
        .insert(
            Some(&entity::Global::at(0)),
            &entity::Global::new(ValType::I64, false, ConstValue::I64(0)),
        )
        .unwrap();

    let codes = SectionRewriter::<Codes>::new(&mut module);
    let body = codes.select(&entity::Code::at(0)).unwrap()[0]
        .instrs
        .clone()
        .unwrap();
    assert_eq!(body, vec![Instruction::GlobalGet(1)]);

    wasmparser::validate(&module.to_bytes().unwrap()).unwrap();
}

#[test]
fn tables_and_memories_reject_structural_edits() {
    let mut module = module(r#"(module (table 2 funcref) (memory 1 4))"#);

    let mut tables = SectionRewriter::<Tables>::new(&mut module);
    assert!(matches!(
        tables.insert(None, &entity::Table::default()),
        Err(Error::UnsupportedEdit("table"))
    ));
    let found = tables.select(&entity::Table::default()).unwrap();
    assert_eq!(found[0].min, Some(2));

    let mut memories = SectionRewriter::<Memories>::new(&mut module);
    assert!(matches!(
        memories.delete(&entity::Memory::default()),
        Err(Error::UnsupportedEdit("memory"))
    ));
    memories
        .update(
            &entity::Memory::default(),
            &entity::Memory {
                max: Some(8),
                ..Default::default()
            },
        )
        .unwrap();
    let found = memories.select(&entity::Memory::default()).unwrap();
    assert_eq!(found[0].max, Some(8));
}

#[test]
fn start_section_is_a_singleton() {
    let mut module = module(r#"(module (func))"#);

    let mut starts = SectionRewriter::<Starts>::new(&mut module);
    starts
        .insert(None, &entity::Start { funcidx: Some(0) })
        .unwrap();
    let err = starts
        .insert(None, &entity::Start { funcidx: Some(0) })
        .unwrap_err();
    assert!(matches!(err, Error::StartAlreadySet));

    assert_eq!(starts.select(&entity::Start::default()).unwrap().len(), 1);
    starts.delete(&entity::Start::default()).unwrap();
    assert!(starts.select(&entity::Start::default()).unwrap().is_empty());
}

#[test]
fn element_segments_support_full_crud() {
    let mut module = module(
        r#"(module
            (table 4 funcref)
            (func $a) (func $b)
            (elem (i32.const 0) $a)
        )"#,
    );

    let mut elements = SectionRewriter::<Elements>::new(&mut module);
    elements
        .insert(
            None,
            &entity::Element {
                elemidx: None,
                tableidx: None,
                offset: Some(2),
                funcidx_list: Some(vec![1]),
            },
        )
        .unwrap();
    assert_eq!(
        elements.select(&entity::Element::default()).unwrap().len(),
        2
    );

    elements
        .update(
            &entity::Element {
                offset: Some(2),
                ..Default::default()
            },
            &entity::Element {
                funcidx_list: Some(vec![0, 1]),
                ..Default::default()
            },
        )
        .unwrap();
    let found = elements
        .select(&entity::Element {
            offset: Some(2),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(found[0].funcidx_list, Some(vec![0, 1]));

    elements
        .delete(&entity::Element {
            offset: Some(0),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(
        elements.select(&entity::Element::default()).unwrap().len(),
        1
    );

    wasmparser::validate(&module.to_bytes().unwrap()).unwrap();
}

#[test]
fn data_segment_deletes_require_an_unambiguous_locator() {
    let mut module = module(
        r#"(module
            (memory 1)
            (data (i32.const 0) "aa")
            (data (i32.const 8) "bb")
        )"#,
    );

    let mut datas = SectionRewriter::<Datas>::new(&mut module);
    let err = datas.delete(&entity::Data::default()).unwrap_err();
    assert!(matches!(err, Error::AmbiguousLocator { matched: 2 }));

    datas
        .delete(&entity::Data {
            offset: Some(8),
            ..Default::default()
        })
        .unwrap();
    let left = datas.select(&entity::Data::default()).unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].init.as_deref(), Some(b"aa".as_slice()));
}

#[test]
fn name_sub_tables_are_isolated_and_sorted() {
    // No symbolic identifiers, so the text format contributes no name
    // section of its own.
    let mut module = module(
        r#"(module
            (import "env" "log" (func (param i32)))
            (func (param i32) (result i32) local.get 0)
            (func (param i32) (result i32) local.get 0)
        )"#,
    );

    let mut names = SectionRewriter::<Names>::new(&mut module);
    assert!(names
        .select(&entity::CustomName::any(NameKind::Function))
        .unwrap()
        .is_empty());
    names
        .insert(None, &entity::CustomName::new(NameKind::Function, 2, "fwd"))
        .unwrap();
    names
        .insert(None, &entity::CustomName::new(NameKind::Function, 0, "log"))
        .unwrap();

    let err = names
        .insert(None, &entity::CustomName::new(NameKind::Function, 0, "dup"))
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateName(0)));

    let funcs = names
        .select(&entity::CustomName::any(NameKind::Function))
        .unwrap();
    assert_eq!(funcs.len(), 2);
    assert_eq!(funcs[0].idx, Some(0));
    assert_eq!(funcs[1].idx, Some(2));

    // The other sub-tables are untouched.
    assert!(names
        .select(&entity::CustomName::any(NameKind::Global))
        .unwrap()
        .is_empty());

    names
        .update(
            &entity::CustomName::new(NameKind::Function, 2, "fwd"),
            &entity::CustomName {
                kind: NameKind::Function,
                idx: None,
                name: Some("forward".to_string()),
            },
        )
        .unwrap();

    // Names survive a round trip through the binary form.
    let reparsed = Module::from_bytes(&module.to_bytes().unwrap()).unwrap();
    assert_eq!(module, reparsed);
    let mut reparsed = reparsed;
    let names = SectionRewriter::<Names>::new(&mut reparsed);
    let found = names
        .select(&entity::CustomName {
            kind: NameKind::Function,
            idx: Some(2),
            name: None,
        })
        .unwrap();
    assert_eq!(found[0].name.as_deref(), Some("forward"));
}

#[test]
fn codes_expose_expanded_locals() {
    let mut module = module(
        r#"(module
            (func (local i32 i32) (local f64) nop)
        )"#,
    );

    let codes = SectionRewriter::<Codes>::new(&mut module);
    let found = codes.select(&entity::Code::at(0)).unwrap();
    let locals = found[0].locals.clone().unwrap();
    assert_eq!(locals.len(), 3);
    assert_eq!(locals[0].val_type, ValType::I32);
    assert_eq!(locals[2].val_type, ValType::F64);
    assert_eq!(locals[2].idx, 2);
}

#[test]
fn adding_a_function_end_to_end() {
    let mut module = module(BASE);

    let mut functions = SectionRewriter::<Functions>::new(&mut module);
    functions
        .insert(None, &entity::Function::with_type(0))
        .unwrap();
    let mut codes = SectionRewriter::<Codes>::new(&mut module);
    codes
        .insert(
            None,
            &entity::Code::new(
                vec![],
                vec![
                    Instruction::LocalGet(0),
                    Instruction::Call(0),
                    Instruction::LocalGet(0),
                ],
            ),
        )
        .unwrap();
    let mut exports = SectionRewriter::<Exports>::new(&mut module);
    exports
        .insert(None, &entity::Export::new("tap", 3))
        .unwrap();

    let bytes = module.to_bytes().unwrap();
    wasmparser::validate(&bytes).unwrap();
    assert_eq!(Module::from_bytes(&bytes).unwrap(), module);
}
