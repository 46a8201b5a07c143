//! Index repair.
//!
//! Inserting or deleting an entity shifts every later index in that entity's
//! index space, invalidating numeric references stored all over the module.
//! The whole repair is one rule: given the pivot `p` where the edit
//! happened, an insert turns every stored reference `r >= p` into `r + 1`; a
//! delete turns every `r > p` into `r - 1`, and a reference `r == p` is a
//! use of the entity being deleted and aborts the operation.
//!
//! The rule is applied through a single site enumeration per index space,
//! rather than once per referencing structure. Deletes run a read-only
//! dangling pass over all sites before any site is written, so a failed
//! delete leaves the module untouched.

use std::fmt;

use crate::error::Error;
use crate::instrs::{for_each_instr_mut, Instruction};
use crate::module::{DataMode, ElementMode, ExportKind, ImportKind, Module};

/// Whether references are being repaired around an insertion or a deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixOp {
    Insert,
    Delete,
}

/// A numbering domain shared by several sections' entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSpace {
    /// Type indices: referenced by local function declarations and
    /// function-kind imports.
    Type,
    /// Function indices: imported functions first, then locally defined
    /// ones. Referenced by call instructions, element segments,
    /// function-kind exports, and the start section.
    Func,
    /// Global indices: imported globals first, then defined ones.
    /// Referenced by global-access instructions and global-kind exports.
    Global,
}

impl fmt::Display for IndexSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IndexSpace::Type => "type",
            IndexSpace::Func => "function",
            IndexSpace::Global => "global",
        })
    }
}

fn shift(r: u32, pivot: u32, op: FixOp) -> u32 {
    match op {
        FixOp::Insert if r >= pivot => r + 1,
        FixOp::Delete if r > pivot => r - 1,
        _ => r,
    }
}

/// Repairs every reference into `space` around an edit at `pivot`.
///
/// Pivots are expressed in the full index space: function pivots count
/// imported functions, global pivots count imported globals.
pub(crate) fn fix_references(
    module: &mut Module,
    space: IndexSpace,
    pivot: u32,
    op: FixOp,
) -> Result<(), Error> {
    if op == FixOp::Delete {
        let mut dangling = false;
        for_each_ref(module, space, &mut |r| dangling |= *r == pivot);
        if dangling {
            return Err(Error::DanglingReference {
                space,
                index: pivot,
            });
        }
    }
    for_each_ref(module, space, &mut |r| *r = shift(*r, pivot, op));
    Ok(())
}

/// Visits every stored reference into `space`, in module order.
fn for_each_ref(module: &mut Module, space: IndexSpace, f: &mut dyn FnMut(&mut u32)) {
    match space {
        IndexSpace::Type => {
            for type_idx in &mut module.functions {
                f(type_idx);
            }
            for import in &mut module.imports {
                if let ImportKind::Func(type_idx) = &mut import.kind {
                    f(type_idx);
                }
            }
        }
        IndexSpace::Func => {
            let mut visit = |instr: &mut Instruction| match instr {
                Instruction::Call(target) | Instruction::RefFunc(target) => f(target),
                _ => {}
            };
            for code in &mut module.code {
                for_each_instr_mut(&mut code.body, &mut visit);
            }
            // `ref.func` is also legal in constant expressions.
            for global in &mut module.globals {
                for_each_instr_mut(&mut global.init, &mut visit);
            }
            for elem in &mut module.elements {
                for func_idx in &mut elem.func_indices {
                    f(func_idx);
                }
            }
            for export in &mut module.exports {
                if export.kind == ExportKind::Func {
                    f(&mut export.index);
                }
            }
            if let Some(start) = &mut module.start {
                f(start);
            }
        }
        IndexSpace::Global => {
            let mut visit = |instr: &mut Instruction| match instr {
                Instruction::GlobalGet(target) | Instruction::GlobalSet(target) => f(target),
                _ => {}
            };
            for code in &mut module.code {
                for_each_instr_mut(&mut code.body, &mut visit);
            }
            for global in &mut module.globals {
                for_each_instr_mut(&mut global.init, &mut visit);
            }
            for elem in &mut module.elements {
                if let ElementMode::Active { offset, .. } = &mut elem.mode {
                    for_each_instr_mut(offset, &mut visit);
                }
            }
            for data in &mut module.datas {
                if let DataMode::Active { offset, .. } = &mut data.mode {
                    for_each_instr_mut(offset, &mut visit);
                }
            }
            for export in &mut module.exports {
                if export.kind == ExportKind::Global {
                    f(&mut export.index);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrs::BlockType;
    use crate::module::{CodeEntry, ElementEntry, ElementMode, ExportEntry};

    fn module_with_func_refs() -> Module {
        let mut m = Module::default();
        m.code.push(CodeEntry {
            locals: vec![],
            body: vec![
                Instruction::Call(0),
                Instruction::Block {
                    ty: BlockType::Empty,
                    body: vec![Instruction::Call(2)],
                },
            ],
        });
        m.elements.push(ElementEntry {
            mode: ElementMode::Active {
                table_index: 0,
                offset: vec![Instruction::I32Const(0)],
            },
            func_indices: vec![0, 1, 2],
        });
        m.exports.push(ExportEntry {
            name: "run".to_owned(),
            kind: ExportKind::Func,
            index: 2,
        });
        m.start = Some(1);
        m
    }

    #[test]
    fn insert_shifts_references_at_and_above_the_pivot() {
        let mut m = module_with_func_refs();
        fix_references(&mut m, IndexSpace::Func, 1, FixOp::Insert).unwrap();

        assert_eq!(m.code[0].body[0], Instruction::Call(0));
        assert_eq!(
            m.code[0].body[1],
            Instruction::Block {
                ty: BlockType::Empty,
                body: vec![Instruction::Call(3)],
            }
        );
        assert_eq!(m.elements[0].func_indices, vec![0, 2, 3]);
        assert_eq!(m.exports[0].index, 3);
        assert_eq!(m.start, Some(2));
    }

    #[test]
    fn delete_shifts_references_above_the_pivot_only() {
        let mut m = module_with_func_refs();
        // Nothing references index 3; a delete there decrements nothing.
        fix_references(&mut m, IndexSpace::Func, 3, FixOp::Delete).unwrap();
        assert_eq!(m, module_with_func_refs());
    }

    #[test]
    fn delete_of_a_referenced_index_is_rejected_without_mutation() {
        let mut m = module_with_func_refs();
        let before = m.clone();
        let err = fix_references(&mut m, IndexSpace::Func, 2, FixOp::Delete).unwrap_err();
        assert!(matches!(
            err,
            Error::DanglingReference {
                space: IndexSpace::Func,
                index: 2,
            }
        ));
        assert_eq!(m, before);
    }

    #[test]
    fn type_space_covers_declarations_and_imports() {
        use crate::module::{ImportEntry, ImportKind};

        let mut m = Module::default();
        m.functions = vec![0, 1];
        m.push_import(ImportEntry {
            module: "env".to_owned(),
            name: "log".to_owned(),
            kind: ImportKind::Func(1),
        });

        fix_references(&mut m, IndexSpace::Type, 1, FixOp::Insert).unwrap();
        assert_eq!(m.functions, vec![0, 2]);
        assert!(matches!(m.imports[0].kind, ImportKind::Func(2)));

        let err = fix_references(&mut m, IndexSpace::Type, 0, FixOp::Delete).unwrap_err();
        assert!(matches!(err, Error::DanglingReference { .. }));
    }
}
