//! Handlers for the sections making up the function index space: types,
//! function-kind imports, function declarations, and code bodies.
//!
//! Callers address functions in the *global* function index space (imported
//! functions first); these handlers translate to section-local positions on
//! the way in and back to global indices on the way out.

use itertools::Itertools;

use super::{exactly_one, field_matches, required, Codes, Functions, Imports, Section, Types};
use crate::entity;
use crate::error::Error;
use crate::fixup::{fix_references, FixOp, IndexSpace};
use crate::instrs::{flatten, fold};
use crate::module::{CodeEntry, ImportEntry, ImportKind, Module};
use crate::types::{FuncType, ValType};

fn scan_types(module: &Module, query: &entity::Type) -> Vec<(usize, entity::Type)> {
    module
        .types
        .iter()
        .enumerate()
        .filter(|(idx, ft)| {
            field_matches(&query.typeidx, &(*idx as u32))
                && field_matches(&query.args, &ft.params)
                && field_matches(&query.rets, &ft.results)
        })
        .map(|(idx, ft)| {
            (
                idx,
                entity::Type {
                    typeidx: Some(idx as u32),
                    args: Some(ft.params.clone()),
                    rets: Some(ft.results.clone()),
                },
            )
        })
        .collect()
}

impl Section for Types {
    type Entity = entity::Type;

    fn select(module: &Module, query: &entity::Type) -> Result<Vec<entity::Type>, Error> {
        Ok(scan_types(module, query).into_iter().map(|(_, e)| e).collect())
    }

    fn insert(
        module: &mut Module,
        locator: Option<&entity::Type>,
        item: &entity::Type,
    ) -> Result<(), Error> {
        let ft = FuncType {
            params: item.args.clone().unwrap_or_default(),
            results: item.rets.clone().unwrap_or_default(),
        };
        match locator {
            None => {
                module.types.push(ft);
                Ok(())
            }
            Some(query) => {
                let (pos, _) = exactly_one(scan_types(module, query))?;
                module.types.insert(pos, ft);
                tracing::debug!(pivot = pos, "inserted type; repairing type references");
                fix_references(module, IndexSpace::Type, pos as u32, FixOp::Insert)
            }
        }
    }

    fn delete(module: &mut Module, locator: &entity::Type) -> Result<(), Error> {
        let (pos, _) = exactly_one(scan_types(module, locator))?;
        // The dangling pre-check runs before anything is removed.
        fix_references(module, IndexSpace::Type, pos as u32, FixOp::Delete)?;
        module.types.remove(pos);
        Ok(())
    }

    fn update(
        module: &mut Module,
        query: &entity::Type,
        new_values: &entity::Type,
    ) -> Result<(), Error> {
        for (pos, _) in scan_types(module, query) {
            if let Some(args) = &new_values.args {
                module.types[pos].params = args.clone();
            }
            if let Some(rets) = &new_values.rets {
                module.types[pos].results = rets.clone();
            }
        }
        Ok(())
    }
}

fn scan_imports(module: &Module, query: &entity::Import) -> Vec<(usize, entity::Import)> {
    module
        .imports
        .iter()
        .enumerate()
        .filter_map(|(idx, imp)| {
            let ImportKind::Func(typeidx) = &imp.kind else {
                return None;
            };
            let hit = field_matches(&query.importidx, &(idx as u32))
                && field_matches(&query.module, &imp.module)
                && field_matches(&query.name, &imp.name)
                && field_matches(&query.typeidx, typeidx);
            hit.then(|| {
                (
                    idx,
                    entity::Import {
                        importidx: Some(idx as u32),
                        module: Some(imp.module.clone()),
                        name: Some(imp.name.clone()),
                        typeidx: Some(*typeidx),
                    },
                )
            })
        })
        .collect()
}

impl Section for Imports {
    type Entity = entity::Import;

    fn select(module: &Module, query: &entity::Import) -> Result<Vec<entity::Import>, Error> {
        Ok(scan_imports(module, query).into_iter().map(|(_, e)| e).collect())
    }

    fn insert(
        module: &mut Module,
        locator: Option<&entity::Import>,
        item: &entity::Import,
    ) -> Result<(), Error> {
        let mod_name = required(&item.module, "module")?;
        let field = required(&item.name, "name")?;
        let typeidx = required(&item.typeidx, "typeidx")?;
        let entry = ImportEntry {
            module: mod_name.clone(),
            name: field.clone(),
            kind: ImportKind::Func(typeidx),
        };
        match locator {
            None => module.push_import(entry),
            Some(query) => {
                let (pos, _) = exactly_one(scan_imports(module, query))?;
                module.insert_import(pos, entry);
            }
        }
        // Even an appended import lands ahead of every local function, so
        // re-resolve which function index it occupies and shift from there.
        let mut pivot = None;
        let mut func_pos = 0u32;
        for imp in &module.imports {
            if matches!(imp.kind, ImportKind::Func(_)) {
                if imp.module == mod_name && imp.name == field {
                    pivot = Some(func_pos);
                }
                func_pos += 1;
            }
        }
        if let Some(pivot) = pivot {
            tracing::debug!(pivot, "inserted function import; repairing function references");
            fix_references(module, IndexSpace::Func, pivot, FixOp::Insert)?;
        }
        Ok(())
    }

    fn delete(module: &mut Module, locator: &entity::Import) -> Result<(), Error> {
        let (pos, _) = exactly_one(scan_imports(module, locator))?;
        // The function index the import occupies, derived before removal.
        let pivot = module.func_index_of_import(pos);
        fix_references(module, IndexSpace::Func, pivot, FixOp::Delete)?;
        module.remove_import(pos);
        Ok(())
    }

    fn update(
        module: &mut Module,
        query: &entity::Import,
        new_values: &entity::Import,
    ) -> Result<(), Error> {
        for (pos, _) in scan_imports(module, query) {
            if let Some(mod_name) = &new_values.module {
                module.imports[pos].module = mod_name.clone();
            }
            if let Some(name) = &new_values.name {
                module.imports[pos].name = name.clone();
            }
            if let Some(typeidx) = new_values.typeidx {
                module.imports[pos].kind = ImportKind::Func(typeidx);
            }
        }
        Ok(())
    }
}

fn scan_functions(module: &Module, query: &entity::Function) -> Vec<(usize, entity::Function)> {
    let imports = module.num_func_imports();
    // A global index below the import prefix can never name a local
    // function, so such a query simply matches nothing.
    let local_query = query.funcidx.map(|g| g as i64 - imports as i64);
    module
        .functions
        .iter()
        .enumerate()
        .filter(|(idx, ty)| {
            local_query.map_or(true, |l| l == *idx as i64) && field_matches(&query.typeidx, *ty)
        })
        .map(|(idx, &ty)| {
            (
                idx,
                entity::Function {
                    funcidx: Some(idx as u32 + imports),
                    typeidx: Some(ty),
                },
            )
        })
        .collect()
}

impl Section for Functions {
    type Entity = entity::Function;

    fn select(module: &Module, query: &entity::Function) -> Result<Vec<entity::Function>, Error> {
        Ok(scan_functions(module, query).into_iter().map(|(_, e)| e).collect())
    }

    fn insert(
        module: &mut Module,
        locator: Option<&entity::Function>,
        item: &entity::Function,
    ) -> Result<(), Error> {
        let typeidx = required(&item.typeidx, "typeidx")?;
        match locator {
            None => {
                module.functions.push(typeidx);
                Ok(())
            }
            Some(query) => {
                let (pos, _) = exactly_one(scan_functions(module, query))?;
                let pivot = pos as u32 + module.num_func_imports();
                module.functions.insert(pos, typeidx);
                tracing::debug!(pivot, "inserted function; repairing function references");
                fix_references(module, IndexSpace::Func, pivot, FixOp::Insert)
            }
        }
    }

    fn delete(module: &mut Module, locator: &entity::Function) -> Result<(), Error> {
        let (pos, _) = exactly_one(scan_functions(module, locator))?;
        let pivot = pos as u32 + module.num_func_imports();
        fix_references(module, IndexSpace::Func, pivot, FixOp::Delete)?;
        module.functions.remove(pos);
        Ok(())
    }

    fn update(
        module: &mut Module,
        query: &entity::Function,
        new_values: &entity::Function,
    ) -> Result<(), Error> {
        if let Some(typeidx) = new_values.typeidx {
            for (pos, _) in scan_functions(module, query) {
                module.functions[pos] = typeidx;
            }
        }
        Ok(())
    }
}

/// Expands run-length encoded local declarations into individually
/// addressable indices `0..n`.
fn expand_locals(entry: &CodeEntry) -> Vec<entity::Local> {
    let mut out = Vec::new();
    let mut idx = 0u32;
    for &(count, val_type) in &entry.locals {
        for _ in 0..count {
            out.push(entity::Local { idx, val_type });
            idx += 1;
        }
    }
    out
}

fn rle_locals(locals: &[entity::Local]) -> Vec<(u32, ValType)> {
    let mut out = Vec::new();
    let grouped = locals.iter().map(|l| l.val_type).group_by(|ty| *ty);
    for (ty, group) in &grouped {
        out.push((group.count() as u32, ty));
    }
    out
}

fn scan_code(module: &Module, query: &entity::Code) -> Result<Vec<(usize, entity::Code)>, Error> {
    let imports = module.num_func_imports();
    let local_query = match query.funcidx {
        Some(g) if g < imports => return Err(Error::ImportedFunction(g)),
        Some(g) => Some((g - imports) as usize),
        None => None,
    };
    Ok(module
        .code
        .iter()
        .enumerate()
        .filter(|(idx, _)| local_query.map_or(true, |l| l == *idx))
        .map(|(idx, entry)| {
            (
                idx,
                entity::Code {
                    funcidx: Some(idx as u32 + imports),
                    locals: Some(expand_locals(entry)),
                    instrs: Some(flatten(&entry.body)),
                },
            )
        })
        .collect())
}

impl Section for Codes {
    type Entity = entity::Code;

    fn select(module: &Module, query: &entity::Code) -> Result<Vec<entity::Code>, Error> {
        Ok(scan_code(module, query)?.into_iter().map(|(_, e)| e).collect())
    }

    fn insert(
        module: &mut Module,
        locator: Option<&entity::Code>,
        item: &entity::Code,
    ) -> Result<(), Error> {
        let entry = CodeEntry {
            locals: rle_locals(item.locals.as_deref().unwrap_or(&[])),
            body: fold(item.instrs.as_deref().unwrap_or(&[]))?,
        };
        match locator {
            None => module.code.push(entry),
            Some(query) => {
                let (pos, _) = exactly_one(scan_code(module, query)?)?;
                module.code.insert(pos, entry);
            }
        }
        Ok(())
    }

    fn delete(module: &mut Module, locator: &entity::Code) -> Result<(), Error> {
        let (pos, _) = exactly_one(scan_code(module, locator)?)?;
        module.code.remove(pos);
        Ok(())
    }

    fn update(
        module: &mut Module,
        query: &entity::Code,
        new_values: &entity::Code,
    ) -> Result<(), Error> {
        // Fold up front so a malformed body cannot leave some matches
        // rewritten and others not.
        let locals = new_values.locals.as_deref().map(rle_locals);
        let body = new_values
            .instrs
            .as_deref()
            .map(fold)
            .transpose()?;
        for (pos, _) in scan_code(module, query)? {
            if let Some(locals) = &locals {
                module.code[pos].locals = locals.clone();
            }
            if let Some(body) = &body {
                module.code[pos].body = body.clone();
            }
        }
        Ok(())
    }
}
