//! Handler for the global section. Indices are translated between the
//! global index space (imported globals first) and section-local positions
//! the same way the function handlers do.

use super::{exactly_one, field_matches, required, Globals, Section};
use crate::entity;
use crate::error::Error;
use crate::fixup::{fix_references, FixOp, IndexSpace};
use crate::module::{GlobalEntry, Module};
use crate::types::{ConstValue, GlobalType};

fn scan_globals(module: &Module, query: &entity::Global) -> Vec<(usize, entity::Global)> {
    let imports = module.num_global_imports();
    let local_query = query.globalidx.map(|g| g as i64 - imports as i64);
    module
        .globals
        .iter()
        .enumerate()
        .filter(|(idx, entry)| {
            let val = const_value_of(entry);
            local_query.map_or(true, |l| l == *idx as i64)
                && field_matches(&query.valtype, &entry.ty.val_type)
                && field_matches(&query.mutable, &entry.ty.mutable)
                && (query.val.is_none() || query.val == val)
        })
        .map(|(idx, entry)| {
            (
                idx,
                entity::Global {
                    globalidx: Some(idx as u32 + imports),
                    valtype: Some(entry.ty.val_type),
                    mutable: Some(entry.ty.mutable),
                    val: const_value_of(entry),
                },
            )
        })
        .collect()
}

/// A global whose initializer is anything other than a single constant
/// instruction has no scalar value to report.
fn const_value_of(entry: &GlobalEntry) -> Option<ConstValue> {
    match entry.init.as_slice() {
        [instr] => ConstValue::from_instruction(instr),
        _ => None,
    }
}

fn build_entry(item: &entity::Global) -> Result<GlobalEntry, Error> {
    let val_type = required(&item.valtype, "valtype")?;
    let val = required(&item.val, "val")?;
    if val.val_type() != val_type {
        return Err(Error::InitTypeMismatch {
            declared: val_type,
            actual: val.val_type(),
        });
    }
    Ok(GlobalEntry {
        ty: GlobalType {
            val_type,
            mutable: item.mutable.unwrap_or(false),
        },
        init: vec![val.to_instruction()],
    })
}

impl Section for Globals {
    type Entity = entity::Global;

    fn select(module: &Module, query: &entity::Global) -> Result<Vec<entity::Global>, Error> {
        Ok(scan_globals(module, query).into_iter().map(|(_, e)| e).collect())
    }

    fn insert(
        module: &mut Module,
        locator: Option<&entity::Global>,
        item: &entity::Global,
    ) -> Result<(), Error> {
        let entry = build_entry(item)?;
        match locator {
            None => {
                module.globals.push(entry);
                Ok(())
            }
            Some(query) => {
                let (pos, _) = exactly_one(scan_globals(module, query))?;
                let pivot = pos as u32 + module.num_global_imports();
                module.globals.insert(pos, entry);
                tracing::debug!(pivot, "inserted global; repairing global references");
                fix_references(module, IndexSpace::Global, pivot, FixOp::Insert)
            }
        }
    }

    fn delete(module: &mut Module, locator: &entity::Global) -> Result<(), Error> {
        let (pos, _) = exactly_one(scan_globals(module, locator))?;
        let pivot = pos as u32 + module.num_global_imports();
        fix_references(module, IndexSpace::Global, pivot, FixOp::Delete)?;
        module.globals.remove(pos);
        Ok(())
    }

    fn update(
        module: &mut Module,
        query: &entity::Global,
        new_values: &entity::Global,
    ) -> Result<(), Error> {
        let matches = scan_globals(module, query);
        // Validate every match before touching any of them.
        if let Some(val) = new_values.val {
            for (pos, _) in &matches {
                let declared = new_values
                    .valtype
                    .unwrap_or(module.globals[*pos].ty.val_type);
                if val.val_type() != declared {
                    return Err(Error::InitTypeMismatch {
                        declared,
                        actual: val.val_type(),
                    });
                }
            }
        }
        for (pos, _) in matches {
            let entry = &mut module.globals[pos];
            if let Some(val_type) = new_values.valtype {
                entry.ty.val_type = val_type;
            }
            if let Some(mutable) = new_values.mutable {
                entry.ty.mutable = mutable;
            }
            if let Some(val) = new_values.val {
                entry.init = vec![val.to_instruction()];
            }
        }
        Ok(())
    }
}
