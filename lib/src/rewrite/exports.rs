//! Handlers for exports, the start function, and element segments.

use super::{exactly_one, field_matches, required, Elements, Exports, Section, Starts};
use crate::entity;
use crate::error::Error;
use crate::instrs::Instruction;
use crate::module::{ElementEntry, ElementMode, ExportEntry, ExportKind, Module};

fn scan_exports(module: &Module, query: &entity::Export) -> Vec<(usize, entity::Export)> {
    module
        .exports
        .iter()
        .enumerate()
        .filter(|(idx, exp)| {
            exp.kind == ExportKind::Func
                && field_matches(&query.exportidx, &(*idx as u32))
                && field_matches(&query.name, &exp.name)
                && field_matches(&query.funcidx, &exp.index)
        })
        .map(|(idx, exp)| {
            (
                idx,
                entity::Export {
                    exportidx: Some(idx as u32),
                    name: Some(exp.name.clone()),
                    funcidx: Some(exp.index),
                },
            )
        })
        .collect()
}

impl Section for Exports {
    type Entity = entity::Export;

    fn select(module: &Module, query: &entity::Export) -> Result<Vec<entity::Export>, Error> {
        Ok(scan_exports(module, query).into_iter().map(|(_, e)| e).collect())
    }

    fn insert(
        module: &mut Module,
        locator: Option<&entity::Export>,
        item: &entity::Export,
    ) -> Result<(), Error> {
        let entry = ExportEntry {
            name: required(&item.name, "name")?,
            kind: ExportKind::Func,
            index: required(&item.funcidx, "funcidx")?,
        };
        match locator {
            None => module.exports.push(entry),
            Some(query) => {
                let (pos, _) = exactly_one(scan_exports(module, query))?;
                module.exports.insert(pos, entry);
            }
        }
        Ok(())
    }

    fn delete(module: &mut Module, locator: &entity::Export) -> Result<(), Error> {
        let (pos, _) = exactly_one(scan_exports(module, locator))?;
        module.exports.remove(pos);
        Ok(())
    }

    fn update(
        module: &mut Module,
        query: &entity::Export,
        new_values: &entity::Export,
    ) -> Result<(), Error> {
        for (pos, _) in scan_exports(module, query) {
            if let Some(name) = &new_values.name {
                module.exports[pos].name = name.clone();
            }
            if let Some(funcidx) = new_values.funcidx {
                module.exports[pos].index = funcidx;
            }
        }
        Ok(())
    }
}

fn scan_start(module: &Module, query: &entity::Start) -> Vec<((), entity::Start)> {
    match module.start {
        Some(funcidx) if field_matches(&query.funcidx, &funcidx) => vec![(
            (),
            entity::Start {
                funcidx: Some(funcidx),
            },
        )],
        _ => Vec::new(),
    }
}

impl Section for Starts {
    type Entity = entity::Start;

    fn select(module: &Module, query: &entity::Start) -> Result<Vec<entity::Start>, Error> {
        Ok(scan_start(module, query).into_iter().map(|(_, e)| e).collect())
    }

    // The start section holds at most one entry, so insertion never takes a
    // position and fails outright when a start function is already declared.
    fn insert(
        module: &mut Module,
        _locator: Option<&entity::Start>,
        item: &entity::Start,
    ) -> Result<(), Error> {
        if module.start.is_some() {
            return Err(Error::StartAlreadySet);
        }
        module.start = Some(required(&item.funcidx, "funcidx")?);
        Ok(())
    }

    fn delete(module: &mut Module, locator: &entity::Start) -> Result<(), Error> {
        exactly_one(scan_start(module, locator))?;
        module.start = None;
        Ok(())
    }

    fn update(
        module: &mut Module,
        query: &entity::Start,
        new_values: &entity::Start,
    ) -> Result<(), Error> {
        if !scan_start(module, query).is_empty() {
            if let Some(funcidx) = new_values.funcidx {
                module.start = Some(funcidx);
            }
        }
        Ok(())
    }
}

/// An active segment whose offset is a single `i32.const` reports that
/// constant; other segments report no offset.
fn segment_offset(entry: &ElementEntry) -> Option<i32> {
    match &entry.mode {
        ElementMode::Active { offset, .. } => match offset.as_slice() {
            [Instruction::I32Const(v)] => Some(*v),
            _ => None,
        },
        _ => None,
    }
}

fn segment_table(entry: &ElementEntry) -> Option<u32> {
    match &entry.mode {
        ElementMode::Active { table_index, .. } => Some(*table_index),
        _ => None,
    }
}

fn scan_elements(module: &Module, query: &entity::Element) -> Vec<(usize, entity::Element)> {
    module
        .elements
        .iter()
        .enumerate()
        .filter(|(idx, entry)| {
            field_matches(&query.elemidx, &(*idx as u32))
                && (query.tableidx.is_none() || query.tableidx == segment_table(entry))
                && (query.offset.is_none() || query.offset == segment_offset(entry))
                && field_matches(&query.funcidx_list, &entry.func_indices)
        })
        .map(|(idx, entry)| {
            (
                idx,
                entity::Element {
                    elemidx: Some(idx as u32),
                    tableidx: segment_table(entry),
                    offset: segment_offset(entry),
                    funcidx_list: Some(entry.func_indices.clone()),
                },
            )
        })
        .collect()
}

impl Section for Elements {
    type Entity = entity::Element;

    fn select(module: &Module, query: &entity::Element) -> Result<Vec<entity::Element>, Error> {
        Ok(scan_elements(module, query).into_iter().map(|(_, e)| e).collect())
    }

    fn insert(
        module: &mut Module,
        locator: Option<&entity::Element>,
        item: &entity::Element,
    ) -> Result<(), Error> {
        let offset = required(&item.offset, "offset")?;
        let entry = ElementEntry {
            mode: ElementMode::Active {
                table_index: item.tableidx.unwrap_or(0),
                offset: vec![Instruction::I32Const(offset)],
            },
            func_indices: item.funcidx_list.clone().unwrap_or_default(),
        };
        match locator {
            None => module.elements.push(entry),
            Some(query) => {
                let (pos, _) = exactly_one(scan_elements(module, query))?;
                module.elements.insert(pos, entry);
            }
        }
        Ok(())
    }

    fn delete(module: &mut Module, locator: &entity::Element) -> Result<(), Error> {
        let (pos, _) = exactly_one(scan_elements(module, locator))?;
        module.elements.remove(pos);
        Ok(())
    }

    fn update(
        module: &mut Module,
        query: &entity::Element,
        new_values: &entity::Element,
    ) -> Result<(), Error> {
        for (pos, _) in scan_elements(module, query) {
            let entry = &mut module.elements[pos];
            if new_values.tableidx.is_some() || new_values.offset.is_some() {
                let table_index = new_values
                    .tableidx
                    .or_else(|| segment_table(entry))
                    .unwrap_or(0);
                let offset = new_values.offset.or_else(|| segment_offset(entry)).unwrap_or(0);
                entry.mode = ElementMode::Active {
                    table_index,
                    offset: vec![Instruction::I32Const(offset)],
                };
            }
            if let Some(funcs) = &new_values.funcidx_list {
                entry.func_indices = funcs.clone();
            }
        }
        Ok(())
    }
}
