//! Handlers for tables, memories, data segments, and the name custom
//! section. Tables and memories are read-only views: adding or removing
//! them would invalidate instruction immediates this crate keeps opaque.

use super::{exactly_one, field_matches, required, Datas, Memories, Names, Section, Tables};
use crate::entity;
use crate::error::Error;
use crate::instrs::Instruction;
use crate::module::{DataEntry, DataMode, Module, NameAssoc, NameSection};
use crate::types::NameKind;

fn scan_tables(module: &Module, query: &entity::Table) -> Vec<(usize, entity::Table)> {
    module
        .tables
        .iter()
        .enumerate()
        .filter(|(idx, entry)| {
            field_matches(&query.tableidx, &(*idx as u32))
                && field_matches(&query.min, &entry.limits.min)
                && (query.max.is_none() || query.max == entry.limits.max)
        })
        .map(|(idx, entry)| {
            (
                idx,
                entity::Table {
                    tableidx: Some(idx as u32),
                    min: Some(entry.limits.min),
                    max: entry.limits.max,
                },
            )
        })
        .collect()
}

impl Section for Tables {
    type Entity = entity::Table;

    fn select(module: &Module, query: &entity::Table) -> Result<Vec<entity::Table>, Error> {
        Ok(scan_tables(module, query).into_iter().map(|(_, e)| e).collect())
    }

    fn insert(
        _module: &mut Module,
        _locator: Option<&entity::Table>,
        _item: &entity::Table,
    ) -> Result<(), Error> {
        Err(Error::UnsupportedEdit("table"))
    }

    fn delete(_module: &mut Module, _locator: &entity::Table) -> Result<(), Error> {
        Err(Error::UnsupportedEdit("table"))
    }

    fn update(
        module: &mut Module,
        query: &entity::Table,
        new_values: &entity::Table,
    ) -> Result<(), Error> {
        for (pos, _) in scan_tables(module, query) {
            let limits = &mut module.tables[pos].limits;
            if let Some(min) = new_values.min {
                limits.min = min;
            }
            if let Some(max) = new_values.max {
                limits.max = Some(max);
            }
        }
        Ok(())
    }
}

fn scan_memories(module: &Module, query: &entity::Memory) -> Vec<(usize, entity::Memory)> {
    module
        .memories
        .iter()
        .enumerate()
        .filter(|(idx, entry)| {
            field_matches(&query.memidx, &(*idx as u32))
                && field_matches(&query.min, &entry.limits.min)
                && (query.max.is_none() || query.max == entry.limits.max)
        })
        .map(|(idx, entry)| {
            (
                idx,
                entity::Memory {
                    memidx: Some(idx as u32),
                    min: Some(entry.limits.min),
                    max: entry.limits.max,
                },
            )
        })
        .collect()
}

impl Section for Memories {
    type Entity = entity::Memory;

    fn select(module: &Module, query: &entity::Memory) -> Result<Vec<entity::Memory>, Error> {
        Ok(scan_memories(module, query).into_iter().map(|(_, e)| e).collect())
    }

    fn insert(
        _module: &mut Module,
        _locator: Option<&entity::Memory>,
        _item: &entity::Memory,
    ) -> Result<(), Error> {
        Err(Error::UnsupportedEdit("memory"))
    }

    fn delete(_module: &mut Module, _locator: &entity::Memory) -> Result<(), Error> {
        Err(Error::UnsupportedEdit("memory"))
    }

    fn update(
        module: &mut Module,
        query: &entity::Memory,
        new_values: &entity::Memory,
    ) -> Result<(), Error> {
        for (pos, _) in scan_memories(module, query) {
            let limits = &mut module.memories[pos].limits;
            if let Some(min) = new_values.min {
                limits.min = min;
            }
            if let Some(max) = new_values.max {
                limits.max = Some(max);
            }
        }
        Ok(())
    }
}

fn segment_offset(entry: &DataEntry) -> Option<i32> {
    match &entry.mode {
        DataMode::Active { offset, .. } => match offset.as_slice() {
            [Instruction::I32Const(v)] => Some(*v),
            _ => None,
        },
        DataMode::Passive => None,
    }
}

fn scan_datas(module: &Module, query: &entity::Data) -> Vec<(usize, entity::Data)> {
    module
        .datas
        .iter()
        .enumerate()
        .filter(|(idx, entry)| {
            field_matches(&query.dataidx, &(*idx as u32))
                && (query.offset.is_none() || query.offset == segment_offset(entry))
                && field_matches(&query.init, &entry.init)
        })
        .map(|(idx, entry)| {
            (
                idx,
                entity::Data {
                    dataidx: Some(idx as u32),
                    offset: segment_offset(entry),
                    init: Some(entry.init.clone()),
                },
            )
        })
        .collect()
}

impl Section for Datas {
    type Entity = entity::Data;

    fn select(module: &Module, query: &entity::Data) -> Result<Vec<entity::Data>, Error> {
        Ok(scan_datas(module, query).into_iter().map(|(_, e)| e).collect())
    }

    fn insert(
        module: &mut Module,
        locator: Option<&entity::Data>,
        item: &entity::Data,
    ) -> Result<(), Error> {
        let offset = required(&item.offset, "offset")?;
        let entry = DataEntry {
            mode: DataMode::Active {
                memory_index: 0,
                offset: vec![Instruction::I32Const(offset)],
            },
            init: item.init.clone().unwrap_or_default(),
        };
        match locator {
            None => module.datas.push(entry),
            Some(query) => {
                let (pos, _) = exactly_one(scan_datas(module, query))?;
                module.datas.insert(pos, entry);
            }
        }
        Ok(())
    }

    fn delete(module: &mut Module, locator: &entity::Data) -> Result<(), Error> {
        let (pos, _) = exactly_one(scan_datas(module, locator))?;
        module.datas.remove(pos);
        Ok(())
    }

    fn update(
        module: &mut Module,
        query: &entity::Data,
        new_values: &entity::Data,
    ) -> Result<(), Error> {
        for (pos, _) in scan_datas(module, query) {
            let entry = &mut module.datas[pos];
            if let Some(offset) = new_values.offset {
                entry.mode = DataMode::Active {
                    memory_index: 0,
                    offset: vec![Instruction::I32Const(offset)],
                };
            }
            if let Some(init) = &new_values.init {
                entry.init = init.clone();
            }
        }
        Ok(())
    }
}

fn sub_table(names: &NameSection, kind: NameKind) -> &Vec<NameAssoc> {
    match kind {
        NameKind::Function => &names.func_names,
        NameKind::Global => &names.global_names,
        NameKind::Data => &names.data_names,
    }
}

fn sub_table_mut(names: &mut NameSection, kind: NameKind) -> &mut Vec<NameAssoc> {
    match kind {
        NameKind::Function => &mut names.func_names,
        NameKind::Global => &mut names.global_names,
        NameKind::Data => &mut names.data_names,
    }
}

fn scan_names(module: &Module, query: &entity::CustomName) -> Vec<(usize, entity::CustomName)> {
    let Some(names) = &module.names else {
        return Vec::new();
    };
    sub_table(names, query.kind)
        .iter()
        .enumerate()
        .filter(|(_, assoc)| {
            field_matches(&query.idx, &assoc.index) && field_matches(&query.name, &assoc.name)
        })
        .map(|(pos, assoc)| {
            (
                pos,
                entity::CustomName {
                    kind: query.kind,
                    idx: Some(assoc.index),
                    name: Some(assoc.name.clone()),
                },
            )
        })
        .collect()
}

impl Section for Names {
    type Entity = entity::CustomName;

    fn select(module: &Module, query: &entity::CustomName) -> Result<Vec<entity::CustomName>, Error> {
        Ok(scan_names(module, query).into_iter().map(|(_, e)| e).collect())
    }

    // Each sub-table is an index-sorted association list, so the item's
    // index determines its position and no locator is consulted.
    fn insert(
        module: &mut Module,
        _locator: Option<&entity::CustomName>,
        item: &entity::CustomName,
    ) -> Result<(), Error> {
        let index = required(&item.idx, "idx")?;
        let name = required(&item.name, "name")?;
        let table = sub_table_mut(module.names_mut(), item.kind);
        if table.iter().any(|assoc| assoc.index == index) {
            return Err(Error::DuplicateName(index));
        }
        let pos = table.partition_point(|assoc| assoc.index < index);
        table.insert(pos, NameAssoc { index, name });
        Ok(())
    }

    fn delete(module: &mut Module, locator: &entity::CustomName) -> Result<(), Error> {
        let (pos, _) = exactly_one(scan_names(module, locator))?;
        if let Some(names) = &mut module.names {
            sub_table_mut(names, locator.kind).remove(pos);
        }
        Ok(())
    }

    fn update(
        module: &mut Module,
        query: &entity::CustomName,
        new_values: &entity::CustomName,
    ) -> Result<(), Error> {
        let Some(name) = &new_values.name else {
            return Ok(());
        };
        let matches = scan_names(module, query);
        if let Some(names) = &mut module.names {
            let table = sub_table_mut(names, query.kind);
            for (pos, _) in matches {
                table[pos].name = name.clone();
            }
        }
        Ok(())
    }
}
