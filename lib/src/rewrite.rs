//! The section query/edit engine.
//!
//! A [`SectionRewriter`] is a session handle bound to exactly one section
//! kind; the binding is a type parameter, so constructing a session over
//! zero or several sections, or handing it an entity of the wrong kind,
//! does not compile. All four operations are single atomic steps over the
//! module store: a call that fails leaves the store exactly as it was.

mod data;
mod exports;
mod functions;
mod globals;

use std::marker::PhantomData;

use crate::error::Error;
use crate::module::Module;

/// The capability interface one section kind implements.
pub trait Section {
    /// The entity descriptor for this section.
    type Entity: Clone;

    /// Returns a copy of every stored entity whose set query fields match.
    fn select(module: &Module, query: &Self::Entity) -> Result<Vec<Self::Entity>, Error>;

    /// Inserts `item`: appended when `locator` is `None`, otherwise placed
    /// immediately before the single entity the locator resolves to.
    fn insert(
        module: &mut Module,
        locator: Option<&Self::Entity>,
        item: &Self::Entity,
    ) -> Result<(), Error>;

    /// Removes the single entity the locator resolves to.
    fn delete(module: &mut Module, locator: &Self::Entity) -> Result<(), Error>;

    /// Overwrites the fields set in `new_values` on every entity matching
    /// `query`.
    fn update(
        module: &mut Module,
        query: &Self::Entity,
        new_values: &Self::Entity,
    ) -> Result<(), Error>;
}

/// The type section.
pub struct Types;
/// Function-kind entries of the import section.
pub struct Imports;
/// The function section (locally defined functions).
pub struct Functions;
/// The table section (query/update only).
pub struct Tables;
/// The memory section (query/update only).
pub struct Memories;
/// The global section (defined globals).
pub struct Globals;
/// Function-kind entries of the export section.
pub struct Exports;
/// The start section singleton.
pub struct Starts;
/// Active element segments.
pub struct Elements;
/// The code section.
pub struct Codes;
/// The data section.
pub struct Datas;
/// The three sub-tables of the "name" custom section.
pub struct Names;

/// A rewriting session scoped to one section of one module.
pub struct SectionRewriter<'m, S: Section> {
    module: &'m mut Module,
    _section: PhantomData<S>,
}

impl<'m, S: Section> SectionRewriter<'m, S> {
    pub fn new(module: &'m mut Module) -> Self {
        SectionRewriter {
            module,
            _section: PhantomData,
        }
    }

    pub fn select(&self, query: &S::Entity) -> Result<Vec<S::Entity>, Error> {
        S::select(self.module, query)
    }

    pub fn insert(&mut self, locator: Option<&S::Entity>, item: &S::Entity) -> Result<(), Error> {
        S::insert(self.module, locator, item)
    }

    pub fn delete(&mut self, locator: &S::Entity) -> Result<(), Error> {
        S::delete(self.module, locator)
    }

    pub fn update(&mut self, query: &S::Entity, new_values: &S::Entity) -> Result<(), Error> {
        S::update(self.module, query, new_values)
    }
}

/// `insert`/`delete` locators must resolve to exactly one entity.
fn exactly_one<T>(mut matches: Vec<T>) -> Result<T, Error> {
    if matches.len() != 1 {
        return Err(Error::AmbiguousLocator {
            matched: matches.len(),
        });
    }
    Ok(matches.remove(0))
}

/// An unset query field matches anything.
fn field_matches<T: PartialEq>(query: &Option<T>, stored: &T) -> bool {
    query.as_ref().map_or(true, |q| q == stored)
}

/// `insert`/`update` fields the operation cannot do without.
fn required<T: Clone>(field: &Option<T>, name: &'static str) -> Result<T, Error> {
    field.clone().ok_or(Error::FieldRequired(name))
}
