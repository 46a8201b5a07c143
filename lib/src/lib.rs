//! Structured rewriting of WebAssembly binary modules.
//!
//! A binary is parsed into a [`Module`], edited section by section through
//! [`SectionRewriter`] handles, and re-encoded. Index references between
//! sections are repaired automatically when an edit shifts an index space.

// When building the project in release mode:
//   (1): Promote warnings into errors.
//   (2): Deny broken documentation links.
//   (3): Deny invalid codeblock attributes in documentation.
//   (4): Promote warnings in examples into errors, except for unused variables.
#![cfg_attr(not(debug_assertions), deny(warnings))]
#![cfg_attr(not(debug_assertions), deny(clippy::all))]
#![cfg_attr(not(debug_assertions), deny(broken_intra_doc_links))]
#![cfg_attr(not(debug_assertions), deny(invalid_codeblock_attributes))]
#![cfg_attr(not(debug_assertions), doc(test(attr(deny(warnings)))))]
#![cfg_attr(not(debug_assertions), doc(test(attr(allow(dead_code)))))]
#![cfg_attr(not(debug_assertions), doc(test(attr(allow(unused_variables)))))]

pub mod entity;
pub mod error;
pub mod fixup;
pub mod instrs;
pub mod module;
pub mod rewrite;
pub mod types;

mod emit;
mod parse;

pub use {
    error::Error,
    instrs::{flatten, fold, locate, Instruction, InstrMatch, Selector},
    module::Module,
    rewrite::{Section, SectionRewriter},
};
