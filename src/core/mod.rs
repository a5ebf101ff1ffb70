//! Document model internals
//!
//! Leaves first: sources and targets, the page cache, the delta log, then
//! the document, its operations and history, and search on top.

pub mod config;
pub mod delta;
pub mod document;
pub mod error;
pub mod history;
pub mod operation;
pub mod page;
pub mod page_store;
pub mod search;
pub mod source;
pub mod target;

#[cfg(test)]
mod integration_tests;

pub use document::{Document, DocumentReader, DocumentState};
