//! Persistent document table with per-owner secondary indexes.

mod document;
mod table;

pub use document::{Document, DocumentPatch, NewDocument};
pub use table::DocumentTable;
