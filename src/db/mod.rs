// src/db/mod.rs

//! Database layer for Shale.
//!
//! The [`DatabaseAdapter`] trait is the narrow seam between the pure core
//! and the document store: listing, sampling, key-ordered iteration,
//! per-document updates, and validator application. The MongoDB
//! implementation lives in [`mongo`]; the in-memory implementation in
//! [`memory`] backs tests and offline dry runs.
//!
//! This module also carries the dotted-path document helpers shared by the
//! executor (reading values) and the memory adapter (applying mutations).

pub mod adapter;
pub mod memory;
pub mod mongo;

pub use adapter::{DatabaseAdapter, DocStream, UpdateOutcome, ValidationAction, ValidationLevel};
pub use memory::MemoryStore;
pub use mongo::MongoStore;

use crate::error::Error;
use mongodb::bson::{Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};

/// True when an adapter error is scoped to a single document write, so the
/// executor can count it and continue the batch instead of aborting.
pub fn is_per_document_error(error: &Error) -> bool {
    match error {
        Error::Database(e) => {
            matches!(e.kind.as_ref(), ErrorKind::Write(WriteFailure::WriteError(_)))
        }
        _ => false,
    }
}

/// Read the value at a dotted path, descending through nested documents.
pub fn get_path<'a>(doc: &'a Document, segments: &[String]) -> Option<&'a Bson> {
    let (first, rest) = segments.split_first()?;
    let value = doc.get(first)?;
    if rest.is_empty() {
        return Some(value);
    }
    match value {
        Bson::Document(inner) => get_path(inner, rest),
        _ => None,
    }
}

/// Write a value at a dotted path, creating intermediate documents the way
/// `$set` does. Returns false when an intermediate value exists and is not
/// a document.
pub fn set_path(doc: &mut Document, segments: &[String], value: Bson) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        return false;
    };
    if rest.is_empty() {
        doc.insert(first.clone(), value);
        return true;
    }
    if !doc.contains_key(first) {
        doc.insert(first.clone(), Document::new());
    }
    match doc.get_mut(first) {
        Some(Bson::Document(inner)) => set_path(inner, rest, value),
        _ => false,
    }
}

/// Remove the value at a dotted path. Missing paths are a no-op.
pub fn unset_path(doc: &mut Document, segments: &[String]) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        doc.remove(first);
        return;
    }
    if let Some(Bson::Document(inner)) = doc.get_mut(first) {
        unset_path(inner, rest);
    }
}

/// Apply a `$set`/`$unset` mutation document in place.
pub fn apply_mutation(target: &mut Document, mutation: &Document) {
    if let Ok(set) = mutation.get_document("$set") {
        for (path, value) in set {
            let segments: Vec<String> = path.split('.').map(String::from).collect();
            set_path(target, &segments, value.clone());
        }
    }
    if let Ok(unset) = mutation.get_document("$unset") {
        for (path, _) in unset {
            let segments: Vec<String> = path.split('.').map(String::from).collect();
            unset_path(target, &segments);
        }
    }
}
