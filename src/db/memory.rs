// src/db/memory.rs

//! In-memory adapter over sorted maps.
//!
//! Keys order the way their string forms do, which gives the stable total
//! order the executor's resumability contract needs. Used by the test
//! suite and by offline dry runs; never by the CLI against live data.

use crate::db::adapter::{
    DatabaseAdapter, DocStream, UpdateOutcome, ValidationAction, ValidationLevel,
};
use crate::db::apply_mutation;
use crate::error::Result;
use mongodb::bson::Document;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<BTreeMap<String, BTreeMap<String, Document>>>,
    validators: Mutex<BTreeMap<String, (Document, ValidationLevel, ValidationAction)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, collection: &str, key: &str, doc: Document) {
        self.collections
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), doc);
    }

    pub fn get(&self, collection: &str, key: &str) -> Option<Document> {
        self.collections.lock().unwrap().get(collection)?.get(key).cloned()
    }

    /// Every (key, document) pair in key order.
    pub fn dump(&self, collection: &str) -> Vec<(String, Document)> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|m| m.iter().map(|(k, d)| (k.clone(), d.clone())).collect())
            .unwrap_or_default()
    }

    pub fn validator(&self, collection: &str) -> Option<Document> {
        self.validators.lock().unwrap().get(collection).map(|(d, _, _)| d.clone())
    }
}

impl DatabaseAdapter for MemoryStore {
    fn count(&self, collection: &str) -> Result<u64> {
        Ok(self
            .collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|m| m.len() as u64)
            .unwrap_or(0))
    }

    fn sample(&self, collection: &str, n: usize) -> Result<Vec<Document>> {
        Ok(self
            .collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|m| m.values().take(n).cloned().collect())
            .unwrap_or_default())
    }

    fn iterate<'a>(&'a self, collection: &str, after_key: Option<&str>) -> Result<DocStream<'a>> {
        let guard = self.collections.lock().unwrap();
        let snapshot: Vec<(String, Document)> = match guard.get(collection) {
            Some(map) => {
                let lower = match after_key {
                    Some(key) => Bound::Excluded(key.to_string()),
                    None => Bound::Unbounded,
                };
                map.range((lower, Bound::Unbounded))
                    .map(|(k, d)| (k.clone(), d.clone()))
                    .collect()
            }
            None => Vec::new(),
        };
        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }

    fn update_one(
        &self,
        collection: &str,
        key: &str,
        mutation: Document,
    ) -> Result<UpdateOutcome> {
        let mut guard = self.collections.lock().unwrap();
        let Some(doc) = guard.get_mut(collection).and_then(|m| m.get_mut(key)) else {
            return Ok(UpdateOutcome { matched: 0, modified: 0 });
        };
        let before = doc.clone();
        apply_mutation(doc, &mutation);
        let modified = u64::from(*doc != before);
        Ok(UpdateOutcome { matched: 1, modified })
    }

    fn set_validator(
        &self,
        collection: &str,
        validator: Document,
        level: ValidationLevel,
        action: ValidationAction,
    ) -> Result<()> {
        self.validators
            .lock()
            .unwrap()
            .insert(collection.to_string(), (validator, level, action));
        Ok(())
    }
}
