// src/infer.rs

//! Sampling-based schema inference.
//!
//! Walks a sample of documents, accumulating per-path observation counts,
//! null counts, and type-tag histograms, then normalises the accumulated
//! state into a schema tree. Rare type variants are never dropped; the
//! anomaly report surfaces them instead.

use crate::db::DatabaseAdapter;
use crate::error::Result;
use crate::schema::types::{BsonType, FieldPath, TypeSet};
use crate::schema::{Field, Node, Schema};
use mongodb::bson::{Bson, Document};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Default number of documents drawn when the caller does not override it.
pub const DEFAULT_SAMPLE_SIZE: usize = 1000;

/// Presence below this fraction is reported as an anomaly.
pub const LOW_PRESENCE: f64 = 0.9;

/// Null rate above this fraction is reported as an anomaly.
pub const HIGH_NULL_RATE: f64 = 0.1;

/// Accumulated state for one document level.
#[derive(Debug, Default)]
struct DocAcc {
    docs: u64,
    fields: BTreeMap<String, ValueAcc>,
}

/// Accumulated state for one field path (or for array items).
#[derive(Debug, Default)]
struct ValueAcc {
    observed: u64,
    nulls: u64,
    tags: BTreeMap<BsonType, u64>,
    object: Option<Box<DocAcc>>,
    items: Option<Box<ValueAcc>>,
}

impl DocAcc {
    fn observe(&mut self, doc: &Document) {
        self.docs += 1;
        for (name, value) in doc {
            self.fields.entry(name.clone()).or_default().observe(value);
        }
    }

    fn into_fields(self, parent_total: u64) -> Vec<Field> {
        self.fields
            .into_iter()
            .map(|(name, acc)| Field::new(name, acc.into_node(parent_total)))
            .collect()
    }
}

impl ValueAcc {
    fn observe(&mut self, value: &Bson) {
        self.observed += 1;
        let tag = BsonType::of(value);
        *self.tags.entry(tag).or_insert(0) += 1;
        match value {
            Bson::Null | Bson::Undefined => self.nulls += 1,
            Bson::Document(doc) => {
                self.object.get_or_insert_with(Default::default).observe(doc);
            }
            Bson::Array(elements) => {
                // The items accumulator exists even for empty arrays, so the
                // invariant that array nodes carry an items child holds.
                let items = self.items.get_or_insert_with(Default::default);
                for element in elements {
                    items.observe(element);
                }
            }
            _ => {}
        }
    }

    fn into_node(self, parent_total: u64) -> Node {
        let presence = if parent_total == 0 {
            0.0
        } else {
            (self.observed as f64 / parent_total as f64).min(1.0)
        };
        let null_rate = if self.observed == 0 {
            0.0
        } else {
            self.nulls as f64 / self.observed as f64
        };
        let mut types = TypeSet::from_counts(&self.tags);
        if types.is_empty() {
            types = TypeSet::of(BsonType::Null);
        }
        let fields = match self.object {
            Some(object) => {
                let docs = object.docs;
                object.into_fields(docs)
            }
            None => Vec::new(),
        };
        let items = self.items.map(|items| {
            let mut node = items.into_items_node();
            node.presence = 1.0;
            Box::new(node)
        });
        Node {
            types,
            presence,
            null_rate,
            sample_count: self.observed,
            fields,
            items,
        }
    }

    fn into_items_node(self) -> Node {
        let total = self.observed;
        self.into_node(total.max(1))
    }
}

/// One non-fatal observation about inferred structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnomalyKind {
    MultiType,
    LowPresence,
    HighNullRate,
    MixedArrayItems,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::MultiType => "multi-type",
            AnomalyKind::LowPresence => "low-presence",
            AnomalyKind::HighNullRate => "high-null-rate",
            AnomalyKind::MixedArrayItems => "mixed-array-items",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub path: FieldPath,
    pub message: String,
}

/// The result of an inference run: the schema plus advisory findings.
#[derive(Debug)]
pub struct InferenceReport {
    pub schema: Schema,
    pub sampled: u64,
    pub anomalies: Vec<Anomaly>,
    pub index_hints: Vec<String>,
}

/// Number of concrete (non-null) tags in a set.
fn concrete_tags(types: &TypeSet) -> usize {
    types.iter().filter(|t| *t != BsonType::Null).count()
}

fn scan_anomalies(schema: &Schema) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();
    schema.walk(&mut |path, node| {
        if concrete_tags(&node.types) > 1 {
            anomalies.push(Anomaly {
                kind: AnomalyKind::MultiType,
                path: path.clone(),
                message: format!("field observed with multiple types: {}", node.types),
            });
        }
        if node.presence < LOW_PRESENCE {
            anomalies.push(Anomaly {
                kind: AnomalyKind::LowPresence,
                path: path.clone(),
                message: format!("present in only {:.0}% of documents", node.presence * 100.0),
            });
        }
        if node.null_rate > HIGH_NULL_RATE {
            anomalies.push(Anomaly {
                kind: AnomalyKind::HighNullRate,
                path: path.clone(),
                message: format!("null in {:.0}% of observations", node.null_rate * 100.0),
            });
        }
        if let Some(items) = &node.items {
            if concrete_tags(&items.types) > 1 {
                anomalies.push(Anomaly {
                    kind: AnomalyKind::MixedArrayItems,
                    path: path.clone(),
                    message: format!("array items form a union: {}", items.types),
                });
            }
        }
    });
    anomalies
}

/// Advisory index candidates: required identifier-ish or temporal fields.
/// Not a core algorithm; consumers may ignore this freely.
fn scan_index_hints(schema: &Schema) -> Vec<String> {
    let mut hints = Vec::new();
    schema.walk(&mut |path, node| {
        if !node.required() {
            return;
        }
        let by_type = matches!(
            node.types.primary(),
            Some(BsonType::ObjectId) | Some(BsonType::Date)
        );
        let by_name = path
            .leaf()
            .is_some_and(|name| name.ends_with("_id") || name.ends_with("Id"));
        if by_type || by_name {
            hints.push(path.to_string());
        }
    });
    hints
}

/// Infer a schema from an already-drawn sample.
pub fn infer_docs(docs: &[Document]) -> InferenceReport {
    let mut acc = DocAcc::default();
    for doc in docs {
        acc.observe(doc);
    }
    let total = acc.docs;
    let mut schema = Schema { fields: acc.into_fields(total) };
    schema.sort_canonical();
    let anomalies = scan_anomalies(&schema);
    let index_hints = scan_index_hints(&schema);
    debug!(
        "Inferred {} fields from {} documents ({} anomalies)",
        schema.field_count(),
        total,
        anomalies.len()
    );
    InferenceReport { schema, sampled: total, anomalies, index_hints }
}

/// Draw up to `sample_size` documents from the collection and infer.
///
/// Sampling is uniform at the level the adapter provides; document order is
/// not assumed anywhere downstream.
pub fn infer_collection(
    adapter: &dyn DatabaseAdapter,
    collection: &str,
    sample_size: usize,
) -> Result<InferenceReport> {
    info!("Sampling up to {} documents from '{}'", sample_size, collection);
    let docs = adapter.sample(collection, sample_size)?;
    Ok(infer_docs(&docs))
}
