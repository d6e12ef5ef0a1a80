// src/plan.rs

//! Migration plan compilation.
//!
//! Derives an ordered, idempotent list of field-level operations from a
//! schema pair. Operations carry no statistics. Ordering makes reapplication
//! converge: removals first (deepest path first), then type changes, then
//! additions (shallowest first). The compiler never emits two operations
//! with the same path.

use crate::diff::{Change, diff};
use crate::error::Result;
use crate::schema::Schema;
use crate::schema::types::{BsonType, FieldPath, TypeSet};
use mongodb::bson::Bson;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::debug;

/// One field-level migration operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PlanOp {
    AddField {
        path: FieldPath,
        #[serde(rename = "bsonType")]
        types: TypeSet,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Bson>,
        #[serde(default)]
        requires_input: bool,
    },
    RemoveField {
        path: FieldPath,
    },
    Convert {
        path: FieldPath,
        to: BsonType,
    },
    WrapArray {
        path: FieldPath,
        item_type: BsonType,
    },
    UnwrapArray {
        path: FieldPath,
    },
    ConvertItems {
        path: FieldPath,
        to: BsonType,
    },
}

impl PlanOp {
    pub fn path(&self) -> &FieldPath {
        match self {
            PlanOp::AddField { path, .. }
            | PlanOp::RemoveField { path }
            | PlanOp::Convert { path, .. }
            | PlanOp::WrapArray { path, .. }
            | PlanOp::UnwrapArray { path }
            | PlanOp::ConvertItems { path, .. } => path,
        }
    }

    /// The default an `add_field` writes. `None` means the operation needs
    /// an operator-supplied value before it may execute.
    pub fn effective_default(&self) -> Option<Bson> {
        match self {
            PlanOp::AddField { requires_input: true, .. } => None,
            PlanOp::AddField { default, .. } => {
                Some(default.clone().unwrap_or(Bson::Null))
            }
            _ => None,
        }
    }
}

/// An ordered operation list, consumed once by the executor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub ops: Vec<PlanOp>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Paths of operations that refuse to execute without an override.
    pub fn requires_input(&self) -> Vec<&FieldPath> {
        self.ops
            .iter()
            .filter(|op| matches!(op, PlanOp::AddField { requires_input: true, .. }))
            .map(|op| op.path())
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!(self.ops)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(&self.ops)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Plan> {
        let ops: Vec<PlanOp> = serde_json::from_str(&fs::read_to_string(path)?)?;
        Ok(Plan { ops })
    }
}

/// Compile the operations that transform `from`-shaped data into `to` shape.
pub fn compile(from: &Schema, to: &Schema) -> Plan {
    let changes = diff(from, to);

    let mut removals = Vec::new();
    let mut conversions = Vec::new();
    let mut additions = Vec::new();

    for change in changes.removed {
        if let Change::Removed { path, .. } = change {
            removals.push(PlanOp::RemoveField { path });
        }
    }

    for change in changes.added {
        if let Change::Added { path, types } = change {
            let nullable = types.nullable();
            additions.push(PlanOp::AddField {
                path,
                types,
                default: nullable.then_some(Bson::Null),
                requires_input: !nullable,
            });
        }
    }

    for change in changes.changed {
        match change {
            Change::TypeChanged { path, from: f, to: t } => {
                if f.is_strict_subset(&t) {
                    // Union expansion: existing data already conforms.
                    continue;
                }
                let to_array = t.contains(BsonType::Array);
                let from_array = f.contains(BsonType::Array);
                if to_array && !from_array {
                    let item_type = to
                        .get(&path)
                        .and_then(|node| node.items.as_ref())
                        .and_then(|items| items.types.primary_concrete())
                        .or_else(|| f.primary_concrete())
                        .unwrap_or(BsonType::Null);
                    conversions.push(PlanOp::WrapArray { path, item_type });
                } else if from_array && !to_array {
                    conversions.push(PlanOp::UnwrapArray { path });
                } else if let Some(target) = t.primary_concrete() {
                    conversions.push(PlanOp::Convert { path, to: target });
                }
            }
            Change::ItemsChanged { path, from: f, to: t } => {
                if f.is_strict_subset(&t) {
                    continue;
                }
                if let Some(target) = t.primary_concrete() {
                    conversions.push(PlanOp::ConvertItems { path, to: target });
                }
            }
            // Presence toggles carry no data migration.
            _ => {}
        }
    }

    removals.sort_by(|a, b| {
        b.path().depth().cmp(&a.path().depth()).then_with(|| a.path().cmp(b.path()))
    });
    conversions.sort_by(|a, b| a.path().cmp(b.path()));
    additions.sort_by(|a, b| {
        a.path().depth().cmp(&b.path().depth()).then_with(|| a.path().cmp(b.path()))
    });

    let mut seen = BTreeSet::new();
    let mut ops = Vec::new();
    for op in removals.into_iter().chain(conversions).chain(additions) {
        if seen.insert(op.path().clone()) {
            ops.push(op);
        }
    }

    debug!("Compiled plan with {} operation(s)", ops.len());
    Plan { ops }
}
