// src/diff.rs

//! Schema-to-schema comparison.
//!
//! Produces a structured change set grouped into added, removed, and changed
//! fields. The comparison is purely structural: statistics never produce a
//! change record, only the derived `required` flag does. Within each group
//! records are ordered lexicographically by path.

use crate::schema::types::{BsonType, FieldPath, TypeSet};
use crate::schema::{Field, Schema};
use serde_json::{Value, json};

/// One structured change record.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Added { path: FieldPath, types: TypeSet },
    Removed { path: FieldPath, types: TypeSet },
    TypeChanged { path: FieldPath, from: TypeSet, to: TypeSet },
    ItemsChanged { path: FieldPath, from: TypeSet, to: TypeSet },
    PresenceChanged { path: FieldPath, from_required: bool, to_required: bool },
}

impl Change {
    pub fn path(&self) -> &FieldPath {
        match self {
            Change::Added { path, .. }
            | Change::Removed { path, .. }
            | Change::TypeChanged { path, .. }
            | Change::ItemsChanged { path, .. }
            | Change::PresenceChanged { path, .. } => path,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Change::Added { .. } => "added",
            Change::Removed { .. } => "removed",
            Change::TypeChanged { .. } => "type_changed",
            Change::ItemsChanged { .. } => "items_changed",
            Change::PresenceChanged { .. } => "presence_changed",
        }
    }
}

/// The grouped result of a diff.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub added: Vec<Change>,
    pub removed: Vec<Change>,
    pub changed: Vec<Change>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.added.iter().chain(self.removed.iter()).chain(self.changed.iter())
    }

    fn sort(&mut self) {
        self.added.sort_by(|a, b| a.path().cmp(b.path()));
        self.removed.sort_by(|a, b| a.path().cmp(b.path()));
        self.changed.sort_by(|a, b| a.path().cmp(b.path()));
    }

    /// The wire form shared by diff and drift output.
    pub fn to_json(&self) -> Value {
        let paths = |changes: &[Change]| -> Vec<Value> {
            changes.iter().map(|c| json!(c.path().to_string())).collect()
        };
        let changed: Vec<Value> = self
            .changed
            .iter()
            .map(|c| {
                let (from, to) = match c {
                    Change::TypeChanged { from, to, .. } => {
                        (json!({ "bsonType": from }), json!({ "bsonType": to }))
                    }
                    Change::ItemsChanged { from, to, .. } => (
                        json!({ "items": { "bsonType": from } }),
                        json!({ "items": { "bsonType": to } }),
                    ),
                    Change::PresenceChanged { from_required, to_required, .. } => {
                        (json!({ "required": from_required }), json!({ "required": to_required }))
                    }
                    // Added/Removed never live in `changed`.
                    _ => (Value::Null, Value::Null),
                };
                json!({
                    "field": c.path().to_string(),
                    "kind": c.kind(),
                    "from": from,
                    "to": to,
                })
            })
            .collect();
        json!({
            "added_fields": paths(&self.added),
            "removed_fields": paths(&self.removed),
            "changed_fields": changed,
            "summary": {
                "added": self.added.len(),
                "removed": self.removed.len(),
                "changed": self.changed.len(),
            },
        })
    }
}

fn diff_fields(path: &FieldPath, from: &[Field], to: &[Field], out: &mut ChangeSet) {
    for tf in to {
        if !from.iter().any(|ff| ff.name == tf.name) {
            // New subtrees are reported by their root only.
            out.added.push(Change::Added {
                path: path.child(&tf.name),
                types: tf.node.types.clone(),
            });
        }
    }

    for ff in from {
        let child = path.child(&ff.name);
        let Some(tf) = to.iter().find(|tf| tf.name == ff.name) else {
            out.removed.push(Change::Removed { path: child, types: ff.node.types.clone() });
            continue;
        };

        let (a, b) = (&ff.node, &tf.node);
        if a.types != b.types {
            out.changed.push(Change::TypeChanged {
                path: child.clone(),
                from: a.types.clone(),
                to: b.types.clone(),
            });
        } else {
            if a.types.contains(BsonType::Object) {
                // The object node itself is not a change; recurse.
                diff_fields(&child, &a.fields, &b.fields, out);
            }
            if let (Some(ai), Some(bi)) = (&a.items, &b.items) {
                if ai.types != bi.types {
                    out.changed.push(Change::ItemsChanged {
                        path: child.clone(),
                        from: ai.types.clone(),
                        to: bi.types.clone(),
                    });
                }
            }
        }
        if a.required() != b.required() {
            out.changed.push(Change::PresenceChanged {
                path: child,
                from_required: a.required(),
                to_required: b.required(),
            });
        }
    }
}

/// Compare two schemas in a preorder walk of their union.
pub fn diff(from: &Schema, to: &Schema) -> ChangeSet {
    let mut out = ChangeSet::default();
    diff_fields(&FieldPath::root(), &from.fields, &to.fields, &mut out);
    out.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Node, Schema};

    fn leaf(t: BsonType) -> Node {
        Node::leaf(TypeSet::of(t))
    }

    #[test]
    fn test_added_and_removed() {
        let from = Schema::new(vec![Field::new("a", leaf(BsonType::String))]);
        let to = Schema::new(vec![Field::new("b", leaf(BsonType::Int32))]);
        let set = diff(&from, &to);
        assert_eq!(set.added.len(), 1);
        assert_eq!(set.removed.len(), 1);
        assert_eq!(set.added[0].path(), &FieldPath::parse("b"));
        assert_eq!(set.removed[0].path(), &FieldPath::parse("a"));
    }

    #[test]
    fn test_type_change() {
        let from = Schema::new(vec![Field::new("age", leaf(BsonType::String))]);
        let to = Schema::new(vec![Field::new("age", leaf(BsonType::Int32))]);
        let set = diff(&from, &to);
        assert_eq!(set.changed.len(), 1);
        match &set.changed[0] {
            Change::TypeChanged { from, to, .. } => {
                assert_eq!(*from, TypeSet::of(BsonType::String));
                assert_eq!(*to, TypeSet::of(BsonType::Int32));
            }
            other => panic!("unexpected change {:?}", other),
        }
    }

    #[test]
    fn test_object_recursion_reports_leaf_paths() {
        let from = Schema::new(vec![Field::new(
            "address",
            Node::object(vec![Field::new("city", leaf(BsonType::String))]),
        )]);
        let to = Schema::new(vec![Field::new(
            "address",
            Node::object(vec![
                Field::new("city", leaf(BsonType::String)),
                Field::new("zip", leaf(BsonType::String)),
            ]),
        )]);
        let set = diff(&from, &to);
        assert_eq!(set.added.len(), 1);
        assert_eq!(set.added[0].path(), &FieldPath::parse("address.zip"));
        assert!(set.changed.is_empty());
    }

    #[test]
    fn test_added_subtree_reports_root_only() {
        let from = Schema::default();
        let to = Schema::new(vec![Field::new(
            "address",
            Node::object(vec![Field::new("city", leaf(BsonType::String))]),
        )]);
        let set = diff(&from, &to);
        assert_eq!(set.added.len(), 1);
        assert_eq!(set.added[0].path(), &FieldPath::parse("address"));
    }

    #[test]
    fn test_items_change() {
        let from = Schema::new(vec![Field::new("tags", Node::array(leaf(BsonType::String)))]);
        let to = Schema::new(vec![Field::new("tags", Node::array(leaf(BsonType::Int32)))]);
        let set = diff(&from, &to);
        assert_eq!(set.changed.len(), 1);
        assert_eq!(set.changed[0].kind(), "items_changed");
    }

    #[test]
    fn test_presence_toggle() {
        let from = Schema::new(vec![Field::new("name", leaf(BsonType::String))]);
        let to = Schema::new(vec![Field::new(
            "name",
            leaf(BsonType::String).with_presence(0.5, 0.0),
        )]);
        let set = diff(&from, &to);
        assert_eq!(set.changed.len(), 1);
        match &set.changed[0] {
            Change::PresenceChanged { from_required, to_required, .. } => {
                assert!(*from_required);
                assert!(!*to_required);
            }
            other => panic!("unexpected change {:?}", other),
        }
    }

    #[test]
    fn test_statistics_never_diff() {
        let from = Schema::new(vec![Field::new(
            "name",
            leaf(BsonType::String).with_presence(0.4, 0.0),
        )]);
        let to = Schema::new(vec![Field::new(
            "name",
            leaf(BsonType::String).with_presence(0.7, 0.05),
        )]);
        assert!(diff(&from, &to).is_empty());
    }

    #[test]
    fn test_groups_sorted_lexicographically() {
        let from = Schema::default();
        let to = Schema::new(vec![
            Field::new("zeta", leaf(BsonType::String)),
            Field::new("alpha", leaf(BsonType::String).with_presence(0.1, 0.0)),
        ]);
        let set = diff(&from, &to);
        let paths: Vec<String> = set.added.iter().map(|c| c.path().to_string()).collect();
        assert_eq!(paths, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_json_shape() {
        let from = Schema::new(vec![Field::new("age", leaf(BsonType::String))]);
        let to = Schema::new(vec![
            Field::new("age", leaf(BsonType::Int32)),
            Field::new("name", leaf(BsonType::String)),
        ]);
        let json = diff(&from, &to).to_json();
        assert_eq!(json["summary"]["added"], 1);
        assert_eq!(json["summary"]["changed"], 1);
        assert_eq!(json["added_fields"][0], "name");
        assert_eq!(json["changed_fields"][0]["field"], "age");
        assert_eq!(json["changed_fields"][0]["from"]["bsonType"], "string");
    }
}
