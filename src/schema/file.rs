// src/schema/file.rs

//! Declarative schema files and the versioned on-disk store.
//!
//! The file format is a YAML document:
//!
//! ```yaml
//! version: 1
//! schema:
//!   properties:
//!     <field>:
//!       bsonType: <type> | [<type>, ...]
//!       presence: <float 0..1>   # optional, advisory
//!       nullable: <bool>         # optional; same as 'null' in the types
//!       items: ...               # required iff bsonType includes 'array'
//!       properties: ...          # iff bsonType includes 'object'
//! ```
//!
//! Parsing is strict about types (`bsonType: mixed` is rejected, the error
//! names the offending field path) and lenient about unknown keys. Field
//! order under `properties` is the deterministic order of the schema tree.

use crate::error::{Error, Result};
use crate::schema::types::{BsonType, FieldPath, TypeSet};
use crate::schema::{Field, Node, Schema};
use chrono::{SecondsFormat, Utc};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Current schema file format version.
pub const FILE_VERSION: u64 = 1;

fn key(s: &str) -> Value {
    Value::String(s.to_string())
}

/// Round a statistic to the two decimals the file format persists, without
/// letting the rounding carry a presence value across the `required`
/// threshold in either direction.
fn emit_presence(p: f64) -> f64 {
    if p >= crate::schema::REQUIRED_PRESENCE {
        1.0
    } else {
        ((p * 100.0).round() / 100.0).min(0.99)
    }
}

fn types_to_yaml(types: &TypeSet) -> Value {
    if types.len() == 1 {
        key(types.primary().expect("non-empty type set").as_str())
    } else {
        Value::Sequence(types.iter().map(|t| key(t.as_str())).collect())
    }
}

fn node_to_yaml(node: &Node) -> Value {
    let mut map = Mapping::new();
    map.insert(key("bsonType"), types_to_yaml(&node.types));
    map.insert(key("presence"), Value::from(emit_presence(node.presence)));
    if let Some(items) = &node.items {
        map.insert(key("items"), node_to_yaml(items));
    }
    if !node.fields.is_empty() {
        map.insert(key("properties"), fields_to_yaml(&node.fields));
    }
    Value::Mapping(map)
}

fn fields_to_yaml(fields: &[Field]) -> Value {
    let mut map = Mapping::new();
    for field in fields {
        map.insert(key(&field.name), node_to_yaml(&field.node));
    }
    Value::Mapping(map)
}

/// Emit a schema as a YAML document string.
pub fn emit(schema: &Schema) -> String {
    let mut body = Mapping::new();
    body.insert(key("properties"), fields_to_yaml(&schema.fields));

    let mut root = Mapping::new();
    root.insert(key("version"), Value::from(FILE_VERSION));
    root.insert(key("schema"), Value::Mapping(body));

    // Mapping serialization preserves insertion order, so the deterministic
    // field order of the tree survives the round-trip.
    serde_yaml::to_string(&Value::Mapping(root)).expect("schema tree serializes")
}

fn format_err(path: &FieldPath, message: impl Into<String>) -> Error {
    let path = if path.depth() == 0 { "<root>".to_string() } else { path.to_string() };
    Error::SchemaFormat { path, message: message.into() }
}

fn parse_type_name(raw: &Value, path: &FieldPath) -> Result<BsonType> {
    let name = raw
        .as_str()
        .ok_or_else(|| format_err(path, "bsonType entries must be strings"))?;
    if name == "mixed" {
        return Err(format_err(
            path,
            "'mixed' is not a type; use an array of types instead",
        ));
    }
    BsonType::parse(name).ok_or_else(|| format_err(path, format!("unknown BSON type '{}'", name)))
}

fn parse_types(raw: &Value, path: &FieldPath) -> Result<TypeSet> {
    match raw {
        Value::String(_) => Ok(TypeSet::of(parse_type_name(raw, path)?)),
        Value::Sequence(seq) => {
            let mut set: Option<TypeSet> = None;
            for entry in seq {
                let tag = parse_type_name(entry, path)?;
                match set.as_mut() {
                    None => set = Some(TypeSet::of(tag)),
                    Some(s) => s.insert(tag),
                }
            }
            set.ok_or_else(|| format_err(path, "bsonType list must not be empty"))
        }
        _ => Err(format_err(path, "bsonType must be a string or a list of strings")),
    }
}

fn parse_node(raw: &Value, path: &FieldPath) -> Result<Node> {
    let map = raw
        .as_mapping()
        .ok_or_else(|| format_err(path, "field specification must be a mapping"))?;

    let mut types = match map.get("bsonType") {
        Some(raw_types) => parse_types(raw_types, path)?,
        // Missing bsonType is tolerated when the shape is implied.
        None if map.contains_key("properties") => TypeSet::of(BsonType::Object),
        None if map.contains_key("items") => TypeSet::of(BsonType::Array),
        None => return Err(format_err(path, "missing 'bsonType'")),
    };

    if let Some(nullable) = map.get("nullable") {
        let nullable = nullable
            .as_bool()
            .ok_or_else(|| format_err(path, "'nullable' must be a boolean"))?;
        if nullable {
            types.insert(BsonType::Null);
        }
    }

    let presence = match map.get("presence") {
        Some(p) => {
            let p = p.as_f64().ok_or_else(|| format_err(path, "'presence' must be a number"))?;
            if !(0.0..=1.0).contains(&p) {
                return Err(format_err(path, "'presence' must lie in [0, 1]"));
            }
            p
        }
        None => 1.0,
    };

    let items = match map.get("items") {
        Some(raw_items) => Some(Box::new(parse_node(raw_items, &path.child("items"))?)),
        None if types.contains(BsonType::Array) => {
            return Err(format_err(path, "array type requires an 'items' specification"));
        }
        None => None,
    };

    let fields = match map.get("properties") {
        Some(raw_props) => parse_fields(raw_props, path)?,
        None => Vec::new(),
    };

    Ok(Node {
        types,
        presence,
        null_rate: 0.0,
        sample_count: 0,
        fields,
        items,
    })
}

fn parse_fields(raw: &Value, path: &FieldPath) -> Result<Vec<Field>> {
    let map = raw
        .as_mapping()
        .ok_or_else(|| format_err(path, "'properties' must be a mapping"))?;
    let mut fields = Vec::with_capacity(map.len());
    for (name, spec) in map {
        let name = name
            .as_str()
            .ok_or_else(|| format_err(path, "field names must be strings"))?;
        let child = path.child(name);
        fields.push(Field::new(name, parse_node(spec, &child)?));
    }
    Ok(fields)
}

/// Parse a YAML schema document.
pub fn parse(text: &str) -> Result<Schema> {
    let root: Value = serde_yaml::from_str(text)?;
    let map = root
        .as_mapping()
        .ok_or_else(|| format_err(&FieldPath::root(), "document must be a mapping"))?;

    match map.get("version").and_then(Value::as_u64) {
        Some(FILE_VERSION) => {}
        Some(v) => {
            return Err(format_err(
                &FieldPath::root(),
                format!("unsupported file version {}", v),
            ));
        }
        None => return Err(format_err(&FieldPath::root(), "missing 'version'")),
    }

    let body = map
        .get("schema")
        .and_then(Value::as_mapping)
        .ok_or_else(|| format_err(&FieldPath::root(), "missing 'schema' mapping"))?;

    let fields = match body.get("properties") {
        Some(props) => parse_fields(props, &FieldPath::root())?,
        None => Vec::new(),
    };

    Ok(Schema::new(fields))
}

/// Versioned schema files under a directory: `<collection>.v<N>.yaml`.
pub struct SchemaStore {
    dir: PathBuf,
}

impl SchemaStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        SchemaStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, collection: &str, version: u32) -> PathBuf {
        self.dir.join(format!("{}.v{}.yaml", collection, version))
    }

    /// All stored versions for a collection, ascending.
    pub fn versions(&self, collection: &str) -> Result<Vec<u32>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let prefix = format!("{}.v", collection);
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(rest) = name.strip_prefix(&prefix) {
                if let Some(version) = rest.strip_suffix(".yaml") {
                    if let Ok(version) = version.parse::<u32>() {
                        versions.push(version);
                    }
                }
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    pub fn latest(&self, collection: &str) -> Result<Option<u32>> {
        Ok(self.versions(collection)?.last().copied())
    }

    /// Persist a schema as the next version; returns the version written.
    pub fn save(&self, collection: &str, schema: &Schema) -> Result<u32> {
        fs::create_dir_all(&self.dir)?;
        let version = self.latest(collection)?.unwrap_or(0) + 1;
        let path = self.file_path(collection, version);
        let header = format!(
            "# {} schema v{}, saved {}\n",
            collection,
            version,
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        fs::write(&path, header + &emit(schema))?;
        info!("Saved schema {} v{} to {}", collection, version, path.display());
        Ok(version)
    }

    /// Load an explicit version, or the latest when `version` is `None`.
    pub fn load(&self, collection: &str, version: Option<u32>) -> Result<Schema> {
        let version = match version {
            Some(v) => v,
            None => self
                .latest(collection)?
                .ok_or_else(|| Error::SchemaNotFound(collection.to_string()))?,
        };
        let path = self.file_path(collection, version);
        if !path.exists() {
            return Err(Error::SchemaNotFound(format!("{}@v{}", collection, version)));
        }
        debug!("Loading schema from {}", path.display());
        parse(&fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::BsonType;

    fn sample_schema() -> Schema {
        Schema::new(vec![
            Field::new("name", Node::leaf(TypeSet::of(BsonType::String))),
            Field::new(
                "age",
                Node::leaf(TypeSet::from_tags(&[BsonType::Int32, BsonType::Null]))
                    .with_presence(0.9, 0.05),
            ),
            Field::new(
                "tags",
                Node::array(Node::leaf(TypeSet::of(BsonType::String))).with_presence(0.75, 0.0),
            ),
            Field::new(
                "address",
                Node::object(vec![
                    Field::new("city", Node::leaf(TypeSet::of(BsonType::String))),
                ]),
            ),
        ])
    }

    #[test]
    fn test_roundtrip_preserves_structure() {
        let schema = sample_schema();
        let text = emit(&schema);
        let parsed = parse(&text).unwrap();
        assert_eq!(parsed, schema);
    }

    #[test]
    fn test_emit_orders_fields_deterministically() {
        let text = emit(&sample_schema());
        let address = text.find("address").unwrap();
        let name = text.find("name:").unwrap();
        let age = text.find("age").unwrap();
        let tags = text.find("tags").unwrap();
        // presence 1.0 fields first in name order, then 0.9, then 0.75
        assert!(address < name && name < age && age < tags);
    }

    #[test]
    fn test_presence_rounding_never_flips_required() {
        let schema = Schema::new(vec![
            Field::new(
                "almost",
                Node::leaf(TypeSet::of(BsonType::String)).with_presence(0.995, 0.0),
            ),
            Field::new(
                "everywhere",
                Node::leaf(TypeSet::of(BsonType::String)).with_presence(0.9995, 0.0),
            ),
        ]);
        assert!(!schema.get(&FieldPath::parse("almost")).unwrap().required());
        assert!(schema.get(&FieldPath::parse("everywhere")).unwrap().required());
        let parsed = parse(&emit(&schema)).unwrap();
        assert_eq!(parsed, schema);
    }

    #[test]
    fn test_mixed_is_rejected_with_path() {
        let text = "version: 1\nschema:\n  properties:\n    payload:\n      bsonType: mixed\n";
        match parse(text) {
            Err(Error::SchemaFormat { path, .. }) => assert_eq!(path, "payload"),
            other => panic!("expected SchemaFormat error, got {:?}", other),
        }
    }

    #[test]
    fn test_nullable_flag_equivalent_to_null_type() {
        let text =
            "version: 1\nschema:\n  properties:\n    age:\n      bsonType: int\n      nullable: true\n";
        let schema = parse(text).unwrap();
        let node = schema.get(&FieldPath::parse("age")).unwrap();
        assert!(node.types.nullable());
        assert!(!node.required());
    }

    #[test]
    fn test_array_without_items_is_rejected() {
        let text = "version: 1\nschema:\n  properties:\n    tags:\n      bsonType: array\n";
        match parse(text) {
            Err(Error::SchemaFormat { path, .. }) => assert_eq!(path, "tags"),
            other => panic!("expected SchemaFormat error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_version_is_rejected() {
        assert!(parse("schema:\n  properties: {}\n").is_err());
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let text = "version: 1\nschema:\n  properties:\n    name:\n      bsonType: string\n      comment: free-form\n";
        assert!(parse(text).is_ok());
    }

    #[test]
    fn test_store_versions_and_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SchemaStore::new(dir.path().join("schemas"));
        let schema = sample_schema();

        assert!(store.versions("users").unwrap().is_empty());
        assert_eq!(store.save("users", &schema).unwrap(), 1);
        assert_eq!(store.save("users", &schema).unwrap(), 2);
        assert_eq!(store.versions("users").unwrap(), vec![1, 2]);

        let loaded = store.load("users", None).unwrap();
        assert_eq!(loaded, schema);
        assert!(store.load("users", Some(9)).is_err());
        assert!(store.load("orders", None).is_err());
    }
}
