// src/validator.rs

//! Projection of a schema tree onto MongoDB's `$jsonSchema` validator form,
//! and the inverse parse. Both directions are pure; applying the validator
//! to a collection is the adapter's job.
//!
//! Union types emit an array of type names; nullable fields carry `"null"`
//! among them. `required` arrays are derived from the schema's presence
//! statistics and parse back as presence 1.0.

use crate::error::{Error, Result};
use crate::schema::types::{BsonType, FieldPath, TypeSet};
use crate::schema::{Field, Node, Schema};
use mongodb::bson::{Bson, Document, doc};

fn types_to_bson(types: &TypeSet) -> Bson {
    if types.len() == 1 {
        Bson::String(types.primary().expect("non-empty type set").as_str().to_string())
    } else {
        Bson::Array(types.iter().map(|t| Bson::String(t.as_str().to_string())).collect())
    }
}

fn node_to_validator(node: &Node) -> Document {
    let mut out = doc! { "bsonType": types_to_bson(&node.types) };
    if !node.fields.is_empty() {
        insert_object_keys(&mut out, &node.fields);
    }
    if let Some(items) = &node.items {
        out.insert("items", node_to_validator(items));
    }
    out
}

fn insert_object_keys(out: &mut Document, fields: &[Field]) {
    let mut properties = Document::new();
    for field in fields {
        properties.insert(field.name.clone(), node_to_validator(&field.node));
    }
    out.insert("properties", properties);
    let required: Vec<Bson> = fields
        .iter()
        .filter(|f| f.node.required())
        .map(|f| Bson::String(f.name.clone()))
        .collect();
    if !required.is_empty() {
        out.insert("required", Bson::Array(required));
    }
}

/// Project a schema onto the `$jsonSchema` body for its collection.
pub fn project(schema: &Schema) -> Document {
    let mut out = doc! { "bsonType": "object" };
    insert_object_keys(&mut out, &schema.fields);
    out
}

fn format_err(path: &FieldPath, message: impl Into<String>) -> Error {
    let path = if path.depth() == 0 { "<root>".to_string() } else { path.to_string() };
    Error::SchemaFormat { path, message: message.into() }
}

fn parse_types(raw: &Bson, path: &FieldPath) -> Result<TypeSet> {
    let parse_one = |value: &Bson| -> Result<BsonType> {
        let name = value
            .as_str()
            .ok_or_else(|| format_err(path, "bsonType entries must be strings"))?;
        BsonType::parse(name)
            .ok_or_else(|| format_err(path, format!("unknown BSON type '{}'", name)))
    };
    match raw {
        Bson::String(_) => Ok(TypeSet::of(parse_one(raw)?)),
        Bson::Array(entries) => {
            let mut set: Option<TypeSet> = None;
            for entry in entries {
                let tag = parse_one(entry)?;
                match set.as_mut() {
                    None => set = Some(TypeSet::of(tag)),
                    Some(s) => s.insert(tag),
                }
            }
            set.ok_or_else(|| format_err(path, "bsonType list must not be empty"))
        }
        _ => Err(format_err(path, "bsonType must be a string or an array")),
    }
}

fn parse_fields(spec: &Document, path: &FieldPath) -> Result<Vec<Field>> {
    let required: Vec<&str> = match spec.get("required") {
        Some(Bson::Array(names)) => names.iter().filter_map(Bson::as_str).collect(),
        _ => Vec::new(),
    };
    let mut fields = Vec::new();
    if let Some(props) = spec.get("properties") {
        let props = props
            .as_document()
            .ok_or_else(|| format_err(path, "'properties' must be a document"))?;
        for (name, child_spec) in props {
            let child_path = path.child(name);
            let child_spec = child_spec
                .as_document()
                .ok_or_else(|| format_err(&child_path, "field specification must be a document"))?;
            let node = parse_node(child_spec, &child_path, required.contains(&name.as_str()))?;
            fields.push(Field::new(name, node));
        }
    }
    Ok(fields)
}

fn parse_node(spec: &Document, path: &FieldPath, required: bool) -> Result<Node> {
    let types = match spec.get("bsonType") {
        Some(raw) => parse_types(raw, path)?,
        None => return Err(format_err(path, "missing 'bsonType'")),
    };

    let items = match spec.get("items") {
        Some(raw) => {
            let raw = raw
                .as_document()
                .ok_or_else(|| format_err(path, "'items' must be a document"))?;
            Some(Box::new(parse_node(raw, &path.child("items"), true)?))
        }
        None if types.contains(BsonType::Array) => {
            return Err(format_err(path, "array type requires an 'items' specification"));
        }
        None => None,
    };

    let fields = parse_fields(spec, path)?;

    // Statistics are advisory; parsing reconstructs only what the derived
    // required flag needs.
    let presence = if required { 1.0 } else { 0.0 };
    Ok(Node {
        types,
        presence,
        null_rate: 0.0,
        sample_count: 0,
        fields,
        items,
    })
}

/// Parse a `$jsonSchema` body back into a schema tree.
pub fn parse(validator: &Document) -> Result<Schema> {
    if let Some(raw) = validator.get("bsonType") {
        let types = parse_types(raw, &FieldPath::root())?;
        if !types.contains(BsonType::Object) {
            return Err(format_err(&FieldPath::root(), "validator root must be an object"));
        }
    }
    Ok(Schema::new(parse_fields(validator, &FieldPath::root())?))
}
