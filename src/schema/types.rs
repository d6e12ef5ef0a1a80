// src/schema/types.rs

//! Canonical type lattice for schema inference and planning.
//!
//! Every document value maps onto a closed set of BSON type tags. A field's
//! type is a non-empty, duplicate-free set over those tags, rendered as a
//! single tag when singleton and otherwise as a sequence ordered by observed
//! frequency (lexicographic tie-break). `null` is a regular member of the
//! set and doubles as the nullable marker; it never subsumes another tag.

use mongodb::bson::Bson;
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Atomic BSON type tags. Spellings follow the MongoDB validator names
/// (`int`, `long`, `binData`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BsonType {
    String,
    Int32,
    Int64,
    Double,
    Decimal,
    Bool,
    Date,
    ObjectId,
    Array,
    Object,
    Binary,
    Regex,
    Timestamp,
    Javascript,
    MinKey,
    MaxKey,
    DbPointer,
    Null,
}

impl BsonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BsonType::String => "string",
            BsonType::Int32 => "int",
            BsonType::Int64 => "long",
            BsonType::Double => "double",
            BsonType::Decimal => "decimal",
            BsonType::Bool => "bool",
            BsonType::Date => "date",
            BsonType::ObjectId => "objectId",
            BsonType::Array => "array",
            BsonType::Object => "object",
            BsonType::Binary => "binData",
            BsonType::Regex => "regex",
            BsonType::Timestamp => "timestamp",
            BsonType::Javascript => "javascript",
            BsonType::MinKey => "minKey",
            BsonType::MaxKey => "maxKey",
            BsonType::DbPointer => "dbPointer",
            BsonType::Null => "null",
        }
    }

    /// Parse a type name. Accepts the canonical validator spellings plus the
    /// aliases used by older schema files (`int32`, `int64`, `number`, ...).
    /// `mixed` is deliberately not a type; callers reject it with a
    /// format error naming the path.
    pub fn parse(s: &str) -> Option<Self> {
        let t = match s {
            "string" => BsonType::String,
            "int" | "int32" => BsonType::Int32,
            "long" | "int64" => BsonType::Int64,
            "double" | "number" => BsonType::Double,
            "decimal" | "decimal128" => BsonType::Decimal,
            "bool" | "boolean" => BsonType::Bool,
            "date" => BsonType::Date,
            "objectId" | "objectid" => BsonType::ObjectId,
            "array" => BsonType::Array,
            "object" => BsonType::Object,
            "binData" | "bindata" | "binary" => BsonType::Binary,
            "regex" => BsonType::Regex,
            "timestamp" => BsonType::Timestamp,
            "javascript" => BsonType::Javascript,
            "minKey" | "minkey" => BsonType::MinKey,
            "maxKey" | "maxkey" => BsonType::MaxKey,
            "dbPointer" | "dbpointer" => BsonType::DbPointer,
            "null" => BsonType::Null,
            _ => return None,
        };
        Some(t)
    }

    /// Tag of a runtime BSON value.
    pub fn of(value: &Bson) -> Self {
        match value {
            Bson::Double(_) => BsonType::Double,
            Bson::String(_) | Bson::Symbol(_) => BsonType::String,
            Bson::Array(_) => BsonType::Array,
            Bson::Document(_) => BsonType::Object,
            Bson::Boolean(_) => BsonType::Bool,
            Bson::Null | Bson::Undefined => BsonType::Null,
            Bson::RegularExpression(_) => BsonType::Regex,
            Bson::JavaScriptCode(_) | Bson::JavaScriptCodeWithScope(_) => BsonType::Javascript,
            Bson::Int32(_) => BsonType::Int32,
            Bson::Int64(_) => BsonType::Int64,
            Bson::Timestamp(_) => BsonType::Timestamp,
            Bson::Binary(_) => BsonType::Binary,
            Bson::ObjectId(_) => BsonType::ObjectId,
            Bson::DateTime(_) => BsonType::Date,
            Bson::Decimal128(_) => BsonType::Decimal,
            Bson::MaxKey => BsonType::MaxKey,
            Bson::MinKey => BsonType::MinKey,
            Bson::DbPointer(_) => BsonType::DbPointer,
        }
    }
}

impl fmt::Display for BsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for BsonType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BsonType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BsonType::parse(&s).ok_or_else(|| de::Error::custom(format!("unknown BSON type '{}'", s)))
    }
}

/// A non-empty, duplicate-free set of type tags with a stable rendering
/// order. Equality is set equality; the order only affects emission.
#[derive(Debug, Clone, Eq)]
pub struct TypeSet(Vec<BsonType>);

impl TypeSet {
    pub fn of(tag: BsonType) -> Self {
        TypeSet(vec![tag])
    }

    pub fn from_tags(tags: &[BsonType]) -> Self {
        let mut set = TypeSet(Vec::new());
        for t in tags {
            set.insert(*t);
        }
        set
    }

    /// Build from an observation histogram, ordered by count descending
    /// with lexicographic tie-break.
    pub fn from_counts(counts: &BTreeMap<BsonType, u64>) -> Self {
        let mut tags: Vec<(BsonType, u64)> =
            counts.iter().filter(|(_, n)| **n > 0).map(|(t, n)| (*t, *n)).collect();
        tags.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));
        TypeSet(tags.into_iter().map(|(t, _)| t).collect())
    }

    pub fn insert(&mut self, tag: BsonType) {
        if !self.0.contains(&tag) {
            self.0.push(tag);
        }
    }

    pub fn contains(&self, tag: BsonType) -> bool {
        self.0.contains(&tag)
    }

    pub fn nullable(&self) -> bool {
        self.contains(BsonType::Null)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = BsonType> + '_ {
        self.0.iter().copied()
    }

    /// The highest-frequency tag.
    pub fn primary(&self) -> Option<BsonType> {
        self.0.first().copied()
    }

    /// The highest-frequency tag other than `null`.
    pub fn primary_concrete(&self) -> Option<BsonType> {
        self.0.iter().copied().find(|t| *t != BsonType::Null)
    }

    /// Set inclusion: every tag of `self` appears in `other`.
    pub fn is_subset(&self, other: &TypeSet) -> bool {
        self.0.iter().all(|t| other.contains(*t))
    }

    pub fn is_strict_subset(&self, other: &TypeSet) -> bool {
        self.is_subset(other) && self.len() < other.len()
    }

    /// Monotone union over the lattice. Equal tags collapse; `null` is
    /// retained as a member; numeric tags never merge into each other.
    /// Tags keep `self`'s order, with `other`'s unseen tags appended.
    pub fn widen(&self, other: &TypeSet) -> TypeSet {
        let mut out = self.clone();
        for t in other.iter() {
            out.insert(t);
        }
        out
    }
}

impl PartialEq for TypeSet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.is_subset(other)
    }
}

impl fmt::Display for TypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() == 1 {
            return f.write_str(self.0[0].as_str());
        }
        write!(f, "[")?;
        for (i, t) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            f.write_str(t.as_str())?;
        }
        write!(f, "]")
    }
}

impl Serialize for TypeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if self.0.len() == 1 {
            self.0[0].serialize(serializer)
        } else {
            let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
            for t in &self.0 {
                seq.serialize_element(t)?;
            }
            seq.end()
        }
    }
}

struct TypeSetVisitor;

impl<'de> Visitor<'de> for TypeSetVisitor {
    type Value = TypeSet;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a BSON type name or a sequence of type names")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<TypeSet, E> {
        let tag = BsonType::parse(v)
            .ok_or_else(|| de::Error::custom(format!("unknown BSON type '{}'", v)))?;
        Ok(TypeSet::of(tag))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<TypeSet, A::Error> {
        let mut set = TypeSet(Vec::new());
        while let Some(tag) = seq.next_element::<BsonType>()? {
            set.insert(tag);
        }
        if set.is_empty() {
            return Err(de::Error::custom("type set must not be empty"));
        }
        Ok(set)
    }
}

impl<'de> Deserialize<'de> for TypeSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(TypeSetVisitor)
    }
}

/// A field path: a value-typed sequence of field names, rendered dotted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn root() -> Self {
        FieldPath(Vec::new())
    }

    pub fn parse(s: &str) -> Self {
        FieldPath(s.split('.').filter(|p| !p.is_empty()).map(String::from).collect())
    }

    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        FieldPath(segments)
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn leaf(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(FieldPath::parse(&s))
    }
}
