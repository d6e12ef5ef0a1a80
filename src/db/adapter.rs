// src/db/adapter.rs

//! The narrow database abstraction consumed by inference, drift, and the
//! executor. Implementations are the only source of I/O and
//! non-determinism; everything above them is pure given their outputs.

use crate::error::Result;
use mongodb::bson::Document;
use std::fmt;
use std::str::FromStr;

/// A key-ordered stream of (key, document) pairs.
pub type DocStream<'a> = Box<dyn Iterator<Item = Result<(String, Document)>> + 'a>;

/// Result of a single-document update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
}

/// Server-side validation level applied with a validator document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationLevel {
    Off,
    Moderate,
    Strict,
}

impl ValidationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationLevel::Off => "off",
            ValidationLevel::Moderate => "moderate",
            ValidationLevel::Strict => "strict",
        }
    }
}

impl FromStr for ValidationLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "off" => Ok(ValidationLevel::Off),
            "moderate" => Ok(ValidationLevel::Moderate),
            "strict" => Ok(ValidationLevel::Strict),
            _ => Err(format!("invalid validation level: {}", s)),
        }
    }
}

impl fmt::Display for ValidationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the server does with documents that fail validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationAction {
    Warn,
    Error,
}

impl ValidationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationAction::Warn => "warn",
            ValidationAction::Error => "error",
        }
    }
}

impl FromStr for ValidationAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "warn" => Ok(ValidationAction::Warn),
            "error" => Ok(ValidationAction::Error),
            _ => Err(format!("invalid validation action: {}", s)),
        }
    }
}

impl fmt::Display for ValidationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Narrow interface over the document store.
pub trait DatabaseAdapter {
    /// Number of documents in the collection.
    fn count(&self, collection: &str) -> Result<u64>;

    /// Up to `n` documents, uniformly sampled, in any order.
    fn sample(&self, collection: &str, n: usize) -> Result<Vec<Document>>;

    /// Key-ordered iteration, starting strictly after `after_key` when
    /// provided. The key order is a stable total order on the document's
    /// primary identifier.
    fn iterate<'a>(&'a self, collection: &str, after_key: Option<&str>) -> Result<DocStream<'a>>;

    /// Apply an atomic `$set`/`$unset` mutation to one document by key.
    fn update_one(&self, collection: &str, key: &str, mutation: Document)
    -> Result<UpdateOutcome>;

    /// Install a validator document on the collection.
    fn set_validator(
        &self,
        collection: &str,
        validator: Document,
        level: ValidationLevel,
        action: ValidationAction,
    ) -> Result<()>;
}
