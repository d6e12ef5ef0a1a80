// src/error.rs

use thiserror::Error;

/// Core error types for Shale
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration; raised before any database I/O
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors surfaced by the MongoDB driver
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML (de)serialization errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid declarative schema file; `path` names the offending field
    #[error("Invalid schema at '{path}': {message}")]
    SchemaFormat { path: String, message: String },

    /// No stored schema version matched the requested reference
    #[error("Schema not found: {0}")]
    SchemaNotFound(String),

    /// A non-nullable `add_field` has no default and no operator override
    #[error("Operation on '{path}' requires an operator-supplied default")]
    PlanRequiresInput { path: String },

    /// Webhook delivery failure
    #[error("Webhook error: {0}")]
    Webhook(String),
}

/// Result type alias using Shale's Error type
pub type Result<T> = std::result::Result<T, Error>;
