// src/lib.rs

//! Shale Schema Manager
//!
//! Schema management for MongoDB collections that have no enforced schema.
//! Shale treats the inferred structure of live collections as a first-class
//! artifact: it infers schemas by sampling, persists them as versioned YAML
//! files, diffs versions, detects drift between declared schema and live
//! data, compiles version-to-version migration plans, and executes those
//! plans with resumable, rate-limited batched writes.
//!
//! # Architecture
//!
//! - Canonical type lattice: BSON tags, unions ordered by observed frequency
//! - Pure core: inference, diff, drift, planning, and validator projection
//!   never perform I/O; the database adapter is the only impure seam
//! - Plans: ordered, idempotent field-level operations, replayable and
//!   resumable from the last processed document key

pub mod config;
pub mod db;
pub mod diff;
pub mod drift;
mod error;
pub mod exec;
pub mod infer;
pub mod notify;
pub mod plan;
pub mod schema;
pub mod validator;

pub use error::{Error, Result};
