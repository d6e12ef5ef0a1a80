// src/drift.rs

//! Schema-to-live drift detection.
//!
//! Infers a schema from a fresh sample, diffs it against the declared
//! schema, and classifies each surviving change with a severity. The
//! comparison is asymmetric: live data narrower than the declaration is not
//! drift, while any widening or loss of a declared field is.

use crate::db::DatabaseAdapter;
use crate::diff::{Change, ChangeSet, diff};
use crate::error::Result;
use crate::infer;
use crate::notify::Notifier;
use crate::schema::types::FieldPath;
use crate::schema::{Schema, SchemaStore};
use mongodb::bson::Document;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Severity-to-score weights, fixed for testability.
pub const WEIGHT_CRITICAL: f64 = 0.5;
pub const WEIGHT_WARNING: f64 = 0.2;
pub const WEIGHT_INFO: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DriftFinding {
    pub level: Severity,
    pub field: FieldPath,
    pub message: String,
}

/// The outcome of one drift check.
#[derive(Debug)]
pub struct DriftReport {
    pub changes: ChangeSet,
    pub findings: Vec<DriftFinding>,
    pub drift_score: f64,
    pub has_drift: bool,
    pub sampled: u64,
}

impl DriftReport {
    /// The change-set JSON extended with severity, score, and flag.
    pub fn to_json(&self) -> Value {
        let mut json = self.changes.to_json();
        let severity: Vec<Value> = self
            .findings
            .iter()
            .map(|f| {
                json!({
                    "level": f.level.as_str(),
                    "field": f.field.to_string(),
                    "message": f.message,
                })
            })
            .collect();
        json["severity"] = Value::Array(severity);
        json["drift_score"] = json!(self.drift_score);
        json["has_drift"] = json!(self.has_drift);
        json
    }
}

/// Classify a surviving change. Returns `None` for changes that only narrow
/// the declared shape; those are not drift.
fn classify(change: &Change) -> Option<DriftFinding> {
    match change {
        Change::Added { path, types } => Some(DriftFinding {
            level: Severity::Info,
            field: path.clone(),
            message: format!("new field in live data (observed {})", types),
        }),
        Change::Removed { path, .. } => Some(DriftFinding {
            level: Severity::Warning,
            field: path.clone(),
            message: "declared field missing from live data".to_string(),
        }),
        Change::TypeChanged { path, from, to } => {
            if to.is_strict_subset(from) {
                return None;
            }
            Some(DriftFinding {
                level: Severity::Critical,
                field: path.clone(),
                message: format!("type changed from {} to {}", from, to),
            })
        }
        Change::ItemsChanged { path, from, to } => {
            if to.is_strict_subset(from) {
                return None;
            }
            Some(DriftFinding {
                level: Severity::Critical,
                field: path.clone(),
                message: format!("array items changed from {} to {}", from, to),
            })
        }
        Change::PresenceChanged { path, from_required, to_required } => {
            if !from_required && *to_required {
                return None;
            }
            Some(DriftFinding {
                level: Severity::Warning,
                field: path.clone(),
                message: "declared required but optional in live data".to_string(),
            })
        }
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Compare a declared schema against a live sample.
pub fn detect(expected: &Schema, live_docs: &[Document]) -> DriftReport {
    let observed = infer::infer_docs(live_docs);
    let raw = diff(expected, &observed.schema);

    let mut changes = ChangeSet::default();
    let mut findings = Vec::new();
    let mut retain = |bucket: &mut Vec<Change>, change: &Change| {
        if let Some(finding) = classify(change) {
            findings.push(finding);
            bucket.push(change.clone());
        }
    };
    for change in &raw.added {
        retain(&mut changes.added, change);
    }
    for change in &raw.removed {
        retain(&mut changes.removed, change);
    }
    for change in &raw.changed {
        retain(&mut changes.changed, change);
    }

    let critical = findings.iter().filter(|f| f.level == Severity::Critical).count() as f64;
    let warning = findings.iter().filter(|f| f.level == Severity::Warning).count() as f64;
    let info = findings.iter().filter(|f| f.level == Severity::Info).count() as f64;

    let weighted = WEIGHT_CRITICAL * critical + WEIGHT_WARNING * warning + WEIGHT_INFO * info;
    let drift_score = round2(weighted.min(1.0) / expected.field_count().max(1) as f64);
    let has_drift = findings.iter().any(|f| f.level >= Severity::Warning);

    DriftReport {
        changes,
        findings,
        drift_score,
        has_drift,
        sampled: observed.sampled,
    }
}

/// Sample a collection and compare it against its declared schema.
pub fn check_collection(
    adapter: &dyn DatabaseAdapter,
    collection: &str,
    expected: &Schema,
    sample_size: usize,
) -> Result<DriftReport> {
    let docs = adapter.sample(collection, sample_size)?;
    let report = detect(expected, &docs);
    info!(
        "Drift check '{}': score {:.2}, {} finding(s) over {} sampled documents",
        collection,
        report.drift_score,
        report.findings.len(),
        report.sampled
    );
    Ok(report)
}

/// Options for the fixed-interval drift monitor.
pub struct MonitorOptions {
    pub interval: Duration,
    pub sample_size: usize,
    pub webhook: Option<String>,
}

/// Re-check the given collections on a fixed interval until cancelled.
///
/// Each collection is checked against the latest stored schema version;
/// collections without a stored schema are skipped with a warning. Drift
/// reports are posted verbatim to the webhook when one is configured.
pub fn watch(
    adapter: &dyn DatabaseAdapter,
    store: &SchemaStore,
    collections: &[String],
    options: &MonitorOptions,
    cancel: &AtomicBool,
) -> Result<()> {
    let notifier = match &options.webhook {
        Some(url) => Some(Notifier::new(url)?),
        None => None,
    };

    while !cancel.load(Ordering::Relaxed) {
        let started = chrono::Utc::now();
        for collection in collections {
            let expected = match store.load(collection, None) {
                Ok(schema) => schema,
                Err(e) => {
                    warn!("Skipping '{}': {}", collection, e);
                    continue;
                }
            };
            match check_collection(adapter, collection, &expected, options.sample_size) {
                Ok(report) if report.has_drift => {
                    warn!(
                        "Drift detected in '{}' (score {:.2})",
                        collection, report.drift_score
                    );
                    if let Some(notifier) = &notifier {
                        if let Err(e) = notifier.post(&report.to_json()) {
                            warn!("Webhook delivery failed for '{}': {}", collection, e);
                        }
                    }
                }
                Ok(_) => info!("No drift in '{}'", collection),
                // Sampling timeouts are retried on the next cycle.
                Err(e) => warn!("Drift check failed for '{}': {}", collection, e),
            }
        }
        info!(
            "Monitor cycle finished at {}, sleeping {}s",
            started.to_rfc3339(),
            options.interval.as_secs()
        );

        let mut remaining = options.interval;
        while remaining > Duration::ZERO && !cancel.load(Ordering::Relaxed) {
            let step = remaining.min(Duration::from_secs(1));
            std::thread::sleep(step);
            remaining -= step;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::{BsonType, TypeSet};
    use crate::schema::{Field, Node};
    use mongodb::bson::doc;

    fn schema_of(fields: Vec<Field>) -> Schema {
        Schema::new(fields)
    }

    #[test]
    fn test_type_drift_is_critical() {
        // Declared int32, live strings: one critical, score 0.5 over 1 field.
        let expected = schema_of(vec![Field::new(
            "age",
            Node::leaf(TypeSet::of(BsonType::Int32)),
        )]);
        let docs = vec![doc! { "age": "30" }, doc! { "age": "31" }];
        let report = detect(&expected, &docs);
        assert!(report.has_drift);
        assert!(report.drift_score >= 0.50);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].level, Severity::Critical);
        assert_eq!(report.findings[0].field, FieldPath::parse("age"));
    }

    #[test]
    fn test_widening_in_live_data_is_critical() {
        let expected = schema_of(vec![Field::new(
            "v",
            Node::leaf(TypeSet::of(BsonType::Int32)),
        )]);
        let docs = vec![doc! { "v": 1 }, doc! { "v": "x" }];
        let report = detect(&expected, &docs);
        assert!(report.findings.iter().any(|f| f.level == Severity::Critical));
    }

    #[test]
    fn test_narrowing_is_not_drift() {
        // Declared [string, object]; live data all strings. Not drift.
        let expected = schema_of(vec![Field::new(
            "address",
            Node::leaf(TypeSet::from_tags(&[BsonType::String, BsonType::Object])),
        )]);
        let docs = vec![doc! { "address": "10 main st" }];
        let report = detect(&expected, &docs);
        assert!(!report.has_drift);
        assert!(report.findings.is_empty());
        assert_eq!(report.drift_score, 0.0);
    }

    #[test]
    fn test_new_live_field_is_info_only() {
        let expected = schema_of(vec![Field::new(
            "name",
            Node::leaf(TypeSet::of(BsonType::String)),
        )]);
        let docs = vec![doc! { "name": "ada", "nick": "countess" }];
        let report = detect(&expected, &docs);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].level, Severity::Info);
        // Info alone does not set the drift flag.
        assert!(!report.has_drift);
    }

    #[test]
    fn test_missing_declared_field_is_warning() {
        let expected = schema_of(vec![
            Field::new("name", Node::leaf(TypeSet::of(BsonType::String))),
            Field::new("email", Node::leaf(TypeSet::of(BsonType::String))),
        ]);
        let docs = vec![doc! { "name": "ada" }];
        let report = detect(&expected, &docs);
        assert!(report.has_drift);
        let finding = report
            .findings
            .iter()
            .find(|f| f.field == FieldPath::parse("email"))
            .unwrap();
        assert_eq!(finding.level, Severity::Warning);
    }

    #[test]
    fn test_score_normalised_by_expected_fields() {
        let expected = schema_of(vec![
            Field::new("a", Node::leaf(TypeSet::of(BsonType::Int32))),
            Field::new("b", Node::leaf(TypeSet::of(BsonType::String))),
            Field::new("c", Node::leaf(TypeSet::of(BsonType::String))),
            Field::new("d", Node::leaf(TypeSet::of(BsonType::String))),
        ]);
        let docs = vec![doc! { "a": "not an int", "b": "x", "c": "y", "d": "z" }];
        let report = detect(&expected, &docs);
        // One critical over four declared fields.
        assert_eq!(report.drift_score, 0.13);
    }

    #[test]
    fn test_json_carries_severity_and_score() {
        let expected = schema_of(vec![Field::new(
            "age",
            Node::leaf(TypeSet::of(BsonType::Int32)),
        )]);
        let report = detect(&expected, &[doc! { "age": "30" }]);
        let json = report.to_json();
        assert_eq!(json["has_drift"], true);
        assert_eq!(json["severity"][0]["level"], "critical");
        assert_eq!(json["severity"][0]["field"], "age");
        assert!(json["drift_score"].as_f64().unwrap() >= 0.5);
        // The diff wire shape is still present underneath.
        assert!(json["summary"].is_object());
    }
}
