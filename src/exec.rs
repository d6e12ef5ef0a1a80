// src/exec.rs

//! Plan execution: streaming a collection through an operation list in
//! rate-limited batches.
//!
//! The batch loop is pure given the adapter's outputs: for every document
//! it computes the mutation set (the subset of operations that actually
//! change that document), so re-running a plan is a no-op and resuming from
//! the last processed key converges to the same end state. Failures that
//! are scoped to one document are counted by reason and the batch
//! continues; adapter failures abort the run with the resume key logged.

use crate::db::{self, DatabaseAdapter, ValidationAction, ValidationLevel};
use crate::error::{Error, Result};
use crate::plan::{Plan, PlanOp};
use crate::schema::Schema;
use crate::schema::types::BsonType;
use crate::validator;
use mongodb::bson::{Bson, Document};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default documents per batch.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Skip reasons counted per document.
pub const SKIP_CONVERT_FAILED: &str = "convert_failed";
pub const SKIP_UNWRAP_MULTI: &str = "unwrap_multi";
pub const SKIP_WRITE_ERROR: &str = "write_error";
pub const SKIP_MISSING_DEFAULT: &str = "missing_default";

/// Execution options.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub dry_run: bool,
    /// Documents per batch; must be at least 1.
    pub batch_size: usize,
    /// Minimum pause between batches.
    pub rate_limit: Duration,
    /// Resume strictly after this document key.
    pub resume_from: Option<String>,
    /// Operator-supplied defaults for `add_field` operations that carry
    /// none, keyed by dotted path.
    pub overrides: BTreeMap<String, Bson>,
    /// Refresh the collection validator from the target schema on success.
    pub apply_validator: bool,
    pub validation_level: ValidationLevel,
    pub validation_action: ValidationAction,
}

impl Default for ExecOptions {
    fn default() -> Self {
        ExecOptions {
            dry_run: false,
            batch_size: DEFAULT_BATCH_SIZE,
            rate_limit: Duration::ZERO,
            resume_from: None,
            overrides: BTreeMap::new(),
            apply_validator: false,
            validation_level: ValidationLevel::Moderate,
            validation_action: ValidationAction::Error,
        }
    }
}

/// Progress record emitted after every batch.
#[derive(Debug, Clone, Serialize)]
pub struct Progress {
    pub processed: u64,
    pub matched: u64,
    pub modified: u64,
    pub skipped: u64,
    pub last_key: Option<String>,
}

/// Abstract consumer of progress records; the CLI is one implementation.
pub trait ProgressSink {
    fn emit(&mut self, progress: &Progress);
}

/// Discards progress.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&mut self, _progress: &Progress) {}
}

/// Writes progress records as JSON lines.
pub struct WriterSink<W: Write>(pub W);

impl<W: Write> ProgressSink for WriterSink<W> {
    fn emit(&mut self, progress: &Progress) {
        if let Ok(line) = serde_json::to_string(progress) {
            let _ = writeln!(self.0, "{}", line);
        }
    }
}

/// Final tally of one executor run.
#[derive(Debug, Default)]
pub struct ExecReport {
    pub processed: u64,
    pub matched: u64,
    pub modified: u64,
    /// Documents that would change, counted only under `dry_run`.
    pub would_modify: u64,
    pub skipped: BTreeMap<String, u64>,
    pub last_key: Option<String>,
    pub cancelled: bool,
}

impl ExecReport {
    pub fn skipped_total(&self) -> u64 {
        self.skipped.values().sum()
    }
}

/// The evaluated mutation set for one document.
#[derive(Debug, Default)]
struct DocEval {
    set: Document,
    unset: Document,
    ops: usize,
    skips: Vec<&'static str>,
}

impl DocEval {
    fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }

    fn into_mutation(self) -> Document {
        let mut mutation = Document::new();
        if !self.set.is_empty() {
            mutation.insert("$set", self.set);
        }
        if !self.unset.is_empty() {
            mutation.insert("$unset", self.unset);
        }
        mutation
    }
}

/// Convert a value to a target type the way the engine's conversion
/// primitive would. `None` is a per-document conversion failure.
fn convert_value(value: &Bson, to: BsonType) -> Option<Bson> {
    match to {
        BsonType::Int32 => match value {
            Bson::Int32(n) => Some(Bson::Int32(*n)),
            Bson::Int64(n) => i32::try_from(*n).ok().map(Bson::Int32),
            Bson::Double(f) if f.is_finite() && (i32::MIN as f64..=i32::MAX as f64).contains(f) => {
                Some(Bson::Int32(f.trunc() as i32))
            }
            Bson::String(s) => s.trim().parse::<i32>().ok().map(Bson::Int32),
            Bson::Boolean(b) => Some(Bson::Int32(i32::from(*b))),
            _ => None,
        },
        BsonType::Int64 => match value {
            Bson::Int64(n) => Some(Bson::Int64(*n)),
            Bson::Int32(n) => Some(Bson::Int64(i64::from(*n))),
            Bson::Double(f) if f.is_finite() && (i64::MIN as f64..=i64::MAX as f64).contains(f) => {
                Some(Bson::Int64(f.trunc() as i64))
            }
            Bson::String(s) => s.trim().parse::<i64>().ok().map(Bson::Int64),
            Bson::Boolean(b) => Some(Bson::Int64(i64::from(*b))),
            _ => None,
        },
        BsonType::Double => match value {
            Bson::Double(f) => Some(Bson::Double(*f)),
            Bson::Int32(n) => Some(Bson::Double(f64::from(*n))),
            Bson::Int64(n) => Some(Bson::Double(*n as f64)),
            Bson::String(s) => s.trim().parse::<f64>().ok().map(Bson::Double),
            Bson::Boolean(b) => Some(Bson::Double(f64::from(u8::from(*b)))),
            Bson::Decimal128(d) => d.to_string().parse::<f64>().ok().map(Bson::Double),
            _ => None,
        },
        BsonType::Decimal => {
            let repr = match value {
                Bson::Decimal128(d) => return Some(Bson::Decimal128(*d)),
                Bson::Int32(n) => n.to_string(),
                Bson::Int64(n) => n.to_string(),
                Bson::Double(f) => f.to_string(),
                Bson::String(s) => s.trim().to_string(),
                _ => return None,
            };
            repr.parse().ok().map(Bson::Decimal128)
        }
        BsonType::String => match value {
            Bson::String(s) => Some(Bson::String(s.clone())),
            Bson::Int32(n) => Some(Bson::String(n.to_string())),
            Bson::Int64(n) => Some(Bson::String(n.to_string())),
            Bson::Double(f) => Some(Bson::String(f.to_string())),
            Bson::Boolean(b) => Some(Bson::String(b.to_string())),
            Bson::ObjectId(oid) => Some(Bson::String(oid.to_hex())),
            Bson::Decimal128(d) => Some(Bson::String(d.to_string())),
            Bson::DateTime(dt) => dt.try_to_rfc3339_string().ok().map(Bson::String),
            _ => None,
        },
        BsonType::Bool => match value {
            Bson::Boolean(b) => Some(Bson::Boolean(*b)),
            Bson::Int32(n) => Some(Bson::Boolean(*n != 0)),
            Bson::Int64(n) => Some(Bson::Boolean(*n != 0)),
            Bson::Double(f) => Some(Bson::Boolean(*f != 0.0)),
            Bson::String(s) => match s.as_str() {
                "true" => Some(Bson::Boolean(true)),
                "false" => Some(Bson::Boolean(false)),
                _ => None,
            },
            _ => None,
        },
        BsonType::Date => match value {
            Bson::DateTime(dt) => Some(Bson::DateTime(*dt)),
            Bson::Int64(millis) => Some(Bson::DateTime(mongodb::bson::DateTime::from_millis(*millis))),
            Bson::String(s) => mongodb::bson::DateTime::parse_rfc3339_str(s).ok().map(Bson::DateTime),
            _ => None,
        },
        BsonType::ObjectId => match value {
            Bson::ObjectId(oid) => Some(Bson::ObjectId(*oid)),
            Bson::String(s) => mongodb::bson::oid::ObjectId::parse_str(s).ok().map(Bson::ObjectId),
            _ => None,
        },
        _ => None,
    }
}

/// Compute the subset of operations that actually change this document.
fn evaluate(doc: &Document, plan: &Plan, overrides: &BTreeMap<String, Bson>) -> DocEval {
    let mut eval = DocEval::default();
    for op in &plan.ops {
        let key = op.path().to_string();
        let segments = op.path().segments();
        match op {
            PlanOp::AddField { .. } => {
                if db::get_path(doc, segments).is_none() {
                    match overrides.get(&key).cloned().or_else(|| op.effective_default()) {
                        Some(value) => {
                            eval.set.insert(key, value);
                            eval.ops += 1;
                        }
                        None => eval.skips.push(SKIP_MISSING_DEFAULT),
                    }
                }
            }
            PlanOp::RemoveField { .. } => {
                if db::get_path(doc, segments).is_some() {
                    eval.unset.insert(key, Bson::String(String::new()));
                    eval.ops += 1;
                }
            }
            PlanOp::Convert { to, .. } => {
                if let Some(value) = db::get_path(doc, segments) {
                    let tag = BsonType::of(value);
                    // Nulls stay null; the nullable marker is not converted.
                    if tag == *to || tag == BsonType::Null {
                        continue;
                    }
                    match convert_value(value, *to) {
                        Some(converted) => {
                            eval.set.insert(key, converted);
                            eval.ops += 1;
                        }
                        None => eval.skips.push(SKIP_CONVERT_FAILED),
                    }
                }
            }
            PlanOp::WrapArray { .. } => {
                if let Some(value) = db::get_path(doc, segments) {
                    let tag = BsonType::of(value);
                    if tag != BsonType::Array && tag != BsonType::Null {
                        eval.set.insert(key, Bson::Array(vec![value.clone()]));
                        eval.ops += 1;
                    }
                }
            }
            PlanOp::UnwrapArray { .. } => {
                if let Some(Bson::Array(elements)) = db::get_path(doc, segments) {
                    match elements.len() {
                        0 => {
                            eval.set.insert(key, Bson::Null);
                            eval.ops += 1;
                        }
                        1 => {
                            eval.set.insert(key, elements[0].clone());
                            eval.ops += 1;
                        }
                        _ => eval.skips.push(SKIP_UNWRAP_MULTI),
                    }
                }
            }
            PlanOp::ConvertItems { to, .. } => {
                if let Some(Bson::Array(elements)) = db::get_path(doc, segments) {
                    let mut converted = Vec::with_capacity(elements.len());
                    let mut changed = false;
                    let mut failed = false;
                    for element in elements {
                        let tag = BsonType::of(element);
                        if tag == *to || tag == BsonType::Null {
                            converted.push(element.clone());
                            continue;
                        }
                        match convert_value(element, *to) {
                            Some(value) => {
                                converted.push(value);
                                changed = true;
                            }
                            None => {
                                failed = true;
                                break;
                            }
                        }
                    }
                    if failed {
                        eval.skips.push(SKIP_CONVERT_FAILED);
                    } else if changed {
                        eval.set.insert(key, Bson::Array(converted));
                        eval.ops += 1;
                    }
                }
            }
        }
    }
    eval
}

/// Stream `collection` through `plan` in batches.
///
/// `target` is consulted only for the validator refresh on success; pass
/// `None` when `apply_validator` is off. Cancellation is honoured at batch
/// boundaries; the report carries the resume key either way.
pub fn execute(
    adapter: &dyn DatabaseAdapter,
    collection: &str,
    plan: &Plan,
    target: Option<&Schema>,
    options: &ExecOptions,
    sink: &mut dyn ProgressSink,
    cancel: &AtomicBool,
) -> Result<ExecReport> {
    if options.batch_size == 0 {
        return Err(Error::Config("batch size must be at least 1".to_string()));
    }
    if options.apply_validator && target.is_none() {
        return Err(Error::Config(
            "validator refresh requires a target schema".to_string(),
        ));
    }
    // Refuse before any I/O when an add_field still needs operator input.
    for path in plan.requires_input() {
        if !options.overrides.contains_key(&path.to_string()) {
            return Err(Error::PlanRequiresInput { path: path.to_string() });
        }
    }

    info!(
        "{} plan with {} operation(s) against '{}' (batch size {})",
        if options.dry_run { "Dry-running" } else { "Executing" },
        plan.len(),
        collection,
        options.batch_size
    );

    let mut report = ExecReport {
        last_key: options.resume_from.clone(),
        ..ExecReport::default()
    };
    let mut stream = adapter.iterate(collection, options.resume_from.as_deref())?;

    loop {
        let mut batch = Vec::with_capacity(options.batch_size);
        for item in stream.by_ref().take(options.batch_size) {
            batch.push(item?);
        }
        if batch.is_empty() {
            break;
        }

        for (key, doc) in &batch {
            report.processed += 1;
            report.matched += 1;
            let eval = evaluate(doc, plan, &options.overrides);
            for reason in &eval.skips {
                *report.skipped.entry(reason.to_string()).or_insert(0) += 1;
            }
            if options.dry_run {
                if !eval.is_empty() {
                    report.would_modify += 1;
                }
                debug!(
                    "dry-run {}: {} operation(s), {} skip(s)",
                    key,
                    eval.ops,
                    eval.skips.len()
                );
                report.last_key = Some(key.clone());
                continue;
            }
            if eval.is_empty() {
                report.last_key = Some(key.clone());
                continue;
            }
            match adapter.update_one(collection, key, eval.into_mutation()) {
                Ok(outcome) => {
                    report.modified += outcome.modified;
                    report.last_key = Some(key.clone());
                }
                Err(e) if db::is_per_document_error(&e) => {
                    warn!("Update of document {} failed: {}", key, e);
                    *report.skipped.entry(SKIP_WRITE_ERROR.to_string()).or_insert(0) += 1;
                    report.last_key = Some(key.clone());
                }
                Err(e) => {
                    error!(
                        "Run aborted: {}. Resume with --resume-from {}",
                        e,
                        report.last_key.as_deref().unwrap_or("<start>")
                    );
                    return Err(e);
                }
            }
        }

        sink.emit(&Progress {
            processed: report.processed,
            matched: report.matched,
            modified: report.modified,
            skipped: report.skipped_total(),
            last_key: report.last_key.clone(),
        });

        if cancel.load(Ordering::Relaxed) {
            report.cancelled = true;
            info!(
                "Cancelled at batch boundary; resume from {}",
                report.last_key.as_deref().unwrap_or("<start>")
            );
            break;
        }
        if !options.rate_limit.is_zero() {
            std::thread::sleep(options.rate_limit);
        }
    }

    if options.apply_validator && !options.dry_run && !report.cancelled {
        if let Some(schema) = target {
            adapter.set_validator(
                collection,
                validator::project(schema),
                options.validation_level,
                options.validation_action,
            )?;
        }
    }

    info!(
        "Processed {} document(s): {} modified, {} skipped",
        report.processed,
        report.modified,
        report.skipped_total()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::plan;
    use crate::schema::types::{FieldPath, TypeSet};
    use crate::schema::{Field, Node, Schema};
    use mongodb::bson::doc;

    struct CollectSink(Vec<Progress>);

    impl ProgressSink for CollectSink {
        fn emit(&mut self, progress: &Progress) {
            self.0.push(progress.clone());
        }
    }

    fn run(
        store: &MemoryStore,
        plan: &Plan,
        options: &ExecOptions,
    ) -> (ExecReport, Vec<Progress>) {
        let mut sink = CollectSink(Vec::new());
        let cancel = AtomicBool::new(false);
        let report = execute(store, "users", plan, None, options, &mut sink, &cancel).unwrap();
        (report, sink.0)
    }

    #[test]
    fn test_convert_value_table() {
        assert_eq!(convert_value(&Bson::String("30".into()), BsonType::Int32), Some(Bson::Int32(30)));
        assert_eq!(convert_value(&Bson::String("x".into()), BsonType::Int32), None);
        assert_eq!(convert_value(&Bson::Int32(5), BsonType::String), Some(Bson::String("5".into())));
        assert_eq!(convert_value(&Bson::Int64(1 << 40), BsonType::Int32), None);
        assert_eq!(convert_value(&Bson::Double(3.9), BsonType::Int32), Some(Bson::Int32(3)));
        assert_eq!(convert_value(&Bson::Int32(0), BsonType::Bool), Some(Bson::Boolean(false)));
        assert_eq!(convert_value(&Bson::Document(doc! {}), BsonType::Int32), None);
    }

    #[test]
    fn test_evaluate_add_only_when_absent() {
        let plan = Plan {
            ops: vec![PlanOp::AddField {
                path: FieldPath::parse("nick"),
                types: TypeSet::from_tags(&[BsonType::String, BsonType::Null]),
                default: Some(Bson::Null),
                requires_input: false,
            }],
        };
        let eval = evaluate(&doc! { "name": "ada" }, &plan, &BTreeMap::new());
        assert_eq!(eval.set.get("nick"), Some(&Bson::Null));
        let eval = evaluate(&doc! { "nick": "lady" }, &plan, &BTreeMap::new());
        assert!(eval.is_empty());
    }

    #[test]
    fn test_evaluate_unwrap_policy() {
        let plan = Plan {
            ops: vec![PlanOp::UnwrapArray { path: FieldPath::parse("tag") }],
        };
        let one = evaluate(&doc! { "tag": ["a"] }, &plan, &BTreeMap::new());
        assert_eq!(one.set.get("tag"), Some(&Bson::String("a".into())));
        let empty = evaluate(&doc! { "tag": [] }, &plan, &BTreeMap::new());
        assert_eq!(empty.set.get("tag"), Some(&Bson::Null));
        let multi = evaluate(&doc! { "tag": ["a", "b"] }, &plan, &BTreeMap::new());
        assert_eq!(multi.skips, vec![SKIP_UNWRAP_MULTI]);
        assert!(multi.is_empty());
    }

    #[test]
    fn test_evaluate_convert_items() {
        let plan = Plan {
            ops: vec![PlanOp::ConvertItems { path: FieldPath::parse("nums"), to: BsonType::Int32 }],
        };
        let eval = evaluate(&doc! { "nums": ["1", 2, Bson::Null] }, &plan, &BTreeMap::new());
        assert_eq!(
            eval.set.get("nums"),
            Some(&Bson::Array(vec![Bson::Int32(1), Bson::Int32(2), Bson::Null]))
        );
        let eval = evaluate(&doc! { "nums": ["1", "x"] }, &plan, &BTreeMap::new());
        assert_eq!(eval.skips, vec![SKIP_CONVERT_FAILED]);
    }

    #[test]
    fn test_execute_convert_counts_success_and_skip() {
        let store = MemoryStore::new();
        store.insert("users", "a", doc! { "age": "30" });
        store.insert("users", "b", doc! { "age": "x" });
        let plan = Plan {
            ops: vec![PlanOp::Convert { path: FieldPath::parse("age"), to: BsonType::Int32 }],
        };
        let (report, _) = run(&store, &plan, &ExecOptions::default());
        assert_eq!(report.processed, 2);
        assert_eq!(report.modified, 1);
        assert_eq!(report.skipped.get(SKIP_CONVERT_FAILED), Some(&1));
        assert_eq!(store.get("users", "a").unwrap(), doc! { "age": 30 });
        assert_eq!(store.get("users", "b").unwrap(), doc! { "age": "x" });
    }

    #[test]
    fn test_execute_is_idempotent() {
        let store = MemoryStore::new();
        store.insert("users", "a", doc! { "tag": "x" });
        let plan = Plan {
            ops: vec![PlanOp::WrapArray {
                path: FieldPath::parse("tag"),
                item_type: BsonType::String,
            }],
        };
        let (first, _) = run(&store, &plan, &ExecOptions::default());
        assert_eq!(first.modified, 1);
        assert_eq!(store.get("users", "a").unwrap(), doc! { "tag": ["x"] });

        let (second, _) = run(&store, &plan, &ExecOptions::default());
        assert_eq!(second.processed, 1);
        assert_eq!(second.modified, 0);
        assert_eq!(store.get("users", "a").unwrap(), doc! { "tag": ["x"] });
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let store = MemoryStore::new();
        store.insert("users", "a", doc! { "age": "30" });
        let plan = Plan {
            ops: vec![PlanOp::Convert { path: FieldPath::parse("age"), to: BsonType::Int32 }],
        };
        let options = ExecOptions { dry_run: true, ..ExecOptions::default() };
        let (report, _) = run(&store, &plan, &options);
        assert_eq!(report.would_modify, 1);
        assert_eq!(report.modified, 0);
        assert_eq!(store.get("users", "a").unwrap(), doc! { "age": "30" });
    }

    #[test]
    fn test_refuses_add_without_default_or_override() {
        let store = MemoryStore::new();
        store.insert("users", "a", doc! {});
        let plan = Plan {
            ops: vec![PlanOp::AddField {
                path: FieldPath::parse("email"),
                types: TypeSet::of(BsonType::String),
                default: None,
                requires_input: true,
            }],
        };
        let mut sink = NullSink;
        let cancel = AtomicBool::new(false);
        let result = execute(
            &store,
            "users",
            &plan,
            None,
            &ExecOptions::default(),
            &mut sink,
            &cancel,
        );
        match result {
            Err(Error::PlanRequiresInput { path }) => assert_eq!(path, "email"),
            other => panic!("expected PlanRequiresInput, got {:?}", other),
        }

        // An operator override unblocks it.
        let mut overrides = BTreeMap::new();
        overrides.insert("email".to_string(), Bson::String("unknown@example.com".into()));
        let options = ExecOptions { overrides, ..ExecOptions::default() };
        let (report, _) = run(&store, &plan, &options);
        assert_eq!(report.modified, 1);
        assert_eq!(
            store.get("users", "a").unwrap(),
            doc! { "email": "unknown@example.com" }
        );
    }

    #[test]
    fn test_progress_emitted_per_batch() {
        let store = MemoryStore::new();
        for i in 0..10 {
            store.insert("users", &format!("k{:02}", i), doc! { "n": i });
        }
        let plan = Plan { ops: vec![] };
        let options = ExecOptions { batch_size: 4, ..ExecOptions::default() };
        let (report, progress) = run(&store, &plan, &options);
        assert_eq!(report.processed, 10);
        assert_eq!(report.matched, 10);
        assert_eq!(report.modified, 0);
        assert_eq!(progress.len(), 3);
        assert_eq!(progress[0].processed, 4);
        assert_eq!(progress[2].last_key.as_deref(), Some("k09"));
    }

    #[test]
    fn test_cancellation_at_batch_boundary() {
        let store = MemoryStore::new();
        for i in 0..10 {
            store.insert("users", &format!("k{:02}", i), doc! { "n": i });
        }
        let plan = Plan { ops: vec![] };
        let options = ExecOptions { batch_size: 3, ..ExecOptions::default() };
        let mut sink = NullSink;
        let cancel = AtomicBool::new(true);
        let report =
            execute(&store, "users", &plan, None, &options, &mut sink, &cancel).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.processed, 3);
        assert_eq!(report.last_key.as_deref(), Some("k02"));
    }

    #[test]
    fn test_apply_validator_on_success() {
        let store = MemoryStore::new();
        store.insert("users", "a", doc! { "name": "ada" });
        let target = Schema::new(vec![Field::new(
            "name",
            Node::leaf(TypeSet::of(BsonType::String)),
        )]);
        let plan = plan::compile(&target, &target);
        let options = ExecOptions { apply_validator: true, ..ExecOptions::default() };
        let mut sink = NullSink;
        let cancel = AtomicBool::new(false);
        execute(&store, "users", &plan, Some(&target), &options, &mut sink, &cancel).unwrap();
        let validator = store.validator("users").unwrap();
        assert_eq!(validator.get_str("bsonType").unwrap(), "object");
    }

    #[test]
    fn test_zero_batch_size_is_config_error() {
        let store = MemoryStore::new();
        let plan = Plan { ops: vec![] };
        let options = ExecOptions { batch_size: 0, ..ExecOptions::default() };
        let mut sink = NullSink;
        let cancel = AtomicBool::new(false);
        let result = execute(&store, "users", &plan, None, &options, &mut sink, &cancel);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
