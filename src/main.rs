// src/main.rs

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use mongodb::bson::Bson;
use shale::config::Config;
use shale::db::{DatabaseAdapter, MongoStore, ValidationAction, ValidationLevel};
use shale::drift::{self, MonitorOptions};
use shale::exec::{self, ExecOptions, WriterSink};
use shale::infer;
use shale::notify::Notifier;
use shale::plan::{self, Plan};
use shale::schema::{Schema, SchemaStore, file};
use shale::validator;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "shale")]
#[command(author, version, about = "Schema inference, drift detection, and migration for MongoDB", long_about = None)]
struct Cli {
    /// MongoDB connection string (overrides configuration)
    #[arg(long, global = true)]
    uri: Option<String>,

    /// Database name (overrides configuration)
    #[arg(long, global = true)]
    db: Option<String>,

    /// Directory holding versioned schema files (default: ./schemas)
    #[arg(long, global = true)]
    schema_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Infer a schema from a live collection sample
    Infer {
        /// Collection name
        collection: String,
        /// Number of documents to sample
        #[arg(long)]
        sample_size: Option<usize>,
        /// Persist the result as the next schema version
        #[arg(long)]
        save: bool,
    },
    /// Infer and persist a schema version (shorthand for infer --save)
    Save {
        /// Collection name
        collection: String,
        /// Number of documents to sample
        #[arg(long)]
        sample_size: Option<usize>,
    },
    /// List stored schema versions for a collection
    Versions {
        /// Collection name
        collection: String,
    },
    /// Print a stored schema
    Show {
        /// Collection name
        collection: String,
        /// Schema version (default: latest)
        #[arg(long)]
        version: Option<u32>,
    },
    /// Compare two schemas
    Diff {
        /// Source schema: a YAML file path or collection[@vN]
        from: String,
        /// Target schema: a YAML file path or collection[@vN]
        to: String,
        /// Emit the change set as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compare a declared schema against live data
    Drift {
        /// Collection name (omit with --all)
        collection: Option<String>,
        /// Check every collection in the database
        #[arg(long)]
        all: bool,
        /// Schema version to check against (default: latest)
        #[arg(long)]
        version: Option<u32>,
        /// Number of documents to sample
        #[arg(long)]
        sample_size: Option<usize>,
        /// Emit drift reports as JSON
        #[arg(long)]
        json: bool,
        /// Post drifting reports to the configured webhook
        #[arg(long)]
        notify: bool,
    },
    /// Compile a migration plan from a schema pair
    Plan {
        /// Source schema: a YAML file path or collection[@vN]
        from: String,
        /// Target schema: a YAML file path or collection[@vN]
        to: String,
        /// Write the plan JSON to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Execute a migration plan against a collection
    Migrate {
        /// Collection name
        collection: String,
        /// Source schema (compiled with --to when --plan is absent)
        #[arg(long)]
        from: Option<String>,
        /// Target schema; also used for the validator refresh
        #[arg(long)]
        to: Option<String>,
        /// Load a previously compiled plan file
        #[arg(long)]
        plan: Option<PathBuf>,
        /// Evaluate without writing
        #[arg(long)]
        dry_run: bool,
        /// Documents per batch
        #[arg(long)]
        batch_size: Option<usize>,
        /// Minimum milliseconds between batches
        #[arg(long)]
        rate_limit_ms: Option<u64>,
        /// Resume strictly after this document key
        #[arg(long)]
        resume_from: Option<String>,
        /// Default for a non-nullable added field, as PATH=JSON
        #[arg(long = "set", value_name = "PATH=JSON")]
        set: Vec<String>,
        /// Apply the target schema's validator on success
        #[arg(long)]
        apply_validator: bool,
        /// Validation level for --apply-validator (off, moderate, strict)
        #[arg(long, default_value = "moderate")]
        level: String,
        /// Validation action for --apply-validator (warn, error)
        #[arg(long, default_value = "error")]
        action: String,
    },
    /// Project a stored schema onto the collection validator
    ApplyValidator {
        /// Collection name
        collection: String,
        /// Schema version (default: latest)
        #[arg(long)]
        version: Option<u32>,
        /// Validation level (off, moderate, strict)
        #[arg(long, default_value = "moderate")]
        level: String,
        /// Validation action (warn, error)
        #[arg(long, default_value = "error")]
        action: String,
    },
    /// Watch collections for drift on a fixed interval
    Monitor {
        /// Collection names (omit with --all)
        collections: Vec<String>,
        /// Watch every collection in the database
        #[arg(long)]
        all: bool,
        /// Seconds between checks
        #[arg(long, default_value = "300")]
        interval_secs: u64,
        /// Number of documents to sample per check
        #[arg(long)]
        sample_size: Option<usize>,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Resolve a schema reference: a YAML file path, `collection@vN`, or a
/// collection name (latest stored version).
fn resolve_schema(store: &SchemaStore, reference: &str) -> Result<Schema> {
    let path = Path::new(reference);
    if path.extension().is_some_and(|ext| ext == "yaml" || ext == "yml") {
        if !path.exists() {
            bail!("schema file not found: {}", reference);
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", reference))?;
        return Ok(file::parse(&text)?);
    }
    match reference.rsplit_once('@') {
        Some((collection, version)) => {
            let version: u32 = version
                .trim_start_matches('v')
                .parse()
                .with_context(|| format!("invalid version in '{}'", reference))?;
            Ok(store.load(collection, Some(version))?)
        }
        None => Ok(store.load(reference, None)?),
    }
}

fn connect(config: &Config) -> Result<MongoStore> {
    let uri = config.require_uri()?;
    let db = config.require_db()?;
    Ok(MongoStore::connect(uri, db)?)
}

/// Parse a `--set path=json` override. Values that are not valid JSON are
/// taken as plain strings.
fn parse_override(raw: &str) -> Result<(String, Bson)> {
    let Some((path, value)) = raw.split_once('=') else {
        bail!("--set expects PATH=JSON, got '{}'", raw);
    };
    let value = match serde_json::from_str::<Bson>(value) {
        Ok(bson) => bson,
        Err(_) => Bson::String(value.to_string()),
    };
    Ok((path.to_string(), value))
}

fn print_inference(report: &infer::InferenceReport) {
    print!("{}", file::emit(&report.schema));
    if !report.anomalies.is_empty() {
        println!("\n# Anomalies ({} sampled documents):", report.sampled);
        for anomaly in &report.anomalies {
            println!("#   [{}] {}: {}", anomaly.kind.as_str(), anomaly.path, anomaly.message);
        }
    }
    if !report.index_hints.is_empty() {
        println!("\n# Index candidates: {}", report.index_hints.join(", "));
    }
}

fn print_drift(collection: &str, report: &drift::DriftReport, json: bool) {
    if json {
        println!("{}", serde_json::to_string_pretty(&report.to_json()).unwrap_or_default());
        return;
    }
    println!(
        "{}: drift score {:.2} ({} finding(s), {} sampled)",
        collection,
        report.drift_score,
        report.findings.len(),
        report.sampled
    );
    for finding in &report.findings {
        println!("  [{}] {}: {}", finding.level.as_str(), finding.field, finding.message);
    }
}

fn run_migrate(
    config: &Config,
    store: &SchemaStore,
    collection: &str,
    from: Option<&str>,
    to: Option<&str>,
    plan_file: Option<&Path>,
    options: ExecOptions,
) -> Result<()> {
    let plan = match plan_file {
        Some(path) => Plan::load(path)?,
        None => {
            let (Some(from), Some(to)) = (from, to) else {
                bail!("migrate needs either --plan or both --from and --to");
            };
            plan::compile(&resolve_schema(store, from)?, &resolve_schema(store, to)?)
        }
    };
    if plan.is_empty() {
        info!("Plan is empty; nothing to do beyond a consistency pass");
    }
    let target = match to {
        Some(reference) => Some(resolve_schema(store, reference)?),
        None => None,
    };

    let adapter = connect(config)?;
    let mut sink = WriterSink(io::stdout());
    let cancel = AtomicBool::new(false);
    let report = exec::execute(
        &adapter,
        collection,
        &plan,
        target.as_ref(),
        &options,
        &mut sink,
        &cancel,
    )?;

    println!(
        "{}: processed {}, matched {}, modified {}{}",
        if options.dry_run { "Dry run" } else { "Migration" },
        report.processed,
        report.matched,
        report.modified,
        if options.dry_run {
            format!(" (would modify {})", report.would_modify)
        } else {
            String::new()
        }
    );
    if report.skipped_total() > 0 {
        println!("Skipped documents by reason:");
        for (reason, count) in &report.skipped {
            println!("  {}: {}", reason, count);
        }
    }
    if let Some(last_key) = &report.last_key {
        println!("Last processed key: {}", last_key);
    }
    Ok(())
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(uri) = cli.uri {
        config.mongodb_uri = Some(uri);
    }
    if let Some(db) = cli.db {
        config.default_db = Some(db);
    }
    if let Some(dir) = cli.schema_dir {
        config.schema_dir = dir;
    }
    let store = SchemaStore::new(config.schema_dir.clone());

    match cli.command {
        Commands::Infer { collection, sample_size, save } => {
            let adapter = connect(&config)?;
            let sample_size = sample_size.unwrap_or(config.sample_size);
            let report = infer::infer_collection(&adapter, &collection, sample_size)?;
            print_inference(&report);
            if save {
                let version = store.save(&collection, &report.schema)?;
                println!("\n# Saved as {} v{}", collection, version);
            }
            Ok(())
        }
        Commands::Save { collection, sample_size } => {
            let adapter = connect(&config)?;
            let sample_size = sample_size.unwrap_or(config.sample_size);
            let report = infer::infer_collection(&adapter, &collection, sample_size)?;
            let version = store.save(&collection, &report.schema)?;
            println!("Saved schema for '{}' as v{}", collection, version);
            for anomaly in &report.anomalies {
                warn!("[{}] {}: {}", anomaly.kind.as_str(), anomaly.path, anomaly.message);
            }
            Ok(())
        }
        Commands::Versions { collection } => {
            let versions = store.versions(&collection)?;
            if versions.is_empty() {
                println!("No stored schemas for '{}'", collection);
            } else {
                for version in versions {
                    println!("{} v{}", collection, version);
                }
            }
            Ok(())
        }
        Commands::Show { collection, version } => {
            let schema = store.load(&collection, version)?;
            print!("{}", file::emit(&schema));
            Ok(())
        }
        Commands::Diff { from, to, json } => {
            let from_schema = resolve_schema(&store, &from)?;
            let to_schema = resolve_schema(&store, &to)?;
            let changes = shale::diff::diff(&from_schema, &to_schema);
            if json {
                println!("{}", serde_json::to_string_pretty(&changes.to_json())?);
            } else if changes.is_empty() {
                println!("Schemas are structurally identical");
            } else {
                for change in changes.iter() {
                    println!("{:>16}  {}", change.kind(), change.path());
                }
                println!(
                    "\n{} added, {} removed, {} changed",
                    changes.added.len(),
                    changes.removed.len(),
                    changes.changed.len()
                );
            }
            Ok(())
        }
        Commands::Drift { collection, all, version, sample_size, json, notify } => {
            let adapter = connect(&config)?;
            let sample_size = sample_size.unwrap_or(config.sample_size);
            let collections = if all {
                adapter.list_collections()?
            } else {
                match collection {
                    Some(name) => vec![name],
                    None => bail!("drift needs a collection name or --all"),
                }
            };

            let notifier = match (&config.webhook_url, notify) {
                (Some(url), true) => Some(Notifier::new(url)?),
                (None, true) => bail!("--notify needs webhook_url in the configuration"),
                _ => None,
            };

            let mut any_drift = false;
            for name in &collections {
                let expected = match store.load(name, version) {
                    Ok(schema) => schema,
                    Err(e) if all => {
                        warn!("Skipping '{}': {}", name, e);
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                let report = drift::check_collection(&adapter, name, &expected, sample_size)?;
                print_drift(name, &report, json);
                if report.has_drift {
                    any_drift = true;
                    if let Some(notifier) = &notifier {
                        notifier.post(&report.to_json())?;
                    }
                }
            }
            if any_drift {
                std::process::exit(2);
            }
            Ok(())
        }
        Commands::Plan { from, to, output } => {
            let from_schema = resolve_schema(&store, &from)?;
            let to_schema = resolve_schema(&store, &to)?;
            let plan = plan::compile(&from_schema, &to_schema);
            for path in plan.requires_input() {
                warn!(
                    "Operation on '{}' needs an operator default (--set {}=VALUE at migrate time)",
                    path, path
                );
            }
            match output {
                Some(path) => {
                    plan.save(&path)?;
                    println!("Wrote {} operation(s) to {}", plan.len(), path.display());
                }
                None => println!("{}", serde_json::to_string_pretty(&plan.to_json())?),
            }
            Ok(())
        }
        Commands::Migrate {
            collection,
            from,
            to,
            plan,
            dry_run,
            batch_size,
            rate_limit_ms,
            resume_from,
            set,
            apply_validator,
            level,
            action,
        } => {
            let mut overrides = BTreeMap::new();
            for raw in &set {
                let (path, value) = parse_override(raw)?;
                overrides.insert(path, value);
            }
            let options = ExecOptions {
                dry_run,
                batch_size: batch_size.unwrap_or(config.batch_size),
                rate_limit: Duration::from_millis(rate_limit_ms.unwrap_or(config.rate_limit_ms)),
                resume_from,
                overrides,
                apply_validator,
                validation_level: level.parse::<ValidationLevel>().map_err(anyhow::Error::msg)?,
                validation_action: action.parse::<ValidationAction>().map_err(anyhow::Error::msg)?,
            };
            run_migrate(
                &config,
                &store,
                &collection,
                from.as_deref(),
                to.as_deref(),
                plan.as_deref(),
                options,
            )
        }
        Commands::ApplyValidator { collection, version, level, action } => {
            let schema = store.load(&collection, version)?;
            let adapter = connect(&config)?;
            adapter.set_validator(
                &collection,
                validator::project(&schema),
                level.parse::<ValidationLevel>().map_err(anyhow::Error::msg)?,
                action.parse::<ValidationAction>().map_err(anyhow::Error::msg)?,
            )?;
            println!("Applied validator to '{}'", collection);
            Ok(())
        }
        Commands::Monitor { collections, all, interval_secs, sample_size } => {
            let adapter = connect(&config)?;
            let collections = if all {
                adapter.list_collections()?
            } else if collections.is_empty() {
                bail!("monitor needs collection names or --all");
            } else {
                collections
            };
            info!(
                "Monitoring {} collection(s) every {}s",
                collections.len(),
                interval_secs
            );
            let options = MonitorOptions {
                interval: Duration::from_secs(interval_secs),
                sample_size: sample_size.unwrap_or(config.sample_size),
                webhook: config.webhook_url.clone(),
            };
            let cancel = AtomicBool::new(false);
            drift::watch(&adapter, &store, &collections, &options, &cancel)?;
            Ok(())
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "shale", &mut io::stdout());
            Ok(())
        }
    }
}
