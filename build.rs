// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("shale")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Shale Contributors")
        .about("Schema inference, drift detection, and migration for MongoDB")
        .subcommand_required(false)
        .subcommand(
            Command::new("infer")
                .about("Infer a schema from a live collection sample")
                .arg(Arg::new("collection").required(true).help("Collection name"))
                .arg(Arg::new("sample_size").long("sample-size").help("Documents to sample"))
                .arg(
                    Arg::new("save")
                        .long("save")
                        .action(clap::ArgAction::SetTrue)
                        .help("Persist the result as the next schema version"),
                ),
        )
        .subcommand(
            Command::new("save")
                .about("Infer and persist a schema version")
                .arg(Arg::new("collection").required(true).help("Collection name")),
        )
        .subcommand(
            Command::new("versions")
                .about("List stored schema versions for a collection")
                .arg(Arg::new("collection").required(true).help("Collection name")),
        )
        .subcommand(
            Command::new("show")
                .about("Print a stored schema")
                .arg(Arg::new("collection").required(true).help("Collection name"))
                .arg(Arg::new("version").long("version").help("Schema version")),
        )
        .subcommand(
            Command::new("diff")
                .about("Compare two schemas")
                .arg(Arg::new("from").required(true).help("Source schema reference"))
                .arg(Arg::new("to").required(true).help("Target schema reference")),
        )
        .subcommand(
            Command::new("drift")
                .about("Compare a declared schema against live data")
                .arg(Arg::new("collection").help("Collection name"))
                .arg(
                    Arg::new("all")
                        .long("all")
                        .action(clap::ArgAction::SetTrue)
                        .help("Check every collection"),
                ),
        )
        .subcommand(
            Command::new("plan")
                .about("Compile a migration plan from a schema pair")
                .arg(Arg::new("from").required(true).help("Source schema reference"))
                .arg(Arg::new("to").required(true).help("Target schema reference"))
                .arg(Arg::new("output").short('o').long("output").help("Plan file to write")),
        )
        .subcommand(
            Command::new("migrate")
                .about("Execute a migration plan against a collection")
                .arg(Arg::new("collection").required(true).help("Collection name"))
                .arg(Arg::new("plan").long("plan").help("Plan file to execute"))
                .arg(
                    Arg::new("dry_run")
                        .long("dry-run")
                        .action(clap::ArgAction::SetTrue)
                        .help("Evaluate without writing"),
                )
                .arg(Arg::new("batch_size").long("batch-size").help("Documents per batch"))
                .arg(
                    Arg::new("rate_limit_ms")
                        .long("rate-limit-ms")
                        .help("Minimum milliseconds between batches"),
                )
                .arg(
                    Arg::new("resume_from")
                        .long("resume-from")
                        .help("Resume strictly after this document key"),
                ),
        )
        .subcommand(
            Command::new("apply-validator")
                .about("Project a stored schema onto the collection validator")
                .arg(Arg::new("collection").required(true).help("Collection name")),
        )
        .subcommand(
            Command::new("monitor")
                .about("Watch collections for drift on a fixed interval")
                .arg(Arg::new("collections").num_args(0..).help("Collection names"))
                .arg(
                    Arg::new("interval_secs")
                        .long("interval-secs")
                        .default_value("300")
                        .help("Seconds between checks"),
                ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "zsh", "fish", "powershell"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer)
        .expect("Failed to render man page");

    let man_path = man_dir.join("shale.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
