use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use log::{error, info, warn, LevelFilter};
use simple_logger::SimpleLogger;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use time::macros::format_description;

mod check;
mod config;
mod discovery;
mod eligibility;
mod format;
mod loader;
mod pipeline;
mod reconcile;
mod schema;
mod sink;
mod summary;
mod table;

use config::{RunConfig, SchemaConfig};
use discovery::DirectorySource;
use eligibility::Eligibility;
use pipeline::{Pipeline, RunSummary, TaskOutcome};
use schema::{Schema, SCHEMA_VERSION};
use sink::{CsvDirectorySink, TableSink};

#[derive(Parser)]
#[command(name = "Behavioral Matrix Reconciler")]
#[command(about = "Merges newly collected per-task measurement tables into the cumulative behavioral matrix.")]
#[command(version = "1.0.0")]
struct Cli {
    #[arg(short, long, global = true, default_value = "INFO", help = "Logging level (DEBUG, INFO, WARN, ERROR)")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile every configured task table and rewrite the matrix.
    Reconcile {
        #[arg(long, help = "Path to the run configuration YAML file")]
        run_config: PathBuf,
        #[arg(short, long, help = "Output directory, overriding the run configuration")]
        output: Option<PathBuf>,
        #[arg(long, help = "Mirror directory, overriding the run configuration")]
        mirror: Option<PathBuf>,
        #[arg(long, help = "Skip mirroring the output directory", conflicts_with = "mirror")]
        no_mirror: bool,
    },
    /// Report subjects whose row count differs from the expected session count.
    CheckCounts {
        #[arg(short, long, help = "Directory of task tables to audit")]
        dir: PathBuf,
        #[arg(short, long, default_value = "5", help = "Expected rows per subject")]
        expected: usize,
        #[arg(long, default_value = "sub_id", help = "Subject identifier column")]
        identifier: String,
    },
}

fn format_elapsed(elapsed: Duration) -> String {
    let total_secs = elapsed.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    let millis = elapsed.subsec_millis();
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}.{:03}s", seconds, millis)
    }
}

fn parse_log_level(raw: &str) -> LevelFilter {
    match raw.to_uppercase().as_str() {
        "DEBUG" => LevelFilter::Debug,
        "INFO" => LevelFilter::Info,
        "WARN" | "WARNING" => LevelFilter::Warn,
        "ERROR" => LevelFilter::Error,
        _ => {
            eprintln!("Invalid log level '{}', defaulting to INFO.", raw);
            LevelFilter::Info
        }
    }
}

fn run_reconcile(run_config: PathBuf, output: Option<PathBuf>, mirror: Option<PathBuf>, no_mirror: bool) -> Result<bool> {
    info!("Loading run configuration from: {}", run_config.display());
    let mut config = RunConfig::load(&run_config)?;
    if let Some(output) = output {
        config.output_dir = output;
    }
    if mirror.is_some() {
        config.mirror_dir = mirror;
    }
    if no_mirror {
        config.mirror_dir = None;
    }
    if let Some(description) = &config.description {
        info!("Run: {}", description);
    }
    info!("Schema version {}; {} tasks expected", SCHEMA_VERSION, config.tasks.len());
    info!("New data: {}", config.new_data_dir.display());
    info!("Prior round: {}", config.old_data_dir.display());
    info!("Output directory: {}", config.output_dir.display());

    let eligibility = Eligibility::load(&config.eligibility)?;
    let pipeline = Pipeline::new(&config, eligibility);
    let source = DirectorySource::new(
        config.old_data_dir.clone(),
        config.new_data_dir.clone(),
        config.new_data_exclude_suffixes.clone(),
    );
    let plan = pipeline.prepare(&source)?;
    let mut sink = CsvDirectorySink::new(config.output_dir.clone())?;
    let summary = pipeline.execute(&plan, &mut sink);
    report_run(&summary, sink.report_files_written());
    Ok(summary.is_success())
}

fn report_run(summary: &RunSummary, files_written: usize) {
    info!("Existing subject IDs across prior-round tables: {}", summary.known_subjects);
    info!("Tables written: {}", files_written);
    for result in &summary.tasks {
        match &result.outcome {
            TaskOutcome::Written { report, written, carried_forward } => {
                let note = if *carried_forward { " (carried forward)" } else { "" };
                info!(
                    "  - {}{}: {} updated, {} inserted, {} skipped, {} new columns, sha256 {}",
                    result.task,
                    note,
                    report.updated_rows,
                    report.inserted_rows,
                    report.rejected_rows,
                    report.added_columns.len(),
                    written.sha256
                );
            }
            TaskOutcome::Failed(e) => warn!("  - {}: FAILED ({})", result.task, e),
        }
    }
    match &summary.mirrored_files {
        Some(Ok(count)) => info!("Mirrored {} files", count),
        Some(Err(e)) => error!("Mirror failed: {:#}", e),
        None => info!("Mirroring disabled"),
    }
}

fn run_check_counts(dir: PathBuf, expected: usize, identifier: String) -> Result<bool> {
    let schema_config = SchemaConfig { identifier, ..SchemaConfig::default() };
    let schema = Schema::new(&schema_config);
    let reports = check::audit_directory(&dir, &schema, expected)
        .with_context(|| format!("Failed to audit tables in {}", dir.display()))?;
    let failing = reports.iter().filter(|r| !r.all_expected()).count();
    info!("Audited {} tables; {} with unexpected row counts", reports.len(), failing);
    Ok(failing == 0)
}

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    SimpleLogger::new()
        .with_level(parse_log_level(&cli.log_level))
        .with_timestamp_format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
        .init()?;
    info!("Run Timestamp: {}", Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));

    let success = match cli.command {
        Command::Reconcile { run_config, output, mirror, no_mirror } => {
            run_reconcile(run_config, output, mirror, no_mirror)?
        }
        Command::CheckCounts { dir, expected, identifier } => run_check_counts(dir, expected, identifier)?,
    };

    info!("-------------------- FINAL SUMMARY --------------------");
    info!("Total execution time: {}", format_elapsed(start_time.elapsed()));
    info!("Processing complete.");
    if !success {
        std::process::exit(1);
    }
    Ok(())
}
