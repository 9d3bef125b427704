//! CLI entrypoint for the batch route planner.

use std::fs::{self, File, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use batch_route_planner::config::{LogFormat, Settings};
use batch_route_planner::error::{ConfigError, IngestError, StoreError};
use batch_route_planner::logging;
use batch_route_planner::optimizer::RouteOptimizer;
use batch_route_planner::pipeline::{PipelineError, run_pipeline};
use batch_route_planner::source::{FileSource, ObjectStoreSource, SampleSource};
use batch_route_planner::store::SqliteRouteSink;
use batch_route_planner::traits::RecordSource;
use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tracing::{error, info};

fn main() -> ExitCode {
    let Cli { command } = Cli::parse();
    let Command::Run(args) = command;

    let settings = match setup(&args) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("route-planner: {err}");
            return ExitCode::FAILURE;
        }
    };

    match execute(&args, &settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(step = err.step(), error = %err, "pipeline failed");
            ExitCode::FAILURE
        }
    }
}

/// Loads settings, applies CLI overrides and installs logging.
fn setup(args: &RunArgs) -> Result<Settings, ConfigError> {
    let mut settings = Settings::load(args.config.as_deref())?;
    args.apply(&mut settings);
    settings.validate()?;
    logging::init(&settings.logging)?;
    Ok(settings)
}

fn execute(args: &RunArgs, settings: &Settings) -> Result<(), CliError> {
    info!(
        batch_size = settings.optimizer.batch_size,
        concurrency = settings.optimizer.concurrency,
        db_path = %settings.store.db_path.display(),
        "starting route planner"
    );

    ensure_writable_parent(&settings.store.db_path)?;
    let optimizer = RouteOptimizer::new(settings.optimizer.clone())?;

    let source: Box<dyn RecordSource> = if args.use_sample {
        Box::new(SampleSource)
    } else if !args.input.is_empty() {
        Box::new(FileSource::new(args.input.clone()))
    } else {
        Box::new(ObjectStoreSource::new(settings.source.clone(), settings.optimizer.retry)?)
    };
    let mut sink = SqliteRouteSink::open(&settings.store.db_path, settings.optimizer.retry)?;

    let run = run_pipeline(&optimizer, source.as_ref(), &mut sink)?;

    if let Some(path) = &args.output {
        let file = File::create(path).map_err(|source| CliError::Output {
            path: path.clone(),
            source,
        })?;
        serde_json::to_writer_pretty(BufWriter::new(file), &run.result).map_err(CliError::Encode)?;
        info!(path = %path.display(), "wrote optimization result");
    }

    println!(
        "Stored {} routes ({:.2} km) from {} records, {} rejected, {} failed batches",
        run.summary.routes,
        run.summary.total_distance_km,
        run.summary.records_accepted,
        run.summary.records_rejected,
        run.summary.failed_batches
    );
    Ok(())
}

/// Creates the database directory if needed and checks it can be written.
fn ensure_writable_parent(db_path: &Path) -> Result<(), CliError> {
    let Some(dir) = db_path.parent().filter(|dir| !dir.as_os_str().is_empty()) else {
        return Ok(());
    };
    fs::create_dir_all(dir).map_err(|source| CliError::CreateDirectory {
        path: dir.to_path_buf(),
        source,
    })?;
    // Permission bits miss ACLs and read-only mounts; creating a file does not.
    let check = dir.join(format!(".route-planner-write-check-{}", std::process::id()));
    let read_only = |source| CliError::ReadOnlyDirectory {
        path: dir.to_path_buf(),
        source,
    };
    OpenOptions::new().write(true).create_new(true).open(&check).map_err(read_only)?;
    fs::remove_file(&check).map_err(read_only)?;
    Ok(())
}

#[derive(Debug, Parser)]
#[command(name = "route-planner", about = "Batch delivery route optimizer", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch deliveries, optimize routes and store them
    Run(RunArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// TOML settings file
    #[arg(short, long, value_name = "path")]
    config: Option<PathBuf>,
    /// Deliveries per batch
    #[arg(long, value_name = "n")]
    batch_size: Option<usize>,
    /// Batches solved in parallel
    #[arg(long, value_name = "n")]
    concurrency: Option<usize>,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "level")]
    log_level: Option<String>,
    /// Shorthand for --log-level debug
    #[arg(short, long)]
    verbose: bool,
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
    /// Use the built-in five-delivery sample instead of the object store
    #[arg(long, conflicts_with = "input")]
    use_sample: bool,
    /// Read deliveries from local CSV files instead of the object store
    #[arg(long, value_name = "path")]
    input: Vec<PathBuf>,
    /// SQLite database for results
    #[arg(long, value_name = "path")]
    db_path: Option<PathBuf>,
    /// Also write the full result as JSON
    #[arg(short, long, value_name = "path")]
    output: Option<PathBuf>,
}

impl RunArgs {
    fn apply(&self, settings: &mut Settings) {
        if let Some(batch_size) = self.batch_size {
            settings.optimizer.batch_size = batch_size;
        }
        if let Some(concurrency) = self.concurrency {
            settings.optimizer.concurrency = concurrency;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level = level.clone();
        }
        if self.verbose {
            settings.logging.level = "debug".to_string();
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }
        if let Some(db_path) = &self.db_path {
            settings.store.db_path = db_path.clone();
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to prepare database directory {path:?}: {source}")]
    CreateDirectory { path: PathBuf, source: std::io::Error },
    #[error("database directory {path:?} is not writable: {source}")]
    ReadOnlyDirectory { path: PathBuf, source: std::io::Error },
    #[error(transparent)]
    Source(#[from] IngestError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("failed to write {path:?}: {source}")]
    Output { path: PathBuf, source: std::io::Error },
    #[error("failed to encode result: {0}")]
    Encode(serde_json::Error),
}

impl CliError {
    fn step(&self) -> &'static str {
        match self {
            CliError::Pipeline(err) => err.step(),
            CliError::Source(_) => "ingest",
            CliError::Store(_) => "store",
            CliError::Output { .. } | CliError::Encode(_) => "output",
            CliError::Config(_) | CliError::CreateDirectory { .. } | CliError::ReadOnlyDirectory { .. } => "setup",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_missing_database_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("store");
        ensure_writable_parent(&dir.join("logistics.db")).unwrap();

        assert!(dir.is_dir());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0, "write check leaves nothing behind");
    }

    #[test]
    fn test_bare_file_name_needs_no_directory() {
        ensure_writable_parent(Path::new("logistics.db")).unwrap();
    }

    #[test]
    fn test_parent_that_is_a_file_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("store");
        fs::write(&blocker, "").unwrap();

        let err = ensure_writable_parent(&blocker.join("logistics.db")).unwrap_err();
        assert!(matches!(err, CliError::CreateDirectory { .. }), "got {err}");
        assert_eq!(err.step(), "setup");
    }
}
