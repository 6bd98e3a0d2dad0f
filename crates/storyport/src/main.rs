//! `storyport` command-line front end.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;

use storyport::broadcast::ImportPhase;
use storyport::config::{apply_env_overrides, load_config};
use storyport::telemetry::{init_tracing, LogFormat, TelemetryError};
use storyport::{
    ConfigError, Database, DatabaseError, ImportConfig, ImportError, ImportPipeline, Job, JobStatus,
    JobTracker, TrackerError,
};

#[derive(Parser)]
#[command(name = "storyport")]
#[command(version, about = "Bulk import of zipped stories into draft content records")]
struct Cli {
    /// Path to an import config file (JSON)
    #[arg(long, global = true, env = "STORYPORT_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file, overriding the config
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Log output format: text or json
    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import every supported document of a ZIP archive and wait for the job
    Import {
        archive: PathBuf,
        #[arg(long)]
        owner: i64,
        /// Return once the job is queued instead of following it
        #[arg(long)]
        detach: bool,
    },

    /// Show the status of a job
    Status {
        job_id: i64,
        /// Only show the job if it belongs to this owner
        #[arg(long)]
        owner: Option<i64>,
    },

    /// List an owner's jobs, newest first
    History {
        #[arg(long)]
        owner: i64,
    },

    /// Cancel a pending or running job
    Cancel {
        job_id: i64,
        #[arg(long)]
        owner: i64,
    },

    /// Cancel jobs left pending or running by a previous process
    Recover,
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Import(#[from] ImportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Failed to read '{path}': {source}")]
    ReadArchive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing("info", cli.log_format) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, CliError> {
    let config = resolve_config(cli.config.as_deref(), cli.database.as_deref())?;

    match cli.command {
        Commands::Import {
            archive,
            owner,
            detach,
        } => cmd_import(config, &archive, owner, detach, cli.json),
        Commands::Status { job_id, owner } => {
            let tracker = open_tracker(&config)?;
            let view = match owner {
                Some(owner) => tracker.status_for_owner(job_id, owner)?,
                None => tracker.status(job_id)?,
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                println!(
                    "Job {}: {} ({:.0}%) {}/{} processed, {} imported, {} failed",
                    view.job_id,
                    view.status,
                    view.progress_percent,
                    view.processed_documents,
                    view.total_documents,
                    view.successful_imports,
                    view.failed_imports
                );
                print_errors(view.error_message.as_deref(), &view.errors);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::History { owner } => {
            let jobs = open_tracker(&config)?.history(owner)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else if jobs.is_empty() {
                println!("No import jobs for owner {}", owner);
            } else {
                for job in &jobs {
                    println!(
                        "{:>6}  {:<10} {:>4}/{:<4} {}  {}",
                        job.id,
                        job.status.as_str(),
                        job.processed_documents,
                        job.total_documents,
                        job.created_at.format("%Y-%m-%d %H:%M"),
                        job.uploaded_filename
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Cancel { job_id, owner } => {
            let cancelled = open_tracker(&config)?.cancel(job_id, Some(owner))?;
            if cancelled {
                println!("Job {} cancelled", job_id);
                Ok(ExitCode::SUCCESS)
            } else {
                println!("Job {} already finished", job_id);
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Recover => {
            let recovered = open_tracker(&config)?.recover_interrupted()?;
            if recovered.is_empty() {
                println!("No interrupted jobs");
            } else {
                for id in &recovered {
                    println!("Job {} marked cancelled", id);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn resolve_config(path: Option<&Path>, database: Option<&Path>) -> Result<ImportConfig, CliError> {
    let mut config = match path {
        Some(path) => {
            info!("Loading config from {:?}", path);
            load_config(path)?
        }
        None => ImportConfig::default(),
    };
    apply_env_overrides(&mut config)?;

    if let Some(database) = database {
        config.database_path = Some(database.to_string_lossy().to_string());
    }

    Ok(config)
}

fn open_tracker(config: &ImportConfig) -> Result<JobTracker, CliError> {
    let path = config.database_path().ok_or_else(|| ConfigError::Validation {
        message: "No database path configured and no user data directory found".to_string(),
    })?;
    Ok(JobTracker::new(Database::open(&path)?))
}

fn cmd_import(
    config: ImportConfig,
    archive: &Path,
    owner: i64,
    detach: bool,
    json: bool,
) -> Result<ExitCode, CliError> {
    let bytes = std::fs::read(archive).map_err(|e| CliError::ReadArchive {
        path: archive.to_path_buf(),
        source: e,
    })?;
    let uploaded_filename = archive
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let pipeline = ImportPipeline::open(config)?;
    let mut events = pipeline.subscribe();
    let job = pipeline.submit(&bytes, owner, &uploaded_filename)?;
    println!("Job {} queued with {} documents", job.id, job.total_documents);

    if detach {
        // Workers finish the queue before the process exits.
        pipeline.shutdown();
        return Ok(ExitCode::SUCCESS);
    }

    let canceller = pipeline.canceller();
    let job_id = job.id;
    if let Err(e) = ctrlc::set_handler(move || match canceller.cancel(job_id, owner) {
        Ok(true) => eprintln!("Cancelling job {}...", job_id),
        Ok(false) => {}
        Err(e) => eprintln!("Failed to cancel job {}: {}", job_id, e),
    }) {
        warn!("Ctrl-C will not cancel the import: {}", e);
    }

    loop {
        match events.blocking_recv() {
            Ok(event) if event.job_id == job_id => {
                let per_document = matches!(
                    event.phase,
                    ImportPhase::DocumentImported | ImportPhase::DocumentFailed
                );
                if per_document && !json {
                    // Counters on document events are taken before the outcome is counted.
                    println!(
                        "[{}/{}] {} {}",
                        event.processed_documents + 1,
                        event.total_documents,
                        event.document.as_deref().unwrap_or(""),
                        event.message
                    );
                }
                if event.is_final() {
                    break;
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!("Missed {} progress events", skipped);
                if pipeline.status(job_id)?.status.is_terminal() {
                    break;
                }
            }
            Err(RecvError::Closed) => break,
        }
    }

    let finished = pipeline.tracker().get(job_id)?;
    pipeline.shutdown();
    print_summary(&finished, json)?;

    Ok(if finished.status == JobStatus::Completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_summary(job: &Job, json: bool) -> Result<(), CliError> {
    if json {
        println!("{}", serde_json::to_string_pretty(job)?);
        return Ok(());
    }
    println!(
        "Job {} {}: {} imported, {} failed of {}",
        job.id, job.status, job.successful_imports, job.failed_imports, job.total_documents
    );
    print_errors(job.error_message.as_deref(), &job.errors);
    Ok(())
}

fn print_errors(message: Option<&str>, errors: &[String]) {
    if let Some(message) = message {
        println!("  {}", message);
    }
    for err in errors {
        println!("  - {}", err);
    }
}
