use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::{error, info};
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use athena::config::Config;
use athena::daemon::{LoopOutcome, ReconcileError, ReconcileLoop, RunSummary, TickConfig};
use athena::domain::{OutstandingSet, QueueOverrides, WorkItem};
use athena::id::block_dir_name;
use athena::queue::{CommandQueueAdapter, RapidFireSubmitter};
use athena::recovery::OfflineRecoverer;
use athena::store::{JobDb, JobStore};
use tokio_util::sync::CancellationToken;

mod cli;

use cli::Cli;
use cli::commands::Commands;

const EXIT_OK: i32 = 0;
const EXIT_FAILED: i32 = 1;
/// Conventional exit status for SIGINT
const EXIT_CANCELLED: i32 = 130;

fn setup_logging(config: &Config) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("athena")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("athena.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let default_level = config.log_level.as_deref().unwrap_or("info");
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn open_db(config: &Config) -> Result<Arc<JobDb>> {
    let db = JobDb::open(&config.store.dir)
        .context(format!("Failed to open job store at {}", config.store.dir.display()))?;
    Ok(Arc::new(db))
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Run { daemon } => handle_run_command(*daemon, config).await,
        Commands::Add {
            name,
            command,
            category,
            depends_on,
            walltime,
            nnodes,
        } => {
            let overrides = QueueOverrides {
                walltime: walltime.clone(),
                nnodes: *nnodes,
                ..QueueOverrides::default()
            };
            handle_add_command(name, command, category.as_deref(), depends_on, overrides, config)
        }
        Commands::Status => handle_status_command(config).await,
        Commands::Reset => handle_reset_command(config),
        Commands::Block => handle_block_command(config),
    }
}

async fn handle_run_command(daemon: bool, config: &Config) -> Result<()> {
    let db = open_db(config)?;
    let adapter = CommandQueueAdapter::from_config(&config.queue);
    info!("Submitting to {} through {:?}", config.queue.q_name, adapter.kind());
    let recoverer = Arc::new(OfflineRecoverer::new(Arc::clone(&db)));
    let submitter = Arc::new(RapidFireSubmitter::new(Arc::clone(&db), adapter));

    let tick = TickConfig::from(&config.reconcile)
        .with_daemon_mode(config.reconcile.daemon_mode || daemon);
    info!(
        "Running reconciliation (poll {:?}, daemon {})",
        tick.poll_interval, tick.daemon_mode
    );

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            ctrl_c.cancel();
        }
    });

    let reconcile = ReconcileLoop::new(db, recoverer, submitter, config.launcher_args())
        .with_config(tick)
        .with_cancel(cancel);

    let result = reconcile.run().await;
    match &result {
        Ok(summary) => {
            info!("Reconciliation finished: {:?}", summary.stats);
            match summary.outcome {
                LoopOutcome::Idle => println!("{}", "No jobs to run.".green()),
                LoopOutcome::Cancelled => println!("{}", "Exiting on user command.".yellow()),
            }
        }
        Err(e) => {
            error!("Reconciliation failed: {:?}", e);
            eprintln!("{} {}", "Error:".red(), e);
        }
    }

    match exit_status(&result) {
        EXIT_OK => Ok(()),
        code => process::exit(code),
    }
}

/// Process exit status for a finished reconciliation run.
fn exit_status(result: &std::result::Result<RunSummary, ReconcileError>) -> i32 {
    match result {
        Ok(summary) => match summary.outcome {
            LoopOutcome::Idle => EXIT_OK,
            LoopOutcome::Cancelled => EXIT_CANCELLED,
        },
        Err(_) => EXIT_FAILED,
    }
}

fn handle_add_command(
    name: &str,
    command: &str,
    category: Option<&str>,
    depends_on: &[u64],
    overrides: QueueOverrides,
    config: &Config,
) -> Result<()> {
    let db = open_db(config)?;
    let mut item = WorkItem::new(name, command)
        .with_dependencies(depends_on.to_vec())
        .with_queue(overrides);
    if let Some(category) = category {
        item = item.with_category(category);
    }

    let item = db.add_work(item).context("Failed to add work item")?;
    info!("Added work item {} ({})", item.id, item.name);
    println!("{} {} {} [{:?}]", "Added:".green(), item.id, item.name, item.state);
    Ok(())
}

async fn handle_status_command(config: &Config) -> Result<()> {
    let db = open_db(config)?;
    let outstanding = OutstandingSet::from_records(&db.find_all_incomplete().await?);
    let active = db.has_active_run().await?;

    println!("{} {}", "Outstanding launches:".cyan(), outstanding);
    for launch in db.incomplete_launches()? {
        println!(
            "  {} work {} {:?} job {} {}",
            launch.launch_id,
            launch.work_id,
            launch.state,
            launch.queue_job_id.as_deref().unwrap_or("-"),
            launch.launch_dir.display()
        );
    }
    println!("{} {}", "Active work:".cyan(), active);
    Ok(())
}

fn handle_reset_command(config: &Config) -> Result<()> {
    let db = open_db(config)?;
    db.reset().context("Failed to reset job store")?;
    info!("Job store reset at {}", config.store.dir.display());
    println!("{} {}", "Reset:".red(), config.store.dir.display());
    Ok(())
}

fn handle_block_command(config: &Config) -> Result<()> {
    let block = config.launcher.launch_dir.join(block_dir_name(chrono::Utc::now()));
    fs::create_dir_all(&block).context(format!("Failed to create {}", block.display()))?;
    info!("Created block directory {}", block.display());
    println!("{}", block.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    // Setup logging once the configured level is known
    setup_logging(&config).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use athena::daemon::{LoopStats, Phase};
    use athena::error::AthenaError;

    fn finished(outcome: LoopOutcome) -> std::result::Result<RunSummary, ReconcileError> {
        Ok(RunSummary {
            outcome,
            stats: LoopStats::default(),
            outstanding: OutstandingSet::default(),
        })
    }

    #[test]
    fn test_idle_run_exits_zero() {
        assert_eq!(exit_status(&finished(LoopOutcome::Idle)), 0);
    }

    #[test]
    fn test_cancelled_run_exits_130() {
        assert_eq!(exit_status(&finished(LoopOutcome::Cancelled)), 130);
    }

    #[test]
    fn test_failed_run_exits_one() {
        let failed = Err(ReconcileError {
            phase: Phase::Evaluate,
            source: AthenaError::Submission("sbatch: invalid partition".to_string()),
        });
        assert_eq!(exit_status(&failed), 1);
    }
}
