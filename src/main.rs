//! Ingest-Engine main entry point
//!
//! This is the command-line interface for the ingestion engine.

use anyhow::{bail, Context};
use clap::Parser;
use ingest_engine::config::{load_config_with_hash, Config};
use ingest_engine::engine::{Scheduler, SchedulerStats};
use ingest_engine::report::{load_statistics, print_statistics};
use ingest_engine::scrape::{build_engine, submit_credentials, SubmitOutcome};
use ingest_engine::storage::SqliteStorage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Ingest-Engine: background ingestion of supplier order history
///
/// Polls the staging database for queued batches, scrapes each supplier
/// site with the batch's captured credentials, and stages the orders found.
#[derive(Parser, Debug)]
#[command(name = "ingest-engine")]
#[command(version)]
#[command(about = "Background ingestion of supplier order history", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show the handler registry without running
    #[arg(long, conflicts_with_all = ["stats", "submit", "once"])]
    dry_run: bool,

    /// Show batch and order statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "submit", "once"])]
    stats: bool,

    /// Queue a batch from a credential bundle file and exit
    #[arg(long, value_name = "FILE", requires = "handler")]
    submit: Option<PathBuf>,

    /// Handler that the submitted batch belongs to
    #[arg(long, value_name = "NAME", requires = "submit")]
    handler: Option<String>,

    /// Run a single engine cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else if let (Some(file), Some(handler)) = (&cli.submit, &cli.handler) {
        handle_submit(&config, file, handler)?;
    } else {
        handle_run(config, cli.once).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("ingest_engine=info,warn"),
            1 => EnvFilter::new("ingest_engine=debug,info"),
            2 => EnvFilter::new("ingest_engine=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn open_storage(config: &Config) -> anyhow::Result<SqliteStorage> {
    SqliteStorage::new(Path::new(&config.storage.database_path))
        .with_context(|| format!("Failed to open {}", config.storage.database_path))
}

/// Handles the --dry-run mode: validates config and shows the registry
fn handle_dry_run(config: &Config) {
    println!("=== Ingest-Engine Dry Run ===\n");

    println!("Engine:");
    println!("  Poll interval: {}ms", config.engine.poll_interval_ms);
    println!("  Workers: {}", config.engine.worker_count);
    println!("  Queue capacity: {}", config.engine.queue_capacity);
    println!(
        "  Stale batch grace: {}s",
        config.engine.stale_batch_grace_secs
    );

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);

    println!("\nHandlers ({}):", config.handlers.len());
    for handler in &config.handlers {
        println!(
            "  - {} [{}] adapter={} max-items-per-cycle={}",
            handler.name, handler.purpose, handler.adapter, handler.max_items_per_cycle
        );
        println!(
            "    site: {} (list {}, detail {})",
            handler.site.base_url, handler.site.list_path, handler.site.detail_template
        );
        println!(
            "    http: delay {}ms, timeout {}ms, {} extra headers",
            handler.http.request_delay_ms,
            handler.http.request_timeout_ms,
            handler.http.headers.len()
        );
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let storage = open_storage(config)?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --submit mode: queues a batch from a credential bundle
fn handle_submit(config: &Config, file: &Path, handler: &str) -> anyhow::Result<()> {
    if config.handler(handler).is_none() {
        bail!("No handler named '{}' in configuration", handler);
    }

    let payload = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let storage = open_storage(config)?;

    match submit_credentials(&storage, handler, &payload)? {
        SubmitOutcome::Queued { batch_id } => {
            println!("✓ Queued batch {} for {}", batch_id, handler);
        }
        SubmitOutcome::Duplicate { batch_id } => {
            println!(
                "Batch {} already holds this payload and has not finished; nothing queued",
                batch_id
            );
        }
    }

    Ok(())
}

/// Handles the main run: startup recovery, then the scheduler loop
async fn handle_run(config: Config, once: bool) -> anyhow::Result<()> {
    let storage = Arc::new(open_storage(&config)?);
    let parts = build_engine(&config, storage)?;

    if parts.stale_recovered > 0 {
        tracing::warn!(
            "Recovered {} stale batches left by a previous run",
            parts.stale_recovered
        );
    }

    let scheduler = Scheduler::new(Arc::new(parts.engine), config.engine.poll_interval());
    let cancel = CancellationToken::new();

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, finishing current cycle");
            shutdown.cancel();
        }
    });

    if once {
        let mut stats = SchedulerStats::default();
        scheduler.tick(&cancel, &mut stats).await;
        if stats.failed_cycles > 0 {
            bail!("Engine cycle failed");
        }
        return Ok(());
    }

    let stats = scheduler.run(cancel).await;
    tracing::info!(
        "Shut down after {} cycles ({} failed)",
        stats.cycles,
        stats.failed_cycles
    );

    Ok(())
}
