use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use indexsync::IndexSync;
use indexsync::config::SyncConfig;
use indexsync::models::{PassLog, SyncReport};
use log::LevelFilter;

#[derive(Parser, Debug)]
#[command(
    name = "indexsync-cli",
    about = "Synchronize a search index with csv_<timestamp> snapshot exports."
)]
struct Cli {
    /// Base path for local state (catalog and default snapshot root).
    #[arg(short, long, default_value = ".", value_hint = clap::ValueHint::DirPath)]
    base_path: PathBuf,

    /// Minimum log level to display.
    #[arg(long, default_value_t = LogLevelArg::Info, value_enum)]
    log_level: LogLevelArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the metadata document if it is missing and print the index state.
    Init,
    /// Synchronize the index with one snapshot (its directory or its objects.csv).
    Sync {
        snapshot: PathBuf,

        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Synchronize the index with the newest snapshot under the snapshot root.
    SyncLatest {
        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Forget every import and delete all object documents.
    Reset,
    /// Print index metadata and the object document count.
    Status {
        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// List recent synchronization passes from the local catalog.
    History {
        /// Maximum number of passes to display.
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Emit JSON instead of a text table.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LevelFilter {
    fn from(value: LogLevelArg) -> Self {
        match value {
            LogLevelArg::Error => LevelFilter::Error,
            LogLevelArg::Warn => LevelFilter::Warn,
            LogLevelArg::Info => LevelFilter::Info,
            LogLevelArg::Debug => LevelFilter::Debug,
            LogLevelArg::Trace => LevelFilter::Trace,
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default());
    logger.filter_level(LevelFilter::from(cli.log_level));
    let _ = logger.try_init();

    let base_hint = if cli.base_path == PathBuf::from(".") {
        std::env::var("INDEXSYNC_BASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| cli.base_path.clone())
    } else {
        cli.base_path.clone()
    };
    let base_path = if base_hint.is_absolute() {
        base_hint
    } else {
        std::env::current_dir()
            .context("failed to resolve current directory")?
            .join(&base_hint)
    };
    if !base_path.exists() {
        bail!("Base path '{}' does not exist", base_path.display());
    }

    let config = SyncConfig::from_env(base_path).context("invalid configuration")?;

    // History only reads the local catalog.
    let needs_index = !matches!(cli.command, Commands::History { .. });
    let sync = IndexSync::new(config)
        .await
        .context("failed to open indexsync instance")?;
    if needs_index {
        sync.initialize()
            .await
            .context("failed to initialize the search index")?;
    }

    let result = handle(&sync, cli.command).await;
    sync.close().await?;
    result
}

async fn handle(sync: &IndexSync, command: Commands) -> Result<()> {
    match command {
        Commands::Init => {
            let status = sync.status().await?;
            println!(
                "Index ready: imported={} last_timestamp={} documents={}",
                status.metadata.has_imported_snapshot,
                status.metadata.last_import_timestamp,
                status.document_count
            );
        }
        Commands::Sync { snapshot, json } => {
            let report = sync
                .synchronize(&snapshot)
                .await
                .with_context(|| format!("synchronization with '{}' failed", snapshot.display()))?;
            print_report(&report, json)?;
        }
        Commands::SyncLatest { json } => {
            let report = sync
                .synchronize_latest()
                .await
                .context("synchronization with the latest snapshot failed")?;
            print_report(&report, json)?;
        }
        Commands::Reset => {
            let deleted = sync.reset_index().await.context("reset failed")?;
            println!("Index reset; {} documents deleted.", deleted);
        }
        Commands::Status { json } => {
            let status = sync.status().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("Imported:        {}", status.metadata.has_imported_snapshot);
                println!("Last timestamp:  {}", status.metadata.last_import_timestamp);
                println!("Documents:       {}", status.document_count);
            }
        }
        Commands::History { limit, json } => {
            let passes = sync.passes(limit)?;
            print_passes(&passes, json)?;
        }
    }
    Ok(())
}

fn print_report(report: &SyncReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!(
        "Snapshot {} ({}): {} created, {} updated, {} deleted, {} already absent",
        report.snapshot.timestamp,
        report.mode.as_str(),
        report.created,
        report.updated,
        report.deleted,
        report.missing_deletes
    );
    Ok(())
}

fn print_passes(passes: &[PassLog], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(passes)?);
        return Ok(());
    }
    if passes.is_empty() {
        println!("No synchronization passes recorded.");
        return Ok(());
    }
    println!(
        "{:<6} {:<10} {:<14} {:<12} {:<22} {}",
        "PASS", "STATUS", "MODE", "SNAPSHOT", "STARTED", "DETAILS"
    );
    println!("{}", "-".repeat(100));
    for pass in passes {
        let started = chrono::DateTime::from_timestamp(pass.start_time, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| pass.start_time.to_string());
        println!(
            "{:<6} {:<10} {:<14} {:<12} {:<22} {}",
            pass.pass_id,
            pass.status,
            pass.mode.as_deref().unwrap_or("-"),
            pass.snapshot_timestamp
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".to_string()),
            started,
            pass.details
        );
    }
    Ok(())
}
