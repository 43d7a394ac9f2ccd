use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use collection_fetcher::{CollectionService, HttpCollectionService, SnapshotExporter, UrlCollectionReader};
use indexsync::config::SyncConfig;
use indexsync::IndexSync;
use log::LevelFilter;

#[derive(Parser, Debug)]
#[command(
    name = "collection-export",
    about = "Export a remote collection as a csv_<timestamp>/objects.csv snapshot."
)]
struct Cli {
    /// Root URL of the collection service.
    #[arg(long, env = "COLLECTION_ROOT_URL")]
    root_url: String,

    /// Collection path on the service, e.g. `collections/paintings`.
    #[arg(long, env = "COLLECTION_PATH")]
    path: String,

    /// Directory that receives the snapshot directory.
    #[arg(short, long, env = "INDEXSYNC_SNAPSHOT_ROOT", value_hint = clap::ValueHint::DirPath)]
    output: PathBuf,

    /// Snapshot timestamp; defaults to the current Unix time.
    #[arg(long)]
    timestamp: Option<i64>,

    /// Primary key column, written first.
    #[arg(long, default_value = "id")]
    id_field: String,

    #[arg(long, env = "COLLECTION_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "COLLECTION_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Synchronize the search index with the new snapshot once it is written.
    #[arg(long)]
    sync: bool,

    /// Base path of the indexsync instance used with `--sync`.
    #[arg(long, default_value = ".", value_hint = clap::ValueHint::DirPath)]
    base_path: PathBuf,

    /// Minimum log level to display.
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
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
    logger.filter_level(cli.log_level);
    let _ = logger.try_init();

    let mut service = HttpCollectionService::new(&cli.root_url).context("invalid --root-url")?;
    if let Some(username) = cli.username.clone() {
        service = service.with_credentials(username, cli.password.clone());
    }
    let service: Arc<dyn CollectionService> = Arc::new(service);
    let mut reader = UrlCollectionReader::new(service, cli.path.clone()).with_id_field(&cli.id_field);

    tokio::fs::create_dir_all(&cli.output)
        .await
        .with_context(|| format!("failed to create {}", cli.output.display()))?;
    let timestamp = cli.timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp());

    log::info!("Beginning export of '{}' from {}", cli.path, cli.root_url);
    let summary = SnapshotExporter::new(&cli.output)
        .with_id_field(&cli.id_field)
        .export(&mut reader, timestamp)
        .await
        .context("export failed")?;
    println!(
        "Exported {} records to {} ({} skipped)",
        summary.records,
        summary.snapshot.path.display(),
        summary.skipped
    );

    if cli.sync {
        let mut config = SyncConfig::from_env(&cli.base_path).context("invalid configuration")?;
        config.snapshot_root = cli.output.clone();
        config.id_field = cli.id_field.clone();
        let sync = IndexSync::new(config)
            .await
            .context("failed to open indexsync instance")?;
        sync.initialize().await.context("failed to initialize the search index")?;
        let report = sync
            .synchronize(&summary.snapshot.path)
            .await
            .context("synchronization failed")?;
        println!(
            "Synchronized ({}): {} created, {} updated, {} deleted",
            report.mode.as_str(),
            report.created,
            report.updated,
            report.deleted
        );
        sync.close().await?;
    }
    Ok(())
}
