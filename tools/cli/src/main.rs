//! bundlesync CLI - Keep a local bundle store in sync with a published manifest.
//!
//! This tool syncs resources listed by a remote (or local) manifest into a
//! SQLite store, inspects the store, and publishes manifests for a
//! directory of assets.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use bundlesync_common::ResourcePath;
use bundlesync_manifest::ManifestBuilder;
use bundlesync_store::{ManifestStore, ResourceStore, SqliteStore};
use bundlesync_sync::{
    CancellationToken, SyncConfig, SyncEngine, SyncMode, SyncReport, SyncScheduler,
};
use bundlesync_transport::{create_default_registry, open_origin};

const MANIFEST_FILE: &str = "manifest.json";

#[derive(Parser)]
#[command(name = "bundlesync")]
#[command(about = "bundlesync - Incremental manifest/resource sync")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Store database (default: <data dir>/bundlesync/bundle.db).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by commands that run syncs.
#[derive(Args, Debug, Default)]
struct SyncArgs {
    /// Manifest URL or path.
    #[arg(short, long)]
    manifest: String,

    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum concurrent resource fetches.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Per-request timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Retries after transient failures.
    #[arg(long)]
    retries: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync.
    Sync {
        #[command(flatten)]
        args: SyncArgs,
    },

    /// Sync periodically until interrupted.
    Watch {
        #[command(flatten)]
        args: SyncArgs,

        /// Seconds between syncs (overrides the config file).
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Show the manifest currently in the store.
    Status,

    /// Show what a sync would change, without syncing.
    Diff {
        /// Manifest URL or path.
        #[arg(short, long)]
        manifest: String,
    },

    /// Print a stored resource.
    Show {
        /// Resource path.
        path: String,

        /// Write to a file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate a manifest for a directory of assets.
    Publish {
        /// Directory to publish.
        dir: PathBuf,

        /// Bundle name.
        #[arg(short, long)]
        name: Option<String>,

        /// Version label.
        #[arg(long = "label")]
        label: Option<String>,

        /// Where to write the manifest (default: <dir>/manifest.json).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let db = match cli.db {
        Some(db) => db,
        None => default_db_path()?,
    };

    match cli.command {
        Commands::Sync { args } => cmd_sync(&db, &args).await,
        Commands::Watch { args, interval } => cmd_watch(&db, &args, interval).await,
        Commands::Status => cmd_status(&db).await,
        Commands::Diff { manifest } => cmd_diff(&db, &manifest).await,
        Commands::Show { path, output } => cmd_show(&db, &path, output.as_deref()).await,
        Commands::Publish {
            dir,
            name,
            label,
            output,
        } => cmd_publish(&dir, name, label, output),
    }
}

fn default_db_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().context("Cannot determine data directory; pass --db")?;
    Ok(data_dir.join("bundlesync").join("bundle.db"))
}

/// Config file values, then command-line overrides.
///
/// `interval` switches the sync mode to periodic.
fn load_config(args: &SyncArgs, interval: Option<u64>) -> Result<SyncConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            SyncConfig::from_json(&json)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => SyncConfig::default(),
    };

    if let Some(concurrency) = args.concurrency {
        config.max_concurrent_fetches = concurrency;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.fetch_timeout_ms = Some(timeout_ms);
    }
    if let Some(retries) = args.retries {
        config.max_retries = retries;
    }
    if let Some(interval_secs) = interval {
        config.sync_mode = SyncMode::Periodic { interval_secs };
    }

    config.validate().context("Invalid sync configuration")?;
    Ok(config)
}

/// Build an engine for `manifest` over the store at `db`.
///
/// Returns the engine and the location to request from it.
fn open_engine(db: &Path, manifest: &str, config: SyncConfig) -> Result<(Arc<SyncEngine>, String)> {
    let registry = create_default_registry();
    let origin = open_origin(&registry, manifest)
        .with_context(|| format!("Cannot open origin {}", manifest))?;
    let store = SqliteStore::open(db).context("Failed to open store")?;

    let engine = SyncEngine::new(origin.transport, Arc::new(store), config)?;
    Ok((Arc::new(engine), origin.manifest_location))
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling sync");
            token.cancel();
        }
    });
}

fn print_report(report: &SyncReport) {
    println!("Sync complete:");
    if let Some(name) = &report.manifest_name {
        println!("  Bundle: {}", name);
    }
    if let Some(version) = &report.manifest_version {
        println!("  Version: {}", version);
    }
    println!("  Resources: {}", report.resource_count);
    println!(
        "  Added: {}, modified: {}, unchanged: {}, removed: {}",
        report.added, report.modified, report.unchanged, report.removed
    );
    println!(
        "  Fetched: {} ({} bytes) in {:?}",
        report.fetched.len(),
        report.bytes_fetched,
        report.duration
    );
}

/// Run one sync.
async fn cmd_sync(db: &Path, args: &SyncArgs) -> Result<()> {
    let config = load_config(args, None)?;
    let (engine, location) = open_engine(db, &args.manifest, config)?;

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let report = engine
        .run_with_retry(&location, &cancel)
        .await
        .context("Sync failed")?;
    print_report(&report);

    Ok(())
}

/// Sync periodically until Ctrl-C.
async fn cmd_watch(db: &Path, args: &SyncArgs, interval: Option<u64>) -> Result<()> {
    let config = load_config(args, interval)?;

    let SyncMode::Periodic { interval_secs } = config.sync_mode else {
        anyhow::bail!("watch needs an interval: pass --interval or set a periodic sync_mode");
    };

    let mode = config.sync_mode.clone();
    let (engine, location) = open_engine(db, &args.manifest, config)?;
    let (scheduler, handle) = SyncScheduler::new(mode);

    info!("Watching {} every {}s", args.manifest, interval_secs);
    let task = tokio::spawn(handle.run(move |cancel| {
        let engine = engine.clone();
        let location = location.clone();
        async move { engine.run_with_retry(&location, &cancel).await }
    }));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Stopping");
    scheduler.shutdown().await;
    task.await.context("Scheduler task failed")?;

    Ok(())
}

/// Show the current manifest.
async fn cmd_status(db: &Path) -> Result<()> {
    let store = SqliteStore::open(db).context("Failed to open store")?;

    let Some(manifest) = store
        .load_current()
        .await
        .context("Failed to load current manifest")?
    else {
        println!("No manifest synced yet ({})", db.display());
        return Ok(());
    };

    let total_bytes: usize = store
        .resources()
        .await
        .context("Failed to list resources")?
        .iter()
        .map(|r| r.content.len())
        .sum();

    println!("Store: {}", db.display());
    println!("  Bundle: {}", manifest.name.as_deref().unwrap_or("-"));
    println!("  Version: {}", manifest.version.as_deref().unwrap_or("-"));
    println!("  Resources: {} ({} bytes stored)", manifest.len(), total_bytes);
    for resource in &manifest.resources {
        println!("    {}  {}", resource.content_hash, resource.path);
    }

    Ok(())
}

/// Show what a sync would change.
async fn cmd_diff(db: &Path, manifest: &str) -> Result<()> {
    let (engine, location) = open_engine(db, manifest, SyncConfig::default())?;
    let diff = engine
        .preview(&location)
        .await
        .context("Failed to compute diff")?;

    if diff.is_empty() {
        println!("Up to date");
        return Ok(());
    }
    for path in &diff.added {
        println!("+ {}", path);
    }
    for path in &diff.modified {
        println!("~ {}", path);
    }
    for path in &diff.removed {
        println!("- {}", path);
    }
    println!(
        "{} to fetch, {} unchanged",
        diff.changed_count(),
        diff.unchanged.len()
    );

    Ok(())
}

/// Print a stored resource.
async fn cmd_show(db: &Path, path: &str, output: Option<&Path>) -> Result<()> {
    let key = ResourcePath::parse(path).context("Invalid resource path")?;
    let store = SqliteStore::open(db).context("Failed to open store")?;

    let resource = store
        .resource(&key)
        .await
        .context("Failed to read resource")?
        .with_context(|| format!("Resource not found: {}", key))?;

    match output {
        Some(file) => {
            std::fs::write(file, &resource.content)
                .with_context(|| format!("Failed to write {}", file.display()))?;
            println!(
                "Wrote {} ({} bytes) to {}",
                key,
                resource.content.len(),
                file.display()
            );
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&resource.content)?;
            stdout.flush()?;
        }
    }

    Ok(())
}

/// Write a manifest for `dir`.
fn cmd_publish(
    dir: &Path,
    name: Option<String>,
    label: Option<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    let output = output.unwrap_or_else(|| dir.join(MANIFEST_FILE));

    let mut builder = ManifestBuilder::new(dir).exclude(MANIFEST_FILE);
    if let Some(name) = name {
        builder = builder.with_name(name);
    }
    if let Some(label) = label {
        builder = builder.with_version(label);
    }

    let manifest = builder
        .build()
        .with_context(|| format!("Failed to build manifest for {}", dir.display()))?;
    std::fs::write(&output, manifest.to_json()?)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "Published {} resources to {}",
        manifest.len(),
        output.display()
    );
    Ok(())
}
