//! ZoneSync daemon: continuous replication from a remote source zone.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use zonesync_core::{Config, LogFormat, StoreBackend};
use zonesync_engine::{DataSync, SyncContext};
use zonesync_remote::{HttpSourceClient, NoOpTransfer, SourceEndpoint};
use zonesync_store::{LogStore, MemoryLogStore, RedbLogStore};

mod cli;

use cli::{Cli, Commands, RunArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_daemon(args).await,
        Commands::Status(args) => print_status(args).await,
        Commands::InitStatus(args) => init_status(args).await,
        Commands::Version => {
            println!("zonesync {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn run_daemon(args: RunArgs) -> Result<()> {
    let config = load_config(&args)?;
    init_logging(&config)?;

    let sync = Arc::new(build_sync(&config)?);
    info!(
        source_zone = %config.source.zone,
        endpoint = %config.source.endpoint,
        "starting zonesync daemon"
    );

    let runner = sync.clone();
    let daemon = async move {
        loop {
            match runner.run().await {
                Ok(()) => break,
                Err(err) => {
                    error!(error = %err, "sync run failed, retrying");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    };

    tokio::select! {
        _ = daemon => {}
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    info!("zonesync daemon stopped");
    Ok(())
}

async fn print_status(args: RunArgs) -> Result<()> {
    let config = load_config(&args)?;
    init_logging(&config)?;
    let sync = build_sync(&config)?;

    match sync.read_sync_status().await? {
        None => println!("sync status for zone {:?}: not initialized", config.source.zone),
        Some((info, markers)) => {
            println!("zone {:?}: state={:?} shards={}", config.source.zone, info.state, info.num_shards);
            for (shard_id, marker) in markers {
                println!(
                    "  shard {shard_id}: state={:?} marker={:?} pos={}/{}",
                    marker.state, marker.marker, marker.pos, marker.total_entries
                );
            }
        }
    }
    Ok(())
}

async fn init_status(args: RunArgs) -> Result<()> {
    let config = load_config(&args)?;
    init_logging(&config)?;
    let sync = build_sync(&config)?;

    let info = sync.init_sync_status().await?;
    println!(
        "initialized sync status for zone {:?}: state={:?} shards={}",
        config.source.zone, info.state, info.num_shards
    );
    Ok(())
}

fn build_sync(config: &Config) -> Result<DataSync> {
    config.sync.validate().context("invalid sync tuning")?;

    let store: Arc<dyn LogStore> = match config.store.backend {
        StoreBackend::Redb => Arc::new(
            RedbLogStore::open(&config.store.path).context("failed to open log store")?,
        ),
        StoreBackend::Memory => Arc::new(MemoryLogStore::new()),
    };

    let mut endpoint =
        SourceEndpoint::new(&config.source.endpoint).with_timeout(config.source.timeout());
    if let (Some(access), Some(secret)) = (&config.source.access_key, &config.source.secret_key) {
        endpoint = endpoint.with_credentials(access, secret);
    }
    let remote = HttpSourceClient::new(&endpoint).context("failed to build source client")?;

    let ctx = SyncContext::new(
        config.source.zone.clone(),
        store,
        Arc::new(remote),
        // Object payload transfer is delegated to the gateway; the daemon
        // itself runs with the logging primitive.
        Arc::new(NoOpTransfer),
        config.sync.clone(),
    );
    Ok(DataSync::new(Arc::new(ctx)))
}

fn load_config(args: &RunArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => {
            let default_paths =
                [PathBuf::from("zonesync.toml"), PathBuf::from("/etc/zonesync/zonesync.toml")];
            match default_paths.iter().find(|p| p.exists()) {
                Some(path) => Config::from_file(path)
                    .with_context(|| format!("failed to load config from {}", path.display()))?,
                None => Config::default(),
            }
        }
    };

    if let Some(zone) = &args.source_zone {
        config.source.zone = zone.clone();
    }
    if let Some(endpoint) = &args.endpoint {
        config.source.endpoint = endpoint.clone();
    }
    Ok(config)
}

fn init_logging(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    let fmt_layer = tracing_subscriber::fmt::layer();

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry().with(filter).with(fmt_layer.json()).init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry().with(filter).with(fmt_layer).init();
        }
    }

    Ok(())
}
