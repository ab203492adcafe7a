use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use dbvitals::{
    actors::{Engine, EngineOptions, publisher::DEFAULT_CAPACITY},
    config::{HubConfig, StorageConfig, read_config_file},
    probe::HttpProbe,
    storage::{MemoryBackend, StorageBackend, retention::spawn_retention_task},
};
use tracing::{info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("dbvitals", LevelFilter::DEBUG),
        ("dbvitals_hub", LevelFilter::TRACE),
        ("tower_http", LevelFilter::DEBUG),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    let (store, retention_days) = open_storage(&config.storage).await?;
    if let Some(days) = retention_days {
        spawn_retention_task(store.clone(), days);
    }

    let probe = HttpProbe::new(
        config.probe.url.clone(),
        config.probe.token.clone(),
        Duration::from_secs(config.probe.timeout_secs),
    )
    .context("failed to build probe client")?;

    let HubConfig {
        scheduler,
        api,
        instances,
        collectors,
        ..
    } = config;

    let engine = Engine::start(EngineOptions {
        store,
        probe: Arc::new(probe),
        instances,
        seeds: collectors,
        tick: scheduler.tick(),
        event_capacity: DEFAULT_CAPACITY,
    })
    .await?;

    #[cfg(feature = "api")]
    {
        use dbvitals::api::{ApiConfig, ApiState, spawn_api_server};

        spawn_api_server(ApiConfig::from(&api), ApiState::new(&engine)).await?;
    }
    #[cfg(not(feature = "api"))]
    let _ = api;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("shutting down");
    engine.shutdown().await?;
    engine.store.close().await?;

    Ok(())
}

async fn open_storage(
    config: &StorageConfig,
) -> anyhow::Result<(Arc<dyn StorageBackend>, Option<u32>)> {
    match config {
        StorageConfig::None => {
            warn!("using in-memory storage, scores are lost on restart");
            Ok((Arc::new(MemoryBackend::new()), None))
        }

        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite {
            path,
            retention_days,
        } => {
            let backend = dbvitals::storage::sqlite::SqliteBackend::new(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            Ok((Arc::new(backend), Some(*retention_days)))
        }

        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            anyhow::bail!("SQLite storage requested but the storage-sqlite feature is disabled")
        }
    }
}
