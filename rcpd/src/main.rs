//! RouterOS control plane daemon: loads configuration and the device
//! manifest, wires the health poller and snapshot pipeline onto a cron
//! scheduler, and serves `/health`, `/ready`, `/metrics` over HTTP.

mod devices;
mod http_api;
mod scheduler;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use rcp_common::config::Settings;
use rcp_common::crypto::CredentialCipher;
use rcp_common::domain::device::Environment;
use rcp_core::health::HealthService;
use rcp_core::notify::EventBus;
use rcp_core::snapshot::SnapshotPipeline;
use rcp_core::store::Store;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use transport::DefaultTransportFactory;

#[derive(Parser)]
#[command(name = "rcpd")]
#[command(author, version, about = "RouterOS control plane daemon")]
struct Cli {
    /// JSON device manifest loaded at startup.
    #[arg(long)]
    devices_file: Option<PathBuf>,

    /// Port the observability HTTP server listens on.
    #[arg(long, default_value_t = 8080)]
    http_port: u16,

    /// Cron expression for the periodic health poll.
    #[arg(long, default_value = "0/30 * * * * *")]
    health_poll_cron: String,

    /// Cron expression for the periodic snapshot capture/prune sweep.
    #[arg(long, default_value = "0 0 * * * *")]
    snapshot_cron: String,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { EnvFilter::new("debug") } else { EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")) };
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    info!("starting rcpd");

    let settings = Settings::from_env().map_err(|errors| {
        for err in &errors {
            warn!(%err, "invalid configuration");
        }
        anyhow::anyhow!("{} configuration error(s), see log", errors.len())
    })?;

    if settings.is_insecure_lab_key() && settings.environment != Environment::Lab {
        bail!("refusing to start: insecure encryption key outside the lab environment");
    }

    rcp_core::metrics::init();

    let store = Store::new();
    if let Some(path) = &cli.devices_file {
        let devices = devices::load_manifest(path).with_context(|| format!("loading device manifest from {}", path.display()))?;
        info!(count = devices.len(), "loaded device manifest");
        for device in devices {
            store.upsert_device(device).await;
        }
    } else {
        info!("no device manifest supplied, starting with an empty fleet");
    }

    let cipher = Arc::new(CredentialCipher::from_settings(&settings)?);
    let factory = Arc::new(DefaultTransportFactory::default());
    let broker = Arc::new(rcp_transport::broker::Broker::new(Arc::new(store.clone()), factory, cipher, settings.routeros_verify_ssl, Duration::from_secs(30)));

    let events = EventBus::new(64);
    let health = Arc::new(HealthService::new(store.clone(), broker.clone(), events));
    let snapshots = Arc::new(SnapshotPipeline::new(
        store.clone(),
        broker.clone(),
        settings.snapshot_max_size_bytes,
        settings.snapshot_compression_level,
        settings.transport_semaphore_permits,
        settings.environment,
    ));

    let _scheduler = if settings.snapshot_capture_enabled {
        Some(scheduler::start(store.clone(), health.clone(), snapshots.clone(), &cli.health_poll_cron, &cli.snapshot_cron, settings.snapshot_retention_count).await?)
    } else {
        info!("snapshot capture disabled by configuration, scheduler not started");
        None
    };

    let http_state = http_api::HttpState {
        store: store.clone(),
        version: env!("CARGO_PKG_VERSION"),
        started_at: Instant::now(),
        pid: std::process::id(),
    };
    let router = http_api::create_router(http_state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], cli.http_port));
    info!(%addr, "serving observability endpoints");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
