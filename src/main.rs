//! proxy-config-sync
//!
//! Keeps the local proxy engine in line with the configuration published in
//! the distributed store.
//!
//! # Architecture Overview
//!
//! ```text
//!   ┌──────────────┐   hash/blob   ┌──────────────────────────────────────────┐
//!   │  KV store    │──────────────▶│              SyncController              │
//!   └──────────────┘               │                                          │
//!   ┌──────────────┐  announce     │  stage ─▶ validate ─▶ promote ─▶ apply   │
//!   │  update bus  │──────────────▶│    │          │           │         │    │
//!   └──────────────┘               └────┼──────────┼───────────┼─────────┼────┘
//!          ▲                            ▼          ▼           ▼         ▼
//!   bootstrap watcher              staging dir  engine -C   active dir  engine /
//!                                                                       admin CLI
//!
//!   admin API (/health, /ready, /admin/*)   metrics (Prometheus)   signals
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

use proxy_config_sync::admin::{self, AppState};
use proxy_config_sync::bus::{BusSettings, NotificationSubscriber};
use proxy_config_sync::config::loader::load_from_env;
use proxy_config_sync::config::watcher::{load_bootstrap, BootstrapWatcher};
use proxy_config_sync::config::load_config;
use proxy_config_sync::lifecycle::signals::{spawn_signal_handler, HangupSignal};
use proxy_config_sync::observability::{logging, metrics};
use proxy_config_sync::process::{ProcFsTable, TokioCommandRunner};
use proxy_config_sync::store::HttpConfigStore;
use proxy_config_sync::{Shutdown, SyncConfig, SyncController, SyncService};

#[derive(Parser)]
#[command(name = "proxy-config-sync", version)]
#[command(about = "Synchronizes edge proxy configuration and reloads it safely", long_about = None)]
struct Args {
    /// TOML configuration file. Defaults plus environment overrides when absent.
    #[arg(short, long, env = "PROXY_SYNC_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let loaded = match &args.config {
        Some(path) => load_config(path),
        None => load_from_env(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::from(2);
        }
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), role = %config.controller.role, "proxy-config-sync starting");

    match run(config).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "proxy-config-sync exiting");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: SyncConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let signals = spawn_signal_handler(shutdown.clone());

    let store = Arc::new(HttpConfigStore::new(&config.store)?);
    let controller = Arc::new(SyncController::new(
        &config,
        store,
        Arc::new(ProcFsTable),
        Arc::new(TokioCommandRunner),
        shutdown.token(),
    ));

    // Bus settings: the bootstrap file wins over the [bus] section and is
    // watched for topology changes.
    let fallback = BusSettings::from_config(&config.bus);
    let (settings_rx, _watcher, _settings_tx) = match &config.bus.bootstrap_path {
        Some(path) => {
            let initial = load_bootstrap(path).unwrap_or_else(|e| {
                tracing::warn!(path = ?path, error = %e, "Bus bootstrap unreadable, using [bus] settings");
                fallback
            });
            let (watcher, settings_rx) = BootstrapWatcher::new(path, initial);
            (settings_rx, Some(watcher.run()?), None)
        }
        None => {
            let (settings_tx, settings_rx) = watch::channel(fallback);
            (settings_rx, None, Some(settings_tx))
        }
    };

    let (notification_tx, notification_rx) = mpsc::channel(32);
    let subscription =
        NotificationSubscriber::new(settings_rx).subscribe(notification_tx, &shutdown.token());

    let (service, trigger) = SyncService::new(controller.clone(), &config.controller, notification_rx);

    let admin_task = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let state = AppState::new(controller.clone(), trigger, &config.admin.api_key);
        Some(tokio::spawn(admin::serve(listener, state, shutdown.token())))
    } else {
        None
    };

    let mut hangup = HangupSignal::new();
    let service_run = service.run(shutdown.token());
    tokio::pin!(service_run);
    let result = loop {
        tokio::select! {
            result = &mut service_run => break result,
            () = hangup.recv() => {
                tracing::info!("Received SIGHUP, resubscribing to the update bus");
                subscription.resubscribe();
            }
        }
    };

    shutdown.trigger();
    subscription.shutdown().await;
    if let Some(task) = admin_task {
        match task.await {
            Ok(Err(e)) => tracing::error!(error = %e, "Admin API failed"),
            Err(e) => tracing::error!(error = %e, "Admin API task failed"),
            Ok(Ok(())) => {}
        }
    }
    let _ = signals.await;

    result.map_err(Into::into)
}
