use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use bridge_server::api::{control_routes, metrics_routes};
use bridge_server::bridge::{Bridge, spawn_liveness_monitor};
use bridge_server::config::{BridgeConfig, log_dir_from_env};
use bridge_server::notify::CentralNotifier;
use bridge_server::store::{LibSqlQueueStore, QueueStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_tracing(log_dir_from_env().as_deref());

    let config = BridgeConfig::from_env().context("Invalid bridge configuration")?;

    eprintln!("🌉 Bridge Server v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Worker WS: ws://0.0.0.0:{}/ws", config.port);
    eprintln!("   Control API: http://0.0.0.0:{}", config.port);
    eprintln!("   Metrics: http://0.0.0.0:{}/metrics", config.metrics_port);
    eprintln!("   Queue DB: {}", config.db_path.display());
    match &config.central_server_url {
        Some(url) => eprintln!("   Central server: {url}"),
        None => eprintln!("   Central server: (notifications disabled)"),
    }
    eprintln!();

    let store = LibSqlQueueStore::new_local(&config.db_path)
        .await
        .with_context(|| format!("Failed to open queue store at {}", config.db_path.display()))?;
    let store: Arc<dyn QueueStore> = Arc::new(store);

    let notifier = CentralNotifier::new(config.central_server_url.as_deref());
    let bridge = Bridge::new(config.clone(), store, notifier);

    let waiting = bridge
        .recover()
        .await
        .context("Failed to recover queued tasks")?;
    if waiting > 0 {
        eprintln!("   Recovered {waiting} queued tasks from previous run");
    }

    let _monitor = spawn_liveness_monitor(Arc::clone(&bridge));

    let control_listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Failed to bind control port {}", config.port))?;
    let metrics_listener = TcpListener::bind(("0.0.0.0", config.metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", config.metrics_port))?;

    let (stop_tx, mut stop_rx) = watch::channel(false);

    let metrics_app = metrics_routes(Arc::clone(&bridge));
    let metrics_port = config.metrics_port;
    let metrics_server = tokio::spawn(async move {
        info!(port = metrics_port, "Metrics server started");
        axum::serve(metrics_listener, metrics_app)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.changed().await;
            })
            .await
    });

    let shutdown_bridge = Arc::clone(&bridge);
    info!(port = config.port, "Bridge server started");
    axum::serve(control_listener, control_routes(bridge))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            shutdown_bridge.shutdown().await;
            let _ = stop_tx.send(true);
        })
        .await
        .context("Control server failed")?;

    metrics_server
        .await
        .context("Metrics server task panicked")?
        .context("Metrics server failed")?;

    info!("Bridge server stopped");
    Ok(())
}

/// Log to stderr, and to a daily-rolling file when a log dir is set.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "bridge-server.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();
    guard
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
