//! Warden Agent - Entry Point
//!
//! Loads the agent configuration, verifies the control-plane credential,
//! then runs one monitor per configured event source plus the dispatcher
//! loop until SIGINT/SIGTERM.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use warden::agent::{
    ActionDispatcher, ControlPlaneClient, LogTailMonitor, MatchedEvent, Monitor, ScriptRunner,
};
use warden::config::MonitorType;
use warden::AgentConfig;

/// Matched events buffered between monitors and the dispatcher
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warden=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Warden agent");

    // Load configuration; any validation failure is fatal.
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("WARDEN_AGENT_CONFIG").ok())
        .unwrap_or_else(|| "agent.yaml".to_string());
    let config = AgentConfig::load(Path::new(&config_path))
        .with_context(|| format!("loading configuration from {config_path}"))?;
    info!(
        path = %config_path,
        monitors = config.event_monitors.len(),
        actions = config.actions.len(),
        "Configuration loaded"
    );

    // Verify the control-plane credential; the agent still runs when the
    // probe fails, remediation just degrades to capture-only actions.
    let api = ControlPlaneClient::new(&config.general)?;
    match api.verify_key().await {
        Ok(true) => info!("Control plane credential verified"),
        Ok(false) => warn!("Control plane rejected the configured API key"),
        Err(err) => warn!("Credential check failed: {err}"),
    }

    let runner = ScriptRunner::new(config.general.scripts_path.clone());
    let dispatcher = Arc::new(ActionDispatcher::new(&config.actions, api, runner));

    let (event_tx, event_rx) = mpsc::channel::<MatchedEvent>(EVENT_CHANNEL_CAPACITY);
    let (shutdown_tx, _) = watch::channel(false);

    // Start the dispatcher loop
    let dispatcher_shutdown = shutdown_tx.subscribe();
    let dispatcher_task = tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        async move { dispatcher.run(event_rx, dispatcher_shutdown).await }
    });

    // Start one monitor per configured event source
    let mut monitor_tasks = Vec::new();
    for monitor_config in &config.event_monitors {
        let monitor: Box<dyn Monitor> = match monitor_config.monitor_type {
            MonitorType::LogFileTail => {
                Box::new(LogTailMonitor::new(monitor_config, event_tx.clone())?)
            }
        };
        let shutdown_rx = shutdown_tx.subscribe();
        monitor_tasks.push(tokio::spawn(async move {
            monitor.run(shutdown_rx).await;
        }));
    }
    // The dispatcher observes channel close once every monitor is gone.
    drop(event_tx);

    info!(monitors = monitor_tasks.len(), "Warden agent started");

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    for task in monitor_tasks {
        let _ = task.await;
    }
    let _ = dispatcher_task.await;

    info!("Warden agent stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
