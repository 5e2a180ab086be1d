use std::sync::Arc;
use std::time::Duration;

use poolsense_broker::manager::FeedManager;
use poolsense_broker::reconnect::ReconnectConfig;
use poolsense_core::{EngineConfig, RuleSet};
use poolsense_pipeline::dispatch::ALARM_QUEUE_CAPACITY;
use poolsense_pipeline::registry::DEFAULT_QUEUE_CAPACITY;
use poolsense_pipeline::{
    AlarmService, DeviceDirectory, Dispatcher, DispatcherConfig, DropPolicy, EventHub,
    RuleProvider, RuleRefresher, StateStore, StateWriter, SubscriberRegistry, TimeSeriesSink,
};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use poolsense_daemon::config::DaemonConfig;
use poolsense_daemon::providers::{FileDefinitions, JsonlSink, NullSink};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "poolsense_daemon=info,poolsense_broker=info,poolsense_pipeline=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = DaemonConfig::from_env();
    tracing::info!(
        broker_url = %config.broker_ws_url,
        definitions = %config.definitions_path.display(),
        "Loaded daemon configuration"
    );

    // --- Sensor catalogue ---
    poolsense_core::points::verify().expect("Sensor catalogue verification failed");
    tracing::info!("Sensor catalogue verified");

    // --- Collaborators ---
    let definitions = Arc::new(FileDefinitions::new(&config.definitions_path));

    let sink: Arc<dyn TimeSeriesSink> = match &config.readings_path {
        Some(path) => {
            let sink = JsonlSink::open(path)
                .await
                .expect("Failed to open reading history file");
            tracing::info!(path = %path.display(), "Recording readings to history file");
            Arc::new(sink)
        }
        None => {
            tracing::info!("No READINGS_PATH configured, reading history disabled");
            Arc::new(NullSink)
        }
    };

    // --- Event hub and pipeline services ---
    let hub = Arc::new(EventHub::default());
    let store = Arc::new(StateStore::new());
    let registry = Arc::new(SubscriberRegistry::new(
        DEFAULT_QUEUE_CAPACITY,
        DropPolicy::DropOldest,
    ));

    let writer_handle = tokio::spawn(StateWriter::run(
        Arc::clone(&store),
        Arc::clone(&sink),
        hub.subscribe(),
    ));

    let fan_out_handle = tokio::spawn(Arc::clone(&registry).run_reading_fan_out(hub.subscribe()));

    // --- Rule refresh ---
    let (rules_tx, rules_rx) = watch::channel(Arc::new(RuleSet::default()));
    let refresher_cancel = CancellationToken::new();
    let refresher = RuleRefresher::with_interval(
        Arc::clone(&definitions) as Arc<dyn RuleProvider>,
        Duration::from_secs(config.rule_refresh_secs),
    );
    let refresher_handle = {
        let cancel = refresher_cancel.clone();
        tokio::spawn(async move { refresher.run(rules_tx, cancel).await })
    };

    // --- Alarm evaluation and dispatch ---
    let (alarm_tx, alarm_rx) = mpsc::channel(ALARM_QUEUE_CAPACITY);
    let engine_handle = tokio::spawn(AlarmService::run(
        hub.subscribe(),
        rules_rx,
        alarm_tx,
        Arc::clone(&registry),
        EngineConfig::default(),
    ));

    let dispatcher_config = DispatcherConfig {
        global_webhook_url: config.global_webhook_url.clone(),
        email_relay_url: config.email_relay_url.clone(),
        ..DispatcherConfig::default()
    };
    let dispatcher_handle = tokio::spawn(Arc::new(Dispatcher::new(dispatcher_config)).run(alarm_rx));

    tracing::info!(
        "Pipeline services started (state writer, fan-out, rule refresher, alarm service, dispatcher)"
    );

    // --- Device feeds ---
    let manager = FeedManager::new(
        config.broker_ws_url.clone(),
        Arc::clone(&hub),
        ReconnectConfig::default(),
    );

    let devices = definitions
        .active_devices()
        .await
        .expect("Failed to load device definitions");
    tracing::info!(devices = devices.len(), "Starting device feeds");
    for device in devices {
        manager.start(device).await;
    }

    // --- Run until signalled ---
    shutdown_signal().await;

    // --- Post-shutdown cleanup ---
    // Close device connections first so no new readings enter the pipeline.
    manager.shutdown().await;
    tracing::info!("Feed manager shut down");

    refresher_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), refresher_handle).await;
    tracing::info!("Rule refresher stopped");

    registry.shutdown().await;

    // Drop the remaining hub senders to close the broadcast channel.
    // This signals the state writer, alarm service, and fan-out to drain
    // and exit; the dispatcher follows once the alarm queue closes.
    drop(manager);
    drop(hub);
    let _ = tokio::time::timeout(Duration::from_secs(5), writer_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), engine_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), fan_out_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), dispatcher_handle).await;
    tracing::info!("Pipeline services shut down");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the daemon
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
