//! Alarm evaluation service.
//!
//! [`AlarmService`] bridges the event hub to the pure rule engine in
//! `poolsense_core`: readings arrive on the broadcast channel, refreshed rule
//! snapshots arrive on a watch channel, and emitted alarms go to the
//! dispatcher queue and the live subscriber registry. [`RuleRefresher`]
//! polls the external rule store and publishes the snapshots.

use std::sync::Arc;
use std::time::Duration;

use poolsense_core::{AlarmEngine, AlarmEvent, EngineConfig, ReadingEvent, RuleSet};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::ports::RuleProvider;
use crate::registry::SubscriberRegistry;

/// Default poll interval for the external rule store.
const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// AlarmService
// ---------------------------------------------------------------------------

/// Background service that evaluates readings against the active rule set.
pub struct AlarmService;

impl AlarmService {
    /// Run the evaluation loop.
    ///
    /// The rule set is copy-on-refresh: each watch update swaps a complete
    /// immutable snapshot into the engine, carrying over state for unchanged
    /// rules. Emitted alarms are pushed to live subscribers and queued for
    /// the dispatcher without ever awaiting network I/O. The loop exits when
    /// the hub is dropped.
    pub async fn run(
        mut readings: broadcast::Receiver<ReadingEvent>,
        mut rules: watch::Receiver<Arc<RuleSet>>,
        alarms: mpsc::Sender<AlarmEvent>,
        registry: Arc<SubscriberRegistry>,
        config: EngineConfig,
    ) {
        let mut engine = AlarmEngine::new(config);
        let initial = rules.borrow_and_update().clone();
        engine.apply_rules(initial);

        let mut rules_live = true;
        loop {
            tokio::select! {
                changed = rules.changed(), if rules_live => match changed {
                    Ok(()) => {
                        let snapshot = rules.borrow_and_update().clone();
                        tracing::info!(rules = snapshot.len(), "alarm rules refreshed");
                        engine.apply_rules(snapshot);
                    }
                    Err(_) => {
                        rules_live = false;
                        tracing::warn!("rule channel closed, keeping the last rule set");
                    }
                },
                received = readings.recv() => match received {
                    Ok(event) => {
                        for alarm in engine.evaluate(&event) {
                            registry.push_alarm(&alarm).await;
                            match alarms.try_send(alarm) {
                                Ok(()) => {}
                                Err(mpsc::error::TrySendError::Full(alarm)) => {
                                    tracing::warn!(
                                        alarm = %alarm.alarm_name,
                                        "dispatcher queue full, notification dropped"
                                    );
                                }
                                Err(mpsc::error::TrySendError::Closed(alarm)) => {
                                    tracing::warn!(
                                        alarm = %alarm.alarm_name,
                                        "dispatcher gone, notification dropped"
                                    );
                                }
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "alarm service lagged, some readings were not evaluated");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("event hub closed, alarm service shutting down");
                        break;
                    }
                },
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RuleRefresher
// ---------------------------------------------------------------------------

/// Background service that keeps the rule snapshot current.
pub struct RuleRefresher {
    provider: Arc<dyn RuleProvider>,
    interval: Duration,
}

impl RuleRefresher {
    pub fn new(provider: Arc<dyn RuleProvider>) -> Self {
        Self::with_interval(provider, DEFAULT_REFRESH_INTERVAL)
    }

    pub fn with_interval(provider: Arc<dyn RuleProvider>, interval: Duration) -> Self {
        Self { provider, interval }
    }

    /// Run the refresh loop.
    ///
    /// Pulls the rule store on a fixed interval (the first pull happens
    /// immediately) and publishes each snapshot on the watch channel. A
    /// failed pull keeps the previous snapshot. The loop exits when
    /// cancelled or once the engine side is gone.
    pub async fn run(&self, tx: watch::Sender<Arc<RuleSet>>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("rule refresher cancelled");
                    break;
                }
                _ = interval.tick() => {
                    match self.provider.load_rules().await {
                        Ok(snapshot) => {
                            let set = Arc::new(RuleSet::build(snapshot.rules, snapshot.device_names));
                            if tx.send(set).is_err() {
                                tracing::info!("rule channel closed, refresher shutting down");
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "rule refresh failed, keeping previous set");
                        }
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
