use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::settlement::{SettlementEngine, SettlementReport};
use super::subscription::SubscriptionService;

/// Periodic driver for settlement and the subscription expiry sweep.
///
/// Ticks may overlap with manual settlement runs; the engine's ledger checks make that
/// safe, so no lock is taken here.
pub struct SettlementScheduler {
    engine: Arc<SettlementEngine>,
    subscriptions: Arc<SubscriptionService>,
    interval: Duration,
}

pub struct SchedulerHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal the scheduler to stop after the current tick.
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }

    /// Stops the scheduler and waits for the running tick to finish.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(err) = self.task.await {
            error!(error = %err, "settlement scheduler task ended abnormally");
        }
    }
}

impl SettlementScheduler {
    pub fn new(
        engine: Arc<SettlementEngine>,
        subscriptions: Arc<SubscriptionService>,
        interval: Duration,
    ) -> Self {
        Self {
            engine,
            subscriptions,
            interval,
        }
    }

    /// Runs one tick. Failures are logged and never stop the scheduler.
    pub async fn tick(&self, now: DateTime<Utc>) -> Option<SettlementReport> {
        if let Err(err) = self.subscriptions.sweep_expired(now).await {
            error!(error = %err, "subscription expiry sweep failed");
        }

        match self.engine.run_tick(now).await {
            Ok(report) => Some(report),
            Err(err) => {
                error!(error = %err, "settlement tick failed");
                None
            }
        }
    }

    pub fn spawn(self) -> SchedulerHandle {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = self.interval.as_secs(), "settlement scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick(Utc::now()).await;
                    }
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            info!("settlement scheduler stopped");
                            break;
                        }
                    }
                }
            }
        });

        SchedulerHandle {
            cancel: cancel_tx,
            task,
        }
    }
}
