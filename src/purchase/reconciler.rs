//! Background reconciliation of submitted-but-unresolved purchases.
//!
//! Entries that reached a vendor but never saw a terminal status are
//! re-queried on an interval. A single bad entry never aborts a cycle, and a
//! failed requery leaves the entry pending — reconciliation is always safe to
//! repeat.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::CoreError;
use crate::purchase::orchestrator::PurchaseOrchestrator;
use crate::wallet::store::WalletStore;

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// How often the worker wakes up to scan for unresolved entries.
    pub poll_interval: Duration,
    /// Entries younger than this are skipped; the synchronous path is
    /// usually still working on them.
    pub grace_period: Duration,
    /// Maximum entries fetched per cycle.
    pub batch_size: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(120),
            grace_period: Duration::from_secs(90),
            batch_size: 100,
        }
    }
}

impl ReconcilerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: Duration::from_secs(
                std::env::var("RECONCILER_POLL_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.poll_interval.as_secs()),
            ),
            grace_period: Duration::from_secs(
                std::env::var("RECONCILER_GRACE_PERIOD_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.grace_period.as_secs()),
            ),
            batch_size: std::env::var("RECONCILER_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.batch_size),
        }
    }
}

pub struct ReconcileWorker {
    store: Arc<dyn WalletStore>,
    orchestrator: Arc<PurchaseOrchestrator>,
    config: ReconcilerConfig,
}

impl ReconcileWorker {
    pub fn new(
        store: Arc<dyn WalletStore>,
        orchestrator: Arc<PurchaseOrchestrator>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            orchestrator,
            config,
        }
    }

    /// One reconciliation pass. Returns how many entries reached a terminal
    /// state this cycle.
    pub async fn run_cycle(&self) -> usize {
        let cutoff = Utc::now()
            - ChronoDuration::seconds(self.config.grace_period.as_secs() as i64);
        let pending = match self
            .store
            .pending_vendor_entries(cutoff, self.config.batch_size)
            .await
        {
            Ok(entries) => entries,
            Err(err) => {
                warn!(error = %err, "could not fetch entries for reconciliation");
                return 0;
            }
        };

        if pending.is_empty() {
            return 0;
        }
        info!(count = pending.len(), "reconciling unresolved purchases");

        let mut finalised = 0;
        for entry in pending {
            match self.orchestrator.query_transaction_status(entry.id).await {
                Ok(receipt) if receipt.status.is_terminal() => {
                    info!(
                        reference = %receipt.reference,
                        status = %receipt.status,
                        "reconciliation finalised entry"
                    );
                    finalised += 1;
                }
                Ok(_) => {}
                Err(CoreError::Reconciliation { entry_id, message }) => {
                    warn!(
                        entry = %entry_id,
                        message = %message,
                        "requery failed, entry left pending"
                    );
                }
                Err(err) => {
                    warn!(
                        reference = %entry.reference,
                        error = %err,
                        "reconciliation error"
                    );
                }
            }
        }
        finalised
    }

    /// Interval loop with graceful shutdown, independent of request traffic.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            "reconcile worker started"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("reconcile worker stopping");
                        return;
                    }
                }
            }
        }
    }
}
