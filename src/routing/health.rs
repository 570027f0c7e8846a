//! Vendor health tracking.
//!
//! One record per configured vendor, in memory only — rebuilt from scratch on
//! restart. Two feedback paths write here: the periodic probe loop and every
//! real purchase outcome, so the router can react to a vendor going bad
//! faster than the check interval. Readers tolerate slightly stale data; a
//! purchase never blocks on this map.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::vendors::types::VendorName;
use crate::vendors::VendorRegistry;

/// Error-rate EWMA weight for the newest observation.
const EWMA_ALPHA: f64 = 0.3;
/// Error rate above which a vendor is treated as degraded.
const DEGRADED_THRESHOLD: f64 = 15.0;
/// Error rate above which repeated failures take a vendor offline.
const OFFLINE_THRESHOLD: f64 = 75.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Online,
    Degraded,
    Offline,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthState::Online => "online",
            HealthState::Degraded => "degraded",
            HealthState::Offline => "offline",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorHealth {
    pub status: HealthState,
    pub response_time_ms: u64,
    /// Rolling error percentage in `[0, 100]`.
    pub error_rate: f64,
    pub last_checked: DateTime<Utc>,
}

impl Default for VendorHealth {
    fn default() -> Self {
        // A vendor nobody has observed yet is assumed usable; the first
        // probe or outcome corrects this within one cycle.
        Self {
            status: HealthState::Online,
            response_time_ms: 0,
            error_rate: 0.0,
            last_checked: Utc::now(),
        }
    }
}

pub struct HealthManager {
    records: Arc<RwLock<HashMap<VendorName, VendorHealth>>>,
}

impl HealthManager {
    pub fn new(vendors: &[VendorName]) -> Self {
        let records = vendors
            .iter()
            .map(|v| (*v, VendorHealth::default()))
            .collect();
        Self {
            records: Arc::new(RwLock::new(records)),
        }
    }

    pub async fn health_of(&self, vendor: VendorName) -> VendorHealth {
        self.records
            .read()
            .await
            .get(&vendor)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn snapshot(&self) -> HashMap<VendorName, VendorHealth> {
        self.records.read().await.clone()
    }

    /// Inline feedback from a real purchase or probe result.
    pub async fn record_outcome(&self, vendor: VendorName, ok: bool, elapsed: Duration) {
        let mut records = self.records.write().await;
        let record = records.entry(vendor).or_default();

        let observation = if ok { 0.0 } else { 100.0 };
        record.error_rate =
            (1.0 - EWMA_ALPHA) * record.error_rate + EWMA_ALPHA * observation;
        let elapsed_ms = elapsed.as_millis() as u64;
        record.response_time_ms = if record.response_time_ms == 0 {
            elapsed_ms
        } else {
            ((1.0 - EWMA_ALPHA) * record.response_time_ms as f64
                + EWMA_ALPHA * elapsed_ms as f64) as u64
        };
        record.last_checked = Utc::now();

        record.status = if record.error_rate >= OFFLINE_THRESHOLD {
            HealthState::Offline
        } else if record.error_rate >= DEGRADED_THRESHOLD {
            HealthState::Degraded
        } else {
            HealthState::Online
        };

        debug!(
            vendor = %vendor,
            ok,
            error_rate = record.error_rate,
            status = %record.status,
            "health updated"
        );
    }

    /// The adapter did not answer at all.
    pub async fn mark_offline(&self, vendor: VendorName) {
        let mut records = self.records.write().await;
        let record = records.entry(vendor).or_default();
        record.status = HealthState::Offline;
        record.error_rate = 100.0;
        record.last_checked = Utc::now();
        warn!(vendor = %vendor, "vendor marked offline");
    }

    /// Probe every registered adapter once (balance fetch) and record the
    /// results.
    pub async fn check_all(&self, registry: &VendorRegistry) {
        let probes = registry.iter().map(|(name, adapter)| {
            let name = *name;
            let adapter = adapter.clone();
            async move {
                let started = Instant::now();
                let result = adapter.balance().await;
                (name, result, started.elapsed())
            }
        });

        for (name, result, elapsed) in join_all(probes).await {
            match result {
                Ok(_) => self.record_outcome(name, true, elapsed).await,
                Err(err) if err.is_indeterminate() => {
                    debug!(vendor = %name, error = %err, "health probe got no answer");
                    self.mark_offline(name).await;
                }
                Err(err) => {
                    debug!(vendor = %name, error = %err, "health probe failed");
                    self.record_outcome(name, false, elapsed).await;
                }
            }
        }
    }

    /// Periodic probe loop. Runs until the shutdown channel flips; never
    /// blocks purchase traffic — it only writes to the shared map.
    pub async fn run(
        &self,
        registry: Arc<VendorRegistry>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_secs = interval.as_secs(), "health check loop started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all(&registry).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("health check loop stopping");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successes_keep_a_vendor_online() {
        let manager = HealthManager::new(&[VendorName::Vtpass]);
        for _ in 0..5 {
            manager
                .record_outcome(VendorName::Vtpass, true, Duration::from_millis(120))
                .await;
        }
        let health = manager.health_of(VendorName::Vtpass).await;
        assert_eq!(health.status, HealthState::Online);
        assert!(health.error_rate < 1.0);
        assert!(health.response_time_ms > 0);
    }

    #[tokio::test]
    async fn failures_degrade_then_offline() {
        let manager = HealthManager::new(&[VendorName::Shago]);
        manager
            .record_outcome(VendorName::Shago, false, Duration::from_millis(900))
            .await;
        assert_eq!(
            manager.health_of(VendorName::Shago).await.status,
            HealthState::Degraded
        );

        for _ in 0..10 {
            manager
                .record_outcome(VendorName::Shago, false, Duration::from_millis(900))
                .await;
        }
        assert_eq!(
            manager.health_of(VendorName::Shago).await.status,
            HealthState::Offline
        );
    }

    #[tokio::test]
    async fn recovery_brings_a_vendor_back() {
        let manager = HealthManager::new(&[VendorName::Epins]);
        manager.mark_offline(VendorName::Epins).await;
        for _ in 0..12 {
            manager
                .record_outcome(VendorName::Epins, true, Duration::from_millis(80))
                .await;
        }
        assert_eq!(
            manager.health_of(VendorName::Epins).await.status,
            HealthState::Online
        );
    }

    #[tokio::test]
    async fn unknown_vendor_reads_as_default_online() {
        let manager = HealthManager::new(&[]);
        let health = manager.health_of(VendorName::Clubkonnect).await;
        assert_eq!(health.status, HealthState::Online);
    }
}
