//! Vendor selection.
//!
//! Given a (service, network) pair the router returns an ordered candidate
//! list. Health informs the ordering but never blocks: the map is read once
//! per request and stale data only costs a slightly worse first pick.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::routing::health::{HealthManager, HealthState, VendorHealth};
use crate::vendors::types::{Network, ServiceKind, VendorName};

/// Static routing rule, admin-managed and read-only at request time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    pub service: ServiceKind,
    pub network: Option<Network>,
    pub primary: VendorName,
    pub fallback: Option<VendorName>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// Rule-based primary/fallback, with per-service defaults.
    RuleBased,
    /// Rank every active vendor by score, best first.
    LoadBalanced,
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub mode: RoutingMode,
    /// Tie-break order; lower wins.
    pub priorities: HashMap<VendorName, u32>,
    pub health_check_interval_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        let mut priorities = HashMap::new();
        for (index, vendor) in VendorName::all().iter().enumerate() {
            priorities.insert(*vendor, index as u32 + 1);
        }
        Self {
            mode: RoutingMode::RuleBased,
            priorities,
            health_check_interval_secs: 60,
        }
    }
}

impl RouterConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(mode) = std::env::var("ROUTER_MODE") {
            if mode.eq_ignore_ascii_case("load_balanced") {
                config.mode = RoutingMode::LoadBalanced;
            }
        }
        config.health_check_interval_secs = std::env::var("HEALTH_CHECK_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(config.health_check_interval_secs);
        // ROUTER_PRIORITIES=vtpass:1,shago:2,…
        if let Ok(raw) = std::env::var("ROUTER_PRIORITIES") {
            for pair in raw.split(',') {
                if let Some((name, rank)) = pair.split_once(':') {
                    if let (Ok(vendor), Ok(rank)) =
                        (VendorName::from_str(name), rank.trim().parse::<u32>())
                    {
                        config.priorities.insert(vendor, rank);
                    }
                }
            }
        }
        config
    }
}

/// Static per-service default used when no routing rule matches.
pub fn default_vendor(service: ServiceKind) -> VendorName {
    match service {
        ServiceKind::Airtime | ServiceKind::Data => VendorName::Vtpass,
        ServiceKind::Electricity => VendorName::Clubkonnect,
        ServiceKind::CableTv => VendorName::Vtpass,
        ServiceKind::Betting => VendorName::Shago,
        ServiceKind::ExamPin => VendorName::Epins,
    }
}

pub struct ProviderRouter {
    config: RouterConfig,
    rules: RwLock<Vec<RoutingRule>>,
    health: Arc<HealthManager>,
    /// Configured vendors with their service coverage, in insertion order
    /// (the final tie-break).
    vendors: Vec<(VendorName, &'static [ServiceKind])>,
}

impl ProviderRouter {
    pub fn new(
        config: RouterConfig,
        health: Arc<HealthManager>,
        vendors: Vec<(VendorName, &'static [ServiceKind])>,
    ) -> Self {
        Self {
            config,
            rules: RwLock::new(Vec::new()),
            health,
            vendors,
        }
    }

    /// Replace the rule set. Admin-driven; callers reload after rule edits.
    pub async fn load_rules(&self, rules: Vec<RoutingRule>) {
        *self.rules.write().await = rules;
    }

    fn supports(&self, vendor: VendorName, service: ServiceKind) -> bool {
        self.vendors
            .iter()
            .any(|(name, services)| *name == vendor && services.contains(&service))
    }

    /// Spec scoring: weights sum to 100. Status contributes 40/20/0, response
    /// time up to 30 (inverse), error rate up to 30 (inverse).
    pub fn score(health: &VendorHealth) -> f64 {
        let status_score = match health.status {
            HealthState::Online => 40.0,
            HealthState::Degraded => 20.0,
            HealthState::Offline => 0.0,
        };
        let latency_score = (30.0 - health.response_time_ms as f64 / 100.0).max(0.0);
        let error_score = (30.0 - health.error_rate).max(0.0);
        status_score + latency_score + error_score
    }

    /// Ordered candidates for one dispatch attempt. `exclude` carries vendors
    /// that already failed this purchase.
    pub async fn candidates(
        &self,
        service: ServiceKind,
        network: Option<Network>,
        exclude: &[VendorName],
    ) -> Vec<VendorName> {
        let snapshot = self.health.snapshot().await;
        let usable = |vendor: VendorName| -> bool {
            !exclude.contains(&vendor)
                && self.supports(vendor, service)
                && snapshot
                    .get(&vendor)
                    .map(|h| h.status != HealthState::Offline)
                    .unwrap_or(true)
        };

        if self.config.mode == RoutingMode::LoadBalanced {
            return self.ranked(service, &snapshot, &usable);
        }

        let rules = self.rules.read().await;
        if let Some(rule) = rules
            .iter()
            .find(|r| r.active && r.service == service && r.network == network)
        {
            let mut candidates = Vec::new();
            if usable(rule.primary) {
                candidates.push(rule.primary);
            }
            if let Some(fallback) = rule.fallback {
                if fallback != rule.primary && usable(fallback) {
                    candidates.push(fallback);
                }
            }
            if !candidates.is_empty() {
                debug!(service = %service, ?network, ?candidates, "routing by rule");
                return candidates;
            }
        }
        drop(rules);

        let fallback = default_vendor(service);
        if usable(fallback) {
            debug!(service = %service, vendor = %fallback, "routing by service default");
            return vec![fallback];
        }

        // Default is down too; fall back to scored ranking rather than
        // failing a purchase that another vendor could serve.
        self.ranked(service, &snapshot, &usable)
    }

    fn ranked(
        &self,
        service: ServiceKind,
        snapshot: &HashMap<VendorName, VendorHealth>,
        usable: &dyn Fn(VendorName) -> bool,
    ) -> Vec<VendorName> {
        let default_health = VendorHealth::default();
        let mut scored: Vec<(f64, u32, usize, VendorName)> = self
            .vendors
            .iter()
            .enumerate()
            .filter(|(_, (vendor, _))| usable(*vendor))
            .map(|(index, (vendor, _))| {
                let health = snapshot.get(vendor).unwrap_or(&default_health);
                let priority = self
                    .config
                    .priorities
                    .get(vendor)
                    .copied()
                    .unwrap_or(u32::MAX);
                (Self::score(health), priority, index, *vendor)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        let ranked: Vec<VendorName> = scored.into_iter().map(|(_, _, _, v)| v).collect();
        debug!(service = %service, ?ranked, "routing by score");
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn all_vendors() -> Vec<(VendorName, &'static [ServiceKind])> {
        const PHONE: &[ServiceKind] = &[ServiceKind::Airtime, ServiceKind::Data];
        vec![
            (VendorName::Vtpass, PHONE),
            (VendorName::Clubkonnect, PHONE),
            (VendorName::Shago, PHONE),
        ]
    }

    fn router(mode: RoutingMode, health: Arc<HealthManager>) -> ProviderRouter {
        ProviderRouter::new(
            RouterConfig {
                mode,
                ..RouterConfig::default()
            },
            health,
            all_vendors(),
        )
    }

    #[tokio::test]
    async fn rule_gives_primary_then_fallback() {
        let health = Arc::new(HealthManager::new(VendorName::all()));
        let router = router(RoutingMode::RuleBased, health);
        router
            .load_rules(vec![RoutingRule {
                service: ServiceKind::Data,
                network: Some(Network::Mtn),
                primary: VendorName::Clubkonnect,
                fallback: Some(VendorName::Vtpass),
                active: true,
            }])
            .await;

        let candidates = router
            .candidates(ServiceKind::Data, Some(Network::Mtn), &[])
            .await;
        assert_eq!(
            candidates,
            vec![VendorName::Clubkonnect, VendorName::Vtpass]
        );
    }

    #[tokio::test]
    async fn offline_primary_is_skipped() {
        let health = Arc::new(HealthManager::new(VendorName::all()));
        health.mark_offline(VendorName::Clubkonnect).await;
        let router = router(RoutingMode::RuleBased, health);
        router
            .load_rules(vec![RoutingRule {
                service: ServiceKind::Data,
                network: Some(Network::Mtn),
                primary: VendorName::Clubkonnect,
                fallback: Some(VendorName::Vtpass),
                active: true,
            }])
            .await;

        let candidates = router
            .candidates(ServiceKind::Data, Some(Network::Mtn), &[])
            .await;
        assert_eq!(candidates, vec![VendorName::Vtpass]);
    }

    #[tokio::test]
    async fn inactive_rule_falls_back_to_service_default() {
        let health = Arc::new(HealthManager::new(VendorName::all()));
        let router = router(RoutingMode::RuleBased, health);
        router
            .load_rules(vec![RoutingRule {
                service: ServiceKind::Airtime,
                network: Some(Network::Glo),
                primary: VendorName::Shago,
                fallback: None,
                active: false,
            }])
            .await;

        let candidates = router
            .candidates(ServiceKind::Airtime, Some(Network::Glo), &[])
            .await;
        assert_eq!(candidates.first(), Some(&VendorName::Vtpass));
    }

    #[tokio::test]
    async fn excluded_vendors_never_come_back() {
        let health = Arc::new(HealthManager::new(VendorName::all()));
        let router = router(RoutingMode::LoadBalanced, health);
        let candidates = router
            .candidates(ServiceKind::Airtime, None, &[VendorName::Vtpass])
            .await;
        assert!(!candidates.contains(&VendorName::Vtpass));
        assert!(!candidates.is_empty());
    }

    #[tokio::test]
    async fn load_balanced_prefers_healthier_and_faster() {
        let health = Arc::new(HealthManager::new(VendorName::all()));
        // Shago: slow and failing. Clubkonnect: fast and clean.
        for _ in 0..6 {
            health
                .record_outcome(VendorName::Shago, false, Duration::from_millis(2500))
                .await;
            health
                .record_outcome(VendorName::Clubkonnect, true, Duration::from_millis(90))
                .await;
            health
                .record_outcome(VendorName::Vtpass, true, Duration::from_millis(600))
                .await;
        }
        let router = router(RoutingMode::LoadBalanced, health);
        let candidates = router.candidates(ServiceKind::Airtime, None, &[]).await;
        assert_eq!(candidates.first(), Some(&VendorName::Clubkonnect));
        assert_eq!(candidates.last(), Some(&VendorName::Shago));
    }

    #[test]
    fn score_formula_matches_weights() {
        let online = VendorHealth {
            status: HealthState::Online,
            response_time_ms: 0,
            error_rate: 0.0,
            last_checked: chrono::Utc::now(),
        };
        assert_eq!(ProviderRouter::score(&online), 100.0);

        let degraded = VendorHealth {
            status: HealthState::Degraded,
            response_time_ms: 1500,
            error_rate: 20.0,
            last_checked: chrono::Utc::now(),
        };
        // 20 + (30 - 15) + (30 - 20)
        assert_eq!(ProviderRouter::score(&degraded), 45.0);

        let dead = VendorHealth {
            status: HealthState::Offline,
            response_time_ms: 10_000,
            error_rate: 100.0,
            last_checked: chrono::Utc::now(),
        };
        assert_eq!(ProviderRouter::score(&dead), 0.0);
    }
}
