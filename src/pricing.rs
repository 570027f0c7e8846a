//! Margin rules and sell-price calculation.
//!
//! A rule is keyed by service with optional vendor and network narrowing plus
//! an optional cost range. The most specific match wins; a missing rule is a
//! hard misconfiguration, never a guessed margin.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::vendors::types::{Network, ServiceKind, VendorName};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MarginType {
    Fixed,
    Percentage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginRule {
    pub id: Uuid,
    pub service: ServiceKind,
    pub vendor: Option<VendorName>,
    pub network: Option<Network>,
    pub margin_type: MarginType,
    pub margin_value: Decimal,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

impl MarginRule {
    pub fn new(
        service: ServiceKind,
        vendor: Option<VendorName>,
        network: Option<Network>,
        margin_type: MarginType,
        margin_value: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            service,
            vendor,
            network,
            margin_type,
            margin_value,
            min_amount: None,
            max_amount: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_range(mut self, min: Option<Decimal>, max: Option<Decimal>) -> Self {
        self.min_amount = min;
        self.max_amount = max;
        self
    }

    /// Specificity rank: vendor+network beats vendor-only beats network-only
    /// beats global.
    fn specificity(&self) -> u8 {
        match (self.vendor.is_some(), self.network.is_some()) {
            (true, true) => 3,
            (true, false) => 2,
            (false, true) => 1,
            (false, false) => 0,
        }
    }

    fn matches(
        &self,
        service: ServiceKind,
        network: Option<Network>,
        vendor: Option<VendorName>,
        cost: Decimal,
    ) -> bool {
        if self.service != service {
            return false;
        }
        if let Some(rule_vendor) = self.vendor {
            if vendor != Some(rule_vendor) {
                return false;
            }
        }
        if let Some(rule_network) = self.network {
            if network != Some(rule_network) {
                return false;
            }
        }
        if let Some(min) = self.min_amount {
            if cost < min {
                return false;
            }
        }
        if let Some(max) = self.max_amount {
            if cost > max {
                return false;
            }
        }
        true
    }
}

/// Result of a price calculation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub cost_price: Decimal,
    pub selling_price: Decimal,
    pub profit: Decimal,
    pub margin_type: MarginType,
    pub margin_value: Decimal,
    pub rule_id: Uuid,
}

#[derive(Debug, Clone, Error)]
pub enum PricingError {
    #[error("no margin rule matches service={service} vendor={vendor:?} network={network:?} cost={cost}")]
    NoMatchingRule {
        service: ServiceKind,
        vendor: Option<VendorName>,
        network: Option<Network>,
        cost: Decimal,
    },

    #[error("invalid margin rule: {reason}")]
    InvalidRule { reason: String },
}

pub struct PricingEngine {
    rules: Arc<RwLock<Vec<MarginRule>>>,
}

impl Default for PricingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PricingEngine {
    pub fn new() -> Self {
        Self {
            rules: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Validate and add (or replace by id) a rule. Misconfigured margins are
    /// caught here, at creation time — the calculation path never clamps.
    pub async fn upsert_rule(&self, rule: MarginRule) -> Result<(), PricingError> {
        if rule.margin_value < Decimal::ZERO {
            return Err(PricingError::InvalidRule {
                reason: format!("negative margin value {}", rule.margin_value),
            });
        }
        if rule.margin_type == MarginType::Percentage && rule.margin_value > Decimal::from(100) {
            return Err(PricingError::InvalidRule {
                reason: format!("percentage margin above 100: {}", rule.margin_value),
            });
        }
        if let (Some(min), Some(max)) = (rule.min_amount, rule.max_amount) {
            if min > max {
                return Err(PricingError::InvalidRule {
                    reason: format!("inverted cost range: min {} > max {}", min, max),
                });
            }
        }

        let mut rules = self.rules.write().await;
        rules.retain(|existing| existing.id != rule.id);
        info!(
            rule_id = %rule.id,
            service = %rule.service,
            margin = ?rule.margin_type,
            value = %rule.margin_value,
            "margin rule loaded"
        );
        rules.push(rule);
        Ok(())
    }

    pub async fn load_rules(&self, rules: Vec<MarginRule>) -> Result<(), PricingError> {
        for rule in rules {
            self.upsert_rule(rule).await?;
        }
        Ok(())
    }

    /// Resolve the most specific matching rule and compute the sell price.
    pub async fn calculate(
        &self,
        service: ServiceKind,
        network: Option<Network>,
        vendor: Option<VendorName>,
        cost_price: Decimal,
    ) -> Result<Quote, PricingError> {
        let rules = self.rules.read().await;
        let best = rules
            .iter()
            .filter(|rule| rule.matches(service, network, vendor, cost_price))
            .max_by(|a, b| {
                a.specificity()
                    .cmp(&b.specificity())
                    .then(a.created_at.cmp(&b.created_at))
            })
            .ok_or(PricingError::NoMatchingRule {
                service,
                vendor,
                network,
                cost: cost_price,
            })?;

        let profit = match best.margin_type {
            MarginType::Fixed => best.margin_value,
            MarginType::Percentage => cost_price * best.margin_value / Decimal::from(100),
        };

        Ok(Quote {
            cost_price,
            selling_price: cost_price + profit,
            profit,
            margin_type: best.margin_type,
            margin_value: best.margin_value,
            rule_id: best.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(v: i64) -> Decimal {
        Decimal::from(v)
    }

    #[tokio::test]
    async fn most_specific_rule_wins() {
        let engine = PricingEngine::new();
        engine
            .upsert_rule(MarginRule::new(
                ServiceKind::Data,
                None,
                None,
                MarginType::Fixed,
                dec(50),
            ))
            .await
            .unwrap();
        engine
            .upsert_rule(MarginRule::new(
                ServiceKind::Data,
                Some(VendorName::Vtpass),
                None,
                MarginType::Percentage,
                dec(5),
            ))
            .await
            .unwrap();

        let quote = engine
            .calculate(ServiceKind::Data, None, Some(VendorName::Vtpass), dec(1000))
            .await
            .unwrap();
        assert_eq!(quote.profit, dec(50));
        assert_eq!(quote.selling_price, dec(1050));
        assert_eq!(quote.margin_type, MarginType::Percentage);

        // Without the vendor match only the global rule applies.
        let quote = engine
            .calculate(ServiceKind::Data, None, Some(VendorName::Shago), dec(1000))
            .await
            .unwrap();
        assert_eq!(quote.profit, dec(50));
        assert_eq!(quote.margin_type, MarginType::Fixed);
    }

    #[tokio::test]
    async fn cost_range_filters_rules() {
        let engine = PricingEngine::new();
        engine
            .upsert_rule(
                MarginRule::new(
                    ServiceKind::Airtime,
                    None,
                    None,
                    MarginType::Percentage,
                    dec(2),
                )
                .with_range(None, Some(dec(5000))),
            )
            .await
            .unwrap();
        engine
            .upsert_rule(
                MarginRule::new(ServiceKind::Airtime, None, None, MarginType::Fixed, dec(20))
                    .with_range(Some(dec(5001)), None),
            )
            .await
            .unwrap();

        let small = engine
            .calculate(ServiceKind::Airtime, None, None, dec(1000))
            .await
            .unwrap();
        assert_eq!(small.profit, dec(20));
        assert_eq!(small.margin_type, MarginType::Percentage);

        let large = engine
            .calculate(ServiceKind::Airtime, None, None, dec(10_000))
            .await
            .unwrap();
        assert_eq!(large.profit, dec(20));
        assert_eq!(large.margin_type, MarginType::Fixed);
    }

    #[tokio::test]
    async fn newest_rule_wins_among_equals() {
        let engine = PricingEngine::new();
        let mut old = MarginRule::new(ServiceKind::Betting, None, None, MarginType::Fixed, dec(10));
        old.created_at = Utc::now() - chrono::Duration::hours(2);
        engine.upsert_rule(old).await.unwrap();
        engine
            .upsert_rule(MarginRule::new(
                ServiceKind::Betting,
                None,
                None,
                MarginType::Fixed,
                dec(25),
            ))
            .await
            .unwrap();

        let quote = engine
            .calculate(ServiceKind::Betting, None, None, dec(500))
            .await
            .unwrap();
        assert_eq!(quote.profit, dec(25));
    }

    #[tokio::test]
    async fn missing_rule_is_a_hard_error() {
        let engine = PricingEngine::new();
        let result = engine
            .calculate(ServiceKind::ExamPin, None, None, dec(1200))
            .await;
        assert!(matches!(result, Err(PricingError::NoMatchingRule { .. })));
    }

    #[tokio::test]
    async fn invalid_rules_rejected_at_creation() {
        let engine = PricingEngine::new();
        let negative = MarginRule::new(
            ServiceKind::Data,
            None,
            None,
            MarginType::Fixed,
            dec(-5),
        );
        assert!(engine.upsert_rule(negative).await.is_err());

        let inverted = MarginRule::new(ServiceKind::Data, None, None, MarginType::Fixed, dec(5))
            .with_range(Some(dec(100)), Some(dec(50)));
        assert!(engine.upsert_rule(inverted).await.is_err());
    }
}
