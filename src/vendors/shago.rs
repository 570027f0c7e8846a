//! Shago adapter.
//!
//! Auth is a bearer token with a timed expiry, obtained from a login
//! endpoint with a client id/secret pair. The adapter re-authenticates
//! transparently: before each call when the cached token is stale, and once
//! more if the vendor answers 401 anyway (server-side revocation).

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::vendors::error::{VendorError, VendorResult};
use crate::vendors::http::VendorHttpClient;
use crate::vendors::types::{
    Network, Plan, ServiceKind, StatusTable, VendorBalance, VendorName, VendorOrder,
    VendorOutcome, VendorStatus,
};
use crate::vendors::VendorAdapter;

const STATUS_TABLE: StatusTable = StatusTable::new(&[
    ("success", VendorStatus::Completed),
    ("successful", VendorStatus::Completed),
    ("processing", VendorStatus::Processing),
    ("pending", VendorStatus::Pending),
    ("failed", VendorStatus::Failed),
    ("error", VendorStatus::Failed),
    ("reversed", VendorStatus::Refunded),
]);

/// Refresh this long before the vendor-declared expiry to avoid using a
/// token that dies mid-request.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct ShagoConfig {
    pub client_id: String,
    pub client_secret: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub simulate: bool,
}

impl Default for ShagoConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            base_url: "https://api.shagopayments.com/public/api/test".to_string(),
            timeout_secs: 30,
            max_attempts: 3,
            simulate: false,
        }
    }
}

impl ShagoConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            client_id: std::env::var("SHAGO_CLIENT_ID").unwrap_or_default(),
            client_secret: std::env::var("SHAGO_CLIENT_SECRET").unwrap_or_default(),
            base_url: std::env::var("SHAGO_BASE_URL").unwrap_or(defaults.base_url),
            timeout_secs: std::env::var("SHAGO_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.timeout_secs),
            max_attempts: std::env::var("SHAGO_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_attempts),
            simulate: std::env::var("SHAGO_SIMULATE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone)]
struct TokenState {
    token: String,
    expires_at: DateTime<Utc>,
}

impl TokenState {
    fn is_fresh(&self) -> bool {
        self.expires_at - ChronoDuration::seconds(TOKEN_EXPIRY_MARGIN_SECS) > Utc::now()
    }
}

pub struct ShagoAdapter {
    config: ShagoConfig,
    http: VendorHttpClient,
    token: RwLock<Option<TokenState>>,
}

impl ShagoAdapter {
    pub fn new(config: ShagoConfig) -> VendorResult<Self> {
        if !config.simulate && (config.client_id.is_empty() || config.client_secret.is_empty()) {
            return Err(VendorError::Validation {
                message: "SHAGO_CLIENT_ID and SHAGO_CLIENT_SECRET are required".to_string(),
                field: Some("shago".to_string()),
            });
        }
        let http = VendorHttpClient::new(
            "shago",
            Duration::from_secs(config.timeout_secs),
            config.max_attempts,
        )?;
        Ok(Self {
            config,
            http,
            token: RwLock::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn login(&self) -> VendorResult<TokenState> {
        let payload = json!({
            "client_id": self.config.client_id,
            "client_secret": self.config.client_secret,
        });
        let raw: ShagoAuthResponse = self
            .http
            .post_json(&self.endpoint("/auth/login"), &[], &payload, None)
            .await?;
        if raw.token.is_empty() {
            return Err(VendorError::Authentication {
                vendor: "shago".to_string(),
                message: "login response carried no token".to_string(),
            });
        }
        debug!(expires_in = raw.expires_in, "shago token refreshed");
        Ok(TokenState {
            token: raw.token,
            expires_at: Utc::now() + ChronoDuration::seconds(raw.expires_in as i64),
        })
    }

    /// Return a fresh bearer token, re-authenticating if the cached one is
    /// missing or near expiry.
    async fn bearer(&self) -> VendorResult<String> {
        {
            let guard = self.token.read().await;
            if let Some(state) = guard.as_ref() {
                if state.is_fresh() {
                    return Ok(state.token.clone());
                }
            }
        }
        let mut guard = self.token.write().await;
        // Another task may have refreshed while we waited on the lock.
        if let Some(state) = guard.as_ref() {
            if state.is_fresh() {
                return Ok(state.token.clone());
            }
        }
        let state = self.login().await?;
        let token = state.token.clone();
        *guard = Some(state);
        Ok(token)
    }

    async fn drop_token(&self) {
        *self.token.write().await = None;
    }

    /// POST with the bearer header, retrying once through a forced re-auth
    /// when the vendor rejects the token.
    async fn post_authed(
        &self,
        path: &str,
        payload: &JsonValue,
        reference: Option<&str>,
    ) -> VendorResult<JsonValue> {
        for attempt in 0..2 {
            let token = self.bearer().await?;
            let headers = [("Authorization", format!("Bearer {}", token))];
            match self
                .http
                .post_json::<JsonValue>(&self.endpoint(path), &headers, payload, reference)
                .await
            {
                Err(VendorError::Authentication { .. }) if attempt == 0 => {
                    info!("shago rejected cached token, re-authenticating");
                    self.drop_token().await;
                }
                other => return other,
            }
        }
        unreachable!("second attempt always returns");
    }

    fn service_code(service: ServiceKind) -> &'static str {
        match service {
            ServiceKind::Airtime => "BAC",
            ServiceKind::Data => "BCA",
            ServiceKind::Electricity => "BCD",
            ServiceKind::CableTv => "BCC",
            ServiceKind::Betting => "BCE",
            ServiceKind::ExamPin => "BCF",
        }
    }

    fn outcome(&self, reference: &str, raw: JsonValue) -> VendorOutcome {
        let raw_status = raw
            .get("status")
            .and_then(JsonValue::as_str)
            .unwrap_or("");
        VendorOutcome {
            vendor: VendorName::Shago,
            status: STATUS_TABLE.map(raw_status),
            vendor_reference: raw
                .get("transId")
                .and_then(JsonValue::as_str)
                .map(str::to_string)
                .or(Some(reference.to_string())),
            message: raw
                .get("message")
                .and_then(JsonValue::as_str)
                .map(str::to_string),
            token: raw
                .get("token")
                .and_then(JsonValue::as_str)
                .map(str::to_string),
            simulated: false,
            raw,
        }
    }
}

#[async_trait]
impl VendorAdapter for ShagoAdapter {
    fn name(&self) -> VendorName {
        VendorName::Shago
    }

    fn services(&self) -> &'static [ServiceKind] {
        &[
            ServiceKind::Airtime,
            ServiceKind::Data,
            ServiceKind::Electricity,
            ServiceKind::CableTv,
            ServiceKind::Betting,
            ServiceKind::ExamPin,
        ]
    }

    async fn authenticate(&self) -> VendorResult<()> {
        if self.config.simulate {
            return Ok(());
        }
        let state = self.login().await?;
        *self.token.write().await = Some(state);
        Ok(())
    }

    async fn is_authenticated(&self) -> bool {
        if self.config.simulate {
            return true;
        }
        self.token
            .read()
            .await
            .as_ref()
            .map(TokenState::is_fresh)
            .unwrap_or(false)
    }

    async fn balance(&self) -> VendorResult<VendorBalance> {
        if self.config.simulate {
            return Ok(VendorBalance {
                amount: Decimal::from(1_000_000),
                currency: "NGN".to_string(),
            });
        }
        let raw = self
            .post_authed("/b2b/wallet/balance", &json!({}), None)
            .await?;
        let amount = raw
            .get("balance")
            .and_then(|v| {
                v.as_str()
                    .and_then(|s| Decimal::from_str(s).ok())
                    .or_else(|| v.as_f64().and_then(Decimal::from_f64_retain))
            })
            .ok_or_else(|| VendorError::Upstream {
                vendor: "shago".to_string(),
                message: "balance missing from response".to_string(),
                vendor_code: None,
                retryable: false,
            })?;
        Ok(VendorBalance {
            amount,
            currency: "NGN".to_string(),
        })
    }

    async fn plans(
        &self,
        service: ServiceKind,
        network: Option<Network>,
    ) -> VendorResult<Vec<Plan>> {
        let payload = json!({
            "serviceCode": Self::service_code(service),
            "network": network.map(|n| n.as_str()),
        });
        let raw = self.post_authed("/b2b/plans", &payload, None).await?;
        let plans = raw
            .get("plans")
            .and_then(JsonValue::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        Some(Plan {
                            code: item.get("code")?.as_str()?.to_string(),
                            name: item
                                .get("name")
                                .and_then(JsonValue::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            service,
                            network,
                            cost_price: item
                                .get("amount")
                                .and_then(JsonValue::as_str)
                                .and_then(|s| Decimal::from_str(s).ok())?,
                            validity: item
                                .get("validity")
                                .and_then(JsonValue::as_str)
                                .map(str::to_string),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(plans)
    }

    async fn purchase(&self, order: &VendorOrder) -> VendorResult<VendorOutcome> {
        if self.config.simulate {
            info!(reference = %order.reference, "shago simulation mode, skipping live call");
            return Ok(VendorOutcome::simulated(VendorName::Shago, order));
        }

        let payload = json!({
            "serviceCode": Self::service_code(order.service),
            "phone": order.recipient,
            "amount": order.amount,
            "vend_type": order.plan_code,
            "network": order.network.map(|n| n.as_str()),
            "request_id": order.reference,
        });

        debug!(
            reference = %order.reference,
            service = %order.service,
            "submitting shago order"
        );

        match self
            .post_authed("/b2b/vend", &payload, Some(&order.reference))
            .await
        {
            Ok(raw) => Ok(self.outcome(&order.reference, raw)),
            Err(VendorError::Duplicate { .. }) => Ok(VendorOutcome {
                vendor: VendorName::Shago,
                status: VendorStatus::Pending,
                vendor_reference: Some(order.reference.clone()),
                message: Some("already submitted".to_string()),
                token: None,
                simulated: false,
                raw: json!({"duplicate": true}),
            }),
            Err(err) => Err(err),
        }
    }

    async fn query_status(&self, reference: &str) -> VendorResult<VendorOutcome> {
        if self.config.simulate {
            return Ok(VendorOutcome {
                vendor: VendorName::Shago,
                status: VendorStatus::Completed,
                vendor_reference: Some(reference.to_string()),
                message: Some("simulated requery".to_string()),
                token: None,
                simulated: true,
                raw: json!({"simulated": true}),
            });
        }
        let payload = json!({ "request_id": reference });
        let raw = self
            .post_authed("/b2b/requery", &payload, Some(reference))
            .await?;
        Ok(self.outcome(reference, raw))
    }
}

#[derive(Debug, Deserialize)]
struct ShagoAuthResponse {
    #[serde(default)]
    token: String,
    /// Seconds of validity; Shago defaults to an hour.
    #[serde(default = "default_expiry")]
    expires_in: u64,
}

fn default_expiry() -> u64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credentials_rejected_outside_simulation() {
        assert!(ShagoAdapter::new(ShagoConfig::default()).is_err());
        assert!(ShagoAdapter::new(ShagoConfig {
            simulate: true,
            ..ShagoConfig::default()
        })
        .is_ok());
    }

    #[test]
    fn token_freshness_respects_margin() {
        let fresh = TokenState {
            token: "t".to_string(),
            expires_at: Utc::now() + ChronoDuration::seconds(300),
        };
        assert!(fresh.is_fresh());

        let nearly_expired = TokenState {
            token: "t".to_string(),
            expires_at: Utc::now() + ChronoDuration::seconds(30),
        };
        assert!(!nearly_expired.is_fresh());
    }

    #[tokio::test]
    async fn starts_unauthenticated() {
        let adapter = ShagoAdapter::new(ShagoConfig {
            client_id: "cid".to_string(),
            client_secret: "cs".to_string(),
            ..ShagoConfig::default()
        })
        .unwrap();
        assert!(!adapter.is_authenticated().await);
    }

    #[test]
    fn status_mapping_defaults_to_pending() {
        let adapter = ShagoAdapter::new(ShagoConfig {
            simulate: true,
            ..ShagoConfig::default()
        })
        .unwrap();
        let outcome = adapter.outcome("r1", json!({"status": "success", "transId": "SH123"}));
        assert_eq!(outcome.status, VendorStatus::Completed);
        assert_eq!(outcome.vendor_reference.as_deref(), Some("SH123"));

        let odd = adapter.outcome("r1", json!({"status": "queued"}));
        assert_eq!(odd.status, VendorStatus::Pending);
    }
}
