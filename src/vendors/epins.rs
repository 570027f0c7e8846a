//! Epins adapter.
//!
//! Auth is a public/secret key pair: the public key identifies the merchant
//! in the request body, the secret key never leaves the process — each body
//! is signed with HMAC-SHA256 and the hex digest rides an `x-signature`
//! header.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde_json::{json, Value as JsonValue};
use sha2::Sha256;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::vendors::error::{VendorError, VendorResult};
use crate::vendors::http::VendorHttpClient;
use crate::vendors::types::{
    Network, Plan, ServiceKind, StatusTable, VendorBalance, VendorName, VendorOrder,
    VendorOutcome, VendorStatus,
};
use crate::vendors::VendorAdapter;

const STATUS_TABLE: StatusTable = StatusTable::new(&[
    ("successful", VendorStatus::Completed),
    ("success", VendorStatus::Completed),
    ("processing", VendorStatus::Processing),
    ("pending", VendorStatus::Pending),
    ("failed", VendorStatus::Failed),
    ("declined", VendorStatus::Failed),
    ("refunded", VendorStatus::Refunded),
]);

#[derive(Debug, Clone)]
pub struct EpinsConfig {
    pub public_key: String,
    pub secret_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub simulate: bool,
}

impl Default for EpinsConfig {
    fn default() -> Self {
        Self {
            public_key: String::new(),
            secret_key: String::new(),
            base_url: "https://api.epins.com.ng/v2".to_string(),
            timeout_secs: 30,
            max_attempts: 3,
            simulate: false,
        }
    }
}

impl EpinsConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            public_key: std::env::var("EPINS_PUBLIC_KEY").unwrap_or_default(),
            secret_key: std::env::var("EPINS_SECRET_KEY").unwrap_or_default(),
            base_url: std::env::var("EPINS_BASE_URL").unwrap_or(defaults.base_url),
            timeout_secs: std::env::var("EPINS_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.timeout_secs),
            max_attempts: std::env::var("EPINS_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_attempts),
            simulate: std::env::var("EPINS_SIMULATE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }
}

pub struct EpinsAdapter {
    config: EpinsConfig,
    http: VendorHttpClient,
}

impl EpinsAdapter {
    pub fn new(config: EpinsConfig) -> VendorResult<Self> {
        if !config.simulate && (config.public_key.is_empty() || config.secret_key.is_empty()) {
            return Err(VendorError::Validation {
                message: "EPINS_PUBLIC_KEY and EPINS_SECRET_KEY are required".to_string(),
                field: Some("epins".to_string()),
            });
        }
        let http = VendorHttpClient::new(
            "epins",
            Duration::from_secs(config.timeout_secs),
            config.max_attempts,
        )?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn sign(&self, payload: &JsonValue) -> String {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(self.config.secret_key.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(payload.to_string().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn post_signed(
        &self,
        path: &str,
        payload: JsonValue,
        reference: Option<&str>,
    ) -> VendorResult<JsonValue> {
        let mut payload = payload;
        if let Some(body) = payload.as_object_mut() {
            body.insert("publicKey".to_string(), json!(self.config.public_key));
        }
        let headers = [
            ("x-signature", self.sign(&payload)),
            ("Content-Type", "application/json".to_string()),
        ];
        self.http
            .post_json(&self.endpoint(path), &headers, &payload, reference)
            .await
    }

    fn product(service: ServiceKind) -> &'static str {
        match service {
            ServiceKind::Airtime => "airtime",
            ServiceKind::Data => "data",
            ServiceKind::Electricity => "electricity",
            ServiceKind::CableTv => "cable",
            ServiceKind::Betting => "betting",
            ServiceKind::ExamPin => "epin",
        }
    }

    fn outcome(&self, reference: &str, raw: JsonValue) -> VendorOutcome {
        // Epins answers 200 with {"code": 101, "description": {...}} on
        // duplicates; code 101 marks an order it already holds.
        let code = raw.get("code").and_then(JsonValue::as_i64);
        let raw_status = raw
            .pointer("/description/status")
            .or_else(|| raw.get("status"))
            .and_then(JsonValue::as_str)
            .unwrap_or("");
        let status = if code == Some(101) {
            VendorStatus::Pending
        } else {
            STATUS_TABLE.map(raw_status)
        };
        VendorOutcome {
            vendor: VendorName::Epins,
            status,
            vendor_reference: raw
                .pointer("/description/transactionId")
                .and_then(JsonValue::as_str)
                .map(str::to_string)
                .or(Some(reference.to_string())),
            message: raw
                .pointer("/description/message")
                .or_else(|| raw.get("message"))
                .and_then(JsonValue::as_str)
                .map(str::to_string),
            token: raw
                .pointer("/description/pin")
                .and_then(JsonValue::as_str)
                .map(str::to_string),
            simulated: false,
            raw,
        }
    }
}

#[async_trait]
impl VendorAdapter for EpinsAdapter {
    fn name(&self) -> VendorName {
        VendorName::Epins
    }

    fn services(&self) -> &'static [ServiceKind] {
        &[
            ServiceKind::Airtime,
            ServiceKind::Data,
            ServiceKind::ExamPin,
        ]
    }

    async fn authenticate(&self) -> VendorResult<()> {
        Ok(())
    }

    async fn is_authenticated(&self) -> bool {
        self.config.simulate || !self.config.secret_key.is_empty()
    }

    async fn balance(&self) -> VendorResult<VendorBalance> {
        if self.config.simulate {
            return Ok(VendorBalance {
                amount: Decimal::from(1_000_000),
                currency: "NGN".to_string(),
            });
        }
        let raw = self.post_signed("/balance", json!({}), None).await?;
        let amount = raw
            .pointer("/description/balance")
            .and_then(|v| {
                v.as_str()
                    .and_then(|s| Decimal::from_str(s).ok())
                    .or_else(|| v.as_f64().and_then(Decimal::from_f64_retain))
            })
            .ok_or_else(|| VendorError::Upstream {
                vendor: "epins".to_string(),
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
            "product": Self::product(service),
            "network": network.map(|n| n.as_str()),
        });
        let raw = self.post_signed("/plans", payload, None).await?;
        let plans = raw
            .pointer("/description/plans")
            .and_then(JsonValue::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        Some(Plan {
                            code: item.get("planId")?.as_str()?.to_string(),
                            name: item
                                .get("planName")
                                .and_then(JsonValue::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            service,
                            network,
                            cost_price: item
                                .get("price")
                                .and_then(JsonValue::as_str)
                                .and_then(|s| Decimal::from_str(s).ok())?,
                            validity: None,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(plans)
    }

    async fn purchase(&self, order: &VendorOrder) -> VendorResult<VendorOutcome> {
        if self.config.simulate {
            info!(reference = %order.reference, "epins simulation mode, skipping live call");
            return Ok(VendorOutcome::simulated(VendorName::Epins, order));
        }

        let payload = json!({
            "product": Self::product(order.service),
            "reference": order.reference,
            "phone": order.recipient,
            "amount": order.amount,
            "planId": order.plan_code,
            "network": order.network.map(|n| n.as_str()),
        });

        debug!(
            reference = %order.reference,
            service = %order.service,
            "submitting epins order"
        );

        match self
            .post_signed("/vend", payload, Some(&order.reference))
            .await
        {
            Ok(raw) => Ok(self.outcome(&order.reference, raw)),
            Err(VendorError::Duplicate { .. }) => Ok(VendorOutcome {
                vendor: VendorName::Epins,
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
                vendor: VendorName::Epins,
                status: VendorStatus::Completed,
                vendor_reference: Some(reference.to_string()),
                message: Some("simulated requery".to_string()),
                token: None,
                simulated: true,
                raw: json!({"simulated": true}),
            });
        }
        let payload = json!({ "reference": reference });
        let raw = self
            .post_signed("/requery", payload, Some(reference))
            .await?;
        Ok(self.outcome(reference, raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> EpinsAdapter {
        EpinsAdapter::new(EpinsConfig {
            public_key: "pub_test".to_string(),
            secret_key: "sec_test".to_string(),
            ..EpinsConfig::default()
        })
        .expect("adapter init")
    }

    #[test]
    fn signature_is_deterministic_per_body() {
        let adapter = adapter();
        let body = json!({"product": "airtime", "amount": "200"});
        let a = adapter.sign(&body);
        let b = adapter.sign(&body);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let other = adapter.sign(&json!({"product": "airtime", "amount": "201"}));
        assert_ne!(a, other);
    }

    #[test]
    fn duplicate_code_maps_to_pending() {
        let adapter = adapter();
        let outcome = adapter.outcome(
            "r1",
            json!({"code": 101, "description": {"message": "duplicate reference"}}),
        );
        assert_eq!(outcome.status, VendorStatus::Pending);
    }

    #[test]
    fn successful_vend_carries_pin() {
        let adapter = adapter();
        let outcome = adapter.outcome(
            "r1",
            json!({
                "code": 200,
                "description": {
                    "status": "successful",
                    "transactionId": "EP-8872",
                    "pin": "1234-5678-9012"
                }
            }),
        );
        assert_eq!(outcome.status, VendorStatus::Completed);
        assert_eq!(outcome.token.as_deref(), Some("1234-5678-9012"));
        assert_eq!(outcome.vendor_reference.as_deref(), Some("EP-8872"));
    }

    #[test]
    fn verification_unsupported() {
        let adapter = adapter();
        assert!(!adapter.supports_verification());
    }
}
