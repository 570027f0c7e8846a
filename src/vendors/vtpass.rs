//! VTPass adapter.
//!
//! Auth is a static `api-key` + `secret-key` header pair; requests are JSON
//! bodies. VTPass is known to complete some orders after the HTTP call has
//! already timed out on our side, so `pending_on_timeout` is on by default.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::vendors::error::{VendorError, VendorResult};
use crate::vendors::http::VendorHttpClient;
use crate::vendors::types::{
    CustomerInfo, Network, Plan, ServiceKind, StatusTable, VendorBalance, VendorName, VendorOrder,
    VendorOutcome, VendorStatus, VerifyRequest,
};
use crate::vendors::VendorAdapter;

const STATUS_TABLE: StatusTable = StatusTable::new(&[
    ("delivered", VendorStatus::Completed),
    ("successful", VendorStatus::Completed),
    ("initiated", VendorStatus::Processing),
    ("processing", VendorStatus::Processing),
    ("pending", VendorStatus::Pending),
    ("failed", VendorStatus::Failed),
    ("reversed", VendorStatus::Refunded),
    ("refunded", VendorStatus::Refunded),
]);

/// Response code VTPass uses for a request id it has already seen.
const CODE_DUPLICATE: &str = "019";
const CODE_PROCESSED: &str = "000";
const CODE_PENDING: &str = "099";

#[derive(Debug, Clone)]
pub struct VtpassConfig {
    pub api_key: String,
    pub secret_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    /// Explicit simulation switch; never inferred from credential contents.
    pub simulate: bool,
    pub pending_on_timeout: bool,
}

impl Default for VtpassConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            base_url: "https://vtpass.com/api".to_string(),
            timeout_secs: 30,
            max_attempts: 3,
            simulate: false,
            pending_on_timeout: true,
        }
    }
}

impl VtpassConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: std::env::var("VTPASS_API_KEY").unwrap_or_default(),
            secret_key: std::env::var("VTPASS_SECRET_KEY").unwrap_or_default(),
            base_url: std::env::var("VTPASS_BASE_URL").unwrap_or(defaults.base_url),
            timeout_secs: std::env::var("VTPASS_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.timeout_secs),
            max_attempts: std::env::var("VTPASS_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_attempts),
            simulate: std::env::var("VTPASS_SIMULATE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            pending_on_timeout: std::env::var("VTPASS_PENDING_ON_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.pending_on_timeout),
        }
    }
}

pub struct VtpassAdapter {
    config: VtpassConfig,
    http: VendorHttpClient,
}

impl VtpassAdapter {
    pub fn new(config: VtpassConfig) -> VendorResult<Self> {
        if !config.simulate && (config.api_key.is_empty() || config.secret_key.is_empty()) {
            return Err(VendorError::Validation {
                message: "VTPASS_API_KEY and VTPASS_SECRET_KEY are required".to_string(),
                field: Some("vtpass".to_string()),
            });
        }
        let http = VendorHttpClient::new(
            "vtpass",
            Duration::from_secs(config.timeout_secs),
            config.max_attempts,
        )?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("api-key", self.config.api_key.clone()),
            ("secret-key", self.config.secret_key.clone()),
            ("Content-Type", "application/json".to_string()),
        ]
    }

    /// VTPass addresses products with a `serviceID` derived from the service
    /// and network (`mtn`, `mtn-data`, `dstv`, …). Plan-based services carry
    /// the full product in the variation code instead.
    fn service_id(service: ServiceKind, network: Option<Network>, plan: Option<&str>) -> String {
        match (service, network) {
            (ServiceKind::Airtime, Some(n)) => n.as_str().to_string(),
            (ServiceKind::Data, Some(n)) => format!("{}-data", n.as_str()),
            _ => plan
                .map(|p| p.split(':').next().unwrap_or(p).to_string())
                .unwrap_or_else(|| service.as_str().to_string()),
        }
    }

    fn outcome_from_payment(&self, order: &VendorOrder, raw: VtpassPayment) -> VendorOutcome {
        let code = raw.code.clone().unwrap_or_default();
        let status = if code == CODE_DUPLICATE {
            // The vendor honoured our request id; the first submission is
            // the one in flight.
            VendorStatus::Pending
        } else if code == CODE_PENDING {
            VendorStatus::Pending
        } else if code == CODE_PROCESSED {
            raw.transaction_status()
                .map(|s| STATUS_TABLE.map(&s))
                .unwrap_or(VendorStatus::Pending)
        } else {
            VendorStatus::Failed
        };

        VendorOutcome {
            vendor: VendorName::Vtpass,
            status,
            vendor_reference: raw.transaction_id().or(Some(order.reference.clone())),
            message: raw.response_description.clone(),
            token: raw.token(),
            simulated: false,
            raw: raw.raw,
        }
    }
}

#[async_trait]
impl VendorAdapter for VtpassAdapter {
    fn name(&self) -> VendorName {
        VendorName::Vtpass
    }

    fn services(&self) -> &'static [ServiceKind] {
        &[
            ServiceKind::Airtime,
            ServiceKind::Data,
            ServiceKind::Electricity,
            ServiceKind::CableTv,
            ServiceKind::ExamPin,
        ]
    }

    async fn authenticate(&self) -> VendorResult<()> {
        // Static keys; nothing to refresh.
        Ok(())
    }

    async fn is_authenticated(&self) -> bool {
        self.config.simulate || !self.config.api_key.is_empty()
    }

    async fn balance(&self) -> VendorResult<VendorBalance> {
        if self.config.simulate {
            return Ok(VendorBalance {
                amount: Decimal::from(1_000_000),
                currency: "NGN".to_string(),
            });
        }
        let raw: JsonValue = self
            .http
            .get_json(&self.endpoint("/balance"), &self.headers(), None)
            .await?;
        let amount = raw
            .pointer("/contents/balance")
            .and_then(JsonValue::as_str)
            .and_then(|v| Decimal::from_str(v).ok())
            .or_else(|| {
                raw.pointer("/contents/balance")
                    .and_then(JsonValue::as_f64)
                    .and_then(Decimal::from_f64_retain)
            })
            .ok_or_else(|| VendorError::Upstream {
                vendor: "vtpass".to_string(),
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
        let service_id = Self::service_id(service, network, None);
        let url = format!(
            "{}?serviceID={}",
            self.endpoint("/service-variations"),
            service_id
        );
        let raw: VtpassVariations = self.http.get_json(&url, &self.headers(), None).await?;

        let plans = raw
            .content
            .variations
            .into_iter()
            .map(|v| Plan {
                code: v.variation_code,
                name: v.name,
                service,
                network,
                cost_price: Decimal::from_str(&v.variation_amount).unwrap_or(Decimal::ZERO),
                validity: None,
            })
            .collect();
        Ok(plans)
    }

    fn supports_verification(&self) -> bool {
        true
    }

    async fn verify_customer(&self, request: &VerifyRequest) -> VendorResult<CustomerInfo> {
        let payload = json!({
            "billersCode": request.account_number,
            "serviceID": request.biller_code,
            "type": request.account_type,
        });
        let raw: JsonValue = self
            .http
            .post_json(
                &self.endpoint("/merchant-verify"),
                &self.headers(),
                &payload,
                None,
            )
            .await?;

        let name = raw
            .pointer("/content/Customer_Name")
            .and_then(JsonValue::as_str)
            .map(str::to_string);
        let invalid = raw.pointer("/content/error").is_some();
        Ok(CustomerInfo {
            is_valid: !invalid && name.is_some(),
            customer_name: name,
            metadata: raw,
        })
    }

    async fn purchase(&self, order: &VendorOrder) -> VendorResult<VendorOutcome> {
        if self.config.simulate {
            info!(reference = %order.reference, "vtpass simulation mode, skipping live call");
            return Ok(VendorOutcome::simulated(VendorName::Vtpass, order));
        }

        let service_id =
            Self::service_id(order.service, order.network, order.plan_code.as_deref());
        let payload = json!({
            "request_id": order.reference,
            "serviceID": service_id,
            "billersCode": order.recipient,
            "variation_code": order.plan_code,
            "amount": order.amount,
            "phone": order.recipient,
        });

        debug!(
            reference = %order.reference,
            service = %order.service,
            "submitting vtpass payment"
        );

        let result: Result<JsonValue, VendorError> = self
            .http
            .post_json(
                &self.endpoint("/pay"),
                &self.headers(),
                &payload,
                Some(&order.reference),
            )
            .await;

        match result {
            Ok(raw) => Ok(self.outcome_from_payment(order, VtpassPayment::from_raw(raw))),
            Err(VendorError::Duplicate { .. }) => Ok(VendorOutcome {
                vendor: VendorName::Vtpass,
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
                vendor: VendorName::Vtpass,
                status: VendorStatus::Completed,
                vendor_reference: Some(reference.to_string()),
                message: Some("simulated requery".to_string()),
                token: None,
                simulated: true,
                raw: json!({"simulated": true}),
            });
        }
        let payload = json!({ "request_id": reference });
        let raw: JsonValue = self
            .http
            .post_json(
                &self.endpoint("/requery"),
                &self.headers(),
                &payload,
                Some(reference),
            )
            .await?;
        let payment = VtpassPayment::from_raw(raw);
        let status = payment
            .transaction_status()
            .map(|s| STATUS_TABLE.map(&s))
            .unwrap_or(VendorStatus::Pending);
        Ok(VendorOutcome {
            vendor: VendorName::Vtpass,
            status,
            vendor_reference: payment.transaction_id().or(Some(reference.to_string())),
            message: payment.response_description.clone(),
            token: payment.token(),
            simulated: false,
            raw: payment.raw,
        })
    }

    fn pending_on_timeout(&self) -> bool {
        self.config.pending_on_timeout
    }
}

/// Loosely-typed payment envelope. VTPass nests the interesting fields under
/// `content.transactions` and is not consistent about which are present.
#[derive(Debug)]
struct VtpassPayment {
    code: Option<String>,
    response_description: Option<String>,
    raw: JsonValue,
}

impl VtpassPayment {
    fn from_raw(raw: JsonValue) -> Self {
        Self {
            code: raw.get("code").and_then(JsonValue::as_str).map(str::to_string),
            response_description: raw
                .get("response_description")
                .and_then(JsonValue::as_str)
                .map(str::to_string),
            raw,
        }
    }

    fn transaction_status(&self) -> Option<String> {
        self.raw
            .pointer("/content/transactions/status")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
    }

    fn transaction_id(&self) -> Option<String> {
        self.raw
            .pointer("/content/transactions/transactionId")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
    }

    fn token(&self) -> Option<String> {
        self.raw
            .pointer("/purchased_code")
            .or_else(|| self.raw.pointer("/content/token"))
            .and_then(JsonValue::as_str)
            .map(str::to_string)
    }
}

#[derive(Debug, Deserialize)]
struct VtpassVariations {
    content: VtpassVariationContent,
}

#[derive(Debug, Deserialize)]
struct VtpassVariationContent {
    #[serde(default)]
    variations: Vec<VtpassVariation>,
}

#[derive(Debug, Deserialize)]
struct VtpassVariation {
    variation_code: String,
    name: String,
    variation_amount: String,
}
