//! Clubkonnect adapter.
//!
//! Auth is a `UserID` + `APIKey` pair carried as query parameters on every
//! call; the whole API is GET with query strings rather than JSON bodies.
//! Status vocabulary is the `ORDER_*` family.

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
    Network, Plan, ServiceKind, StatusTable, VendorBalance, VendorName, VendorOrder,
    VendorOutcome, VendorStatus,
};
use crate::vendors::VendorAdapter;

const STATUS_TABLE: StatusTable = StatusTable::new(&[
    ("ORDER_RECEIVED", VendorStatus::Processing),
    ("ORDER_PROCESSING", VendorStatus::Processing),
    ("ORDER_COMPLETED", VendorStatus::Completed),
    ("ORDER_FAILED", VendorStatus::Failed),
    ("ORDER_CANCELLED", VendorStatus::Failed),
    ("ORDER_ONHOLD", VendorStatus::Pending),
    ("ORDER_REFUNDED", VendorStatus::Refunded),
]);

#[derive(Debug, Clone)]
pub struct ClubkonnectConfig {
    pub user_id: String,
    pub api_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub simulate: bool,
}

impl Default for ClubkonnectConfig {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            api_key: String::new(),
            base_url: "https://www.nellobytesystems.com".to_string(),
            timeout_secs: 30,
            max_attempts: 3,
            simulate: false,
        }
    }
}

impl ClubkonnectConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            user_id: std::env::var("CLUBKONNECT_USER_ID").unwrap_or_default(),
            api_key: std::env::var("CLUBKONNECT_API_KEY").unwrap_or_default(),
            base_url: std::env::var("CLUBKONNECT_BASE_URL").unwrap_or(defaults.base_url),
            timeout_secs: std::env::var("CLUBKONNECT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.timeout_secs),
            max_attempts: std::env::var("CLUBKONNECT_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_attempts),
            simulate: std::env::var("CLUBKONNECT_SIMULATE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }
}

pub struct ClubkonnectAdapter {
    config: ClubkonnectConfig,
    http: VendorHttpClient,
}

impl ClubkonnectAdapter {
    pub fn new(config: ClubkonnectConfig) -> VendorResult<Self> {
        if !config.simulate && (config.user_id.is_empty() || config.api_key.is_empty()) {
            return Err(VendorError::Validation {
                message: "CLUBKONNECT_USER_ID and CLUBKONNECT_API_KEY are required".to_string(),
                field: Some("clubkonnect".to_string()),
            });
        }
        let http = VendorHttpClient::new(
            "clubkonnect",
            Duration::from_secs(config.timeout_secs),
            config.max_attempts,
        )?;
        Ok(Self { config, http })
    }

    /// All endpoints take the credentials as query parameters; the query
    /// string is assembled by hand since the API is not JSON-in.
    fn url(&self, endpoint: &str, params: &[(&str, &str)]) -> String {
        let mut url = format!(
            "{}/{}?UserID={}&APIKey={}",
            self.config.base_url, endpoint, self.config.user_id, self.config.api_key
        );
        for (key, value) in params {
            url.push('&');
            url.push_str(key);
            url.push('=');
            url.push_str(value);
        }
        url
    }

    fn network_code(network: Network) -> &'static str {
        match network {
            Network::Mtn => "01",
            Network::Glo => "02",
            Network::NineMobile => "03",
            Network::Airtel => "04",
        }
    }

    fn purchase_endpoint(service: ServiceKind) -> VendorResult<&'static str> {
        match service {
            ServiceKind::Airtime => Ok("APIAirtimeV1.asp"),
            ServiceKind::Data => Ok("APIDatabundleV1.asp"),
            ServiceKind::CableTv => Ok("APICableTVV1.asp"),
            ServiceKind::Electricity => Ok("APIElectricityV1.asp"),
            ServiceKind::Betting => Ok("APIBettingV1.asp"),
            ServiceKind::ExamPin => Err(VendorError::Validation {
                message: "clubkonnect does not sell exam pins".to_string(),
                field: Some("service".to_string()),
            }),
        }
    }

    fn outcome(&self, reference: &str, raw: JsonValue) -> VendorOutcome {
        let raw_status = raw
            .get("status")
            .or_else(|| raw.get("Status"))
            .and_then(JsonValue::as_str)
            .unwrap_or("");
        let status = if raw_status.eq_ignore_ascii_case("ORDER_EXISTS") {
            // Duplicate RequestID honoured upstream: the original order is
            // still the one in flight.
            VendorStatus::Pending
        } else {
            STATUS_TABLE.map(raw_status)
        };
        VendorOutcome {
            vendor: VendorName::Clubkonnect,
            status,
            vendor_reference: raw
                .get("orderid")
                .or_else(|| raw.get("OrderID"))
                .and_then(JsonValue::as_str)
                .map(str::to_string)
                .or(Some(reference.to_string())),
            message: raw
                .get("remark")
                .or_else(|| raw.get("Remark"))
                .and_then(JsonValue::as_str)
                .map(str::to_string),
            token: raw
                .get("metertoken")
                .and_then(JsonValue::as_str)
                .map(str::to_string),
            simulated: false,
            raw,
        }
    }
}

#[async_trait]
impl VendorAdapter for ClubkonnectAdapter {
    fn name(&self) -> VendorName {
        VendorName::Clubkonnect
    }

    fn services(&self) -> &'static [ServiceKind] {
        &[
            ServiceKind::Airtime,
            ServiceKind::Data,
            ServiceKind::CableTv,
            ServiceKind::Electricity,
            ServiceKind::Betting,
        ]
    }

    async fn authenticate(&self) -> VendorResult<()> {
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
        let url = self.url("APIWalletBalanceV1.asp", &[]);
        let raw: JsonValue = self.http.get_json(&url, &[], None).await?;
        let amount = raw
            .get("balance")
            .and_then(|v| {
                v.as_str()
                    .and_then(|s| Decimal::from_str(s.replace(',', "").trim()).ok())
                    .or_else(|| v.as_f64().and_then(Decimal::from_f64_retain))
            })
            .ok_or_else(|| VendorError::Upstream {
                vendor: "clubkonnect".to_string(),
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
        if service != ServiceKind::Data {
            return Ok(Vec::new());
        }
        let url = self.url("APIDatabundlePlansV2.asp", &[]);
        let raw: ClubkonnectPlans = self.http.get_json(&url, &[], None).await?;

        let mut plans = Vec::new();
        for (network_name, products) in raw.mobile_network {
            let plan_network = Network::from_str(&network_name).ok();
            if network.is_some() && plan_network != network {
                continue;
            }
            for product in products.into_iter().flat_map(|p| p.product) {
                plans.push(Plan {
                    code: product.product_code,
                    name: product.product_name,
                    service,
                    network: plan_network,
                    cost_price: Decimal::from_str(&product.product_amount)
                        .unwrap_or(Decimal::ZERO),
                    validity: product.product_validity,
                });
            }
        }
        Ok(plans)
    }

    async fn purchase(&self, order: &VendorOrder) -> VendorResult<VendorOutcome> {
        if self.config.simulate {
            info!(reference = %order.reference, "clubkonnect simulation mode, skipping live call");
            return Ok(VendorOutcome::simulated(VendorName::Clubkonnect, order));
        }

        let endpoint = Self::purchase_endpoint(order.service)?;
        let amount = order.amount.to_string();
        let mut params: Vec<(&str, &str)> = vec![("RequestID", order.reference.as_str())];
        let network_code = order.network.map(Self::network_code);
        if let Some(code) = network_code {
            params.push(("MobileNetwork", code));
        }
        match order.service {
            ServiceKind::Airtime => {
                params.push(("Amount", amount.as_str()));
                params.push(("MobileNumber", order.recipient.as_str()));
            }
            ServiceKind::Data => {
                if let Some(plan) = order.plan_code.as_deref() {
                    params.push(("DataPlan", plan));
                }
                params.push(("MobileNumber", order.recipient.as_str()));
            }
            _ => {
                if let Some(plan) = order.plan_code.as_deref() {
                    params.push(("PackageCode", plan));
                }
                params.push(("Amount", amount.as_str()));
                params.push(("AccountNo", order.recipient.as_str()));
            }
        }

        debug!(
            reference = %order.reference,
            service = %order.service,
            "submitting clubkonnect order"
        );

        let url = self.url(endpoint, &params);
        match self
            .http
            .get_json::<JsonValue>(&url, &[], Some(&order.reference))
            .await
        {
            Ok(raw) => Ok(self.outcome(&order.reference, raw)),
            Err(VendorError::Duplicate { .. }) => Ok(VendorOutcome {
                vendor: VendorName::Clubkonnect,
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
                vendor: VendorName::Clubkonnect,
                status: VendorStatus::Completed,
                vendor_reference: Some(reference.to_string()),
                message: Some("simulated requery".to_string()),
                token: None,
                simulated: true,
                raw: json!({"simulated": true}),
            });
        }
        let url = self.url("APIQueryV1.asp", &[("RequestID", reference)]);
        let raw: JsonValue = self.http.get_json(&url, &[], Some(reference)).await?;
        Ok(self.outcome(reference, raw))
    }
}

#[derive(Debug, Deserialize)]
struct ClubkonnectPlans {
    #[serde(rename = "MOBILE_NETWORK", default)]
    mobile_network: std::collections::HashMap<String, Vec<ClubkonnectProducts>>,
}

#[derive(Debug, Deserialize)]
struct ClubkonnectProducts {
    #[serde(rename = "PRODUCT", default)]
    product: Vec<ClubkonnectProduct>,
}

#[derive(Debug, Deserialize)]
struct ClubkonnectProduct {
    #[serde(rename = "PRODUCT_CODE")]
    product_code: String,
    #[serde(rename = "PRODUCT_NAME")]
    product_name: String,
    #[serde(rename = "PRODUCT_AMOUNT")]
    product_amount: String,
    #[serde(rename = "PRODUCT_VALIDITY", default)]
    product_validity: Option<String>,
}
