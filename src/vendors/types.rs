use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

use crate::vendors::error::VendorError;

/// Service categories fulfilled through upstream vendors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Airtime,
    Data,
    Electricity,
    CableTv,
    Betting,
    ExamPin,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Airtime => "airtime",
            ServiceKind::Data => "data",
            ServiceKind::Electricity => "electricity",
            ServiceKind::CableTv => "cable_tv",
            ServiceKind::Betting => "betting",
            ServiceKind::ExamPin => "exam_pin",
        }
    }

    /// Services whose recipient is a phone number (normalised and used for
    /// network auto-detection).
    pub fn is_phone_based(&self) -> bool {
        matches!(self, ServiceKind::Airtime | ServiceKind::Data)
    }

    /// Services billed for a caller-chosen amount rather than a plan price.
    pub fn is_variable_amount(&self) -> bool {
        matches!(
            self,
            ServiceKind::Airtime | ServiceKind::Electricity | ServiceKind::Betting
        )
    }

    /// Services that require a plan / variation code.
    pub fn requires_plan(&self) -> bool {
        matches!(
            self,
            ServiceKind::Data | ServiceKind::Electricity | ServiceKind::CableTv | ServiceKind::ExamPin
        )
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = VendorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "airtime" => Ok(ServiceKind::Airtime),
            "data" => Ok(ServiceKind::Data),
            "electricity" => Ok(ServiceKind::Electricity),
            "cable_tv" | "cable" | "tv" => Ok(ServiceKind::CableTv),
            "betting" => Ok(ServiceKind::Betting),
            "exam_pin" | "exam" => Ok(ServiceKind::ExamPin),
            _ => Err(VendorError::Validation {
                message: format!("unsupported service: {}", value),
                field: Some("service".to_string()),
            }),
        }
    }
}

/// Mobile networks served by the platform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    Mtn,
    Glo,
    Airtel,
    NineMobile,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mtn => "mtn",
            Network::Glo => "glo",
            Network::Airtel => "airtel",
            Network::NineMobile => "9mobile",
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Network {
    type Err = VendorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "mtn" => Ok(Network::Mtn),
            "glo" => Ok(Network::Glo),
            "airtel" => Ok(Network::Airtel),
            "9mobile" | "ninemobile" | "etisalat" => Ok(Network::NineMobile),
            _ => Err(VendorError::Validation {
                message: format!("unsupported network: {}", value),
                field: Some("network".to_string()),
            }),
        }
    }
}

/// Configured upstream vendors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VendorName {
    Vtpass,
    Clubkonnect,
    Shago,
    Epins,
}

impl VendorName {
    pub fn as_str(&self) -> &'static str {
        match self {
            VendorName::Vtpass => "vtpass",
            VendorName::Clubkonnect => "clubkonnect",
            VendorName::Shago => "shago",
            VendorName::Epins => "epins",
        }
    }

    pub fn all() -> &'static [VendorName] {
        &[
            VendorName::Vtpass,
            VendorName::Clubkonnect,
            VendorName::Shago,
            VendorName::Epins,
        ]
    }
}

impl std::fmt::Display for VendorName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VendorName {
    type Err = VendorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "vtpass" => Ok(VendorName::Vtpass),
            "clubkonnect" => Ok(VendorName::Clubkonnect),
            "shago" => Ok(VendorName::Shago),
            "epins" | "e-pins" => Ok(VendorName::Epins),
            _ => Err(VendorError::Validation {
                message: format!("unsupported vendor: {}", value),
                field: Some("vendor".to_string()),
            }),
        }
    }
}

/// Canonical vendor-side transaction status. Every vendor's vocabulary is
/// mapped onto this enum before it leaves the adapter layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VendorStatus {
    Processing,
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl VendorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VendorStatus::Processing => "processing",
            VendorStatus::Pending => "pending",
            VendorStatus::Completed => "completed",
            VendorStatus::Failed => "failed",
            VendorStatus::Refunded => "refunded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VendorStatus::Completed | VendorStatus::Failed | VendorStatus::Refunded
        )
    }
}

impl std::fmt::Display for VendorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VendorStatus {
    type Err = VendorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "processing" => Ok(VendorStatus::Processing),
            "pending" => Ok(VendorStatus::Pending),
            "completed" => Ok(VendorStatus::Completed),
            "failed" => Ok(VendorStatus::Failed),
            "refunded" => Ok(VendorStatus::Refunded),
            _ => Err(VendorError::Validation {
                message: format!("unknown canonical status: {}", value),
                field: Some("status".to_string()),
            }),
        }
    }
}

/// Per-vendor status vocabulary table. Lookups are case-insensitive and fall
/// back to `Pending` — an unrecognised vendor status must never be promoted
/// to `Completed`.
#[derive(Debug, Clone, Copy)]
pub struct StatusTable {
    pub entries: &'static [(&'static str, VendorStatus)],
}

impl StatusTable {
    pub const fn new(entries: &'static [(&'static str, VendorStatus)]) -> Self {
        Self { entries }
    }

    pub fn map(&self, raw: &str) -> VendorStatus {
        let needle = raw.trim();
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(needle))
            .map(|(_, status)| *status)
            .unwrap_or(VendorStatus::Pending)
    }
}

/// Vendor float balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorBalance {
    pub amount: Decimal,
    pub currency: String,
}

/// A purchasable plan/variation in a vendor's catalogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub code: String,
    pub name: String,
    pub service: ServiceKind,
    pub network: Option<Network>,
    /// Vendor cost price; the pricing engine adds the margin on top.
    pub cost_price: Decimal,
    pub validity: Option<String>,
}

/// Customer-verification request for account/meter/smartcard services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub service: ServiceKind,
    /// Vendor-side biller code, e.g. a disco or bouquet provider code.
    pub biller_code: String,
    pub account_number: String,
    pub account_type: Option<String>,
}

/// Result of a customer verification call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub is_valid: bool,
    pub customer_name: Option<String>,
    pub metadata: JsonValue,
}

/// A fulfilment order handed to a vendor adapter. The `reference` doubles as
/// the idempotency token quoted to the vendor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorOrder {
    pub reference: String,
    pub service: ServiceKind,
    pub network: Option<Network>,
    pub recipient: String,
    /// Amount at vendor cost price.
    pub amount: Decimal,
    pub plan_code: Option<String>,
}

/// Canonical outcome of a purchase or status query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorOutcome {
    pub vendor: VendorName,
    pub status: VendorStatus,
    pub vendor_reference: Option<String>,
    pub message: Option<String>,
    /// Delivered artifact where applicable (electricity token, exam pin).
    pub token: Option<String>,
    /// True when the adapter short-circuited to a simulated success instead
    /// of moving real money. Callers must never treat simulated and live
    /// outcomes as equivalent.
    pub simulated: bool,
    pub raw: JsonValue,
}

impl VendorOutcome {
    pub fn simulated(vendor: VendorName, order: &VendorOrder) -> Self {
        Self {
            vendor,
            status: VendorStatus::Completed,
            vendor_reference: Some(format!("SIM-{}", order.reference)),
            message: Some("simulated delivery".to_string()),
            token: None,
            simulated: true,
            raw: serde_json::json!({
                "simulated": true,
                "reference": order.reference,
                "service": order.service.as_str(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_table_defaults_to_pending() {
        const TABLE: StatusTable = StatusTable::new(&[
            ("delivered", VendorStatus::Completed),
            ("failed", VendorStatus::Failed),
        ]);
        assert_eq!(TABLE.map("DELIVERED"), VendorStatus::Completed);
        assert_eq!(TABLE.map("failed"), VendorStatus::Failed);
        assert_eq!(TABLE.map("weird-new-status"), VendorStatus::Pending);
    }

    #[test]
    fn service_parsing_and_shape() {
        assert!(matches!("data".parse(), Ok(ServiceKind::Data)));
        assert!("telepathy".parse::<ServiceKind>().is_err());
        assert!(ServiceKind::Airtime.is_phone_based());
        assert!(ServiceKind::Electricity.requires_plan());
        assert!(ServiceKind::Electricity.is_variable_amount());
        assert!(!ServiceKind::Data.is_variable_amount());
    }

    #[test]
    fn simulated_outcome_is_tagged() {
        let order = VendorOrder {
            reference: "ref-1".to_string(),
            service: ServiceKind::Airtime,
            network: Some(Network::Mtn),
            recipient: "08031234567".to_string(),
            amount: Decimal::from(100),
            plan_code: None,
        };
        let outcome = VendorOutcome::simulated(VendorName::Vtpass, &order);
        assert!(outcome.simulated);
        assert_eq!(outcome.raw["simulated"], true);
        assert_eq!(outcome.status, VendorStatus::Completed);
    }
}
