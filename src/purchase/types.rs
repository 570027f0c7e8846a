use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::vendors::types::{Network, ServiceKind, VendorStatus};
use crate::wallet::entry::{EntryStatus, LedgerEntry};

/// One purchase attempt as submitted by the API layer. Ephemeral — it exists
/// for the duration of one orchestration call and is persisted only inside
/// the ledger entry's details (which is what makes manual retry possible).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub user_id: Uuid,
    pub service: ServiceKind,
    pub network: Option<Network>,
    /// Phone number, meter number, smartcard number or betting account id.
    pub recipient: String,
    pub amount: Option<Decimal>,
    pub plan_code: Option<String>,
    pub idempotency_key: Option<String>,
    pub metadata: Option<JsonValue>,
}

impl PurchaseRequest {
    pub fn new(user_id: Uuid, service: ServiceKind, recipient: impl Into<String>) -> Self {
        Self {
            user_id,
            service,
            network: None,
            recipient: recipient.into(),
            amount: None,
            plan_code: None,
            idempotency_key: None,
            metadata: None,
        }
    }

    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_plan(mut self, plan_code: impl Into<String>) -> Self {
        self.plan_code = Some(plan_code.into());
        self
    }

    pub fn with_network(mut self, network: Network) -> Self {
        self.network = Some(network);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Structured result returned to the caller for every purchase that got past
/// validation — including failures, which always reference the ledger entry
/// so support can reconcile later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    pub entry_id: Uuid,
    pub reference: String,
    pub status: EntryStatus,
    pub vendor: Option<String>,
    pub vendor_reference: Option<String>,
    pub vendor_status: Option<VendorStatus>,
    pub selling_price: Option<Decimal>,
    pub message: Option<String>,
    /// Set when the fulfilling adapter ran in simulation mode; simulated and
    /// live outcomes must never be treated as equivalent.
    pub simulated: bool,
}

impl PurchaseReceipt {
    pub fn from_entry(entry: &LedgerEntry) -> Self {
        Self {
            entry_id: entry.id,
            reference: entry.reference.clone(),
            status: entry.status,
            vendor: entry.vendor.clone(),
            vendor_reference: entry.vendor_reference.clone(),
            vendor_status: entry.vendor_status,
            selling_price: entry.selling_price,
            message: entry
                .details
                .get("message")
                .and_then(JsonValue::as_str)
                .map(str::to_string),
            simulated: entry
                .details
                .get("simulated")
                .and_then(JsonValue::as_bool)
                .unwrap_or(false),
        }
    }
}
