use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::vendors::types::{ServiceKind, VendorStatus};

/// Ledger entry lifecycle. `Pending` is the only non-terminal state; a failed
/// purchase is refunded as part of the same transition that marks it `Failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Completed,
    Failed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Completed => "completed",
            EntryStatus::Failed => "failed",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(EntryStatus::Pending),
            "completed" | "success" => Some(EntryStatus::Completed),
            "failed" => Some(EntryStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, EntryStatus::Pending)
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What an entry records. Purchase entries carry their service kind; wallet
/// movements that are not purchases get their own tags.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Airtime,
    Data,
    Electricity,
    CableTv,
    Betting,
    ExamPin,
    Refund,
    TransferIn,
    TransferOut,
    Deposit,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Airtime => "airtime",
            EntryKind::Data => "data",
            EntryKind::Electricity => "electricity",
            EntryKind::CableTv => "cable_tv",
            EntryKind::Betting => "betting",
            EntryKind::ExamPin => "exam_pin",
            EntryKind::Refund => "refund",
            EntryKind::TransferIn => "transfer_in",
            EntryKind::TransferOut => "transfer_out",
            EntryKind::Deposit => "deposit",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "airtime" => Some(EntryKind::Airtime),
            "data" => Some(EntryKind::Data),
            "electricity" => Some(EntryKind::Electricity),
            "cable_tv" => Some(EntryKind::CableTv),
            "betting" => Some(EntryKind::Betting),
            "exam_pin" => Some(EntryKind::ExamPin),
            "refund" => Some(EntryKind::Refund),
            "transfer_in" => Some(EntryKind::TransferIn),
            "transfer_out" => Some(EntryKind::TransferOut),
            "deposit" => Some(EntryKind::Deposit),
            _ => None,
        }
    }

    pub fn service(&self) -> Option<ServiceKind> {
        match self {
            EntryKind::Airtime => Some(ServiceKind::Airtime),
            EntryKind::Data => Some(ServiceKind::Data),
            EntryKind::Electricity => Some(ServiceKind::Electricity),
            EntryKind::CableTv => Some(ServiceKind::CableTv),
            EntryKind::Betting => Some(ServiceKind::Betting),
            EntryKind::ExamPin => Some(ServiceKind::ExamPin),
            _ => None,
        }
    }
}

impl From<ServiceKind> for EntryKind {
    fn from(service: ServiceKind) -> Self {
        match service {
            ServiceKind::Airtime => EntryKind::Airtime,
            ServiceKind::Data => EntryKind::Data,
            ServiceKind::Electricity => EntryKind::Electricity,
            ServiceKind::CableTv => EntryKind::CableTv,
            ServiceKind::Betting => EntryKind::Betting,
            ServiceKind::ExamPin => EntryKind::ExamPin,
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One record in the wallet's append-only log. `amount` is signed: positive
/// credits, negative debits. Amount, kind and reference are immutable once
/// written; only the status and the `details` blob move, and `details` is
/// merged into, never replaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub kind: EntryKind,
    pub status: EntryStatus,
    pub reference: String,
    pub idempotency_key: Option<String>,
    pub cost_price: Option<Decimal>,
    pub selling_price: Option<Decimal>,
    pub profit: Option<Decimal>,
    pub vendor: Option<String>,
    pub vendor_reference: Option<String>,
    pub vendor_status: Option<VendorStatus>,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    /// Id of the original debit this entry refunds.
    pub refund_of: Option<Uuid>,
    /// Id of the refund entry that reversed this debit.
    pub refunded_by: Option<Uuid>,
    pub details: JsonValue,
    pub created_at: DateTime<Utc>,
    pub vendor_called_at: Option<DateTime<Utc>>,
    pub vendor_responded_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn is_debit(&self) -> bool {
        self.amount < Decimal::ZERO
    }
}

/// Insertion payload for a new entry. The store assigns id, balances and
/// timestamps; `amount` here is the unsigned magnitude — the store applies
/// the sign for the operation being performed.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub kind: EntryKind,
    pub reference: String,
    pub idempotency_key: Option<String>,
    pub cost_price: Option<Decimal>,
    pub selling_price: Option<Decimal>,
    pub profit: Option<Decimal>,
    pub vendor: Option<String>,
    pub details: JsonValue,
}

impl NewLedgerEntry {
    pub fn new(kind: EntryKind, reference: impl Into<String>) -> Self {
        Self {
            kind,
            reference: reference.into(),
            idempotency_key: None,
            cost_price: None,
            selling_price: None,
            profit: None,
            vendor: None,
            details: JsonValue::Null,
        }
    }
}

/// Mutable slice of an entry. Everything is optional; `details` (when not
/// null) is merged key-by-key into the stored blob.
#[derive(Debug, Clone, Default)]
pub struct EntryPatch {
    pub status: Option<EntryStatus>,
    pub vendor: Option<String>,
    pub vendor_reference: Option<String>,
    pub vendor_status: Option<VendorStatus>,
    pub vendor_called_at: Option<DateTime<Utc>>,
    pub vendor_responded_at: Option<DateTime<Utc>>,
    pub details: JsonValue,
}

impl EntryPatch {
    pub fn status(status: EntryStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_vendor_status(mut self, status: VendorStatus) -> Self {
        self.vendor_status = Some(status);
        self
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = details;
        self
    }
}

/// Merge `patch` into `base` one top-level key at a time, mirroring the SQL
/// `details || $n` jsonb concatenation. Existing keys keep their history by
/// being overwritten only with newer values of the same key; nothing is
/// removed.
pub fn merge_details(base: &mut JsonValue, patch: &JsonValue) {
    if patch.is_null() {
        return;
    }
    if !base.is_object() {
        *base = JsonValue::Object(Default::default());
    }
    if let (Some(dst), Some(src)) = (base.as_object_mut(), patch.as_object()) {
        for (key, value) in src {
            dst.insert(key.clone(), value.clone());
        }
    }
}
