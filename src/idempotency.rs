//! Idempotency key generation.
//!
//! A key is bound to exactly one ledger entry by a store-level uniqueness
//! constraint; a repeated request with the same key returns the original
//! entry instead of creating a second one.

use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::vendors::types::ServiceKind;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Random key for callers that do not supply their own.
    pub fn generate() -> Self {
        let mut hasher = Sha256::new();
        hasher.update(Uuid::new_v4().as_bytes());
        hasher.update(Uuid::new_v4().as_bytes());
        Self(hex::encode(&hasher.finalize()[..16]))
    }

    /// Deterministic key for one logical purchase attempt. Two requests with
    /// the same parameters inside the same `window_secs` bucket collapse to
    /// the same key, which collapses accidental double-submits.
    pub fn derive(
        user_id: Uuid,
        service: ServiceKind,
        recipient: &str,
        amount: Decimal,
        unix_secs: u64,
        window_secs: u64,
    ) -> Self {
        let bucket = if window_secs == 0 {
            unix_secs
        } else {
            unix_secs / window_secs
        };
        let raw = format!(
            "{}:{}:{}:{}:{}",
            user_id,
            service.as_str(),
            recipient,
            amount,
            bucket
        );
        let mut hasher = Sha256::new();
        hasher.update(raw.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Wrap a caller-supplied key. Trimmed; empty input is rejected by the
    /// orchestrator's validation before it gets here.
    pub fn from_caller(key: &str) -> Self {
        Self(key.trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique purchase reference, prefixed per service for support
/// tooling (`BH-AIR-…`, `BH-DAT-…`).
pub fn new_reference(service: ServiceKind) -> String {
    let tag = match service {
        ServiceKind::Airtime => "AIR",
        ServiceKind::Data => "DAT",
        ServiceKind::Electricity => "ELE",
        ServiceKind::CableTv => "CAB",
        ServiceKind::Betting => "BET",
        ServiceKind::ExamPin => "EXM",
    };
    format!("BH-{}-{}", tag, Uuid::new_v4().simple())
}
