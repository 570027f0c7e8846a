//! Top-level error taxonomy for the purchase core.
//!
//! The split matters operationally: `Validation`, `InsufficientFunds`,
//! `NoRoutingAvailable` and `Misconfiguration` are raised before any money
//! moves and surface directly to the caller. Vendor failures after a debit
//! are never propagated raw — the orchestrator converts them into a `Failed`
//! ledger entry plus an automatic refund and returns a structured receipt.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::vendors::error::VendorError;
use crate::vendors::types::{Network, ServiceKind};
use crate::wallet::store::StoreError;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error("validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("insufficient funds: available {available}, required {required}")]
    InsufficientFunds {
        available: Decimal,
        required: Decimal,
    },

    #[error("no vendor available for service {service}")]
    NoRoutingAvailable {
        service: ServiceKind,
        network: Option<Network>,
    },

    #[error("vendor error: {0}")]
    Vendor(#[from] VendorError),

    #[error("reconciliation failed for entry {entry_id}: {message}")]
    Reconciliation { entry_id: Uuid, message: String },

    /// An operational gap (typically a missing pricing rule), not a user
    /// error. Surfaced loudly rather than guessed around.
    #[error("misconfiguration: {message}")]
    Misconfiguration { message: String },

    #[error("store error: {0}")]
    Store(StoreError),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation {
            message: message.into(),
            field: None,
        }
    }

    pub fn field(message: impl Into<String>, field: impl Into<String>) -> Self {
        CoreError::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// True when the failure was raised before any money moved.
    pub fn rejected_before_debit(&self) -> bool {
        matches!(
            self,
            CoreError::Validation { .. }
                | CoreError::InsufficientFunds { .. }
                | CoreError::NoRoutingAvailable { .. }
                | CoreError::Misconfiguration { .. }
        )
    }

    pub fn user_message(&self) -> String {
        match self {
            CoreError::Validation { message, .. } => message.clone(),
            CoreError::InsufficientFunds { .. } => {
                "Insufficient wallet balance for this purchase".to_string()
            }
            CoreError::NoRoutingAvailable { .. } => {
                "This service is temporarily unavailable. Please try again shortly".to_string()
            }
            CoreError::Vendor(err) => err.user_message(),
            CoreError::Reconciliation { .. } => {
                "Transaction status could not be confirmed yet".to_string()
            }
            CoreError::Misconfiguration { .. } => {
                "This service is not configured correctly. Support has been notified".to_string()
            }
            CoreError::Store(_) => "A temporary system error occurred".to_string(),
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientFunds {
                available,
                required,
            } => CoreError::InsufficientFunds {
                available,
                required,
            },
            other => CoreError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_debit_classification() {
        assert!(CoreError::validation("missing amount").rejected_before_debit());
        assert!(CoreError::InsufficientFunds {
            available: Decimal::from(100),
            required: Decimal::from(500),
        }
        .rejected_before_debit());
        assert!(!CoreError::Vendor(VendorError::Network {
            vendor: "vtpass".to_string(),
            message: "reset".to_string(),
        })
        .rejected_before_debit());
    }

    #[test]
    fn insufficient_funds_converts_from_store() {
        let err = CoreError::from(StoreError::InsufficientFunds {
            available: Decimal::from(10),
            required: Decimal::from(20),
        });
        assert!(matches!(err, CoreError::InsufficientFunds { .. }));
    }
}
