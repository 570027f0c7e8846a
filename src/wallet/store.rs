use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::wallet::entry::{EntryPatch, LedgerEntry, NewLedgerEntry};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("wallet not found for user {user_id}")]
    WalletNotFound { user_id: Uuid },

    #[error("insufficient funds: available {available}, required {required}")]
    InsufficientFunds {
        available: Decimal,
        required: Decimal,
    },

    /// Raised by the store's uniqueness constraint, closing the race between
    /// an existence check and the insert.
    #[error("idempotency key already used: {key}")]
    DuplicateIdempotencyKey { key: String },

    #[error("reference already used: {reference}")]
    DuplicateReference { reference: String },

    #[error("ledger entry not found: {entry_id}")]
    EntryNotFound { entry_id: Uuid },

    #[error("invalid status transition on entry {entry_id}: {from} -> {to}")]
    InvalidTransition {
        entry_id: Uuid,
        from: String,
        to: String,
    },

    #[error("refund rejected for entry {entry_id}: {reason}")]
    RefundRejected { entry_id: Uuid, reason: String },

    #[error("database error: {message}")]
    Database { message: String, retryable: bool },
}

impl StoreError {
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        if let Some(db) = err.as_database_error() {
            // 23505 = unique_violation; which constraint fired is resolved by
            // the calling query via the constraint name in the message.
            if db.code().as_deref() == Some("23505") {
                let message = db.message().to_string();
                if message.contains("idempotency") {
                    return StoreError::DuplicateIdempotencyKey { key: message };
                }
                return StoreError::DuplicateReference { reference: message };
            }
        }
        let retryable = matches!(
            err,
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
        );
        StoreError::Database {
            message: err.to_string(),
            retryable,
        }
    }
}

/// Transactional boundary over the relational store.
///
/// Every balance-mutating operation is a single atomic unit: the balance
/// re-read, the floor check, the balance write and the entry insert either
/// all happen or none do. Per-user linearizability comes from the store's
/// isolation on the wallet row, not from an in-process lock — multiple
/// process instances may run concurrently.
#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Create a wallet if the user has none. Idempotent.
    async fn create_wallet(
        &self,
        user_id: Uuid,
        opening_balance: Decimal,
        pin_hash: Option<String>,
    ) -> StoreResult<()>;

    /// Direct read of the cached balance projection.
    async fn balance(&self, user_id: Uuid) -> StoreResult<Decimal>;

    async fn pin_hash(&self, user_id: Uuid) -> StoreResult<Option<String>>;

    /// Atomically debit `amount` (positive magnitude) and append the entry.
    /// Fails with `InsufficientFunds` without touching anything, and with
    /// `DuplicateIdempotencyKey` when the entry's key is already bound.
    async fn debit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        entry: NewLedgerEntry,
    ) -> StoreResult<(Decimal, LedgerEntry)>;

    /// Atomically credit `amount` (positive magnitude) and append the entry.
    async fn credit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        entry: NewLedgerEntry,
    ) -> StoreResult<(Decimal, LedgerEntry)>;

    /// Atomically reverse a debit: re-validates eligibility inside the same
    /// unit (entry belongs to `user_id`, is a debit, is not already refunded
    /// and not completed), credits back the absolute amount as a new entry
    /// back-referencing the original, and marks the original `Failed` with
    /// `refunded_by` set.
    async fn refund(
        &self,
        user_id: Uuid,
        original_entry_id: Uuid,
        reason: &str,
    ) -> StoreResult<(Decimal, LedgerEntry)>;

    /// Debit the sender and credit the receiver as one atomic unit.
    async fn transfer(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        amount: Decimal,
        sender_entry: NewLedgerEntry,
        receiver_entry: NewLedgerEntry,
    ) -> StoreResult<(LedgerEntry, LedgerEntry)>;

    async fn find_entry(&self, entry_id: Uuid) -> StoreResult<Option<LedgerEntry>>;

    async fn find_by_idempotency_key(&self, key: &str) -> StoreResult<Option<LedgerEntry>>;

    async fn find_by_reference(&self, reference: &str) -> StoreResult<Option<LedgerEntry>>;

    /// Apply a patch. Status may only move `Pending -> terminal`; a patch that
    /// would re-finalise a terminal entry fails with `InvalidTransition`, so
    /// exactly one observer wins the race to finalise. The details blob is
    /// merged, never replaced.
    async fn update_entry(&self, entry_id: Uuid, patch: EntryPatch) -> StoreResult<LedgerEntry>;

    /// Pending entries that were submitted to a vendor (have a vendor
    /// reference) and still lack a terminal status — reconciliation
    /// candidates.
    async fn pending_vendor_entries(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<LedgerEntry>>;

    /// Most recent entries for a user, newest first.
    async fn entries_for_user(&self, user_id: Uuid, limit: usize)
        -> StoreResult<Vec<LedgerEntry>>;
}
