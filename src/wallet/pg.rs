//! Postgres wallet store.
//!
//! Every mutating operation runs inside one transaction with the wallet row
//! locked (`SELECT … FOR UPDATE`), so debits and credits on the same user are
//! linearised by the database, not by an application mutex — several process
//! instances can run this code concurrently. Idempotency-key uniqueness is a
//! database constraint, closing the check-then-insert race.
//!
//! Expected schema:
//!
//! ```sql
//! CREATE TABLE wallets (
//!     user_id    UUID PRIMARY KEY,
//!     balance    NUMERIC(20, 2) NOT NULL DEFAULT 0 CHECK (balance >= 0),
//!     pin_hash   TEXT,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//!
//! CREATE TABLE ledger_entries (
//!     id                  UUID PRIMARY KEY DEFAULT gen_random_uuid(),
//!     user_id             UUID NOT NULL REFERENCES wallets(user_id),
//!     amount              NUMERIC(20, 2) NOT NULL,
//!     kind                TEXT NOT NULL,
//!     status              TEXT NOT NULL DEFAULT 'pending',
//!     reference           TEXT NOT NULL,
//!     idempotency_key     TEXT,
//!     cost_price          NUMERIC(20, 2),
//!     selling_price       NUMERIC(20, 2),
//!     profit              NUMERIC(20, 2),
//!     vendor              TEXT,
//!     vendor_reference    TEXT,
//!     vendor_status       TEXT,
//!     balance_before      NUMERIC(20, 2) NOT NULL,
//!     balance_after       NUMERIC(20, 2) NOT NULL,
//!     refund_of           UUID,
//!     refunded_by         UUID,
//!     details             JSONB NOT NULL DEFAULT '{}'::jsonb,
//!     created_at          TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     vendor_called_at    TIMESTAMPTZ,
//!     vendor_responded_at TIMESTAMPTZ,
//!     updated_at          TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//! CREATE UNIQUE INDEX ledger_entries_reference_key ON ledger_entries (reference);
//! CREATE UNIQUE INDEX ledger_entries_idempotency_key_key
//!     ON ledger_entries (idempotency_key) WHERE idempotency_key IS NOT NULL;
//! CREATE INDEX ledger_entries_pending_vendor_idx
//!     ON ledger_entries (created_at) WHERE status = 'pending' AND vendor_reference IS NOT NULL;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::{error as log_error, info};
use uuid::Uuid;

use crate::vendors::types::VendorStatus;
use crate::wallet::entry::{EntryKind, EntryPatch, EntryStatus, LedgerEntry, NewLedgerEntry};
use crate::wallet::store::{StoreError, StoreResult, WalletStore};

/// Database pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            min_connections: 5,
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// Initialise the database connection pool.
pub async fn init_pool(database_url: &str, config: Option<PoolConfig>) -> StoreResult<PgPool> {
    let config = config.unwrap_or_default();

    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "initialising database pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connection_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect(database_url)
        .await
        .map_err(|e| {
            log_error!("failed to initialise database pool: {}", e);
            StoreError::from_sqlx(e)
        })?;

    Ok(pool)
}

const ENTRY_COLUMNS: &str = "id, user_id, amount, kind, status, reference, idempotency_key, \
     cost_price, selling_price, profit, vendor, vendor_reference, vendor_status, \
     balance_before, balance_after, refund_of, refunded_by, details, created_at, \
     vendor_called_at, vendor_responded_at, updated_at";

#[derive(Debug, FromRow)]
struct EntryRow {
    id: Uuid,
    user_id: Uuid,
    amount: Decimal,
    kind: String,
    status: String,
    reference: String,
    idempotency_key: Option<String>,
    cost_price: Option<Decimal>,
    selling_price: Option<Decimal>,
    profit: Option<Decimal>,
    vendor: Option<String>,
    vendor_reference: Option<String>,
    vendor_status: Option<String>,
    balance_before: Decimal,
    balance_after: Decimal,
    refund_of: Option<Uuid>,
    refunded_by: Option<Uuid>,
    details: JsonValue,
    created_at: DateTime<Utc>,
    vendor_called_at: Option<DateTime<Utc>>,
    vendor_responded_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EntryRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        let kind = EntryKind::from_db(&row.kind).ok_or_else(|| StoreError::Database {
            message: format!("unknown entry kind in row {}: {}", row.id, row.kind),
            retryable: false,
        })?;
        let status = EntryStatus::from_db(&row.status).ok_or_else(|| StoreError::Database {
            message: format!("unknown entry status in row {}: {}", row.id, row.status),
            retryable: false,
        })?;
        let vendor_status = row
            .vendor_status
            .as_deref()
            .map(VendorStatus::from_str)
            .transpose()
            .map_err(|e| StoreError::Database {
                message: format!("unknown vendor status in row {}: {}", row.id, e),
                retryable: false,
            })?;

        Ok(LedgerEntry {
            id: row.id,
            user_id: row.user_id,
            amount: row.amount,
            kind,
            status,
            reference: row.reference,
            idempotency_key: row.idempotency_key,
            cost_price: row.cost_price,
            selling_price: row.selling_price,
            profit: row.profit,
            vendor: row.vendor,
            vendor_reference: row.vendor_reference,
            vendor_status,
            balance_before: row.balance_before,
            balance_after: row.balance_after,
            refund_of: row.refund_of,
            refunded_by: row.refunded_by,
            details: row.details,
            created_at: row.created_at,
            vendor_called_at: row.vendor_called_at,
            vendor_responded_at: row.vendor_responded_at,
            updated_at: row.updated_at,
        })
    }
}

pub struct PgWalletStore {
    pool: PgPool,
}

impl PgWalletStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_balance(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
    ) -> StoreResult<Decimal> {
        let row: Option<(Decimal,)> =
            sqlx::query_as("SELECT balance FROM wallets WHERE user_id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(StoreError::from_sqlx)?;
        row.map(|(b,)| b)
            .ok_or(StoreError::WalletNotFound { user_id })
    }

    async fn write_balance(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        balance: Decimal,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE wallets SET balance = $2, updated_at = now() WHERE user_id = $1")
            .bind(user_id)
            .bind(balance)
            .execute(&mut **tx)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_entry(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        signed_amount: Decimal,
        status: EntryStatus,
        refund_of: Option<Uuid>,
        balance_before: Decimal,
        balance_after: Decimal,
        new: &NewLedgerEntry,
    ) -> StoreResult<LedgerEntry> {
        let details = if new.details.is_null() {
            serde_json::json!({})
        } else {
            new.details.clone()
        };
        let row: EntryRow = sqlx::query_as(&format!(
            "INSERT INTO ledger_entries \
             (user_id, amount, kind, status, reference, idempotency_key, cost_price, \
              selling_price, profit, vendor, balance_before, balance_after, refund_of, details) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             RETURNING {}",
            ENTRY_COLUMNS
        ))
        .bind(user_id)
        .bind(signed_amount)
        .bind(new.kind.as_str())
        .bind(status.as_str())
        .bind(&new.reference)
        .bind(&new.idempotency_key)
        .bind(new.cost_price)
        .bind(new.selling_price)
        .bind(new.profit)
        .bind(&new.vendor)
        .bind(balance_before)
        .bind(balance_after)
        .bind(refund_of)
        .bind(details)
        .fetch_one(&mut **tx)
        .await
        .map_err(StoreError::from_sqlx)?;
        row.try_into()
    }

    async fn apply(
        &self,
        user_id: Uuid,
        signed_amount: Decimal,
        entry: NewLedgerEntry,
    ) -> StoreResult<(Decimal, LedgerEntry)> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;

        let balance_before = Self::lock_balance(&mut tx, user_id).await?;
        let balance_after = balance_before + signed_amount;
        if balance_after < Decimal::ZERO {
            return Err(StoreError::InsufficientFunds {
                available: balance_before,
                required: signed_amount.abs(),
            });
        }

        Self::write_balance(&mut tx, user_id, balance_after).await?;
        let entry = Self::insert_entry(
            &mut tx,
            user_id,
            signed_amount,
            EntryStatus::Pending,
            None,
            balance_before,
            balance_after,
            &entry,
        )
        .await?;

        tx.commit().await.map_err(StoreError::from_sqlx)?;
        Ok((balance_after, entry))
    }
}

#[async_trait]
impl WalletStore for PgWalletStore {
    async fn create_wallet(
        &self,
        user_id: Uuid,
        opening_balance: Decimal,
        pin_hash: Option<String>,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO wallets (user_id, balance, pin_hash) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(opening_balance)
        .bind(pin_hash)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    async fn balance(&self, user_id: Uuid) -> StoreResult<Decimal> {
        let row: Option<(Decimal,)> =
            sqlx::query_as("SELECT balance FROM wallets WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::from_sqlx)?;
        row.map(|(b,)| b)
            .ok_or(StoreError::WalletNotFound { user_id })
    }

    async fn pin_hash(&self, user_id: Uuid) -> StoreResult<Option<String>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT pin_hash FROM wallets WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::from_sqlx)?;
        row.map(|(h,)| h)
            .ok_or(StoreError::WalletNotFound { user_id })
    }

    async fn debit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        entry: NewLedgerEntry,
    ) -> StoreResult<(Decimal, LedgerEntry)> {
        self.apply(user_id, -amount, entry).await
    }

    async fn credit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        entry: NewLedgerEntry,
    ) -> StoreResult<(Decimal, LedgerEntry)> {
        self.apply(user_id, amount, entry).await
    }

    async fn refund(
        &self,
        user_id: Uuid,
        original_entry_id: Uuid,
        reason: &str,
    ) -> StoreResult<(Decimal, LedgerEntry)> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;

        let row: Option<EntryRow> = sqlx::query_as(&format!(
            "SELECT {} FROM ledger_entries WHERE id = $1 FOR UPDATE",
            ENTRY_COLUMNS
        ))
        .bind(original_entry_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::from_sqlx)?;
        let original: LedgerEntry = row
            .ok_or(StoreError::EntryNotFound {
                entry_id: original_entry_id,
            })?
            .try_into()?;

        if original.user_id != user_id {
            return Err(StoreError::RefundRejected {
                entry_id: original_entry_id,
                reason: "entry belongs to another user".to_string(),
            });
        }
        if original.amount >= Decimal::ZERO {
            return Err(StoreError::RefundRejected {
                entry_id: original_entry_id,
                reason: "entry is not a debit".to_string(),
            });
        }
        if original.refunded_by.is_some() {
            return Err(StoreError::RefundRejected {
                entry_id: original_entry_id,
                reason: "entry already refunded".to_string(),
            });
        }
        if original.status == EntryStatus::Completed {
            return Err(StoreError::RefundRejected {
                entry_id: original_entry_id,
                reason: "entry completed successfully".to_string(),
            });
        }

        let balance_before = Self::lock_balance(&mut tx, user_id).await?;
        let refund_amount = original.amount.abs();
        let balance_after = balance_before + refund_amount;
        Self::write_balance(&mut tx, user_id, balance_after).await?;

        let mut refund_new = NewLedgerEntry::new(
            EntryKind::Refund,
            format!("RF-{}", original.reference),
        );
        refund_new.details = serde_json::json!({ "reason": reason });
        let refund_entry = Self::insert_entry(
            &mut tx,
            user_id,
            refund_amount,
            EntryStatus::Completed,
            Some(original_entry_id),
            balance_before,
            balance_after,
            &refund_new,
        )
        .await?;

        sqlx::query(
            "UPDATE ledger_entries \
             SET status = 'failed', refunded_by = $2, details = details || $3, updated_at = now() \
             WHERE id = $1",
        )
        .bind(original_entry_id)
        .bind(refund_entry.id)
        .bind(serde_json::json!({ "refund_reason": reason }))
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from_sqlx)?;

        tx.commit().await.map_err(StoreError::from_sqlx)?;
        Ok((balance_after, refund_entry))
    }

    async fn transfer(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        amount: Decimal,
        sender_entry: NewLedgerEntry,
        receiver_entry: NewLedgerEntry,
    ) -> StoreResult<(LedgerEntry, LedgerEntry)> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;

        // Lock both wallets in a fixed order so concurrent opposite-direction
        // transfers cannot deadlock.
        let (first, second) = if sender_id < receiver_id {
            (sender_id, receiver_id)
        } else {
            (receiver_id, sender_id)
        };
        let first_balance = Self::lock_balance(&mut tx, first).await?;
        let second_balance = Self::lock_balance(&mut tx, second).await?;
        let (sender_balance, receiver_balance) = if first == sender_id {
            (first_balance, second_balance)
        } else {
            (second_balance, first_balance)
        };

        if sender_balance < amount {
            return Err(StoreError::InsufficientFunds {
                available: sender_balance,
                required: amount,
            });
        }

        let sender_after = sender_balance - amount;
        let receiver_after = receiver_balance + amount;
        Self::write_balance(&mut tx, sender_id, sender_after).await?;
        Self::write_balance(&mut tx, receiver_id, receiver_after).await?;

        let debit = Self::insert_entry(
            &mut tx,
            sender_id,
            -amount,
            EntryStatus::Completed,
            None,
            sender_balance,
            sender_after,
            &sender_entry,
        )
        .await?;
        let credit = Self::insert_entry(
            &mut tx,
            receiver_id,
            amount,
            EntryStatus::Completed,
            None,
            receiver_balance,
            receiver_after,
            &receiver_entry,
        )
        .await?;

        tx.commit().await.map_err(StoreError::from_sqlx)?;
        Ok((debit, credit))
    }

    async fn find_entry(&self, entry_id: Uuid) -> StoreResult<Option<LedgerEntry>> {
        let row: Option<EntryRow> = sqlx::query_as(&format!(
            "SELECT {} FROM ledger_entries WHERE id = $1",
            ENTRY_COLUMNS
        ))
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        row.map(TryInto::try_into).transpose()
    }

    async fn find_by_idempotency_key(&self, key: &str) -> StoreResult<Option<LedgerEntry>> {
        let row: Option<EntryRow> = sqlx::query_as(&format!(
            "SELECT {} FROM ledger_entries WHERE idempotency_key = $1",
            ENTRY_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        row.map(TryInto::try_into).transpose()
    }

    async fn find_by_reference(&self, reference: &str) -> StoreResult<Option<LedgerEntry>> {
        let row: Option<EntryRow> = sqlx::query_as(&format!(
            "SELECT {} FROM ledger_entries WHERE reference = $1",
            ENTRY_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        row.map(TryInto::try_into).transpose()
    }

    async fn update_entry(&self, entry_id: Uuid, patch: EntryPatch) -> StoreResult<LedgerEntry> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;

        let row: Option<EntryRow> = sqlx::query_as(&format!(
            "SELECT {} FROM ledger_entries WHERE id = $1 FOR UPDATE",
            ENTRY_COLUMNS
        ))
        .bind(entry_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::from_sqlx)?;
        let current: LedgerEntry = row
            .ok_or(StoreError::EntryNotFound { entry_id })?
            .try_into()?;

        if let Some(target) = patch.status {
            if current.status.is_terminal() {
                return Err(StoreError::InvalidTransition {
                    entry_id,
                    from: current.status.to_string(),
                    to: target.to_string(),
                });
            }
        }

        let details = if patch.details.is_null() {
            serde_json::json!({})
        } else {
            patch.details.clone()
        };
        let row: EntryRow = sqlx::query_as(&format!(
            "UPDATE ledger_entries SET \
               status = COALESCE($2, status), \
               vendor = COALESCE($3, vendor), \
               vendor_reference = COALESCE($4, vendor_reference), \
               vendor_status = COALESCE($5, vendor_status), \
               vendor_called_at = COALESCE($6, vendor_called_at), \
               vendor_responded_at = COALESCE($7, vendor_responded_at), \
               details = details || $8, \
               updated_at = now() \
             WHERE id = $1 \
             RETURNING {}",
            ENTRY_COLUMNS
        ))
        .bind(entry_id)
        .bind(patch.status.map(|s| s.as_str()))
        .bind(&patch.vendor)
        .bind(&patch.vendor_reference)
        .bind(patch.vendor_status.map(|s| s.as_str()))
        .bind(patch.vendor_called_at)
        .bind(patch.vendor_responded_at)
        .bind(details)
        .fetch_one(&mut *tx)
        .await
        .map_err(StoreError::from_sqlx)?;

        tx.commit().await.map_err(StoreError::from_sqlx)?;
        row.try_into()
    }

    async fn pending_vendor_entries(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<LedgerEntry>> {
        let rows: Vec<EntryRow> = sqlx::query_as(&format!(
            "SELECT {} FROM ledger_entries \
             WHERE status = 'pending' AND vendor_reference IS NOT NULL AND created_at < $1 \
             ORDER BY created_at ASC LIMIT $2",
            ENTRY_COLUMNS
        ))
        .bind(older_than)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn entries_for_user(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> StoreResult<Vec<LedgerEntry>> {
        let rows: Vec<EntryRow> = sqlx::query_as(&format!(
            "SELECT {} FROM ledger_entries WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2",
            ENTRY_COLUMNS
        ))
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> EntryRow {
        EntryRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            amount: Decimal::from(-750),
            kind: "data".to_string(),
            status: "pending".to_string(),
            reference: "BH-DAT-x".to_string(),
            idempotency_key: Some("k1".to_string()),
            cost_price: Some(Decimal::from(700)),
            selling_price: Some(Decimal::from(750)),
            profit: Some(Decimal::from(50)),
            vendor: Some("vtpass".to_string()),
            vendor_reference: None,
            vendor_status: Some("processing".to_string()),
            balance_before: Decimal::from(1000),
            balance_after: Decimal::from(250),
            refund_of: None,
            refunded_by: None,
            details: serde_json::json!({}),
            created_at: Utc::now(),
            vendor_called_at: None,
            vendor_responded_at: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn row_converts_to_typed_entry() {
        let entry: LedgerEntry = sample_row().try_into().unwrap();
        assert_eq!(entry.kind, EntryKind::Data);
        assert_eq!(entry.status, EntryStatus::Pending);
        assert_eq!(entry.vendor_status, Some(VendorStatus::Processing));
        assert!(entry.is_debit());
    }

    #[test]
    fn unknown_status_is_rejected_not_guessed() {
        let mut row = sample_row();
        row.status = "???".to_string();
        assert!(LedgerEntry::try_from(row).is_err());
    }
}
