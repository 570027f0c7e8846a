//! Wallet ledger service.
//!
//! Public API over the store: all business rules that are not part of the
//! store's atomicity guarantees live here (positive-amount validation, the
//! transfer PIN gate). Balance mutations themselves always go through the
//! store so they stay atomic and per-user linearizable.

use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::wallet::entry::{EntryKind, LedgerEntry, NewLedgerEntry};
use crate::wallet::pin;
use crate::wallet::store::WalletStore;

pub struct WalletLedger {
    store: Arc<dyn WalletStore>,
}

impl WalletLedger {
    pub fn new(store: Arc<dyn WalletStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn WalletStore> {
        self.store.clone()
    }

    pub async fn balance(&self, user_id: Uuid) -> CoreResult<Decimal> {
        Ok(self.store.balance(user_id).await?)
    }

    pub async fn entries(&self, user_id: Uuid, limit: usize) -> CoreResult<Vec<LedgerEntry>> {
        Ok(self.store.entries_for_user(user_id, limit).await?)
    }

    fn require_positive(amount: Decimal) -> CoreResult<()> {
        if amount <= Decimal::ZERO {
            return Err(CoreError::field(
                format!("amount must be positive, got {}", amount),
                "amount",
            ));
        }
        Ok(())
    }

    pub async fn credit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        kind: EntryKind,
        reference: String,
        details: JsonValue,
    ) -> CoreResult<(Decimal, LedgerEntry)> {
        Self::require_positive(amount)?;
        let mut entry = NewLedgerEntry::new(kind, reference);
        entry.details = details;
        let (balance, entry) = self.store.credit(user_id, amount, entry).await?;
        info!(user = %user_id, amount = %amount, reference = %entry.reference, "wallet credited");
        Ok((balance, entry))
    }

    pub async fn debit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        entry: NewLedgerEntry,
    ) -> CoreResult<(Decimal, LedgerEntry)> {
        Self::require_positive(amount)?;
        let (balance, entry) = self.store.debit(user_id, amount, entry).await?;
        info!(user = %user_id, amount = %amount, reference = %entry.reference, "wallet debited");
        Ok((balance, entry))
    }

    /// Reverse a failed debit. Eligibility is re-checked inside the store's
    /// atomic unit; this call merely adds logging on top.
    pub async fn refund(
        &self,
        user_id: Uuid,
        original_entry_id: Uuid,
        reason: &str,
    ) -> CoreResult<(Decimal, LedgerEntry)> {
        let (balance, refund) = self
            .store
            .refund(user_id, original_entry_id, reason)
            .await?;
        info!(
            user = %user_id,
            original = %original_entry_id,
            refund = %refund.id,
            amount = %refund.amount,
            reason,
            "debit refunded"
        );
        Ok((balance, refund))
    }

    /// Wallet-to-wallet transfer, gated by the transaction PIN — a second
    /// factor distinct from session authentication, verified with a slow
    /// hash.
    pub async fn transfer(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        amount: Decimal,
        pin_attempt: &str,
    ) -> CoreResult<(LedgerEntry, LedgerEntry)> {
        Self::require_positive(amount)?;
        if sender_id == receiver_id {
            return Err(CoreError::field(
                "cannot transfer to your own wallet",
                "receiver_id",
            ));
        }

        let stored_hash = self
            .store
            .pin_hash(sender_id)
            .await?
            .ok_or_else(|| CoreError::field("transaction PIN is not set", "pin"))?;
        if !pin::verify_pin(pin_attempt, &stored_hash) {
            return Err(CoreError::field("transaction PIN is incorrect", "pin"));
        }

        let pair_id = Uuid::new_v4().simple().to_string();
        let mut out_entry =
            NewLedgerEntry::new(EntryKind::TransferOut, format!("BH-TRF-{}-OUT", pair_id));
        out_entry.details = serde_json::json!({ "counterparty": receiver_id });
        let mut in_entry =
            NewLedgerEntry::new(EntryKind::TransferIn, format!("BH-TRF-{}-IN", pair_id));
        in_entry.details = serde_json::json!({ "counterparty": sender_id });

        let (debit, credit) = self
            .store
            .transfer(sender_id, receiver_id, amount, out_entry, in_entry)
            .await?;
        info!(
            sender = %sender_id,
            receiver = %receiver_id,
            amount = %amount,
            reference = %debit.reference,
            "transfer completed"
        );
        Ok((debit, credit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::memory::MemoryWalletStore;

    fn dec(v: i64) -> Decimal {
        Decimal::from(v)
    }

    async fn ledger_with_users() -> (WalletLedger, Uuid, Uuid) {
        let store = Arc::new(MemoryWalletStore::new());
        let sender = Uuid::new_v4();
        let receiver = Uuid::new_v4();
        store
            .create_wallet(sender, dec(1000), Some(pin::hash_pin("4821")))
            .await
            .unwrap();
        store.create_wallet(receiver, dec(0), None).await.unwrap();
        (WalletLedger::new(store), sender, receiver)
    }

    #[tokio::test]
    async fn transfer_requires_the_correct_pin() {
        let (ledger, sender, receiver) = ledger_with_users().await;

        let err = ledger
            .transfer(sender, receiver, dec(100), "0000")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
        assert_eq!(ledger.balance(sender).await.unwrap(), dec(1000));

        ledger
            .transfer(sender, receiver, dec(100), "4821")
            .await
            .unwrap();
        assert_eq!(ledger.balance(sender).await.unwrap(), dec(900));
        assert_eq!(ledger.balance(receiver).await.unwrap(), dec(100));
    }

    #[tokio::test]
    async fn transfer_to_self_is_rejected() {
        let (ledger, sender, _) = ledger_with_users().await;
        let err = ledger
            .transfer(sender, sender, dec(100), "4821")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[tokio::test]
    async fn non_positive_amounts_are_rejected() {
        let (ledger, sender, receiver) = ledger_with_users().await;
        assert!(ledger
            .transfer(sender, receiver, dec(0), "4821")
            .await
            .is_err());
        assert!(ledger
            .credit(
                sender,
                dec(-5),
                EntryKind::Deposit,
                "x".to_string(),
                JsonValue::Null
            )
            .await
            .is_err());
    }
}
