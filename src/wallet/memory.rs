//! In-memory wallet store.
//!
//! Drives the test suite and database-less deployments. One mutex around the
//! whole state gives every operation the same all-or-nothing semantics the
//! Postgres implementation gets from transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::wallet::entry::{
    merge_details, EntryPatch, EntryStatus, LedgerEntry, NewLedgerEntry,
};
use crate::wallet::store::{StoreError, StoreResult, WalletStore};

#[derive(Debug, Clone)]
struct WalletRow {
    balance: Decimal,
    pin_hash: Option<String>,
}

#[derive(Default)]
struct Inner {
    wallets: HashMap<Uuid, WalletRow>,
    entries: Vec<LedgerEntry>,
    by_idempotency_key: HashMap<String, Uuid>,
    by_reference: HashMap<String, Uuid>,
}

impl Inner {
    fn entry_mut(&mut self, entry_id: Uuid) -> StoreResult<&mut LedgerEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.id == entry_id)
            .ok_or(StoreError::EntryNotFound { entry_id })
    }

    fn entry(&self, entry_id: Uuid) -> StoreResult<LedgerEntry> {
        self.entries
            .iter()
            .find(|e| e.id == entry_id)
            .cloned()
            .ok_or(StoreError::EntryNotFound { entry_id })
    }

    /// Insert an already-signed entry against the wallet's current balance.
    fn append_entry(
        &mut self,
        user_id: Uuid,
        signed_amount: Decimal,
        new: NewLedgerEntry,
    ) -> StoreResult<LedgerEntry> {
        if let Some(key) = &new.idempotency_key {
            if self.by_idempotency_key.contains_key(key) {
                return Err(StoreError::DuplicateIdempotencyKey { key: key.clone() });
            }
        }
        if self.by_reference.contains_key(&new.reference) {
            return Err(StoreError::DuplicateReference {
                reference: new.reference.clone(),
            });
        }

        let wallet = self
            .wallets
            .get_mut(&user_id)
            .ok_or(StoreError::WalletNotFound { user_id })?;

        let balance_before = wallet.balance;
        let balance_after = balance_before + signed_amount;
        if balance_after < Decimal::ZERO {
            return Err(StoreError::InsufficientFunds {
                available: balance_before,
                required: signed_amount.abs(),
            });
        }
        wallet.balance = balance_after;

        let now = Utc::now();
        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            user_id,
            amount: signed_amount,
            kind: new.kind,
            status: EntryStatus::Pending,
            reference: new.reference.clone(),
            idempotency_key: new.idempotency_key.clone(),
            cost_price: new.cost_price,
            selling_price: new.selling_price,
            profit: new.profit,
            vendor: new.vendor,
            vendor_reference: None,
            vendor_status: None,
            balance_before,
            balance_after,
            refund_of: None,
            refunded_by: None,
            details: if new.details.is_null() {
                serde_json::json!({})
            } else {
                new.details
            },
            created_at: now,
            vendor_called_at: None,
            vendor_responded_at: None,
            updated_at: now,
        };

        if let Some(key) = &entry.idempotency_key {
            self.by_idempotency_key.insert(key.clone(), entry.id);
        }
        self.by_reference.insert(entry.reference.clone(), entry.id);
        self.entries.push(entry.clone());
        Ok(entry)
    }
}

pub struct MemoryWalletStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryWalletStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWalletStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }
}

#[async_trait]
impl WalletStore for MemoryWalletStore {
    async fn create_wallet(
        &self,
        user_id: Uuid,
        opening_balance: Decimal,
        pin_hash: Option<String>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.wallets.entry(user_id).or_insert(WalletRow {
            balance: opening_balance,
            pin_hash,
        });
        Ok(())
    }

    async fn balance(&self, user_id: Uuid) -> StoreResult<Decimal> {
        let inner = self.inner.lock().await;
        inner
            .wallets
            .get(&user_id)
            .map(|w| w.balance)
            .ok_or(StoreError::WalletNotFound { user_id })
    }

    async fn pin_hash(&self, user_id: Uuid) -> StoreResult<Option<String>> {
        let inner = self.inner.lock().await;
        inner
            .wallets
            .get(&user_id)
            .map(|w| w.pin_hash.clone())
            .ok_or(StoreError::WalletNotFound { user_id })
    }

    async fn debit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        entry: NewLedgerEntry,
    ) -> StoreResult<(Decimal, LedgerEntry)> {
        let mut inner = self.inner.lock().await;
        let entry = inner.append_entry(user_id, -amount, entry)?;
        Ok((entry.balance_after, entry))
    }

    async fn credit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        entry: NewLedgerEntry,
    ) -> StoreResult<(Decimal, LedgerEntry)> {
        let mut inner = self.inner.lock().await;
        let entry = inner.append_entry(user_id, amount, entry)?;
        Ok((entry.balance_after, entry))
    }

    async fn refund(
        &self,
        user_id: Uuid,
        original_entry_id: Uuid,
        reason: &str,
    ) -> StoreResult<(Decimal, LedgerEntry)> {
        let mut inner = self.inner.lock().await;

        let original = inner.entry(original_entry_id)?;
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

        let mut refund_new = NewLedgerEntry::new(
            crate::wallet::entry::EntryKind::Refund,
            format!("RF-{}", original.reference),
        );
        refund_new.details = serde_json::json!({ "reason": reason });
        let mut refund_entry = inner.append_entry(user_id, original.amount.abs(), refund_new)?;
        refund_entry.refund_of = Some(original_entry_id);
        refund_entry.status = EntryStatus::Completed;
        let refund_id = refund_entry.id;
        {
            let stored = inner.entry_mut(refund_id)?;
            stored.refund_of = Some(original_entry_id);
            stored.status = EntryStatus::Completed;
        }

        let new_balance = refund_entry.balance_after;
        {
            let original = inner.entry_mut(original_entry_id)?;
            original.status = EntryStatus::Failed;
            original.refunded_by = Some(refund_id);
            merge_details(
                &mut original.details,
                &serde_json::json!({ "refund_reason": reason }),
            );
            original.updated_at = Utc::now();
        }

        Ok((new_balance, refund_entry))
    }

    async fn transfer(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        amount: Decimal,
        sender_entry: NewLedgerEntry,
        receiver_entry: NewLedgerEntry,
    ) -> StoreResult<(LedgerEntry, LedgerEntry)> {
        let mut inner = self.inner.lock().await;
        if !inner.wallets.contains_key(&receiver_id) {
            return Err(StoreError::WalletNotFound {
                user_id: receiver_id,
            });
        }
        // Validate the credit side up front so a failure cannot strand the
        // debit half of the pair.
        if inner.by_reference.contains_key(&receiver_entry.reference) {
            return Err(StoreError::DuplicateReference {
                reference: receiver_entry.reference.clone(),
            });
        }
        if let Some(key) = &receiver_entry.idempotency_key {
            if inner.by_idempotency_key.contains_key(key) {
                return Err(StoreError::DuplicateIdempotencyKey { key: key.clone() });
            }
        }
        let debit = inner.append_entry(sender_id, -amount, sender_entry)?;
        let credit = inner.append_entry(receiver_id, amount, receiver_entry)?;
        // Transfers settle immediately.
        for id in [debit.id, credit.id] {
            if let Ok(stored) = inner.entry_mut(id) {
                stored.status = EntryStatus::Completed;
            }
        }
        let debit = inner.entry(debit.id)?;
        let credit = inner.entry(credit.id)?;
        Ok((debit, credit))
    }

    async fn find_entry(&self, entry_id: Uuid) -> StoreResult<Option<LedgerEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner.entries.iter().find(|e| e.id == entry_id).cloned())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> StoreResult<Option<LedgerEntry>> {
        let inner = self.inner.lock().await;
        let id = inner.by_idempotency_key.get(key).copied();
        Ok(id.and_then(|id| inner.entries.iter().find(|e| e.id == id).cloned()))
    }

    async fn find_by_reference(&self, reference: &str) -> StoreResult<Option<LedgerEntry>> {
        let inner = self.inner.lock().await;
        let id = inner.by_reference.get(reference).copied();
        Ok(id.and_then(|id| inner.entries.iter().find(|e| e.id == id).cloned()))
    }

    async fn update_entry(&self, entry_id: Uuid, patch: EntryPatch) -> StoreResult<LedgerEntry> {
        let mut inner = self.inner.lock().await;
        let entry = inner.entry_mut(entry_id)?;

        if let Some(status) = patch.status {
            if entry.status.is_terminal() {
                return Err(StoreError::InvalidTransition {
                    entry_id,
                    from: entry.status.to_string(),
                    to: status.to_string(),
                });
            }
            entry.status = status;
        }
        if let Some(vendor) = patch.vendor {
            entry.vendor = Some(vendor);
        }
        if let Some(reference) = patch.vendor_reference {
            entry.vendor_reference = Some(reference);
        }
        if let Some(status) = patch.vendor_status {
            entry.vendor_status = Some(status);
        }
        if let Some(at) = patch.vendor_called_at {
            entry.vendor_called_at = Some(at);
        }
        if let Some(at) = patch.vendor_responded_at {
            entry.vendor_responded_at = Some(at);
        }
        merge_details(&mut entry.details, &patch.details);
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn pending_vendor_entries(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<LedgerEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .entries
            .iter()
            .filter(|e| {
                e.status == EntryStatus::Pending
                    && e.vendor_reference.is_some()
                    && e.created_at < older_than
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn entries_for_user(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> StoreResult<Vec<LedgerEntry>> {
        let inner = self.inner.lock().await;
        let mut entries: Vec<LedgerEntry> = inner
            .entries
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        entries.reverse();
        entries.truncate(limit);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::entry::EntryKind;

    fn dec(v: i64) -> Decimal {
        Decimal::from(v)
    }

    async fn store_with_user(balance: i64) -> (MemoryWalletStore, Uuid) {
        let store = MemoryWalletStore::new();
        let user = Uuid::new_v4();
        store.create_wallet(user, dec(balance), None).await.unwrap();
        (store, user)
    }

    #[tokio::test]
    async fn debit_respects_the_balance_floor() {
        let (store, user) = store_with_user(100).await;
        let err = store
            .debit(user, dec(500), NewLedgerEntry::new(EntryKind::Airtime, "r1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InsufficientFunds { .. }));
        assert_eq!(store.balance(user).await.unwrap(), dec(100));
        assert!(store.entries_for_user(user, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn debit_records_pre_and_post_balances() {
        let (store, user) = store_with_user(1000).await;
        let (balance, entry) = store
            .debit(user, dec(250), NewLedgerEntry::new(EntryKind::Data, "r1"))
            .await
            .unwrap();
        assert_eq!(balance, dec(750));
        assert_eq!(entry.balance_before, dec(1000));
        assert_eq!(entry.balance_after, dec(750));
        assert_eq!(entry.amount, dec(-250));
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_rejected_atomically() {
        let (store, user) = store_with_user(1000).await;
        let mut first = NewLedgerEntry::new(EntryKind::Airtime, "r1");
        first.idempotency_key = Some("K1".to_string());
        store.debit(user, dec(100), first).await.unwrap();

        let mut second = NewLedgerEntry::new(EntryKind::Airtime, "r2");
        second.idempotency_key = Some("K1".to_string());
        let err = store.debit(user, dec(100), second).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateIdempotencyKey { .. }));
        assert_eq!(store.balance(user).await.unwrap(), dec(900));
    }

    #[tokio::test]
    async fn refund_reverses_a_debit_once() {
        let (store, user) = store_with_user(1000).await;
        let (_, entry) = store
            .debit(user, dec(300), NewLedgerEntry::new(EntryKind::Data, "r1"))
            .await
            .unwrap();

        let (balance, refund) = store.refund(user, entry.id, "vendor failed").await.unwrap();
        assert_eq!(balance, dec(1000));
        assert_eq!(refund.refund_of, Some(entry.id));

        let original = store.find_entry(entry.id).await.unwrap().unwrap();
        assert_eq!(original.status, EntryStatus::Failed);
        assert_eq!(original.refunded_by, Some(refund.id));

        let err = store.refund(user, entry.id, "again").await.unwrap_err();
        assert!(matches!(err, StoreError::RefundRejected { .. }));
        assert_eq!(store.balance(user).await.unwrap(), dec(1000));
    }

    #[tokio::test]
    async fn completed_entries_cannot_be_refunded() {
        let (store, user) = store_with_user(1000).await;
        let (_, entry) = store
            .debit(user, dec(300), NewLedgerEntry::new(EntryKind::Data, "r1"))
            .await
            .unwrap();
        store
            .update_entry(entry.id, EntryPatch::status(EntryStatus::Completed))
            .await
            .unwrap();
        let err = store.refund(user, entry.id, "no").await.unwrap_err();
        assert!(matches!(err, StoreError::RefundRejected { .. }));
    }

    #[tokio::test]
    async fn terminal_status_transitions_happen_once() {
        let (store, user) = store_with_user(1000).await;
        let (_, entry) = store
            .debit(user, dec(100), NewLedgerEntry::new(EntryKind::Airtime, "r1"))
            .await
            .unwrap();
        store
            .update_entry(entry.id, EntryPatch::status(EntryStatus::Completed))
            .await
            .unwrap();
        let err = store
            .update_entry(entry.id, EntryPatch::status(EntryStatus::Failed))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn transfer_moves_money_atomically() {
        let store = MemoryWalletStore::new();
        let sender = Uuid::new_v4();
        let receiver = Uuid::new_v4();
        store.create_wallet(sender, dec(500), None).await.unwrap();
        store.create_wallet(receiver, dec(0), None).await.unwrap();

        let (out_entry, in_entry) = store
            .transfer(
                sender,
                receiver,
                dec(200),
                NewLedgerEntry::new(EntryKind::TransferOut, "t1-out"),
                NewLedgerEntry::new(EntryKind::TransferIn, "t1-in"),
            )
            .await
            .unwrap();
        assert_eq!(out_entry.amount, dec(-200));
        assert_eq!(in_entry.amount, dec(200));
        assert_eq!(store.balance(sender).await.unwrap(), dec(300));
        assert_eq!(store.balance(receiver).await.unwrap(), dec(200));
    }

    #[tokio::test]
    async fn ledger_sum_reconstructs_the_balance() {
        let (store, user) = store_with_user(1000).await;
        store
            .debit(user, dec(300), NewLedgerEntry::new(EntryKind::Data, "a"))
            .await
            .unwrap();
        store
            .credit(user, dec(50), NewLedgerEntry::new(EntryKind::Deposit, "b"))
            .await
            .unwrap();
        let (_, debit) = store
            .debit(user, dec(200), NewLedgerEntry::new(EntryKind::Airtime, "c"))
            .await
            .unwrap();
        store.refund(user, debit.id, "failed").await.unwrap();

        let entries = store.entries_for_user(user, 100).await.unwrap();
        let sum: Decimal = entries.iter().map(|e| e.amount).sum();
        assert_eq!(dec(1000) + sum, store.balance(user).await.unwrap());
    }
}
