//! Purchase orchestration state machine.
//!
//! An entry moves `Pending -> Completed` or `Pending -> Failed`; failure
//! always carries an automatic refund in the same atomic store operation, so
//! a `Failed` entry without its refund cannot exist. There is no retry
//! transition — retrying a failed purchase creates a brand-new entry with a
//! fresh reference reusing the original parameters.

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Value as JsonValue};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::idempotency::{new_reference, IdempotencyKey};
use crate::notify::{Notifier, NotifyCategory};
use crate::phone;
use crate::pricing::{PricingEngine, PricingError, Quote};
use crate::purchase::types::{PurchaseRequest, PurchaseReceipt};
use crate::routing::{HealthManager, ProviderRouter};
use crate::vendors::error::VendorError;
use crate::vendors::types::{Network, VendorName, VendorOrder, VendorOutcome, VendorStatus};
use crate::vendors::VendorRegistry;
use crate::wallet::entry::{EntryPatch, EntryStatus, LedgerEntry, NewLedgerEntry};
use crate::wallet::store::{StoreError, WalletStore};
use crate::wallet::WalletLedger;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How many vendor switches one purchase may make before giving up.
    pub max_failover_attempts: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_failover_attempts: 2,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_failover_attempts: std::env::var("MAX_FAILOVER_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_failover_attempts),
        }
    }
}

pub struct PurchaseOrchestrator {
    ledger: Arc<WalletLedger>,
    store: Arc<dyn WalletStore>,
    pricing: Arc<PricingEngine>,
    router: Arc<ProviderRouter>,
    registry: Arc<VendorRegistry>,
    health: Arc<HealthManager>,
    notifier: Arc<dyn Notifier>,
    config: OrchestratorConfig,
}

impl PurchaseOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<WalletLedger>,
        pricing: Arc<PricingEngine>,
        router: Arc<ProviderRouter>,
        registry: Arc<VendorRegistry>,
        health: Arc<HealthManager>,
        notifier: Arc<dyn Notifier>,
        config: OrchestratorConfig,
    ) -> Self {
        let store = ledger.store();
        Self {
            ledger,
            store,
            pricing,
            router,
            registry,
            health,
            notifier,
            config,
        }
    }

    /// Execute one purchase end to end. Validation, pricing and the balance
    /// check reject before any money moves; once the wallet is debited every
    /// outcome is expressed through the ledger entry, never a raw vendor
    /// error.
    pub async fn purchase(&self, request: PurchaseRequest) -> CoreResult<PurchaseReceipt> {
        // Step 1: idempotency. A key already bound to an entry short-circuits
        // to that entry's current state.
        let key = match &request.idempotency_key {
            Some(raw) => {
                if raw.trim().is_empty() {
                    return Err(CoreError::field(
                        "idempotency key must not be empty",
                        "idempotency_key",
                    ));
                }
                IdempotencyKey::from_caller(raw)
            }
            None => IdempotencyKey::generate(),
        };
        if let Some(existing) = self.store.find_by_idempotency_key(key.as_str()).await? {
            info!(
                reference = %existing.reference,
                key = %key,
                "idempotency key already bound, returning original result"
            );
            return Ok(PurchaseReceipt::from_entry(&existing));
        }

        // Step 2: per-service validation.
        Self::validate(&request)?;

        // Step 3: recipient normalisation.
        let recipient = self.normalize_recipient(&request)?;

        // Step 4: network resolution.
        let network = self.resolve_network(&request, &recipient)?;

        // Routing happens before money moves; an empty candidate list is a
        // synchronous rejection.
        let candidates = self
            .router
            .candidates(request.service, network, &[])
            .await;
        let Some(first_vendor) = candidates.first().copied() else {
            return Err(CoreError::NoRoutingAvailable {
                service: request.service,
                network,
            });
        };

        // Step 5: cost price, from the routed vendor's catalogue or the raw
        // amount for variable-amount services.
        let cost_price = self
            .resolve_cost_price(&request, network, first_vendor)
            .await?;

        // Step 6: sell price.
        let quote = self
            .pricing
            .calculate(request.service, network, Some(first_vendor), cost_price)
            .await
            .map_err(|err| match err {
                PricingError::NoMatchingRule { .. } => CoreError::Misconfiguration {
                    message: err.to_string(),
                },
                PricingError::InvalidRule { reason } => {
                    CoreError::Misconfiguration { message: reason }
                }
            })?;

        // Step 7: atomic balance check + debit + pending entry.
        let entry = match self
            .debit_for_purchase(&request, &recipient, network, &quote, &key)
            .await
        {
            Ok(entry) => entry,
            Err(CoreError::Store(StoreError::DuplicateIdempotencyKey { .. })) => {
                // Lost the insert race to a concurrent identical request; the
                // constraint, not the earlier lookup, is the authority.
                let existing = self
                    .store
                    .find_by_idempotency_key(key.as_str())
                    .await?
                    .ok_or(CoreError::Store(StoreError::Database {
                        message: "idempotency key bound but entry not found".to_string(),
                        retryable: true,
                    }))?;
                return Ok(PurchaseReceipt::from_entry(&existing));
            }
            Err(err) => return Err(err),
        };

        info!(
            reference = %entry.reference,
            user = %request.user_id,
            service = %request.service,
            recipient = %phone::mask(&recipient),
            sell = %quote.selling_price,
            "wallet debited, dispatching to vendor"
        );

        // Steps 8-10: dispatch with failover, then terminal reconciliation.
        let order = VendorOrder {
            reference: entry.reference.clone(),
            service: request.service,
            network,
            recipient,
            amount: quote.cost_price,
            plan_code: request.plan_code.clone(),
        };
        Ok(self.dispatch(entry, order).await)
    }

    fn validate(request: &PurchaseRequest) -> CoreResult<()> {
        if request.recipient.trim().is_empty() {
            return Err(CoreError::field("recipient is required", "recipient"));
        }
        if request.service.is_variable_amount() {
            match request.amount {
                None => {
                    return Err(CoreError::field(
                        format!("{} requires an amount", request.service),
                        "amount",
                    ))
                }
                Some(amount) if amount <= Decimal::ZERO => {
                    return Err(CoreError::field(
                        format!("amount must be positive, got {}", amount),
                        "amount",
                    ))
                }
                Some(_) => {}
            }
        }
        if request.service.requires_plan()
            && request
                .plan_code
                .as_deref()
                .map(str::trim)
                .unwrap_or("")
                .is_empty()
        {
            return Err(CoreError::field(
                format!("{} requires a plan code", request.service),
                "plan_code",
            ));
        }
        Ok(())
    }

    fn normalize_recipient(&self, request: &PurchaseRequest) -> CoreResult<String> {
        if request.service.is_phone_based() {
            phone::normalize(&request.recipient).map_err(|e| CoreError::field(e, "recipient"))
        } else {
            Ok(request.recipient.trim().to_string())
        }
    }

    fn resolve_network(
        &self,
        request: &PurchaseRequest,
        recipient: &str,
    ) -> CoreResult<Option<Network>> {
        if let Some(network) = request.network {
            return Ok(Some(network));
        }
        if request.service.is_phone_based() {
            // Auto-detection failing is a hard validation error, never a
            // guessed carrier.
            return phone::detect_network(recipient)
                .map(Some)
                .ok_or_else(|| {
                    CoreError::field(
                        format!(
                            "could not detect network for {}",
                            phone::mask(recipient)
                        ),
                        "network",
                    )
                });
        }
        Ok(None)
    }

    async fn resolve_cost_price(
        &self,
        request: &PurchaseRequest,
        network: Option<Network>,
        vendor: VendorName,
    ) -> CoreResult<Decimal> {
        if request.service.is_variable_amount() {
            return request
                .amount
                .ok_or_else(|| CoreError::field("amount is required", "amount"));
        }

        let plan_code = request
            .plan_code
            .as_deref()
            .ok_or_else(|| CoreError::field("plan code is required", "plan_code"))?;
        let adapter = self
            .registry
            .get(vendor)
            .ok_or(CoreError::NoRoutingAvailable {
                service: request.service,
                network,
            })?;
        let plans = adapter
            .plans(request.service, network)
            .await
            .map_err(CoreError::Vendor)?;
        plans
            .into_iter()
            .find(|plan| plan.code == plan_code)
            .map(|plan| plan.cost_price)
            .ok_or_else(|| {
                CoreError::field(
                    format!("unknown plan {} for {}", plan_code, request.service),
                    "plan_code",
                )
            })
    }

    async fn debit_for_purchase(
        &self,
        request: &PurchaseRequest,
        recipient: &str,
        network: Option<Network>,
        quote: &Quote,
        key: &IdempotencyKey,
    ) -> CoreResult<LedgerEntry> {
        let reference = new_reference(request.service);
        let mut new_entry = NewLedgerEntry::new(request.service.into(), reference);
        new_entry.idempotency_key = Some(key.as_str().to_string());
        new_entry.cost_price = Some(quote.cost_price);
        new_entry.selling_price = Some(quote.selling_price);
        new_entry.profit = Some(quote.profit);
        new_entry.details = json!({
            // The original parameters make manual retry possible.
            "request": serde_json::to_value(request).unwrap_or(JsonValue::Null),
            "recipient": recipient,
            "network": network.map(|n| n.as_str()),
            "margin_rule": quote.rule_id,
        });

        let (_, entry) = self
            .ledger
            .debit(request.user_id, quote.selling_price, new_entry)
            .await?;
        Ok(entry)
    }

    /// Try routed vendors until one accepts the order, failing over only on
    /// transport-level errors. Every path out of here leaves the entry in a
    /// coherent state; vendor errors never escape raw.
    async fn dispatch(&self, entry: LedgerEntry, order: VendorOrder) -> PurchaseReceipt {
        let mut excluded: Vec<VendorName> = Vec::new();
        let mut last_error: Option<String> = None;

        for attempt in 0..=self.config.max_failover_attempts {
            let candidates = self
                .router
                .candidates(order.service, order.network, &excluded)
                .await;
            let Some(vendor) = candidates.first().copied() else {
                break;
            };
            let Some(adapter) = self.registry.get(vendor) else {
                excluded.push(vendor);
                continue;
            };

            if attempt > 0 {
                warn!(
                    reference = %entry.reference,
                    vendor = %vendor,
                    attempt,
                    "failing over to next vendor"
                );
            }

            let _ = self
                .store
                .update_entry(
                    entry.id,
                    EntryPatch {
                        vendor: Some(vendor.as_str().to_string()),
                        vendor_called_at: Some(Utc::now()),
                        ..Default::default()
                    },
                )
                .await;

            let started = Instant::now();
            match adapter.purchase(&order).await {
                Ok(outcome) => {
                    let vendor_ok = outcome.status != VendorStatus::Failed;
                    self.health
                        .record_outcome(vendor, vendor_ok, started.elapsed())
                        .await;
                    return self.settle_outcome(&entry, vendor, outcome).await;
                }
                Err(err) => {
                    self.health
                        .record_outcome(vendor, false, started.elapsed())
                        .await;

                    if matches!(err, VendorError::Timeout { .. })
                        && adapter.pending_on_timeout()
                    {
                        // This vendor sometimes completes after our socket
                        // gives up; hold the entry for reconciliation rather
                        // than refunding money the vendor may yet spend.
                        warn!(
                            reference = %entry.reference,
                            vendor = %vendor,
                            "vendor timed out but may complete late, leaving entry pending"
                        );
                        return self
                            .hold_pending(
                                &entry,
                                vendor,
                                Some(order.reference.clone()),
                                json!({"timeout": true}),
                            )
                            .await;
                    }

                    if err.is_retryable() {
                        warn!(
                            reference = %entry.reference,
                            vendor = %vendor,
                            error = %err,
                            "vendor call failed, excluding from this purchase"
                        );
                        last_error = Some(err.user_message());
                        excluded.push(vendor);
                        continue;
                    }

                    // The vendor rejected the request itself; another vendor
                    // would reject it too.
                    return self.settle_failure(&entry, err.user_message()).await;
                }
            }
        }

        let reason =
            last_error.unwrap_or_else(|| "no vendor available to fulfil this order".to_string());
        self.settle_failure(&entry, reason).await
    }

    async fn settle_outcome(
        &self,
        entry: &LedgerEntry,
        vendor: VendorName,
        outcome: VendorOutcome,
    ) -> PurchaseReceipt {
        match outcome.status {
            VendorStatus::Completed => self.settle_success(entry, vendor, &outcome).await,
            VendorStatus::Failed | VendorStatus::Refunded => {
                let reason = outcome
                    .message
                    .clone()
                    .unwrap_or_else(|| "vendor reported failure".to_string());
                let _ = self
                    .store
                    .update_entry(
                        entry.id,
                        EntryPatch {
                            vendor_status: Some(outcome.status),
                            vendor_reference: outcome.vendor_reference.clone(),
                            vendor_responded_at: Some(Utc::now()),
                            details: json!({"vendor_response": outcome.raw}),
                            ..Default::default()
                        },
                    )
                    .await;
                self.settle_failure(entry, reason).await
            }
            VendorStatus::Processing | VendorStatus::Pending => {
                self.hold_pending(
                    entry,
                    vendor,
                    outcome.vendor_reference.clone(),
                    json!({
                        "vendor_response": outcome.raw,
                        "message": outcome.message,
                    }),
                )
                .await
            }
        }
    }

    /// Mark the entry completed exactly once; a lost race means another path
    /// already finalised it and its result stands.
    async fn settle_success(
        &self,
        entry: &LedgerEntry,
        vendor: VendorName,
        outcome: &VendorOutcome,
    ) -> PurchaseReceipt {
        let patch = EntryPatch {
            status: Some(EntryStatus::Completed),
            vendor: Some(vendor.as_str().to_string()),
            vendor_reference: outcome.vendor_reference.clone(),
            vendor_status: Some(VendorStatus::Completed),
            vendor_called_at: None,
            vendor_responded_at: Some(Utc::now()),
            details: json!({
                "vendor_response": outcome.raw,
                "simulated": outcome.simulated,
                "message": outcome.message,
                "token": outcome.token,
            }),
        };

        let receipt = match self.store.update_entry(entry.id, patch).await {
            Ok(updated) => {
                info!(reference = %updated.reference, vendor = %vendor, "purchase completed");
                PurchaseReceipt::from_entry(&updated)
            }
            Err(StoreError::InvalidTransition { .. }) => {
                self.reload_receipt(entry).await
            }
            Err(err) => {
                error!(reference = %entry.reference, error = %err, "failed to record completion");
                self.reload_receipt(entry).await
            }
        };

        self.notifier
            .notify(
                entry.user_id,
                "Purchase successful",
                &format!("Your {} purchase was delivered", entry.kind),
                NotifyCategory::PurchaseCompleted,
                json!({"reference": entry.reference}),
            )
            .await;
        receipt
    }

    /// Mark the entry failed and refund the debit — both inside the store's
    /// one atomic unit. A refund rejection means another path already
    /// finalised the entry; that result stands.
    async fn settle_failure(&self, entry: &LedgerEntry, reason: String) -> PurchaseReceipt {
        let _ = self
            .store
            .update_entry(
                entry.id,
                EntryPatch {
                    vendor_responded_at: Some(Utc::now()),
                    details: json!({"message": reason}),
                    ..Default::default()
                },
            )
            .await;

        match self.ledger.refund(entry.user_id, entry.id, &reason).await {
            Ok(_) => {
                error!(reference = %entry.reference, reason = %reason, "purchase failed, wallet refunded");
            }
            Err(CoreError::Store(StoreError::RefundRejected { .. })) => {
                // Already terminal via another observer.
            }
            Err(err) => {
                error!(
                    reference = %entry.reference,
                    error = %err,
                    "refund failed; entry left for reconciliation"
                );
            }
        }

        let receipt = self.reload_receipt(entry).await;
        self.notifier
            .notify(
                entry.user_id,
                "Purchase failed",
                &format!(
                    "Your {} purchase failed and your wallet was refunded. Ref: {}",
                    entry.kind, entry.reference
                ),
                NotifyCategory::PurchaseFailed,
                json!({"reference": entry.reference, "reason": receipt.message}),
            )
            .await;
        receipt
    }

    async fn hold_pending(
        &self,
        entry: &LedgerEntry,
        vendor: VendorName,
        vendor_reference: Option<String>,
        details: JsonValue,
    ) -> PurchaseReceipt {
        let patch = EntryPatch {
            vendor: Some(vendor.as_str().to_string()),
            vendor_reference,
            vendor_status: Some(VendorStatus::Pending),
            vendor_responded_at: Some(Utc::now()),
            details,
            ..Default::default()
        };
        match self.store.update_entry(entry.id, patch).await {
            Ok(updated) => {
                info!(
                    reference = %updated.reference,
                    vendor = %vendor,
                    "purchase pending at vendor, awaiting reconciliation"
                );
                PurchaseReceipt::from_entry(&updated)
            }
            Err(_) => self.reload_receipt(entry).await,
        }
    }

    async fn reload_receipt(&self, entry: &LedgerEntry) -> PurchaseReceipt {
        match self.store.find_entry(entry.id).await {
            Ok(Some(current)) => PurchaseReceipt::from_entry(&current),
            _ => PurchaseReceipt::from_entry(entry),
        }
    }

    /// Step 11: reconcile a submitted-but-unresolved entry against the
    /// vendor. A query failure is a `ReconciliationError`; the entry is left
    /// pending and the call is safe to repeat.
    pub async fn query_transaction_status(&self, entry_id: Uuid) -> CoreResult<PurchaseReceipt> {
        let entry = self
            .store
            .find_entry(entry_id)
            .await?
            .ok_or(CoreError::Store(StoreError::EntryNotFound { entry_id }))?;

        if entry.status.is_terminal() {
            return Ok(PurchaseReceipt::from_entry(&entry));
        }
        let Some(vendor_reference) = entry.vendor_reference.clone() else {
            // Never reached a vendor; nothing to query yet.
            return Ok(PurchaseReceipt::from_entry(&entry));
        };

        let vendor = entry
            .vendor
            .as_deref()
            .and_then(|v| VendorName::from_str(v).ok())
            .ok_or_else(|| CoreError::Reconciliation {
                entry_id,
                message: "entry has no resolvable vendor".to_string(),
            })?;
        let adapter = self
            .registry
            .get(vendor)
            .ok_or_else(|| CoreError::Reconciliation {
                entry_id,
                message: format!("vendor {} is no longer configured", vendor),
            })?;

        let outcome = adapter
            .query_status(&vendor_reference)
            .await
            .map_err(|err| CoreError::Reconciliation {
                entry_id,
                message: err.to_string(),
            })?;

        match outcome.status {
            VendorStatus::Completed => Ok(self.settle_success(&entry, vendor, &outcome).await),
            VendorStatus::Failed | VendorStatus::Refunded => {
                let reason = outcome
                    .message
                    .clone()
                    .unwrap_or_else(|| "vendor reported failure on requery".to_string());
                Ok(self.settle_failure(&entry, reason).await)
            }
            VendorStatus::Processing | VendorStatus::Pending => {
                let _ = self
                    .store
                    .update_entry(
                        entry.id,
                        EntryPatch {
                            vendor_status: Some(outcome.status),
                            details: json!({"last_requery": Utc::now().to_rfc3339()}),
                            ..Default::default()
                        },
                    )
                    .await;
                Ok(self.reload_receipt(&entry).await)
            }
        }
    }

    /// Step 12: manual retry of a failed purchase — a brand-new entry with a
    /// fresh reference and key, built from the original parameters.
    pub async fn retry(&self, entry_id: Uuid) -> CoreResult<PurchaseReceipt> {
        let entry = self
            .store
            .find_entry(entry_id)
            .await?
            .ok_or(CoreError::Store(StoreError::EntryNotFound { entry_id }))?;

        if entry.status != EntryStatus::Failed {
            return Err(CoreError::validation(format!(
                "only failed purchases can be retried; {} is {}",
                entry.reference, entry.status
            )));
        }

        let mut request: PurchaseRequest = entry
            .details
            .get("request")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| CoreError::Store(StoreError::Database {
                message: format!("stored request is unreadable: {}", e),
                retryable: false,
            }))?
            .ok_or_else(|| {
                CoreError::validation(format!(
                    "entry {} carries no original request parameters",
                    entry.reference
                ))
            })?;

        request.idempotency_key = None;
        info!(original = %entry.reference, "retrying failed purchase as a new entry");
        self.purchase(request).await
    }
}
