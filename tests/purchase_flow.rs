//! End-to-end purchase scenarios over the in-memory store and mock vendors.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use billhive::notify::LogNotifier;
use billhive::pricing::{MarginRule, MarginType, PricingEngine};
use billhive::purchase::{
    OrchestratorConfig, PurchaseOrchestrator, PurchaseRequest, ReconcileWorker, ReconcilerConfig,
};
use billhive::routing::{HealthManager, ProviderRouter, RouterConfig, RoutingRule};
use billhive::vendors::error::{VendorError, VendorResult};
use billhive::vendors::types::{
    CustomerInfo, Network, Plan, ServiceKind, VendorBalance, VendorName, VendorOrder,
    VendorOutcome, VendorStatus, VerifyRequest,
};
use billhive::vendors::{VendorAdapter, VendorRegistry};
use billhive::wallet::{EntryStatus, MemoryWalletStore, WalletLedger, WalletStore};

const ALL_SERVICES: &[ServiceKind] = &[
    ServiceKind::Airtime,
    ServiceKind::Data,
    ServiceKind::Electricity,
    ServiceKind::CableTv,
    ServiceKind::Betting,
    ServiceKind::ExamPin,
];

fn dec(v: i64) -> Decimal {
    Decimal::from(v)
}

#[derive(Clone)]
enum PurchaseBehavior {
    Succeed,
    FailOutcome(String),
    Throw(VendorError),
    Timeout,
}

struct MockVendor {
    name: VendorName,
    behavior: Mutex<PurchaseBehavior>,
    query_result: Mutex<VendorStatus>,
    plans: Vec<Plan>,
    pending_on_timeout: bool,
    purchase_calls: AtomicU32,
}

impl MockVendor {
    fn new(name: VendorName, behavior: PurchaseBehavior) -> Arc<Self> {
        Arc::new(Self {
            name,
            behavior: Mutex::new(behavior),
            query_result: Mutex::new(VendorStatus::Pending),
            plans: Vec::new(),
            pending_on_timeout: false,
            purchase_calls: AtomicU32::new(0),
        })
    }

    fn with_plan(name: VendorName, plan_code: &str, cost: i64) -> Arc<Self> {
        Arc::new(Self {
            name,
            behavior: Mutex::new(PurchaseBehavior::Succeed),
            query_result: Mutex::new(VendorStatus::Pending),
            plans: vec![Plan {
                code: plan_code.to_string(),
                name: format!("{} plan", plan_code),
                service: ServiceKind::Data,
                network: Some(Network::Mtn),
                cost_price: dec(cost),
                validity: Some("30 days".to_string()),
            }],
            pending_on_timeout: false,
            purchase_calls: AtomicU32::new(0),
        })
    }

    fn timing_out(name: VendorName) -> Arc<Self> {
        Arc::new(Self {
            name,
            behavior: Mutex::new(PurchaseBehavior::Timeout),
            query_result: Mutex::new(VendorStatus::Pending),
            plans: Vec::new(),
            pending_on_timeout: true,
            purchase_calls: AtomicU32::new(0),
        })
    }

    fn set_query_result(&self, status: VendorStatus) {
        *self.query_result.lock().unwrap() = status;
    }

    fn calls(&self) -> u32 {
        self.purchase_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VendorAdapter for MockVendor {
    fn name(&self) -> VendorName {
        self.name
    }

    fn services(&self) -> &'static [ServiceKind] {
        ALL_SERVICES
    }

    async fn authenticate(&self) -> VendorResult<()> {
        Ok(())
    }

    async fn is_authenticated(&self) -> bool {
        true
    }

    async fn balance(&self) -> VendorResult<VendorBalance> {
        Ok(VendorBalance {
            amount: dec(1_000_000),
            currency: "NGN".to_string(),
        })
    }

    async fn plans(
        &self,
        _service: ServiceKind,
        _network: Option<Network>,
    ) -> VendorResult<Vec<Plan>> {
        Ok(self.plans.clone())
    }

    fn supports_verification(&self) -> bool {
        true
    }

    async fn verify_customer(&self, request: &VerifyRequest) -> VendorResult<CustomerInfo> {
        Ok(CustomerInfo {
            is_valid: true,
            customer_name: Some("TEST CUSTOMER".to_string()),
            metadata: json!({"account": request.account_number}),
        })
    }

    async fn purchase(&self, order: &VendorOrder) -> VendorResult<VendorOutcome> {
        self.purchase_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            PurchaseBehavior::Succeed => Ok(VendorOutcome {
                vendor: self.name,
                status: VendorStatus::Completed,
                vendor_reference: Some(format!("MOCK-{}", order.reference)),
                message: Some("delivered".to_string()),
                token: None,
                simulated: false,
                raw: json!({"ok": true}),
            }),
            PurchaseBehavior::FailOutcome(message) => Ok(VendorOutcome {
                vendor: self.name,
                status: VendorStatus::Failed,
                vendor_reference: Some(format!("MOCK-{}", order.reference)),
                message: Some(message),
                token: None,
                simulated: false,
                raw: json!({"ok": false}),
            }),
            PurchaseBehavior::Throw(err) => Err(err),
            PurchaseBehavior::Timeout => Err(VendorError::Timeout {
                vendor: self.name.to_string(),
                timeout_secs: 30,
            }),
        }
    }

    async fn query_status(&self, reference: &str) -> VendorResult<VendorOutcome> {
        let status = *self.query_result.lock().unwrap();
        Ok(VendorOutcome {
            vendor: self.name,
            status,
            vendor_reference: Some(reference.to_string()),
            message: Some("requery".to_string()),
            token: None,
            simulated: false,
            raw: json!({"requery": true}),
        })
    }

    fn pending_on_timeout(&self) -> bool {
        self.pending_on_timeout
    }
}

struct Harness {
    store: Arc<MemoryWalletStore>,
    orchestrator: Arc<PurchaseOrchestrator>,
    pricing: Arc<PricingEngine>,
    router: Arc<ProviderRouter>,
}

fn adapters(list: Vec<Arc<MockVendor>>) -> Vec<Arc<dyn VendorAdapter>> {
    list.into_iter()
        .map(|a| a as Arc<dyn VendorAdapter>)
        .collect()
}

async fn harness(adapters: Vec<Arc<dyn VendorAdapter>>) -> Harness {
    let store = Arc::new(MemoryWalletStore::new());
    let ledger = Arc::new(WalletLedger::new(store.clone()));
    let pricing = Arc::new(PricingEngine::new());
    let health = Arc::new(HealthManager::new(VendorName::all()));
    let vendor_services: Vec<(VendorName, &'static [ServiceKind])> =
        adapters.iter().map(|a| (a.name(), a.services())).collect();
    let registry = Arc::new(VendorRegistry::from_adapters(adapters));
    let router = Arc::new(ProviderRouter::new(
        RouterConfig::default(),
        health.clone(),
        vendor_services,
    ));
    let orchestrator = Arc::new(PurchaseOrchestrator::new(
        ledger,
        pricing.clone(),
        router.clone(),
        registry,
        health,
        Arc::new(LogNotifier),
        OrchestratorConfig::default(),
    ));
    Harness {
        store,
        orchestrator,
        pricing,
        router,
    }
}

async fn fund_user(store: &MemoryWalletStore, balance: i64) -> Uuid {
    let user = Uuid::new_v4();
    store
        .create_wallet(user, dec(balance), None)
        .await
        .unwrap();
    user
}

#[tokio::test]
async fn happy_path_data_purchase() {
    let vendor = MockVendor::with_plan(VendorName::Vtpass, "mtn-2gb", 700);
    let h = harness(adapters(vec![vendor])).await;
    let user = fund_user(&h.store, 1000).await;

    h.pricing
        .upsert_rule(MarginRule::new(
            ServiceKind::Data,
            None,
            None,
            MarginType::Fixed,
            dec(50),
        ))
        .await
        .unwrap();
    h.router
        .load_rules(vec![RoutingRule {
            service: ServiceKind::Data,
            network: Some(Network::Mtn),
            primary: VendorName::Vtpass,
            fallback: None,
            active: true,
        }])
        .await;

    let receipt = h
        .orchestrator
        .purchase(
            PurchaseRequest::new(user, ServiceKind::Data, "08031234567").with_plan("mtn-2gb"),
        )
        .await
        .unwrap();

    assert_eq!(receipt.status, EntryStatus::Completed);
    assert_eq!(receipt.selling_price, Some(dec(750)));
    assert!(receipt
        .vendor_reference
        .as_deref()
        .unwrap()
        .starts_with("MOCK-"));
    assert!(!receipt.simulated);
    assert_eq!(h.store.balance(user).await.unwrap(), dec(250));

    let entry = h.store.find_entry(receipt.entry_id).await.unwrap().unwrap();
    assert_eq!(entry.status, EntryStatus::Completed);
    assert_eq!(entry.vendor_status, Some(VendorStatus::Completed));
    assert_eq!(entry.profit, Some(dec(50)));
}

#[tokio::test]
async fn vendor_exception_refunds_the_debit() {
    let vendor = MockVendor::new(
        VendorName::Shago,
        PurchaseBehavior::Throw(VendorError::Upstream {
            vendor: "shago".to_string(),
            message: "downstream rejected".to_string(),
            vendor_code: Some("400".to_string()),
            retryable: false,
        }),
    );
    let h = harness(adapters(vec![vendor])).await;
    let user = fund_user(&h.store, 1000).await;

    h.pricing
        .upsert_rule(MarginRule::new(
            ServiceKind::Airtime,
            None,
            None,
            MarginType::Percentage,
            dec(1),
        ))
        .await
        .unwrap();
    h.router
        .load_rules(vec![RoutingRule {
            service: ServiceKind::Airtime,
            network: Some(Network::Mtn),
            primary: VendorName::Shago,
            fallback: None,
            active: true,
        }])
        .await;

    let receipt = h
        .orchestrator
        .purchase(
            PurchaseRequest::new(user, ServiceKind::Airtime, "08031234567")
                .with_amount(dec(200)),
        )
        .await
        .unwrap();

    // Sell price 202 was debited and refunded; the failure is a structured
    // receipt, not an error.
    assert_eq!(receipt.status, EntryStatus::Failed);
    assert_eq!(h.store.balance(user).await.unwrap(), dec(1000));

    let entries = h.store.entries_for_user(user, 10).await.unwrap();
    assert_eq!(entries.len(), 2);
    let original = h.store.find_entry(receipt.entry_id).await.unwrap().unwrap();
    assert_eq!(original.status, EntryStatus::Failed);
    assert!(original.refunded_by.is_some());
    let refund = h
        .store
        .find_entry(original.refunded_by.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refund.refund_of, Some(original.id));
    assert_eq!(refund.amount, dec(202));
}

#[tokio::test]
async fn insufficient_funds_moves_no_money() {
    let vendor = MockVendor::new(VendorName::Vtpass, PurchaseBehavior::Succeed);
    let h = harness(adapters(vec![vendor])).await;
    let user = fund_user(&h.store, 100).await;

    h.pricing
        .upsert_rule(MarginRule::new(
            ServiceKind::Airtime,
            None,
            None,
            MarginType::Fixed,
            dec(0),
        ))
        .await
        .unwrap();

    let err = h
        .orchestrator
        .purchase(
            PurchaseRequest::new(user, ServiceKind::Airtime, "08031234567")
                .with_amount(dec(500)),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        billhive::CoreError::InsufficientFunds { .. }
    ));
    assert_eq!(h.store.balance(user).await.unwrap(), dec(100));
    assert!(h.store.entries_for_user(user, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_idempotency_key_debits_once() {
    let vendor = MockVendor::new(VendorName::Vtpass, PurchaseBehavior::Succeed);
    let h = harness(adapters(vec![vendor.clone()])).await;
    let user = fund_user(&h.store, 1000).await;

    h.pricing
        .upsert_rule(MarginRule::new(
            ServiceKind::Airtime,
            None,
            None,
            MarginType::Fixed,
            dec(2),
        ))
        .await
        .unwrap();

    let request = PurchaseRequest::new(user, ServiceKind::Airtime, "08031234567")
        .with_amount(dec(200))
        .with_idempotency_key("K1");

    let first = h.orchestrator.purchase(request.clone()).await.unwrap();
    let second = h.orchestrator.purchase(request).await.unwrap();

    assert_eq!(first.entry_id, second.entry_id);
    assert_eq!(first.reference, second.reference);
    assert_eq!(vendor.calls(), 1);
    assert_eq!(h.store.balance(user).await.unwrap(), dec(798));
    assert_eq!(h.store.entries_for_user(user, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn failover_switches_vendor_within_one_purchase() {
    let flaky = MockVendor::new(
        VendorName::Shago,
        PurchaseBehavior::Throw(VendorError::Network {
            vendor: "shago".to_string(),
            message: "connection reset".to_string(),
        }),
    );
    let healthy = MockVendor::new(VendorName::Vtpass, PurchaseBehavior::Succeed);
    let h = harness(adapters(vec![flaky.clone(), healthy.clone()])).await;
    let user = fund_user(&h.store, 1000).await;

    h.pricing
        .upsert_rule(MarginRule::new(
            ServiceKind::Airtime,
            None,
            None,
            MarginType::Fixed,
            dec(5),
        ))
        .await
        .unwrap();
    h.router
        .load_rules(vec![RoutingRule {
            service: ServiceKind::Airtime,
            network: Some(Network::Mtn),
            primary: VendorName::Shago,
            fallback: Some(VendorName::Vtpass),
            active: true,
        }])
        .await;

    let receipt = h
        .orchestrator
        .purchase(
            PurchaseRequest::new(user, ServiceKind::Airtime, "08031234567")
                .with_amount(dec(100)),
        )
        .await
        .unwrap();

    assert_eq!(receipt.status, EntryStatus::Completed);
    assert_eq!(receipt.vendor.as_deref(), Some("vtpass"));
    assert_eq!(flaky.calls(), 1);
    assert_eq!(healthy.calls(), 1);
    assert_eq!(h.store.balance(user).await.unwrap(), dec(895));
}

#[tokio::test]
async fn timeout_on_late_completing_vendor_leaves_entry_pending() {
    let vendor = MockVendor::timing_out(VendorName::Vtpass);
    let h = harness(adapters(vec![vendor.clone()])).await;
    let user = fund_user(&h.store, 1000).await;

    h.pricing
        .upsert_rule(MarginRule::new(
            ServiceKind::Airtime,
            None,
            None,
            MarginType::Fixed,
            dec(0),
        ))
        .await
        .unwrap();

    let receipt = h
        .orchestrator
        .purchase(
            PurchaseRequest::new(user, ServiceKind::Airtime, "08031234567")
                .with_amount(dec(300)),
        )
        .await
        .unwrap();

    // No refund: the vendor may still complete this order.
    assert_eq!(receipt.status, EntryStatus::Pending);
    assert!(receipt.vendor_reference.is_some());
    assert_eq!(h.store.balance(user).await.unwrap(), dec(700));

    // The vendor later reports success; reconciliation completes the entry.
    vendor.set_query_result(VendorStatus::Completed);
    let reconciled = h
        .orchestrator
        .query_transaction_status(receipt.entry_id)
        .await
        .unwrap();
    assert_eq!(reconciled.status, EntryStatus::Completed);
    assert_eq!(h.store.balance(user).await.unwrap(), dec(700));
}

#[tokio::test]
async fn reconciliation_refunds_vendor_reported_failure() {
    let vendor = MockVendor::timing_out(VendorName::Vtpass);
    let h = harness(adapters(vec![vendor.clone()])).await;
    let user = fund_user(&h.store, 1000).await;

    h.pricing
        .upsert_rule(MarginRule::new(
            ServiceKind::Airtime,
            None,
            None,
            MarginType::Fixed,
            dec(0),
        ))
        .await
        .unwrap();

    let receipt = h
        .orchestrator
        .purchase(
            PurchaseRequest::new(user, ServiceKind::Airtime, "08031234567")
                .with_amount(dec(300)),
        )
        .await
        .unwrap();
    assert_eq!(receipt.status, EntryStatus::Pending);
    assert_eq!(h.store.balance(user).await.unwrap(), dec(700));

    vendor.set_query_result(VendorStatus::Failed);
    let worker = ReconcileWorker::new(
        h.store.clone(),
        h.orchestrator.clone(),
        ReconcilerConfig {
            grace_period: std::time::Duration::from_secs(0),
            ..ReconcilerConfig::default()
        },
    );
    // Entries created just now are inside any non-zero grace period, so the
    // test runs with grace zero and a small settle delay.
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let finalised = worker.run_cycle().await;

    assert_eq!(finalised, 1);
    assert_eq!(h.store.balance(user).await.unwrap(), dec(1000));
    let entry = h.store.find_entry(receipt.entry_id).await.unwrap().unwrap();
    assert_eq!(entry.status, EntryStatus::Failed);
    assert!(entry.refunded_by.is_some());
}

#[tokio::test]
async fn failed_purchase_can_be_retried_as_a_new_entry() {
    let vendor = MockVendor::new(
        VendorName::Vtpass,
        PurchaseBehavior::FailOutcome("biller unavailable".to_string()),
    );
    let h = harness(adapters(vec![vendor.clone()])).await;
    let user = fund_user(&h.store, 1000).await;

    h.pricing
        .upsert_rule(MarginRule::new(
            ServiceKind::Airtime,
            None,
            None,
            MarginType::Fixed,
            dec(0),
        ))
        .await
        .unwrap();

    let failed = h
        .orchestrator
        .purchase(
            PurchaseRequest::new(user, ServiceKind::Airtime, "08031234567")
                .with_amount(dec(250)),
        )
        .await
        .unwrap();
    assert_eq!(failed.status, EntryStatus::Failed);
    assert_eq!(h.store.balance(user).await.unwrap(), dec(1000));

    *vendor.behavior.lock().unwrap() = PurchaseBehavior::Succeed;
    let retried = h.orchestrator.retry(failed.entry_id).await.unwrap();

    assert_ne!(retried.entry_id, failed.entry_id);
    assert_ne!(retried.reference, failed.reference);
    assert_eq!(retried.status, EntryStatus::Completed);
    assert_eq!(h.store.balance(user).await.unwrap(), dec(750));

    // Completed entries are not retryable.
    assert!(h.orchestrator.retry(retried.entry_id).await.is_err());
}

#[tokio::test]
async fn network_detection_failure_rejects_before_debit() {
    let vendor = MockVendor::new(VendorName::Vtpass, PurchaseBehavior::Succeed);
    let h = harness(adapters(vec![vendor])).await;
    let user = fund_user(&h.store, 1000).await;

    let err = h
        .orchestrator
        .purchase(
            PurchaseRequest::new(user, ServiceKind::Airtime, "07991234567")
                .with_amount(dec(100)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, billhive::CoreError::Validation { .. }));
    assert_eq!(h.store.balance(user).await.unwrap(), dec(1000));
}

#[tokio::test]
async fn missing_margin_rule_is_a_loud_misconfiguration() {
    let vendor = MockVendor::new(VendorName::Vtpass, PurchaseBehavior::Succeed);
    let h = harness(adapters(vec![vendor])).await;
    let user = fund_user(&h.store, 1000).await;

    let err = h
        .orchestrator
        .purchase(
            PurchaseRequest::new(user, ServiceKind::Airtime, "08031234567")
                .with_amount(dec(100)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, billhive::CoreError::Misconfiguration { .. }));
    assert_eq!(h.store.balance(user).await.unwrap(), dec(1000));
}
