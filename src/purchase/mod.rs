//! Purchase orchestration: the top-level state machine tying the wallet,
//! pricing, routing and vendor layers together.

pub mod orchestrator;
pub mod reconciler;
pub mod types;

pub use orchestrator::{OrchestratorConfig, PurchaseOrchestrator};
pub use reconciler::{ReconcileWorker, ReconcilerConfig};
pub use types::{PurchaseReceipt, PurchaseRequest};
