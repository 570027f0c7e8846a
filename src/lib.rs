//! BillHive purchase orchestration core.
//!
//! Routes a purchase request to the best available upstream vendor, debits the
//! user's wallet exactly once, calls the vendor and reconciles the outcome —
//! refunding on failure — without ever losing or duplicating money. The web
//! layer, session issuance and wallet funding live outside this crate; the
//! core is driven purely through in-process calls.

pub mod config;
pub mod error;
pub mod idempotency;
pub mod logging;
pub mod notify;
pub mod phone;
pub mod pricing;
pub mod purchase;
pub mod retry;
pub mod routing;
pub mod vendors;
pub mod wallet;

pub use error::{CoreError, CoreResult};
pub use vendors::types::{Network, ServiceKind, VendorName, VendorStatus};
