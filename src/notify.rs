//! Notification boundary.
//!
//! Delivery (push/email/SMS) lives outside this crate. The core only needs a
//! best-effort sink: a notification failure must never affect a purchase
//! outcome, so implementations are infallible from the caller's view.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyCategory {
    PurchaseCompleted,
    PurchaseFailed,
    PurchaseRefunded,
    TransferReceived,
}

impl NotifyCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyCategory::PurchaseCompleted => "purchase_completed",
            NotifyCategory::PurchaseFailed => "purchase_failed",
            NotifyCategory::PurchaseRefunded => "purchase_refunded",
            NotifyCategory::TransferReceived => "transfer_received",
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        user_id: Uuid,
        title: &str,
        message: &str,
        category: NotifyCategory,
        data: JsonValue,
    );
}

/// Default sink: structured log lines only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        user_id: Uuid,
        title: &str,
        message: &str,
        category: NotifyCategory,
        data: JsonValue,
    ) {
        match category {
            NotifyCategory::PurchaseFailed => {
                error!(
                    user = %user_id,
                    category = category.as_str(),
                    %data,
                    "NOTIFICATION: {} - {}", title, message
                );
            }
            _ => {
                info!(
                    user = %user_id,
                    category = category.as_str(),
                    %data,
                    "NOTIFICATION: {} - {}", title, message
                );
            }
        }
    }
}
