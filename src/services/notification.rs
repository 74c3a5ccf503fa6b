use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::orders::Order;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationTemplate {
    /// Cash-on-delivery order accepted.
    OrderConfirmation,
    /// Gateway payment captured.
    PaymentConfirmation,
}

impl NotificationTemplate {
    pub fn template_id(&self) -> &'static str {
        match self {
            NotificationTemplate::OrderConfirmation => "order-confirmation",
            NotificationTemplate::PaymentConfirmation => "payment-confirmation",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderNotification {
    pub template: NotificationTemplate,
    pub recipient: String,
    pub order: Order,
}

#[derive(Debug, Error)]
#[error("Notification delivery failed: {0}")]
pub struct NotificationError(pub String);

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: OrderNotification) -> Result<(), NotificationError>;
}

/// Writes notifications to the log instead of delivering them.
pub struct NotificationService;

impl NotificationService {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NotificationService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSender for NotificationService {
    async fn send(&self, notification: OrderNotification) -> Result<(), NotificationError> {
        if notification.recipient.trim().is_empty() {
            return Err(NotificationError(format!(
                "order {} has no recipient address",
                notification.order.order_code
            )));
        }
        info!(
            order_code = %notification.order.order_code,
            recipient = %notification.recipient,
            template = notification.template.template_id(),
            total = %notification.order.total_price,
            "NOTIFICATION: order email queued"
        );
        Ok(())
    }
}

/// Fire-and-forget delivery. The caller's transition has already committed, so failures are
/// only logged.
pub fn dispatch(
    sender: Arc<dyn NotificationSender>,
    template: NotificationTemplate,
    order: &Order,
) {
    let notification = OrderNotification {
        template,
        recipient: order.buyer_email.clone(),
        order: order.clone(),
    };
    tokio::spawn(async move {
        let order_code = notification.order.order_code.clone();
        if let Err(e) = sender.send(notification).await {
            warn!(order_code = %order_code, error = %e, "notification not delivered");
        }
    });
}
