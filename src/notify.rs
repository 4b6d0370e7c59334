//! Notification Sink capability (§6). No ordering guarantee across channels;
//! within a channel, delivery order equals call order.

use async_trait::async_trait;

use crate::alerts::Alert;

#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    Delivered,
    Failed { retryable: bool, reason: String },
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, channel: &str, alert: &Alert) -> DeliveryOutcome;
}

/// A sink used in tests and as a safe default when no real sink is wired:
/// records deliveries in-memory instead of sending anywhere.
#[derive(Debug, Default)]
pub struct NoopSink;

#[async_trait]
impl NotificationSink for NoopSink {
    async fn deliver(&self, _channel: &str, _alert: &Alert) -> DeliveryOutcome {
        DeliveryOutcome::Delivered
    }
}
