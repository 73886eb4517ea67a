//! Fan-out of one notification to every registered subscription.
//!
//! Each dispatch snapshots the registry, attempts every delivery once and
//! concurrently, waits for all of them to settle, then replaces the registry
//! with exactly the subscriptions that accepted the message.  A subscription
//! registered while a dispatch is in flight can be lost by that replace; the
//! client re-registers on its next visit.

use std::sync::Arc;

use futures_util::future::join_all;
use podcast_proto::protocol::{DispatchRequest, NotificationPayload, DEFAULT_TARGET_URL};
use tracing::{info, warn};

use crate::registry::{RegistryError, SubscriptionRegistry};
use crate::webpush::{DeliveryError, PushTransport};

pub const DEFAULT_DISPATCH_TITLE: &str = "New episode available";
pub const DEFAULT_DISPATCH_BODY: &str = "You have a new podcast episode waiting for you";
pub const TEST_TITLE: &str = "Test notification";
pub const TEST_BODY: &str = "The server can send push notifications!";

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no subscriptions registered")]
    RegistryEmpty,
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error("cannot encode payload: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
}

/// Build the payload for a dispatch request.  Missing or empty fields get
/// the stock new-episode text.
pub fn payload_for(request: &DispatchRequest) -> NotificationPayload {
    fn given(field: &Option<String>) -> Option<&str> {
        field.as_deref().filter(|s| !s.is_empty())
    }
    NotificationPayload::new(
        given(&request.title).unwrap_or(DEFAULT_DISPATCH_TITLE),
        given(&request.body).unwrap_or(DEFAULT_DISPATCH_BODY),
    )
    .with_url(given(&request.url).unwrap_or(DEFAULT_TARGET_URL))
}

pub fn test_payload() -> NotificationPayload {
    NotificationPayload::new(TEST_TITLE, TEST_BODY)
}

pub struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
    transport: Arc<dyn PushTransport>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SubscriptionRegistry>, transport: Arc<dyn PushTransport>) -> Self {
        Self {
            registry,
            transport,
        }
    }

    /// Deliver to every subscription and prune the ones that failed.
    pub async fn dispatch(
        &self,
        payload: &NotificationPayload,
    ) -> Result<DispatchReport, DispatchError> {
        let subscriptions = self.registry.snapshot().await?;
        if subscriptions.is_empty() {
            return Err(DispatchError::RegistryEmpty);
        }
        let bytes = serde_json::to_vec(payload)?;

        let attempted = subscriptions.len();
        info!("Sending notification to {} subscriber(s)", attempted);
        let attempts = subscriptions
            .iter()
            .map(|subscription| self.transport.send(subscription, &bytes));
        let results = join_all(attempts).await;

        let mut survivors = Vec::with_capacity(attempted);
        for (subscription, result) in subscriptions.into_iter().zip(results) {
            match result {
                Ok(()) => survivors.push(subscription),
                Err(e) => warn!(
                    "Delivery to {} failed, removing it: {}",
                    subscription.endpoint_prefix(),
                    e
                ),
            }
        }

        let report = DispatchReport {
            sent: survivors.len(),
            failed: attempted - survivors.len(),
        };
        self.registry.replace(survivors).await?;
        info!("Dispatch finished: {} sent, {} failed", report.sent, report.failed);
        Ok(report)
    }

    /// Send to the first subscription only.  A failure is returned to the
    /// caller and nothing is pruned.
    pub async fn send_test(&self, payload: &NotificationPayload) -> Result<(), DispatchError> {
        let subscriptions = self.registry.snapshot().await?;
        let Some(first) = subscriptions.first() else {
            return Err(DispatchError::RegistryEmpty);
        };
        let bytes = serde_json::to_vec(payload)?;
        self.transport.send(first, &bytes).await?;
        info!("Test notification sent to {}", first.endpoint_prefix());
        Ok(())
    }
}
