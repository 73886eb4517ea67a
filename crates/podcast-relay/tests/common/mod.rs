#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use podcast_proto::protocol::{PushSubscription, SubscriptionKeys};
use podcast_relay::registry::{MemorySubscriptionStore, SubscriptionRegistry};
use podcast_relay::vapid::VapidKeys;
use podcast_relay::webpush::{DeliveryError, PushTransport};
use podcast_relay::Dispatcher;
use rand::Rng;
use tokio::sync::Mutex;

pub fn subscription(endpoint: &str) -> PushSubscription {
    PushSubscription {
        endpoint: endpoint.to_string(),
        expiration_time: None,
        keys: SubscriptionKeys {
            p256dh: "BPlaceholderKey".to_string(),
            auth: "placeholder".to_string(),
        },
    }
}

/// Records every delivery; endpoints in `failing` answer 410 Gone.
#[derive(Default)]
pub struct FakeTransport {
    failing: HashSet<String>,
    max_delay_ms: u64,
    pub delivered: Mutex<Vec<(String, Vec<u8>)>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(endpoints: &[&str]) -> Self {
        Self {
            failing: endpoints.iter().map(|e| e.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Each delivery sleeps up to `ms` milliseconds first.
    pub fn with_jitter(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    pub async fn delivered_to(&self) -> Vec<String> {
        self.delivered
            .lock()
            .await
            .iter()
            .map(|(endpoint, _)| endpoint.clone())
            .collect()
    }
}

#[async_trait]
impl PushTransport for FakeTransport {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &[u8],
    ) -> Result<(), DeliveryError> {
        if self.max_delay_ms > 0 {
            let delay = rand::thread_rng().gen_range(0..=self.max_delay_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing.contains(&subscription.endpoint) {
            return Err(DeliveryError::Rejected {
                status: 410,
                body: "push subscription has unsubscribed or expired".to_string(),
            });
        }
        self.delivered
            .lock()
            .await
            .push((subscription.endpoint.clone(), payload.to_vec()));
        Ok(())
    }
}

pub fn relay(transport: Arc<FakeTransport>) -> (Arc<SubscriptionRegistry>, Arc<Dispatcher>) {
    let registry = Arc::new(SubscriptionRegistry::new(
        Arc::new(MemorySubscriptionStore::new()),
        Arc::new(VapidKeys::generate()),
    ));
    let dispatcher = Arc::new(Dispatcher::new(registry.clone(), transport));
    (registry, dispatcher)
}
