//! Subscription registry: the set of push subscriptions the relay fans out
//! to, at most one per endpoint.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use podcast_proto::protocol::{EndpointSummary, PushSubscription, StatsResponse};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::vapid::VapidKeys;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("subscription has no endpoint")]
    EmptyEndpoint,
    #[error("subscription file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("subscription file {path:?} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Backing collection for the registry.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn list(&self) -> Result<Vec<PushSubscription>, RegistryError>;

    /// Insert unless a subscription with the same endpoint exists.  Returns
    /// whether anything was inserted.
    async fn add(&self, subscription: PushSubscription) -> Result<bool, RegistryError>;

    /// Swap the whole collection.
    async fn replace(&self, subscriptions: Vec<PushSubscription>) -> Result<(), RegistryError>;
}

fn insert_unique(list: &mut Vec<PushSubscription>, subscription: PushSubscription) -> bool {
    if list.iter().any(|s| s.endpoint == subscription.endpoint) {
        return false;
    }
    list.push(subscription);
    true
}

// ── Memory ────────────────────────────────────────────────────────────────────

/// Process memory only.  Everything is gone after a restart.
#[derive(Default)]
pub struct MemorySubscriptionStore {
    subscriptions: RwLock<Vec<PushSubscription>>,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn list(&self) -> Result<Vec<PushSubscription>, RegistryError> {
        Ok(self.subscriptions.read().await.clone())
    }

    async fn add(&self, subscription: PushSubscription) -> Result<bool, RegistryError> {
        Ok(insert_unique(
            &mut *self.subscriptions.write().await,
            subscription,
        ))
    }

    async fn replace(&self, subscriptions: Vec<PushSubscription>) -> Result<(), RegistryError> {
        *self.subscriptions.write().await = subscriptions;
        Ok(())
    }
}

// ── File ──────────────────────────────────────────────────────────────────────

/// Memory store mirrored to a JSON file after every change.
pub struct FileSubscriptionStore {
    path: PathBuf,
    subscriptions: RwLock<Vec<PushSubscription>>,
}

impl FileSubscriptionStore {
    /// Load `path`, or start empty if it does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let subscriptions: Vec<PushSubscription> = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| RegistryError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(RegistryError::Io { path, source }),
        };
        info!("Loaded {} subscription(s) from {:?}", subscriptions.len(), path);
        Ok(Self {
            path,
            subscriptions: RwLock::new(subscriptions),
        })
    }

    async fn persist(&self, subscriptions: &[PushSubscription]) -> Result<(), RegistryError> {
        let io = |source: std::io::Error| RegistryError::Io {
            path: self.path.clone(),
            source,
        };
        let bytes = serde_json::to_vec_pretty(subscriptions).map_err(|source| {
            RegistryError::Corrupt {
                path: self.path.clone(),
                source,
            }
        })?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(io)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io)?;
        debug!("Wrote {} subscription(s) to {:?}", subscriptions.len(), self.path);
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for FileSubscriptionStore {
    async fn list(&self) -> Result<Vec<PushSubscription>, RegistryError> {
        Ok(self.subscriptions.read().await.clone())
    }

    async fn add(&self, subscription: PushSubscription) -> Result<bool, RegistryError> {
        let mut subscriptions = self.subscriptions.write().await;
        if !insert_unique(&mut subscriptions, subscription) {
            return Ok(false);
        }
        self.persist(&subscriptions).await?;
        Ok(true)
    }

    async fn replace(&self, replacement: Vec<PushSubscription>) -> Result<(), RegistryError> {
        let mut subscriptions = self.subscriptions.write().await;
        self.persist(&replacement).await?;
        *subscriptions = replacement;
        Ok(())
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

pub struct SubscriptionRegistry {
    store: Arc<dyn SubscriptionStore>,
    keys: Arc<VapidKeys>,
}

impl SubscriptionRegistry {
    pub fn new(store: Arc<dyn SubscriptionStore>, keys: Arc<VapidKeys>) -> Self {
        Self { store, keys }
    }

    /// Idempotent by endpoint.  Returns whether this was a new subscription.
    pub async fn register(&self, subscription: PushSubscription) -> Result<bool, RegistryError> {
        if subscription.endpoint.trim().is_empty() {
            return Err(RegistryError::EmptyEndpoint);
        }
        let inserted = self.store.add(subscription).await?;
        if inserted {
            info!("New subscription registered. Total: {}", self.len().await?);
        } else {
            debug!("Subscription already registered");
        }
        Ok(inserted)
    }

    /// Application server key, base64url without padding.
    pub fn public_key(&self) -> String {
        self.keys.public_key_b64()
    }

    pub async fn snapshot(&self) -> Result<Vec<PushSubscription>, RegistryError> {
        self.store.list().await
    }

    pub async fn replace(&self, subscriptions: Vec<PushSubscription>) -> Result<(), RegistryError> {
        self.store.replace(subscriptions).await
    }

    pub async fn len(&self) -> Result<usize, RegistryError> {
        Ok(self.store.list().await?.len())
    }

    pub async fn stats(&self) -> Result<StatsResponse, RegistryError> {
        let subscriptions = self.store.list().await?;
        Ok(StatsResponse {
            total_subscriptions: subscriptions.len(),
            subscriptions: subscriptions
                .iter()
                .map(|s| EndpointSummary {
                    endpoint: s.endpoint_prefix(),
                })
                .collect(),
        })
    }
}
