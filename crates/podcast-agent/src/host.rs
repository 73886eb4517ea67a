//! Capabilities the background agent needs from its host shell: showing and
//! closing notifications, and finding, focusing or opening page clients.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

pub type NotificationId = u64;
pub type ClientId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotificationData {
    /// Page to bring up when the notification is activated.
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationOptions {
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub data: NotificationData,
    /// Notifications sharing a tag replace each other.
    pub tag: Option<String>,
    pub vibrate: Vec<u32>,
    pub require_interaction: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayedNotification {
    pub id: NotificationId,
    pub title: String,
    pub options: NotificationOptions,
}

/// An open page instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowClient {
    pub id: ClientId,
    pub url: String,
    pub focused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("notification permission denied")]
    PermissionDenied,
    #[error("unknown client {0}")]
    UnknownClient(ClientId),
    #[error("host unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait NotificationHost: Send + Sync {
    async fn show(
        &self,
        title: &str,
        options: NotificationOptions,
    ) -> Result<NotificationId, HostError>;

    async fn close(&self, id: NotificationId);

    /// Data attached to a notification that is still on screen.
    async fn data(&self, id: NotificationId) -> Option<NotificationData>;
}

#[async_trait]
pub trait Clients: Send + Sync {
    /// Every window client, controlled or not.
    async fn match_all(&self) -> Vec<WindowClient>;

    async fn focus(&self, id: ClientId) -> Result<(), HostError>;

    async fn open_window(&self, url: &str) -> Result<ClientId, HostError>;

    /// Take control of every open page.
    async fn claim(&self);
}

#[derive(Default)]
struct HostState {
    notifications: BTreeMap<NotificationId, DisplayedNotification>,
    clients: Vec<WindowClient>,
    claimed: bool,
    shown_total: usize,
}

/// Headless host that keeps everything in memory.  Tagged notifications
/// replace an earlier one with the same tag, as a browser would.
#[derive(Default)]
pub struct HeadlessHost {
    state: Mutex<HostState>,
    next_id: AtomicU64,
    denied: bool,
}

impl HeadlessHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// A host whose user refused notification permission.
    pub fn denying() -> Self {
        Self {
            denied: true,
            ..Self::default()
        }
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub async fn add_client(&self, url: impl Into<String>) -> ClientId {
        let id = self.allocate_id();
        self.state.lock().await.clients.push(WindowClient {
            id,
            url: url.into(),
            focused: false,
        });
        id
    }

    pub async fn notifications(&self) -> Vec<DisplayedNotification> {
        self.state.lock().await.notifications.values().cloned().collect()
    }

    /// Count of `show` calls, including ones that replaced a tagged notification.
    pub async fn shown_total(&self) -> usize {
        self.state.lock().await.shown_total
    }

    pub async fn clients(&self) -> Vec<WindowClient> {
        self.state.lock().await.clients.clone()
    }

    pub async fn is_claimed(&self) -> bool {
        self.state.lock().await.claimed
    }
}

#[async_trait]
impl NotificationHost for HeadlessHost {
    async fn show(
        &self,
        title: &str,
        options: NotificationOptions,
    ) -> Result<NotificationId, HostError> {
        if self.denied {
            return Err(HostError::PermissionDenied);
        }
        let id = self.allocate_id();
        let mut state = self.state.lock().await;
        if let Some(tag) = options.tag.as_deref().filter(|t| !t.is_empty()) {
            state
                .notifications
                .retain(|_, n| n.options.tag.as_deref() != Some(tag));
        }
        state.notifications.insert(
            id,
            DisplayedNotification {
                id,
                title: title.to_string(),
                options,
            },
        );
        state.shown_total += 1;
        Ok(id)
    }

    async fn close(&self, id: NotificationId) {
        self.state.lock().await.notifications.remove(&id);
    }

    async fn data(&self, id: NotificationId) -> Option<NotificationData> {
        self.state
            .lock()
            .await
            .notifications
            .get(&id)
            .map(|n| n.options.data.clone())
    }
}

#[async_trait]
impl Clients for HeadlessHost {
    async fn match_all(&self) -> Vec<WindowClient> {
        self.state.lock().await.clients.clone()
    }

    async fn focus(&self, id: ClientId) -> Result<(), HostError> {
        let mut state = self.state.lock().await;
        if !state.clients.iter().any(|c| c.id == id) {
            return Err(HostError::UnknownClient(id));
        }
        for client in state.clients.iter_mut() {
            client.focused = client.id == id;
        }
        Ok(())
    }

    async fn open_window(&self, url: &str) -> Result<ClientId, HostError> {
        let id = self.allocate_id();
        let mut state = self.state.lock().await;
        for client in state.clients.iter_mut() {
            client.focused = false;
        }
        state.clients.push(WindowClient {
            id,
            url: url.to_string(),
            focused: true,
        });
        Ok(id)
    }

    async fn claim(&self) {
        self.state.lock().await.claimed = true;
    }
}
