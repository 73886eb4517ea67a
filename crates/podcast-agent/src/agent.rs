//! The background agent: page-independent handler for lifecycle, fetch,
//! message, push and notification events.
//!
//! Per notification the lifecycle is
//!
//! ```text
//! Received -> Displayed -> Activated | Dismissed -> Closed
//! ```
//!
//! and nothing about a notification is kept once it is closed.

use std::collections::HashMap;
use std::sync::Arc;

use podcast_proto::config::AgentConfig;
use podcast_proto::protocol::{AgentMessage, NotificationPayload, DEFAULT_TARGET_URL};
use reqwest::Url;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::assets::{AssetCache, AssetRequest, FetchOutcome, NetworkError};
use crate::host::{
    ClientId, Clients, NotificationData, NotificationHost, NotificationId,
    NotificationOptions,
};

pub const FALLBACK_PUSH_TITLE: &str = "New message";
pub const FALLBACK_PUSH_BODY: &str = "You have a notification";
const PUSH_VIBRATION: [u32; 3] = [200, 100, 200];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationState {
    Received,
    Displayed,
    Activated,
    Dismissed,
    Closed,
}

/// What activating a notification did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    Focused(ClientId),
    Opened(ClientId),
    /// Neither focusing nor opening succeeded.
    Failed,
}

/// A push body after defaults were applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushNotice {
    pub title: String,
    pub body: String,
    pub icon: Option<String>,
    pub badge: Option<String>,
    pub url: String,
}

impl PushNotice {
    fn fallback() -> Self {
        Self {
            title: FALLBACK_PUSH_TITLE.to_string(),
            body: FALLBACK_PUSH_BODY.to_string(),
            icon: None,
            badge: None,
            url: DEFAULT_TARGET_URL.to_string(),
        }
    }

    /// Parse the opaque push bytes.  Absent or malformed data yields the
    /// fallback notice; a parsed payload missing fields takes the fallback's.
    pub fn parse(data: Option<&[u8]>) -> Self {
        let Some(bytes) = data else {
            return Self::fallback();
        };
        match serde_json::from_slice::<NotificationPayload>(bytes) {
            Ok(payload) => {
                let fallback = Self::fallback();
                Self {
                    title: payload.title.unwrap_or(fallback.title),
                    body: payload.body.unwrap_or(fallback.body),
                    icon: payload.icon,
                    badge: payload.badge,
                    url: payload.url.unwrap_or(fallback.url),
                }
            }
            Err(e) => {
                warn!("push payload is not valid JSON, using defaults: {}", e);
                Self::fallback()
            }
        }
    }
}

struct Tracked {
    target_url: String,
    tag: Option<String>,
    state: NotificationState,
}

pub struct BackgroundAgent {
    assets: AssetCache,
    notifications: Arc<dyn NotificationHost>,
    clients: Arc<dyn Clients>,
    origin: Url,
    icon: String,
    /// `None` lets push notifications stack.
    push_tag: Option<String>,
    tracked: Mutex<HashMap<NotificationId, Tracked>>,
}

impl BackgroundAgent {
    pub fn new(
        config: &AgentConfig,
        assets: AssetCache,
        notifications: Arc<dyn NotificationHost>,
        clients: Arc<dyn Clients>,
    ) -> Result<Self, NetworkError> {
        let origin = Url::parse(&config.origin)
            .map_err(|_| NetworkError::InvalidUrl(config.origin.clone()))?;
        let push_tag = Some(config.notification_tag.clone()).filter(|t| !t.is_empty());
        Ok(Self {
            assets,
            notifications,
            clients,
            origin,
            icon: config.icon.clone(),
            push_tag,
            tracked: Mutex::new(HashMap::new()),
        })
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    pub async fn install(&self) -> Result<usize, NetworkError> {
        self.assets.install().await
    }

    /// Sweep stale cache generations and take control of open pages.
    pub async fn activate(&self) -> Vec<String> {
        let deleted = self.assets.activate().await;
        self.clients.claim().await;
        info!("Agent active on {}", self.assets.version());
        deleted
    }

    pub async fn handle_fetch(&self, request: AssetRequest) -> Result<FetchOutcome, NetworkError> {
        self.assets.handle_fetch(request).await
    }

    // ── Messages & push ──────────────────────────────────────────────────────

    pub async fn handle_message(&self, message: AgentMessage) -> Option<NotificationId> {
        match message {
            AgentMessage::ShowNotification { title, body } => {
                let options = NotificationOptions {
                    body,
                    icon: self.icon.clone(),
                    badge: self.icon.clone(),
                    data: NotificationData {
                        url: DEFAULT_TARGET_URL.to_string(),
                    },
                    ..NotificationOptions::default()
                };
                self.display(&title, options).await
            }
            AgentMessage::Unknown => {
                debug!("ignoring message of unknown type");
                None
            }
        }
    }

    /// Show a notification for a push event.  Never drops the event over a
    /// bad payload.
    pub async fn handle_push(&self, data: Option<&[u8]>) -> Option<NotificationId> {
        let notice = PushNotice::parse(data);
        let options = NotificationOptions {
            body: notice.body,
            icon: notice.icon.unwrap_or_else(|| self.icon.clone()),
            badge: notice.badge.unwrap_or_else(|| self.icon.clone()),
            data: NotificationData { url: notice.url },
            tag: self.push_tag.clone(),
            vibrate: PUSH_VIBRATION.to_vec(),
            require_interaction: false,
        };
        self.display(&notice.title, options).await
    }

    async fn display(&self, title: &str, options: NotificationOptions) -> Option<NotificationId> {
        debug!("notification {:?}: {:?}", NotificationState::Received, title);
        let target_url = options.data.url.clone();
        let tag = options.tag.clone();
        match self.notifications.show(title, options).await {
            Ok(id) => {
                let mut tracked = self.tracked.lock().await;
                // A tagged notification replaces any earlier one with that tag
                if tag.is_some() {
                    tracked.retain(|_, t| t.tag != tag);
                }
                tracked.insert(
                    id,
                    Tracked {
                        target_url,
                        tag,
                        state: NotificationState::Displayed,
                    },
                );
                Some(id)
            }
            Err(e) => {
                warn!("host refused to show {:?}: {}", title, e);
                None
            }
        }
    }

    pub async fn notification_state(&self, id: NotificationId) -> Option<NotificationState> {
        self.tracked.lock().await.get(&id).map(|t| t.state)
    }

    // ── Notification activation ──────────────────────────────────────────────

    /// Close the notification, then focus the first page already showing its
    /// target or open a new one.  The target is read from the notification's
    /// own data, so notifications this agent never tracked still land on
    /// their page.
    ///
    /// The search and the act are not atomic: two activations racing here can
    /// both miss and both open a window.
    pub async fn handle_notification_click(&self, id: NotificationId) -> ClickOutcome {
        let attached = self.notifications.data(id).await.map(|d| d.url);
        let tracked = self.transition(id, NotificationState::Activated).await;
        let target = attached
            .or(tracked)
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_TARGET_URL.to_string());
        self.notifications.close(id).await;
        self.transition(id, NotificationState::Closed).await;

        let target = self.resolve_target(&target);
        let prefix = strip_query(&target);

        let open = self.clients.match_all().await;
        for client in open.iter().filter(|c| c.url.starts_with(prefix)) {
            match self.clients.focus(client.id).await {
                Ok(()) => return ClickOutcome::Focused(client.id),
                Err(e) => debug!("could not focus client {}: {}", client.id, e),
            }
        }

        match self.clients.open_window(&target).await {
            Ok(client) => ClickOutcome::Opened(client),
            Err(e) => {
                warn!("could not open {}: {}", target, e);
                ClickOutcome::Failed
            }
        }
    }

    /// The user swiped the notification away.
    pub async fn handle_notification_dismissed(&self, id: NotificationId) {
        self.transition(id, NotificationState::Dismissed).await;
        self.transition(id, NotificationState::Closed).await;
    }

    /// Move a tracked notification to `state`, returning its target URL.
    /// Closing forgets it.
    async fn transition(&self, id: NotificationId, state: NotificationState) -> Option<String> {
        let mut tracked = self.tracked.lock().await;
        if state == NotificationState::Closed {
            return tracked.remove(&id).map(|t| t.target_url);
        }
        let entry = tracked.get_mut(&id)?;
        debug!("notification {}: {:?} -> {:?}", id, entry.state, state);
        entry.state = state;
        Some(entry.target_url.clone())
    }

    fn resolve_target(&self, url: &str) -> String {
        self.origin
            .join(url)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| url.to_string())
    }
}

fn strip_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}
