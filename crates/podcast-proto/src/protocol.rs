use serde::{Deserialize, Serialize};

/// Tag shared by every push-originated notification, so a new push replaces
/// the previous one instead of stacking.
pub const NOTIFICATION_TAG: &str = "podcast-notification";

/// Icon and badge used when a payload does not name its own.
pub const DEFAULT_ICON: &str = "/icons/icon-192.png";

/// Target URL used when a payload does not name one.
pub const DEFAULT_TARGET_URL: &str = "/";

/// How many endpoint characters `/stats` reveals.
pub const ENDPOINT_PREFIX_LEN: usize = 50;

// ── Page → agent messages ─────────────────────────────────────────────────────

/// Structured messages the foreground page posts to the background agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentMessage {
    #[serde(rename = "SHOW_NOTIFICATION")]
    ShowNotification {
        title: String,
        #[serde(default)]
        body: String,
    },
    /// Any message type the agent does not understand.  Ignored on receipt.
    #[serde(other)]
    Unknown,
}

impl AgentMessage {
    pub fn show_notification(title: impl Into<String>, body: impl Into<String>) -> Self {
        AgentMessage::ShowNotification {
            title: title.into(),
            body: body.into(),
        }
    }
}

// ── Push payloads ─────────────────────────────────────────────────────────────

/// JSON body carried inside an encrypted push message.
///
/// The relay always fills every field; the agent treats all of them as
/// optional because the bytes it receives are opaque until parsed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NotificationPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl NotificationPayload {
    /// A fully populated payload with the default icon, badge and target URL.
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            body: Some(body.into()),
            icon: Some(DEFAULT_ICON.to_string()),
            badge: Some(DEFAULT_ICON.to_string()),
            url: Some(DEFAULT_TARGET_URL.to_string()),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

// ── Push subscriptions ────────────────────────────────────────────────────────

/// Encryption material a browser hands out with its subscription.  Opaque to
/// the registry; only the push transport looks inside.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

/// The `PushSubscription.toJSON()` shape a browser posts to `/suscribir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    pub endpoint: String,
    #[serde(default)]
    pub expiration_time: Option<f64>,
    #[serde(default)]
    pub keys: SubscriptionKeys,
}

impl PushSubscription {
    /// First `ENDPOINT_PREFIX_LEN` characters followed by an ellipsis, as
    /// reported by `/stats`.
    pub fn endpoint_prefix(&self) -> String {
        let prefix: String = self.endpoint.chars().take(ENDPOINT_PREFIX_LEN).collect();
        format!("{}...", prefix)
    }
}

// ── Relay HTTP bodies ─────────────────────────────────────────────────────────

/// Body of `POST /notificar`.  Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub message: String,
    pub sent: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyResponse {
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSummary {
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub total_subscriptions: usize,
    pub subscriptions: Vec<EndpointSummary>,
}
