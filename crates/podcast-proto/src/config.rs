use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::platform;
use super::protocol::{DEFAULT_ICON, NOTIFICATION_TAG};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub vapid: VapidConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub subscriptions: SubscriptionsConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory served at `/` (the PWA shell).
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    /// Answer CORS preflights for any origin.
    #[serde(default)]
    pub cors_permissive: bool,
}

/// Application-server identity used to sign push requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VapidConfig {
    /// Contact URI sent as the JWT `sub` claim.
    #[serde(default = "default_vapid_subject")]
    pub subject: String,
    /// Where the private key lives.  When unset a fresh key pair is generated
    /// on every start, which invalidates every subscription issued before.
    #[serde(default)]
    pub private_key_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Seconds the push service should hold an undelivered message.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionBackend {
    /// Process memory only; lost on restart.
    #[default]
    Memory,
    /// JSON file rewritten after every change.
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionsConfig {
    #[serde(default)]
    pub backend: SubscriptionBackend,
    #[serde(default = "default_subscriptions_file")]
    pub file: PathBuf,
}

/// Settings for the background agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Origin + scope the app is served from.  Relative asset and target URLs
    /// resolve against it.
    #[serde(default = "default_origin")]
    pub origin: String,
    /// Name of the current cache generation.
    #[serde(default = "default_cache_version")]
    pub cache_version: String,
    #[serde(default = "default_precache")]
    pub precache: Vec<String>,
    /// Tag applied to push notifications.  An empty tag lets them stack.
    #[serde(default = "default_notification_tag")]
    pub notification_tag: String,
    #[serde(default = "default_icon")]
    pub icon: String,
    #[serde(default = "default_reminder_delay_secs")]
    pub reminder_delay_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// User-configurable paths for stored episodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_episodes_dir")]
    pub episodes_dir: PathBuf,
    /// Upper bound on stored payload bytes.  No limit when unset.
    #[serde(default)]
    pub episodes_quota_bytes: Option<u64>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            static_dir: default_static_dir(),
            cors_permissive: false,
        }
    }
}

impl Default for VapidConfig {
    fn default() -> Self {
        Self {
            subject: default_vapid_subject(),
            private_key_file: None,
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for SubscriptionsConfig {
    fn default() -> Self {
        Self {
            backend: SubscriptionBackend::default(),
            file: default_subscriptions_file(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            cache_version: default_cache_version(),
            precache: default_precache(),
            notification_tag: default_notification_tag(),
            icon: default_icon(),
            reminder_delay_secs: default_reminder_delay_secs(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            episodes_dir: default_episodes_dir(),
            episodes_quota_bytes: None,
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("podcasts")
}

fn default_vapid_subject() -> String {
    "mailto:admin@example.com".to_string()
}

fn default_ttl_secs() -> u32 {
    60 * 60 * 24
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_subscriptions_file() -> PathBuf {
    platform::data_dir().join("subscriptions.json")
}

fn default_origin() -> String {
    "http://localhost:3000/".to_string()
}

fn default_cache_version() -> String {
    "podcasts-cache-v1".to_string()
}

fn default_precache() -> Vec<String> {
    [
        "./",
        "./index.html",
        "./styles.css",
        "./app.js",
        "./idb.js",
        "./manifest.json",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_notification_tag() -> String {
    NOTIFICATION_TAG.to_string()
}

fn default_icon() -> String {
    DEFAULT_ICON.to_string()
}

fn default_reminder_delay_secs() -> u64 {
    30
}

fn default_queue_capacity() -> usize {
    256
}

fn default_episodes_dir() -> PathBuf {
    platform::data_dir().join("episodes")
}

impl Config {
    /// Load from `config_path`, writing a default file first if none exists
    /// yet.
    pub fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
