//! Temporary playback URLs for stored payloads.
//!
//! A player is given a `blob:` URL instead of the bytes themselves.  The URL
//! keeps the payload alive until the caller revokes it; nothing revokes it
//! automatically, so a URL that is never released lives as long as the
//! registry does.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use tokio::sync::RwLock;
use tracing::debug;

use crate::episodes::{Episode, Payload};

const URL_SCHEME: &str = "blob:podcasts/";

#[derive(Default)]
pub struct PlaybackUrls {
    live: RwLock<HashMap<String, Arc<Payload>>>,
}

impl PlaybackUrls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a new URL for the episode's payload.
    pub async fn create(&self, episode: &Episode) -> String {
        let token: u128 = rand::thread_rng().gen();
        let url = format!("{}{:032x}", URL_SCHEME, token);
        self.live
            .write()
            .await
            .insert(url.clone(), Arc::new(episode.payload.clone()));
        debug!("playback url granted for episode {}", episode.id);
        url
    }

    pub async fn resolve(&self, url: &str) -> Option<Arc<Payload>> {
        self.live.read().await.get(url).cloned()
    }

    /// Release a URL.  Returns false if it was unknown or already revoked.
    pub async fn revoke(&self, url: &str) -> bool {
        self.live.write().await.remove(url).is_some()
    }

    pub async fn live_count(&self) -> usize {
        self.live.read().await.len()
    }
}
