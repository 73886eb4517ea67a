//! Versioned asset cache used to boot the app offline.
//!
//! Each cache generation is a named cache.  `install` fills the current
//! generation from a fixed manifest, `activate` deletes every other
//! generation, and `handle_fetch` answers GET requests cache-first with a
//! network fallback, degrading to the cached root document when both miss.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use podcast_proto::config::AgentConfig;
use reqwest::{Method, Url};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Identity of a cached request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub method: Method,
    pub url: String,
}

impl RequestKey {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssetRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl AssetRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }
}

/// A captured response: status, headers and the full body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl AssetResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    #[error("fetch {url} failed: {reason}")]
    Unreachable { url: String, reason: String },
    #[error("{url} answered {status}")]
    Status { url: String, status: u16 },
    #[error("invalid url {0:?}")]
    InvalidUrl(String),
}

/// Outbound network access.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse, NetworkError>;
}

/// `Network` over a shared reqwest client.
pub struct HttpNetwork {
    client: reqwest::Client,
}

impl HttpNetwork {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse, NetworkError> {
        let unreachable = |e: reqwest::Error| NetworkError::Unreachable {
            url: request.url.clone(),
            reason: e.to_string(),
        };

        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let upstream = builder.send().await.map_err(unreachable)?;
        let status = upstream.status().as_u16();
        let headers = upstream
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = upstream.bytes().await.map_err(unreachable)?.to_vec();

        Ok(AssetResponse {
            status,
            headers,
            body,
        })
    }
}

/// Named caches of request → response entries.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    async fn match_in(&self, cache: &str, key: &RequestKey) -> Option<AssetResponse>;

    async fn put(&self, cache: &str, key: RequestKey, response: AssetResponse);

    /// Store every entry or none of them.
    async fn put_all(&self, cache: &str, entries: Vec<(RequestKey, AssetResponse)>);

    /// Drop a whole generation.  Returns false if it did not exist.
    async fn delete(&self, cache: &str) -> bool;

    async fn names(&self) -> Vec<String>;

    async fn keys(&self, cache: &str) -> Vec<RequestKey>;
}

#[derive(Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<HashMap<String, HashMap<RequestKey, AssetResponse>>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn match_in(&self, cache: &str, key: &RequestKey) -> Option<AssetResponse> {
        self.caches.read().await.get(cache)?.get(key).cloned()
    }

    async fn put(&self, cache: &str, key: RequestKey, response: AssetResponse) {
        self.caches
            .write()
            .await
            .entry(cache.to_string())
            .or_default()
            .insert(key, response);
    }

    async fn put_all(&self, cache: &str, entries: Vec<(RequestKey, AssetResponse)>) {
        let mut caches = self.caches.write().await;
        let target = caches.entry(cache.to_string()).or_default();
        target.extend(entries);
    }

    async fn delete(&self, cache: &str) -> bool {
        self.caches.write().await.remove(cache).is_some()
    }

    async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    async fn keys(&self, cache: &str) -> Vec<RequestKey> {
        self.caches
            .read()
            .await
            .get(cache)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Where a fetch answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
    /// Network failed; the cached root document stood in.
    OfflineFallback,
    /// Non-GET request forwarded untouched.
    Passthrough,
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub response: AssetResponse,
    pub source: ResponseSource,
}

pub struct AssetCache {
    version: String,
    scope: Url,
    /// Key the root document is installed under; the offline page.
    offline_root: RequestKey,
    precache: Vec<String>,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
}

impl AssetCache {
    pub fn new(
        version: impl Into<String>,
        scope: &str,
        precache: Vec<String>,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> Result<Self, NetworkError> {
        let scope = Url::parse(scope).map_err(|_| NetworkError::InvalidUrl(scope.to_string()))?;
        let mut root = scope
            .join("./")
            .map_err(|_| NetworkError::InvalidUrl(scope.to_string()))?;
        root.set_fragment(None);
        Ok(Self {
            version: version.into(),
            scope,
            offline_root: RequestKey::get(root.to_string()),
            precache,
            storage,
            network,
        })
    }

    pub fn from_config(
        config: &AgentConfig,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> Result<Self, NetworkError> {
        Self::new(
            config.cache_version.clone(),
            &config.origin,
            config.precache.clone(),
            storage,
            network,
        )
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Absolute form of `url`, resolved against the app scope.
    pub fn resolve(&self, url: &str) -> Result<String, NetworkError> {
        let mut resolved = self
            .scope
            .join(url)
            .map_err(|_| NetworkError::InvalidUrl(url.to_string()))?;
        resolved.set_fragment(None);
        Ok(resolved.to_string())
    }

    fn is_same_origin(&self, url: &str) -> bool {
        Url::parse(url)
            .map(|u| u.origin() == self.scope.origin())
            .unwrap_or(false)
    }

    /// Fetch the whole manifest into the current generation.  Nothing is
    /// stored unless every entry was fetched successfully.
    pub async fn install(&self) -> Result<usize, NetworkError> {
        let mut entries = Vec::with_capacity(self.precache.len());
        for entry in &self.precache {
            let url = self.resolve(entry)?;
            let response = self.network.fetch(&AssetRequest::get(url.clone())).await?;
            if !response.ok() {
                return Err(NetworkError::Status {
                    url,
                    status: response.status,
                });
            }
            entries.push((RequestKey::get(url), response));
        }

        let count = entries.len();
        self.storage.put_all(&self.version, entries).await;
        info!("Installed {} assets into {}", count, self.version);
        Ok(count)
    }

    /// Sweep every generation other than the current one.  Returns the names
    /// that were deleted.
    pub async fn activate(&self) -> Vec<String> {
        let mut deleted = Vec::new();
        for name in self.storage.names().await {
            if name != self.version && self.storage.delete(&name).await {
                info!("Deleted stale cache generation {}", name);
                deleted.push(name);
            }
        }
        deleted
    }

    pub async fn handle_fetch(&self, request: AssetRequest) -> Result<FetchOutcome, NetworkError> {
        if request.method != Method::GET {
            let response = self.network.fetch(&request).await?;
            return Ok(FetchOutcome {
                response,
                source: ResponseSource::Passthrough,
            });
        }

        let url = self.resolve(&request.url)?;
        let key = RequestKey::get(url.clone());

        if let Some(cached) = self.storage.match_in(&self.version, &key).await {
            debug!("cache hit {}", url);
            return Ok(FetchOutcome {
                response: cached,
                source: ResponseSource::Cache,
            });
        }

        let outbound = AssetRequest { url: url.clone(), ..request };
        match self.network.fetch(&outbound).await {
            Ok(response) => {
                if response.ok() && self.is_same_origin(&url) {
                    self.storage
                        .put(&self.version, key, response.clone())
                        .await;
                }
                Ok(FetchOutcome {
                    response,
                    source: ResponseSource::Network,
                })
            }
            Err(e) => {
                warn!("network fetch failed, trying offline page: {}", e);
                match self.storage.match_in(&self.version, &self.offline_root).await {
                    Some(fallback) => Ok(FetchOutcome {
                        response: fallback,
                        source: ResponseSource::OfflineFallback,
                    }),
                    None => Err(e),
                }
            }
        }
    }
}
