//! Durable storage for imported episodes.
//!
//! Every operation is its own transaction against a single table: an added
//! episode is either fully visible to later reads or not visible at all, and
//! identifiers are handed out once and never reused, even after the episode
//! they named has been deleted.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

pub type EpisodeId = u64;

pub const UNTITLED: &str = "Untitled";
pub const UNKNOWN_AUTHOR: &str = "Unknown";

/// Binary audio payload plus its MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl Payload {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// An episode about to be committed.  The store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEpisode {
    pub title: String,
    pub author: String,
    pub payload: Payload,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Episode {
    pub id: EpisodeId,
    pub title: String,
    pub author: String,
    pub payload: Payload,
    pub created: DateTime<Utc>,
}

impl Episode {
    fn from_new(id: EpisodeId, new: NewEpisode) -> Self {
        Self {
            id,
            title: new.title,
            author: new.author,
            payload: new.payload,
            created: new.created,
        }
    }

    /// "Playing: <title> - <author>", the label the UI shows during playback.
    pub fn now_playing_label(&self) -> String {
        format!("Playing: {} - {}", self.title, self.author)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("quota exceeded: {requested} bytes requested, {available} bytes available")]
    QuotaExceeded { requested: u64, available: u64 },
    #[error("transaction aborted: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt episode record {path:?}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Add / list / get / delete over a single episodes table.
#[async_trait]
pub trait EpisodeStore: Send + Sync {
    async fn add(&self, episode: NewEpisode) -> Result<EpisodeId, StorageError>;

    /// All episodes in id order.
    async fn list(&self) -> Result<Vec<Episode>, StorageError>;

    async fn get(&self, id: EpisodeId) -> Result<Option<Episode>, StorageError>;

    /// Deleting an id that does not exist succeeds.
    async fn delete(&self, id: EpisodeId) -> Result<(), StorageError>;
}

fn check_quota(quota: Option<u64>, used: u64, requested: u64) -> Result<(), StorageError> {
    match quota {
        Some(limit) if used.saturating_add(requested) > limit => Err(StorageError::QuotaExceeded {
            requested,
            available: limit.saturating_sub(used),
        }),
        _ => Ok(()),
    }
}

// ── In-memory backend ─────────────────────────────────────────────────────────

struct MemoryTable {
    next_id: EpisodeId,
    episodes: BTreeMap<EpisodeId, Episode>,
    used_bytes: u64,
}

/// Process-local store.  Useful for tests and for hosts with no disk.
pub struct MemoryEpisodeStore {
    table: RwLock<MemoryTable>,
    quota_bytes: Option<u64>,
}

impl MemoryEpisodeStore {
    pub fn new() -> Self {
        Self::with_quota(None)
    }

    pub fn with_quota(quota_bytes: Option<u64>) -> Self {
        Self {
            table: RwLock::new(MemoryTable {
                next_id: 1,
                episodes: BTreeMap::new(),
                used_bytes: 0,
            }),
            quota_bytes,
        }
    }
}

impl Default for MemoryEpisodeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EpisodeStore for MemoryEpisodeStore {
    async fn add(&self, episode: NewEpisode) -> Result<EpisodeId, StorageError> {
        let mut table = self.table.write().await;
        let size = episode.payload.len();
        check_quota(self.quota_bytes, table.used_bytes, size)?;

        let id = table.next_id;
        table.next_id += 1;
        table.used_bytes += size;
        table.episodes.insert(id, Episode::from_new(id, episode));
        debug!("episode {} stored in memory ({} bytes)", id, size);
        Ok(id)
    }

    async fn list(&self) -> Result<Vec<Episode>, StorageError> {
        Ok(self.table.read().await.episodes.values().cloned().collect())
    }

    async fn get(&self, id: EpisodeId) -> Result<Option<Episode>, StorageError> {
        Ok(self.table.read().await.episodes.get(&id).cloned())
    }

    async fn delete(&self, id: EpisodeId) -> Result<(), StorageError> {
        let mut table = self.table.write().await;
        if let Some(removed) = table.episodes.remove(&id) {
            table.used_bytes -= removed.payload.len();
        }
        Ok(())
    }
}

// ── Directory backend ─────────────────────────────────────────────────────────

/// Metadata document for one episode.  Its presence on disk is what makes the
/// episode visible; the payload file is written first.
#[derive(Debug, Serialize, Deserialize)]
struct EpisodeRecord {
    id: EpisodeId,
    title: String,
    author: String,
    mime_type: String,
    size: u64,
    created: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Counter {
    next_id: EpisodeId,
}

/// Durable store rooted at a directory:
///
/// ```text
/// <root>/counter.json        next id to hand out
/// <root>/episodes/<id>.bin   payload bytes
/// <root>/episodes/<id>.json  metadata (commit point)
/// ```
pub struct FsEpisodeStore {
    root: PathBuf,
    quota_bytes: Option<u64>,
    /// Serialises writers.  Readers never take it.
    write_lock: Mutex<()>,
}

impl FsEpisodeStore {
    pub async fn open(root: impl Into<PathBuf>, quota_bytes: Option<u64>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join("episodes")).await?;

        let store = Self {
            root,
            quota_bytes,
            write_lock: Mutex::new(()),
        };
        store.sweep_partial_writes().await?;
        info!("Episode store opened at {:?}", store.root);
        Ok(store)
    }

    fn episodes_dir(&self) -> PathBuf {
        self.root.join("episodes")
    }

    fn counter_path(&self) -> PathBuf {
        self.root.join("counter.json")
    }

    fn record_path(&self, id: EpisodeId) -> PathBuf {
        self.episodes_dir().join(format!("{}.json", id))
    }

    fn payload_path(&self, id: EpisodeId) -> PathBuf {
        self.episodes_dir().join(format!("{}.bin", id))
    }

    /// Remove temp files and payloads whose metadata never got committed.
    async fn sweep_partial_writes(&self) -> Result<(), StorageError> {
        let mut entries = tokio::fs::read_dir(self.episodes_dir()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let orphan = match path.extension().and_then(|e| e.to_str()) {
                Some("tmp") => true,
                Some("bin") => !path.with_extension("json").exists(),
                _ => false,
            };
            if orphan {
                warn!("Removing uncommitted episode file {:?}", path);
                remove_if_exists(&path).await?;
            }
        }
        Ok(())
    }

    async fn read_counter(&self) -> Result<EpisodeId, StorageError> {
        let path = self.counter_path();
        let stored = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let counter: Counter = serde_json::from_slice(&bytes)
                    .map_err(|source| StorageError::Corrupt { path, source })?;
                counter.next_id
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 1,
            Err(e) => return Err(e.into()),
        };
        // Never hand out an id at or below one already on disk
        let highest = self.read_records().await?.last().map(|r| r.id).unwrap_or(0);
        Ok(stored.max(highest + 1))
    }

    async fn read_records(&self) -> Result<Vec<EpisodeRecord>, StorageError> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(self.episodes_dir()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_record(&path).await? {
                Some(record) => records.push(record),
                None => continue,
            }
        }
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn load(&self, record: EpisodeRecord) -> Result<Option<Episode>, StorageError> {
        let data = match tokio::fs::read(self.payload_path(record.id)).await {
            Ok(data) => data,
            // Deleted between reading the record and the payload
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(Episode {
            id: record.id,
            title: record.title,
            author: record.author,
            payload: Payload::new(record.mime_type, data),
            created: record.created,
        }))
    }
}

#[async_trait]
impl EpisodeStore for FsEpisodeStore {
    async fn add(&self, episode: NewEpisode) -> Result<EpisodeId, StorageError> {
        let _guard = self.write_lock.lock().await;

        let size = episode.payload.len();
        let used: u64 = self.read_records().await?.iter().map(|r| r.size).sum();
        check_quota(self.quota_bytes, used, size)?;

        let id = self.read_counter().await?;
        let counter = serde_json::to_vec(&Counter { next_id: id + 1 })
            .map_err(std::io::Error::other)?;
        write_atomic(&self.counter_path(), &counter).await?;

        let record = EpisodeRecord {
            id,
            title: episode.title,
            author: episode.author,
            mime_type: episode.payload.mime_type,
            size,
            created: episode.created,
        };
        let record_bytes = serde_json::to_vec_pretty(&record).map_err(std::io::Error::other)?;

        let payload_path = self.payload_path(id);
        if let Err(e) = write_atomic(&payload_path, &episode.payload.data).await {
            let _ = remove_if_exists(&payload_path).await;
            return Err(e.into());
        }
        if let Err(e) = write_atomic(&self.record_path(id), &record_bytes).await {
            let _ = remove_if_exists(&payload_path).await;
            return Err(e.into());
        }

        info!("Stored episode {} ({} bytes)", id, size);
        Ok(id)
    }

    async fn list(&self) -> Result<Vec<Episode>, StorageError> {
        let mut episodes = Vec::new();
        for record in self.read_records().await? {
            if let Some(episode) = self.load(record).await? {
                episodes.push(episode);
            }
        }
        Ok(episodes)
    }

    async fn get(&self, id: EpisodeId) -> Result<Option<Episode>, StorageError> {
        match read_record(&self.record_path(id)).await? {
            Some(record) => self.load(record).await,
            None => Ok(None),
        }
    }

    async fn delete(&self, id: EpisodeId) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        // Metadata first so the episode disappears atomically for readers
        remove_if_exists(&self.record_path(id)).await?;
        remove_if_exists(&self.payload_path(id)).await?;
        debug!("Deleted episode {}", id);
        Ok(())
    }
}

async fn read_record(path: &Path) -> Result<Option<EpisodeRecord>, StorageError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StorageError::Corrupt {
                path: path.to_path_buf(),
                source,
            }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

// ── Import ────────────────────────────────────────────────────────────────────

/// Read an audio file fully into memory and commit it as a new episode.
///
/// Blank titles and authors become "Untitled" / "Unknown".  The MIME type is
/// guessed from the file extension.
pub async fn import_file(
    store: &dyn EpisodeStore,
    path: &Path,
    title: &str,
    author: &str,
) -> anyhow::Result<EpisodeId> {
    let data = tokio::fs::read(path).await?;
    let mime_type = mime_guess::from_path(path).first_or_octet_stream();

    let title = match title.trim() {
        "" => UNTITLED,
        t => t,
    };
    let author = match author.trim() {
        "" => UNKNOWN_AUTHOR,
        a => a,
    };

    let id = store
        .add(NewEpisode {
            title: title.to_string(),
            author: author.to_string(),
            payload: Payload::new(mime_type.essence_str(), data),
            created: Utc::now(),
        })
        .await?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_episode(title: &str, bytes: usize) -> NewEpisode {
        NewEpisode {
            title: title.to_string(),
            author: "A".to_string(),
            payload: Payload::new("audio/mpeg", vec![7u8; bytes]),
            created: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_add_get_delete_scenario() {
        let store = MemoryEpisodeStore::new();
        let id = store.add(new_episode("Ep1", 10)).await.unwrap();
        assert_eq!(id, 1);

        let ep = store.get(1).await.unwrap().unwrap();
        assert_eq!(ep.payload.data, vec![7u8; 10]);

        store.delete(1).await.unwrap();
        assert!(store.get(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_returns_added_fields() {
        let store = MemoryEpisodeStore::new();
        let first = new_episode("One", 3);
        let second = new_episode("Two", 5);
        store.add(first.clone()).await.unwrap();
        store.add(second.clone()).await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].title, first.title);
        assert_eq!(listed[0].payload, first.payload);
        assert_eq!(listed[0].created, first.created);
        assert_eq!(listed[1].title, second.title);
    }

    #[tokio::test]
    async fn test_delete_twice_leaves_others_alone() {
        let store = MemoryEpisodeStore::new();
        let a = store.add(new_episode("a", 1)).await.unwrap();
        let b = store.add(new_episode("b", 1)).await.unwrap();

        store.delete(a).await.unwrap();
        store.delete(a).await.unwrap();

        let remaining: Vec<_> = store.list().await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(remaining, vec![b]);
    }

    #[tokio::test]
    async fn test_ids_not_reused_after_delete() {
        let store = MemoryEpisodeStore::new();
        let a = store.add(new_episode("a", 1)).await.unwrap();
        store.delete(a).await.unwrap();
        let b = store.add(new_episode("b", 1)).await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_quota_exceeded_is_invisible() {
        let store = MemoryEpisodeStore::with_quota(Some(16));
        store.add(new_episode("fits", 10)).await.unwrap();

        let err = store.add(new_episode("too big", 10)).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::QuotaExceeded { requested: 10, available: 6 }
        ));
        assert_eq!(store.list().await.unwrap().len(), 1);

        // Freed space is reusable
        store.delete(1).await.unwrap();
        store.add(new_episode("fits now", 10)).await.unwrap();
    }

    #[test]
    fn test_now_playing_label() {
        let ep = Episode::from_new(4, new_episode("Ep4", 0));
        assert_eq!(ep.now_playing_label(), "Playing: Ep4 - A");
    }
}
