//! Client side of the podcast app: the durable episode store, playback URLs,
//! the offline asset cache and the background agent that handles fetch,
//! message, push and notification events for the page.

pub mod agent;
pub mod assets;
pub mod core;
pub mod episodes;
pub mod host;
pub mod playback;

pub use crate::agent::BackgroundAgent;
pub use crate::core::{AgentCore, AgentEvent, AgentHandle};
pub use crate::episodes::{EpisodeStore, FsEpisodeStore, MemoryEpisodeStore, StorageError};
