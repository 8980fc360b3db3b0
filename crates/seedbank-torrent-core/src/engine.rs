//! The transfer engine capability consumed by worker sessions.

use std::net::SocketAddr;

use anyhow::bail;
use async_trait::async_trait;
use serde_json::Value;

use crate::hash::ContentHash;
use crate::model::{AddTorrent, EngineEvent, EngineSettings, EventMask, SessionStatus, TorrentStatus};

/// Peer-to-peer transfer engine driven by one worker process.
///
/// Implementations are internally synchronised; every method takes `&self`
/// so the engine can be shared between the worker loop and a spawned event
/// watcher.
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Apply settings and begin listening.
    async fn start(&self, settings: &EngineSettings) -> anyhow::Result<()>;

    /// Peer identifier presented to the swarm.
    async fn peer_id(&self) -> anyhow::Result<String>;

    /// Pop the next pending event, if any.
    async fn pop_next_event(&self) -> anyhow::Result<Option<EngineEvent>>;

    /// Admit a torrent.
    async fn add_torrent(&self, request: AddTorrent) -> anyhow::Result<()>;

    /// Remove a torrent, keeping its data on disk.
    async fn remove_torrent(&self, content_hash: &ContentHash) -> anyhow::Result<()>;

    /// Status of every loaded torrent.
    async fn torrents(&self) -> anyhow::Result<Vec<TorrentStatus>>;

    /// Status of one torrent, if loaded.
    async fn torrent(&self, content_hash: &ContentHash) -> anyhow::Result<Option<TorrentStatus>> {
        Ok(self
            .torrents()
            .await?
            .into_iter()
            .find(|status| &status.content_hash == content_hash))
    }

    /// Aggregate counters.
    async fn session_status(&self) -> anyhow::Result<SessionStatus>;

    /// Connect a torrent to a specific peer.
    async fn connect_peer(&self, content_hash: &ContentHash, peer: SocketAddr) -> anyhow::Result<()> {
        let _ = (content_hash, peer);
        bail!("peer connections not supported by this engine");
    }

    /// Pause a torrent; default implementation reports lack of support.
    async fn pause_torrent(&self, content_hash: &ContentHash) -> anyhow::Result<()> {
        let _ = content_hash;
        bail!("pause operation not supported by this engine");
    }

    /// Resume a torrent; default implementation reports lack of support.
    async fn resume_torrent(&self, content_hash: &ContentHash) -> anyhow::Result<()> {
        let _ = content_hash;
        bail!("resume operation not supported by this engine");
    }

    /// Select which events are reported.
    async fn set_event_mask(&self, mask: EventMask) -> anyhow::Result<()> {
        let _ = mask;
        bail!("event masks not supported by this engine");
    }

    /// Load a named engine extension.
    async fn add_extension(&self, name: &str, params: Value) -> anyhow::Result<()> {
        let _ = params;
        bail!("extension {name} not supported by this engine");
    }
}
