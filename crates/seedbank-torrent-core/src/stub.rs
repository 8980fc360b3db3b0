//! In-memory transfer engine.
//!
//! Keeps torrent state in a map and queues the events a real engine would
//! raise. Tests drive it through the inherent helpers (`set_progress`,
//! `set_idle`, `push_event`).

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::Value;

use crate::engine::TransferEngine;
use crate::hash::ContentHash;
use crate::model::{
    AddTorrent, EngineEvent, EngineSettings, EventMask, SessionStatus, TorrentStatus, event_kind,
};

/// Peer identifier reported unless overridden.
pub const DEFAULT_PEER_ID: &str = "-SB0100-000000000000";

/// In-memory engine used by default and as a test double.
pub struct StubEngine {
    peer_id: String,
    state: Mutex<StubState>,
}

#[derive(Default)]
struct StubState {
    settings: Option<EngineSettings>,
    torrents: BTreeMap<ContentHash, StubTorrent>,
    pending_events: VecDeque<EngineEvent>,
    mask: EventMask,
    extensions: Vec<String>,
}

struct StubTorrent {
    name: String,
    save_path: PathBuf,
    progress: f64,
    paused: bool,
    seconds_since_download: u64,
    seconds_since_upload: u64,
    peers: Vec<SocketAddr>,
}

impl StubTorrent {
    fn status(&self, content_hash: &ContentHash) -> TorrentStatus {
        TorrentStatus {
            content_hash: content_hash.clone(),
            name: self.name.clone(),
            save_path: self.save_path.clone(),
            progress: self.progress,
            paused: self.paused,
            seconds_since_download: self.seconds_since_download,
            seconds_since_upload: self.seconds_since_upload,
            num_peers: u32::try_from(self.peers.len()).unwrap_or(u32::MAX),
        }
    }
}

impl StubState {
    fn torrent_mut(&mut self, content_hash: &ContentHash) -> Result<&mut StubTorrent> {
        self.torrents
            .get_mut(content_hash)
            .ok_or_else(|| anyhow!("unknown torrent {content_hash}"))
    }

    fn push(&mut self, event: EngineEvent) {
        self.pending_events.push_back(event);
    }
}

impl StubEngine {
    /// Engine reporting [`DEFAULT_PEER_ID`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_peer_id(DEFAULT_PEER_ID)
    }

    /// Engine reporting `peer_id`.
    #[must_use]
    pub fn with_peer_id(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            state: Mutex::new(StubState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an event for the next drain.
    pub fn push_event(&self, event: EngineEvent) {
        self.state().push(event);
    }

    /// Set a torrent's completion fraction. Reaching `1.0` queues a
    /// finished event. Returns `false` when the torrent is unknown.
    pub fn set_progress(&self, content_hash: &ContentHash, progress: f64) -> bool {
        let mut state = self.state();
        let Some(torrent) = state.torrents.get_mut(content_hash) else {
            return false;
        };
        let was_complete = torrent.progress >= 1.0;
        torrent.progress = progress.clamp(0.0, 1.0);
        if !was_complete && torrent.progress >= 1.0 {
            let name = torrent.name.clone();
            state.push(
                EngineEvent::new(event_kind::TORRENT_FINISHED, format!("{name} torrent finished downloading"))
                    .with_hash(content_hash.clone())
                    .with_field("torrent_name", name),
            );
        }
        true
    }

    /// Set how long a torrent has been idle in each direction. Returns
    /// `false` when the torrent is unknown.
    pub fn set_idle(&self, content_hash: &ContentHash, since_download: u64, since_upload: u64) -> bool {
        let mut state = self.state();
        let Some(torrent) = state.torrents.get_mut(content_hash) else {
            return false;
        };
        torrent.seconds_since_download = since_download;
        torrent.seconds_since_upload = since_upload;
        true
    }

    /// Whether a torrent is loaded.
    #[must_use]
    pub fn contains(&self, content_hash: &ContentHash) -> bool {
        self.state().torrents.contains_key(content_hash)
    }

    /// Paused flag of a loaded torrent.
    #[must_use]
    pub fn is_paused(&self, content_hash: &ContentHash) -> Option<bool> {
        self.state()
            .torrents
            .get(content_hash)
            .map(|torrent| torrent.paused)
    }

    /// Peers a torrent was asked to connect to.
    #[must_use]
    pub fn peers(&self, content_hash: &ContentHash) -> Vec<SocketAddr> {
        self.state()
            .torrents
            .get(content_hash)
            .map(|torrent| torrent.peers.clone())
            .unwrap_or_default()
    }

    /// Current event mask.
    #[must_use]
    pub fn event_mask(&self) -> EventMask {
        self.state().mask
    }

    /// Extensions loaded so far, in load order.
    #[must_use]
    pub fn extensions(&self) -> Vec<String> {
        self.state().extensions.clone()
    }

    /// Settings applied by `start`, if started.
    #[must_use]
    pub fn settings(&self) -> Option<EngineSettings> {
        self.state().settings.clone()
    }
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransferEngine for StubEngine {
    async fn start(&self, settings: &EngineSettings) -> Result<()> {
        if settings.listen_port_min > settings.listen_port_max {
            let message = format!(
                "listening on {}:{} failed: invalid port range",
                settings.listen_interface, settings.listen_port_min
            );
            self.state()
                .push(EngineEvent::new(event_kind::LISTEN_FAILED, message));
            bail!(
                "invalid listen port range {}-{}",
                settings.listen_port_min,
                settings.listen_port_max
            );
        }
        let mut state = self.state();
        state.settings = Some(settings.clone());
        state.push(
            EngineEvent::new(
                event_kind::LISTEN_SUCCEEDED,
                format!(
                    "successfully listening on {}:{}",
                    settings.listen_interface, settings.listen_port_min
                ),
            )
            .with_field("ip", settings.listen_interface.to_string())
            .with_field("port", settings.listen_port_min),
        );
        Ok(())
    }

    async fn peer_id(&self) -> Result<String> {
        Ok(self.peer_id.clone())
    }

    async fn pop_next_event(&self) -> Result<Option<EngineEvent>> {
        Ok(self.state().pending_events.pop_front())
    }

    async fn add_torrent(&self, request: AddTorrent) -> Result<()> {
        let content_hash = request.descriptor.hash().clone();
        let mut state = self.state();
        if state.torrents.contains_key(&content_hash) {
            bail!("torrent {content_hash} already loaded");
        }
        let name = request.descriptor.name().to_string();
        state.torrents.insert(
            content_hash.clone(),
            StubTorrent {
                name: name.clone(),
                save_path: request.save_path,
                progress: 0.0,
                paused: false,
                seconds_since_download: 0,
                seconds_since_upload: 0,
                peers: Vec::new(),
            },
        );
        state.push(
            EngineEvent::new(event_kind::TORRENT_ADDED, format!("{name} added"))
                .with_hash(content_hash),
        );
        Ok(())
    }

    async fn remove_torrent(&self, content_hash: &ContentHash) -> Result<()> {
        let mut state = self.state();
        let torrent = state
            .torrents
            .remove(content_hash)
            .ok_or_else(|| anyhow!("unknown torrent {content_hash}"))?;
        state.push(
            EngineEvent::new(event_kind::TORRENT_REMOVED, format!("{} removed", torrent.name))
                .with_hash(content_hash.clone()),
        );
        Ok(())
    }

    async fn torrents(&self) -> Result<Vec<TorrentStatus>> {
        Ok(self
            .state()
            .torrents
            .iter()
            .map(|(hash, torrent)| torrent.status(hash))
            .collect())
    }

    async fn session_status(&self) -> Result<SessionStatus> {
        let state = self.state();
        let num_peers = state
            .torrents
            .values()
            .map(|torrent| u32::try_from(torrent.peers.len()).unwrap_or(u32::MAX))
            .sum();
        Ok(SessionStatus {
            num_torrents: state.torrents.len(),
            num_peers,
            ..SessionStatus::default()
        })
    }

    async fn connect_peer(&self, content_hash: &ContentHash, peer: SocketAddr) -> Result<()> {
        let mut state = self.state();
        let torrent = state.torrent_mut(content_hash)?;
        if !torrent.peers.contains(&peer) {
            torrent.peers.push(peer);
        }
        state.push(
            EngineEvent::new(event_kind::PEER_CONNECT, format!("connecting to peer {peer}"))
                .with_hash(content_hash.clone())
                .with_field("ip", peer.to_string()),
        );
        Ok(())
    }

    async fn pause_torrent(&self, content_hash: &ContentHash) -> Result<()> {
        let mut state = self.state();
        state.torrent_mut(content_hash)?.paused = true;
        state.push(
            EngineEvent::new(event_kind::TORRENT_PAUSED, "torrent paused")
                .with_hash(content_hash.clone()),
        );
        Ok(())
    }

    async fn resume_torrent(&self, content_hash: &ContentHash) -> Result<()> {
        let mut state = self.state();
        state.torrent_mut(content_hash)?.paused = false;
        state.push(
            EngineEvent::new(event_kind::TORRENT_RESUMED, "torrent resumed")
                .with_hash(content_hash.clone()),
        );
        Ok(())
    }

    async fn set_event_mask(&self, mask: EventMask) -> Result<()> {
        self.state().mask = mask;
        Ok(())
    }

    async fn add_extension(&self, name: &str, params: Value) -> Result<()> {
        let _ = params;
        let mut state = self.state();
        if state.extensions.iter().any(|loaded| loaded == name) {
            bail!("extension {name} already loaded");
        }
        state.extensions.push(name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorBuilder;
    use crate::model::EngineProfile;
    use std::net::{IpAddr, Ipv4Addr};

    fn settings(min: u16, max: u16) -> EngineSettings {
        EngineSettings {
            listen_interface: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port_min: min,
            listen_port_max: max,
            profile: EngineProfile::Client,
        }
    }

    async fn drain(engine: &StubEngine) -> Result<Vec<EngineEvent>> {
        let mut events = Vec::new();
        while let Some(event) = engine.pop_next_event().await? {
            events.push(event);
        }
        Ok(events)
    }

    #[tokio::test]
    async fn start_reports_listen_success() -> Result<()> {
        let engine = StubEngine::new();
        engine.start(&settings(6882, 6900)).await?;
        let events = drain(&engine).await?;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, event_kind::LISTEN_SUCCEEDED);
        assert_eq!(events[0].message, "successfully listening on 0.0.0.0:6882");
        assert!(engine.settings().is_some());
        Ok(())
    }

    #[tokio::test]
    async fn start_rejects_inverted_port_range() -> Result<()> {
        let engine = StubEngine::new();
        assert!(engine.start(&settings(7000, 6000)).await.is_err());
        let events = drain(&engine).await?;
        assert_eq!(events[0].kind, event_kind::LISTEN_FAILED);
        Ok(())
    }

    #[tokio::test]
    async fn torrent_lifecycle_tracks_progress_and_pause() -> Result<()> {
        let engine = StubEngine::new();
        let descriptor = DescriptorBuilder::new("content").length(64).build()?;
        let hash = descriptor.hash().clone();
        engine
            .add_torrent(AddTorrent {
                descriptor: descriptor.clone(),
                save_path: PathBuf::from("/data"),
            })
            .await?;
        assert!(
            engine
                .add_torrent(AddTorrent {
                    descriptor,
                    save_path: PathBuf::from("/data"),
                })
                .await
                .is_err()
        );

        assert!(engine.set_progress(&hash, 1.0));
        let events = drain(&engine).await?;
        assert!(events.iter().any(|event| event.kind == event_kind::TORRENT_FINISHED));

        engine.pause_torrent(&hash).await?;
        assert_eq!(engine.is_paused(&hash), Some(true));
        let status = engine.torrent(&hash).await?;
        assert!(status.is_some_and(|status| status.is_complete() && status.paused));

        engine.remove_torrent(&hash).await?;
        assert!(!engine.contains(&hash));
        assert!(engine.remove_torrent(&hash).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn extensions_load_once() -> Result<()> {
        let engine = StubEngine::new();
        engine.add_extension("smart_ban", Value::Null).await?;
        assert!(engine.add_extension("smart_ban", Value::Null).await.is_err());
        assert_eq!(engine.extensions(), vec!["smart_ban".to_string()]);
        Ok(())
    }
}
