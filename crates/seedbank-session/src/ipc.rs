//! Queue items exchanged between the supervisor and worker processes.
//!
//! Every item is one JSON object per line, `{"type": ..., "value": ...}`,
//! carried on the worker's stdin (inbound) and stdout (outbound). Typed
//! commands and reports convert to and from the generic [`QueueItem`].

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use seedbank_torrent_core::ContentHash;
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{SessionError, SessionResult};

/// Capacity of every queue channel.
pub const QUEUE_CAPACITY: usize = 256;

/// Queue item type discriminants.
pub mod kind {
    /// Stop the worker.
    pub const STOP: &str = "stop";
    /// Toggle verbose logging.
    pub const SET_VERBOSE: &str = "set_verbose";
    /// Pause the worker loop.
    pub const SLEEP: &str = "sleep";
    /// Start serving a torrent.
    pub const ADD_TORRENT: &str = "add_torrent";
    /// Connect a torrent to a peer.
    pub const ADD_PEER: &str = "add_peer";
    /// Pause and resume a torrent.
    pub const BUMP_TORRENT: &str = "bump_torrent";
    /// Stop serving a torrent.
    pub const STOP_TORRENT: &str = "stop_torrent";
    /// Toggle statistics publishing.
    pub const PUBLISH_STATS: &str = "publish_stats";
    /// Periodic torrent count.
    pub const UPDATE: &str = "update";
    /// Server engine is up.
    pub const SERVER_INIT: &str = "server_init";
    /// A tracked torrent completed.
    pub const TORRENT_FINISHED: &str = "torrent_finished";
    /// The event watcher exhausted its rules.
    pub const WATCHER_EXITED: &str = "watcher_exited";
    /// Per-torrent statistics.
    pub const TORRENT_STATS: &str = "torrent_stats";
    /// Aggregate engine statistics.
    pub const SERVER_STATS: &str = "server_stats";
    /// Fatal worker error.
    pub const ERROR: &str = "error";
}

/// Generic queue message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Type discriminant.
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific payload.
    #[serde(default)]
    pub value: Value,
}

impl QueueItem {
    /// Build an item.
    #[must_use]
    pub fn new(kind: impl Into<String>, value: Value) -> Self {
        Self {
            kind: kind.into(),
            value,
        }
    }

    fn with_payload<T: Serialize>(kind: &str, payload: &T) -> SessionResult<Self> {
        serde_json::to_value(payload)
            .map(|value| Self::new(kind, value))
            .map_err(|source| SessionError::InvalidPayload {
                kind: kind.to_string(),
                source,
            })
    }

    fn payload<T: DeserializeOwned>(self) -> SessionResult<T> {
        let Self { kind, value } = self;
        serde_json::from_value(value).map_err(|source| SessionError::InvalidPayload { kind, source })
    }
}

impl fmt::Display for QueueItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueueItem({}: {})", self.kind, self.value)
    }
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD
            .decode(raw.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Payload of `add_torrent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddTorrentParams {
    /// Expected content hash of the descriptor.
    pub content_hash: ContentHash,
    /// Raw descriptor, base64 on the wire.
    #[serde(with = "base64_bytes")]
    pub descriptor: Vec<u8>,
    /// Directory the content is served from.
    pub storage_root: PathBuf,
}

/// Payload of `add_peer`. Both fields are required by the handler but
/// optional on the wire so a missing one is reported precisely.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AddPeerParams {
    /// Torrent to connect.
    #[serde(default)]
    pub content_hash: Option<ContentHash>,
    /// Peer address hint.
    #[serde(default)]
    pub peer: Option<SocketAddr>,
}

/// Payload naming one torrent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentRef {
    /// Content hash.
    pub content_hash: ContentHash,
}

/// Payload of `publish_stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishStatsParams {
    /// Whether statistics should be published.
    pub enable: bool,
}

/// Instruction sent from the supervisor to a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// Stop the worker loop.
    Stop,
    /// Toggle verbose logging.
    SetVerbose(bool),
    /// Block the worker loop.
    Sleep(Duration),
    /// Start serving a torrent.
    AddTorrent(AddTorrentParams),
    /// Connect a torrent to a peer.
    AddPeer(AddPeerParams),
    /// Pause, wait and resume a torrent.
    BumpTorrent(TorrentRef),
    /// Stop serving a torrent.
    StopTorrent(TorrentRef),
    /// Toggle statistics publishing.
    PublishStats(PublishStatsParams),
}

impl SessionCommand {
    /// Type discriminant on the wire.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Stop => kind::STOP,
            Self::SetVerbose(_) => kind::SET_VERBOSE,
            Self::Sleep(_) => kind::SLEEP,
            Self::AddTorrent(_) => kind::ADD_TORRENT,
            Self::AddPeer(_) => kind::ADD_PEER,
            Self::BumpTorrent(_) => kind::BUMP_TORRENT,
            Self::StopTorrent(_) => kind::STOP_TORRENT,
            Self::PublishStats(_) => kind::PUBLISH_STATS,
        }
    }

    /// Encode as a queue item.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidPayload`] if the payload cannot be serialised.
    pub fn to_item(&self) -> SessionResult<QueueItem> {
        let kind = self.kind();
        match self {
            Self::Stop => Ok(QueueItem::new(kind, Value::Bool(true))),
            Self::SetVerbose(verbose) => Ok(QueueItem::new(kind, Value::Bool(*verbose))),
            Self::Sleep(duration) => QueueItem::with_payload(kind, &duration.as_secs_f64()),
            Self::AddTorrent(params) => QueueItem::with_payload(kind, params),
            Self::AddPeer(params) => QueueItem::with_payload(kind, params),
            Self::BumpTorrent(params) | Self::StopTorrent(params) => {
                QueueItem::with_payload(kind, params)
            }
            Self::PublishStats(params) => QueueItem::with_payload(kind, params),
        }
    }

    /// Decode a queue item.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownItem`] for unknown types and
    /// [`SessionError::InvalidPayload`] for malformed values.
    pub fn from_item(item: QueueItem) -> SessionResult<Self> {
        match item.kind.as_str() {
            kind::STOP => Ok(Self::Stop),
            kind::SET_VERBOSE => item.payload().map(Self::SetVerbose),
            kind::SLEEP => {
                let seconds: f64 = item.clone().payload()?;
                Duration::try_from_secs_f64(seconds)
                    .map(Self::Sleep)
                    .map_err(|err| SessionError::InvalidPayload {
                        kind: item.kind,
                        source: serde_json::Error::custom(err),
                    })
            }
            kind::ADD_TORRENT => item.payload().map(Self::AddTorrent),
            kind::ADD_PEER => item.payload().map(Self::AddPeer),
            kind::BUMP_TORRENT => item.payload().map(Self::BumpTorrent),
            kind::STOP_TORRENT => item.payload().map(Self::StopTorrent),
            kind::PUBLISH_STATS => item.payload().map(Self::PublishStats),
            _ => Err(SessionError::UnknownItem { kind: item.kind }),
        }
    }
}

/// Payload of `update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateReport {
    /// Torrents loaded in the worker's engine.
    pub torrent_count: usize,
}

/// Payload of `server_init`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInitReport {
    /// Peer identifier of the server engine.
    pub peer_id: String,
}

/// Payload of `torrent_finished`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentFinishedReport {
    /// Content hash.
    pub content_hash: ContentHash,
    /// Directory the content was written to.
    pub storage_root: PathBuf,
}

/// Payload of `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Coarse error category.
    pub category: String,
    /// Human readable message.
    pub message: String,
}

impl From<&SessionError> for ErrorReport {
    fn from(err: &SessionError) -> Self {
        let mut message = err.to_string();
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self {
            category: err.category().to_string(),
            message,
        }
    }
}

/// Report sent from a worker to the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionReport {
    /// Periodic torrent count.
    Update(UpdateReport),
    /// Server engine is up.
    ServerInit(ServerInitReport),
    /// A tracked torrent completed.
    TorrentFinished(TorrentFinishedReport),
    /// The event watcher exhausted its rules.
    WatcherExited,
    /// Per-torrent statistics document.
    TorrentStats(Value),
    /// Aggregate statistics document.
    ServerStats(Value),
    /// Fatal worker error.
    Error(ErrorReport),
}

impl SessionReport {
    /// Type discriminant on the wire.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Update(_) => kind::UPDATE,
            Self::ServerInit(_) => kind::SERVER_INIT,
            Self::TorrentFinished(_) => kind::TORRENT_FINISHED,
            Self::WatcherExited => kind::WATCHER_EXITED,
            Self::TorrentStats(_) => kind::TORRENT_STATS,
            Self::ServerStats(_) => kind::SERVER_STATS,
            Self::Error(_) => kind::ERROR,
        }
    }

    /// Encode as a queue item.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidPayload`] if the payload cannot be serialised.
    pub fn to_item(&self) -> SessionResult<QueueItem> {
        let kind = self.kind();
        match self {
            Self::Update(report) => QueueItem::with_payload(kind, report),
            Self::ServerInit(report) => QueueItem::with_payload(kind, report),
            Self::TorrentFinished(report) => QueueItem::with_payload(kind, report),
            Self::WatcherExited => Ok(QueueItem::new(kind, Value::Bool(true))),
            Self::TorrentStats(stats) | Self::ServerStats(stats) => {
                Ok(QueueItem::new(kind, stats.clone()))
            }
            Self::Error(report) => QueueItem::with_payload(kind, report),
        }
    }

    /// Decode a queue item.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownItem`] for unknown types and
    /// [`SessionError::InvalidPayload`] for malformed values.
    pub fn from_item(item: QueueItem) -> SessionResult<Self> {
        match item.kind.as_str() {
            kind::UPDATE => item.payload().map(Self::Update),
            kind::SERVER_INIT => item.payload().map(Self::ServerInit),
            kind::TORRENT_FINISHED => item.payload().map(Self::TorrentFinished),
            kind::WATCHER_EXITED => Ok(Self::WatcherExited),
            kind::TORRENT_STATS => Ok(Self::TorrentStats(item.value)),
            kind::SERVER_STATS => Ok(Self::ServerStats(item.value)),
            kind::ERROR => item.payload().map(Self::Error),
            _ => Err(SessionError::UnknownItem { kind: item.kind }),
        }
    }
}

/// Bridge a byte stream of JSON lines into a bounded channel.
///
/// Malformed lines are logged and skipped. The channel closes when the stream
/// ends or the receiver is dropped.
pub fn spawn_line_reader<R>(reader: R, channel: &'static str) -> mpsc::Receiver<QueueItem>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<QueueItem>(&line) {
                        Ok(item) => {
                            if tx.send(item).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            warn!(channel, error = %err, "discarding malformed queue line");
                        }
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(channel, error = %err, "queue read failed");
                    break;
                }
            }
        }
        debug!(channel, "queue reader finished");
    });
    rx
}

/// Bridge a bounded channel into a byte stream of JSON lines.
///
/// The returned handle completes once every sender is dropped and all queued
/// items have been flushed, or when a write fails.
pub fn spawn_line_writer<W>(
    mut writer: W,
    channel: &'static str,
) -> (mpsc::Sender<QueueItem>, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<QueueItem>(QUEUE_CAPACITY);
    let handle = tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            let mut line = match serde_json::to_vec(&item) {
                Ok(line) => line,
                Err(err) => {
                    warn!(channel, error = %err, kind = %item.kind, "dropping unencodable queue item");
                    continue;
                }
            };
            line.push(b'\n');
            if let Err(err) = writer.write_all(&line).await {
                warn!(channel, error = %err, "queue write failed");
                break;
            }
            if let Err(err) = writer.flush().await {
                warn!(channel, error = %err, "queue flush failed");
                break;
            }
        }
        debug!(channel, "queue writer finished");
    });
    (tx, handle)
}
