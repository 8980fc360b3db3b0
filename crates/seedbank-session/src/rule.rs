//! Match rules applied to engine events.
//!
//! A rule matches an event when the kinds are equal and, if the rule carries
//! a message filter, the messages are equal too. Every match bumps the match
//! counter; the side effect only fires while the counter is still below the
//! expiration threshold.

use std::fmt;
use std::net::IpAddr;

use chrono::Utc;
use seedbank_torrent_core::{EngineEvent, event_kind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::ipc::SessionReport;

/// Closed set of rule variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Engine bound its listen socket.
    ListenSucceeded,
    /// Engine failed to bind.
    ListenFailed,
    /// A torrent finished downloading.
    TorrentFinished,
    /// A peer connected to us.
    IncomingConnection,
    /// We connected to a peer.
    PeerConnect,
    /// A peer went away.
    PeerDisconnected,
    /// Storage error on a torrent file.
    FileError,
    /// Torrent level error.
    TorrentError,
    /// Tracker announce failed.
    TrackerError,
    /// Periodic per-torrent statistics.
    Stats,
    /// Record store plugin notice.
    StorePlugin,
    /// Statistics forwarded to the supervisor.
    StatsPublisher,
}

impl RuleKind {
    /// Engine event kind matched by this variant.
    #[must_use]
    pub const fn event_kind(self) -> &'static str {
        match self {
            Self::ListenSucceeded => event_kind::LISTEN_SUCCEEDED,
            Self::ListenFailed => event_kind::LISTEN_FAILED,
            Self::TorrentFinished => event_kind::TORRENT_FINISHED,
            Self::IncomingConnection => event_kind::INCOMING_CONNECTION,
            Self::PeerConnect => event_kind::PEER_CONNECT,
            Self::PeerDisconnected => event_kind::PEER_DISCONNECTED,
            Self::FileError => event_kind::FILE_ERROR,
            Self::TorrentError => event_kind::TORRENT_ERROR,
            Self::TrackerError => event_kind::TRACKER_ERROR,
            Self::Stats | Self::StatsPublisher => event_kind::STATS,
            Self::StorePlugin => event_kind::STORE_PLUGIN,
        }
    }
}

const fn default_expires_after() -> u32 {
    1
}

/// Serializable rule definition; travels inside worker parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Unique name within one watcher.
    pub name: String,
    /// Variant.
    pub kind: RuleKind,
    /// Exact message filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Matches before the rule expires; `0` never expires.
    #[serde(default = "default_expires_after")]
    pub expires_after: u32,
    /// Log each live match.
    #[serde(default)]
    pub log_on_match: bool,
}

impl RuleSpec {
    /// Rule expiring after its first match, without message filter.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: RuleKind) -> Self {
        Self {
            name: name.into(),
            kind,
            message: None,
            expires_after: default_expires_after(),
            log_on_match: false,
        }
    }

    /// Require an exact message.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set the expiration threshold.
    #[must_use]
    pub const fn expires_after(mut self, count: u32) -> Self {
        self.expires_after = count;
        self
    }

    /// Toggle logging on match.
    #[must_use]
    pub const fn log_on_match(mut self, enabled: bool) -> Self {
        self.log_on_match = enabled;
        self
    }
}

/// Side effect requested by a live match.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleEffect {
    /// Write a line to the log.
    Log(String),
    /// Send a report to the supervisor.
    Forward(SessionReport),
}

/// Result of offering one event to a rule.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MatchOutcome {
    /// Whether the event matched.
    pub matched: bool,
    /// Side effect to apply, if the rule was live.
    pub effect: Option<RuleEffect>,
}

/// A rule together with its match counter.
#[derive(Debug, Clone)]
pub struct MatchRule {
    spec: RuleSpec,
    match_count: u32,
}

impl MatchRule {
    /// Fresh rule with a zero match count.
    #[must_use]
    pub const fn new(spec: RuleSpec) -> Self {
        Self {
            spec,
            match_count: 0,
        }
    }

    /// Rule name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Rule definition.
    #[must_use]
    pub const fn spec(&self) -> &RuleSpec {
        &self.spec
    }

    /// Matches observed so far.
    #[must_use]
    pub const fn match_count(&self) -> u32 {
        self.match_count
    }

    /// Whether the rule reached its threshold.
    #[must_use]
    pub const fn is_expired(&self) -> bool {
        self.spec.expires_after > 0 && self.match_count >= self.spec.expires_after
    }

    /// Whether `event` satisfies the filters.
    #[must_use]
    pub fn matches(&self, event: &EngineEvent) -> bool {
        event.kind == self.spec.kind.event_kind()
            && self
                .spec
                .message
                .as_deref()
                .is_none_or(|expected| expected == event.message)
    }

    /// Offer an event; counts the match and yields the side effect when live.
    pub fn observe(&mut self, event: &EngineEvent) -> MatchOutcome {
        if !self.matches(event) {
            return MatchOutcome::default();
        }
        let effect = if self.is_expired() {
            None
        } else {
            self.effect(event)
        };
        self.match_count = self.match_count.saturating_add(1);
        MatchOutcome {
            matched: true,
            effect,
        }
    }

    fn effect(&self, event: &EngineEvent) -> Option<RuleEffect> {
        if self.spec.kind == RuleKind::StatsPublisher {
            return Some(RuleEffect::Forward(SessionReport::TorrentStats(
                stats_document(event),
            )));
        }
        self.spec
            .log_on_match
            .then(|| RuleEffect::Log(self.describe(event)))
    }

    fn describe(&self, event: &EngineEvent) -> String {
        match self.spec.kind {
            RuleKind::Stats => {
                let hash = event
                    .content_hash
                    .as_ref()
                    .map_or_else(String::new, ToString::to_string);
                format!("({}) {hash} {}", event.kind, event.message)
            }
            RuleKind::TrackerError => format!(
                "({}) {} {}",
                event.kind,
                event.message,
                event.field_str("error").unwrap_or_default()
            ),
            _ => format!("({}) {}", event.kind, event.message),
        }
    }
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MatchRule: {}: {}",
            self.spec.kind.event_kind(),
            self.spec.message.as_deref().unwrap_or("")
        )
    }
}

fn stats_document(event: &EngineEvent) -> Value {
    let mut document = Map::new();
    document.insert(
        "info_hash".to_string(),
        event
            .content_hash
            .as_ref()
            .map_or(Value::Null, |hash| Value::String(hash.to_string())),
    );
    document.insert(
        "name".to_string(),
        event.field("torrent_name").cloned().unwrap_or(Value::Null),
    );
    for key in ["interval", "transferred", "peers"] {
        document.insert(
            key.to_string(),
            event.field(key).cloned().unwrap_or_else(|| json!(null)),
        );
    }
    document.insert("timestamp".to_string(), Value::String(Utc::now().to_rfc3339()));
    Value::Object(document)
}

/// Message filter templates mirroring the engine's event texts.
pub mod templates {
    use super::IpAddr;

    /// Transport names indexed by the engine's socket type code.
    pub const SOCKET_TYPES: [&str; 10] = [
        "null",
        "TCP",
        "Socks5/TCP",
        "HTTP",
        "uTP",
        "i2p",
        "SSL/TCP",
        "SSL/Socks5",
        "HTTPS",
        "SSL/uTP",
    ];

    /// `successfully listening on ip:port`
    #[must_use]
    pub fn listen_succeeded(ip: IpAddr, port: u16) -> String {
        format!("successfully listening on {ip}:{port}")
    }

    /// `<name> torrent finished downloading`
    #[must_use]
    pub fn torrent_finished(torrent: &str) -> String {
        format!("{torrent} torrent finished downloading")
    }

    /// `incoming connection from ip:port (transport)`; `None` for an unknown
    /// socket type code.
    #[must_use]
    pub fn incoming_connection(ip: IpAddr, port: u16, socket_type: usize) -> Option<String> {
        SOCKET_TYPES
            .get(socket_type)
            .map(|transport| format!("incoming connection from {ip}:{port} ({transport})"))
    }

    fn peer_prefix(torrent: Option<&str>) -> String {
        torrent.map_or_else(|| " - ".to_string(), str::to_string)
    }

    /// Peer connect message; the client defaults to `Unknown`.
    #[must_use]
    pub fn peer_connect(ip: IpAddr, client: Option<&str>, torrent: Option<&str>) -> String {
        format!(
            "{} peer ({ip}, {}) connecting to peer",
            peer_prefix(torrent),
            client.unwrap_or("Unknown")
        )
    }

    /// Peer disconnect message; the client defaults to `Unknown`.
    #[must_use]
    pub fn peer_disconnected(
        ip: IpAddr,
        client: Option<&str>,
        reason: &str,
        torrent: Option<&str>,
    ) -> String {
        format!(
            "{} peer ({ip}, {}) disconnecting: {reason}",
            peer_prefix(torrent),
            client.unwrap_or("Unknown")
        )
    }

    /// File error message; the error defaults to a missing file.
    #[must_use]
    pub fn file_error(filename: &str, filepath: &str, error: Option<&str>) -> String {
        format!(
            "{filename} file ({filepath}) error: {}",
            error.unwrap_or("No such file or directory")
        )
    }

    /// `<name> ERROR: <error>`
    #[must_use]
    pub fn torrent_error(torrent: &str, error: &str) -> String {
        format!("{torrent} ERROR: {error}")
    }

    /// `(<code>) <message>`
    #[must_use]
    pub fn store_plugin(code: i32, message: &str) -> String {
        format!("({code}) {message}")
    }
}
