//! Worker parameters derived from configuration.
//!
//! The supervisor serialises [`WorkerParams`] onto the worker command line;
//! the worker decodes them before building its engine.

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use seedbank_config::SeedbankConfig;
use serde::{Deserialize, Serialize};

use crate::activity::ActivitySettings;
use crate::error::{SessionError, SessionResult};
use crate::rule::{RuleKind, RuleSpec};

/// Name of the rule forwarding torrent statistics.
pub const STATS_PUBLISHER_RULE: &str = "torrent_stats_publisher";

/// Role of a worker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRole {
    /// Long-lived seeding engine.
    Server,
    /// Short-lived upload receiver.
    Client,
}

impl SessionRole {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a caller asks of the supervisor when creating a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRequest {
    /// Role of the new worker.
    pub role: SessionRole,
    /// Worker loop period.
    pub tick_interval: Duration,
}

impl SessionRequest {
    /// Request for a server session.
    #[must_use]
    pub const fn server(tick_interval: Duration) -> Self {
        Self {
            role: SessionRole::Server,
            tick_interval,
        }
    }

    /// Request for a client session.
    #[must_use]
    pub const fn client(tick_interval: Duration) -> Self {
        Self {
            role: SessionRole::Client,
            tick_interval,
        }
    }
}

/// Parameters of the record store plugin loaded by the server engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorePluginParams {
    /// Store root directory.
    pub root: PathBuf,
    /// Namespace of torrent records.
    pub namespace: String,
    /// Directory holding seeded descriptors.
    pub torrent_file_root: PathBuf,
}

/// Everything a worker process needs to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerParams {
    /// Session key.
    pub key: String,
    /// Worker role.
    pub role: SessionRole,
    /// Verbose logging.
    #[serde(default)]
    pub verbose: bool,
    /// Worker loop period in milliseconds.
    pub tick_interval_ms: u64,
    /// Interface the engine listens on.
    pub listen_interface: IpAddr,
    /// Lowest listen port.
    pub listen_min: u16,
    /// Highest listen port.
    pub listen_max: u16,
    /// Watcher iteration cap; `0` runs until stopped.
    #[serde(default)]
    pub watcher_loop_limit: u32,
    /// Stop the worker once its watcher exits.
    #[serde(default)]
    pub stop_on_watcher_exit: bool,
    /// Initial watcher rules.
    #[serde(default)]
    pub watcher_rules: Vec<RuleSpec>,
    /// Idle timeout of the activity manager.
    #[serde(default)]
    pub inactive_torrent_timeout_secs: Option<u64>,
    /// Scan period of the activity manager.
    #[serde(default)]
    pub torrent_manager_exec_interval_secs: Option<u64>,
    /// Store plugin, required by the server role.
    #[serde(default)]
    pub store_plugin: Option<StorePluginParams>,
}

impl WorkerParams {
    /// Derive the parameters of a session from configuration.
    ///
    /// Servers listen on the main port only and load the store plugin;
    /// clients use the upload port range and the upload idle timeout.
    #[must_use]
    pub fn derive(
        key: impl Into<String>,
        request: SessionRequest,
        config: &SeedbankConfig,
        verbose: bool,
    ) -> Self {
        let tick_interval_ms = u64::try_from(request.tick_interval.as_millis()).unwrap_or(u64::MAX);
        let mut params = Self {
            key: key.into(),
            role: request.role,
            verbose,
            tick_interval_ms,
            listen_interface: config.main.listen_address,
            listen_min: config.main.listen_port,
            listen_max: config.main.listen_port,
            watcher_loop_limit: 0,
            stop_on_watcher_exit: false,
            watcher_rules: client_rules(verbose),
            inactive_torrent_timeout_secs: Some(config.main.inactive_torrent_timeout),
            torrent_manager_exec_interval_secs: Some(config.main.torrent_manager_exec_interval),
            store_plugin: None,
        };
        match request.role {
            SessionRole::Server => {
                params.watcher_rules = server_rules(verbose);
                params.store_plugin = Some(StorePluginParams {
                    root: config.store.root.clone(),
                    namespace: config.store.namespace.clone(),
                    torrent_file_root: config.main.torrent_file_root.clone(),
                });
            }
            SessionRole::Client => {
                params.listen_min = config.upload.upload_port_min;
                params.listen_max = config.upload.upload_port_max;
                params.inactive_torrent_timeout_secs = Some(config.upload.torrent_timeout);
            }
        }
        params
    }

    /// Worker loop period.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Activity manager settings, when both its interval and timeout are set.
    #[must_use]
    pub fn activity_settings(&self) -> Option<ActivitySettings> {
        let exec_interval = self.torrent_manager_exec_interval_secs.filter(|secs| *secs > 0)?;
        let inactive_timeout = self.inactive_torrent_timeout_secs.filter(|secs| *secs > 0)?;
        Some(ActivitySettings {
            exec_interval: Duration::from_secs(exec_interval),
            tick_interval: self.tick_interval(),
            inactive_timeout: Duration::from_secs(inactive_timeout),
        })
    }

    /// Encode for the worker command line.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Params`] if serialisation fails.
    pub fn to_json(&self) -> SessionResult<String> {
        serde_json::to_string(self).map_err(|source| SessionError::Params { source })
    }

    /// Decode from the worker command line.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Params`] for malformed input.
    pub fn from_json(raw: &str) -> SessionResult<Self> {
        serde_json::from_str(raw).map_err(|source| SessionError::Params { source })
    }
}

fn logged(name: &str, kind: RuleKind) -> RuleSpec {
    RuleSpec::new(name, kind).expires_after(0).log_on_match(true)
}

/// Rules installed in every client watcher.
#[must_use]
pub fn client_rules(verbose: bool) -> Vec<RuleSpec> {
    let mut rules = vec![
        logged("listen_succeeded", RuleKind::ListenSucceeded),
        logged("listen_failed", RuleKind::ListenFailed),
        logged("torrent_finished", RuleKind::TorrentFinished),
        logged("incoming_connection", RuleKind::IncomingConnection),
        logged("peer_connect", RuleKind::PeerConnect),
        logged("peer_disconnect", RuleKind::PeerDisconnected),
        logged("file_error", RuleKind::FileError),
        logged("torrent_error", RuleKind::TorrentError),
        logged("tracker_error", RuleKind::TrackerError),
    ];
    if verbose {
        rules.push(logged("torrent_stats", RuleKind::Stats));
    }
    rules
}

/// Client rules plus the store plugin rule.
#[must_use]
pub fn server_rules(verbose: bool) -> Vec<RuleSpec> {
    let mut rules = client_rules(verbose);
    rules.push(logged("store_plugin", RuleKind::StorePlugin));
    rules
}

/// Rule forwarding per-torrent statistics to the supervisor.
#[must_use]
pub fn stats_publisher_rule() -> RuleSpec {
    RuleSpec::new(STATS_PUBLISHER_RULE, RuleKind::StatsPublisher).expires_after(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_listens_on_main_port_with_store_plugin() {
        let config = SeedbankConfig::default();
        let params = WorkerParams::derive(
            "server",
            SessionRequest::server(Duration::from_millis(500)),
            &config,
            false,
        );
        assert_eq!(params.listen_min, config.main.listen_port);
        assert_eq!(params.listen_max, config.main.listen_port);
        assert_eq!(params.watcher_loop_limit, 0);
        assert!(!params.stop_on_watcher_exit);
        assert!(params.watcher_rules.iter().any(|rule| rule.name == "store_plugin"));
        let plugin = params.store_plugin.as_ref().expect("store plugin");
        assert_eq!(plugin.torrent_file_root, config.main.torrent_file_root);
        assert_eq!(
            params.inactive_torrent_timeout_secs,
            Some(config.main.inactive_torrent_timeout)
        );
    }

    #[test]
    fn client_uses_upload_range_and_timeout() {
        let mut config = SeedbankConfig::default();
        config.upload.upload_port_min = 7000;
        config.upload.upload_port_max = 7010;
        config.upload.torrent_timeout = 120;
        let params = WorkerParams::derive(
            "upload_",
            SessionRequest::client(Duration::from_millis(500)),
            &config,
            true,
        );
        assert_eq!((params.listen_min, params.listen_max), (7000, 7010));
        assert_eq!(params.inactive_torrent_timeout_secs, Some(120));
        assert!(params.store_plugin.is_none());
        assert_eq!(params.watcher_rules.len(), 10);
        assert!(params.watcher_rules.iter().all(|rule| rule.expires_after == 0 && rule.log_on_match));
    }

    #[test]
    fn activity_settings_need_interval_and_timeout() {
        let config = SeedbankConfig::default();
        let mut params = WorkerParams::derive(
            "upload_",
            SessionRequest::client(Duration::from_millis(500)),
            &config,
            false,
        );
        let settings = params.activity_settings().expect("settings");
        assert_eq!(settings.tick_interval, Duration::from_millis(500));
        params.torrent_manager_exec_interval_secs = None;
        assert!(params.activity_settings().is_none());
    }

    #[test]
    fn params_survive_the_command_line() -> SessionResult<()> {
        let params = WorkerParams::derive(
            "server",
            SessionRequest::server(Duration::from_millis(100)),
            &SeedbankConfig::default(),
            false,
        );
        let decoded = WorkerParams::from_json(&params.to_json()?)?;
        assert_eq!(decoded, params);
        assert!(matches!(
            WorkerParams::from_json("{"),
            Err(SessionError::Params { .. })
        ));
        Ok(())
    }
}
