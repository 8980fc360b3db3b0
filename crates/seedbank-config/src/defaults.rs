//! Default values and search locations.
//!
//! # Design
//! - Keep every default in one place so the model and documentation agree.
//! - Durations are whole seconds.

/// Configuration file name.
pub const CONFIG_FILENAME: &str = "seedbank.yaml";
/// Locations searched, in order, when no explicit file is given.
pub const CONFIG_SEARCH_PATHS: &[&str] = &[
    "seedbank.yaml",
    "conf/seedbank.yaml",
    "/usr/local/seedbank/conf/seedbank.yaml",
    "/etc/seedbank/seedbank.yaml",
];
/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "SEEDBANK_";

pub(crate) const TORRENT_FILE_ROOT: &str = "/var/lib/seedbank/torrents";
pub(crate) const DATA_VOLUME_ROOT: &str = "/var/lib/seedbank/data";
pub(crate) const STORE_ROOT: &str = "/var/lib/seedbank/store";
pub(crate) const STORE_NAMESPACE: &str = "seedbank.torrent";
pub(crate) const LISTEN_ADDRESS: &str = "0.0.0.0";
pub(crate) const LISTEN_PORT: u16 = 6881;
pub(crate) const LOG_LEVEL: &str = "info";
pub(crate) const INACTIVE_TORRENT_TIMEOUT_SECS: u64 = 60;
pub(crate) const TORRENT_MANAGER_EXEC_INTERVAL_SECS: u64 = 5;
pub(crate) const UPLOAD_PORT_MIN: u16 = 6882;
pub(crate) const UPLOAD_PORT_MAX: u16 = 6900;
pub(crate) const UPLOAD_TORRENT_TIMEOUT_SECS: u64 = 300;
pub(crate) const CONTROL_QUEUE: &str = "seedbank.control";
pub(crate) const STATS_QUEUE: &str = "seedbank.stats";
pub(crate) const NOTIFY_QUEUE: &str = "terasaur.web";
