//! Typed configuration sections.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;

/// Complete seedbank configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SeedbankConfig {
    /// Server identity, storage roots and the seeding engine.
    pub main: MainConfig,
    /// Upload client session settings.
    pub upload: UploadConfig,
    /// Persistent store location.
    pub store: StoreConfig,
    /// Broker queue names.
    pub broker: BrokerConfig,
}

/// `main` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MainConfig {
    /// Identifier reported upstream in `seedbank_init`.
    pub seedbank_id: String,
    /// Directory holding descriptors of seeded items.
    pub torrent_file_root: PathBuf,
    /// Directory holding upload data.
    pub data_volume_root: PathBuf,
    /// Interface the server engine binds.
    pub listen_address: IpAddr,
    /// Port the server engine binds.
    pub listen_port: u16,
    /// Default log level.
    pub log_level: String,
    /// Log output format (`json` or `pretty`); inferred when absent.
    pub log_format: Option<String>,
    /// Seconds without transfer in either direction before a torrent is dropped.
    pub inactive_torrent_timeout: u64,
    /// Seconds between activity scans.
    pub torrent_manager_exec_interval: u64,
}

impl Default for MainConfig {
    fn default() -> Self {
        Self {
            seedbank_id: String::new(),
            torrent_file_root: PathBuf::from(defaults::TORRENT_FILE_ROOT),
            data_volume_root: PathBuf::from(defaults::DATA_VOLUME_ROOT),
            listen_address: defaults::LISTEN_ADDRESS
                .parse()
                .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            listen_port: defaults::LISTEN_PORT,
            log_level: defaults::LOG_LEVEL.to_string(),
            log_format: None,
            inactive_torrent_timeout: defaults::INACTIVE_TORRENT_TIMEOUT_SECS,
            torrent_manager_exec_interval: defaults::TORRENT_MANAGER_EXEC_INTERVAL_SECS,
        }
    }
}

impl MainConfig {
    /// Inactivity timeout for server torrents.
    #[must_use]
    pub const fn inactive_timeout(&self) -> Duration {
        Duration::from_secs(self.inactive_torrent_timeout)
    }

    /// Interval between activity scans.
    #[must_use]
    pub const fn exec_interval(&self) -> Duration {
        Duration::from_secs(self.torrent_manager_exec_interval)
    }
}

/// `upload` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadConfig {
    /// Lowest port of the upload client listen range.
    pub upload_port_min: u16,
    /// Highest port of the upload client listen range.
    pub upload_port_max: u16,
    /// Seconds without transfer before an upload torrent is dropped.
    pub torrent_timeout: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            upload_port_min: defaults::UPLOAD_PORT_MIN,
            upload_port_max: defaults::UPLOAD_PORT_MAX,
            torrent_timeout: defaults::UPLOAD_TORRENT_TIMEOUT_SECS,
        }
    }
}

impl UploadConfig {
    /// Inactivity timeout for upload torrents.
    #[must_use]
    pub const fn inactive_timeout(&self) -> Duration {
        Duration::from_secs(self.torrent_timeout)
    }
}

/// `store` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Directory of the JSON document store.
    pub root: PathBuf,
    /// Namespace handed to the server engine's torrent store extension.
    pub namespace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(defaults::STORE_ROOT),
            namespace: defaults::STORE_NAMESPACE.to_string(),
        }
    }
}

/// `broker` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    /// Queue control documents arrive on.
    pub control_queue: String,
    /// Queue statistics are published to.
    pub stats_queue: String,
    /// Queue upstream notifications are published to.
    pub notify_queue: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            control_queue: defaults::CONTROL_QUEUE.to_string(),
            stats_queue: defaults::STATS_QUEUE.to_string(),
            notify_queue: defaults::NOTIFY_QUEUE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SeedbankConfig::default();
        assert_eq!(config.main.listen_port, 6881);
        assert_eq!(config.main.inactive_timeout(), Duration::from_secs(60));
        assert_eq!(config.main.exec_interval(), Duration::from_secs(5));
        assert_eq!(
            config.main.data_volume_root,
            PathBuf::from("/var/lib/seedbank/data")
        );
        assert_eq!(config.upload.upload_port_min, 6882);
        assert_eq!(config.upload.upload_port_max, 6900);
        assert_eq!(config.upload.inactive_timeout(), Duration::from_secs(300));
        assert_eq!(config.broker.control_queue, "seedbank.control");
        assert_eq!(config.broker.stats_queue, "seedbank.stats");
        assert_eq!(config.broker.notify_queue, "terasaur.web");
    }

    #[test]
    fn partial_documents_fill_defaults() -> Result<(), serde_yaml::Error> {
        let config: SeedbankConfig = serde_yaml::from_str("main:\n  seedbank_id: bank-7\n")?;
        assert_eq!(config.main.seedbank_id, "bank-7");
        assert_eq!(config.main.listen_port, 6881);
        assert_eq!(config.upload, UploadConfig::default());
        Ok(())
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let parsed = serde_yaml::from_str::<SeedbankConfig>("main:\n  nope: 1\n");
        assert!(parsed.is_err());
    }
}
