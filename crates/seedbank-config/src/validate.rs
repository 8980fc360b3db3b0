//! Validation helpers and parsing utilities for configuration values.

use std::net::IpAddr;
use std::str::FromStr;

use crate::error::{ConfigError, ConfigResult};
use crate::model::SeedbankConfig;

/// Check cross-field invariants of a loaded configuration.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for the first violated invariant.
pub fn validate(config: &SeedbankConfig) -> ConfigResult<()> {
    let main = &config.main;
    if main.listen_port == 0 {
        return Err(ConfigError::invalid("main", "listen_port", 0, "must_be_positive"));
    }
    if main.torrent_manager_exec_interval == 0 {
        return Err(ConfigError::invalid(
            "main",
            "torrent_manager_exec_interval",
            0,
            "must_be_positive",
        ));
    }
    if main.inactive_torrent_timeout == 0 {
        return Err(ConfigError::invalid(
            "main",
            "inactive_torrent_timeout",
            0,
            "must_be_positive",
        ));
    }
    if main.torrent_file_root.as_os_str().is_empty() {
        return Err(ConfigError::invalid("main", "torrent_file_root", "", "must_not_be_empty"));
    }
    if main.data_volume_root.as_os_str().is_empty() {
        return Err(ConfigError::invalid("main", "data_volume_root", "", "must_not_be_empty"));
    }

    let upload = &config.upload;
    if upload.upload_port_min == 0 {
        return Err(ConfigError::invalid("upload", "upload_port_min", 0, "must_be_positive"));
    }
    if upload.upload_port_min > upload.upload_port_max {
        return Err(ConfigError::invalid(
            "upload",
            "upload_port_max",
            upload.upload_port_max,
            "must_not_be_below_minimum",
        ));
    }
    if upload.torrent_timeout == 0 {
        return Err(ConfigError::invalid("upload", "torrent_timeout", 0, "must_be_positive"));
    }

    if config.store.root.as_os_str().is_empty() {
        return Err(ConfigError::invalid("store", "root", "", "must_not_be_empty"));
    }

    let broker = &config.broker;
    for (field, value) in [
        ("control_queue", &broker.control_queue),
        ("stats_queue", &broker.stats_queue),
        ("notify_queue", &broker.notify_queue),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::invalid("broker", field, value, "must_not_be_empty"));
        }
    }
    Ok(())
}

pub(crate) fn parse_u16(section: &'static str, field: &'static str, value: &str) -> ConfigResult<u16> {
    parse(section, field, value, "must_be_port")
}

pub(crate) fn parse_u64(section: &'static str, field: &'static str, value: &str) -> ConfigResult<u64> {
    parse(section, field, value, "must_be_unsigned_integer")
}

pub(crate) fn parse_ip(
    section: &'static str,
    field: &'static str,
    value: &str,
) -> ConfigResult<IpAddr> {
    parse(section, field, value, "must_be_ip_address")
}

fn parse<T: FromStr>(
    section: &'static str,
    field: &'static str,
    value: &str,
    reason: &'static str,
) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(section, field, value, reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configuration_is_valid() {
        assert!(validate(&SeedbankConfig::default()).is_ok());
    }

    #[test]
    fn inverted_upload_range_is_rejected() {
        let mut config = SeedbankConfig::default();
        config.upload.upload_port_min = 7000;
        config.upload.upload_port_max = 6000;
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidField {
                field: "upload_port_max",
                ..
            })
        ));
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let mut config = SeedbankConfig::default();
        config.main.torrent_manager_exec_interval = 0;
        assert!(validate(&config).is_err());

        let mut config = SeedbankConfig::default();
        config.broker.notify_queue = "  ".to_string();
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidField {
                section: "broker",
                ..
            })
        ));
    }

    #[test]
    fn parsers_report_field_context() {
        assert_eq!(parse_u16("main", "listen_port", " 6881 ").ok(), Some(6881));
        assert!(matches!(
            parse_u16("main", "listen_port", "70000"),
            Err(ConfigError::InvalidField {
                reason: "must_be_port",
                ..
            })
        ));
        assert!(parse_ip("main", "listen_address", "::1").is_ok());
        assert!(parse_u64("upload", "torrent_timeout", "-1").is_err());
    }
}
