//! YAML loading with environment overrides.
//!
//! # Design
//! - An explicit path must exist; otherwise the first existing search path wins
//!   and built-in defaults apply when none exists.
//! - `SEEDBANK_<SECTION>_<FIELD>` variables override file values.
//! - Validation runs after overrides so the final document is always checked.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::defaults::{CONFIG_SEARCH_PATHS, ENV_PREFIX};
use crate::error::{ConfigError, ConfigResult};
use crate::model::SeedbankConfig;
use crate::validate::{parse_ip, parse_u16, parse_u64, validate};

/// Builder that locates, parses, overrides and validates configuration.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
    env: Vec<(String, String)>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Loader with the default search paths and no overrides.
    #[must_use]
    pub fn new() -> Self {
        Self {
            search_paths: CONFIG_SEARCH_PATHS.iter().map(PathBuf::from).collect(),
            env: Vec::new(),
        }
    }

    /// Replace the search paths.
    #[must_use]
    pub fn with_search_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.search_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Use the given variables as overrides; names without the prefix are ignored.
    #[must_use]
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = vars
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .filter(|(key, _)| key.starts_with(ENV_PREFIX))
            .collect();
        self
    }

    /// Use the current process environment as overrides.
    #[must_use]
    pub fn with_process_env(self) -> Self {
        self.with_env(std::env::vars())
    }

    /// Load the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when an explicit file is missing, a file cannot be read
    /// or parsed, an override is unknown or malformed, or validation fails.
    pub fn load(&self, explicit: Option<&Path>) -> ConfigResult<SeedbankConfig> {
        let mut config = match self.locate(explicit)? {
            Some(path) => read_file(&path)?,
            None => {
                info!("no configuration file found; using defaults");
                SeedbankConfig::default()
            }
        };

        for (name, value) in &self.env {
            apply_override(&mut config, name, value)?;
        }

        validate(&config)?;
        Ok(config)
    }

    fn locate(&self, explicit: Option<&Path>) -> ConfigResult<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.is_file() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        Ok(self.search_paths.iter().find(|path| path.is_file()).cloned())
    }
}

fn read_file(path: &Path) -> ConfigResult<SeedbankConfig> {
    debug!(path = %path.display(), "reading configuration");
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        operation: "read",
        path: path.to_path_buf(),
        source,
    })?;
    if raw.trim().is_empty() {
        return Ok(SeedbankConfig::default());
    }
    serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply one `SEEDBANK_<SECTION>_<FIELD>` override.
///
/// # Errors
///
/// Returns [`ConfigError::UnknownOverride`] for unknown names and
/// [`ConfigError::InvalidField`] for values that do not parse.
pub fn apply_override(config: &mut SeedbankConfig, name: &str, value: &str) -> ConfigResult<()> {
    let key = name
        .strip_prefix(ENV_PREFIX)
        .unwrap_or(name)
        .to_ascii_lowercase();
    match key.as_str() {
        "main_seedbank_id" => config.main.seedbank_id = value.to_string(),
        "main_torrent_file_root" => config.main.torrent_file_root = PathBuf::from(value),
        "main_data_volume_root" => config.main.data_volume_root = PathBuf::from(value),
        "main_listen_address" => {
            config.main.listen_address = parse_ip("main", "listen_address", value)?;
        }
        "main_listen_port" => config.main.listen_port = parse_u16("main", "listen_port", value)?,
        "main_log_level" => config.main.log_level = value.to_string(),
        "main_log_format" => config.main.log_format = Some(value.to_string()),
        "main_inactive_torrent_timeout" => {
            config.main.inactive_torrent_timeout =
                parse_u64("main", "inactive_torrent_timeout", value)?;
        }
        "main_torrent_manager_exec_interval" => {
            config.main.torrent_manager_exec_interval =
                parse_u64("main", "torrent_manager_exec_interval", value)?;
        }
        "upload_upload_port_min" => {
            config.upload.upload_port_min = parse_u16("upload", "upload_port_min", value)?;
        }
        "upload_upload_port_max" => {
            config.upload.upload_port_max = parse_u16("upload", "upload_port_max", value)?;
        }
        "upload_torrent_timeout" => {
            config.upload.torrent_timeout = parse_u64("upload", "torrent_timeout", value)?;
        }
        "store_root" => config.store.root = PathBuf::from(value),
        "store_namespace" => config.store.namespace = value.to_string(),
        "broker_control_queue" => config.broker.control_queue = value.to_string(),
        "broker_stats_queue" => config.broker.stats_queue = value.to_string(),
        "broker_notify_queue" => config.broker.notify_queue = value.to_string(),
        _ => {
            return Err(ConfigError::UnknownOverride {
                name: name.to_string(),
            });
        }
    }
    Ok(())
}
