//! Gateway configuration.
//!
//! A small INI file plus CLI overrides. The one setting the lifecycle
//! core consumes is `close_grace_secs`: how long a session outlives its
//! last reference. A negative value disables reference tracking
//! entirely - sessions then live for the process lifetime - and maps to
//! `close_grace: None` internally.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

/// Default grace window in seconds.
pub const DEFAULT_CLOSE_GRACE_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Top-level configuration for the gateway process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Address the HTTP listener binds.
    pub listen: SocketAddr,

    /// Grace window between the last release and session teardown;
    /// `None` disables reference tracking.
    pub close_grace: Option<Duration>,

    /// Directory holding persisted session descriptors.
    pub store_dir: PathBuf,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            close_grace: Some(Duration::from_secs(DEFAULT_CLOSE_GRACE_SECS as u64)),
            store_dir: default_store_dir(),
        }
    }
}

impl GatewayConfig {
    /// Map the config-surface seconds value to the internal option:
    /// negative disables tracking, zero and up is a real window.
    pub fn close_grace_from_secs(secs: i64) -> Option<Duration> {
        if secs < 0 {
            None
        } else {
            Some(Duration::from_secs(secs as u64))
        }
    }

    /// Load configuration from an INI file.
    ///
    /// Recognized keys:
    ///
    /// ```ini
    /// [gateway]
    /// listen = 127.0.0.1:8080
    /// close_grace_secs = 60
    ///
    /// [store]
    /// dir = /var/lib/tidegate/torrents
    /// ```
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|err| ConfigError::Read {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;

        let mut config = Self::default();
        if let Some(section) = ini.section(Some("gateway")) {
            if let Some(listen) = section.get("listen") {
                config.listen = listen.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "gateway.listen".to_string(),
                    reason: format!("{listen:?} is not a socket address"),
                })?;
            }
            if let Some(grace) = section.get("close_grace_secs") {
                let secs: i64 = grace.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "gateway.close_grace_secs".to_string(),
                    reason: format!("{grace:?} is not an integer"),
                })?;
                config.close_grace = Self::close_grace_from_secs(secs);
            }
        }
        if let Some(section) = ini.section(Some("store")) {
            if let Some(dir) = section.get("dir") {
                config.store_dir = PathBuf::from(dir);
            }
        }
        Ok(config)
    }

    /// Load from `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Set the listen address.
    pub fn with_listen(mut self, listen: SocketAddr) -> Self {
        self.listen = listen;
        self
    }

    /// Set the grace window.
    pub fn with_close_grace(mut self, close_grace: Option<Duration>) -> Self {
        self.close_grace = close_grace;
        self
    }

    /// Set the descriptor store directory.
    pub fn with_store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_dir = dir.into();
        self
    }
}

/// Default descriptor directory under the user's home.
pub fn default_store_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".tidegate").join("torrents"))
        .unwrap_or_else(|| PathBuf::from("torrents"))
}

/// Default config file location under the user's home.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".tidegate").join("tidegate.ini"))
}
