//! Daemon configuration.
//!
//! The daemon reads a TOML file and translates it into the core's
//! [`ServerConfig`] plus its own runtime settings. Resolution order:
//! `$CAIRN_CONFIG` → `$XDG_CONFIG_HOME/cairn/cairnd.toml` →
//! `~/.config/cairn/cairnd.toml` → defaults. The core itself never touches
//! environment or filesystem; that boundary is this module's whole job.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use cairn_core::config::ServerConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// TCP listen address, e.g. `127.0.0.1:4840`.
    pub listen_addr: String,
    /// Users accepted by the built-in username/password registry.
    pub users: Vec<UserConfig>,
    pub allow_anonymous: bool,
    /// The protocol engine's configuration, passed through as-is.
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub username: String,
    pub password: String,
    /// ns=0 numeric ids of the roles this user holds.
    pub roles: Vec<u32>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            listen_addr: "127.0.0.1:4840".into(),
            users: vec![UserConfig {
                username: "user1".into(),
                password: "password1".into(),
                roles: vec![15680], // Operator
            }],
            allow_anonymous: true,
            server: ServerConfig::default(),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
}

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            std::env::var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("cairn")
}

impl DaemonConfig {
    pub fn file_path() -> PathBuf {
        std::env::var("CAIRN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("cairnd.toml"))
    }

    /// Load the config file, falling back to defaults when absent.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            return Ok(DaemonConfig::default());
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path, e))
    }
}
