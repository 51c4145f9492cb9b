//! Configuration Management
//!
//! Persisted defaults for ocimetrics, read from
//! `<config_dir>/ocimetrics/config.json`. Command line flags and
//! environment variables take precedence over these values.

use crate::oci::auth::{AuthSettings, AuthType, DEFAULT_CONFIG_FILE, DEFAULT_PROFILE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 8080;

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    /// OCI CLI config file
    #[serde(default)]
    pub config_file: Option<PathBuf>,
    /// Profile within the OCI config file
    #[serde(default)]
    pub profile: Option<String>,
    /// Region override
    #[serde(default)]
    pub region: Option<String>,
    /// Auth strategy; detected when unset
    #[serde(default)]
    pub auth_type: Option<AuthType>,
    /// HTTP port for `serve`
    #[serde(default)]
    pub port: Option<u16>,
}

/// Auth values given on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct AuthOverrides {
    pub auth_type: Option<AuthType>,
    pub config_file: Option<PathBuf>,
    pub profile: Option<String>,
    pub region: Option<String>,
}

impl Config {
    /// Directory holding the config file and logs
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ocimetrics"))
    }

    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load from a specific file; missing or unreadable files give defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring invalid config {}: {}", path.display(), e);
                Self::default()
            }),
            Err(e) => {
                tracing::warn!("Could not read config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Auth settings (overrides > config > defaults)
    pub fn auth_settings(&self, overrides: AuthOverrides) -> AuthSettings {
        AuthSettings {
            auth_type: overrides.auth_type.or(self.auth_type),
            config_file: overrides
                .config_file
                .or_else(|| self.config_file.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE)),
            profile: overrides
                .profile
                .or_else(|| self.profile.clone())
                .unwrap_or_else(|| DEFAULT_PROFILE.to_string()),
            region: overrides
                .region
                .or_else(|| self.region.clone())
                .filter(|r| !r.is_empty()),
        }
    }

    /// Get effective port (CLI > config > default)
    pub fn effective_port(&self, cli: Option<u16>) -> u16 {
        cli.or(self.port).unwrap_or(DEFAULT_PORT)
    }
}
