//! Configuration module for the flowgraph engine
//!
//! This module handles engine configuration including:
//! - Affinity zone configurations (persisted as JSON, keyed by zone name)
//! - Engine settings (known hosts, listener port, RPC timeouts)
//!
//! # App Data Location
//!
//! Engine data is stored in the platform-appropriate location:
//! - **Linux**: `~/.local/share/dev.hxyulin.flowgraph-rs/`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.flowgraph-rs/`
//! - **Windows**: `%APPDATA%\dev.hxyulin.flowgraph-rs\`
//!
//! # Files
//!
//! - `zones.json` - Affinity zone configuration map
//! - `engine.toml` - Engine settings
//!
//! Zone configurations are the only persisted engine state; everything
//! else rebuilds from the live graph.

pub mod zone;

pub use zone::*;

use crate::error::{FlowgraphError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for data directories
pub const APP_ID: &str = "dev.hxyulin.flowgraph-rs";

/// Zone configuration filename
pub const ZONES_FILE: &str = "zones.json";

/// Engine settings filename
pub const SETTINGS_FILE: &str = "engine.toml";

/// Default well-known port of a host listener
pub const DEFAULT_LISTENER_PORT: u16 = 16_180;

/// Default timeout for connecting to a host in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2_000;

/// Default timeout for a single RPC round trip in milliseconds
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 5_000;

// ==================== App Data Directory ====================

/// Get the engine data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the engine data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir().ok_or_else(|| {
        FlowgraphError::Config("Could not determine app data directory".to_string())
    })?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            FlowgraphError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

// ==================== Engine Settings ====================

/// Engine-level settings, stored as TOML
///
/// These describe the environment the engine runs in (which hosts carry
/// block registries, which port their listeners answer on) rather than
/// any particular graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Host URIs probed for block descriptions, in lookup order
    pub hosts: Vec<String>,

    /// Well-known port of each host's listener
    pub listener_port: u16,

    /// Timeout for connecting to a host in milliseconds
    pub connect_timeout_ms: u64,

    /// Timeout for a single RPC round trip in milliseconds
    pub call_timeout_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            listener_port: DEFAULT_LISTENER_PORT,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
        }
    }
}

impl EngineSettings {
    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| FlowgraphError::Config(format!("Failed to read settings: {}", e)))?;
        toml::from_str(&content)
            .map_err(|e| FlowgraphError::Config(format!("Failed to parse settings: {}", e)))
    }

    /// Load settings from the default location, falling back to defaults
    pub fn load_or_default() -> Self {
        app_data_dir()
            .map(|d| d.join(SETTINGS_FILE))
            .and_then(|p| Self::load(p).ok())
            .unwrap_or_default()
    }

    /// Save settings to a TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| FlowgraphError::Config(format!("Failed to serialize settings: {}", e)))?;
        std::fs::write(path.as_ref(), content)
            .map_err(|e| FlowgraphError::Config(format!("Failed to write settings: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);

        let mut settings = EngineSettings::default();
        settings.hosts.push("tcp://host1".to_string());
        settings.hosts.push("tcp://host2".to_string());
        settings.save(&path).unwrap();

        let loaded = EngineSettings::load(&path).unwrap();
        assert_eq!(settings, loaded);
    }

    #[test]
    fn test_settings_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.listener_port, DEFAULT_LISTENER_PORT);
        assert!(settings.hosts.is_empty());
    }
}
