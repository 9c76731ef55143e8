//! Affinity zone configuration
//!
//! A zone names an execution context a graph block can be assigned to:
//! a host, a process on that host, and the thread-pool policy the block's
//! work runs under. Zone configurations are value-comparable; the zone
//! engine re-acts only when the stored value actually changes.
//!
//! Zone configurations are persisted as a JSON map keyed by zone name.

use crate::error::{FlowgraphError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// CPU affinity policy for a zone's thread pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AffinityMode {
    /// No pinning; threads float across all CPUs
    #[default]
    All,
    /// Pin to the NUMA nodes listed in the affinity mask
    Numa,
    /// Pin to the CPUs listed in the affinity mask
    Cpu,
}

/// Wait strategy for idle threads in a zone's thread pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum YieldMode {
    /// Block on a condition variable
    #[default]
    Condition,
    /// Spin briefly, then block
    Hybrid,
    /// Busy-spin
    Spin,
}

/// Configuration of one affinity zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// Display color for the editor (e.g. "#77dd77")
    #[serde(default)]
    pub color: String,

    /// Host URI ("tcp://host\[:port\]"); empty means in-process
    #[serde(default)]
    pub host_uri: String,

    /// Process name on the host; one server process per (host, process)
    #[serde(default)]
    pub process_name: String,

    /// Number of worker threads; 0 means one per CPU
    #[serde(default)]
    pub num_threads: usize,

    /// Scheduling priority in [-1.0, 1.0]
    #[serde(default)]
    pub priority: f64,

    /// CPU affinity policy
    #[serde(default)]
    pub affinity_mode: AffinityMode,

    /// CPU or NUMA node indices, meaning depends on `affinity_mode`
    #[serde(default)]
    pub affinity_mask: Vec<usize>,

    /// Idle wait strategy
    #[serde(default)]
    pub yield_mode: YieldMode,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            color: String::new(),
            host_uri: String::new(),
            process_name: String::new(),
            num_threads: 0,
            priority: 0.0,
            affinity_mode: AffinityMode::All,
            affinity_mask: Vec::new(),
            yield_mode: YieldMode::Condition,
        }
    }
}

impl ZoneConfig {
    /// True if this zone runs in the engine's own process
    pub fn is_in_process(&self) -> bool {
        self.host_uri.is_empty()
    }

    /// Thread-pool creation arguments as a JSON document
    pub fn thread_pool_args(&self) -> String {
        serde_json::json!({
            "numThreads": self.num_threads,
            "priority": self.priority,
            "affinityMode": self.affinity_mode,
            "affinity": self.affinity_mask,
            "yieldMode": self.yield_mode,
        })
        .to_string()
    }
}

// ==================== Zone Config Store ====================

/// Persistent store for zone configurations
///
/// Stored as one JSON document mapping zone name -> [`ZoneConfig`].
#[derive(Debug, Clone, Default)]
pub struct ZoneConfigStore {
    path: Option<PathBuf>,
    zones: HashMap<String, ZoneConfig>,
}

impl ZoneConfigStore {
    /// Create an empty, unpersisted store
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the store from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| FlowgraphError::Config(format!("Failed to read zone config: {}", e)))?;
        let zones: HashMap<String, ZoneConfig> = serde_json::from_str(&content)
            .map_err(|e| FlowgraphError::Config(format!("Failed to parse zone config: {}", e)))?;
        Ok(Self {
            path: Some(path.as_ref().to_path_buf()),
            zones,
        })
    }

    /// Load from the given path, or start empty if the file is missing
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path.as_ref()).unwrap_or_else(|_| Self {
            path: Some(path.as_ref().to_path_buf()),
            zones: HashMap::new(),
        })
    }

    /// Save the store back to its file
    pub fn save(&self) -> Result<()> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| FlowgraphError::Config("Zone store has no path".to_string()))?;
        let content = serde_json::to_string_pretty(&self.zones)?;
        std::fs::write(path, content)
            .map_err(|e| FlowgraphError::Config(format!("Failed to write zone config: {}", e)))
    }

    /// Get a zone configuration by name
    pub fn get(&self, name: &str) -> Option<&ZoneConfig> {
        self.zones.get(name)
    }

    /// Insert or replace a zone configuration
    pub fn set(&mut self, name: impl Into<String>, config: ZoneConfig) {
        self.zones.insert(name.into(), config);
    }

    /// Remove a zone configuration
    pub fn remove(&mut self, name: &str) -> Option<ZoneConfig> {
        self.zones.remove(name)
    }

    /// All configured zone names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.zones.keys().map(String::as_str)
    }

    /// The full name -> config map
    pub fn zones(&self) -> &HashMap<String, ZoneConfig> {
        &self.zones
    }
}
