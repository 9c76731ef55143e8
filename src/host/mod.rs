//! Host-side runtime services
//!
//! Everything a participating host exposes to the engine lives here:
//!
//! - [`BlockRegistry`] - the declarative block descriptors this host knows
//! - `engine/BlockRegistry` - describe/dump RPC surface over the registry
//! - `engine/EvalEnvironment` - factory for per-block evaluation helpers
//! - `engine/ThreadPoolFactory` - thread-pool objects from a policy document
//! - `engine/ServerSpawner` - launches server processes on request
//! - [`HostListener`] - the well-known-port server carrying the spawner
//!
//! The same services back the in-process managed environment, so a graph
//! with no hosts configured evaluates fully locally.

pub mod objects;

pub use objects::{EvalPropertyReply, GraphObject, ThreadPoolParams};

use crate::proxy::local::LocalEnvironment;
use crate::proxy::server::ProxyServer;
use crate::types::BlockDescriptor;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Registered name of the block registry object
pub const REGISTRY_OBJECT: &str = "engine/BlockRegistry";
/// Registered name of the evaluation-helper factory
pub const EVAL_ENVIRONMENT_OBJECT: &str = "engine/EvalEnvironment";
/// Registered name of the thread-pool factory
pub const THREAD_POOL_FACTORY_OBJECT: &str = "engine/ThreadPoolFactory";
/// Registered name of the server spawner (listener servers only)
pub const SERVER_SPAWNER_OBJECT: &str = "engine/ServerSpawner";

// ==================== Block Registry ====================

/// The block descriptors one host can materialize
#[derive(Default)]
pub struct BlockRegistry {
    descriptors: RwLock<HashMap<String, Arc<BlockDescriptor>>>,
}

impl BlockRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a descriptor under its path, replacing any previous one
    pub fn register(&self, descriptor: BlockDescriptor) {
        let path = descriptor.path.clone();
        self.descriptors
            .write()
            .unwrap()
            .insert(path, Arc::new(descriptor));
    }

    /// Look up a descriptor by path
    pub fn describe(&self, path: &str) -> Option<Arc<BlockDescriptor>> {
        self.descriptors.read().unwrap().get(path).cloned()
    }

    /// Dump every descriptor as one JSON array
    pub fn dump_json(&self) -> String {
        let descriptors = self.descriptors.read().unwrap();
        let all: Vec<&BlockDescriptor> = descriptors.values().map(|d| d.as_ref()).collect();
        serde_json::to_string(&all).unwrap_or_else(|_| "[]".to_string())
    }

    /// Number of registered descriptors
    pub fn len(&self) -> usize {
        self.descriptors.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.read().unwrap().is_empty()
    }
}

// ==================== Environment Assembly ====================

/// Build the environment a spawned server process serves
pub fn host_environment(registry: Arc<BlockRegistry>) -> Arc<LocalEnvironment> {
    let env = LocalEnvironment::new();
    env.register(
        REGISTRY_OBJECT,
        Arc::new(objects::RegistryObject::new(registry)),
    );
    env.register(
        EVAL_ENVIRONMENT_OBJECT,
        Arc::new(objects::EvalEnvironmentObject),
    );
    env.register(
        THREAD_POOL_FACTORY_OBJECT,
        Arc::new(objects::ThreadPoolFactoryObject),
    );
    env
}

/// Build the environment a host listener serves: the host services plus
/// the server spawner
pub fn listener_environment(registry: Arc<BlockRegistry>) -> Arc<LocalEnvironment> {
    let env = host_environment(registry.clone());
    env.register(
        SERVER_SPAWNER_OBJECT,
        Arc::new(objects::ServerSpawnerObject::new(registry)),
    );
    env
}

// ==================== Host Listener ====================

/// The well-known-port server every participating host runs
///
/// Carries the full host service set plus the spawner, so the engine can
/// both resolve block descriptions directly and ask for dedicated server
/// processes per (host, process) pair.
pub struct HostListener {
    server: ProxyServer,
}

impl HostListener {
    /// Bind and serve on `bind_uri` (port 0 selects an ephemeral port)
    pub fn start(bind_uri: &str, registry: Arc<BlockRegistry>) -> crate::error::Result<Self> {
        let server = ProxyServer::serve(listener_environment(registry), bind_uri)?;
        tracing::info!("Host listener up on port {}", server.port());
        Ok(Self { server })
    }

    /// The bound listener port
    pub fn port(&self) -> u16 {
        self.server.port()
    }

    /// The served environment, for test inspection
    pub fn env(&self) -> &Arc<LocalEnvironment> {
        self.server.env()
    }
}
