//! The long-lived engine context
//!
//! One `EngineContext` value owns every process-wide cache the engine
//! components share: the block description cache, the environment map
//! keyed by (host, process), the spawned-server handle map for the same
//! key, and the engine settings. Components receive it by reference; there
//! are no hidden globals.

use crate::config::EngineSettings;
use crate::describe::{BlockDescriptionCache, HostConnector};
use crate::error::{FlowgraphError, Result};
use crate::host::{host_environment, BlockRegistry, SERVER_SPAWNER_OBJECT};
use crate::proxy::environment::{EnvRef, BACKEND_REMOTE};
use crate::proxy::handle::Proxy;
use crate::proxy::managed::ManagedEnvironment;
use crate::proxy::remote::parse_tcp_uri;
use crate::proxy::value::ObjectValue;
use crate::proxy::{make_environment, EnvironmentArgs};
use crate::types::BlockDescriptor;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Key of one server process: (host URI, process name)
type ProcessKey = (String, String);

/// Shared caches and connections for one engine instance
pub struct EngineContext {
    settings: EngineSettings,
    descriptions: Arc<BlockDescriptionCache>,
    local_registry: Arc<BlockRegistry>,
    /// The in-process managed environment, created on first use
    in_process: Mutex<Option<EnvRef>>,
    /// One listener connection per host URI
    listeners: Mutex<HashMap<String, EnvRef>>,
    /// One client environment per (host, process) pair
    environments: Mutex<HashMap<ProcessKey, EnvRef>>,
    /// Handles keeping spawned server processes alive, same key
    servers: Mutex<HashMap<ProcessKey, Proxy>>,
    /// Hosts the description cache currently tracks
    known_hosts: Mutex<Vec<String>>,
}

impl EngineContext {
    /// Create a context over the given settings and local block registry
    pub fn new(settings: EngineSettings, local_registry: Arc<BlockRegistry>) -> Arc<Self> {
        Arc::new(Self {
            settings,
            descriptions: BlockDescriptionCache::new(),
            local_registry,
            in_process: Mutex::new(None),
            listeners: Mutex::new(HashMap::new()),
            environments: Mutex::new(HashMap::new()),
            servers: Mutex::new(HashMap::new()),
            known_hosts: Mutex::new(Vec::new()),
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn descriptions(&self) -> &Arc<BlockDescriptionCache> {
        &self.descriptions
    }

    pub fn local_registry(&self) -> &Arc<BlockRegistry> {
        &self.local_registry
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.connect_timeout_ms)
    }

    fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.call_timeout_ms)
    }

    /// The managed in-process environment backing hostless zones
    pub fn in_process_environment(&self) -> EnvRef {
        let mut slot = self.in_process.lock().unwrap();
        if let Some(env) = slot.as_ref() {
            return env.clone();
        }
        let env: EnvRef = ManagedEnvironment::new(host_environment(self.local_registry.clone()));
        *slot = Some(env.clone());
        env
    }

    /// Connection to a host's well-known listener, cached per host URI
    pub fn listener_for(&self, host_uri: &str) -> Result<EnvRef> {
        let mut listeners = self.listeners.lock().unwrap();
        if let Some(env) = listeners.get(host_uri) {
            if env.is_alive() {
                return Ok(env.clone());
            }
            listeners.remove(host_uri);
        }

        let (host, port) = parse_tcp_uri(host_uri, self.settings.listener_port)?;
        let env = self.connect_remote(format!("tcp://{}:{}", host, port))?;
        listeners.insert(host_uri.to_string(), env.clone());
        Ok(env)
    }

    fn connect_remote(&self, uri: String) -> Result<EnvRef> {
        make_environment(
            BACKEND_REMOTE,
            EnvironmentArgs {
                uri: Some(uri),
                connect_timeout: Some(self.connect_timeout()),
                call_timeout: Some(self.call_timeout()),
                ..Default::default()
            },
        )
    }

    /// Resolve or create the environment for one (host, process) pair
    ///
    /// An empty host URI resolves to the in-process environment. For a
    /// remote pair the host's listener is asked to launch a server (the
    /// spawner reuses an existing process for the same name) and a client
    /// environment connects to its reported port. Dead connections are
    /// detected lazily and replaced.
    pub fn environment_for(&self, host_uri: &str, process_name: &str) -> Result<EnvRef> {
        if host_uri.is_empty() {
            return Ok(self.in_process_environment());
        }

        let key: ProcessKey = (host_uri.to_string(), process_name.to_string());
        {
            let environments = self.environments.lock().unwrap();
            if let Some(env) = environments.get(&key) {
                if env.is_alive() {
                    return Ok(env.clone());
                }
            }
        }

        let listener = self.listener_for(host_uri)?;
        let spawner = listener.find_proxy(SERVER_SPAWNER_OBJECT)?;
        let handle = spawner.call_values(
            "new",
            &[
                ObjectValue::Str("tcp://0.0.0.0:0".to_string()),
                ObjectValue::Str(process_name.to_string()),
            ],
        )?;
        let port = handle
            .call("getActualPort", &[])?
            .to_object()?
            .as_int()
            .ok_or_else(|| {
                FlowgraphError::Connect("spawner reported a non-numeric port".to_string())
            })?;

        let (host, _) = parse_tcp_uri(host_uri, self.settings.listener_port)?;
        let env = self.connect_remote(format!("tcp://{}:{}", host, port))?;

        tracing::info!(
            "Environment ready for ({}, '{}') on port {}",
            host_uri,
            process_name,
            port
        );
        self.servers.lock().unwrap().insert(key.clone(), handle);
        self.environments.lock().unwrap().insert(key, env.clone());
        Ok(env)
    }

    /// Track the current host set, refreshing descriptions when it changes
    pub fn update_hosts(self: &Arc<Self>, hosts: Vec<String>) {
        let changed = {
            let mut known = self.known_hosts.lock().unwrap();
            if *known == hosts {
                false
            } else {
                *known = hosts.clone();
                true
            }
        };
        if changed && !hosts.is_empty() {
            tracing::info!("Host list changed, refreshing block descriptions");
            self.descriptions
                .refresh_all(hosts, self.clone() as Arc<dyn HostConnector>);
        }
    }

    /// Resolve a block descriptor: the local registry answers first,
    /// then the description cache probes the known hosts
    pub fn lookup_description(&self, path: &str) -> Result<Arc<BlockDescriptor>> {
        if let Some(descriptor) = self.local_registry.describe(path) {
            return Ok(descriptor);
        }
        let hosts = self.known_hosts.lock().unwrap().clone();
        self.descriptions.lookup(path, &hosts, self)
    }

    /// Drop every cached environment and spawned-server handle
    pub fn clear(&self) {
        self.descriptions.cancel_refresh();
        self.servers.lock().unwrap().clear();
        self.environments.lock().unwrap().clear();
        self.listeners.lock().unwrap().clear();
        *self.in_process.lock().unwrap() = None;
    }
}

impl HostConnector for EngineContext {
    fn connect_host(&self, uri: &str) -> Result<EnvRef> {
        self.listener_for(uri)
    }
}
