//! Process-wide block description cache
//!
//! Maps block paths to their declarative descriptors. Two distinct
//! resolution algorithms, kept intentionally separate:
//!
//! - [`lookup`](BlockDescriptionCache::lookup) resolves a single missing
//!   path through the *first* reachable host in list order - no merging.
//! - [`refresh_all`](BlockDescriptionCache::refresh_all) dumps every host
//!   concurrently and swaps in a fresh merged map; hosts that fail are
//!   omitted from that generation and not retried within it.
//!
//! A refresh first cancels and awaits any in-flight refresh, so two
//! refreshes never race against the same state.

use crate::error::{FlowgraphError, Result};
use crate::host::REGISTRY_OBJECT;
use crate::proxy::environment::EnvRef;
use crate::types::BlockDescriptor;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

/// Connects to a host's listener environment on demand
pub trait HostConnector: Send + Sync {
    fn connect_host(&self, uri: &str) -> Result<EnvRef>;
}

struct RefreshTask {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Shared path -> descriptor cache
#[derive(Default)]
pub struct BlockDescriptionCache {
    map: RwLock<HashMap<String, Arc<BlockDescriptor>>>,
    generation: AtomicU64,
    refresh: Mutex<Option<RefreshTask>>,
}

impl BlockDescriptionCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Current refresh generation
    pub fn generation(&self) -> u64 {
        self.generation.load(AtomicOrdering::Relaxed)
    }

    /// Number of cached descriptors
    pub fn len(&self) -> usize {
        self.map.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().unwrap().is_empty()
    }

    /// Resolve a descriptor, probing hosts in list order on a miss
    ///
    /// The first host that answers successfully wins; its descriptor is
    /// inserted into the cache. This is resolve-by-any-one-reachable-host,
    /// not a merge.
    pub fn lookup(
        &self,
        path: &str,
        hosts: &[String],
        connector: &dyn HostConnector,
    ) -> Result<Arc<BlockDescriptor>> {
        if let Some(found) = self.map.read().unwrap().get(path) {
            return Ok(found.clone());
        }

        let mut last_error: Option<FlowgraphError> = None;
        for host in hosts {
            match probe_host(connector, host, path) {
                Ok(descriptor) => {
                    let descriptor = Arc::new(descriptor);
                    self.map
                        .write()
                        .unwrap()
                        .insert(path.to_string(), descriptor.clone());
                    return Ok(descriptor);
                }
                Err(e) => {
                    tracing::trace!("Host {} cannot describe '{}': {}", host, path, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            FlowgraphError::Call(format!("no host provides a block at '{}'", path))
        }))
    }

    /// Rebuild the whole cache from every host concurrently
    ///
    /// Cancels and awaits any in-flight refresh first. Each host dump
    /// succeeds or fails independently; successful results merge into a
    /// fresh map swapped in under the write lock.
    pub fn refresh_all(self: &Arc<Self>, hosts: Vec<String>, connector: Arc<dyn HostConnector>) {
        self.cancel_refresh();

        let cancel = Arc::new(AtomicBool::new(false));
        let cache = self.clone();
        let task_cancel = cancel.clone();

        let handle = std::thread::spawn(move || {
            let (tx, rx) = crossbeam_channel::unbounded();
            let workers: Vec<JoinHandle<()>> = hosts
                .iter()
                .map(|host| {
                    let host = host.clone();
                    let connector = connector.clone();
                    let tx = tx.clone();
                    std::thread::spawn(move || {
                        let result = dump_host(connector.as_ref(), &host);
                        let _ = tx.send((host, result));
                    })
                })
                .collect();
            drop(tx);

            let mut fresh: HashMap<String, Arc<BlockDescriptor>> = HashMap::new();
            let mut reached = 0usize;
            for (host, result) in rx.iter() {
                match result {
                    Ok(descriptors) => {
                        reached += 1;
                        for descriptor in descriptors {
                            fresh.insert(descriptor.path.clone(), Arc::new(descriptor));
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Description refresh skipped host {}: {}", host, e);
                    }
                }
            }
            for worker in workers {
                let _ = worker.join();
            }

            if task_cancel.load(AtomicOrdering::Relaxed) {
                tracing::trace!("Description refresh cancelled before swap");
                return;
            }

            let count = fresh.len();
            *cache.map.write().unwrap() = fresh;
            let generation = cache.generation.fetch_add(1, AtomicOrdering::Relaxed) + 1;
            tracing::info!(
                "Description cache refreshed: {} paths from {} host(s) (gen {})",
                count,
                reached,
                generation
            );
        });

        *self.refresh.lock().unwrap() = Some(RefreshTask { cancel, handle });
    }

    /// Cancel and await any in-flight refresh
    pub fn cancel_refresh(&self) {
        if let Some(task) = self.refresh.lock().unwrap().take() {
            task.cancel.store(true, AtomicOrdering::Relaxed);
            let _ = task.handle.join();
        }
    }

    /// Await the in-flight refresh without cancelling it
    pub fn wait_refresh(&self) {
        if let Some(task) = self.refresh.lock().unwrap().take() {
            let _ = task.handle.join();
        }
    }
}

fn probe_host(
    connector: &dyn HostConnector,
    host: &str,
    path: &str,
) -> Result<BlockDescriptor> {
    let env = connector.connect_host(host)?;
    let registry = env.find_proxy(REGISTRY_OBJECT)?;
    let reply = registry.call_values(
        "describe",
        &[crate::proxy::value::ObjectValue::Str(path.to_string())],
    )?;
    let json = reply.to_object()?;
    let json = json
        .as_str()
        .ok_or_else(|| FlowgraphError::Serialization("describe returned a non-string".into()))?;
    BlockDescriptor::from_json(json)
}

fn dump_host(connector: &dyn HostConnector, host: &str) -> Result<Vec<BlockDescriptor>> {
    let env = connector.connect_host(host)?;
    let registry = env.find_proxy(REGISTRY_OBJECT)?;
    let reply = registry.call("dumpJson", &[])?;
    let json = reply.to_object()?;
    let json = json
        .as_str()
        .ok_or_else(|| FlowgraphError::Serialization("dumpJson returned a non-string".into()))?;
    Ok(serde_json::from_str(json)?)
}
