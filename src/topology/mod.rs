//! The committed topology
//!
//! `TopologyEngine` owns the live connection set. A commit is a single
//! transactional replace-all: every block resolves to its current remote
//! proxy and gets its zone's thread pool attached, the previously
//! committed connections are fully torn down against the exact objects
//! they were made with, and the declared set is wired up fresh. There is
//! no incremental diffing.
//!
//! A block that failed this pass keeps its previous resolution entry, so
//! its connections re-commit against the stale-but-valid object until the
//! block is corrected.

use crate::eval::block::EvalGraphBlock;
use crate::eval::zone::ZoneEngine;
use crate::proxy::environment::EnvRef;
use crate::proxy::handle::Proxy;
use crate::proxy::value::ObjectValue;
use crate::types::ConnectionInfo;
use std::collections::HashMap;

struct CommittedConnection {
    info: ConnectionInfo,
    src: Proxy,
    dst: Proxy,
}

/// Owns and replaces the live connection set
#[derive(Default)]
pub struct TopologyEngine {
    /// Latest good proxy per block id; failed blocks keep prior entries
    resolved: HashMap<String, Proxy>,
    committed: Vec<CommittedConnection>,
    zone_envs: HashMap<String, EnvRef>,
    zone_pools: HashMap<String, Proxy>,
    /// (block handle, pool handle) last attached per block id
    applied_pools: HashMap<String, (u64, u64)>,
}

impl TopologyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment of a zone, memoized at the last commit; empty for an
    /// unconfigured zone (callers fall back to defaults)
    pub fn environment_from_zone(&self, zone: &str) -> Option<&EnvRef> {
        self.zone_envs.get(zone)
    }

    /// Thread pool of a zone, memoized at the last commit
    pub fn thread_pool_from_zone(&self, zone: &str) -> Option<&Proxy> {
        self.zone_pools.get(zone)
    }

    /// Currently committed connections
    pub fn committed(&self) -> Vec<ConnectionInfo> {
        self.committed.iter().map(|c| c.info.clone()).collect()
    }

    /// Replace the committed topology with the declared one
    ///
    /// Returns (block id, message) pairs for everything that failed;
    /// failures surface as block errors and retry on the next pass.
    pub fn commit_update(
        &mut self,
        order: &[String],
        blocks: &HashMap<String, EvalGraphBlock>,
        zones: &HashMap<String, ZoneEngine>,
        connections: &[ConnectionInfo],
    ) -> Vec<(String, String)> {
        let mut errors: Vec<(String, String)> = Vec::new();

        // Re-memoize zone resources for this commit.
        self.zone_envs.clear();
        self.zone_pools.clear();
        for (name, zone) in zones {
            if let Some(runtime) = zone.runtime() {
                self.zone_envs
                    .insert(name.clone(), runtime.environment.clone());
                self.zone_pools
                    .insert(name.clone(), runtime.thread_pool.clone());
            }
        }

        // Update resolutions for healthy blocks; keep prior entries for
        // failed ones; drop ids no longer declared.
        for id in order {
            if let Some(block) = blocks.get(id) {
                if let (Some(proxy), false) = (block.proxy(), block.has_errors()) {
                    self.resolved.insert(id.clone(), proxy.clone());
                }
            }
        }
        self.resolved.retain(|id, _| order.contains(id));
        self.applied_pools.retain(|id, _| self.resolved.contains_key(id));

        // Attach each block's zone thread pool.
        for id in order {
            let Some(block) = blocks.get(id) else { continue };
            let Some(proxy) = self.resolved.get(id) else {
                continue;
            };
            let Some(pool) = self.zone_pools.get(block.zone_name()) else {
                continue;
            };
            let applied = (proxy.handle(), pool.handle());
            if self.applied_pools.get(id) == Some(&applied) {
                continue;
            }
            match proxy.call("setThreadPool", std::slice::from_ref(pool)) {
                Ok(_) => {
                    self.applied_pools.insert(id.clone(), applied);
                }
                Err(e) => {
                    errors.push((id.clone(), format!("setThreadPool failed: {}", e)));
                }
            }
        }

        // Tear down the previous topology against the exact objects it
        // was committed with.
        for old in self.committed.drain(..) {
            if let Err(e) = disconnect_call(&old) {
                tracing::trace!(
                    "Stale disconnect {}:{} -> {}:{} ignored: {}",
                    old.info.src_id,
                    old.info.src_port,
                    old.info.dst_id,
                    old.info.dst_port,
                    e
                );
            }
        }

        // Wire up the declared set.
        let mut committed = Vec::with_capacity(connections.len());
        for info in connections {
            let (src, dst) = match (
                self.resolved.get(&info.src_id),
                self.resolved.get(&info.dst_id),
            ) {
                (Some(src), Some(dst)) => (src.clone(), dst.clone()),
                (None, _) => {
                    errors.push((
                        info.src_id.clone(),
                        format!("connection source '{}' is not materialized", info.src_id),
                    ));
                    continue;
                }
                (_, None) => {
                    errors.push((
                        info.dst_id.clone(),
                        format!("connection target '{}' is not materialized", info.dst_id),
                    ));
                    continue;
                }
            };

            let next = CommittedConnection {
                info: info.clone(),
                src,
                dst,
            };
            match connect_call(&next) {
                Ok(()) => committed.push(next),
                Err(e) => {
                    errors.push((
                        info.src_id.clone(),
                        format!(
                            "connect {}:{} -> {}:{} failed: {}",
                            info.src_id, info.src_port, info.dst_id, info.dst_port, e
                        ),
                    ));
                }
            }
        }

        tracing::debug!(
            "Topology committed: {} connection(s), {} error(s)",
            committed.len(),
            errors.len()
        );
        self.committed = committed;
        errors
    }
}

fn endpoint_args(connection: &CommittedConnection) -> crate::error::Result<Vec<Proxy>> {
    let env = connection
        .src
        .environment()
        .ok_or_else(|| crate::error::FlowgraphError::Call("null source proxy".to_string()))?;
    Ok(vec![
        env.convert_object_to_proxy(ObjectValue::Str(connection.info.src_port.clone()))?,
        connection.dst.clone(),
        env.convert_object_to_proxy(ObjectValue::Str(connection.info.dst_port.clone()))?,
    ])
}

fn connect_call(connection: &CommittedConnection) -> crate::error::Result<()> {
    connection
        .src
        .call("connect", &endpoint_args(connection)?)?;
    Ok(())
}

fn disconnect_call(connection: &CommittedConnection) -> crate::error::Result<()> {
    connection
        .src
        .call("disconnect", &endpoint_args(connection)?)?;
    Ok(())
}
