//! Per-zone cached runtime
//!
//! Each affinity zone caches {environment, thread pool, expression
//! context} as one [`ZoneRuntime`] value, recomputed only when the zone's
//! configuration actually changes. An unchanged configuration costs zero
//! RPCs; a changed one replaces the runtime wholesale, never mutating it
//! in place.

use crate::config::ZoneConfig;
use crate::error::Result;
use crate::eval::context::EngineContext;
use crate::host::{EVAL_ENVIRONMENT_OBJECT, THREAD_POOL_FACTORY_OBJECT};
use crate::proxy::environment::EnvRef;
use crate::proxy::handle::Proxy;
use crate::proxy::value::ObjectValue;
use std::sync::Arc;

/// The live resources of one zone
pub struct ZoneRuntime {
    /// Environment the zone's blocks materialize in
    pub environment: EnvRef,
    /// Thread pool attached to every block of this zone
    pub thread_pool: Proxy,
    /// Expression-context factory; per-block helpers spawn from it
    pub eval_env: Proxy,
    /// The configuration these resources were built from
    pub applied: ZoneConfig,
}

impl ZoneRuntime {
    /// Spawn a fresh per-block evaluation helper in this zone
    pub fn new_block_eval(&self) -> Result<Proxy> {
        self.eval_env.call("newBlockEval", &[])
    }
}

/// Engine for one affinity zone
pub struct ZoneEngine {
    name: String,
    desired: ZoneConfig,
    runtime: Option<ZoneRuntime>,
}

impl ZoneEngine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            desired: ZoneConfig::default(),
            runtime: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store the desired configuration without acting on it
    pub fn accept_config(&mut self, config: ZoneConfig) {
        self.desired = config;
    }

    /// The current runtime, if one has been built
    pub fn runtime(&self) -> Option<&ZoneRuntime> {
        self.runtime.as_ref()
    }

    /// Lazy liveness of the cached environment
    pub fn is_environment_alive(&self) -> bool {
        self.runtime
            .as_ref()
            .map(|rt| rt.environment.is_alive())
            .unwrap_or(false)
    }

    /// Reconcile the runtime with the desired configuration
    ///
    /// No-op when the configuration is unchanged and the environment is
    /// still alive. Otherwise resolves or spawns the environment for the
    /// (host, process) pair and creates a fresh thread pool and
    /// expression context, replacing the cached runtime as a unit.
    pub fn update(&mut self, ctx: &Arc<EngineContext>) -> Result<()> {
        if let Some(runtime) = &self.runtime {
            if runtime.applied == self.desired && runtime.environment.is_alive() {
                return Ok(());
            }
        }

        tracing::info!("Zone '{}' configuration changed, rebuilding", self.name);
        let environment =
            ctx.environment_for(&self.desired.host_uri, &self.desired.process_name)?;

        let factory = environment.find_proxy(THREAD_POOL_FACTORY_OBJECT)?;
        let thread_pool = factory.call_values(
            "make",
            &[ObjectValue::Str(self.desired.thread_pool_args())],
        )?;
        let eval_env = environment.find_proxy(EVAL_ENVIRONMENT_OBJECT)?;

        self.runtime = Some(ZoneRuntime {
            environment,
            thread_pool,
            eval_env,
            applied: self.desired.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineSettings;
    use crate::host::BlockRegistry;

    fn context() -> Arc<EngineContext> {
        EngineContext::new(EngineSettings::default(), BlockRegistry::new())
    }

    fn in_process_stats(ctx: &Arc<EngineContext>) -> crate::proxy::EnvStats {
        ctx.in_process_environment().stats()
    }

    #[test]
    fn test_update_builds_runtime_once() {
        let ctx = context();
        let mut zone = ZoneEngine::new("default");
        zone.accept_config(ZoneConfig {
            num_threads: 2,
            ..Default::default()
        });

        assert!(zone.runtime().is_none());
        zone.update(&ctx).unwrap();
        let runtime = zone.runtime().unwrap();
        assert_eq!(runtime.applied.num_threads, 2);
    }

    #[test]
    fn test_unchanged_config_issues_zero_rpcs() {
        let ctx = context();
        let mut zone = ZoneEngine::new("default");
        zone.accept_config(ZoneConfig::default());
        zone.update(&ctx).unwrap();

        let before = in_process_stats(&ctx);
        zone.update(&ctx).unwrap();
        let after = in_process_stats(&ctx);
        assert_eq!(before.total(), after.total());
    }

    #[test]
    fn test_changed_config_replaces_runtime_exactly_once() {
        let ctx = context();
        let mut zone = ZoneEngine::new("default");
        zone.accept_config(ZoneConfig::default());
        zone.update(&ctx).unwrap();
        let old_pool = zone.runtime().unwrap().thread_pool.clone();

        let mut changed = ZoneConfig::default();
        changed.num_threads = 8;
        zone.accept_config(changed);
        zone.update(&ctx).unwrap();

        let new_pool = zone.runtime().unwrap().thread_pool.clone();
        assert!(new_pool.compare_to(&old_pool).is_err() || new_pool.handle() != old_pool.handle());
        assert_eq!(zone.runtime().unwrap().applied.num_threads, 8);

        // And idempotent again afterwards.
        let before = in_process_stats(&ctx);
        zone.update(&ctx).unwrap();
        assert_eq!(before.total(), in_process_stats(&ctx).total());
    }

    #[test]
    fn test_unreachable_zone_host_errors() {
        let ctx = context();
        let mut zone = ZoneEngine::new("remote");
        zone.accept_config(ZoneConfig {
            host_uri: "tcp://127.0.0.1:1".to_string(),
            ..Default::default()
        });
        assert!(zone.update(&ctx).is_err());
        assert!(zone.runtime().is_none());
    }
}
