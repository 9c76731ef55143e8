//! Per-block materialization
//!
//! `EvalGraphBlock` turns one declared graph node into a live remote
//! object. A content hash over {path, id, pid of the target environment,
//! zone, all property pairs} gates the work: a hash hit reuses the cached
//! proxy with zero RPCs, a non-critical miss re-applies only the changed
//! setters, and a critical miss recreates the object through a fresh
//! evaluation helper.

use crate::error::FlowgraphError;
use crate::eval::block_cache::{EvalBlockCache, PropertyEvaluator};
use crate::eval::context::EngineContext;
use crate::eval::zone::ZoneRuntime;
use crate::host::EvalPropertyReply;
use crate::proxy::handle::Proxy;
use crate::proxy::value::ObjectValue;
use crate::scripting::EvaluatedProperty;
use crate::types::{GraphBlockInfo, PortDesc, PropertyResult};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Content hash of one block's full configuration
pub fn content_hash(info: &GraphBlockInfo, pid: u32) -> u64 {
    let mut hasher = DefaultHasher::new();
    info.path.hash(&mut hasher);
    info.id.hash(&mut hasher);
    pid.hash(&mut hasher);
    info.zone.hash(&mut hasher);
    for (key, value) in &info.properties {
        key.hash(&mut hasher);
        value.hash(&mut hasher);
    }
    hasher.finish()
}

/// Drives property evaluation through a remote helper object
struct RemotePropertyEvaluator<'a> {
    helper: &'a Proxy,
}

impl PropertyEvaluator for RemotePropertyEvaluator<'_> {
    fn eval_property(&self, key: &str, expr: &str) -> EvaluatedProperty {
        let reply = self.helper.call_values(
            "evalProperty",
            &[
                ObjectValue::Str(key.to_string()),
                ObjectValue::Str(expr.to_string()),
            ],
        );
        let parsed = reply
            .and_then(|p| p.to_object())
            .and_then(|v| match v {
                ObjectValue::Str(json) => {
                    serde_json::from_str::<EvalPropertyReply>(&json).map_err(FlowgraphError::from)
                }
                other => Err(FlowgraphError::Serialization(format!(
                    "evalProperty returned {}",
                    other.type_string()
                ))),
            });
        match parsed {
            Ok(reply) => EvaluatedProperty {
                result: reply.result,
                value: reply.value,
            },
            Err(e) => EvaluatedProperty::err(e.to_string()),
        }
    }
}

/// Materialization state of one graph block
pub struct EvalGraphBlock {
    info: GraphBlockInfo,
    cache: EvalBlockCache,
    /// Evaluation helper in the zone's environment, kept across setter
    /// passes so the expression scope survives
    helper: Option<Proxy>,
    proxy: Option<Proxy>,
    hash: Option<u64>,
    inputs: Vec<PortDesc>,
    outputs: Vec<PortDesc>,
    errors: Vec<String>,
}

impl EvalGraphBlock {
    pub fn new(info: GraphBlockInfo) -> Self {
        Self {
            info,
            cache: EvalBlockCache::new(),
            helper: None,
            proxy: None,
            hash: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn zone_name(&self) -> &str {
        &self.info.zone
    }

    /// Replace the declared state for the next evaluation
    pub fn set_info(&mut self, info: GraphBlockInfo) {
        self.info = info;
    }

    /// The live remote object, when materialization last succeeded
    pub fn proxy(&self) -> Option<&Proxy> {
        self.proxy.as_ref()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn input_ports(&self) -> &[PortDesc] {
        &self.inputs
    }

    pub fn output_ports(&self) -> &[PortDesc] {
        &self.outputs
    }

    /// Last evaluation result per property
    pub fn property_results(&self) -> &HashMap<String, PropertyResult> {
        self.cache.results()
    }

    /// Record a failure without touching cached state
    pub fn fail(&mut self, message: impl Into<String>) {
        self.errors.clear();
        self.errors.push(message.into());
        self.hash = None;
    }

    /// Materialize or refresh this block inside its zone
    ///
    /// Failures attach to this block only: the error list fills, the hash
    /// clears so the next pass retries, and any previously materialized
    /// proxy is left for the topology to keep using until corrected.
    pub fn evaluate(&mut self, ctx: &Arc<EngineContext>, zone: &ZoneRuntime) {
        self.errors.clear();

        if self.info.id.is_empty() {
            self.fail("block has an empty id");
            return;
        }

        let descriptor = match ctx.lookup_description(&self.info.path) {
            Ok(d) => d,
            Err(e) => {
                self.fail(format!("no description for '{}': {}", self.info.path, e));
                return;
            }
        };

        let hash = content_hash(&self.info, zone.environment.pid());
        if self.hash == Some(hash) && self.proxy.is_some() {
            tracing::trace!("Block '{}' unchanged, cache hit", self.info.id);
            return;
        }

        self.cache.stage(descriptor.clone(), &self.info.properties);

        // The helper is only reusable inside the environment it was
        // created in; a zone move forces recreation.
        let helper_env_matches = self
            .helper
            .as_ref()
            .and_then(|h| h.environment().map(|e| e.env_id()))
            == Some(zone.environment.env_id());
        let recreate = self.proxy.is_none()
            || !helper_env_matches
            || self.cache.has_critical_change();

        if recreate {
            self.inputs.clear();
            self.outputs.clear();
            match zone.new_block_eval() {
                Ok(helper) => self.helper = Some(helper),
                Err(e) => {
                    self.fail(format!("cannot create evaluation helper: {}", e));
                    return;
                }
            }
            self.cache.reset();
        }

        let helper = match &self.helper {
            Some(h) => h.clone(),
            None => {
                self.fail("no evaluation helper");
                return;
            }
        };

        let evaluator = RemotePropertyEvaluator { helper: &helper };
        if !self.cache.update_changed_properties(&evaluator) {
            for (key, message) in self.cache.property_errors() {
                self.errors.push(format!("property '{}': {}", key, message));
            }
            // Abort this block only; siblings and prior topology state
            // stay untouched.
            self.hash = None;
            return;
        }

        if recreate {
            let created = helper.call_values(
                "eval",
                &[
                    ObjectValue::Str(self.info.id.clone()),
                    ObjectValue::Str(descriptor.to_json()),
                ],
            );
            match created {
                Ok(proxy) => self.proxy = Some(proxy),
                Err(e) => {
                    self.fail(format!("block creation failed: {}", e));
                    return;
                }
            }
            match self.fetch_ports(&helper) {
                Ok((inputs, outputs)) => {
                    self.inputs = inputs;
                    self.outputs = outputs;
                }
                Err(e) => {
                    self.fail(format!("port query failed: {}", e));
                    return;
                }
            }
        } else {
            let proxy = match &self.proxy {
                Some(p) => p.clone(),
                None => {
                    self.fail("no materialized object");
                    return;
                }
            };
            for call in self.cache.setters_changed_list() {
                let args: Result<Vec<ObjectValue>, FlowgraphError> = call
                    .args
                    .iter()
                    .map(|key| {
                        self.cache.value(key).cloned().ok_or_else(|| {
                            FlowgraphError::Evaluation(format!(
                                "property '{}' has no value for '{}'",
                                key, call.name
                            ))
                        })
                    })
                    .collect();
                let applied = args.and_then(|args| proxy.call_values(&call.name, &args));
                if let Err(e) = applied {
                    self.fail(format!("setter '{}' failed: {}", call.name, e));
                    return;
                }
            }
        }

        self.hash = Some(hash);
        self.cache.commit();
    }

    fn fetch_ports(&self, helper: &Proxy) -> crate::error::Result<(Vec<PortDesc>, Vec<PortDesc>)> {
        let parse = |reply: Proxy| -> crate::error::Result<Vec<PortDesc>> {
            match reply.to_object()? {
                ObjectValue::Str(json) => Ok(serde_json::from_str(&json)?),
                other => Err(FlowgraphError::Serialization(format!(
                    "port info returned {}",
                    other.type_string()
                ))),
            }
        };
        let inputs = parse(helper.call("inputPortInfo", &[])?)?;
        let outputs = parse(helper.call("outputPortInfo", &[])?)?;
        Ok((inputs, outputs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineSettings, ZoneConfig};
    use crate::eval::zone::ZoneEngine;
    use crate::host::BlockRegistry;
    use crate::types::{BlockDescriptor, CallDesc, ParamDesc};

    fn gain_descriptor() -> BlockDescriptor {
        BlockDescriptor {
            path: "/blocks/gain".to_string(),
            name: "Gain".to_string(),
            params: vec![
                ParamDesc::new("dtype", "\"float32\""),
                ParamDesc::new("gain", "1.0"),
            ],
            args: vec!["dtype".to_string()],
            calls: vec![CallDesc::setter("setGain", "gain")],
            inputs: vec![PortDesc::new("0", "dtype")],
            outputs: vec![PortDesc::new("0", "dtype")],
            ..Default::default()
        }
    }

    fn fixture() -> (Arc<EngineContext>, ZoneEngine) {
        let registry = BlockRegistry::new();
        registry.register(gain_descriptor());
        let ctx = EngineContext::new(EngineSettings::default(), registry);
        let mut zone = ZoneEngine::new("");
        zone.accept_config(ZoneConfig::default());
        zone.update(&ctx).unwrap();
        (ctx, zone)
    }

    fn info(gain: &str) -> GraphBlockInfo {
        GraphBlockInfo {
            id: "b0".to_string(),
            path: "/blocks/gain".to_string(),
            zone: String::new(),
            properties: vec![
                ("dtype".to_string(), "\"float32\"".to_string()),
                ("gain".to_string(), gain.to_string()),
            ],
        }
    }

    fn remote_uid(block: &EvalGraphBlock) -> i64 {
        block
            .proxy()
            .unwrap()
            .call("uid", &[])
            .unwrap()
            .to_object()
            .unwrap()
            .as_int()
            .unwrap()
    }

    #[test]
    fn test_first_evaluation_materializes() {
        let (ctx, zone) = fixture();
        let mut block = EvalGraphBlock::new(info("2.0"));
        block.evaluate(&ctx, zone.runtime().unwrap());

        assert!(!block.has_errors(), "errors: {:?}", block.errors());
        assert!(block.proxy().is_some());
        assert_eq!(block.input_ports()[0].dtype, "float32");
        assert!(block.property_results().get("gain").unwrap().is_ok());
    }

    #[test]
    fn test_hash_hit_issues_zero_rpcs() {
        let (ctx, zone) = fixture();
        let mut block = EvalGraphBlock::new(info("2.0"));
        block.evaluate(&ctx, zone.runtime().unwrap());
        assert!(!block.has_errors());

        let env = ctx.in_process_environment();
        let before = env.stats();
        block.evaluate(&ctx, zone.runtime().unwrap());
        assert_eq!(env.stats().total(), before.total());
    }

    #[test]
    fn test_unrelated_edit_is_one_setter_no_recreate() {
        let (ctx, zone) = fixture();
        let mut block = EvalGraphBlock::new(info("2.0"));
        block.evaluate(&ctx, zone.runtime().unwrap());
        let uid_before = remote_uid(&block);

        let env = ctx.in_process_environment();
        let before = env.stats();
        block.set_info(info("3.0"));
        block.evaluate(&ctx, zone.runtime().unwrap());
        let after = env.stats();

        assert!(!block.has_errors(), "errors: {:?}", block.errors());
        // Same remote object: a setter pass, not a recreation.
        assert_eq!(remote_uid(&block), uid_before);
        // Exactly two invocations: re-evaluate the property, apply the setter.
        assert_eq!(after.method_calls - before.method_calls, 2);
        assert_eq!(after.find_proxy_calls, before.find_proxy_calls);
    }

    #[test]
    fn test_critical_edit_recreates() {
        let (ctx, zone) = fixture();
        let mut block = EvalGraphBlock::new(info("2.0"));
        block.evaluate(&ctx, zone.runtime().unwrap());
        let uid_before = remote_uid(&block);

        let mut changed = info("2.0");
        changed.properties[0].1 = "\"cfloat64\"".to_string();
        block.set_info(changed);
        block.evaluate(&ctx, zone.runtime().unwrap());

        assert!(!block.has_errors());
        assert_ne!(remote_uid(&block), uid_before);
    }

    #[test]
    fn test_property_error_aborts_block_but_keeps_prior_object() {
        let (ctx, zone) = fixture();
        let mut block = EvalGraphBlock::new(info("2.0"));
        block.evaluate(&ctx, zone.runtime().unwrap());
        let uid_before = remote_uid(&block);

        let mut broken = info("2.0");
        broken.properties[1].1 = "bad(".to_string();
        block.set_info(broken);
        block.evaluate(&ctx, zone.runtime().unwrap());

        assert!(block.has_errors());
        assert!(block.errors()[0].contains("property 'gain'"));
        // The previously materialized object is still there.
        assert_eq!(remote_uid(&block), uid_before);

        // Correcting the property recovers on the next pass.
        block.set_info(info("4.0"));
        block.evaluate(&ctx, zone.runtime().unwrap());
        assert!(!block.has_errors(), "errors: {:?}", block.errors());
    }

    #[test]
    fn test_unknown_path_is_block_error() {
        let (ctx, zone) = fixture();
        let mut block = EvalGraphBlock::new(GraphBlockInfo {
            id: "b1".to_string(),
            path: "/blocks/unknown".to_string(),
            ..Default::default()
        });
        block.evaluate(&ctx, zone.runtime().unwrap());
        assert!(block.has_errors());
        assert!(block.proxy().is_none());
    }

    #[test]
    fn test_empty_id_is_block_error() {
        let (ctx, zone) = fixture();
        let mut block = EvalGraphBlock::new(GraphBlockInfo::default());
        block.evaluate(&ctx, zone.runtime().unwrap());
        assert!(block.has_errors());
    }

    #[test]
    fn test_content_hash_sensitivity() {
        let base = info("2.0");
        let h = content_hash(&base, 100);
        assert_eq!(h, content_hash(&base, 100));
        assert_ne!(h, content_hash(&base, 101));

        let mut moved = base.clone();
        moved.zone = "worker".to_string();
        assert_ne!(h, content_hash(&moved, 100));

        let mut edited = base.clone();
        edited.properties[1].1 = "3.0".to_string();
        assert_ne!(h, content_hash(&edited, 100));
    }
}
