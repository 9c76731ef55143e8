//! The debounced evaluation engine
//!
//! One background worker thread consumes editor submissions and drives
//! the whole re-evaluation pass:
//!
//! 1. Coalesce: of everything submitted since the last pass, only the
//!    most recent snapshot survives (last-write-wins, never a queue).
//! 2. Update every zone engine, strictly before any block engine, since
//!    block materialization depends on a current environment and thread
//!    pool for its zone.
//! 3. Update every block engine, sequentially, in declared order.
//! 4. Commit the topology and publish per-block results.
//!
//! Zone and block engine maps are replaced wholesale each pass - engines
//! for surviving ids are reused, stale ones drop - so no callback state
//! outlives the graph that created it. Cancellation is cooperative and
//! observed only between passes; in-flight RPCs finish first.

use crate::eval::block::EvalGraphBlock;
use crate::eval::bridge::{EngineBridge, EngineEvent};
use crate::eval::context::EngineContext;
use crate::eval::zone::ZoneEngine;
use crate::topology::TopologyEngine;
use crate::types::GraphSnapshot;
use crossbeam_channel::Sender;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// Single-slot overwrite inbox
///
/// The debounce required by coalescing: a bounded queue of exactly one
/// pending snapshot, where a newer submission silently replaces an
/// unconsumed older one.
#[derive(Default)]
pub(crate) struct CoalescingSlot {
    inbox: Mutex<Inbox>,
    wake: Condvar,
}

#[derive(Default)]
struct Inbox {
    pending: Option<GraphSnapshot>,
    stop: bool,
}

impl CoalescingSlot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Replace any pending snapshot with this one and wake the worker
    pub(crate) fn push(&self, snapshot: GraphSnapshot) {
        let mut inbox = self.inbox.lock().unwrap();
        inbox.pending = Some(snapshot);
        self.wake.notify_one();
    }

    /// Request a stop, observed by the worker between passes
    pub(crate) fn request_stop(&self) {
        let mut inbox = self.inbox.lock().unwrap();
        inbox.stop = true;
        self.wake.notify_one();
    }

    /// Block until a snapshot or stop arrives; `None` means stop
    pub(crate) fn wait_take(&self) -> Option<GraphSnapshot> {
        let mut inbox = self.inbox.lock().unwrap();
        loop {
            if inbox.stop {
                return None;
            }
            if let Some(snapshot) = inbox.pending.take() {
                return Some(snapshot);
            }
            inbox = self.wake.wait(inbox).unwrap();
        }
    }

    /// Non-blocking take, for tests
    #[cfg(test)]
    pub(crate) fn try_take(&self) -> Option<GraphSnapshot> {
        self.inbox.lock().unwrap().pending.take()
    }
}

/// The engine facade owned by the editor
///
/// `submit` never blocks on RPC; the worker thread is the sole RPC
/// issuer for orchestration decisions. Dropping the engine stops and
/// joins the worker.
pub struct EvalEngine {
    slot: Arc<CoalescingSlot>,
    worker: Option<JoinHandle<()>>,
}

impl EvalEngine {
    /// Start the worker thread; returns the engine and the event bridge
    pub fn start(ctx: Arc<EngineContext>) -> (Self, EngineBridge) {
        let (bridge, event_tx) = EngineBridge::new();
        let slot = Arc::new(CoalescingSlot::new());

        let worker_slot = slot.clone();
        let worker = std::thread::spawn(move || {
            let mut worker = EvalWorker::new(ctx, event_tx);
            worker.run(&worker_slot);
        });

        (
            Self {
                slot,
                worker: Some(worker),
            },
            bridge,
        )
    }

    /// Submit a graph snapshot from any editor thread
    pub fn submit(&self, snapshot: GraphSnapshot) {
        self.slot.push(snapshot);
    }

    /// Ask the worker to stop after the current pass
    pub fn stop_eval_thread(&self) {
        self.slot.request_stop();
    }

    /// Join the worker thread
    pub fn join(&mut self) {
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EvalEngine {
    fn drop(&mut self) {
        self.stop_eval_thread();
        self.join();
    }
}

// ==================== Worker ====================

struct EvalWorker {
    ctx: Arc<EngineContext>,
    events: Sender<EngineEvent>,
    zones: HashMap<String, ZoneEngine>,
    blocks: HashMap<String, EvalGraphBlock>,
    topology: TopologyEngine,
    pass: u64,
}

impl EvalWorker {
    fn new(ctx: Arc<EngineContext>, events: Sender<EngineEvent>) -> Self {
        Self {
            ctx,
            events,
            zones: HashMap::new(),
            blocks: HashMap::new(),
            topology: TopologyEngine::new(),
            pass: 0,
        }
    }

    fn run(&mut self, slot: &CoalescingSlot) {
        tracing::info!("Eval engine thread started");
        while let Some(snapshot) = slot.wait_take() {
            self.evaluate_pass(snapshot);
        }
        tracing::info!("Eval engine thread exiting");
    }

    fn evaluate_pass(&mut self, snapshot: GraphSnapshot) {
        self.pass += 1;
        tracing::debug!(
            "Pass {}: {} block(s), {} connection(s), {} zone(s)",
            self.pass,
            snapshot.blocks.len(),
            snapshot.connections.len(),
            snapshot.zones.len()
        );

        // Wholesale description refresh when the host list changes.
        let mut hosts: BTreeSet<String> =
            self.ctx.settings().hosts.iter().cloned().collect();
        for config in snapshot.zones.values() {
            if !config.host_uri.is_empty() {
                hosts.insert(config.host_uri.clone());
            }
        }
        self.ctx.update_hosts(hosts.into_iter().collect());

        // Fresh zone map covering every referenced zone; engines for
        // surviving names are reused so their runtimes carry over.
        let mut referenced: BTreeSet<String> = BTreeSet::new();
        for block in &snapshot.blocks {
            referenced.insert(block.zone.clone());
        }
        let mut zones: HashMap<String, ZoneEngine> = HashMap::new();
        for name in referenced {
            let mut zone = self
                .zones
                .remove(&name)
                .unwrap_or_else(|| ZoneEngine::new(name.clone()));
            zone.accept_config(snapshot.zones.get(&name).cloned().unwrap_or_default());
            zones.insert(name, zone);
        }
        self.zones = zones;

        // Every zone updates before any block does.
        let mut zone_errors: HashMap<String, String> = HashMap::new();
        let mut zone_names: Vec<String> = self.zones.keys().cloned().collect();
        zone_names.sort();
        for name in &zone_names {
            if let Some(zone) = self.zones.get_mut(name) {
                if let Err(e) = zone.update(&self.ctx) {
                    tracing::warn!("Zone '{}' failed to update: {}", name, e);
                    let _ = self.events.send(EngineEvent::ZoneError {
                        zone: name.clone(),
                        error: e.to_string(),
                    });
                    zone_errors.insert(name.clone(), e.to_string());
                }
            }
        }

        // Fresh block map: reuse engines for surviving ids, drop stale.
        let order: Vec<String> = snapshot.blocks.iter().map(|b| b.id.clone()).collect();
        let mut blocks: HashMap<String, EvalGraphBlock> = HashMap::new();
        for info in snapshot.blocks {
            let id = info.id.clone();
            let block = match self.blocks.remove(&id) {
                Some(mut existing) => {
                    existing.set_info(info);
                    existing
                }
                None => EvalGraphBlock::new(info),
            };
            blocks.insert(id, block);
        }
        self.blocks = blocks;

        // Sequential block updates in declared order.
        for id in &order {
            let Some(block) = self.blocks.get_mut(id) else {
                continue;
            };
            let zone_name = block.zone_name().to_string();
            if let Some(error) = zone_errors.get(&zone_name) {
                block.fail(format!("zone '{}' unavailable: {}", zone_name, error));
                continue;
            }
            match self.zones.get(&zone_name).and_then(|z| z.runtime()) {
                Some(runtime) => block.evaluate(&self.ctx, runtime),
                None => block.fail(format!("zone '{}' has no runtime", zone_name)),
            }
        }

        // Transactional topology replacement.
        let commit_errors =
            self.topology
                .commit_update(&order, &self.blocks, &self.zones, &snapshot.connections);

        // Publish per-block outcomes.
        for id in &order {
            let Some(block) = self.blocks.get(id) else {
                continue;
            };
            let mut errors: Vec<String> = block.errors().to_vec();
            errors.extend(
                commit_errors
                    .iter()
                    .filter(|(block_id, _)| block_id == id)
                    .map(|(_, message)| message.clone()),
            );
            let _ = self.events.send(EngineEvent::BlockStatus {
                id: id.clone(),
                errors,
                properties: block.property_results().clone(),
                inputs: block.input_ports().to_vec(),
                outputs: block.output_ports().to_vec(),
            });
        }
        let _ = self.events.send(EngineEvent::EvalDone { pass: self.pass });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineSettings;
    use crate::host::BlockRegistry;
    use crate::types::{BlockDescriptor, CallDesc, GraphBlockInfo, ParamDesc, PortDesc};
    use std::time::Duration;

    fn registry() -> Arc<BlockRegistry> {
        let registry = BlockRegistry::new();
        registry.register(BlockDescriptor {
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
        });
        registry
    }

    fn block(id: &str, gain: &str) -> GraphBlockInfo {
        GraphBlockInfo {
            id: id.to_string(),
            path: "/blocks/gain".to_string(),
            zone: String::new(),
            properties: vec![
                ("dtype".to_string(), "\"float32\"".to_string()),
                ("gain".to_string(), gain.to_string()),
            ],
        }
    }

    fn snapshot(gain: &str) -> GraphSnapshot {
        GraphSnapshot {
            blocks: vec![block("b0", gain)],
            ..Default::default()
        }
    }

    #[test]
    fn test_slot_keeps_only_latest() {
        let slot = CoalescingSlot::new();
        slot.push(snapshot("1.0"));
        slot.push(snapshot("2.0"));
        slot.push(snapshot("3.0"));

        let taken = slot.try_take().unwrap();
        assert_eq!(taken.blocks[0].properties[1].1, "3.0");
        assert!(slot.try_take().is_none());
    }

    #[test]
    fn test_slot_stop_wins_over_pending() {
        let slot = CoalescingSlot::new();
        slot.push(snapshot("1.0"));
        slot.request_stop();
        assert!(slot.wait_take().is_none());
    }

    #[test]
    fn test_engine_evaluates_and_reports_done() {
        let ctx = EngineContext::new(EngineSettings::default(), registry());
        let (engine, bridge) = EvalEngine::start(ctx);

        engine.submit(snapshot("2.0"));
        let events = bridge.wait_eval_done(Duration::from_secs(5));
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::EvalDone { .. })));

        let status = events.iter().find_map(|e| match e {
            EngineEvent::BlockStatus { id, errors, .. } if id == "b0" => Some(errors.clone()),
            _ => None,
        });
        assert_eq!(status.unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_submissions_coalesce_to_latest_content() {
        let ctx = EngineContext::new(EngineSettings::default(), registry());
        let (engine, bridge) = EvalEngine::start(ctx);

        // A burst of edits; the engine must converge on the last one.
        engine.submit(snapshot("1.0"));
        engine.submit(snapshot("2.0"));
        engine.submit(snapshot("3.0"));

        let mut last_display = None;
        for _ in 0..4 {
            let events = bridge.wait_eval_done(Duration::from_secs(5));
            if events.is_empty() {
                break;
            }
            for event in events {
                if let EngineEvent::BlockStatus { properties, .. } = event {
                    if let Some(result) = properties.get("gain") {
                        last_display = Some(result.display_string.clone());
                    }
                }
            }
        }
        assert_eq!(last_display.as_deref(), Some("3"));
    }

    #[test]
    fn test_stale_block_dropped_on_next_pass() {
        let ctx = EngineContext::new(EngineSettings::default(), registry());
        let (engine, bridge) = EvalEngine::start(ctx);

        let mut two = snapshot("1.0");
        two.blocks.push(block("b1", "2.0"));
        engine.submit(two);
        bridge.wait_eval_done(Duration::from_secs(5));

        engine.submit(snapshot("1.0"));
        let events = bridge.wait_eval_done(Duration::from_secs(5));
        let ids: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::BlockStatus { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["b0"]);
    }

    #[test]
    fn test_stop_and_join_is_clean() {
        let ctx = EngineContext::new(EngineSettings::default(), registry());
        let (mut engine, _bridge) = EvalEngine::start(ctx);
        engine.submit(snapshot("1.0"));
        engine.stop_eval_thread();
        engine.join();
    }
}
