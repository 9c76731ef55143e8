//! Callable objects registered by host environments

use crate::error::{FlowgraphError, Result};
use crate::proxy::local::{LocalObject, ProxyCallable};
use crate::proxy::server::ProxyServer;
use crate::proxy::value::ObjectValue;
use crate::scripting::ExpressionEngine;
use crate::types::{BlockDescriptor, PortDesc, PropertyResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

static NEXT_BLOCK_UID: AtomicU64 = AtomicU64::new(1);

// ==================== Block Registry Object ====================

/// RPC surface over a [`BlockRegistry`](super::BlockRegistry)
pub struct RegistryObject {
    registry: Arc<super::BlockRegistry>,
}

impl RegistryObject {
    pub fn new(registry: Arc<super::BlockRegistry>) -> Self {
        Self { registry }
    }
}

impl ProxyCallable for RegistryObject {
    fn type_name(&self) -> &str {
        "BlockRegistry"
    }

    fn call(&self, method: &str, args: &[LocalObject]) -> Result<LocalObject> {
        match method {
            "describe" => {
                let path = args
                    .first()
                    .ok_or_else(|| FlowgraphError::Call("describe takes a path".to_string()))?
                    .as_str()?;
                let descriptor = self.registry.describe(path).ok_or_else(|| {
                    FlowgraphError::Call(format!("no block registered at '{}'", path))
                })?;
                Ok(LocalObject::Value(ObjectValue::Str(descriptor.to_json())))
            }
            "dumpJson" => Ok(LocalObject::Value(ObjectValue::Str(
                self.registry.dump_json(),
            ))),
            _ => Err(FlowgraphError::Call(format!(
                "BlockRegistry has no method '{}'",
                method
            ))),
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

// ==================== Evaluation Helper ====================

/// Reply document of `BlockEval::evalProperty`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalPropertyReply {
    pub result: PropertyResult,
    /// Present when the expression produced a representable value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ObjectValue>,
}

/// Factory for per-block evaluation helpers
pub struct EvalEnvironmentObject;

impl ProxyCallable for EvalEnvironmentObject {
    fn type_name(&self) -> &str {
        "EvalEnvironment"
    }

    fn call(&self, method: &str, _args: &[LocalObject]) -> Result<LocalObject> {
        match method {
            "newBlockEval" => Ok(LocalObject::Callable(Arc::new(BlockEvalObject::new()))),
            _ => Err(FlowgraphError::Call(format!(
                "EvalEnvironment has no method '{}'",
                method
            ))),
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Per-block evaluation helper
///
/// Owns the expression scope for one block: properties evaluate in the
/// order they arrive, successful values stay bound for later expressions,
/// and `eval` materializes the block object from the accumulated values.
pub struct BlockEvalObject {
    engine: Mutex<ExpressionEngine>,
    values: Mutex<HashMap<String, ObjectValue>>,
    block: Mutex<Option<Arc<GraphObject>>>,
}

impl BlockEvalObject {
    pub fn new() -> Self {
        Self {
            engine: Mutex::new(ExpressionEngine::new()),
            values: Mutex::new(HashMap::new()),
            block: Mutex::new(None),
        }
    }

    fn port_info(&self, outputs: bool) -> Result<LocalObject> {
        let block = self.block.lock().unwrap();
        let block = block
            .as_ref()
            .ok_or_else(|| FlowgraphError::Call("no block evaluated yet".to_string()))?;
        let ports = block.resolved_ports(outputs);
        Ok(LocalObject::Value(ObjectValue::Str(serde_json::to_string(
            &ports,
        )?)))
    }
}

impl ProxyCallable for BlockEvalObject {
    fn type_name(&self) -> &str {
        "BlockEval"
    }

    fn call(&self, method: &str, args: &[LocalObject]) -> Result<LocalObject> {
        match method {
            "evalProperty" => {
                let key = args
                    .first()
                    .ok_or_else(|| {
                        FlowgraphError::Call("evalProperty takes (key, expr)".to_string())
                    })?
                    .as_str()?;
                let expr = args
                    .get(1)
                    .ok_or_else(|| {
                        FlowgraphError::Call("evalProperty takes (key, expr)".to_string())
                    })?
                    .as_str()?;

                let evaluated = self.engine.lock().unwrap().eval_property(key, expr);
                if let Some(value) = &evaluated.value {
                    self.values
                        .lock()
                        .unwrap()
                        .insert(key.to_string(), value.clone());
                }
                let reply = EvalPropertyReply {
                    result: evaluated.result,
                    value: evaluated.value,
                };
                Ok(LocalObject::Value(ObjectValue::Str(serde_json::to_string(
                    &reply,
                )?)))
            }
            "eval" => {
                let id = args
                    .first()
                    .ok_or_else(|| {
                        FlowgraphError::Call("eval takes (id, descriptor)".to_string())
                    })?
                    .as_str()?;
                let descriptor_json = args
                    .get(1)
                    .ok_or_else(|| {
                        FlowgraphError::Call("eval takes (id, descriptor)".to_string())
                    })?
                    .as_str()?;

                let descriptor = BlockDescriptor::from_json(descriptor_json)?;
                let values = self.values.lock().unwrap().clone();
                let block = Arc::new(GraphObject::new(id, descriptor, values));
                *self.block.lock().unwrap() = Some(block.clone());
                tracing::trace!("Materialized block '{}' (uid {})", id, block.uid());
                Ok(LocalObject::Callable(block))
            }
            "inputPortInfo" => self.port_info(false),
            "outputPortInfo" => self.port_info(true),
            _ => Err(FlowgraphError::Call(format!(
                "BlockEval has no method '{}'",
                method
            ))),
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Default for BlockEvalObject {
    fn default() -> Self {
        Self::new()
    }
}

// ==================== Graph Object ====================

#[derive(Debug, Clone, PartialEq, Eq)]
struct ConnectionRecord {
    src_port: String,
    endpoint: String,
    dst_port: String,
}

/// An opaque materialized block instance
///
/// Block algorithms are out of scope; the object stores its evaluated
/// property values, answers its declared setter calls, and records the
/// connections and thread pool the topology engine attaches.
pub struct GraphObject {
    uid: u64,
    id: String,
    descriptor: BlockDescriptor,
    properties: Mutex<HashMap<String, ObjectValue>>,
    connections: Mutex<Vec<ConnectionRecord>>,
    thread_pool: Mutex<Option<String>>,
}

impl GraphObject {
    pub fn new(
        id: impl Into<String>,
        descriptor: BlockDescriptor,
        properties: HashMap<String, ObjectValue>,
    ) -> Self {
        Self {
            uid: NEXT_BLOCK_UID.fetch_add(1, AtomicOrdering::Relaxed),
            id: id.into(),
            descriptor,
            properties: Mutex::new(properties),
            connections: Mutex::new(Vec::new()),
            thread_pool: Mutex::new(None),
        }
    }

    /// Creation-unique id; survives setter calls, changes on re-creation
    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// Current value of a property
    pub fn property(&self, key: &str) -> Option<ObjectValue> {
        self.properties.lock().unwrap().get(key).cloned()
    }

    /// Port descriptors with property-valued dtypes substituted
    fn resolved_ports(&self, outputs: bool) -> Vec<PortDesc> {
        let declared = if outputs {
            &self.descriptor.outputs
        } else {
            &self.descriptor.inputs
        };
        let properties = self.properties.lock().unwrap();
        declared
            .iter()
            .map(|port| {
                let dtype = match properties.get(&port.dtype) {
                    Some(value) => value.display_string(),
                    None => port.dtype.clone(),
                };
                PortDesc::new(port.name.clone(), dtype)
            })
            .collect()
    }

    fn endpoint_of(arg: &LocalObject) -> String {
        match arg {
            LocalObject::Callable(callable) => {
                match callable.as_any().downcast_ref::<GraphObject>() {
                    Some(block) => format!("block:{}", block.uid),
                    None => format!("object:{}", callable.type_name()),
                }
            }
            LocalObject::Value(v) => v.display_string(),
        }
    }

    fn handle_setter(&self, name: &str, args: &[LocalObject]) -> Result<LocalObject> {
        let call = self
            .descriptor
            .calls
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| {
                FlowgraphError::Call(format!(
                    "block '{}' has no method '{}'",
                    self.descriptor.path, name
                ))
            })?;

        if args.len() != call.args.len() {
            return Err(FlowgraphError::Call(format!(
                "'{}' takes {} argument(s), got {}",
                name,
                call.args.len(),
                args.len()
            )));
        }

        let mut properties = self.properties.lock().unwrap();
        for (key, arg) in call.args.iter().zip(args) {
            properties.insert(key.clone(), arg.as_value()?.clone());
        }
        Ok(LocalObject::Value(ObjectValue::Null))
    }
}

impl ProxyCallable for GraphObject {
    fn type_name(&self) -> &str {
        "GraphObject"
    }

    fn call(&self, method: &str, args: &[LocalObject]) -> Result<LocalObject> {
        match method {
            "uid" => Ok(LocalObject::Value(ObjectValue::Int(self.uid as i64))),
            "setThreadPool" => {
                let arg = args.first().ok_or_else(|| {
                    FlowgraphError::Call("setThreadPool takes a pool".to_string())
                })?;
                let description = match arg.as_callable() {
                    Some(callable) => match callable.as_any().downcast_ref::<ThreadPoolObject>() {
                        Some(pool) => serde_json::to_string(&pool.params)?,
                        None => callable.type_name().to_string(),
                    },
                    None => arg.as_value()?.display_string(),
                };
                *self.thread_pool.lock().unwrap() = Some(description);
                Ok(LocalObject::Value(ObjectValue::Null))
            }
            "connect" => {
                let record = connection_from_args("connect", args)?;
                self.connections.lock().unwrap().push(record);
                Ok(LocalObject::Value(ObjectValue::Null))
            }
            "disconnect" => {
                let record = connection_from_args("disconnect", args)?;
                let mut connections = self.connections.lock().unwrap();
                let before = connections.len();
                connections.retain(|c| *c != record);
                if connections.len() == before {
                    return Err(FlowgraphError::Call(format!(
                        "block '{}' has no connection {} -> {}:{}",
                        self.id, record.src_port, record.endpoint, record.dst_port
                    )));
                }
                Ok(LocalObject::Value(ObjectValue::Null))
            }
            "numConnections" => Ok(LocalObject::Value(ObjectValue::Int(
                self.connections.lock().unwrap().len() as i64,
            ))),
            "inputPortInfo" => Ok(LocalObject::Value(ObjectValue::Str(serde_json::to_string(
                &self.resolved_ports(false),
            )?))),
            "outputPortInfo" => Ok(LocalObject::Value(ObjectValue::Str(
                serde_json::to_string(&self.resolved_ports(true))?,
            ))),
            other => self.handle_setter(other, args),
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

fn connection_from_args(method: &str, args: &[LocalObject]) -> Result<ConnectionRecord> {
    if args.len() != 3 {
        return Err(FlowgraphError::Call(format!(
            "'{}' takes (srcPort, endpoint, dstPort)",
            method
        )));
    }
    Ok(ConnectionRecord {
        src_port: args[0].as_str()?.to_string(),
        endpoint: GraphObject::endpoint_of(&args[1]),
        dst_port: args[2].as_str()?.to_string(),
    })
}

// ==================== Thread Pool ====================

/// Thread-pool creation policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadPoolParams {
    #[serde(default)]
    pub num_threads: usize,
    #[serde(default)]
    pub priority: f64,
    #[serde(default)]
    pub affinity_mode: crate::config::AffinityMode,
    #[serde(default)]
    pub affinity: Vec<usize>,
    #[serde(default)]
    pub yield_mode: crate::config::YieldMode,
}

impl ThreadPoolParams {
    fn validate(&self) -> Result<()> {
        if !(-1.0..=1.0).contains(&self.priority) {
            return Err(FlowgraphError::Config(format!(
                "thread pool priority {} outside [-1, 1]",
                self.priority
            )));
        }
        Ok(())
    }
}

/// Factory producing thread-pool objects from a policy document
pub struct ThreadPoolFactoryObject;

impl ProxyCallable for ThreadPoolFactoryObject {
    fn type_name(&self) -> &str {
        "ThreadPoolFactory"
    }

    fn call(&self, method: &str, args: &[LocalObject]) -> Result<LocalObject> {
        match method {
            "make" => {
                let json = args
                    .first()
                    .ok_or_else(|| {
                        FlowgraphError::Call("make takes a policy document".to_string())
                    })?
                    .as_str()?;
                let params: ThreadPoolParams = serde_json::from_str(json)
                    .map_err(|e| FlowgraphError::Config(format!("bad thread pool args: {}", e)))?;
                params.validate()?;
                tracing::trace!("Created thread pool: {:?}", params);
                Ok(LocalObject::Callable(Arc::new(ThreadPoolObject { params })))
            }
            _ => Err(FlowgraphError::Call(format!(
                "ThreadPoolFactory has no method '{}'",
                method
            ))),
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// A materialized thread pool
pub struct ThreadPoolObject {
    params: ThreadPoolParams,
}

impl ProxyCallable for ThreadPoolObject {
    fn type_name(&self) -> &str {
        "ThreadPool"
    }

    fn call(&self, method: &str, _args: &[LocalObject]) -> Result<LocalObject> {
        match method {
            "numThreads" => Ok(LocalObject::Value(ObjectValue::Int(
                self.params.num_threads as i64,
            ))),
            "describe" => Ok(LocalObject::Value(ObjectValue::Str(serde_json::to_string(
                &self.params,
            )?))),
            _ => Err(FlowgraphError::Call(format!(
                "ThreadPool has no method '{}'",
                method
            ))),
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

// ==================== Server Spawner ====================

/// Launches dedicated server processes on request
///
/// One server per process name: a second request for the same name
/// returns the already-bound port instead of spawning again.
pub struct ServerSpawnerObject {
    registry: Arc<super::BlockRegistry>,
    spawned: Mutex<HashMap<String, ProxyServer>>,
}

impl ServerSpawnerObject {
    pub fn new(registry: Arc<super::BlockRegistry>) -> Self {
        Self {
            registry,
            spawned: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live spawned servers (test inspection)
    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }
}

impl ProxyCallable for ServerSpawnerObject {
    fn type_name(&self) -> &str {
        "ServerSpawner"
    }

    fn call(&self, method: &str, args: &[LocalObject]) -> Result<LocalObject> {
        match method {
            "new" => {
                let bind_uri = args
                    .first()
                    .ok_or_else(|| {
                        FlowgraphError::Call("new takes (bindUri, processName)".to_string())
                    })?
                    .as_str()?
                    .to_string();
                let process_name = match args.get(1) {
                    Some(arg) => arg.as_str()?.to_string(),
                    None => String::new(),
                };

                let mut spawned = self.spawned.lock().unwrap();
                let port = match spawned.get(&process_name) {
                    Some(server) => server.port(),
                    None => {
                        let server = ProxyServer::serve(
                            super::host_environment(self.registry.clone()),
                            &bind_uri,
                        )?;
                        let port = server.port();
                        tracing::info!(
                            "Spawned server process '{}' on port {}",
                            process_name,
                            port
                        );
                        spawned.insert(process_name, server);
                        port
                    }
                };
                Ok(LocalObject::Callable(Arc::new(ServerHandleObject { port })))
            }
            _ => Err(FlowgraphError::Call(format!(
                "ServerSpawner has no method '{}'",
                method
            ))),
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Handle to a spawned server process
pub struct ServerHandleObject {
    port: u16,
}

impl ProxyCallable for ServerHandleObject {
    fn type_name(&self) -> &str {
        "ServerHandle"
    }

    fn call(&self, method: &str, _args: &[LocalObject]) -> Result<LocalObject> {
        match method {
            "getActualPort" => Ok(LocalObject::Value(ObjectValue::Int(self.port as i64))),
            _ => Err(FlowgraphError::Call(format!(
                "ServerHandle has no method '{}'",
                method
            ))),
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
