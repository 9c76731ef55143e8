//! # flowgraph-rs: dataflow block-evaluation and topology orchestration
//!
//! The engine that turns a declarative graph description - blocks,
//! connections, per-block affinity-zone assignment - into a running,
//! possibly multi-host dataflow topology. The graph editor producing
//! those descriptions is the external consumer; block signal-processing
//! algorithms are opaque to this crate.
//!
//! ## Architecture
//!
//! - **Proxy layer**: uniform RPC stubs over in-process, lock-serialized,
//!   and TCP-remote environments
//! - **Host services**: block registries, evaluation helpers, thread-pool
//!   factories and server spawners every participating host exposes
//! - **Description cache**: process-wide path -> descriptor map with
//!   first-reachable-host lookup and concurrent merged refresh
//! - **Eval engine**: one debounced worker coalescing edits into single
//!   passes; zones update before blocks; content hashes skip work that
//!   has not changed
//! - **Topology engine**: transactional replace-all of the committed
//!   connection set
//!
//! ## Example
//!
//! ```ignore
//! use flowgraph_rs::{
//!     config::EngineSettings,
//!     eval::{EngineContext, EvalEngine},
//!     host::BlockRegistry,
//!     types::GraphSnapshot,
//! };
//!
//! // The local registry carries the blocks an in-process zone can build.
//! let registry = BlockRegistry::new();
//!
//! let ctx = EngineContext::new(EngineSettings::load_or_default(), registry);
//! let (engine, bridge) = EvalEngine::start(ctx);
//!
//! // The editor submits snapshots from any thread; the engine coalesces
//! // bursts and applies only the latest one.
//! engine.submit(GraphSnapshot::default());
//!
//! for event in bridge.drain() {
//!     // Feed block errors, property types and port info back to the UI.
//!     let _ = event;
//! }
//! ```

pub mod config;
pub mod describe;
pub mod error;
pub mod eval;
pub mod host;
pub mod proxy;
pub mod scripting;
pub mod topology;
pub mod types;

// Re-export commonly used types
pub use config::{EngineSettings, ZoneConfig, ZoneConfigStore};
pub use error::{FlowgraphError, Result};
pub use eval::{EngineBridge, EngineContext, EngineEvent, EvalEngine};
pub use host::{BlockRegistry, HostListener};
pub use proxy::{EnvRef, ObjectValue, Proxy, ProxyEnvironment};
pub use topology::TopologyEngine;
pub use types::{BlockDescriptor, ConnectionInfo, GraphBlockInfo, GraphSnapshot};
