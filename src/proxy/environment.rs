//! The `ProxyEnvironment` capability trait
//!
//! A proxy environment is a call-capable backend holding opaque object
//! references: the engine's own process (local/managed) or a server
//! process reached over a transport (remote). All backends expose the
//! same capability set; the engine never downcasts.
//!
//! Environments are selected by backend name at construction and cached
//! per distinct (host, process) pair by the engine context.

use crate::error::{FlowgraphError, Result};
use crate::proxy::handle::Proxy;
use crate::proxy::value::ObjectValue;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Shared reference to a proxy environment
pub type EnvRef = Arc<dyn ProxyEnvironment>;

/// Backend name of the in-process environment
pub const BACKEND_LOCAL: &str = "local";
/// Backend name of the lock-serialized in-process environment
pub const BACKEND_MANAGED: &str = "managed";
/// Backend name of the TCP client environment
pub const BACKEND_REMOTE: &str = "remote";

static NEXT_ENV_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique environment id
pub(crate) fn next_env_id() -> u64 {
    NEXT_ENV_ID.fetch_add(1, AtomicOrdering::Relaxed)
}

/// RPC statistics for one environment
///
/// Snapshots are cheap to copy; tests assert on deltas to prove
/// idempotence (an unchanged zone update must not move these counters).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvStats {
    /// Number of find_proxy resolutions issued
    pub find_proxy_calls: u64,
    /// Number of method invocations issued
    pub method_calls: u64,
    /// Number of invocations that returned an error
    pub failed_calls: u64,
}

impl EnvStats {
    /// Total RPC-shaped operations issued through this environment
    pub fn total(&self) -> u64 {
        self.find_proxy_calls + self.method_calls
    }

    pub(crate) fn record_find(&mut self) {
        self.find_proxy_calls += 1;
    }

    pub(crate) fn record_call(&mut self) {
        self.method_calls += 1;
    }

    pub(crate) fn record_failure(&mut self) {
        self.failed_calls += 1;
    }
}

/// Uniform RPC-stub backend
///
/// All object-returning operations hand back [`Proxy`] handles bound to
/// this environment. Object lifetime is reference-counted by the
/// environment: a proxy clone adds a reference, a drop releases one, and
/// the object lives as long as its longest holder.
pub trait ProxyEnvironment: Send + Sync + std::fmt::Debug {
    /// Backend name ("local", "managed", "remote")
    fn backend_name(&self) -> &str;

    /// Identity of the backing object table
    ///
    /// Two environment values sharing one table (a local environment and
    /// its managed wrapper) report the same id; handles pass between them
    /// directly.
    fn env_id(&self) -> u64;

    /// Connection URI for transports, `None` for in-process backends
    fn connection_uri(&self) -> Option<String> {
        None
    }

    /// Pid of the process owning the objects
    fn pid(&self) -> u32;

    /// Resolve a well-known registered object by name
    fn find_proxy(&self, name: &str) -> Result<Proxy>;

    /// Invoke a named method, blocking for the RPC round trip
    ///
    /// Arguments belonging to another environment are translated into
    /// this one first; plain values transfer by value, opaque objects
    /// fail over through their serialized representation.
    fn call(&self, proxy: &Proxy, method: &str, args: &[Proxy]) -> Result<Proxy>;

    /// Wrap a plain value as an object of this environment
    fn convert_object_to_proxy(&self, value: ObjectValue) -> Result<Proxy>;

    /// Extract the plain value of an object, failing for opaque objects
    fn convert_proxy_to_object(&self, proxy: &Proxy) -> Result<ObjectValue>;

    /// Serialize an object reference to a portable string
    fn serialize_proxy(&self, proxy: &Proxy) -> Result<String>;

    /// Resolve a string produced by [`serialize_proxy`](Self::serialize_proxy)
    fn deserialize_proxy(&self, data: &str) -> Result<Proxy>;

    /// Order two objects of this environment
    ///
    /// Fails with a compare error for pairs with no defined order rather
    /// than returning an arbitrary one.
    fn compare(&self, a: &Proxy, b: &Proxy) -> Result<Ordering>;

    /// Content hash of an object
    fn hash_proxy(&self, proxy: &Proxy) -> u64;

    /// Increment an object's reference count
    fn add_ref(&self, handle: u64);

    /// Decrement an object's reference count, destroying at zero
    fn release(&self, handle: u64);

    /// Whether the backend is still usable
    ///
    /// Lazy for transports: reads a liveness flag flipped by failed
    /// requests, never issues a probe RPC of its own.
    fn is_alive(&self) -> bool {
        true
    }

    /// Snapshot of this environment's RPC statistics
    fn stats(&self) -> EnvStats;
}

/// Look up the error used for calls on null-backed handles
pub(crate) fn null_call_error(method: &str) -> FlowgraphError {
    FlowgraphError::Call(format!("cannot call '{}' on a null handle", method))
}
