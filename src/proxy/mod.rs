//! Proxy layer: uniform RPC stubs over pluggable environments
//!
//! A [`Proxy`] is a copyable, reference-counted handle to an object owned
//! by some [`ProxyEnvironment`]. Three backends implement the capability
//! set:
//!
//! - [`LocalEnvironment`] - plain in-process object table
//! - [`ManagedEnvironment`] - in-process, serialized under a process-wide
//!   exclusive lock for single-threaded runtimes
//! - [`RemoteEnvironment`] - client for a server process reached over TCP
//!
//! [`ProxyServer`] is the other end of the transport: it serves a local
//! environment to remote clients. The engine context caches one
//! environment per distinct (host, process) pair.

pub mod environment;
pub mod handle;
pub mod local;
pub mod managed;
pub mod remote;
pub mod server;
pub mod value;
pub mod wire;

pub use environment::{EnvRef, EnvStats, ProxyEnvironment};
pub use handle::Proxy;
pub use local::{LocalEnvironment, LocalObject, ProxyCallable};
pub use managed::ManagedEnvironment;
pub use remote::RemoteEnvironment;
pub use server::ProxyServer;
pub use value::ObjectValue;

use crate::error::{FlowgraphError, Result};
use environment::{BACKEND_LOCAL, BACKEND_MANAGED, BACKEND_REMOTE};
use std::sync::Arc;
use std::time::Duration;

/// Construction arguments for [`make_environment`]
#[derive(Default)]
pub struct EnvironmentArgs {
    /// Object table for the in-process backends; a fresh one if absent
    pub base: Option<Arc<LocalEnvironment>>,
    /// Server URI for the remote backend
    pub uri: Option<String>,
    pub connect_timeout: Option<Duration>,
    pub call_timeout: Option<Duration>,
}

/// Construct an environment, selected by backend name
pub fn make_environment(backend: &str, args: EnvironmentArgs) -> Result<EnvRef> {
    match backend {
        BACKEND_LOCAL => Ok(args.base.unwrap_or_else(LocalEnvironment::new) as EnvRef),
        BACKEND_MANAGED => Ok(ManagedEnvironment::new(
            args.base.unwrap_or_else(LocalEnvironment::new),
        ) as EnvRef),
        BACKEND_REMOTE => {
            let uri = args.uri.ok_or_else(|| {
                FlowgraphError::Connect("remote backend requires a URI".to_string())
            })?;
            let connect_timeout = args
                .connect_timeout
                .unwrap_or(Duration::from_millis(crate::config::DEFAULT_CONNECT_TIMEOUT_MS));
            let call_timeout = args
                .call_timeout
                .unwrap_or(Duration::from_millis(crate::config::DEFAULT_CALL_TIMEOUT_MS));
            Ok(RemoteEnvironment::connect(&uri, connect_timeout, call_timeout)? as EnvRef)
        }
        other => Err(FlowgraphError::Config(format!(
            "unknown environment backend '{}'",
            other
        ))),
    }
}
