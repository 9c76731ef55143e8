//! TCP server exposing a local environment
//!
//! `ProxyServer` serves one [`LocalEnvironment`] to any number of client
//! connections, one handler thread per connection. Every handle a
//! connection creates is tracked and released when the connection closes,
//! so a crashed client cannot leak server-side objects.

use crate::error::{FlowgraphError, Result};
use crate::proxy::local::{LocalEnvironment, LocalObject};
use crate::proxy::remote::parse_tcp_uri;
use crate::proxy::wire::{
    read_frame, write_frame, WireArg, WireError, WireOp, WireReply, WireRequest, WireResponse,
};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::io::BufReader;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Serves a local environment over TCP
pub struct ProxyServer {
    env: Arc<LocalEnvironment>,
    port: u16,
    running: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl ProxyServer {
    /// Bind and start serving. A port of 0 in the bind URI selects an
    /// ephemeral port; read it back via [`port`](Self::port).
    pub fn serve(env: Arc<LocalEnvironment>, bind_uri: &str) -> Result<Self> {
        let (host, port) = parse_tcp_uri(bind_uri, 0)?;
        let listener = TcpListener::bind((host.as_str(), port)).map_err(|e| {
            FlowgraphError::Connect(format!("bind to '{}' failed: {}", bind_uri, e))
        })?;
        let port = listener.local_addr()?.port();
        listener.set_nonblocking(true)?;
        env.set_uri(format!("tcp://{}:{}", host, port));

        let running = Arc::new(AtomicBool::new(true));
        let accept_env = env.clone();
        let accept_running = running.clone();
        let accept_thread = std::thread::spawn(move || {
            accept_loop(listener, accept_env, accept_running);
        });

        tracing::info!("Proxy server listening on port {}", port);
        Ok(Self {
            env,
            port,
            running,
            accept_thread: Some(accept_thread),
        })
    }

    /// The bound port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The served environment
    pub fn env(&self) -> &Arc<LocalEnvironment> {
        &self.env
    }

    /// Stop accepting connections and join the accept thread
    ///
    /// Connection handler threads end when their client disconnects.
    pub fn shutdown(&mut self) {
        self.running.store(false, AtomicOrdering::Relaxed);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        tracing::info!("Proxy server on port {} shut down", self.port);
    }
}

impl Drop for ProxyServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(listener: TcpListener, env: Arc<LocalEnvironment>, running: Arc<AtomicBool>) {
    while running.load(AtomicOrdering::Relaxed) {
        match listener.accept() {
            Ok((stream, peer)) => {
                tracing::trace!("Accepted proxy connection from {}", peer);
                let env = env.clone();
                std::thread::spawn(move || {
                    if let Err(e) = handle_connection(stream, env) {
                        tracing::trace!("Proxy connection ended: {}", e);
                    }
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => {
                tracing::warn!("Proxy server accept failed: {}", e);
                break;
            }
        }
    }
}

fn handle_connection(stream: TcpStream, env: Arc<LocalEnvironment>) -> Result<()> {
    stream.set_nodelay(true)?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;

    // Handles created on behalf of this connection, with reference counts.
    let mut owned: HashMap<u64, u64> = HashMap::new();

    let outcome = loop {
        let request: WireRequest = match read_frame(&mut reader) {
            Ok(Some(req)) => req,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };

        let result = dispatch(&env, &mut owned, request.op);
        let response = WireResponse {
            id: request.id,
            result: result.map_err(|e| WireError::from(&e)),
        };
        if let Err(e) = write_frame(&mut writer, &response) {
            break Err(e);
        }
    };

    // Release everything the connection still holds.
    for (handle, count) in owned {
        for _ in 0..count {
            env.release_handle(handle);
        }
    }
    outcome
}

/// Record a handle as owned by this connection
fn own(owned: &mut HashMap<u64, u64>, handle: u64) -> WireReply {
    *owned.entry(handle).or_insert(0) += 1;
    WireReply::Handle { handle }
}

fn dispatch(
    env: &Arc<LocalEnvironment>,
    owned: &mut HashMap<u64, u64>,
    op: WireOp,
) -> Result<WireReply> {
    match op {
        WireOp::Hello => Ok(WireReply::Hello {
            pid: std::process::id(),
        }),
        WireOp::FindProxy { name } => {
            let handle = env.find_handle(&name)?;
            Ok(own(owned, handle))
        }
        WireOp::Call {
            handle,
            method,
            args,
        } => {
            let resolved: Result<Vec<LocalObject>> = args
                .into_iter()
                .map(|arg| match arg {
                    WireArg::Value { value } => Ok(LocalObject::Value(value)),
                    WireArg::Handle { handle } => env.object_of(handle),
                })
                .collect();
            let result = env.call_handle(handle, &method, resolved?)?;
            Ok(own(owned, result))
        }
        WireOp::MakeObject { value } => {
            let handle = env.register_object(LocalObject::Value(value));
            Ok(own(owned, handle))
        }
        WireOp::GetObject { handle } => Ok(WireReply::Value {
            value: env.value_of(handle)?,
        }),
        WireOp::Serialize { handle } => Ok(WireReply::Text {
            text: env.serialize_handle(handle)?,
        }),
        WireOp::Deserialize { data } => {
            let handle = env.deserialize_handle(&data)?;
            Ok(own(owned, handle))
        }
        WireOp::Compare { a, b } => {
            let ordering = match env.compare_handles(a, b)? {
                Ordering::Less => -1,
                Ordering::Equal => 0,
                Ordering::Greater => 1,
            };
            Ok(WireReply::Ordering { ordering })
        }
        WireOp::Hash { handle } => Ok(WireReply::Hash {
            hash: env.hash_handle(handle),
        }),
        WireOp::AddRef { handle } => {
            env.add_ref_handle(handle)?;
            *owned.entry(handle).or_insert(0) += 1;
            Ok(WireReply::Unit)
        }
        WireOp::Release { handle } => {
            env.release_handle(handle);
            if let Some(count) = owned.get_mut(&handle) {
                *count -= 1;
                if *count == 0 {
                    owned.remove(&handle);
                }
            }
            Ok(WireReply::Unit)
        }
    }
}
