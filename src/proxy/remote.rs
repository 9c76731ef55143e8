//! TCP client environment
//!
//! `RemoteEnvironment` connects to a [`ProxyServer`](crate::proxy::server)
//! and implements the full capability set over the line-delimited JSON
//! wire. One request is in flight at a time per connection; the calling
//! thread blocks for the round trip.
//!
//! Liveness is tracked lazily: a failed request flips the alive flag and
//! the next consumer re-resolves a fresh environment instead of reusing a
//! dead connection. No probe RPCs are issued by `is_alive` itself.

use crate::error::{FlowgraphError, Result};
use crate::proxy::environment::{
    next_env_id, EnvRef, EnvStats, ProxyEnvironment, BACKEND_REMOTE,
};
use crate::proxy::handle::Proxy;
use crate::proxy::value::ObjectValue;
use crate::proxy::wire::{
    read_frame, write_frame, WireArg, WireOp, WireReply, WireRequest, WireResponse,
};
use std::cmp::Ordering;
use std::io::BufReader;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Parse a "tcp://host\[:port\]" URI
pub fn parse_tcp_uri(uri: &str, default_port: u16) -> Result<(String, u16)> {
    let rest = uri
        .strip_prefix("tcp://")
        .ok_or_else(|| FlowgraphError::Connect(format!("unsupported URI scheme: '{}'", uri)))?;
    if rest.is_empty() {
        return Err(FlowgraphError::Connect(format!("empty host in '{}'", uri)));
    }
    match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| FlowgraphError::Connect(format!("bad port in '{}'", uri)))?;
            Ok((host.to_string(), port))
        }
        None => Ok((rest.to_string(), default_port)),
    }
}

struct Connection {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
    next_id: u64,
}

impl Connection {
    /// One blocking request/response round trip
    fn round_trip(&mut self, uri: &str, op: WireOp) -> Result<WireReply> {
        let id = self.next_id;
        self.next_id += 1;
        write_frame(&mut self.stream, &WireRequest { id, op })?;
        let response: WireResponse = read_frame(&mut self.reader)?.ok_or_else(|| {
            FlowgraphError::Connect(format!("server '{}' closed the connection", uri))
        })?;
        if response.id != id {
            return Err(FlowgraphError::Connect(format!(
                "out-of-order response from '{}'",
                uri
            )));
        }
        response.result.map_err(FlowgraphError::from)
    }
}

/// Client environment for one remote server process
pub struct RemoteEnvironment {
    env_id: u64,
    self_ref: Weak<RemoteEnvironment>,
    uri: String,
    conn: Mutex<Connection>,
    peer_pid: u32,
    alive: AtomicBool,
    stats: Mutex<EnvStats>,
}

impl std::fmt::Debug for RemoteEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteEnvironment")
            .field("env_id", &self.env_id)
            .field("uri", &self.uri)
            .field("peer_pid", &self.peer_pid)
            .finish_non_exhaustive()
    }
}

impl RemoteEnvironment {
    /// Connect and handshake with a server at "tcp://host:port"
    pub fn connect(
        uri: &str,
        connect_timeout: Duration,
        call_timeout: Duration,
    ) -> Result<Arc<Self>> {
        let (host, port) = parse_tcp_uri(uri, 0)?;
        if port == 0 {
            return Err(FlowgraphError::Connect(format!(
                "no port in server URI '{}'",
                uri
            )));
        }

        let addr = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| FlowgraphError::Connect(format!("cannot resolve '{}': {}", host, e)))?
            .next()
            .ok_or_else(|| FlowgraphError::Connect(format!("cannot resolve '{}'", host)))?;

        let stream = TcpStream::connect_timeout(&addr, connect_timeout)
            .map_err(|e| FlowgraphError::Connect(format!("connect to '{}' failed: {}", uri, e)))?;
        stream.set_read_timeout(Some(call_timeout))?;
        stream.set_write_timeout(Some(call_timeout))?;
        stream.set_nodelay(true)?;

        let reader = BufReader::new(stream.try_clone()?);
        let mut conn = Connection {
            stream,
            reader,
            next_id: 1,
        };

        // Handshake resolves the peer pid used in block content hashes.
        let pid = match conn.round_trip(uri, WireOp::Hello)? {
            WireReply::Hello { pid } => pid,
            other => {
                return Err(FlowgraphError::Connect(format!(
                    "unexpected handshake reply: {:?}",
                    other
                )))
            }
        };

        tracing::info!("Connected to proxy server {} (pid {})", uri, pid);
        Ok(Arc::new_cyclic(|weak| Self {
            env_id: next_env_id(),
            self_ref: weak.clone(),
            uri: uri.to_string(),
            conn: Mutex::new(conn),
            peer_pid: pid,
            alive: AtomicBool::new(true),
            stats: Mutex::new(EnvStats::default()),
        }))
    }

    fn request(&self, op: WireOp) -> Result<WireReply> {
        let mut conn = self.conn.lock().unwrap();
        let outcome = conn.round_trip(&self.uri, op);

        if let Err(FlowgraphError::Connect(_)) | Err(FlowgraphError::Io(_)) = &outcome {
            self.alive.store(false, AtomicOrdering::Relaxed);
        }
        outcome.map_err(|e| match e {
            FlowgraphError::Io(io) => FlowgraphError::Connect(format!(
                "transport to '{}' failed: {}",
                self.uri, io
            )),
            other => other,
        })
    }

    fn proxy_for(&self, handle: u64) -> Result<Proxy> {
        let env = self
            .self_ref
            .upgrade()
            .map(|arc| arc as EnvRef)
            .ok_or_else(|| FlowgraphError::Call("environment destroyed".to_string()))?;
        Ok(Proxy::from_parts(env, handle))
    }

    fn expect_handle(&self, reply: WireReply) -> Result<Proxy> {
        match reply {
            WireReply::Handle { handle } => self.proxy_for(handle),
            other => Err(FlowgraphError::Call(format!(
                "expected a handle reply, got {:?}",
                other
            ))),
        }
    }

    /// Translate one argument into a wire form
    ///
    /// Same-environment proxies pass as handles; foreign plain values
    /// transfer by value; foreign opaque objects fail over through their
    /// serialized reference string.
    fn export_argument(&self, arg: &Proxy) -> Result<WireArg> {
        if arg.is_null() {
            return Ok(WireArg::Value {
                value: ObjectValue::Null,
            });
        }
        if arg
            .environment()
            .map(|e| e.env_id() == self.env_id)
            .unwrap_or(false)
        {
            return Ok(WireArg::Handle {
                handle: arg.handle(),
            });
        }
        match arg.to_object() {
            Ok(value) => Ok(WireArg::Value { value }),
            Err(_) => {
                let env = arg.environment().ok_or_else(|| {
                    FlowgraphError::Call("argument has no environment".to_string())
                })?;
                let reference = env.serialize_proxy(arg)?;
                Ok(WireArg::Value {
                    value: ObjectValue::Str(reference),
                })
            }
        }
    }
}

impl ProxyEnvironment for RemoteEnvironment {
    fn backend_name(&self) -> &str {
        BACKEND_REMOTE
    }

    fn env_id(&self) -> u64 {
        self.env_id
    }

    fn connection_uri(&self) -> Option<String> {
        Some(self.uri.clone())
    }

    fn pid(&self) -> u32 {
        self.peer_pid
    }

    fn find_proxy(&self, name: &str) -> Result<Proxy> {
        self.stats.lock().unwrap().record_find();
        let reply = self.request(WireOp::FindProxy {
            name: name.to_string(),
        })?;
        self.expect_handle(reply)
    }

    fn call(&self, proxy: &Proxy, method: &str, args: &[Proxy]) -> Result<Proxy> {
        self.stats.lock().unwrap().record_call();
        let exported: Result<Vec<WireArg>> =
            args.iter().map(|a| self.export_argument(a)).collect();
        let result = self.request(WireOp::Call {
            handle: proxy.handle(),
            method: method.to_string(),
            args: exported?,
        });
        match result {
            Ok(reply) => self.expect_handle(reply),
            Err(e) => {
                self.stats.lock().unwrap().record_failure();
                Err(e)
            }
        }
    }

    fn convert_object_to_proxy(&self, value: ObjectValue) -> Result<Proxy> {
        let reply = self.request(WireOp::MakeObject { value })?;
        self.expect_handle(reply)
    }

    fn convert_proxy_to_object(&self, proxy: &Proxy) -> Result<ObjectValue> {
        match self.request(WireOp::GetObject {
            handle: proxy.handle(),
        })? {
            WireReply::Value { value } => Ok(value),
            other => Err(FlowgraphError::Serialization(format!(
                "expected a value reply, got {:?}",
                other
            ))),
        }
    }

    fn serialize_proxy(&self, proxy: &Proxy) -> Result<String> {
        match self.request(WireOp::Serialize {
            handle: proxy.handle(),
        })? {
            WireReply::Text { text } => Ok(text),
            other => Err(FlowgraphError::Serialization(format!(
                "expected a text reply, got {:?}",
                other
            ))),
        }
    }

    fn deserialize_proxy(&self, data: &str) -> Result<Proxy> {
        let reply = self.request(WireOp::Deserialize {
            data: data.to_string(),
        })?;
        self.expect_handle(reply)
    }

    fn compare(&self, a: &Proxy, b: &Proxy) -> Result<Ordering> {
        if !a.same_environment(b) {
            return Err(FlowgraphError::Compare(
                "proxies belong to different environments".to_string(),
            ));
        }
        match self.request(WireOp::Compare {
            a: a.handle(),
            b: b.handle(),
        })? {
            WireReply::Ordering { ordering } => Ok(match ordering {
                o if o < 0 => Ordering::Less,
                0 => Ordering::Equal,
                _ => Ordering::Greater,
            }),
            other => Err(FlowgraphError::Compare(format!(
                "expected an ordering reply, got {:?}",
                other
            ))),
        }
    }

    fn hash_proxy(&self, proxy: &Proxy) -> u64 {
        match self.request(WireOp::Hash {
            handle: proxy.handle(),
        }) {
            Ok(WireReply::Hash { hash }) => hash,
            _ => proxy.handle(),
        }
    }

    fn add_ref(&self, handle: u64) {
        let _ = self.request(WireOp::AddRef { handle });
    }

    fn release(&self, handle: u64) {
        if self.alive.load(AtomicOrdering::Relaxed) {
            let _ = self.request(WireOp::Release { handle });
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(AtomicOrdering::Relaxed)
    }

    fn stats(&self) -> EnvStats {
        *self.stats.lock().unwrap()
    }
}
