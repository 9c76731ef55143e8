//! In-process proxy environment
//!
//! `LocalEnvironment` owns a reference-counted object table plus a
//! registry of named root objects. Objects are either plain values or
//! callables implementing [`ProxyCallable`]. The same handle-level
//! operations back three consumers: the `ProxyEnvironment` trait impl,
//! the lock-serialized managed wrapper, and the wire server.

use crate::error::{FlowgraphError, Result};
use crate::proxy::environment::{
    next_env_id, EnvRef, EnvStats, ProxyEnvironment, BACKEND_LOCAL,
};
use crate::proxy::handle::Proxy;
use crate::proxy::value::ObjectValue;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, Weak};

/// A callable object hosted by a local environment
///
/// Implementations dispatch on the method name and receive resolved
/// arguments. Returning a callable hands ownership of a fresh object to
/// the environment.
pub trait ProxyCallable: Send + Sync {
    /// Type name reported in diagnostics and serialized references
    fn type_name(&self) -> &str;

    /// Invoke a named method
    fn call(&self, method: &str, args: &[LocalObject]) -> Result<LocalObject>;

    /// Downcast support for callables that inspect their arguments
    fn as_any(&self) -> &dyn std::any::Any;
}

/// An object held in a local environment's table
#[derive(Clone)]
pub enum LocalObject {
    /// A plain value
    Value(ObjectValue),
    /// An opaque callable
    Callable(Arc<dyn ProxyCallable>),
}

impl std::fmt::Debug for LocalObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocalObject::Value(v) => f.debug_tuple("Value").field(v).finish(),
            LocalObject::Callable(c) => {
                f.debug_tuple("Callable").field(&c.type_name()).finish()
            }
        }
    }
}

impl LocalObject {
    /// Extract the plain value, failing for callables
    pub fn as_value(&self) -> Result<&ObjectValue> {
        match self {
            LocalObject::Value(v) => Ok(v),
            LocalObject::Callable(c) => Err(FlowgraphError::Serialization(format!(
                "object '{}' has no value representation",
                c.type_name()
            ))),
        }
    }

    /// Extract a string argument at a call boundary
    pub fn as_str(&self) -> Result<&str> {
        self.as_value()?
            .as_str()
            .ok_or_else(|| FlowgraphError::Call("expected a string argument".to_string()))
    }

    /// The callable, if this object is one
    pub fn as_callable(&self) -> Option<&Arc<dyn ProxyCallable>> {
        match self {
            LocalObject::Callable(c) => Some(c),
            LocalObject::Value(_) => None,
        }
    }
}

struct ObjectEntry {
    refcount: u64,
    object: LocalObject,
}

/// Serialized reference format for opaque objects
#[derive(Serialize, Deserialize)]
struct SerializedRef {
    uri: String,
    handle: u64,
    name: String,
}

/// Serialized format covering both object kinds
#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum SerializedProxy {
    Value { value: ObjectValue },
    Object(SerializedRef),
}

/// The in-process environment
pub struct LocalEnvironment {
    env_id: u64,
    self_ref: Weak<LocalEnvironment>,
    objects: Mutex<HashMap<u64, ObjectEntry>>,
    registry: Mutex<HashMap<String, Arc<dyn ProxyCallable>>>,
    next_handle: AtomicU64,
    stats: Mutex<EnvStats>,
    method_counts: Mutex<HashMap<String, u64>>,
    /// Set when this environment is served over a transport
    uri: Mutex<Option<String>>,
}

impl std::fmt::Debug for LocalEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEnvironment")
            .field("env_id", &self.env_id)
            .finish_non_exhaustive()
    }
}

impl LocalEnvironment {
    /// Create an empty local environment
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            env_id: next_env_id(),
            self_ref: weak.clone(),
            objects: Mutex::new(HashMap::new()),
            registry: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            stats: Mutex::new(EnvStats::default()),
            method_counts: Mutex::new(HashMap::new()),
            uri: Mutex::new(None),
        })
    }

    /// Register a named root object resolvable via `find_proxy`
    pub fn register(&self, name: impl Into<String>, object: Arc<dyn ProxyCallable>) {
        self.registry.lock().unwrap().insert(name.into(), object);
    }

    /// Record the URI this environment is served under
    pub(crate) fn set_uri(&self, uri: impl Into<String>) {
        *self.uri.lock().unwrap() = Some(uri.into());
    }

    fn upgrade(&self) -> Result<EnvRef> {
        self.self_ref
            .upgrade()
            .map(|arc| arc as EnvRef)
            .ok_or_else(|| FlowgraphError::Call("environment destroyed".to_string()))
    }

    fn proxy_for(&self, handle: u64) -> Result<Proxy> {
        Ok(Proxy::from_parts(self.upgrade()?, handle))
    }

    // ── Handle-level operations ──

    /// Insert an object with refcount 1, returning its handle
    pub(crate) fn register_object(&self, object: LocalObject) -> u64 {
        let handle = self.next_handle.fetch_add(1, AtomicOrdering::Relaxed);
        self.objects
            .lock()
            .unwrap()
            .insert(handle, ObjectEntry { refcount: 1, object });
        handle
    }

    /// Resolve a named root into a fresh handle
    pub(crate) fn find_handle(&self, name: &str) -> Result<u64> {
        self.stats.lock().unwrap().record_find();
        let object = self
            .registry
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| {
                FlowgraphError::Call(format!("no registered object named '{}'", name))
            })?;
        Ok(self.register_object(LocalObject::Callable(object)))
    }

    /// Clone the object behind a handle
    pub(crate) fn object_of(&self, handle: u64) -> Result<LocalObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&handle)
            .map(|e| e.object.clone())
            .ok_or_else(|| FlowgraphError::Call(format!("stale handle {}", handle)))
    }

    /// Invoke a method, registering and returning the result handle
    pub(crate) fn call_handle(
        &self,
        handle: u64,
        method: &str,
        args: Vec<LocalObject>,
    ) -> Result<u64> {
        {
            let mut stats = self.stats.lock().unwrap();
            stats.record_call();
        }
        *self
            .method_counts
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_insert(0) += 1;

        let target = self.object_of(handle)?;
        let result = match &target {
            LocalObject::Callable(callable) => callable.call(method, &args),
            LocalObject::Value(_) => Err(FlowgraphError::Call(format!(
                "method '{}' invoked on a plain value",
                method
            ))),
        };

        match result {
            Ok(object) => Ok(self.register_object(object)),
            Err(e) => {
                self.stats.lock().unwrap().record_failure();
                Err(e)
            }
        }
    }

    /// Plain value of a handle
    pub(crate) fn value_of(&self, handle: u64) -> Result<ObjectValue> {
        self.object_of(handle)?.as_value().cloned()
    }

    pub(crate) fn serialize_handle(&self, handle: u64) -> Result<String> {
        let serialized = match self.object_of(handle)? {
            LocalObject::Value(value) => SerializedProxy::Value { value },
            LocalObject::Callable(callable) => SerializedProxy::Object(SerializedRef {
                uri: self.local_uri(),
                handle,
                name: callable.type_name().to_string(),
            }),
        };
        Ok(serde_json::to_string(&serialized)?)
    }

    pub(crate) fn deserialize_handle(&self, data: &str) -> Result<u64> {
        let parsed: SerializedProxy = serde_json::from_str(data)?;
        match parsed {
            SerializedProxy::Value { value } => Ok(self.register_object(LocalObject::Value(value))),
            SerializedProxy::Object(reference) => {
                if reference.uri != self.local_uri() {
                    return Err(FlowgraphError::Serialization(format!(
                        "object reference belongs to '{}'",
                        reference.uri
                    )));
                }
                self.add_ref_handle(reference.handle)?;
                Ok(reference.handle)
            }
        }
    }

    pub(crate) fn compare_handles(&self, a: u64, b: u64) -> Result<Ordering> {
        if a == b {
            return Ok(Ordering::Equal);
        }
        let left = self.object_of(a)?;
        let right = self.object_of(b)?;
        match (&left, &right) {
            (LocalObject::Value(x), LocalObject::Value(y)) => x.compare(y).ok_or_else(|| {
                FlowgraphError::Compare(format!(
                    "no defined order between {} and {}",
                    x.type_string(),
                    y.type_string()
                ))
            }),
            (LocalObject::Callable(x), LocalObject::Callable(y)) => {
                if Arc::ptr_eq(x, y) {
                    Ok(Ordering::Equal)
                } else {
                    Err(FlowgraphError::Compare(
                        "opaque objects compare equal only to themselves".to_string(),
                    ))
                }
            }
            _ => Err(FlowgraphError::Compare(
                "no defined order between a value and an opaque object".to_string(),
            )),
        }
    }

    pub(crate) fn hash_handle(&self, handle: u64) -> u64 {
        match self.object_of(handle) {
            Ok(LocalObject::Value(v)) => {
                let mut hasher = DefaultHasher::new();
                v.content_hash(&mut hasher);
                hasher.finish()
            }
            _ => handle,
        }
    }

    pub(crate) fn add_ref_handle(&self, handle: u64) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        let entry = objects
            .get_mut(&handle)
            .ok_or_else(|| FlowgraphError::Call(format!("stale handle {}", handle)))?;
        entry.refcount += 1;
        Ok(())
    }

    pub(crate) fn release_handle(&self, handle: u64) {
        let mut objects = self.objects.lock().unwrap();
        if let Some(entry) = objects.get_mut(&handle) {
            entry.refcount -= 1;
            if entry.refcount == 0 {
                objects.remove(&handle);
            }
        }
    }

    fn local_uri(&self) -> String {
        self.uri
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| format!("pid:{}", std::process::id()))
    }

    /// Translate an argument proxy into a local object
    ///
    /// Same-environment handles resolve directly; foreign plain values
    /// transfer by value; foreign opaque objects fail over through their
    /// serialized reference string.
    pub(crate) fn import_argument(&self, arg: &Proxy) -> Result<LocalObject> {
        if arg.is_null() {
            return Ok(LocalObject::Value(ObjectValue::Null));
        }
        if arg
            .environment()
            .map(|e| e.env_id() == self.env_id)
            .unwrap_or(false)
        {
            return self.object_of(arg.handle());
        }
        match arg.to_object() {
            Ok(value) => Ok(LocalObject::Value(value)),
            Err(_) => {
                let env = arg.environment().ok_or_else(|| {
                    FlowgraphError::Call("argument has no environment".to_string())
                })?;
                let reference = env.serialize_proxy(arg)?;
                Ok(LocalObject::Value(ObjectValue::Str(reference)))
            }
        }
    }

    // ── Test/diagnostic accessors ──

    /// Number of live objects in the table
    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// How many times a named method has been invoked
    pub fn method_call_count(&self, method: &str) -> u64 {
        self.method_counts
            .lock()
            .unwrap()
            .get(method)
            .copied()
            .unwrap_or(0)
    }
}

impl ProxyEnvironment for LocalEnvironment {
    fn backend_name(&self) -> &str {
        BACKEND_LOCAL
    }

    fn env_id(&self) -> u64 {
        self.env_id
    }

    fn connection_uri(&self) -> Option<String> {
        self.uri.lock().unwrap().clone()
    }

    fn pid(&self) -> u32 {
        std::process::id()
    }

    fn find_proxy(&self, name: &str) -> Result<Proxy> {
        let handle = self.find_handle(name)?;
        self.proxy_for(handle)
    }

    fn call(&self, proxy: &Proxy, method: &str, args: &[Proxy]) -> Result<Proxy> {
        let imported: Result<Vec<LocalObject>> =
            args.iter().map(|a| self.import_argument(a)).collect();
        let handle = self.call_handle(proxy.handle(), method, imported?)?;
        self.proxy_for(handle)
    }

    fn convert_object_to_proxy(&self, value: ObjectValue) -> Result<Proxy> {
        let handle = self.register_object(LocalObject::Value(value));
        self.proxy_for(handle)
    }

    fn convert_proxy_to_object(&self, proxy: &Proxy) -> Result<ObjectValue> {
        self.value_of(proxy.handle())
    }

    fn serialize_proxy(&self, proxy: &Proxy) -> Result<String> {
        self.serialize_handle(proxy.handle())
    }

    fn deserialize_proxy(&self, data: &str) -> Result<Proxy> {
        let handle = self.deserialize_handle(data)?;
        self.proxy_for(handle)
    }

    fn compare(&self, a: &Proxy, b: &Proxy) -> Result<Ordering> {
        if !a.same_environment(b) {
            return Err(FlowgraphError::Compare(
                "proxies belong to different environments".to_string(),
            ));
        }
        self.compare_handles(a.handle(), b.handle())
    }

    fn hash_proxy(&self, proxy: &Proxy) -> u64 {
        self.hash_handle(proxy.handle())
    }

    fn add_ref(&self, handle: u64) {
        let _ = self.add_ref_handle(handle);
    }

    fn release(&self, handle: u64) {
        self.release_handle(handle);
    }

    fn stats(&self) -> EnvStats {
        *self.stats.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl ProxyCallable for Echo {
        fn type_name(&self) -> &str {
            "Echo"
        }

        fn call(&self, method: &str, args: &[LocalObject]) -> Result<LocalObject> {
            match method {
                "echo" => Ok(args
                    .first()
                    .cloned()
                    .unwrap_or(LocalObject::Value(ObjectValue::Null))),
                "boom" => Err(FlowgraphError::Exception("echo exploded".to_string())),
                _ => Err(FlowgraphError::Call(format!("no method '{}'", method))),
            }
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[test]
    fn test_find_and_call() {
        let env = LocalEnvironment::new();
        env.register("echo", Arc::new(Echo));

        let root = env.find_proxy("echo").unwrap();
        let arg = env
            .convert_object_to_proxy(ObjectValue::Int(42))
            .unwrap();
        let result = root.call("echo", &[arg]).unwrap();
        assert_eq!(result.to_object().unwrap(), ObjectValue::Int(42));
    }

    #[test]
    fn test_missing_name_fails() {
        let env = LocalEnvironment::new();
        assert!(env.find_proxy("nope").is_err());
    }

    #[test]
    fn test_missing_method_is_call_error() {
        let env = LocalEnvironment::new();
        env.register("echo", Arc::new(Echo));
        let root = env.find_proxy("echo").unwrap();
        let err = root.call("nothing", &[]).unwrap_err();
        assert!(matches!(err, FlowgraphError::Call(_)));
    }

    #[test]
    fn test_exception_propagates() {
        let env = LocalEnvironment::new();
        env.register("echo", Arc::new(Echo));
        let root = env.find_proxy("echo").unwrap();
        let err = root.call("boom", &[]).unwrap_err();
        assert!(matches!(err, FlowgraphError::Exception(_)));
        assert_eq!(env.stats().failed_calls, 1);
    }

    #[test]
    fn test_refcount_lifecycle() {
        let env = LocalEnvironment::new();
        let p = env
            .convert_object_to_proxy(ObjectValue::Str("x".into()))
            .unwrap();
        assert_eq!(env.object_count(), 1);
        let clone = p.clone();
        drop(p);
        assert_eq!(env.object_count(), 1);
        drop(clone);
        assert_eq!(env.object_count(), 0);
    }

    #[test]
    fn test_compare_values_and_errors() {
        let env = LocalEnvironment::new();
        let a = env.convert_object_to_proxy(ObjectValue::Int(1)).unwrap();
        let b = env.convert_object_to_proxy(ObjectValue::Int(2)).unwrap();
        assert_eq!(a.compare_to(&b).unwrap(), Ordering::Less);

        let s = env
            .convert_object_to_proxy(ObjectValue::Str("1".into()))
            .unwrap();
        assert!(matches!(
            a.compare_to(&s),
            Err(FlowgraphError::Compare(_))
        ));
    }

    #[test]
    fn test_serialize_roundtrip_compares_equal() {
        let env = LocalEnvironment::new();
        let p = env
            .convert_object_to_proxy(ObjectValue::Float(2.5))
            .unwrap();
        let data = env.serialize_proxy(&p).unwrap();
        let back = env.deserialize_proxy(&data).unwrap();
        assert_eq!(back.compare_to(&p).unwrap(), Ordering::Equal);
    }

    #[test]
    fn test_serialize_roundtrip_opaque_object() {
        let env = LocalEnvironment::new();
        env.register("echo", Arc::new(Echo));
        let root = env.find_proxy("echo").unwrap();
        let data = env.serialize_proxy(&root).unwrap();
        let back = env.deserialize_proxy(&data).unwrap();
        assert_eq!(back.compare_to(&root).unwrap(), Ordering::Equal);
    }
}
