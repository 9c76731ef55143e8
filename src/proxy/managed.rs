//! Lock-serialized in-process environment
//!
//! Some execution backends wrap a single-threaded runtime: every object
//! construction, method call and destruction must be serialized under one
//! process-wide exclusive lock. `ManagedEnvironment` wraps a
//! [`LocalEnvironment`] and takes that lock around every operation that
//! touches an object. It is also the default backend for zones with no
//! host configured, so an unconfigured graph evaluates fully in-process.

use crate::error::Result;
use crate::proxy::environment::{EnvRef, EnvStats, ProxyEnvironment, BACKEND_MANAGED};
use crate::proxy::handle::Proxy;
use crate::proxy::local::{LocalEnvironment, LocalObject};
use crate::proxy::value::ObjectValue;
use std::cmp::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};

/// The process-wide exclusive call lock
static CALL_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn call_lock() -> MutexGuard<'static, ()> {
    CALL_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-process environment serialized under the process-wide call lock
pub struct ManagedEnvironment {
    env_id: u64,
    self_ref: Weak<ManagedEnvironment>,
    inner: Arc<LocalEnvironment>,
}

impl std::fmt::Debug for ManagedEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedEnvironment")
            .field("env_id", &self.env_id)
            .finish_non_exhaustive()
    }
}

impl ManagedEnvironment {
    /// Wrap a local environment; all object operations go through the lock
    ///
    /// The wrapper shares the inner environment's identity: both views
    /// address the same object table, so handles pass between them
    /// directly.
    pub fn new(inner: Arc<LocalEnvironment>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            env_id: inner.env_id(),
            self_ref: weak.clone(),
            inner,
        })
    }

    /// The wrapped environment, for registration and test inspection
    pub fn inner(&self) -> &Arc<LocalEnvironment> {
        &self.inner
    }

    fn proxy_for(&self, handle: u64) -> Result<Proxy> {
        let env = self
            .self_ref
            .upgrade()
            .map(|arc| arc as EnvRef)
            .ok_or_else(|| {
                crate::error::FlowgraphError::Call("environment destroyed".to_string())
            })?;
        Ok(Proxy::from_parts(env, handle))
    }
}

impl ProxyEnvironment for ManagedEnvironment {
    fn backend_name(&self) -> &str {
        BACKEND_MANAGED
    }

    fn env_id(&self) -> u64 {
        self.env_id
    }

    fn pid(&self) -> u32 {
        std::process::id()
    }

    fn find_proxy(&self, name: &str) -> Result<Proxy> {
        let _guard = call_lock();
        let handle = self.inner.find_handle(name)?;
        self.proxy_for(handle)
    }

    fn call(&self, proxy: &Proxy, method: &str, args: &[Proxy]) -> Result<Proxy> {
        let imported: Result<Vec<LocalObject>> =
            args.iter().map(|a| self.inner.import_argument(a)).collect();
        let imported = imported?;
        let _guard = call_lock();
        let handle = self.inner.call_handle(proxy.handle(), method, imported)?;
        self.proxy_for(handle)
    }

    fn convert_object_to_proxy(&self, value: ObjectValue) -> Result<Proxy> {
        let _guard = call_lock();
        let handle = self.inner.register_object(LocalObject::Value(value));
        self.proxy_for(handle)
    }

    fn convert_proxy_to_object(&self, proxy: &Proxy) -> Result<ObjectValue> {
        let _guard = call_lock();
        self.inner.value_of(proxy.handle())
    }

    fn serialize_proxy(&self, proxy: &Proxy) -> Result<String> {
        let _guard = call_lock();
        self.inner.serialize_handle(proxy.handle())
    }

    fn deserialize_proxy(&self, data: &str) -> Result<Proxy> {
        let _guard = call_lock();
        let handle = self.inner.deserialize_handle(data)?;
        self.proxy_for(handle)
    }

    fn compare(&self, a: &Proxy, b: &Proxy) -> Result<Ordering> {
        let _guard = call_lock();
        self.inner.compare_handles(a.handle(), b.handle())
    }

    fn hash_proxy(&self, proxy: &Proxy) -> u64 {
        let _guard = call_lock();
        self.inner.hash_handle(proxy.handle())
    }

    fn add_ref(&self, handle: u64) {
        let _ = self.inner.add_ref_handle(handle);
    }

    fn release(&self, handle: u64) {
        let _guard = call_lock();
        self.inner.release_handle(handle);
    }

    fn stats(&self) -> EnvStats {
        self.inner.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::local::ProxyCallable;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

    struct Busy {
        active: AtomicU32,
        max_seen: AtomicU32,
    }

    impl ProxyCallable for Busy {
        fn type_name(&self) -> &str {
            "Busy"
        }

        fn call(&self, _method: &str, _args: &[LocalObject]) -> Result<LocalObject> {
            let now = self.active.fetch_add(1, AtomicOrdering::SeqCst) + 1;
            self.max_seen.fetch_max(now, AtomicOrdering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(5));
            self.active.fetch_sub(1, AtomicOrdering::SeqCst);
            Ok(LocalObject::Value(ObjectValue::Null))
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[test]
    fn test_calls_are_exclusive() {
        let local = LocalEnvironment::new();
        let busy = Arc::new(Busy {
            active: AtomicU32::new(0),
            max_seen: AtomicU32::new(0),
        });
        local.register("busy", busy.clone());
        let env = ManagedEnvironment::new(local);

        let root = env.find_proxy("busy").unwrap();
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let root = root.clone();
                std::thread::spawn(move || {
                    root.call("work", &[]).unwrap();
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(busy.max_seen.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn test_value_roundtrip_through_managed() {
        let env = ManagedEnvironment::new(LocalEnvironment::new());
        let p = env
            .convert_object_to_proxy(ObjectValue::Int(9))
            .unwrap();
        assert_eq!(p.to_object().unwrap(), ObjectValue::Int(9));
        let data = env.serialize_proxy(&p).unwrap();
        let back = env.deserialize_proxy(&data).unwrap();
        assert_eq!(back.compare_to(&p).unwrap(), Ordering::Equal);
    }
}
