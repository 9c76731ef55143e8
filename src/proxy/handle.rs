//! The `Proxy` value type
//!
//! A proxy references an object owned by some environment. Proxies are
//! copyable values: cloning adds a reference in the owning environment,
//! dropping releases one, so the object lives as long as its longest
//! holder. Equality, ordering and hashing all delegate to the owning
//! environment.

use crate::error::Result;
use crate::proxy::environment::{null_call_error, EnvRef};
use crate::proxy::value::ObjectValue;
use std::cmp::Ordering;

/// Environment-bound reference to a remote or local object
pub struct Proxy {
    env: Option<EnvRef>,
    handle: u64,
}

impl Proxy {
    /// The null proxy: backs no object, calls on it fail
    pub fn null() -> Self {
        Self {
            env: None,
            handle: 0,
        }
    }

    /// Bind a handle whose reference is already owned by the caller
    pub(crate) fn from_parts(env: EnvRef, handle: u64) -> Self {
        Self {
            env: Some(env),
            handle,
        }
    }

    /// True if this proxy backs no object
    pub fn is_null(&self) -> bool {
        self.env.is_none()
    }

    /// The owning environment, if any
    pub fn environment(&self) -> Option<&EnvRef> {
        self.env.as_ref()
    }

    /// Raw handle within the owning environment
    pub fn handle(&self) -> u64 {
        self.handle
    }

    /// True if `other` belongs to the same environment
    pub fn same_environment(&self, other: &Proxy) -> bool {
        match (&self.env, &other.env) {
            (Some(a), Some(b)) => a.env_id() == b.env_id(),
            _ => false,
        }
    }

    /// Invoke a named method, blocking for the RPC round trip
    pub fn call(&self, method: &str, args: &[Proxy]) -> Result<Proxy> {
        match &self.env {
            Some(env) => env.call(self, method, args),
            None => Err(null_call_error(method)),
        }
    }

    /// Invoke a method passing plain values, converting each into the
    /// owning environment first
    pub fn call_values(&self, method: &str, args: &[ObjectValue]) -> Result<Proxy> {
        let env = self.env.as_ref().ok_or_else(|| null_call_error(method))?;
        let converted: Result<Vec<Proxy>> = args
            .iter()
            .map(|v| env.convert_object_to_proxy(v.clone()))
            .collect();
        env.call(self, method, &converted?)
    }

    /// Extract the plain value of the referenced object
    pub fn to_object(&self) -> Result<ObjectValue> {
        match &self.env {
            Some(env) => env.convert_proxy_to_object(self),
            None => Ok(ObjectValue::Null),
        }
    }

    /// Order this proxy relative to another of the same environment
    pub fn compare_to(&self, other: &Proxy) -> Result<Ordering> {
        match (&self.env, &other.env) {
            (Some(env), Some(_)) => env.compare(self, other),
            (None, None) => Ok(Ordering::Equal),
            (None, Some(_)) => Ok(Ordering::Less),
            (Some(_), None) => Ok(Ordering::Greater),
        }
    }

    /// Content hash, delegated to the owning environment
    pub fn hash_code(&self) -> u64 {
        match &self.env {
            Some(env) => env.hash_proxy(self),
            None => 0,
        }
    }
}

impl Clone for Proxy {
    fn clone(&self) -> Self {
        if let Some(env) = &self.env {
            env.add_ref(self.handle);
        }
        Self {
            env: self.env.clone(),
            handle: self.handle,
        }
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        if let Some(env) = &self.env {
            env.release(self.handle);
        }
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        matches!(self.compare_to(other), Ok(Ordering::Equal))
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env {
            Some(env) => write!(
                f,
                "Proxy({}#{} @ {})",
                env.backend_name(),
                self.handle,
                env.pid()
            ),
            None => write!(f, "Proxy(null)"),
        }
    }
}
