//! Named methods shared by every session of a server.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{JsonRpcRequest, JsonRpcResponse, MethodError, Signal};

/// Ambient information handed to every method call.
///
/// The context is created per invocation and is not tied to the lifetime of
/// the request; methods observe server shutdown through
/// [`is_server_closing`](Self::is_server_closing).
#[derive(Debug, Clone)]
pub struct MethodContext {
    session_id: String,
    closing: Arc<Signal>,
}

impl MethodContext {
    /// Builds a context for a call on `session_id`, watching `closing`.
    ///
    /// The pipeline builds these itself; the constructor is public so
    /// methods can be exercised directly.
    #[must_use]
    pub fn new(session_id: impl Into<String>, closing: Arc<Signal>) -> Self {
        Self {
            session_id: session_id.into(),
            closing,
        }
    }

    /// Identifier of the session that delivered the request.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Returns true once the owning server has begun shutting down.
    #[must_use]
    pub fn is_server_closing(&self) -> bool {
        self.closing.is_fired()
    }
}

/// Callable registered under a method name.
///
/// The returned response is written to the peer as is, except for
/// notifications, which never get a reply. A returned error is logged by the
/// pipeline and never reaches the peer.
pub trait Method: Send + Sync {
    /// Handles one request.
    ///
    /// # Errors
    ///
    /// Returns a [`MethodError`] when no response should be sent.
    fn call(
        &self,
        context: &MethodContext,
        request: JsonRpcRequest,
    ) -> Result<JsonRpcResponse, MethodError>;
}

impl<F> Method for F
where
    F: Fn(&MethodContext, JsonRpcRequest) -> Result<JsonRpcResponse, MethodError> + Send + Sync,
{
    fn call(
        &self,
        context: &MethodContext,
        request: JsonRpcRequest,
    ) -> Result<JsonRpcResponse, MethodError> {
        self(context, request)
    }
}

/// Lock-guarded map from method names to methods.
///
/// Methods can be added or removed at any time; sessions already running
/// see the change on their next dispatch.
#[derive(Default)]
pub struct MethodRegistry {
    methods: RwLock<HashMap<String, Arc<dyn Method>>>,
}

impl MethodRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `method` under `name`, or removes `name` when `None`.
    pub fn set(&self, name: impl Into<String>, method: Option<Arc<dyn Method>>) {
        let name = name.into();
        let mut methods = self.write();
        match method {
            Some(method) => {
                methods.insert(name, method);
            }
            None => {
                methods.remove(&name);
            }
        }
    }

    /// Looks up the method registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Method>> {
        self.read().get(name).cloned()
    }

    /// Returns true when `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Registered names in lexical order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Number of registered methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns true when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<dyn Method>>> {
        self.methods.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<dyn Method>>> {
        self.methods.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for MethodRegistry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("MethodRegistry")
            .field("methods", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn constant(value: &'static str) -> Arc<dyn Method> {
        Arc::new(
            move |_context: &MethodContext,
                  request: JsonRpcRequest|
                  -> Result<JsonRpcResponse, MethodError> {
                Ok(JsonRpcResponse::success(request.id, json!(value)))
            },
        )
    }

    #[test]
    fn set_and_remove() {
        let registry = MethodRegistry::new();
        registry.set("b", Some(constant("b")));
        registry.set("a", Some(constant("a")));
        assert_eq!(registry.names(), ["a", "b"]);

        registry.set("a", None);
        assert!(!registry.contains("a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn replacing_a_method_takes_effect() {
        let registry = MethodRegistry::new();
        registry.set("m", Some(constant("old")));
        registry.set("m", Some(constant("new")));

        let context = MethodContext::new("session", Arc::new(Signal::new()));
        let method = registry.get("m").expect("registered");
        let response = method
            .call(&context, JsonRpcRequest::new("m", None, 1_i64))
            .expect("call");
        assert_eq!(response.result, Some(json!("new")));
    }

    #[test]
    fn context_reports_server_closing() {
        let closing = Arc::new(Signal::new());
        let context = MethodContext::new("s-1", Arc::clone(&closing));
        assert_eq!(context.session_id(), "s-1");
        assert!(!context.is_server_closing());
        closing.fire();
        assert!(context.is_server_closing());
    }
}
