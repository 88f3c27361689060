//! Methods every daemon serves.
//!
//! `rps.ping` answers `"pong"`, `rps.echo` returns its params unchanged and
//! `rps.methods` lists the names currently registered on the server.

use std::sync::{Arc, Weak};

use jsonrps::{
    DefaultServer, JsonRpcRequest, JsonRpcResponse, Method, MethodContext, MethodError,
    MethodRegistry,
};
use serde_json::Value;

/// Names of the built-in methods.
pub const BUILTIN_METHODS: [&str; 3] = ["rps.echo", "rps.methods", "rps.ping"];

/// Registers the built-in methods on `server`.
pub fn register_builtin_methods(server: &DefaultServer) {
    server.register("rps.ping", Ping);
    server.register("rps.echo", Echo);
    server.register(
        "rps.methods",
        ListMethods {
            registry: Arc::downgrade(server.registry()),
        },
    );
}

struct Ping;

impl Method for Ping {
    fn call(
        &self,
        _context: &MethodContext,
        request: JsonRpcRequest,
    ) -> Result<JsonRpcResponse, MethodError> {
        Ok(JsonRpcResponse::success(request.id, Value::from("pong")))
    }
}

struct Echo;

impl Method for Echo {
    fn call(
        &self,
        _context: &MethodContext,
        request: JsonRpcRequest,
    ) -> Result<JsonRpcResponse, MethodError> {
        Ok(JsonRpcResponse::success(
            request.id,
            request.params.unwrap_or(Value::Null),
        ))
    }
}

// Weak: the registry owns this method.
struct ListMethods {
    registry: Weak<MethodRegistry>,
}

impl Method for ListMethods {
    fn call(
        &self,
        _context: &MethodContext,
        request: JsonRpcRequest,
    ) -> Result<JsonRpcResponse, MethodError> {
        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| MethodError::failed("method registry dropped"))?;
        let names = serde_json::to_value(registry.names())?;
        Ok(JsonRpcResponse::success(request.id, names))
    }
}
