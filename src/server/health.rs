//! Built-in `Health` service.

use serde_json::Value;

use crate::context::Context;
use crate::error::RpcError;
use crate::server::Service;

pub const HEALTH_SERVICE: &str = "Health";

/// `Health.Ping` answers `"pong"`; `Health.Echo` returns its argument.
pub fn health_service() -> Service {
    Service::new(HEALTH_SERVICE)
        .method("Ping", |_ctx: Context, _: Value| async { Ok::<_, RpcError>("pong") })
        .method("Echo", |_ctx: Context, value: Value| async move { Ok::<_, RpcError>(value) })
}
