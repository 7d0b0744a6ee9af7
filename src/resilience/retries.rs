//! Retry predicates consulted by the client after a failed attempt.
//!
//! A predicate receives the call context, the request, the zero-based attempt
//! index and the attempt's error. It answers:
//! - `Ok(true)`: run the next attempt
//! - `Ok(false)`: stop and surface the attempt's error
//! - `Err(e)`: stop and surface `e` instead

use std::sync::Arc;

use crate::client::Request;
use crate::context::Context;
use crate::error::RpcError;

pub type RetryFn = Arc<dyn Fn(&Context, &Request, usize, &RpcError) -> Result<bool, RpcError> + Send + Sync>;

/// Retry every failure until attempts run out.
pub fn retry_always() -> RetryFn {
    Arc::new(|_, _, _, _| Ok(true))
}

/// Never retry.
pub fn retry_never() -> RetryFn {
    Arc::new(|_, _, _, _| Ok(false))
}

/// Retry only transport-level failures (timeouts, dial/transport errors,
/// unreachable servers, pool exhaustion). Handler errors are returned at once.
pub fn retry_on_error() -> RetryFn {
    Arc::new(|_, _, _, err| Ok(err.is_transient()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_classify_errors() {
        let ctx = Context::background();
        let req = Request::raw("svc", "A.B", Vec::new());
        let transient = RpcError::timeout("t", "slow");
        let handler = RpcError::bad_request("t", "bad");

        assert_eq!(retry_always()(&ctx, &req, 0, &handler), Ok(true));
        assert_eq!(retry_never()(&ctx, &req, 0, &transient), Ok(false));
        assert_eq!(retry_on_error()(&ctx, &req, 0, &transient), Ok(true));
        assert_eq!(retry_on_error()(&ctx, &req, 0, &handler), Ok(false));
    }
}
