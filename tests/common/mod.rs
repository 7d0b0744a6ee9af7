//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;

use micro_rpc::client::{DialOptions, RpcClient, ServerTarget};
use micro_rpc::server::ServerRequest;
use micro_rpc::{Context, Message, RpcError, RpcServer, ServerError, ServerOptions, Service, Shutdown};

/// A server listening on an ephemeral localhost port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub server: Arc<RpcServer>,
    shutdown: Shutdown,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    /// Trigger shutdown and wait for the accept loop and open connections to finish.
    pub async fn stop(self) -> Result<(), ServerError> {
        self.shutdown.trigger();
        self.handle.await.unwrap()
    }
}

/// Start a server with default options.
pub async fn start_server(services: Vec<Service>) -> TestServer {
    start_server_with(ServerOptions::new(), services).await
}

pub async fn start_server_with(opts: ServerOptions, services: Vec<Service>) -> TestServer {
    let server = Arc::new(RpcServer::new(opts));
    for service in services {
        server.register(service).unwrap();
    }
    let listener = server.bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    let runner = server.clone();
    let handle = tokio::spawn(async move { runner.serve(listener, signal).await });

    TestServer {
        addr,
        server,
        shutdown,
        handle,
    }
}

/// Build a client for `servers`, each given as (logical name, address).
pub async fn client_for(
    servers: &[(&str, SocketAddr)],
    configure: impl FnOnce(DialOptions) -> DialOptions,
) -> RpcClient {
    let mut opts = DialOptions::new().with_connect_timeout(Duration::from_secs(2));
    for (name, addr) in servers {
        opts = opts.with_server(*name, ServerTarget::tcp(addr.to_string()));
    }
    RpcClient::connect(configure(opts)).await.unwrap()
}

/// Self-signed certificate and key PEM files for `name`, removed on drop.
/// The certificate is also the CA the client trusts.
pub struct CertFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl CertFiles {
    pub fn self_signed(name: &str) -> Self {
        let generated = rcgen::generate_simple_self_signed(vec![name.to_string()]).unwrap();
        let dir = std::env::temp_dir();
        let id = uuid::Uuid::new_v4();
        let cert = dir.join(format!("micro-rpc-{id}-cert.pem"));
        let key = dir.join(format!("micro-rpc-{id}-key.pem"));
        std::fs::write(&cert, generated.cert.pem()).unwrap();
        std::fs::write(&key, generated.key_pair.serialize_pem()).unwrap();
        Self { cert, key }
    }
}

impl Drop for CertFiles {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.cert);
        let _ = std::fs::remove_file(&self.key);
    }
}

/// Client whose only server, `name`, is reached over TLS at `addr`.
pub async fn tls_client_for(name: &str, addr: SocketAddr, ca: &CertFiles, server_name: &str) -> RpcClient {
    let target = ServerTarget::tcp(addr.to_string()).with_tls(ca.cert.clone(), server_name);
    let opts = DialOptions::new()
        .with_server(name, target)
        .with_pool_size(1)
        .with_connect_timeout(Duration::from_millis(500));
    RpcClient::connect(opts).await.unwrap()
}

/// `Arith.Add` sums a pair; `Arith.Div` rejects a zero divisor as a bad request.
pub fn arith_service() -> Service {
    Service::new("Arith")
        .method("Add", |_ctx: Context, (a, b): (i64, i64)| async move { Ok::<_, RpcError>(a + b) })
        .method("Div", |_ctx: Context, (a, b): (i64, i64)| async move {
            if b == 0 {
                return Err(RpcError::bad_request("Arith.Div", "division by zero"));
            }
            Ok(a / b)
        })
}

/// `Slow.Sleep` waits the given milliseconds and returns them;
/// `Slow.Fail` waits and then fails with a transport-class error.
pub fn slow_service() -> Service {
    Service::new("Slow")
        .method("Sleep", |_ctx: Context, ms: u64| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<_, RpcError>(ms)
        })
        .method("Fail", |_ctx: Context, ms: u64| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Err::<u64, _>(RpcError::internal("Slow.Fail", "backend unavailable"))
        })
}

/// `Flaky.Call` fails the first `failures` invocations, then answers `"recovered"`.
/// Every invocation is counted in `calls`.
pub fn flaky_service(failures: u32, calls: Arc<AtomicU32>) -> Service {
    Service::new("Flaky").method("Call", move |_ctx: Context, _: Value| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < failures {
                Err(RpcError::internal("Flaky.Call", format!("attempt {} failed", n + 1)))
            } else {
                Ok("recovered")
            }
        }
    })
}

/// `Echo.Headers` replies with the request's header and body unchanged.
pub fn echo_service() -> Service {
    Service::new("Echo").raw_method("Headers", |_ctx: Context, req: ServerRequest| async move {
        Ok::<_, RpcError>(Message::new(req.header, req.body))
    })
}
