//! RPC server: listener, accept loop and registration surface.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use crate::error::ServerError;
use crate::lifecycle::{Shutdown, ShutdownSignal};
use crate::net::{tls, ConnectionTracker};
use crate::server::connection::{dispatcher, serve_connection};
use crate::server::handler::{self, HandlerFn};
use crate::server::options::DEFAULT_PORT;
use crate::server::{MethodRegistry, ServerOptions, Service};

/// Pause after an accept error that is likely to repeat immediately.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// How long to wait before accepting again after `err`.
///
/// Errors tied to a single peer are retried at once. Anything else, such as
/// running out of file descriptors, pauses the loop so it does not spin.
fn accept_backoff(err: &io::Error) -> Option<Duration> {
    match err.kind() {
        io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset | io::ErrorKind::Interrupted => None,
        _ => Some(ACCEPT_ERROR_BACKOFF),
    }
}

/// Accepts connections and dispatches framed calls to registered services.
pub struct RpcServer {
    registry: Arc<MethodRegistry>,
    opts: ServerOptions,
    tracker: ConnectionTracker,
}

impl RpcServer {
    pub fn new(opts: ServerOptions) -> Self {
        Self {
            registry: Arc::new(MethodRegistry::new()),
            opts,
            tracker: ConnectionTracker::new(),
        }
    }

    /// Register `service` under its own name.
    pub fn register(&self, service: Service) -> Result<(), ServerError> {
        let name = service.name().to_string();
        self.registry.register(&name, service)
    }

    /// Register `service` under `name`, overriding its own.
    pub fn register_name(&self, name: &str, service: Service) -> Result<(), ServerError> {
        self.registry.register(name, service)
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    /// Connections currently open.
    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Bind and serve until the process exits.
    ///
    /// At most one address may be given; see [`resolve_address`].
    pub async fn run(&self, addrs: &[&str]) -> Result<(), ServerError> {
        let never = Shutdown::new();
        self.run_until(addrs, never.subscribe()).await
    }

    /// Bind and serve until `shutdown` fires.
    pub async fn run_until(&self, addrs: &[&str], shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let addr = resolve_address(addrs, &self.opts.port_env)?;
        let listener = self.bind(&addr).await?;
        self.serve(listener, shutdown).await
    }

    pub async fn bind(&self, addr: &str) -> Result<TcpListener, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(address = %listener.local_addr()?, tls = self.opts.tls.is_some(), "RPC server listening");
        Ok(listener)
    }

    /// Accept on `listener` until `shutdown` fires, then wait for open
    /// connections to finish their in-flight requests.
    pub async fn serve(&self, listener: TcpListener, mut shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let acceptor = match &self.opts.tls {
            Some(files) => Some(tls::load_server_acceptor(&files.cert_path, &files.key_path).map_err(ServerError::Tls)?),
            None => None,
        };
        let registry = self.registry.clone();
        let handler = handler::chain(
            &self.opts.wrappers,
            dispatcher(move |name| registry.lookup(name)),
        );

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    self.spawn_connection(stream, peer, acceptor.clone(), handler.clone(), shutdown.clone());
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Failed to accept connection");
                    if let Some(pause) = accept_backoff(&err) {
                        tokio::select! {
                            biased;
                            _ = shutdown.recv() => break,
                            _ = tokio::time::sleep(pause) => {}
                        }
                    }
                }
            }
        }

        tracing::info!(active = self.active_connections(), "RPC server stopping");
        self.tracker.wait_idle().await;
        tracing::info!("RPC server stopped");
        Ok(())
    }

    fn spawn_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        acceptor: Option<TlsAcceptor>,
        handler: HandlerFn,
        shutdown: ShutdownSignal,
    ) {
        let guard = self.tracker.track();
        tracing::debug!(connection_id = %guard.id(), peer_addr = %peer, "Connection accepted");
        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!(connection_id = %guard.id(), error = %err, "Failed to set TCP_NODELAY");
        }

        tokio::spawn(async move {
            let id = guard.id();
            match acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(stream) => serve_connection(stream, id, handler, shutdown).await,
                    Err(err) => {
                        tracing::warn!(connection_id = %id, peer_addr = %peer, error = %err, "TLS handshake failed");
                    }
                },
                None => serve_connection(stream, id, handler, shutdown).await,
            }
            drop(guard);
        });
    }
}

impl std::fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer")
            .field("methods", &self.registry.snapshot().methods())
            .field("opts", &self.opts)
            .field("active_connections", &self.active_connections())
            .finish()
    }
}

/// Pick the listen address.
///
/// An explicit address wins; otherwise the port comes from the `port_env`
/// environment variable, else 8080. A bare `:port` listens on all interfaces.
pub fn resolve_address(addrs: &[&str], port_env: &str) -> Result<String, ServerError> {
    let addr = match addrs {
        [] => match std::env::var(port_env) {
            Ok(port) if !port.is_empty() => {
                tracing::debug!(env = %port_env, port = %port, "Using port from environment");
                format!(":{port}")
            }
            _ => format!(":{DEFAULT_PORT}"),
        },
        [addr] => addr.to_string(),
        many => return Err(ServerError::TooManyAddresses(many.len())),
    };
    Ok(match addr.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => addr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_address_wins() {
        std::env::set_var("MICRO_RPC_TEST_PORT_EXPLICIT", "9999");
        assert_eq!(
            resolve_address(&["127.0.0.1:7000"], "MICRO_RPC_TEST_PORT_EXPLICIT").unwrap(),
            "127.0.0.1:7000"
        );
    }

    #[test]
    fn port_comes_from_environment() {
        std::env::set_var("MICRO_RPC_TEST_PORT_ENV", "9191");
        assert_eq!(resolve_address(&[], "MICRO_RPC_TEST_PORT_ENV").unwrap(), "0.0.0.0:9191");
    }

    #[test]
    fn defaults_to_8080() {
        assert_eq!(resolve_address(&[], "MICRO_RPC_TEST_PORT_UNSET").unwrap(), "0.0.0.0:8080");
        assert_eq!(resolve_address(&[":9000"], "MICRO_RPC_TEST_PORT_UNSET").unwrap(), "0.0.0.0:9000");
    }

    #[test]
    fn more_than_one_address_is_fatal() {
        let err = resolve_address(&[":1", ":2"], "PORT").unwrap_err();
        assert!(matches!(err, ServerError::TooManyAddresses(2)));
    }

    #[test]
    fn register_uses_service_name_unless_overridden() {
        let server = RpcServer::new(ServerOptions::new());
        let svc = || Service::new("Arith").method("Neg", |_ctx, a: i64| async move { Ok(-a) });
        server.register(svc()).unwrap();
        server.register_name("Math", svc()).unwrap();
        assert_eq!(server.registry().snapshot().methods(), ["Arith.Neg", "Math.Neg"]);
    }

    #[tokio::test]
    async fn missing_tls_files_fail_before_serving() {
        let server = RpcServer::new(ServerOptions::new().with_tls("/nonexistent/cert.pem", "/nonexistent/key.pem"));
        let listener = server.bind("127.0.0.1:0").await.unwrap();
        let err = server.serve(listener, Shutdown::new().subscribe()).await.unwrap_err();
        assert!(matches!(err, ServerError::Tls(_)));
    }

    #[test]
    fn only_persistent_accept_errors_pause_the_loop() {
        let peer_gone = io::Error::from(io::ErrorKind::ConnectionAborted);
        assert_eq!(accept_backoff(&peer_gone), None);
        assert_eq!(accept_backoff(&io::Error::from(io::ErrorKind::ConnectionReset)), None);

        // EMFILE
        let exhausted = io::Error::from_raw_os_error(24);
        assert_eq!(accept_backoff(&exhausted), Some(ACCEPT_ERROR_BACKOFF));
    }
}

