//! Outbound connection establishment for client pools.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{lookup_host, TcpStream};
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;

use crate::client::ServerTarget;
use crate::error::RpcError;
use crate::net::tls;

const DIAL_ID: &str = "micro_rpc.net.dial";

/// Byte stream a connection can run over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedTransport = Box<dyn Transport>;

/// Opens transports to one [`ServerTarget`].
///
/// TLS material is loaded once at construction so each dial only pays for
/// the handshake.
#[derive(Clone)]
pub struct Dialer {
    target: ServerTarget,
    connect_timeout: Duration,
    tls: Option<(TlsConnector, ServerName<'static>)>,
}

impl Dialer {
    pub fn new(target: ServerTarget, connect_timeout: Duration) -> io::Result<Self> {
        let tls = match (&target.cert_file, &target.tls_server_name) {
            (Some(ca), Some(name)) => Some((tls::load_client_connector(ca)?, tls::server_name(name)?)),
            _ => None,
        };
        Ok(Self { target, connect_timeout, tls })
    }

    pub fn target(&self) -> &ServerTarget {
        &self.target
    }

    /// Connect, bounded by the connect timeout.
    pub async fn dial(&self) -> Result<BoxedTransport, RpcError> {
        match tokio::time::timeout(self.connect_timeout, self.dial_inner()).await {
            Ok(result) => result.map_err(|e| self.error(e)),
            Err(_) => Err(self.error(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("timed out after {:?}", self.connect_timeout),
            ))),
        }
    }

    async fn dial_inner(&self) -> io::Result<BoxedTransport> {
        match self.target.network.as_str() {
            "tcp" | "tcp4" | "tcp6" => {
                let stream = self.connect_tcp().await?;
                stream.set_nodelay(true)?;
                self.secure(stream).await
            }
            #[cfg(unix)]
            "unix" => {
                let stream = tokio::net::UnixStream::connect(&self.target.address).await?;
                self.secure(stream).await
            }
            other => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("unsupported network {other:?}"),
            )),
        }
    }

    /// Run the TLS handshake over `stream` when the target is configured for it.
    async fn secure<S: Transport>(&self, stream: S) -> io::Result<BoxedTransport> {
        match &self.tls {
            Some((connector, name)) => {
                let stream = connector.connect(name.clone(), stream).await?;
                Ok(Box::new(stream))
            }
            None => Ok(Box::new(stream)),
        }
    }

    async fn connect_tcp(&self) -> io::Result<TcpStream> {
        let family: fn(&SocketAddr) -> bool = match self.target.network.as_str() {
            "tcp4" => SocketAddr::is_ipv4,
            "tcp6" => SocketAddr::is_ipv6,
            _ => |_| true,
        };
        let mut last_err = None;
        for addr in lookup_host(&self.target.address).await?.filter(family) {
            match TcpStream::connect(addr).await {
                Ok(stream) => return Ok(stream),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no addresses resolved for requested network")
        }))
    }

    fn error(&self, err: io::Error) -> RpcError {
        RpcError::internal(
            DIAL_ID,
            format!("dial {} {}: {err}", self.target.network, self.target.address),
        )
    }
}

impl std::fmt::Debug for Dialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialer")
            .field("target", &self.target)
            .field("connect_timeout", &self.connect_timeout)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn dials_plain_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dialer = Dialer::new(ServerTarget::tcp(addr.to_string()), Duration::from_secs(1)).unwrap();

        let (dialed, accepted) = tokio::join!(dialer.dial(), listener.accept());
        assert!(dialed.is_ok());
        assert!(accepted.is_ok());
    }

    #[tokio::test]
    async fn family_filter_rejects_mismatched_addresses() {
        let mut target = ServerTarget::tcp("127.0.0.1:1");
        target.network = "tcp6".into();
        let err = Dialer::new(target, Duration::from_secs(1)).unwrap().dial().await.err().unwrap();
        assert_eq!(err.code(), 500);
        assert!(err.to_string().contains("tcp6 127.0.0.1:1"));
    }

    #[tokio::test]
    async fn unknown_network_is_rejected() {
        let mut target = ServerTarget::tcp("127.0.0.1:1");
        target.network = "udp".into();
        let err = Dialer::new(target, Duration::from_secs(1)).unwrap().dial().await.err().unwrap();
        assert!(err.to_string().contains("unsupported network"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dials_unix_sockets() {
        let path = std::env::temp_dir().join(format!("micro-rpc-{}.sock", uuid::Uuid::new_v4()));
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        let dialer = Dialer::new(ServerTarget::unix(path.to_string_lossy()), Duration::from_secs(1)).unwrap();

        let (dialed, accepted) = tokio::join!(dialer.dial(), listener.accept());
        assert!(dialed.is_ok());
        assert!(accepted.is_ok());
        std::fs::remove_file(path).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_targets_negotiate_tls() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let certs = tls::test_certs::CertFiles::self_signed("rpc.local");
        let path = std::env::temp_dir().join(format!("micro-rpc-{}.sock", uuid::Uuid::new_v4()));
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        let acceptor = tls::load_server_acceptor(&certs.cert, &certs.key).unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = acceptor.accept(stream).await.unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"ping");
            stream.write_all(b"pong").await.unwrap();
            stream.flush().await.unwrap();
        });

        let target = ServerTarget::unix(path.to_string_lossy()).with_tls(certs.cert.clone(), "rpc.local");
        let mut stream = Dialer::new(target, Duration::from_secs(2)).unwrap().dial().await.unwrap();
        stream.write_all(b"ping").await.unwrap();
        stream.flush().await.unwrap();
        let mut reply = [0u8; 4];
        stream.read_exact(&mut reply).await.unwrap();

        assert_eq!(&reply, b"pong");
        server.await.unwrap();
        std::fs::remove_file(path).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_tls_never_falls_back_to_plaintext() {
        use tokio::io::AsyncReadExt;

        let certs = tls::test_certs::CertFiles::self_signed("rpc.local");
        let path = std::env::temp_dir().join(format!("micro-rpc-{}.sock", uuid::Uuid::new_v4()));
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        let target = ServerTarget::unix(path.to_string_lossy()).with_tls(certs.cert.clone(), "rpc.local");
        let dialer = Dialer::new(target, Duration::from_secs(2)).unwrap();

        // A plaintext peer: reads the first byte, then hangs up.
        let peer = async {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.read_u8().await.unwrap()
        };
        let (dialed, first_byte) = tokio::join!(dialer.dial(), peer);

        assert_eq!(first_byte, 0x16, "expected a TLS handshake record");
        assert!(dialed.is_err());
        std::fs::remove_file(path).unwrap();
    }
}
