//! TLS configuration and certificate loading.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio_rustls::rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};

fn ensure_exists(path: &Path, what: &str) -> io::Result<()> {
    if !path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{what} file not found: {:?}", path),
        ));
    }
    Ok(())
}

fn invalid_data(err: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err.to_string())
}

fn load_certs(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    ensure_exists(path, "Certificate")?;
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<io::Result<Vec<_>>>()?;
    if certs.is_empty() {
        return Err(invalid_data(format!("no certificates in {:?}", path)));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    ensure_exists(path, "Private key")?;
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| invalid_data(format!("no private key in {:?}", path)))
}

/// Build a server-side acceptor from PEM certificate chain and key files.
pub fn load_server_acceptor(cert_path: &Path, key_path: &Path) -> io::Result<TlsAcceptor> {
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(invalid_data)?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(invalid_data)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Build a client-side connector trusting the CA certificates in `ca_path`.
pub fn load_client_connector(ca_path: &Path) -> io::Result<TlsConnector> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(ca_path)? {
        roots.add(cert).map_err(invalid_data)?;
    }

    let config = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(invalid_data)?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Parse the name the server certificate is verified against.
pub fn server_name(name: &str) -> io::Result<ServerName<'static>> {
    ServerName::try_from(name.to_string()).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}


#[cfg(test)]
pub(crate) mod test_certs {
    use std::path::PathBuf;

    /// Self-signed certificate and key written to temp files, removed on drop.
    /// The certificate doubles as the CA clients trust.
    pub struct CertFiles {
        pub cert: PathBuf,
        pub key: PathBuf,
    }

    impl CertFiles {
        pub fn self_signed(name: &str) -> Self {
            let generated = rcgen::generate_simple_self_signed(vec![name.to_string()]).unwrap();
            let stem = std::env::temp_dir().join(format!("micro-rpc-{}", uuid::Uuid::new_v4()));
            let cert = stem.with_extension("crt.pem");
            let key = stem.with_extension("key.pem");
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
}
