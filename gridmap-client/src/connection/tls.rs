//! TLS transport setup from configured certificate paths.

use std::sync::Arc;

use gridmap_core::{GridError, Result};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio_rustls::rustls::{ClientConfig as RustlsConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::config::SessionConfig;

fn load_certs(path: &std::path::Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem = std::fs::read(path).map_err(|e| {
        GridError::Configuration(format!("failed to read certificate {}: {}", path.display(), e))
    })?;
    rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            GridError::Configuration(format!("failed to parse {}: {}", path.display(), e))
        })
}

fn load_key(path: &std::path::Path) -> Result<PrivateKeyDer<'static>> {
    let pem = std::fs::read(path).map_err(|e| {
        GridError::Configuration(format!("failed to read key {}: {}", path.display(), e))
    })?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|e| GridError::Configuration(format!("failed to parse {}: {}", path.display(), e)))?
        .ok_or_else(|| {
            GridError::Configuration(format!("no private key found in {}", path.display()))
        })
}

/// Wraps an established TCP stream in TLS per the session configuration.
pub(super) async fn wrap(
    stream: TcpStream,
    config: &SessionConfig,
) -> Result<TlsStream<TcpStream>> {
    let ca_path = config.ca_cert_path().ok_or_else(|| {
        GridError::Configuration("TLS is enabled but no CA certificate path is configured".into())
    })?;

    let mut roots = RootCertStore::empty();
    for cert in load_certs(ca_path)? {
        roots.add(cert).map_err(|e| {
            GridError::Configuration(format!("invalid CA certificate in {}: {}", ca_path.display(), e))
        })?;
    }

    let builder = RustlsConfig::builder().with_root_certificates(roots);
    let tls_config = match (config.client_cert_path(), config.client_key_path()) {
        (Some(cert_path), Some(key_path)) => builder
            .with_client_auth_cert(load_certs(cert_path)?, load_key(key_path)?)
            .map_err(|e| GridError::Configuration(format!("invalid client auth material: {}", e)))?,
        _ => builder.with_no_client_auth(),
    };

    let host = config
        .address()
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(config.address())
        .to_string();
    let server_name = ServerName::try_from(host)
        .map_err(|e| GridError::Configuration(format!("invalid TLS server name: {}", e)))?;

    let connector = TlsConnector::from(Arc::new(tls_config));
    connector
        .connect(server_name, stream)
        .await
        .map_err(|e| GridError::Connection(format!("TLS handshake failed: {}", e)))
}
