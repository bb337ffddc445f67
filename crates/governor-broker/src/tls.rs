//! TLS client setup for the controller connection.
//!
//! The controller presents a certificate signed by its own CA; only that CA
//! (the `cacert` from the credentials) is trusted.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore, crypto};

use crate::rpc::RpcError;

/// Builds TLS sessions to the controller.
#[derive(Clone)]
pub struct ControllerTls {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl ControllerTls {
    /// Trust the certificates in `ca_pem` and verify the controller as
    /// `server_name`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Tls`] if the PEM holds no usable certificate or
    /// the server name is not a valid DNS name or IP address.
    pub fn new(ca_pem: &str, server_name: &str) -> Result<Self, RpcError> {
        let mut roots = RootCertStore::empty();
        let mut reader = ca_pem.as_bytes();
        for cert in rustls_pemfile::certs(&mut reader) {
            let cert = cert.map_err(|e| RpcError::Tls(format!("unreadable CA certificate: {e}")))?;
            roots
                .add(cert)
                .map_err(|e| RpcError::Tls(format!("rejected CA certificate: {e}")))?;
        }
        if roots.is_empty() {
            return Err(RpcError::Tls("no CA certificate in cacert".to_owned()));
        }

        let config = ClientConfig::builder_with_provider(Arc::new(crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| RpcError::Tls(e.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth();

        let server_name = ServerName::try_from(server_name.to_owned())
            .map_err(|e| RpcError::Tls(format!("invalid server name {server_name}: {e}")))?;

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            server_name,
        })
    }

    /// Open a TCP connection to `addr` and run the TLS handshake.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Connect`] if the TCP connection fails and
    /// [`RpcError::Tls`] if the handshake fails.
    pub async fn connect(&self, addr: &str) -> Result<TlsStream<TcpStream>, RpcError> {
        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|e| RpcError::Connect {
                addr: addr.to_owned(),
                reason: e.to_string(),
            })?;
        self.connector
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(|e| RpcError::Tls(format!("handshake with {addr} failed: {e}")))
    }
}

impl std::fmt::Debug for ControllerTls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerTls")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}
