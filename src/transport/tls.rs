//! TLS transport with a decoy SNI
//!
//! The TCP connection goes to the real endpoint while the ClientHello names
//! the decoy host. The certificate the peer returns is for whatever it
//! really is, so verification is disabled (see [`DisabledVerifier`]).
//!
//! [`DisabledVerifier`]: crate::obfuscation::DisabledVerifier

use super::{connect_tcp, TransportError};
use crate::obfuscation::{build_tls_config, FingerprintConfig};
use rustls::pki_types::ServerName;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};
use tracing::debug;

/// Client TLS stream produced by [`DecoyTlsConnector`]
pub type DecoyTlsStream = TlsStream<TcpStream>;

/// Dials TCP endpoints and wraps them in TLS presenting the decoy SNI
#[derive(Clone)]
pub struct DecoyTlsConnector {
    connector: TlsConnector,
    server_name: ServerName<'static>,
    decoy: String,
    timeout: Duration,
}

impl DecoyTlsConnector {
    /// Create a connector presenting `decoy` in every ClientHello
    pub fn new(
        decoy: impl Into<String>,
        fingerprint: &FingerprintConfig,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let decoy = decoy.into();
        let tls_config =
            build_tls_config(fingerprint).map_err(|e| TransportError::Tls(e.to_string()))?;

        // This is what appears in the ClientHello
        let server_name = ServerName::try_from(decoy.clone())
            .map_err(|e| TransportError::InvalidSni(format!("{}: {}", decoy, e)))?;

        Ok(Self {
            connector: TlsConnector::from(Arc::new(tls_config)),
            server_name,
            decoy,
            timeout,
        })
    }

    /// Get the SNI being used
    pub fn decoy(&self) -> &str {
        &self.decoy
    }

    /// Connect to `host:port` and complete the TLS handshake
    pub async fn connect(&self, host: &str, port: u16) -> Result<DecoyTlsStream, TransportError> {
        let tcp_stream = connect_tcp(host, port, self.timeout).await?;

        let tls_stream = tokio::time::timeout(
            self.timeout,
            self.connector.connect(self.server_name.clone(), tcp_stream),
        )
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|e| TransportError::Tls(e.to_string()))?;

        let (_, session) = tls_stream.get_ref();
        debug!(
            version = ?session.protocol_version(),
            cipher = ?session.negotiated_cipher_suite().map(|s| s.suite()),
            sni = %self.decoy,
            "TLS handshake complete"
        );

        Ok(tls_stream)
    }
}
