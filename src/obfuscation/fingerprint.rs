//! TLS ClientHello shaping
//!
//! Censors use JA3/JA4 fingerprinting to spot non-browser TLS clients. The
//! cipher suite order is the part of the fingerprint rustls lets us control,
//! so each profile offers suites in the order its browser does.
//!
//! ## Limitations
//!
//! rustls doesn't provide full control over ClientHello construction
//! (extension order, GREASE). The mimicry here is best-effort.

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::ring as ring_provider;
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme, SupportedCipherSuite};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Browser fingerprint profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserProfile {
    /// Chrome 120+ (also Edge and Android Chrome)
    #[default]
    Chrome,
    /// Firefox 121+
    Firefox,
    /// Safari 17+ on macOS/iOS
    Safari,
}

/// TLS fingerprint configuration
#[derive(Debug, Clone, Default)]
pub struct FingerprintConfig {
    /// Browser profile to mimic
    pub profile: BrowserProfile,
    /// ALPN protocols to advertise
    pub alpn_protocols: Vec<String>,
}

impl FingerprintConfig {
    pub fn new(profile: BrowserProfile) -> Self {
        Self {
            profile,
            alpn_protocols: Vec::new(),
        }
    }

    pub fn with_alpn(mut self, protocols: Vec<String>) -> Self {
        self.alpn_protocols = protocols;
        self
    }
}

/// Build the rustls client config used for every decoy handshake.
///
/// TLS 1.2 is the floor; server certificates are accepted unchecked.
pub fn build_tls_config(config: &FingerprintConfig) -> Result<ClientConfig, FingerprintError> {
    let crypto_provider = CryptoProvider {
        cipher_suites: get_cipher_suites(config.profile),
        ..ring_provider::default_provider()
    };

    let mut tls_config = ClientConfig::builder_with_provider(Arc::new(crypto_provider))
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .map_err(|e| FingerprintError::Config(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(DisabledVerifier::new()))
        .with_no_client_auth();

    tls_config.alpn_protocols = config
        .alpn_protocols
        .iter()
        .map(|p| p.as_bytes().to_vec())
        .collect();

    Ok(tls_config)
}

/// Get cipher suites ordered to match browser profile
fn get_cipher_suites(profile: BrowserProfile) -> Vec<SupportedCipherSuite> {
    use rustls::crypto::ring::cipher_suite;

    match profile {
        BrowserProfile::Chrome => vec![
            // TLS 1.3 cipher suites
            cipher_suite::TLS13_AES_128_GCM_SHA256,
            cipher_suite::TLS13_AES_256_GCM_SHA384,
            cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
            // TLS 1.2 cipher suites
            cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
            cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
            cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
            cipher_suite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
            cipher_suite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
        ],
        BrowserProfile::Firefox => vec![
            cipher_suite::TLS13_AES_128_GCM_SHA256,
            cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
            cipher_suite::TLS13_AES_256_GCM_SHA384,
            cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
            cipher_suite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
            cipher_suite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
            cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
            cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        ],
        BrowserProfile::Safari => vec![
            cipher_suite::TLS13_AES_128_GCM_SHA256,
            cipher_suite::TLS13_AES_256_GCM_SHA384,
            cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
            cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
            cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
            cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
            cipher_suite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
            cipher_suite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
        ],
    }
}

/// Accepts any server certificate, still checking handshake signatures
#[derive(Debug)]
pub struct DisabledVerifier {
    supported_algs: WebPkiSupportedAlgorithms,
}

impl DisabledVerifier {
    pub fn new() -> Self {
        Self {
            supported_algs: ring_provider::default_provider().signature_verification_algorithms,
        }
    }
}

impl Default for DisabledVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerCertVerifier for DisabledVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.supported_algs)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.supported_algs)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.supported_algs.supported_schemes()
    }
}

/// Fingerprint-related errors
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    #[error("TLS configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_chrome_config() {
        let config = FingerprintConfig::new(BrowserProfile::Chrome);
        let tls_config = build_tls_config(&config).unwrap();

        assert!(tls_config.alpn_protocols.is_empty());
        assert!(tls_config.enable_sni);
    }

    #[test]
    fn test_alpn_is_advertised() {
        let config = FingerprintConfig::new(BrowserProfile::Firefox)
            .with_alpn(vec!["h2".to_string(), "http/1.1".to_string()]);
        let tls_config = build_tls_config(&config).unwrap();

        assert_eq!(
            tls_config.alpn_protocols,
            vec![b"h2".to_vec(), b"http/1.1".to_vec()]
        );
    }

    #[test]
    fn test_profiles_order_suites_differently() {
        let chrome = get_cipher_suites(BrowserProfile::Chrome);
        let firefox = get_cipher_suites(BrowserProfile::Firefox);
        let safari = get_cipher_suites(BrowserProfile::Safari);

        let names = |suites: &[SupportedCipherSuite]| -> Vec<_> {
            suites.iter().map(|s| s.suite()).collect()
        };
        assert_ne!(names(&chrome), names(&firefox));
        assert_ne!(names(&chrome), names(&safari));
        assert_eq!(chrome.len(), firefox.len());
    }

    #[test]
    fn test_profile_parses_from_config_string() {
        #[derive(Deserialize)]
        struct Wrapper {
            profile: BrowserProfile,
        }
        let parsed: Wrapper = toml::from_str("profile = \"safari\"").unwrap();
        assert_eq!(parsed.profile, BrowserProfile::Safari);
    }
}
