//! Traffic obfuscation layer
//!
//! Makes the outbound TLS leg look like an ordinary browser connection to
//! the decoy host:
//!
//! 1. **Decoy SNI**: the ClientHello names a hostname unrelated to the
//!    address actually dialed
//! 2. **Cipher ordering**: cipher suites are offered in the order a real
//!    browser would offer them
//!
//! Certificate verification is disabled on this leg. The peer presents a
//! certificate for the real endpoint, which can never match the decoy name.

mod fingerprint;

pub use fingerprint::{
    build_tls_config, BrowserProfile, DisabledVerifier, FingerprintConfig, FingerprintError,
};
