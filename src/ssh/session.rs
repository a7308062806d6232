//! russh-backed session, host key policy and client authentication

use super::{ChannelStream, Session, SshError};
use crate::config::{Secret, SecretSource, SshConfig};
use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::{load_secret_key, HashAlg, PrivateKeyWithHashAlg, PublicKey};
use russh::Disconnect;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Host key policy for one connection attempt
#[derive(Debug, Clone)]
pub struct ClientHandler {
    host: String,
    pinned_fingerprint: Option<String>,
}

impl ClientHandler {
    pub fn new(host: impl Into<String>, pinned_fingerprint: Option<String>) -> Self {
        Self {
            host: host.into(),
            pinned_fingerprint,
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        let actual = server_public_key.fingerprint(HashAlg::Sha256).to_string();

        let Some(expected) = &self.pinned_fingerprint else {
            // The TLS peer identity is fictitious anyway; nothing to check against
            debug!(host = %self.host, fingerprint = %actual, "Accepting unpinned host key");
            return Ok(true);
        };

        if fingerprints_match(expected, &actual) {
            debug!(host = %self.host, fingerprint = %actual, "Host key matches pin");
            Ok(true)
        } else {
            error!(
                host = %self.host,
                expected = %expected,
                actual = %actual,
                "Host key fingerprint mismatch"
            );
            Ok(false)
        }
    }
}

/// Compare SHA-256 fingerprints; the `SHA256:` prefix and base64 padding are optional
pub fn fingerprints_match(expected: &str, actual: &str) -> bool {
    fn normalize(fp: &str) -> &str {
        let fp = fp.trim();
        let fp = fp.strip_prefix("SHA256:").unwrap_or(fp);
        fp.trim_end_matches('=')
    }
    normalize(expected) == normalize(actual)
}

/// A live russh client session
pub struct RusshSession {
    handle: Handle<ClientHandler>,
    closed: AtomicBool,
}

impl RusshSession {
    pub fn new(handle: Handle<ClientHandler>) -> Self {
        Self {
            handle,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Session for RusshSession {
    async fn open_direct_tcpip(
        &self,
        host: &str,
        port: u16,
        originator: SocketAddr,
    ) -> Result<ChannelStream, SshError> {
        let channel = self
            .handle
            .channel_open_direct_tcpip(
                host,
                port.into(),
                originator.ip().to_string(),
                originator.port().into(),
            )
            .await
            .map_err(|e| SshError::ChannelOpen {
                target: format!("{}:{}", host, port),
                reason: e.to_string(),
            })?;

        Ok(Box::new(channel.into_stream()))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.handle.is_closed()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!(error = %e, "SSH disconnect failed");
        }
    }
}

/// Authenticate, preferring the private key over the password.
///
/// A configured key file that doesn't exist, or a key the server rejects,
/// falls back to the password when one is available.
pub async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    ssh: &SshConfig,
) -> Result<(), SshError> {
    let mut key_tried = false;

    if let Some(path) = &ssh.key_file {
        if path.exists() {
            key_tried = true;
            let passphrase = ssh.key_passphrase.as_ref().map(Secret::expose);
            let key = load_secret_key(path, passphrase)?;
            let hash_alg = handle.best_supported_rsa_hash().await?.flatten();

            let result = handle
                .authenticate_publickey(
                    ssh.username.clone(),
                    PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                )
                .await?;

            if result.success() {
                info!(user = %ssh.username, key = %path.display(), "Authenticated with private key");
                return Ok(());
            }
            warn!(user = %ssh.username, key = %path.display(), "Private key rejected");
        } else {
            warn!(key = %path.display(), "Key file not found, falling back to password");
        }
    }

    let Some(password) = &ssh.password else {
        return Err(if key_tried {
            SshError::AuthFailed(ssh.username.clone())
        } else {
            SshError::NoCredentials
        });
    };

    if ssh.password_source == Some(SecretSource::ConfigFile) {
        debug!("Using SSH password from config file");
    }

    let result = handle
        .authenticate_password(ssh.username.clone(), password.expose())
        .await?;

    if result.success() {
        info!(user = %ssh.username, "Authenticated with password");
        Ok(())
    } else {
        Err(SshError::AuthFailed(ssh.username.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::client::Handler;

    const TEST_KEY: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8g test";
    const TEST_FINGERPRINT: &str = "SHA256:mKqU+0K8OhKmA8bBQi9Rz0Q5l7/g160hIP+rJYSTNj4";

    fn test_key() -> PublicKey {
        PublicKey::from_openssh(TEST_KEY).unwrap()
    }

    #[test]
    fn test_fingerprint_normalization() {
        assert!(fingerprints_match(TEST_FINGERPRINT, TEST_FINGERPRINT));
        assert!(fingerprints_match(
            "mKqU+0K8OhKmA8bBQi9Rz0Q5l7/g160hIP+rJYSTNj4",
            TEST_FINGERPRINT
        ));
        assert!(fingerprints_match(
            " SHA256:mKqU+0K8OhKmA8bBQi9Rz0Q5l7/g160hIP+rJYSTNj4= ",
            TEST_FINGERPRINT
        ));
        assert!(!fingerprints_match("SHA256:AAAA", TEST_FINGERPRINT));
    }

    #[test]
    fn test_fingerprint_format() {
        let actual = test_key().fingerprint(HashAlg::Sha256).to_string();
        assert!(fingerprints_match(TEST_FINGERPRINT, &actual));
    }

    #[tokio::test]
    async fn test_unpinned_host_key_accepted() {
        let mut handler = ClientHandler::new("ssh.internal", None);
        assert!(handler.check_server_key(&test_key()).await.unwrap());
    }

    #[tokio::test]
    async fn test_pinned_host_key() {
        let mut good = ClientHandler::new("ssh.internal", Some(TEST_FINGERPRINT.to_string()));
        assert!(good.check_server_key(&test_key()).await.unwrap());

        let mut bad = ClientHandler::new(
            "ssh.internal",
            Some("SHA256:47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU".to_string()),
        );
        assert!(!bad.check_server_key(&test_key()).await.unwrap());
    }
}
