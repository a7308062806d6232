//! Configuration management
//!
//! Settings are read once from a TOML file, overlaid with environment
//! overrides, validated, and then handed to the runtime as a frozen value.
//! Nothing downstream re-validates.

use crate::obfuscation::BrowserProfile;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable that supplies the SSH password (preferred over the file)
pub const PASSWORD_ENV: &str = "DECOY_TUNNEL_PASSWORD";

/// Environment variable that overrides the SSH private key path
pub const KEY_FILE_ENV: &str = "DECOY_TUNNEL_SSH_KEY";

/// Older names for the two variables above, read when the new name is unset
pub const LEGACY_PASSWORD_ENV: &str = "TCP_TUNNEL_PASSWORD";
pub const LEGACY_KEY_FILE_ENV: &str = "TCP_TUNNEL_SSH_KEY";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local listeners and limits
    pub settings: Settings,
    /// Real SSH endpoint and credentials
    pub ssh: SshConfig,
    /// Decoy TLS identity
    pub sni: SniConfig,
    /// Session supervision timings
    pub supervisor: SupervisorConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load, apply environment overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::from_toml(&content)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML without overrides or validation
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content)?;
        if config.ssh.password.is_some() {
            config.ssh.password_source = Some(SecretSource::ConfigFile);
        }
        if let Some(key_file) = config.ssh.key_file.take() {
            config.ssh.key_file = Some(expand_home(&key_file));
        }
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay secrets supplied by the environment
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup_any = |names: [&str; 2]| {
            names
                .into_iter()
                .find_map(|name| lookup(name).filter(|value| !value.is_empty()))
        };

        if let Some(password) = lookup_any([PASSWORD_ENV, LEGACY_PASSWORD_ENV]) {
            self.ssh.password = Some(Secret(password));
            self.ssh.password_source = Some(SecretSource::Environment);
        }

        if let Some(key_file) = lookup_any([KEY_FILE_ENV, LEGACY_KEY_FILE_ENV]) {
            self.ssh.key_file = Some(expand_home(Path::new(&key_file)));
        }
    }

    /// Check every field, collecting all problems into one error
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.settings.listen_port == 0 {
            errors.push("settings.listen_port must be in 1-65535".to_string());
        }
        if self.settings.socks_port == 0 {
            errors.push("settings.socks_port must be in 1-65535".to_string());
        }
        if self.settings.listen_port == self.settings.socks_port {
            errors.push("settings.listen_port and settings.socks_port must differ".to_string());
        }
        if self.settings.max_connections == 0 {
            errors.push("settings.max_connections must be at least 1".to_string());
        }
        if self.settings.connect_timeout_secs == 0 {
            errors.push("settings.connect_timeout_secs must be non-zero".to_string());
        }

        if self.ssh.host.is_empty() {
            errors.push("ssh.host is required".to_string());
        } else if !is_valid_host(&self.ssh.host) {
            errors.push(format!("ssh.host is not a valid hostname: {}", self.ssh.host));
        }
        if self.ssh.port == 0 {
            errors.push("ssh.port must be in 1-65535".to_string());
        }
        if self.ssh.username.is_empty() {
            errors.push("ssh.username is required".to_string());
        }
        if self.ssh.password.is_none() && self.ssh.key_file.is_none() {
            errors.push("either ssh.password or ssh.key_file is required".to_string());
        }

        if self.sni.server_name.is_empty() {
            errors.push("sni.server_name is required".to_string());
        } else if !is_valid_host(&self.sni.server_name) {
            errors.push(format!(
                "sni.server_name is not a valid hostname: {}",
                self.sni.server_name
            ));
        }

        let s = &self.supervisor;
        for (name, value) in [
            ("supervisor.health_interval_secs", s.health_interval_secs),
            ("supervisor.reconnect_backoff_secs", s.reconnect_backoff_secs),
            ("supervisor.retry_backoff_secs", s.retry_backoff_secs),
            ("supervisor.socks_handshake_timeout_secs", s.socks_handshake_timeout_secs),
        ] {
            if value == 0 {
                errors.push(format!("{} must be non-zero", name));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

/// Local listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Address both local listeners bind to
    pub local_ip: IpAddr,
    /// Disguise tunnel port
    pub listen_port: u16,
    /// SOCKS5 port
    pub socks_port: u16,
    /// Ceiling on concurrently active circuits
    pub max_connections: usize,
    /// Share one budget between the tunnel and SOCKS5 listeners
    pub shared_budget: bool,
    /// TCP connect / TLS handshake timeout
    pub connect_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            local_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            listen_port: 9092,
            socks_port: 1080,
            max_connections: 100,
            shared_budget: true,
            connect_timeout_secs: 30,
        }
    }
}

impl Settings {
    pub fn tunnel_addr(&self) -> SocketAddr {
        SocketAddr::new(self.local_ip, self.listen_port)
    }

    pub fn socks_addr(&self) -> SocketAddr {
        SocketAddr::new(self.local_ip, self.socks_port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Where the SSH password came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretSource {
    Environment,
    ConfigFile,
}

/// A string that never shows up in logs
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(pub String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

/// SSH endpoint and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Real SSH host; also the physical destination of the TLS leg
    pub host: String,
    /// SSH port requested through the tunnel
    pub port: u16,
    pub username: String,
    pub password: Option<Secret>,
    /// Private key, preferred over the password when it exists
    pub key_file: Option<PathBuf>,
    pub key_passphrase: Option<Secret>,
    /// Optional SHA-256 host key pin (`SHA256:...`)
    pub host_key_fingerprint: Option<String>,
    #[serde(skip)]
    pub password_source: Option<SecretSource>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            username: String::new(),
            password: None,
            key_file: None,
            key_passphrase: None,
            host_key_fingerprint: None,
            password_source: None,
        }
    }
}

/// Decoy TLS identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SniConfig {
    /// Hostname placed in the ClientHello SNI extension
    pub server_name: String,
    /// Cipher suite ordering to imitate
    pub profile: BrowserProfile,
    /// ALPN protocols to advertise (empty = none)
    pub alpn: Vec<String>,
}

impl Default for SniConfig {
    fn default() -> Self {
        Self {
            server_name: String::new(),
            profile: BrowserProfile::Chrome,
            alpn: Vec::new(),
        }
    }
}

/// Session supervision timings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub health_interval_secs: u64,
    pub reconnect_backoff_secs: u64,
    pub retry_backoff_secs: u64,
    pub socks_handshake_timeout_secs: u64,
}

impl SupervisorConfig {
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn socks_handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.socks_handshake_timeout_secs)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            health_interval_secs: 5,
            reconnect_backoff_secs: 2,
            retry_backoff_secs: 5,
            socks_handshake_timeout_secs: 30,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (pretty, compact, json)
    pub format: LogFormat,
    /// Log file path (optional, stdout otherwise)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

/// Generate example configuration
pub fn generate_example_config() -> Config {
    Config {
        ssh: SshConfig {
            host: "203.0.113.5".to_string(),
            port: 443,
            username: "tunnel".to_string(),
            key_file: Some(PathBuf::from("~/.ssh/id_ed25519")),
            ..SshConfig::default()
        },
        sni: SniConfig {
            server_name: "cdn.example.com".to_string(),
            ..SniConfig::default()
        },
        ..Config::default()
    }
}

/// RFC 1123 hostname or IP literal
pub fn is_valid_host(host: &str) -> bool {
    if host.parse::<IpAddr>().is_ok() {
        return true;
    }
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [ssh]
        host = "203.0.113.5"
        port = 443
        username = "alice"
        password = "hunter2"

        [sni]
        server_name = "cdn.example.com"
    "#;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(config.settings.listen_port, 9092);
        assert_eq!(config.settings.socks_port, 1080);
        assert_eq!(config.settings.max_connections, 100);
        assert!(config.settings.shared_budget);
        assert_eq!(config.supervisor.health_interval_secs, 5);
        assert_eq!(config.sni.profile, BrowserProfile::Chrome);
        assert_eq!(config.ssh.password_source, Some(SecretSource::ConfigFile));
        config.validate().unwrap();
    }

    #[test]
    fn test_env_password_wins() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.apply_env(|key| (key == PASSWORD_ENV).then(|| "from-env".to_string()));

        assert_eq!(config.ssh.password.as_ref().unwrap().expose(), "from-env");
        assert_eq!(config.ssh.password_source, Some(SecretSource::Environment));
    }

    #[test]
    fn test_env_key_file_override() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.apply_env(|key| (key == KEY_FILE_ENV).then(|| "/tmp/id_test".to_string()));
        assert_eq!(config.ssh.key_file, Some(PathBuf::from("/tmp/id_test")));
    }

    #[test]
    fn test_legacy_env_names_accepted() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.apply_env(|key| match key {
            LEGACY_PASSWORD_ENV => Some("legacy".to_string()),
            LEGACY_KEY_FILE_ENV => Some("/tmp/id_legacy".to_string()),
            _ => None,
        });

        assert_eq!(config.ssh.password.as_ref().unwrap().expose(), "legacy");
        assert_eq!(config.ssh.key_file, Some(PathBuf::from("/tmp/id_legacy")));
    }

    #[test]
    fn test_new_env_name_beats_legacy() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.apply_env(|key| match key {
            PASSWORD_ENV => Some("new".to_string()),
            LEGACY_PASSWORD_ENV => Some("legacy".to_string()),
            _ => None,
        });
        assert_eq!(config.ssh.password.as_ref().unwrap().expose(), "new");
    }

    #[test]
    fn test_missing_required_fields_reported_together() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        let ConfigError::Invalid(problems) = err else {
            panic!("expected validation error");
        };
        assert!(problems.iter().any(|p| p.contains("ssh.host")));
        assert!(problems.iter().any(|p| p.contains("ssh.username")));
        assert!(problems.iter().any(|p| p.contains("sni.server_name")));
        assert!(problems.iter().any(|p| p.contains("ssh.password or ssh.key_file")));
    }

    #[test]
    fn test_rejects_zero_port_and_bad_hostname() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.settings.socks_port = 0;
        config.sni.server_name = "-bad-.example".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("settings.socks_port"));
        assert!(err.contains("sni.server_name"));
    }

    #[test]
    fn test_password_is_redacted_in_debug() {
        let config = Config::from_toml(MINIMAL).unwrap();
        let debug = format!("{:?}", config.ssh);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_hostname_rules() {
        assert!(is_valid_host("cdn.example.com"));
        assert!(is_valid_host("203.0.113.5"));
        assert!(is_valid_host("::1"));
        assert!(!is_valid_host(""));
        assert!(!is_valid_host("a..b"));
        assert!(!is_valid_host("under_score.com"));
        assert!(!is_valid_host(&"a".repeat(64)));
    }

    #[test]
    fn test_example_config_round_trips_through_toml() {
        let example = generate_example_config();
        let text = toml::to_string_pretty(&example).unwrap();
        let parsed = Config::from_toml(&text).unwrap();
        assert_eq!(parsed.sni.server_name, "cdn.example.com");
        assert_eq!(parsed.ssh.port, 443);
    }

    #[test]
    fn test_log_format_parses() {
        let config = Config::from_toml("[logging]\nformat = \"json\"\nlevel = \"debug\"").unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "debug");
    }
}
