//! Configuration for Petrel

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server identity
    #[serde(default)]
    pub server: ServerConfig,

    /// SMTP configuration
    #[serde(default)]
    pub smtp: SmtpConfig,

    /// IMAP configuration
    #[serde(default)]
    pub imap: ImapConfig,

    /// Security configuration (relay, tarpit)
    #[serde(default)]
    pub security: SecurityConfig,

    /// Blob storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// TLS configuration
    pub tls: Option<TlsConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hostname advertised in banners and greetings
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// The domain this server accepts mail for
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Bind address for all listeners
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl ServerConfig {
    /// Hostname to put on the wire. Falls back to `mail.<domain>` when the
    /// configured hostname is a loopback placeholder.
    pub fn advertised_hostname(&self) -> String {
        let configured = self.hostname.trim();
        match configured.to_ascii_lowercase().as_str() {
            "" | "localhost" | "mail.localhost" | "127.0.0.1" | "::1" => {
                let domain = self.domain.trim().to_ascii_lowercase();
                if domain.is_empty() || domain == "localhost" {
                    "localhost".to_string()
                } else {
                    format!("mail.{}", domain)
                }
            }
            _ => configured.to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            domain: default_domain(),
            bind_address: default_bind_address(),
        }
    }
}

fn default_hostname() -> String {
    "mail.localhost".to_string()
}

fn default_domain() -> String {
    "localhost".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

/// SMTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// MTA port (plain text, STARTTLS upgrade)
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    /// Submission port (RFC 6409; dual-mode TLS detection)
    #[serde(default = "default_submission_port")]
    pub submission_port: u16,

    /// SMTPS port (implicit TLS, RFC 8314)
    #[serde(default = "default_smtps_port")]
    pub tls_port: u16,

    /// Banner text appended after the hostname in the 220 greeting
    #[serde(default = "default_banner")]
    pub banner: String,

    /// Maximum message size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Maximum recipients per transaction
    #[serde(default = "default_max_recipients")]
    pub max_recipients: usize,

    /// Idle session timeout in seconds
    #[serde(default = "default_smtp_timeout")]
    pub timeout_secs: u64,

    /// Require authentication for MAIL FROM on the submission port
    #[serde(default = "default_require_auth_on_submission")]
    pub require_auth_on_submission: bool,

    /// Maximum concurrent connections per listener
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            port: default_smtp_port(),
            submission_port: default_submission_port(),
            tls_port: default_smtps_port(),
            banner: default_banner(),
            max_message_size: default_max_message_size(),
            max_recipients: default_max_recipients(),
            timeout_secs: default_smtp_timeout(),
            require_auth_on_submission: default_require_auth_on_submission(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_smtp_port() -> u16 {
    25
}

fn default_submission_port() -> u16 {
    587
}

fn default_smtps_port() -> u16 {
    465
}

fn default_banner() -> String {
    "Petrel ESMTP Server Ready".to_string()
}

fn default_max_message_size() -> usize {
    25 * 1024 * 1024
}

fn default_max_recipients() -> usize {
    100
}

fn default_smtp_timeout() -> u64 {
    300
}

fn default_require_auth_on_submission() -> bool {
    true
}

fn default_max_connections() -> usize {
    1000
}

/// IMAP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapConfig {
    /// IMAP port (plain text, STARTTLS upgrade)
    #[serde(default = "default_imap_port")]
    pub port: u16,

    /// IMAPS port (implicit TLS)
    #[serde(default = "default_imaps_port")]
    pub tls_port: u16,

    /// Maximum command line length in bytes
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,

    /// Idle session timeout in seconds
    #[serde(default = "default_imap_timeout")]
    pub timeout_secs: u64,

    /// Maximum concurrent connections per listener
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            port: default_imap_port(),
            tls_port: default_imaps_port(),
            max_line_length: default_max_line_length(),
            timeout_secs: default_imap_timeout(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_imap_port() -> u16 {
    143
}

fn default_imaps_port() -> u16 {
    993
}

fn default_max_line_length() -> usize {
    65536
}

fn default_imap_timeout() -> u64 {
    1800
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Remote IPs permitted to relay without authentication
    #[serde(default = "default_relay_ips")]
    pub relay_ips: Vec<String>,

    /// Authentication failures tolerated before the connection is dropped
    #[serde(default = "default_max_auth_failures")]
    pub max_auth_failures: u32,

    /// Delay before a negative AUTH reply, in milliseconds
    #[serde(default = "default_tarpit_delay_ms")]
    pub tarpit_delay_ms: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            relay_ips: default_relay_ips(),
            max_auth_failures: default_max_auth_failures(),
            tarpit_delay_ms: default_tarpit_delay_ms(),
        }
    }
}

fn default_relay_ips() -> Vec<String> {
    vec!["127.0.0.1".to_string(), "::1".to_string()]
}

fn default_max_auth_failures() -> u32 {
    5
}

fn default_tarpit_delay_ms() -> u64 {
    3000
}

/// Blob storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory for raw message files
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("/var/lib/petrel/mail")
}

/// TLS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Path to the PEM certificate chain
    pub cert_path: PathBuf,

    /// Path to the PEM private key
    pub key_path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from the default locations, falling back to the
    /// built-in defaults when no file exists.
    pub fn load() -> crate::Result<Self> {
        let paths = [
            std::path::PathBuf::from("./petrel.toml"),
            std::path::PathBuf::from("/etc/petrel/petrel.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.smtp.port, 25);
        assert_eq!(config.smtp.submission_port, 587);
        assert_eq!(config.smtp.tls_port, 465);
        assert_eq!(config.imap.port, 143);
        assert_eq!(config.imap.tls_port, 993);
        assert_eq!(config.imap.max_line_length, 65536);
        assert_eq!(config.security.max_auth_failures, 5);
        assert_eq!(config.security.tarpit_delay_ms, 3000);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
hostname = "mx.example.com"
domain = "example.com"

[smtp]
port = 2525
max_recipients = 10

[security]
relay_ips = ["10.0.0.1"]
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.hostname, "mx.example.com");
        assert_eq!(config.server.domain, "example.com");
        assert_eq!(config.smtp.port, 2525);
        assert_eq!(config.smtp.max_recipients, 10);
        assert_eq!(config.security.relay_ips, vec!["10.0.0.1"]);
        // untouched sections keep their defaults
        assert_eq!(config.imap.port, 143);
    }

    #[test]
    fn test_advertised_hostname_fallback() {
        let mut server = ServerConfig::default();
        assert_eq!(server.advertised_hostname(), "localhost");

        server.domain = "example.com".to_string();
        assert_eq!(server.advertised_hostname(), "mail.example.com");

        server.hostname = "mx1.example.com".to_string();
        assert_eq!(server.advertised_hostname(), "mx1.example.com");
    }
}
