//! Configuration for MailCatch

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV: &str = "MAILCATCH_CONFIG";

/// Shortest shared secret the read API accepts
pub const MIN_SECRET_LENGTH: usize = 16;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// SMTP configuration
    #[serde(default)]
    pub smtp: SmtpConfig,

    /// Read API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hostname announced in the SMTP banner
    #[serde(default = "default_hostname")]
    pub hostname: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
        }
    }
}

fn default_hostname() -> String {
    "localhost".to_string()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Mail root holding recipient folders and weekly indexes
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
    PathBuf::from("mail")
}

/// SMTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Bind host
    #[serde(default = "default_bind_host")]
    pub host: String,

    /// SMTP port (inbound)
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    /// Maximum message size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Maximum concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Domains mail is captured for
    #[serde(default)]
    pub domains: Vec<String>,

    /// Required local-part prefix; empty accepts every recipient
    #[serde(default)]
    pub prefix: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_bind_host(),
            port: default_smtp_port(),
            max_message_size: default_max_message_size(),
            max_connections: default_max_connections(),
            domains: Vec::new(),
            prefix: String::new(),
        }
    }
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_smtp_port() -> u16 {
    25
}

fn default_max_message_size() -> usize {
    25 * 1024 * 1024 // 25 MB
}

fn default_max_connections() -> usize {
    100
}

/// Read API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Bind host
    #[serde(default = "default_bind_host")]
    pub host: String,

    /// API port; the API stays off when unset
    pub port: Option<u16>,

    /// Shared secret every request must present
    pub secret: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_bind_host(),
            port: None,
            secret: None,
        }
    }
}

impl ApiConfig {
    /// Port and secret, when both are present and the secret is long enough.
    pub fn enabled(&self) -> Option<(u16, &str)> {
        let port = self.port?;
        let secret = self.secret.as_deref()?;
        if secret.chars().count() < MIN_SECRET_LENGTH {
            warn!(
                "API secret is shorter than {} characters; read API disabled",
                MIN_SECRET_LENGTH
            );
            return None;
        }
        Some((port, secret))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
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
    /// Load configuration from file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML document
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from `MAILCATCH_CONFIG` or the default locations.
    ///
    /// Falls back to defaults when no file exists. An explicitly named file
    /// that is missing is an error.
    pub fn load() -> crate::Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::from_file(Path::new(&path));
        }

        let paths = [
            PathBuf::from("./config.toml"),
            PathBuf::from("/etc/mailcatch/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        warn!("No configuration file found, using defaults");
        Ok(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.hostname, "localhost");
        assert_eq!(config.storage.path, PathBuf::from("mail"));
        assert_eq!(config.smtp.port, 25);
        assert!(config.smtp.domains.is_empty());
        assert!(config.smtp.prefix.is_empty());
        assert!(config.api.enabled().is_none());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
hostname = "mx.example.com"

[storage]
path = "/data/mail"

[smtp]
port = 2525
domains = ["example.com", "test.org"]
prefix = "qa-"

[api]
port = 8080
secret = "0123456789abcdef"
"#;

        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.server.hostname, "mx.example.com");
        assert_eq!(config.storage.path, PathBuf::from("/data/mail"));
        assert_eq!(config.smtp.port, 2525);
        assert_eq!(config.smtp.domains, vec!["example.com", "test.org"]);
        assert_eq!(config.smtp.prefix, "qa-");
        assert_eq!(config.api.enabled(), Some((8080, "0123456789abcdef")));
    }

    #[test]
    fn test_api_requires_port_and_long_secret() {
        let mut api = ApiConfig {
            port: Some(8080),
            secret: Some("short".to_string()),
            ..ApiConfig::default()
        };
        assert!(api.enabled().is_none());

        api.secret = Some("a-long-enough-shared-secret".to_string());
        assert!(api.enabled().is_some());

        api.port = None;
        assert!(api.enabled().is_none());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[smtp]\ndomains = [\"example.com\"]").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.smtp.domains, vec!["example.com"]);
        assert!(Config::from_file(Path::new("/nonexistent/mailcatch.toml")).is_err());
    }
}
