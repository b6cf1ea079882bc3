use crate::error::ProxyError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Redirect hops followed before a call fails.
pub const MAX_REDIRECTS: usize = 10;

/// Highest diagnostic level: request parameters, headers and bodies.
pub const MAX_VERBOSITY: u8 = 3;

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9999))
}

fn default_upstream_url() -> String {
    "http://localhost:80".to_string()
}

fn default_cert_file() -> PathBuf {
    PathBuf::from("cert.pem")
}

fn default_key_file() -> PathBuf {
    PathBuf::from("key.pem")
}

fn default_metrics_interval() -> u64 {
    60
}

fn default_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        LogFormat::Text
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: Option<LogLevel>,
    #[serde(default)]
    pub format: Option<LogFormat>,
}

/// How the outbound transport authenticates upstream servers.
#[derive(Debug, Clone, PartialEq)]
pub enum TlsMode {
    /// Accept any upstream certificate. Trusted or test environments only.
    SkipVerify,
    /// Verify upstreams against native roots and present a client certificate.
    ClientCertificate { cert_file: PathBuf, key_file: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,
    #[serde(default = "default_cert_file")]
    pub cert_file: PathBuf,
    #[serde(default = "default_key_file")]
    pub key_file: PathBuf,
    #[serde(default)]
    pub skip_verify: bool,
    // 0: silent, 1: params, 2: headers, 3: bodies
    #[serde(default)]
    pub verbosity: u8,
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    // Prometheus/health endpoint, disabled when unset
    #[serde(default)]
    pub monitoring_addr: Option<SocketAddr>,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            upstream_url: default_upstream_url(),
            cert_file: default_cert_file(),
            key_file: default_key_file(),
            skip_verify: false,
            verbosity: 0,
            metrics_interval_secs: default_metrics_interval(),
            timeout_secs: default_timeout(),
            monitoring_addr: None,
            logging: None,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn tls_mode(&self) -> TlsMode {
        if self.skip_verify {
            TlsMode::SkipVerify
        } else {
            TlsMode::ClientCertificate {
                cert_file: self.cert_file.clone(),
                key_file: self.key_file.clone(),
            }
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }

    /// Parses the upstream URL, requiring an http(s) scheme and a host.
    pub fn upstream(&self) -> Result<Url, ProxyError> {
        let url = Url::parse(&self.upstream_url)?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ProxyError::InvalidUrl(format!(
                    "unsupported upstream scheme '{}'",
                    other
                )))
            }
        }
        if url.host_str().is_none() {
            return Err(ProxyError::InvalidUrl(format!(
                "upstream URL '{}' has no host",
                self.upstream_url
            )));
        }
        Ok(url)
    }

    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.verbosity > MAX_VERBOSITY {
            return Err(ProxyError::Config(format!(
                "verbosity must be between 0 and {}, got {}",
                MAX_VERBOSITY, self.verbosity
            )));
        }
        if self.metrics_interval_secs == 0 {
            return Err(ProxyError::Config(
                "metrics interval must be at least 1 second".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ProxyError::Config("timeout must be at least 1 second".to_string()));
        }
        self.upstream()
            .map_err(|e| ProxyError::Config(format!("invalid upstream URL: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_cli_defaults() {
        let config = Config::default();
        assert_eq!(config.listen_addr.port(), 9999);
        assert_eq!(config.upstream_url, "http://localhost:80");
        assert_eq!(config.metrics_interval_secs, 60);
        assert!(!config.skip_verify);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tls_mode_selection() {
        let mut config = Config::default();
        assert_eq!(
            config.tls_mode(),
            TlsMode::ClientCertificate {
                cert_file: PathBuf::from("cert.pem"),
                key_file: PathBuf::from("key.pem"),
            }
        );

        config.skip_verify = true;
        assert_eq!(config.tls_mode(), TlsMode::SkipVerify);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.verbosity = 4;
        assert!(matches!(config.validate(), Err(ProxyError::Config(_))));

        let mut config = Config::default();
        config.upstream_url = "ftp://files.example.com".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.upstream_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"upstream_url": "https://api.example.com", "verbosity": 2, "skip_verify": true}"#,
        )
        .unwrap();
        assert_eq!(config.upstream_url, "https://api.example.com");
        assert_eq!(config.verbosity, 2);
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.tls_mode(), TlsMode::SkipVerify);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proximity.json");
        let path = path.to_str().unwrap();

        let mut config = Config::default();
        config.verbosity = 1;
        config.to_file(path).unwrap();

        let loaded = Config::from_file(path).unwrap();
        assert_eq!(loaded.verbosity, 1);
        assert_eq!(loaded.listen_addr, config.listen_addr);
    }
}
