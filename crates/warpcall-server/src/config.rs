//! warpcall.toml configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Server configuration. Every field has a default, so an empty file is a
/// valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub listen: SocketAddr,
    /// Reported as `SERVER_NAME`. `SERVER_PORT` comes from the bound port.
    pub server_name: String,
    /// Upper bound on concurrently running handlers.
    pub max_concurrency: usize,
    /// Sent as the `Server` response header; empty omits the header.
    pub server_software: String,
    pub send_date_header: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8000)),
            server_name: "localhost".to_string(),
            max_concurrency: 64,
            server_software: concat!("warpcall/", env!("CARGO_PKG_VERSION")).to_string(),
            send_date_header: true,
        }
    }
}

/// Request parser limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_header_bytes: usize,
    pub max_headers: usize,
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: 32 * 1024,
            max_headers: 64,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Read, parse and validate a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "server.max_concurrency must be greater than 0".to_string(),
            ));
        }
        let limits = [
            ("limits.max_header_bytes", self.limits.max_header_bytes),
            ("limits.max_headers", self.limits.max_headers),
            ("limits.max_body_bytes", self.limits.max_body_bytes),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
            }
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_config_uses_defaults() {
        let config = ServerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.server.listen.port(), 8000);
        assert_eq!(config.server.max_concurrency, 64);
        assert_eq!(config.limits.max_header_bytes, 32768);
        assert!(config.server.server_software.starts_with("warpcall/"));
    }

    #[test]
    fn parse_partial_sections() {
        let toml_str = r#"
[server]
listen = "0.0.0.0:9090"
max_concurrency = 8
send_date_header = false

[limits]
max_body_bytes = 4096
"#;
        let config = ServerConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(
            config.server.listen,
            "0.0.0.0:9090".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(config.server.max_concurrency, 8);
        assert!(!config.server.send_date_header);
        assert_eq!(config.server.server_name, "localhost");
        assert_eq!(config.limits.max_body_bytes, 4096);
        assert_eq!(config.limits.max_headers, 64);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = ServerConfig::from_toml_str("[server]\nmax_concurrency = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("max_concurrency"));
    }

    #[test]
    fn zero_limit_is_rejected() {
        let err = ServerConfig::from_toml_str("[limits]\nmax_headers = 0\n").unwrap_err();
        assert!(err.to_string().contains("limits.max_headers"));
    }

    #[test]
    fn bad_listen_address_is_a_parse_error() {
        let err = ServerConfig::from_toml_str("[server]\nlisten = \"nowhere\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn from_file_round_trips_through_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nserver_name = \"api.internal\"").unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server.server_name, "api.internal");

        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("api.internal"));
        assert_eq!(ServerConfig::from_toml_str(&rendered).unwrap(), config);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ServerConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
