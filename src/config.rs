//! Server configuration.
//!
//! Settings come from an optional TOML file; command line flags (or their
//! `MASQUE_*` environment variables) override the file.
//!
//! ```toml
//! listen = "0.0.0.0:5432"
//! tls_cert = "server.crt"
//! tls_key = "server.key"
//! read_timeout_secs = 30
//! databases = ["postgres", "app"]
//! untyped_params = "text"
//!
//! [users]
//! alice = "secret"
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

use crate::auth::AuthMethod;
use crate::protocol::DEFAULT_MAX_MESSAGE_SIZE;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// What Parse reports for a placeholder no type could be inferred for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UntypedParamPolicy {
    /// Report the parameter as `text`.
    #[default]
    Text,
    /// Fail Parse with SQLSTATE 42P18.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    /// How long to wait for the next result row. Unset waits forever.
    pub read_timeout_secs: Option<u64>,
    /// Defaults to `scram-sha-256` when any user is configured, `trust` otherwise.
    pub auth: Option<AuthMethod>,
    /// User name to password.
    pub users: BTreeMap<String, String>,
    /// Databases the in-memory engine accepts besides `postgres`.
    pub databases: Vec<String>,
    pub max_message_size: usize,
    pub untyped_params: UntypedParamPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 5432)),
            tls_cert: None,
            tls_key: None,
            read_timeout_secs: None,
            auth: None,
            users: BTreeMap::new(),
            databases: Vec::new(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            untyped_params: UntypedParamPolicy::Text,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err(ConfigError::Invalid(
                "tls_cert and tls_key must be set together".to_string(),
            ));
        }
        if self.auth_method() == AuthMethod::ScramSha256 && self.users.is_empty() {
            return Err(ConfigError::Invalid(
                "scram-sha-256 authentication requires at least one user".to_string(),
            ));
        }
        if self.read_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "read_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn auth_method(&self) -> AuthMethod {
        self.auth.unwrap_or(if self.users.is_empty() {
            AuthMethod::Trust
        } else {
            AuthMethod::ScramSha256
        })
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_secs.map(Duration::from_secs)
    }
}

/// Command line of the `masque` binary.
#[derive(Debug, Default, Parser)]
#[command(name = "masque", version, about = "Postgres wire protocol front end")]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, value_name = "FILE", env = "MASQUE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, value_name = "ADDR", env = "MASQUE_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// PEM certificate chain for TLS
    #[arg(long, value_name = "FILE", env = "MASQUE_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key for TLS
    #[arg(long, value_name = "FILE", env = "MASQUE_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Seconds to wait for the next result row before failing the query
    #[arg(long, value_name = "SECONDS", env = "MASQUE_READ_TIMEOUT")]
    pub read_timeout: Option<u64>,
}

impl Cli {
    /// Loads the configuration file, if any, and applies the flag overrides.
    pub fn load_config(&self) -> Result<ServerConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(cert) = &self.tls_cert {
            config.tls_cert = Some(cert.clone());
        }
        if let Some(key) = &self.tls_key {
            config.tls_key = Some(key.clone());
        }
        if let Some(secs) = self.read_timeout {
            config.read_timeout_secs = Some(secs);
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_toml("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.listen.to_string(), "127.0.0.1:5432");
        assert_eq!(config.auth_method(), AuthMethod::Trust);
        assert_eq!(config.read_timeout(), None);
        assert_eq!(config.max_message_size, 16 * 1024 * 1024);
    }

    #[test]
    fn test_full_file() {
        let config = ServerConfig::from_toml(
            r#"
            listen = "0.0.0.0:6432"
            read_timeout_secs = 5
            databases = ["app"]
            untyped_params = "reject"

            [users]
            alice = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(config.listen.port(), 6432);
        assert_eq!(config.read_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.databases, vec!["app".to_string()]);
        assert_eq!(config.untyped_params, UntypedParamPolicy::Reject);
        assert_eq!(config.auth_method(), AuthMethod::ScramSha256);
        assert_eq!(config.users.get("alice").map(String::as_str), Some("secret"));
    }

    #[test]
    fn test_explicit_trust_with_users() {
        let config = ServerConfig::from_toml(
            r#"
            auth = "trust"
            [users]
            bob = "pw"
            "#,
        )
        .unwrap();
        assert_eq!(config.auth_method(), AuthMethod::Trust);
    }

    #[test]
    fn test_invalid_files() {
        assert!(matches!(
            ServerConfig::from_toml("listen = 5"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            ServerConfig::from_toml("unknown_key = 1"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            ServerConfig::from_toml("tls_cert = \"a.pem\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ServerConfig::from_toml("auth = \"scram-sha-256\""),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "listen = \"127.0.0.1:7000\"\nread_timeout_secs = 3").unwrap();

        let cli = Cli::parse_from([
            "masque",
            "--config",
            file.path().to_str().unwrap(),
            "--read-timeout",
            "9",
        ]);
        let config = cli.load_config().unwrap();
        assert_eq!(config.listen.port(), 7000);
        assert_eq!(config.read_timeout_secs, Some(9));

        let cli = Cli {
            listen: Some("127.0.0.1:7001".parse().unwrap()),
            ..Cli::default()
        };
        assert_eq!(cli.load_config().unwrap().listen.port(), 7001);
    }

    #[test]
    fn test_missing_file() {
        let err = ServerConfig::load(Path::new("/nonexistent/masque.toml")).unwrap_err();
        assert!(err.to_string().starts_with("failed to read /nonexistent/masque.toml"));
    }
}
