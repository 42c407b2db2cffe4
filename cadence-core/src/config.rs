//! Configuration types for Cadence
//!
//! Settings are layered with figment: built-in defaults, then `cadence.toml`
//! in the working directory, then the file named by `CADENCE_CONFIG_PATH`,
//! then `CADENCE_*` environment variables (`__` separates nesting, e.g.
//! `CADENCE_TARGET__URL`). Command-line flags are applied last by the binary.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CadenceError, Result};
use crate::retry::RetryConfig;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    /// Store events are read from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<StoreConfig>,

    /// Store events are written to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<StoreConfig>,

    /// Replay tuning
    pub replay: ReplayConfig,
}

/// Connection settings for one document store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Endpoint, e.g. `ws://localhost:8000`, `https://db.example.com`, `mem://`
    pub url: String,

    /// SurrealDB namespace
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// SurrealDB database
    #[serde(default = "default_database")]
    pub database: String,

    /// Root username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Root password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// JSON file supplying credentials not given inline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<PathBuf>,
}

fn default_namespace() -> String {
    "cadence".to_string()
}

fn default_database() -> String {
    "telemetry".to_string()
}

/// Contents of a credentials file
#[derive(Debug, Deserialize)]
struct CredentialsFile {
    username: Option<String>,
    password: Option<String>,
    namespace: Option<String>,
    database: Option<String>,
}

impl StoreConfig {
    /// Store at `url` with default namespace/database and no credentials
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            namespace: default_namespace(),
            database: default_database(),
            username: None,
            password: None,
            credentials_file: None,
        }
    }

    /// Set namespace and database
    pub fn with_scope(mut self, namespace: impl Into<String>, database: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self.database = database.into();
        self
    }

    /// Set root credentials
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Fill credentials (and scope, when the file names one) from
    /// `credentials_file`. Inline values win.
    pub fn resolve_credentials(mut self) -> Result<Self> {
        let Some(path) = self.credentials_file.clone() else {
            return Ok(self);
        };

        let data = std::fs::read_to_string(&path).map_err(|e| {
            CadenceError::Configuration(format!(
                "Unable to read credentials file {}: {}",
                path.display(),
                e
            ))
        })?;
        let file: CredentialsFile = serde_json::from_str(&data).map_err(|e| {
            CadenceError::Configuration(format!(
                "Unable to parse credentials file {}: {}",
                path.display(),
                e
            ))
        })?;

        if file.username.is_none() && file.password.is_none() && self.username.is_none() {
            return Err(CadenceError::Configuration(format!(
                "No credentials found in {}",
                path.display()
            )));
        }

        self.username = self.username.or(file.username);
        self.password = self.password.or(file.password);
        if let Some(namespace) = file.namespace {
            self.namespace = namespace;
        }
        if let Some(database) = file.database {
            self.database = database;
        }
        Ok(self)
    }

    /// Host part of the URL, without port or brackets
    pub fn host(&self) -> Option<&str> {
        let rest = self.url.split_once("://").map(|(_, r)| r).unwrap_or(&self.url);
        let authority = rest.split('/').next()?;
        let authority = authority.rsplit_once('@').map(|(_, h)| h).unwrap_or(authority);
        if authority.is_empty() {
            return None;
        }
        if let Some(bracketed) = authority.strip_prefix('[') {
            return bracketed.split(']').next();
        }
        authority.split(':').next()
    }

    /// True for in-process stores and loopback hosts
    pub fn is_local(&self) -> bool {
        if self.url.starts_with("mem://") {
            return true;
        }
        matches!(self.host(), Some("localhost" | "127.0.0.1" | "::1"))
    }
}

/// Replay tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Retry policy around each write
    pub retry: RetryConfig,

    /// Log a progress line every N events (0 disables intermediate lines)
    pub progress_every: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            progress_every: 25,
        }
    }
}

impl CadenceConfig {
    /// Load configuration from file and environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is invalid.
    pub fn load() -> Result<Self> {
        let custom = std::env::var("CADENCE_CONFIG_PATH").ok().map(PathBuf::from);
        Self::load_with(custom.as_deref())
    }

    /// Load like [`CadenceConfig::load`], with an explicit extra file
    pub fn load_with(path: Option<&Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(CadenceConfig::default()))
            .merge(Toml::file("cadence.toml"));

        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }

        let config: CadenceConfig = figment
            .merge(Env::prefixed("CADENCE_").split("__"))
            .extract()?;

        Ok(config)
    }

    /// Load configuration from a specific file path only.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let path = path.as_ref();
        if !path.exists() {
            return Err(CadenceError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let config: CadenceConfig = Figment::from(Serialized::defaults(CadenceConfig::default()))
            .merge(Toml::file(path))
            .extract()?;
        Ok(config)
    }

    /// Source store, with `url` overriding the configured one
    pub fn source_store(&self, url: Option<&str>) -> Result<StoreConfig> {
        Self::pick("source", self.source.as_ref(), url)
    }

    /// Target store, with `url` overriding the configured one
    pub fn target_store(&self, url: Option<&str>) -> Result<StoreConfig> {
        Self::pick("target", self.target.as_ref(), url)
    }

    fn pick(role: &str, configured: Option<&StoreConfig>, url: Option<&str>) -> Result<StoreConfig> {
        let store = match (configured, url) {
            (Some(store), Some(url)) => StoreConfig {
                url: url.to_string(),
                ..store.clone()
            },
            (Some(store), None) => store.clone(),
            (None, Some(url)) => StoreConfig::new(url),
            (None, None) => {
                return Err(CadenceError::Configuration(format!(
                    "No {} store configured; pass --{} or set [{}] url",
                    role, role, role
                )));
            }
        };

        if store.url.trim().is_empty() {
            return Err(CadenceError::Configuration(format!("{} store url is empty", role)));
        }
        store.resolve_credentials()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_default_config() {
        let config = CadenceConfig::default();
        assert!(config.source.is_none());
        assert_eq!(config.replay.retry.attempts, 3);
        assert_eq!(config.replay.progress_every, 25);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[source]
url = "wss://capture.example.com"
namespace = "fleet"
database = "captures"

[target]
url = "ws://localhost:8000"

[replay]
progress_every = 10

[replay.retry]
attempts = 5
backoff = "50ms"
"#
        )
        .unwrap();

        let config = CadenceConfig::from_file(file.path()).unwrap();
        let source = config.source.unwrap();
        assert_eq!(source.namespace, "fleet");
        assert_eq!(source.database, "captures");
        let target = config.target.unwrap();
        assert_eq!(target.namespace, "cadence");
        assert_eq!(config.replay.progress_every, 10);
        assert_eq!(config.replay.retry.attempts, 5);
        assert_eq!(config.replay.retry.backoff, Duration::from_millis(50));
    }

    #[test]
    fn test_from_missing_file() {
        let result = CadenceConfig::from_file("/nonexistent/cadence.toml");
        assert!(matches!(result, Err(CadenceError::Configuration(_))));
    }

    #[test]
    fn test_cli_url_overrides_configured_store() {
        let config = CadenceConfig {
            target: Some(StoreConfig::new("ws://localhost:8000").with_scope("qa", "replays")),
            ..Default::default()
        };

        let target = config.target_store(Some("ws://127.0.0.1:9000")).unwrap();
        assert_eq!(target.url, "ws://127.0.0.1:9000");
        assert_eq!(target.namespace, "qa");

        assert!(config.source_store(None).is_err());
        assert_eq!(config.source_store(Some("mem://")).unwrap().url, "mem://");
    }

    #[test]
    fn test_credentials_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"username": "root", "password": "hunter2", "namespace": "fleet"}}"#
        )
        .unwrap();

        let store = StoreConfig {
            credentials_file: Some(file.path().to_path_buf()),
            ..StoreConfig::new("wss://capture.example.com")
        }
        .resolve_credentials()
        .unwrap();

        assert_eq!(store.username.as_deref(), Some("root"));
        assert_eq!(store.password.as_deref(), Some("hunter2"));
        assert_eq!(store.namespace, "fleet");
        assert_eq!(store.database, "telemetry");
    }

    #[test]
    fn test_credentials_file_unreadable() {
        let store = StoreConfig {
            credentials_file: Some(PathBuf::from("/nonexistent/creds.json")),
            ..StoreConfig::new("wss://capture.example.com")
        };
        assert!(matches!(
            store.resolve_credentials(),
            Err(CadenceError::Configuration(_))
        ));
    }

    #[test]
    fn test_local_detection() {
        assert!(StoreConfig::new("mem://").is_local());
        assert!(StoreConfig::new("ws://localhost:8000").is_local());
        assert!(StoreConfig::new("127.0.0.1:8070").is_local());
        assert!(StoreConfig::new("http://[::1]:8000/rpc").is_local());
        assert!(!StoreConfig::new("wss://db.example.com").is_local());
        assert!(!StoreConfig::new("ws://localhost.example.com:8000").is_local());
        assert_eq!(StoreConfig::new("ws://user@db.internal:8000").host(), Some("db.internal"));
    }
}
