//! Client configuration: known remotes, transfer mode and timeouts.
//!
//! The configuration is stored as TOML. A minimal file looks like:
//!
//! ```toml
//! default_remote = "local"
//! transfer_mode = "pull"
//!
//! [remotes.local]
//! addr = "https://127.0.0.1:8443"
//!
//! [remotes.hostb]
//! addr = "https://10.0.0.2:8443"
//! server_cert = "/home/user/.ctcopy/servercerts/hostb.crt"
//! ```

use crate::copy::TransferMode;
use crate::env;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Remote name not present in the configuration
    #[error("Unknown remote: {0}")]
    UnknownRemote(String),

    /// Malformed `[remote:]name` reference
    #[error("Invalid container reference: {0}")]
    InvalidReference(String),

    /// TOML parse error
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single host endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEndpoint {
    /// Base URL of the host API, e.g. `https://10.0.0.2:8443`
    pub addr: String,
    /// PEM file holding the host's certificate; trusted explicitly when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_cert: Option<PathBuf>,
    /// Accept any server certificate (only for hosts without a pinned cert)
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl RemoteEndpoint {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            server_cert: None,
            accept_invalid_certs: false,
        }
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Remote used for references without an explicit `remote:` prefix
    pub default_remote: String,
    /// Which side opens the migration data connection
    #[serde(default)]
    pub transfer_mode: TransferMode,
    /// Upper bound for waiting on a host operation (None = wait forever)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_timeout_secs: Option<u64>,
    /// Timeout of a single HTTP request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Client certificate presented to every host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_cert: Option<PathBuf>,
    /// Private key matching `client_cert`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<PathBuf>,
    /// Known remotes keyed by name
    #[serde(default)]
    pub remotes: BTreeMap<String, RemoteEndpoint>,
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ClientConfig {
    fn default() -> Self {
        let mut remotes = BTreeMap::new();
        remotes.insert(
            env::DEFAULT_REMOTE_NAME.to_string(),
            RemoteEndpoint {
                addr: "https://127.0.0.1:8443".to_string(),
                server_cert: None,
                accept_invalid_certs: true,
            },
        );

        Self {
            default_remote: env::DEFAULT_REMOTE_NAME.to_string(),
            transfer_mode: TransferMode::Pull,
            wait_timeout_secs: None,
            request_timeout_secs: default_request_timeout_secs(),
            client_cert: None,
            client_key: None,
            remotes,
        }
    }
}

impl ClientConfig {
    /// Configuration with the given remotes and nothing else set.
    pub fn with_remotes<I, S>(default_remote: &str, remotes: I) -> Self
    where
        I: IntoIterator<Item = (S, RemoteEndpoint)>,
        S: Into<String>,
    {
        Self {
            default_remote: default_remote.to_string(),
            remotes: remotes.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            ..Default::default()
        }
    }

    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Operation wait bound as a [`Duration`].
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_secs.map(Duration::from_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Resolve an optional remote name to a configured remote name.
    ///
    /// `None` resolves to the default remote.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownRemote`] if the name is not configured.
    pub fn resolve_remote(&self, remote: Option<&str>) -> Result<String, ConfigError> {
        let name = remote.unwrap_or(&self.default_remote);
        if self.remotes.contains_key(name) {
            Ok(name.to_string())
        } else {
            Err(ConfigError::UnknownRemote(name.to_string()))
        }
    }
}

/// A container reference of the form `[remote:]name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRef {
    /// Remote name; `None` means the default remote
    pub remote: Option<String>,
    /// Container (or `container/snapshot`) name; may be empty for destinations
    pub name: String,
}

impl ContainerRef {
    /// Split a raw reference at the first `:`.
    ///
    /// `"web1"` has no remote, `"hostb:web1"` names remote `hostb`, and
    /// `"hostb:"` names the remote with an empty container name.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.split_once(env::api::REMOTE_DELIMITER) {
            Some(("", _)) => Err(ConfigError::InvalidReference(raw.to_string())),
            Some((remote, name)) => Ok(Self {
                remote: Some(remote.to_string()),
                name: name.to_string(),
            }),
            None => Ok(Self {
                remote: None,
                name: raw.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.remote {
            Some(remote) => write!(f, "{}:{}", remote, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}
