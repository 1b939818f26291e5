use crate::copy::TransferMode;
use crate::env;
use crate::host::HostError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Device map: device name → device configuration.
pub type Devices = BTreeMap<String, BTreeMap<String, String>>;

/// Container configuration: key → value.
pub type ConfigMap = BTreeMap<String, String>;

/// Metadata of a container or snapshot as reported by its host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMetadata {
    pub architecture: String,
    #[serde(default)]
    pub devices: Devices,
    #[serde(default)]
    pub config: ConfigMap,
    #[serde(default)]
    pub profiles: Vec<String>,
    /// Whether the container is deleted when stopped
    #[serde(default)]
    pub ephemeral: bool,
}

/// Status of a host-side operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Created,
    Started,
    Stopped,
    Running,
    Cancelling,
    Pending,
    Success,
    Failure,
    Cancelled,
    Unknown(u16),
}

impl OperationStatus {
    pub fn from_code(code: u16) -> Self {
        match code {
            100 => Self::Created,
            101 => Self::Started,
            102 => Self::Stopped,
            103 => Self::Running,
            104 => Self::Cancelling,
            105 => Self::Pending,
            200 => Self::Success,
            400 => Self::Failure,
            401 => Self::Cancelled,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> u16 {
        match self {
            Self::Created => 100,
            Self::Started => 101,
            Self::Stopped => 102,
            Self::Running => 103,
            Self::Cancelling => 104,
            Self::Pending => 105,
            Self::Success => 200,
            Self::Failure => 400,
            Self::Cancelled => 401,
            Self::Unknown(code) => code,
        }
    }

    /// Terminal states never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Cancelled)
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "Unknown({})", code),
            other => write!(f, "{:?}", other),
        }
    }
}

/// An asynchronous host-side task (copy, migration, backup, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    #[serde(default)]
    pub status_code: u16,
    /// Resources touched by the operation, keyed by kind (e.g. `containers`)
    #[serde(default)]
    pub resources: Option<BTreeMap<String, Vec<String>>>,
    /// Operation-specific payload; migration secrets live here
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    /// Failure reason once the operation failed
    #[serde(default)]
    pub err: String,
}

impl Operation {
    pub fn new(id: impl Into<String>, status: OperationStatus) -> Self {
        Self {
            id: id.into(),
            status_code: status.code(),
            resources: None,
            metadata: None,
            err: String::new(),
        }
    }

    pub fn status(&self) -> OperationStatus {
        OperationStatus::from_code(self.status_code)
    }

    /// API path of the operation, e.g. `/1.0/operations/<id>`.
    pub fn path(&self) -> String {
        env::api_path(&["operations", &self.id])
    }

    /// Resource paths of the given kind, in host order.
    pub fn resources_of(&self, kind: &str) -> &[String] {
        self.resources
            .as_ref()
            .and_then(|resources| resources.get(kind))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Extract the string-valued secret set carried in the operation metadata.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Protocol`] if the metadata is missing or holds a
    /// non-string value.
    pub fn secrets(&self) -> Result<BTreeMap<String, String>, HostError> {
        let metadata = self.metadata.clone().ok_or_else(|| {
            HostError::Protocol(format!("Operation {} carries no secrets", self.id))
        })?;

        serde_json::from_value(metadata).map_err(|e| {
            HostError::Protocol(format!("Operation {} has malformed secrets: {}", self.id, e))
        })
    }
}

/// Single-use credentials for one side of a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationHandshake {
    /// Secrets keyed by channel name (e.g. `control`, `fs`, `criu`)
    pub secrets: BTreeMap<String, String>,
    /// Path of the handshake operation; always starts with `/`
    pub operation_path: String,
}

/// Request for a copy within one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCopyRequest {
    pub source: String,
    /// Destination name; `None` lets the host choose one
    pub name: Option<String>,
    pub config: ConfigMap,
    pub profiles: Vec<String>,
    pub ephemeral: bool,
}

/// Request instructing a destination host to pull (or receive) a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRequest {
    /// Destination name; `None` lets the host choose one
    pub name: Option<String>,
    /// `scheme + address + operation path` of the source handshake
    pub source_url: String,
    /// PEM certificate of the source host
    pub certificate: String,
    pub secrets: BTreeMap<String, String>,
    pub architecture: String,
    pub config: ConfigMap,
    pub devices: Devices,
    pub profiles: Vec<String>,
    pub base_image: Option<String>,
    pub ephemeral: bool,
    pub mode: TransferMode,
}

/// Request creating a server-side container backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRequest {
    /// Backup name; empty lets the host choose one
    pub name: String,
    pub expiry: DateTime<Utc>,
    pub container_only: bool,
    pub optimized_storage: bool,
}

/// Last path segment of a resource path, e.g. `/1.0/containers/web1` → `web1`.
pub fn resource_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
