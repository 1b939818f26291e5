//! Container copy and cross-host migration.
//!
//! A copy starts by fetching the source's metadata and reconciling it with
//! the operator's overrides. What happens next depends on where the
//! destination lives:
//!
//! - same remote: the host copies the container itself ([`local`])
//! - different remotes: both hosts hand out single-use migration secrets and
//!   the destination is told to pull (or receive) the container from one of
//!   the source's addresses ([`migration`], [`racer`])
//!
//! ## Flow
//!
//! ```text
//!   fetch metadata ── reconcile
//!                         │
//!            ┌────────────┴────────────┐
//!       same remote               other remote
//!            │                         │
//!       local copy            profile check
//!            │                source + destination handshakes
//!            │                race source addresses
//!            └────────────┬────────────┘
//!                 wait for operation
//!                         ↓
//!                    CopyOutcome
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ctcopy::config::ClientConfig;
//! use ctcopy::copy::{ContainerCopier, EphemeralFlag};
//! use ctcopy::host::RestHost;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::from_toml_file("ctcopy.toml")?;
//!     let host = Arc::new(RestHost::new(config.clone())?);
//!
//!     let copier = ContainerCopier::new(host, config);
//!     let outcome = copier
//!         .copy_container("hosta:web1", Some("hostb:web1copy"), false, EphemeralFlag::Unspecified)
//!         .await?;
//!     println!("Created {}", outcome.container_name);
//!     Ok(())
//! }
//! ```

pub mod local;
pub mod metadata;
pub mod migration;
mod operation;
mod orchestrator;
pub mod profiles;
pub mod racer;
pub mod reconcile;

pub use orchestrator::ContainerCopier;
pub use racer::{Accepted, RaceError, race_addresses};
pub use reconcile::{Overrides, ReconciledMetadata, reconcile, strip_volatile};

use crate::config::ConfigError;
use crate::host::HostError;
use serde::{Deserialize, Serialize};

/// Copy and migration errors.
#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    /// Missing source name, same-name copy on one host, unknown remote
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Source container or snapshot does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Destination lacks profiles the container needs
    #[error("Not all the profiles from the source exist on the target: missing {}", .missing.join(", "))]
    ProfileMismatch { missing: Vec<String> },

    /// Network or RPC failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Host reported success but omitted required data
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The accepted copy or migration operation failed on the host
    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl From<HostError> for CopyError {
    fn from(error: HostError) -> Self {
        match error {
            HostError::NotFound(what) => CopyError::NotFound(what),
            HostError::Protocol(message) => CopyError::Protocol(message),
            HostError::Config(e) => CopyError::InvalidArgument(e.to_string()),
            other => CopyError::Transport(other.to_string()),
        }
    }
}

impl From<ConfigError> for CopyError {
    fn from(error: ConfigError) -> Self {
        CopyError::InvalidArgument(error.to_string())
    }
}

/// Result type for copy operations.
pub type Result<T> = std::result::Result<T, CopyError>;

/// Which side opens the migration data connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// The source connects out to the destination
    Push,
    /// The destination connects out to the source
    #[default]
    Pull,
}

impl TransferMode {
    pub fn is_push(self) -> bool {
        self == TransferMode::Push
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferMode::Push => "push",
            TransferMode::Pull => "pull",
        }
    }
}

impl std::fmt::Display for TransferMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested ephemeral attribute of the copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EphemeralFlag {
    Enabled,
    Disabled,
    /// Mirror the source container's current attribute
    #[default]
    Unspecified,
}

impl From<Option<bool>> for EphemeralFlag {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => EphemeralFlag::Enabled,
            Some(false) => EphemeralFlag::Disabled,
            None => EphemeralFlag::Unspecified,
        }
    }
}

/// How the copy was carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyStrategy {
    /// Copied within one host
    Local,
    /// Migrated between hosts through the given source address
    Migration { source_address: String },
}

/// Result of a finished copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOutcome {
    /// Name of the new container on the destination host
    pub container_name: String,
    /// The host picked the name because none was given
    pub name_assigned_by_host: bool,
    pub strategy: CopyStrategy,
}
