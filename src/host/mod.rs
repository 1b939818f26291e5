//! Host API abstraction.
//!
//! Every interaction with a container host goes through the [`HostApi`]
//! trait. Methods take the remote name explicitly so a single implementation
//! can serve any number of hosts; the copy logic never holds per-host state.
//!
//! - [`RestHost`]: HTTPS implementation built on reqwest
//! - [`MockHost`]: in-memory implementation that records every call
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ctcopy::config::ClientConfig;
//! use ctcopy::host::{HostApi, RestHost};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let host = RestHost::new(ClientConfig::default())?;
//!
//!     let metadata = host.fetch_container_metadata("local", "web1").await?;
//!     println!("{} runs on {}", "web1", metadata.architecture);
//!     Ok(())
//! }
//! ```

mod mock;
mod rest;
mod types;

pub use mock::{HostCall, MockHost, MockRemote};
pub use rest::RestHost;
pub use types::{
    BackupRequest, ConfigMap, ContainerMetadata, Devices, LocalCopyRequest, MigrationHandshake,
    MigrationRequest, Operation, OperationStatus, resource_name,
};

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncWrite;

/// Host API errors.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Container, snapshot or other resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// HTTP client error (connection refused, TLS failure, ...)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Network failure not raised by the HTTP client
    #[error("Transport error: {0}")]
    Transport(String),

    /// Host answered with an error response
    #[error("Host API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Host answered successfully but the payload broke the API contract
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Waiting for an operation exceeded the configured bound
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Remote missing from the configuration
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for host operations.
pub type Result<T> = std::result::Result<T, HostError>;

/// Operations the copy logic needs from a container host.
#[async_trait]
pub trait HostApi: Send + Sync {
    /// Architecture, devices, config, profiles and ephemeral flag of a container.
    async fn fetch_container_metadata(&self, remote: &str, name: &str)
    -> Result<ContainerMetadata>;

    /// Same as [`fetch_container_metadata`](Self::fetch_container_metadata) for
    /// a `container/snapshot` name.
    async fn fetch_snapshot_metadata(&self, remote: &str, name: &str) -> Result<ContainerMetadata>;

    /// Names of every profile defined on the host, in host order.
    async fn list_profiles(&self, remote: &str) -> Result<Vec<String>>;

    /// Start a copy of a container within one host.
    async fn request_local_copy(&self, remote: &str, request: &LocalCopyRequest)
    -> Result<Operation>;

    /// Obtain single-use migration secrets for a container.
    async fn request_migration_handshake(
        &self,
        remote: &str,
        name: &str,
        push: bool,
    ) -> Result<MigrationHandshake>;

    /// Network addresses (`host:port`, no scheme) the host listens on.
    async fn list_host_addresses(&self, remote: &str) -> Result<Vec<String>>;

    /// PEM certificate the host presents to migration peers.
    async fn host_certificate(&self, remote: &str) -> Result<String>;

    /// Instruct a host to create a container from a migration source.
    async fn request_migration_from(
        &self,
        remote: &str,
        request: &MigrationRequest,
    ) -> Result<Operation>;

    /// Block until the operation reaches a terminal state and return it.
    ///
    /// A `timeout` of `None` waits indefinitely.
    async fn wait_operation(
        &self,
        remote: &str,
        operation: &Operation,
        timeout: Option<Duration>,
    ) -> Result<Operation>;
}

/// Backup operations, used by container export.
#[async_trait]
pub trait BackupApi: HostApi {
    /// Start creating a backup of a container.
    async fn create_backup(
        &self,
        remote: &str,
        container: &str,
        request: &BackupRequest,
    ) -> Result<Operation>;

    /// Stream a finished backup into `sink`, reporting the running byte count.
    ///
    /// Returns the total number of bytes written.
    async fn download_backup(
        &self,
        remote: &str,
        container: &str,
        backup: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        progress: &mut (dyn FnMut(u64) + Send),
    ) -> Result<u64>;

    /// Start deleting a backup.
    async fn delete_backup(&self, remote: &str, container: &str, backup: &str)
    -> Result<Operation>;
}
