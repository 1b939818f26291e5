//! Copies within a single host.

use crate::copy::metadata::resolve_ephemeral;
use crate::copy::operation::{reported_container_name, wait_for_success};
use crate::copy::{
    CopyError, CopyOutcome, CopyStrategy, EphemeralFlag, ReconciledMetadata, Result,
};
use crate::host::{HostApi, LocalCopyRequest};
use std::time::Duration;
use tracing::info;

/// A copy whose source and destination live on the same remote.
#[derive(Debug, Clone)]
pub struct LocalCopy<'a> {
    pub remote: &'a str,
    pub source: &'a str,
    /// Destination name; `None` lets the host choose
    pub destination: Option<&'a str>,
    pub metadata: ReconciledMetadata,
    pub ephemeral: EphemeralFlag,
}

impl LocalCopy<'_> {
    /// Ask the host to copy the container and wait for it to finish.
    ///
    /// # Errors
    ///
    /// Returns [`CopyError::InvalidArgument`] when source and destination
    /// names are equal, [`CopyError::OperationFailed`] when the host reports
    /// failure, and [`CopyError::Protocol`] when a host-assigned name cannot be
    /// determined.
    pub async fn run(self, host: &dyn HostApi, wait_timeout: Option<Duration>) -> Result<CopyOutcome> {
        if self.destination == Some(self.source) {
            return Err(CopyError::InvalidArgument(format!(
                "can't copy {} to the same container name",
                self.source
            )));
        }

        let ephemeral = resolve_ephemeral(host, self.remote, self.source, self.ephemeral).await?;

        let request = LocalCopyRequest {
            source: self.source.to_string(),
            name: self.destination.map(str::to_string),
            config: self.metadata.config,
            profiles: self.metadata.profiles,
            ephemeral,
        };

        let operation = host.request_local_copy(self.remote, &request).await?;
        let finished = wait_for_success(host, self.remote, &operation, wait_timeout).await?;

        let outcome = match self.destination {
            Some(name) => CopyOutcome {
                container_name: name.to_string(),
                name_assigned_by_host: false,
                strategy: CopyStrategy::Local,
            },
            None => CopyOutcome {
                container_name: reported_container_name(&finished)?,
                name_assigned_by_host: true,
                strategy: CopyStrategy::Local,
            },
        };

        info!(
            "Copied {} to {} on {}",
            self.source, outcome.container_name, self.remote
        );
        Ok(outcome)
    }
}
