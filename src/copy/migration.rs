//! Cross-host migration handshake.
//!
//! Both hosts hand out single-use secrets before any data moves. The
//! destination is then pointed at the source's handshake operation through
//! each of the source's addresses in turn (see [`racer`](crate::copy::racer)).
//! Handshake failures are fatal; only the address attempts are retried.

use crate::copy::metadata::resolve_ephemeral;
use crate::copy::operation::{reported_container_name, wait_for_success};
use crate::copy::profiles::check_profiles;
use crate::copy::racer::{RaceError, race_addresses};
use crate::copy::{
    CopyError, CopyOutcome, CopyStrategy, EphemeralFlag, ReconciledMetadata, Result,
    TransferMode,
};
use crate::env;
use crate::host::{HostApi, MigrationHandshake, MigrationRequest};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A copy whose source and destination live on different remotes.
#[derive(Debug, Clone)]
pub struct Migration<'a> {
    pub source_remote: &'a str,
    pub source: &'a str,
    pub destination_remote: &'a str,
    /// Destination name; `None` lets the host choose
    pub destination: Option<&'a str>,
    pub metadata: ReconciledMetadata,
    pub ephemeral: EphemeralFlag,
}

/// Drives the handshake between two hosts.
pub struct MigrationCoordinator<'h> {
    host: &'h dyn HostApi,
    mode: TransferMode,
    wait_timeout: Option<Duration>,
}

impl<'h> MigrationCoordinator<'h> {
    pub fn new(host: &'h dyn HostApi, mode: TransferMode, wait_timeout: Option<Duration>) -> Self {
        Self {
            host,
            mode,
            wait_timeout,
        }
    }

    /// Migrate a container and wait for the destination to finish.
    ///
    /// # Errors
    ///
    /// - [`CopyError::ProfileMismatch`] before any handshake if the
    ///   destination lacks a profile
    /// - [`CopyError::Transport`] if a handshake request fails, or the last
    ///   address error if no address could be used
    /// - [`CopyError::OperationFailed`] if the accepted migration fails
    /// - [`CopyError::Protocol`] on malformed handshakes, addresses or results
    pub async fn migrate(&self, migration: Migration<'_>) -> Result<CopyOutcome> {
        let host = self.host;
        let push = self.mode.is_push();

        let catalog = host.list_profiles(migration.destination_remote).await?;
        check_profiles(&migration.metadata.profiles, &catalog)?;

        let ephemeral = resolve_ephemeral(
            host,
            migration.source_remote,
            migration.source,
            migration.ephemeral,
        )
        .await?;

        let source_handshake = host
            .request_migration_handshake(migration.source_remote, migration.source, push)
            .await?;
        validate_operation_path(migration.source_remote, &source_handshake)?;
        debug!(
            "Source handshake on {}: {} secrets at {}",
            migration.source_remote,
            source_handshake.secrets.len(),
            source_handshake.operation_path
        );

        let destination_handshake = host
            .request_migration_handshake(
                migration.destination_remote,
                migration.destination.unwrap_or_default(),
                push,
            )
            .await?;
        validate_operation_path(migration.destination_remote, &destination_handshake)?;
        debug!(
            "Destination handshake on {}: {} secrets at {}",
            migration.destination_remote,
            destination_handshake.secrets.len(),
            destination_handshake.operation_path
        );

        let addresses = host.list_host_addresses(migration.source_remote).await?;
        if let Some(address) = addresses.iter().find(|a| a.contains("://")) {
            return Err(CopyError::Protocol(format!(
                "{} advertised address {} with a scheme",
                migration.source_remote, address
            )));
        }
        let certificate = host.host_certificate(migration.source_remote).await?;

        let template = MigrationRequest {
            name: migration.destination.map(str::to_string),
            source_url: String::new(),
            certificate,
            secrets: source_handshake.secrets,
            architecture: migration.metadata.architecture,
            config: migration.metadata.config,
            devices: migration.metadata.devices,
            profiles: migration.metadata.profiles,
            base_image: migration.metadata.base_image,
            ephemeral,
            mode: self.mode,
        };
        let operation_path = source_handshake.operation_path;
        let destination_remote = migration.destination_remote;

        let accepted = race_addresses(&addresses, |address| {
            let request = MigrationRequest {
                source_url: source_url(&address, &operation_path),
                ..template.clone()
            };
            async move {
                host.request_migration_from(destination_remote, &request)
                    .await
                    .map_err(CopyError::from)
            }
        })
        .await
        .map_err(|error| match error {
            RaceError::NoAddresses => CopyError::Protocol(format!(
                "{} advertised no network addresses",
                migration.source_remote
            )),
            RaceError::Exhausted {
                attempts,
                last_error,
            } => {
                warn!(
                    "Migration request failed against all {} addresses of {}",
                    attempts, migration.source_remote
                );
                last_error
            }
        })?;

        info!(
            "{} accepted migration of {}:{} via {}",
            destination_remote, migration.source_remote, migration.source, accepted.address
        );

        let finished =
            wait_for_success(host, destination_remote, &accepted.value, self.wait_timeout).await?;

        let (container_name, name_assigned_by_host) = match migration.destination {
            Some(name) => (name.to_string(), false),
            None => (reported_container_name(&finished)?, true),
        };

        info!(
            "Migrated {}:{} to {}:{}",
            migration.source_remote, migration.source, destination_remote, container_name
        );
        Ok(CopyOutcome {
            container_name,
            name_assigned_by_host,
            strategy: CopyStrategy::Migration {
                source_address: accepted.address,
            },
        })
    }
}

fn validate_operation_path(remote: &str, handshake: &MigrationHandshake) -> Result<()> {
    if handshake.operation_path.starts_with('/') {
        Ok(())
    } else {
        Err(CopyError::Protocol(format!(
            "{} returned operation path {:?} without a leading /",
            remote, handshake.operation_path
        )))
    }
}

/// `scheme + address + path` of a migration source.
pub fn source_url(address: &str, operation_path: &str) -> String {
    format!(
        "{}{}{}",
        env::api::MIGRATION_URL_SCHEME,
        address,
        operation_path
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_source_url() {
        assert_eq!(
            source_url("10.0.0.1:8443", "/1.0/operations/abc"),
            "https://10.0.0.1:8443/1.0/operations/abc"
        );
        assert_eq!(
            source_url("[fd42::1]:8443", "/1.0/operations/abc"),
            "https://[fd42::1]:8443/1.0/operations/abc"
        );
    }

    #[test]
    fn test_operation_path_validation() {
        let mut handshake = MigrationHandshake {
            secrets: BTreeMap::new(),
            operation_path: "/1.0/operations/abc".to_string(),
        };
        assert!(validate_operation_path("hosta", &handshake).is_ok());

        handshake.operation_path = "1.0/operations/abc".to_string();
        assert!(matches!(
            validate_operation_path("hosta", &handshake),
            Err(CopyError::Protocol(_))
        ));
    }
}
