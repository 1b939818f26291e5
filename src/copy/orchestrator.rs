use crate::config::{ClientConfig, ContainerRef};
use crate::copy::local::LocalCopy;
use crate::copy::metadata::fetch_source_metadata;
use crate::copy::migration::{Migration, MigrationCoordinator};
use crate::copy::{
    CopyError, CopyOutcome, EphemeralFlag, Overrides, Result, TransferMode, reconcile,
};
use crate::host::HostApi;
use std::sync::Arc;
use tracing::debug;

/// Entry point for copying containers within or between hosts.
///
/// Each call to [`copy_container`](Self::copy_container) fetches fresh
/// metadata and secrets; nothing is cached between calls, so one copier can
/// serve concurrent copies of different containers.
pub struct ContainerCopier {
    host: Arc<dyn HostApi>,
    config: ClientConfig,
    overrides: Overrides,
}

impl ContainerCopier {
    pub fn new(host: Arc<dyn HostApi>, config: ClientConfig) -> Self {
        Self {
            host,
            config,
            overrides: Overrides::default(),
        }
    }

    /// Profiles and config keys applied to every copy.
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Override the configured transfer mode.
    pub fn with_transfer_mode(mut self, mode: TransferMode) -> Self {
        self.config.transfer_mode = mode;
        self
    }

    pub fn transfer_mode(&self) -> TransferMode {
        self.config.transfer_mode
    }

    /// Copy `source` to `destination`, both written as `[remote:]name`.
    ///
    /// Without a destination the copy lands on the default remote under a
    /// name picked by the host. A destination with an empty name
    /// (`"remote:"`) reuses the source name.
    ///
    /// # Errors
    ///
    /// See [`CopyError`] for the failure taxonomy.
    pub async fn copy_container(
        &self,
        source: &str,
        destination: Option<&str>,
        keep_volatile: bool,
        ephemeral: EphemeralFlag,
    ) -> Result<CopyOutcome> {
        let source_ref = ContainerRef::parse(source)?;
        if source_ref.name.is_empty() {
            return Err(CopyError::InvalidArgument(
                "you must specify a source container name".to_string(),
            ));
        }

        let destination_ref = match destination.filter(|d| !d.is_empty()) {
            Some(raw) => {
                let mut parsed = ContainerRef::parse(raw)?;
                if parsed.name.is_empty() {
                    parsed.name = source_ref.name.clone();
                }
                parsed
            }
            None => ContainerRef {
                remote: None,
                name: String::new(),
            },
        };

        let source_remote = self.config.resolve_remote(source_ref.remote.as_deref())?;
        let destination_remote = self
            .config
            .resolve_remote(destination_ref.remote.as_deref())?;
        let destination_name =
            Some(destination_ref.name.as_str()).filter(|name| !name.is_empty());

        debug!("Transfer mode: {}", self.config.transfer_mode);
        debug!("Source remote: {}", source_remote);
        debug!("Destination remote: {}", destination_remote);

        let host = self.host.as_ref();
        let metadata = fetch_source_metadata(host, &source_remote, &source_ref.name).await?;
        let metadata = reconcile(metadata, &self.overrides, keep_volatile);

        if source_remote == destination_remote {
            LocalCopy {
                remote: &source_remote,
                source: &source_ref.name,
                destination: destination_name,
                metadata,
                ephemeral,
            }
            .run(host, self.config.wait_timeout())
            .await
        } else {
            MigrationCoordinator::new(host, self.config.transfer_mode, self.config.wait_timeout())
                .migrate(Migration {
                    source_remote: &source_remote,
                    source: &source_ref.name,
                    destination_remote: &destination_remote,
                    destination: destination_name,
                    metadata,
                    ephemeral,
                })
                .await
        }
    }
}
