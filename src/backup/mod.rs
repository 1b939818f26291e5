//! Container backup export.
//!
//! The host builds a backup tarball of a container (optionally including its
//! snapshots), the tarball is streamed to a local file, and the server-side
//! backup is deleted again whether or not the download succeeded.

use crate::config::{ClientConfig, ConfigError, ContainerRef};
use crate::env;
use crate::host::{BackupApi, BackupRequest, HostError, Operation, OperationStatus, resource_name};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Backup export errors.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Malformed reference or unknown remote
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Host call failed
    #[error("Host error: {0}")]
    Host(#[from] HostError),

    /// Backup operation failed on the host
    #[error("Backup failed: {0}")]
    OperationFailed(String),

    /// Host finished the backup without naming it
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Target file could not be written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ConfigError> for ExportError {
    fn from(error: ConfigError) -> Self {
        ExportError::InvalidArgument(error.to_string())
    }
}

/// Result type for export operations.
pub type Result<T> = std::result::Result<T, ExportError>;

/// What to include in the backup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportOptions {
    /// Leave snapshots out of the backup
    pub container_only: bool,
    /// Use the storage driver's native send format (btrfs, zfs)
    pub optimized_storage: bool,
}

/// Summary of a finished export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub backup_name: String,
    pub target: PathBuf,
    pub bytes_written: u64,
}

/// Exports container backups to local files.
pub struct BackupExporter {
    host: Arc<dyn BackupApi>,
    config: ClientConfig,
}

impl BackupExporter {
    pub fn new(host: Arc<dyn BackupApi>, config: ClientConfig) -> Self {
        Self { host, config }
    }

    /// Export `source` (`[remote:]name`) into `target`.
    ///
    /// `target` defaults to `backup.tar.xz` in the current directory. A
    /// partially written target is removed when the download fails.
    ///
    /// # Errors
    ///
    /// Returns error if the backup cannot be created, named or downloaded.
    pub async fn export(
        &self,
        source: &str,
        target: Option<&Path>,
        options: ExportOptions,
        progress: &mut (dyn FnMut(u64) + Send),
    ) -> Result<ExportReport> {
        let source_ref = ContainerRef::parse(source)?;
        if source_ref.name.is_empty() {
            return Err(ExportError::InvalidArgument(
                "you must specify a container name".to_string(),
            ));
        }
        let remote = self.config.resolve_remote(source_ref.remote.as_deref())?;
        let container = source_ref.name.as_str();
        let target = target
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(env::backup::DEFAULT_TARGET_FILE));

        let request = BackupRequest {
            name: String::new(),
            expiry: Utc::now() + chrono::Duration::minutes(env::backup::EXPIRY_MINUTES),
            container_only: options.container_only,
            optimized_storage: options.optimized_storage,
        };

        info!("Creating backup of {}:{}", remote, container);
        let operation = self.host.create_backup(&remote, container, &request).await?;
        let finished = self.wait(&remote, &operation).await?;

        let backup_name = finished
            .resources_of(env::api::RESOURCE_BACKUPS)
            .first()
            .map(|path| resource_name(path).to_string())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                ExportError::Protocol("host did not report the backup it created".to_string())
            })?;
        debug!("Backup {} of {} is ready", backup_name, container);

        let downloaded = self
            .download(&remote, container, &backup_name, &target, progress)
            .await;
        self.cleanup(&remote, container, &backup_name).await;

        let bytes_written = downloaded?;
        info!(
            "Exported {} bytes of {}:{} to {}",
            bytes_written,
            remote,
            container,
            target.display()
        );

        Ok(ExportReport {
            backup_name,
            target,
            bytes_written,
        })
    }

    async fn wait(&self, remote: &str, operation: &Operation) -> Result<Operation> {
        let finished = self
            .host
            .wait_operation(remote, operation, self.config.wait_timeout())
            .await?;

        match finished.status() {
            OperationStatus::Success => Ok(finished),
            status => Err(ExportError::OperationFailed(if finished.err.is_empty() {
                status.to_string()
            } else {
                finished.err
            })),
        }
    }

    async fn download(
        &self,
        remote: &str,
        container: &str,
        backup: &str,
        target: &Path,
        progress: &mut (dyn FnMut(u64) + Send),
    ) -> Result<u64> {
        let mut file = tokio::fs::File::create(target).await?;

        match self
            .host
            .download_backup(remote, container, backup, &mut file, progress)
            .await
        {
            Ok(written) => Ok(written),
            Err(e) => {
                drop(file);
                if let Err(remove_error) = tokio::fs::remove_file(target).await {
                    warn!(
                        "Failed to remove partial export {}: {}",
                        target.display(),
                        remove_error
                    );
                }
                Err(e.into())
            }
        }
    }

    /// Delete the server-side backup; failures are only logged.
    async fn cleanup(&self, remote: &str, container: &str, backup: &str) {
        let deleted = match self.host.delete_backup(remote, container, backup).await {
            Ok(operation) => self.wait(remote, &operation).await.map(|_| ()),
            Err(e) => Err(e.into()),
        };

        match deleted {
            Ok(()) => debug!("Deleted backup {} of {}", backup, container),
            Err(e) => warn!("Failed to delete backup {} of {}: {}", backup, container, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteEndpoint;
    use crate::host::{ContainerMetadata, HostCall, MockHost, MockRemote};
    use tempfile::TempDir;

    fn config() -> ClientConfig {
        ClientConfig::with_remotes(
            "hosta",
            [("hosta", RemoteEndpoint::new("https://10.0.0.1:8443"))],
        )
    }

    fn host_with_backup(data: &[u8]) -> MockHost {
        let mut remote =
            MockRemote::new().with_container("web1", ContainerMetadata::default());
        remote.backups.insert("web1".to_string(), data.to_vec());
        MockHost::new().with_remote("hosta", remote)
    }

    #[tokio::test]
    async fn test_export_writes_file_and_deletes_backup() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("web1.tar.xz");
        let data = vec![7u8; 10_000];
        let host = Arc::new(host_with_backup(&data));

        let mut reported = Vec::new();
        let report = BackupExporter::new(host.clone(), config())
            .export(
                "web1",
                Some(&target),
                ExportOptions::default(),
                &mut |bytes| reported.push(bytes),
            )
            .await
            .unwrap();

        assert_eq!(report.backup_name, "backup0");
        assert_eq!(report.bytes_written, 10_000);
        assert_eq!(std::fs::read(&target).unwrap(), data);
        assert_eq!(reported.last(), Some(&10_000));

        assert_eq!(
            host.count_calls(|c| matches!(c, HostCall::DeleteBackup { backup, .. } if backup == "backup0")),
            1
        );
    }

    #[tokio::test]
    async fn test_failed_download_removes_target() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("web1.tar.xz");
        let mut remote =
            MockRemote::new().with_container("web1", ContainerMetadata::default());
        remote.backups.insert("web1".to_string(), vec![1, 2, 3]);
        remote.fail_downloads = true;
        let host = Arc::new(MockHost::new().with_remote("hosta", remote));

        let result = BackupExporter::new(host.clone(), config())
            .export("hosta:web1", Some(&target), ExportOptions::default(), &mut |_| {})
            .await;

        assert!(matches!(result, Err(ExportError::Host(HostError::Transport(_)))));
        assert!(!target.exists());
        assert_eq!(
            host.count_calls(|c| matches!(c, HostCall::DeleteBackup { .. })),
            1
        );
    }

    #[tokio::test]
    async fn test_export_failed_backup_operation() {
        let mut remote =
            MockRemote::new().with_container("web1", ContainerMetadata::default());
        remote.operation_failure = Some("storage pool full".to_string());
        let host = Arc::new(MockHost::new().with_remote("hosta", remote));

        let result = BackupExporter::new(host.clone(), config())
            .export("web1", None, ExportOptions::default(), &mut |_| {})
            .await;

        match result {
            Err(ExportError::OperationFailed(reason)) => assert_eq!(reason, "storage pool full"),
            other => panic!("Expected OperationFailed, got {:?}", other),
        }
        assert_eq!(
            host.count_calls(|c| matches!(c, HostCall::DownloadBackup { .. })),
            0
        );
    }

    #[tokio::test]
    async fn test_export_unknown_remote() {
        let host = Arc::new(host_with_backup(&[]));
        let result = BackupExporter::new(host, config())
            .export("hostz:web1", None, ExportOptions::default(), &mut |_| {})
            .await;
        assert!(matches!(result, Err(ExportError::InvalidArgument(_))));
    }
}
