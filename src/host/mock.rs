//! In-memory host implementation.
//!
//! [`MockHost`] simulates any number of remotes, applies copies and
//! migrations to its own state, and records every call so callers can assert
//! on the exact sequence of host interactions.

use crate::env;
use crate::host::types::resource_name;
use crate::host::{
    BackupApi, BackupRequest, ContainerMetadata, HostApi, HostError, LocalCopyRequest,
    MigrationHandshake, MigrationRequest, Operation, OperationStatus, Result,
};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// A host call as recorded by [`MockHost`].
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    FetchContainer { remote: String, name: String },
    FetchSnapshot { remote: String, name: String },
    ListProfiles { remote: String },
    LocalCopy { remote: String, request: LocalCopyRequest },
    Handshake { remote: String, name: String, push: bool },
    ListAddresses { remote: String },
    Certificate { remote: String },
    MigrateFrom { remote: String, request: MigrationRequest },
    Wait { remote: String, operation: String },
    CreateBackup { remote: String, container: String },
    DownloadBackup { remote: String, container: String, backup: String },
    DeleteBackup { remote: String, container: String, backup: String },
}

/// State and failure behavior of one simulated remote.
#[derive(Debug, Clone, Default)]
pub struct MockRemote {
    pub containers: BTreeMap<String, ContainerMetadata>,
    /// Snapshots keyed by `container/snapshot`
    pub snapshots: BTreeMap<String, ContainerMetadata>,
    pub profiles: Vec<String>,
    pub addresses: Vec<String>,
    pub certificate: String,
    /// Source addresses this host cannot reach when asked to migrate
    pub unreachable: BTreeSet<String>,
    /// Handshake requests fail with a transport error
    pub refuse_handshake: bool,
    /// Accepted operations end in failure with this reason
    pub operation_failure: Option<String>,
    /// Finished operations omit their resource list
    pub omit_resources: bool,
    /// Name given to copies created without an explicit name
    pub assigned_name: Option<String>,
    /// Backup tarballs keyed by container name
    pub backups: BTreeMap<String, Vec<u8>>,
    /// Backup downloads fail midway
    pub fail_downloads: bool,
    /// Operations on this host never finish; waits end only at their deadline
    pub stall_operations: bool,
}

impl MockRemote {
    pub fn new() -> Self {
        Self {
            profiles: vec!["default".to_string()],
            certificate: "-----BEGIN CERTIFICATE-----".to_string(),
            ..Default::default()
        }
    }

    pub fn with_container(mut self, name: &str, metadata: ContainerMetadata) -> Self {
        self.containers.insert(name.to_string(), metadata);
        self
    }

    pub fn with_snapshot(mut self, name: &str, metadata: ContainerMetadata) -> Self {
        self.snapshots.insert(name.to_string(), metadata);
        self
    }

    pub fn with_profiles(mut self, profiles: &[&str]) -> Self {
        self.profiles = profiles.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_addresses(mut self, addresses: &[&str]) -> Self {
        self.addresses = addresses.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_unreachable(mut self, addresses: &[&str]) -> Self {
        self.unreachable = addresses.iter().map(|a| a.to_string()).collect();
        self
    }
}

#[derive(Debug)]
struct PendingOperation {
    remote: String,
    result: Operation,
    creates: Option<(String, ContainerMetadata)>,
}

#[derive(Debug, Default)]
struct MockState {
    remotes: BTreeMap<String, MockRemote>,
    operations: BTreeMap<String, PendingOperation>,
    calls: Vec<HostCall>,
    next_id: u64,
}

/// In-memory [`HostApi`] used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MockHost {
    state: Mutex<MockState>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_remote(self, name: &str, remote: MockRemote) -> Self {
        self.lock().remotes.insert(name.to_string(), remote);
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<HostCall> {
        self.lock().calls.clone()
    }

    /// Number of recorded calls matching the predicate.
    pub fn count_calls(&self, predicate: impl Fn(&HostCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|call| predicate(call)).count()
    }

    /// Snapshot of a remote's current state.
    pub fn remote(&self, name: &str) -> Option<MockRemote> {
        self.lock().remotes.get(name).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MockState {
    fn record(&mut self, call: HostCall) {
        self.calls.push(call);
    }

    fn remote(&self, remote: &str) -> Result<&MockRemote> {
        self.remotes
            .get(remote)
            .ok_or_else(|| HostError::Transport(format!("Remote {} is unreachable", remote)))
    }

    fn next_operation_id(&mut self) -> String {
        self.next_id += 1;
        format!("op-{}", self.next_id)
    }

    /// Register an accepted operation and return it in its running state.
    fn start(
        &mut self,
        remote: &str,
        resources: BTreeMap<String, Vec<String>>,
        creates: Option<(String, ContainerMetadata)>,
    ) -> Result<Operation> {
        let behavior = self.remote(remote)?.clone();
        let id = self.next_operation_id();

        let mut result = match &behavior.operation_failure {
            Some(reason) => {
                let mut op = Operation::new(&id, OperationStatus::Failure);
                op.err = reason.clone();
                op
            }
            None => Operation::new(&id, OperationStatus::Success),
        };
        if !behavior.omit_resources {
            result.resources = Some(resources.clone());
        }

        let mut running = Operation::new(&id, OperationStatus::Running);
        running.resources = Some(resources);

        self.operations.insert(
            id,
            PendingOperation {
                remote: remote.to_string(),
                result,
                creates,
            },
        );
        Ok(running)
    }
}

impl MockState {
    /// Resolve a started operation, applying what it creates.
    fn finish(&mut self, remote: &str, operation: &Operation) -> Result<Operation> {
        let pending = self
            .operations
            .remove(&operation.id)
            .ok_or_else(|| HostError::NotFound(operation.path()))?;
        if pending.remote != remote {
            return Err(HostError::NotFound(operation.path()));
        }

        if pending.result.status() == OperationStatus::Success
            && let Some((name, metadata)) = pending.creates
            && let Some(host) = self.remotes.get_mut(remote)
        {
            host.containers.insert(name, metadata);
        }

        Ok(pending.result)
    }
}

fn container_resources(name: &str) -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([(
        env::api::RESOURCE_CONTAINERS.to_string(),
        vec![env::api_path(&["containers", name])],
    )])
}

#[async_trait]
impl HostApi for MockHost {
    async fn fetch_container_metadata(
        &self,
        remote: &str,
        name: &str,
    ) -> Result<ContainerMetadata> {
        let mut state = self.lock();
        state.record(HostCall::FetchContainer {
            remote: remote.to_string(),
            name: name.to_string(),
        });
        state
            .remote(remote)?
            .containers
            .get(name)
            .cloned()
            .ok_or_else(|| HostError::NotFound(format!("{}:{}", remote, name)))
    }

    async fn fetch_snapshot_metadata(&self, remote: &str, name: &str) -> Result<ContainerMetadata> {
        let mut state = self.lock();
        state.record(HostCall::FetchSnapshot {
            remote: remote.to_string(),
            name: name.to_string(),
        });
        state
            .remote(remote)?
            .snapshots
            .get(name)
            .cloned()
            .ok_or_else(|| HostError::NotFound(format!("{}:{}", remote, name)))
    }

    async fn list_profiles(&self, remote: &str) -> Result<Vec<String>> {
        let mut state = self.lock();
        state.record(HostCall::ListProfiles {
            remote: remote.to_string(),
        });
        Ok(state.remote(remote)?.profiles.clone())
    }

    async fn request_local_copy(
        &self,
        remote: &str,
        request: &LocalCopyRequest,
    ) -> Result<Operation> {
        let mut state = self.lock();
        state.record(HostCall::LocalCopy {
            remote: remote.to_string(),
            request: request.clone(),
        });

        let host = state.remote(remote)?;
        let source = host
            .containers
            .get(&request.source)
            .or_else(|| host.snapshots.get(&request.source))
            .cloned()
            .ok_or_else(|| HostError::NotFound(format!("{}:{}", remote, request.source)))?;

        let name = request
            .name
            .clone()
            .or_else(|| host.assigned_name.clone())
            .unwrap_or_else(|| format!("{}-copy", request.source));

        let created = ContainerMetadata {
            config: request.config.clone(),
            profiles: request.profiles.clone(),
            ephemeral: request.ephemeral,
            ..source
        };

        state.start(remote, container_resources(&name), Some((name, created)))
    }

    async fn request_migration_handshake(
        &self,
        remote: &str,
        name: &str,
        push: bool,
    ) -> Result<MigrationHandshake> {
        let mut state = self.lock();
        state.record(HostCall::Handshake {
            remote: remote.to_string(),
            name: name.to_string(),
            push,
        });

        if state.remote(remote)?.refuse_handshake {
            return Err(HostError::Transport(format!(
                "{} refused the migration handshake",
                remote
            )));
        }

        let id = state.next_operation_id();
        let mut operation = Operation::new(&id, OperationStatus::Running);
        operation.metadata = Some(json!({
            "control": format!("{}-control", id),
            "fs": format!("{}-fs", id),
        }));

        Ok(MigrationHandshake {
            secrets: operation.secrets()?,
            operation_path: operation.path(),
        })
    }

    async fn list_host_addresses(&self, remote: &str) -> Result<Vec<String>> {
        let mut state = self.lock();
        state.record(HostCall::ListAddresses {
            remote: remote.to_string(),
        });
        Ok(state.remote(remote)?.addresses.clone())
    }

    async fn host_certificate(&self, remote: &str) -> Result<String> {
        let mut state = self.lock();
        state.record(HostCall::Certificate {
            remote: remote.to_string(),
        });
        Ok(state.remote(remote)?.certificate.clone())
    }

    async fn request_migration_from(
        &self,
        remote: &str,
        request: &MigrationRequest,
    ) -> Result<Operation> {
        let mut state = self.lock();
        state.record(HostCall::MigrateFrom {
            remote: remote.to_string(),
            request: request.clone(),
        });

        let host = state.remote(remote)?;
        if let Some(address) = host
            .unreachable
            .iter()
            .find(|address| request.source_url.contains(address.as_str()))
        {
            return Err(HostError::Transport(format!(
                "{} cannot reach {}",
                remote, address
            )));
        }

        let name = request
            .name
            .clone()
            .or_else(|| host.assigned_name.clone())
            .unwrap_or_else(|| "migrated".to_string());

        let created = ContainerMetadata {
            architecture: request.architecture.clone(),
            devices: request.devices.clone(),
            config: request.config.clone(),
            profiles: request.profiles.clone(),
            ephemeral: request.ephemeral,
        };

        state.start(remote, container_resources(&name), Some((name, created)))
    }

    async fn wait_operation(
        &self,
        remote: &str,
        operation: &Operation,
        timeout: Option<Duration>,
    ) -> Result<Operation> {
        let finished = {
            let mut state = self.lock();
            state.record(HostCall::Wait {
                remote: remote.to_string(),
                operation: operation.id.clone(),
            });

            let stalled = state
                .remotes
                .get(remote)
                .is_some_and(|host| host.stall_operations);
            if stalled {
                None
            } else {
                Some(state.finish(remote, operation))
            }
        };

        match (finished, timeout) {
            (Some(result), _) => result,
            (None, Some(limit)) => {
                tokio::time::sleep(limit).await;
                Err(HostError::Timeout(limit))
            }
            (None, None) => std::future::pending().await,
        }
    }
}

#[async_trait]
impl BackupApi for MockHost {
    async fn create_backup(
        &self,
        remote: &str,
        container: &str,
        request: &BackupRequest,
    ) -> Result<Operation> {
        let mut state = self.lock();
        state.record(HostCall::CreateBackup {
            remote: remote.to_string(),
            container: container.to_string(),
        });

        let host = state.remote(remote)?;
        if !host.containers.contains_key(container) {
            return Err(HostError::NotFound(format!("{}:{}", remote, container)));
        }

        let name = if request.name.is_empty() {
            "backup0".to_string()
        } else {
            request.name.clone()
        };
        let resources = BTreeMap::from([(
            env::api::RESOURCE_BACKUPS.to_string(),
            vec![env::api_path(&["containers", container, "backups", &name])],
        )]);
        state.start(remote, resources, None)
    }

    async fn download_backup(
        &self,
        remote: &str,
        container: &str,
        backup: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        progress: &mut (dyn FnMut(u64) + Send),
    ) -> Result<u64> {
        let (data, fail) = {
            let mut state = self.lock();
            state.record(HostCall::DownloadBackup {
                remote: remote.to_string(),
                container: container.to_string(),
                backup: backup.to_string(),
            });
            let host = state.remote(remote)?;
            let data = host
                .backups
                .get(container)
                .cloned()
                .ok_or_else(|| HostError::NotFound(resource_name(backup).to_string()))?;
            (data, host.fail_downloads)
        };

        let mut written = 0u64;
        for chunk in data.chunks(4096) {
            if fail {
                return Err(HostError::Transport("Connection reset".to_string()));
            }
            sink.write_all(chunk).await?;
            written += chunk.len() as u64;
            progress(written);
        }
        sink.flush().await?;
        Ok(written)
    }

    async fn delete_backup(
        &self,
        remote: &str,
        container: &str,
        backup: &str,
    ) -> Result<Operation> {
        let mut state = self.lock();
        state.record(HostCall::DeleteBackup {
            remote: remote.to_string(),
            container: container.to_string(),
            backup: backup.to_string(),
        });
        state.start(remote, BTreeMap::new(), None)
    }
}
