use crate::copy::{CopyError, Result};
use crate::env;
use crate::host::{HostApi, Operation, OperationStatus, resource_name};
use std::time::Duration;
use tracing::debug;

/// Wait for an accepted operation and turn a failed outcome into an error.
pub(crate) async fn wait_for_success(
    host: &dyn HostApi,
    remote: &str,
    operation: &Operation,
    timeout: Option<Duration>,
) -> Result<Operation> {
    let finished = host.wait_operation(remote, operation, timeout).await?;
    debug!(
        "Operation {} on {} finished: {}",
        finished.id,
        remote,
        finished.status()
    );

    match finished.status() {
        OperationStatus::Success => Ok(finished),
        status => {
            let reason = if finished.err.is_empty() {
                format!("operation {} ended as {}", finished.id, status)
            } else {
                finished.err.clone()
            };
            Err(CopyError::OperationFailed(reason))
        }
    }
}

/// Name of the container a finished operation created.
///
/// # Errors
///
/// Returns [`CopyError::Protocol`] if the operation lists no container.
pub(crate) fn reported_container_name(operation: &Operation) -> Result<String> {
    operation
        .resources_of(env::api::RESOURCE_CONTAINERS)
        .first()
        .map(|path| resource_name(path).to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            CopyError::Protocol(
                "didn't get any affected image, container or snapshot from server".to_string(),
            )
        })
}
