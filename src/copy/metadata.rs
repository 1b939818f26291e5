//! Source metadata lookup.

use crate::copy::{EphemeralFlag, Result};
use crate::env;
use crate::host::{ContainerMetadata, HostApi};
use tracing::debug;

/// A `container/snapshot` name refers to a snapshot.
pub fn is_snapshot(name: &str) -> bool {
    name.contains(env::api::SNAPSHOT_DELIMITER)
}

/// Container owning a snapshot, or the name itself for a container.
pub fn parent_container(name: &str) -> &str {
    name.split_once(env::api::SNAPSHOT_DELIMITER)
        .map_or(name, |(container, _)| container)
}

/// Fetch the metadata of a container or snapshot.
///
/// # Errors
///
/// Returns [`CopyError::NotFound`](crate::copy::CopyError::NotFound) if the
/// source does not exist and
/// [`CopyError::Transport`](crate::copy::CopyError::Transport) if the host is
/// unreachable.
pub async fn fetch_source_metadata(
    host: &dyn HostApi,
    remote: &str,
    name: &str,
) -> Result<ContainerMetadata> {
    let metadata = if is_snapshot(name) {
        debug!("Fetching snapshot metadata for {}:{}", remote, name);
        host.fetch_snapshot_metadata(remote, name).await?
    } else {
        debug!("Fetching container metadata for {}:{}", remote, name);
        host.fetch_container_metadata(remote, name).await?
    };

    debug!(
        "Source {}:{} is {} with profiles {:?}",
        remote, name, metadata.architecture, metadata.profiles
    );
    Ok(metadata)
}

/// Turn the requested flag into a concrete value.
///
/// An unspecified flag re-queries the source container (the owning container
/// for snapshots) so the copy mirrors its attribute at this moment.
pub async fn resolve_ephemeral(
    host: &dyn HostApi,
    remote: &str,
    name: &str,
    flag: EphemeralFlag,
) -> Result<bool> {
    match flag {
        EphemeralFlag::Enabled => Ok(true),
        EphemeralFlag::Disabled => Ok(false),
        EphemeralFlag::Unspecified => {
            let container = parent_container(name);
            let current = host.fetch_container_metadata(remote, container).await?;
            debug!(
                "Ephemeral flag of {}:{} resolved to {}",
                remote, container, current.ephemeral
            );
            Ok(current.ephemeral)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copy::CopyError;
    use crate::host::{HostCall, MockHost, MockRemote};

    fn ephemeral_source() -> MockHost {
        let metadata = ContainerMetadata {
            architecture: "x86_64".to_string(),
            ephemeral: true,
            ..Default::default()
        };
        MockHost::new().with_remote(
            "hosta",
            MockRemote::new()
                .with_container("web1", metadata.clone())
                .with_snapshot("web1/snap0", metadata),
        )
    }

    #[test]
    fn test_snapshot_names() {
        assert!(is_snapshot("web1/snap0"));
        assert!(!is_snapshot("web1"));
        assert_eq!(parent_container("web1/snap0"), "web1");
        assert_eq!(parent_container("web1"), "web1");
    }

    #[tokio::test]
    async fn test_fetch_picks_snapshot_endpoint() {
        let host = ephemeral_source();

        fetch_source_metadata(&host, "hosta", "web1/snap0")
            .await
            .unwrap();
        fetch_source_metadata(&host, "hosta", "web1").await.unwrap();

        assert_eq!(
            host.calls(),
            vec![
                HostCall::FetchSnapshot {
                    remote: "hosta".into(),
                    name: "web1/snap0".into()
                },
                HostCall::FetchContainer {
                    remote: "hosta".into(),
                    name: "web1".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_fetch_missing_source() {
        let host = ephemeral_source();
        let result = fetch_source_metadata(&host, "hosta", "db1").await;
        assert!(matches!(result, Err(CopyError::NotFound(_))));

        let result = fetch_source_metadata(&host, "nowhere", "web1").await;
        assert!(matches!(result, Err(CopyError::Transport(_))));
    }

    #[tokio::test]
    async fn test_resolve_ephemeral() {
        let host = ephemeral_source();

        assert!(!resolve_ephemeral(&host, "hosta", "web1", EphemeralFlag::Disabled)
            .await
            .unwrap());
        assert!(host.calls().is_empty());

        assert!(resolve_ephemeral(&host, "hosta", "web1/snap0", EphemeralFlag::Unspecified)
            .await
            .unwrap());
        assert_eq!(
            host.calls(),
            vec![HostCall::FetchContainer {
                remote: "hosta".into(),
                name: "web1".into()
            }]
        );
    }
}
