//! Merging operator overrides into fetched metadata.

use crate::env::config_keys;
use crate::host::{ConfigMap, ContainerMetadata, Devices};

/// Operator-supplied additions to the copied container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    /// Profiles appended after the source's own profiles
    pub profiles: Vec<String>,
    /// Config keys replacing same-named source keys
    pub config: ConfigMap,
}

/// Metadata ready to be sent to the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledMetadata {
    pub architecture: String,
    pub devices: Devices,
    pub config: ConfigMap,
    pub profiles: Vec<String>,
    /// Image the source was created from, captured before volatile keys are dropped
    pub base_image: Option<String>,
}

/// Apply overrides and the volatile key policy to fetched metadata.
pub fn reconcile(
    metadata: ContainerMetadata,
    overrides: &Overrides,
    keep_volatile: bool,
) -> ReconciledMetadata {
    let ContainerMetadata {
        architecture,
        devices,
        mut config,
        mut profiles,
        ..
    } = metadata;

    profiles.extend(overrides.profiles.iter().cloned());
    config.extend(
        overrides
            .config
            .iter()
            .map(|(key, value)| (key.clone(), value.clone())),
    );

    let base_image = config
        .get(config_keys::BASE_IMAGE)
        .filter(|image| !image.is_empty())
        .cloned();

    if !keep_volatile {
        strip_volatile(&mut config);
    }

    ReconciledMetadata {
        architecture,
        devices,
        config,
        profiles,
        base_image,
    }
}

/// Remove every host-specific runtime key.
pub fn strip_volatile(config: &mut ConfigMap) {
    config.retain(|key, _| !key.starts_with(config_keys::VOLATILE_PREFIX));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn source() -> ContainerMetadata {
        ContainerMetadata {
            architecture: "x86_64".to_string(),
            devices: BTreeMap::from([(
                "root".to_string(),
                BTreeMap::from([("type".to_string(), "disk".to_string())]),
            )]),
            config: BTreeMap::from([
                ("limits.cpu".to_string(), "2".to_string()),
                ("limits.memory".to_string(), "1GB".to_string()),
                ("volatile.base_image".to_string(), "abc123".to_string()),
                ("volatile.eth0.hwaddr".to_string(), "00:16:3e:00:00:01".to_string()),
            ]),
            profiles: vec!["default".to_string()],
            ephemeral: false,
        }
    }

    #[test]
    fn test_overrides_are_merged() {
        let overrides = Overrides {
            profiles: vec!["web".to_string(), "default".to_string()],
            config: BTreeMap::from([("limits.cpu".to_string(), "4".to_string())]),
        };

        let reconciled = reconcile(source(), &overrides, false);

        assert_eq!(reconciled.profiles, ["default", "web", "default"]);
        assert_eq!(reconciled.config["limits.cpu"], "4");
        assert_eq!(reconciled.config["limits.memory"], "1GB");
        assert_eq!(reconciled.devices["root"]["type"], "disk");
        assert_eq!(reconciled.architecture, "x86_64");
    }

    #[test]
    fn test_volatile_keys_stripped() {
        let reconciled = reconcile(source(), &Overrides::default(), false);

        assert!(reconciled.config.keys().all(|k| !k.starts_with("volatile")));
        assert_eq!(reconciled.base_image.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_volatile_keys_kept() {
        let reconciled = reconcile(source(), &Overrides::default(), true);

        assert_eq!(reconciled.config["volatile.base_image"], "abc123");
        assert_eq!(reconciled.base_image.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_base_image_override_is_captured() {
        let overrides = Overrides {
            config: BTreeMap::from([("volatile.base_image".to_string(), "def456".to_string())]),
            ..Default::default()
        };

        let reconciled = reconcile(source(), &overrides, false);
        assert_eq!(reconciled.base_image.as_deref(), Some("def456"));
        assert!(!reconciled.config.contains_key("volatile.base_image"));
    }

    #[test]
    fn test_missing_base_image() {
        let mut metadata = source();
        metadata.config.remove("volatile.base_image");

        let reconciled = reconcile(metadata, &Overrides::default(), false);
        assert_eq!(reconciled.base_image, None);
    }

    #[test]
    fn test_strip_is_idempotent() {
        let mut once = source().config;
        strip_volatile(&mut once);

        let mut twice = once.clone();
        strip_volatile(&mut twice);

        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
    }
}
