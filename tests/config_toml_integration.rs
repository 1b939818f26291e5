use ctcopy::config::{ClientConfig, RemoteEndpoint};
use ctcopy::{ContainerCopier, CopyError, EphemeralFlag, MockHost, TransferMode};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_config_serialization_roundtrip() {
    let original_config = ClientConfig::default();

    let toml_str = original_config
        .to_toml_string()
        .expect("Should be able to serialize config to TOML");

    assert!(!toml_str.is_empty(), "TOML string should not be empty");
    assert!(toml_str.contains("default_remote"), "Should contain default_remote field");

    let deserialized_config =
        ClientConfig::from_toml_str(&toml_str).expect("Should be able to deserialize TOML string");

    assert_eq!(original_config.default_remote, deserialized_config.default_remote);
    assert_eq!(original_config.transfer_mode, deserialized_config.transfer_mode);
    assert_eq!(original_config.remotes, deserialized_config.remotes);
    assert_eq!(
        original_config.request_timeout_secs,
        deserialized_config.request_timeout_secs
    );
}

#[test]
fn test_config_file_operations() {
    let mut original_config = ClientConfig::default();
    original_config.wait_timeout_secs = Some(900);
    original_config.client_cert = Some(PathBuf::from("/home/user/.ctcopy/client.crt"));
    original_config.client_key = Some(PathBuf::from("/home/user/.ctcopy/client.key"));

    let temp_file = NamedTempFile::new().expect("Should be able to create temporary file");
    let temp_path = temp_file.path();

    original_config
        .to_toml_file(temp_path)
        .expect("Should be able to save config to file");

    let loaded_config =
        ClientConfig::from_toml_file(temp_path).expect("Should be able to load config from file");

    assert_eq!(loaded_config.wait_timeout(), Some(Duration::from_secs(900)));
    assert_eq!(original_config.client_cert, loaded_config.client_cert);
    assert_eq!(original_config.client_key, loaded_config.client_key);
    assert_eq!(original_config.remotes, loaded_config.remotes);
}

#[test]
fn test_config_toml_structure() {
    let config = ClientConfig::with_remotes(
        "hosta",
        [
            ("hosta", RemoteEndpoint::new("https://10.0.0.1:8443")),
            ("hostb", RemoteEndpoint::new("https://10.0.1.1:8443")),
        ],
    );
    let toml_str = config.to_toml_string().expect("Should be able to serialize config");

    assert!(toml_str.contains("[remotes.hosta]"), "Should contain hosta section");
    assert!(toml_str.contains("[remotes.hostb]"), "Should contain hostb section");
    assert!(toml_str.contains("transfer_mode = \"pull\""), "Should contain transfer_mode");
    assert!(
        !toml_str.contains("wait_timeout_secs"),
        "Unset wait timeout should be omitted"
    );
}

#[test]
fn test_config_error_handling() {
    let result = ClientConfig::from_toml_file("non_existent_file.toml");
    assert!(result.is_err(), "Should fail when loading non-existent file");

    let invalid_toml = "invalid toml content [[[";
    let result = ClientConfig::from_toml_str(invalid_toml);
    assert!(result.is_err(), "Should fail when parsing invalid TOML");

    let bad_mode = r#"
        default_remote = "local"
        transfer_mode = "sideways"
    "#;
    assert!(
        ClientConfig::from_toml_str(bad_mode).is_err(),
        "Should reject unknown transfer modes"
    );
}

#[tokio::test]
async fn test_config_drives_remote_resolution() {
    let config = ClientConfig::from_toml_str(
        r#"
        default_remote = "hosta"
        transfer_mode = "push"

        [remotes.hosta]
        addr = "https://10.0.0.1:8443"
        "#,
    )
    .expect("Should parse config");

    let copier = ContainerCopier::new(Arc::new(MockHost::new()), config);
    assert_eq!(copier.transfer_mode(), TransferMode::Push);

    // hostb is not configured, so nothing reaches the host
    let result = copier
        .copy_container("web1", Some("hostb:web1"), false, EphemeralFlag::Unspecified)
        .await;
    assert!(matches!(result, Err(CopyError::InvalidArgument(_))));
}
