//! Environment constants and path utilities for ctcopy.
//!
//! This module centralizes the hardcoded paths, file names and protocol
//! literals used throughout the crate, making them easier to maintain.

use std::path::{Path, PathBuf};

/// Application directory name (hidden directory like .git, .vscode)
pub const CTCOPY_DIR_NAME: &str = ".ctcopy";

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name looked up directly in the current directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "ctcopy.toml";

/// System-wide configuration path (Unix-like systems)
pub const SYSTEM_CONFIG_PATH: &str = "/etc/ctcopy/config.toml";

/// Name of the remote used when none is configured
pub const DEFAULT_REMOTE_NAME: &str = "local";

/// Container configuration keys with special meaning to the copy logic
pub mod config_keys {
    /// Prefix of host-specific runtime keys that are not portable between hosts
    pub const VOLATILE_PREFIX: &str = "volatile";

    /// Key recording the image a container was created from
    pub const BASE_IMAGE: &str = "volatile.base_image";
}

/// Literals of the host REST API
pub mod api {
    /// API version prefix of every endpoint
    pub const API_PREFIX: &str = "/1.0";

    /// First path segment of every endpoint
    pub const API_VERSION: &str = "1.0";

    /// Scheme prepended to a host address to form a migration source URL
    pub const MIGRATION_URL_SCHEME: &str = "https://";

    /// Resource kind listing containers affected by an operation
    pub const RESOURCE_CONTAINERS: &str = "containers";

    /// Resource kind listing backups affected by an operation
    pub const RESOURCE_BACKUPS: &str = "backups";

    /// Separator between a container name and a snapshot name
    pub const SNAPSHOT_DELIMITER: char = '/';

    /// Separator between a remote name and a container name
    pub const REMOTE_DELIMITER: char = ':';
}

/// Backup export defaults
pub mod backup {
    /// File written when no export target is given
    pub const DEFAULT_TARGET_FILE: &str = "backup.tar.xz";

    /// Minutes a server-side backup is kept before it expires on its own
    pub const EXPIRY_MINUTES: i64 = 30;
}

/// Build config directory path in user's home directory
pub fn user_config_dir_path(home_dir: &Path) -> PathBuf {
    home_dir.join(CTCOPY_DIR_NAME)
}

/// Build config file path in user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    user_config_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build local config file path in current directory
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(CTCOPY_DIR_NAME).join(CONFIG_FILE_NAME)
}

/// Build an API path from its segments, e.g. `["containers", "c1"]` → `/1.0/containers/c1`
pub fn api_path(segments: &[&str]) -> String {
    let mut path = String::from(api::API_PREFIX);
    for segment in segments {
        path.push('/');
        path.push_str(segment);
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_paths() {
        let home_dir = Path::new("/home/user");
        let current_dir = Path::new("/current/project");

        assert_eq!(
            user_config_file_path(home_dir),
            Path::new("/home/user/.ctcopy/config.toml")
        );

        assert_eq!(
            local_config_file_path(current_dir),
            Path::new("/current/project/.ctcopy/config.toml")
        );
    }

    #[test]
    fn test_api_path() {
        assert_eq!(api_path(&[]), "/1.0");
        assert_eq!(api_path(&["profiles"]), "/1.0/profiles");
        assert_eq!(
            api_path(&["containers", "c1", "snapshots", "snap0"]),
            "/1.0/containers/c1/snapshots/snap0"
        );
    }
}
