//! Configuration discovery and loading
//!
//! This module handles the configuration discovery hierarchy:
//! 1. Current directory: ./ctcopy.toml or ./.ctcopy/config.toml
//! 2. User config: ~/.ctcopy/config.toml
//! 3. System config: /etc/ctcopy/config.toml
//! 4. Built-in defaults

use crate::config::{ClientConfig, ConfigError};
use crate::env;
use std::env as std_env;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Load the explicit file if given, otherwise walk the hierarchy
    pub fn load(explicit: Option<&PathBuf>) -> Result<ClientConfig, ConfigError> {
        match explicit {
            Some(path) => {
                info!("Loading configuration from: {:?}", path);
                ClientConfig::from_toml_file(path)
            }
            None => Self::discover_config(),
        }
    }

    /// Discover and load configuration using the hierarchy
    pub fn discover_config() -> Result<ClientConfig, ConfigError> {
        if let Some(config_path) = Self::find_config_file() {
            info!("Loading configuration from: {:?}", config_path);
            return ClientConfig::from_toml_file(config_path);
        }

        info!("No configuration file found, using defaults");
        Ok(ClientConfig::default())
    }

    /// Find configuration file using discovery hierarchy
    pub fn find_config_file() -> Option<PathBuf> {
        for candidate in Self::get_config_candidates() {
            debug!("Checking for config file: {:?}", candidate);
            if candidate.is_file() {
                debug!("Found config file: {:?}", candidate);
                return Some(candidate);
            }
        }

        debug!("No config file found in discovery hierarchy");
        None
    }

    /// Get list of configuration file candidates in priority order
    fn get_config_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = std_env::current_dir() {
            candidates.push(current_dir.join(env::LOCAL_CONFIG_FILE_NAME));
            candidates.push(env::local_config_file_path(&current_dir));
        }

        if let Some(home_dir) = Self::get_home_dir() {
            candidates.push(env::user_config_file_path(&home_dir));
        }

        #[cfg(unix)]
        candidates.push(PathBuf::from(env::SYSTEM_CONFIG_PATH));

        #[cfg(windows)]
        if let Ok(program_data) = std_env::var("PROGRAMDATA") {
            candidates.push(
                PathBuf::from(program_data)
                    .join("ctcopy")
                    .join(env::CONFIG_FILE_NAME),
            );
        }

        candidates
    }

    fn get_home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .map(PathBuf::from)
    }

    /// Create a default config file in the user's home directory
    pub fn create_default_user_config() -> Result<PathBuf, ConfigError> {
        let home_dir = Self::get_home_dir().ok_or_else(|| {
            ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine home directory",
            ))
        })?;

        let config_dir = env::user_config_dir_path(&home_dir);
        let config_path = env::user_config_file_path(&home_dir);

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)?;
            info!("Created configuration directory: {:?}", config_dir);
        }

        if !config_path.exists() {
            ClientConfig::default().to_toml_file(&config_path)?;
            info!("Created default configuration file: {:?}", config_path);
        } else {
            warn!("Configuration file already exists: {:?}", config_path);
        }

        Ok(config_path)
    }

    /// Show configuration discovery information for debugging
    pub fn show_discovery_info() {
        println!("Configuration Discovery Hierarchy:");
        println!();

        for (i, candidate) in Self::get_config_candidates().iter().enumerate() {
            let status = if candidate.exists() {
                if candidate.is_file() {
                    "✓ EXISTS"
                } else {
                    "✗ NOT A FILE"
                }
            } else {
                "✗ NOT FOUND"
            };

            println!("  {}. {:?} - {}", i + 1, candidate, status);
        }

        println!();
        if let Some(found) = Self::find_config_file() {
            println!("Active configuration: {:?}", found);
        } else {
            println!("Active configuration: Built-in defaults");
        }
    }
}
