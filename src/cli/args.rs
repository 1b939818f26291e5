//! Command line argument parsing
//!
//! Subcommands:
//! - `copy`: Copy a container within or between hosts
//! - `export`: Export a container backup to a local tarball
//! - `remotes`: List configured remotes
//! - `show-config`: Show configuration discovery information
//! - `init`: Write a default user configuration

use crate::copy::{EphemeralFlag, Overrides, TransferMode};
use crate::host::ConfigMap;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug)]
pub enum ExecutionMode {
    Copy(CopyConfig),
    Export(ExportConfig),
    ListRemotes,
    ShowConfig,
    InitConfig,
}

#[derive(Debug)]
pub struct CopyConfig {
    pub source: String,
    pub destination: Option<String>,
    pub overrides: Overrides,
    pub ephemeral: EphemeralFlag,
    /// `Some(Push)` when `--push` was given, otherwise the configured mode applies
    pub transfer_mode: Option<TransferMode>,
    pub keep_volatile: bool,
}

#[derive(Debug)]
pub struct ExportConfig {
    pub source: String,
    pub target: Option<PathBuf>,
    pub container_only: bool,
    pub optimized_storage: bool,
}

#[derive(Debug, Parser)]
#[command(name = "ctcopy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Copy containers within or in between container hosts")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Client configuration file (skips discovery)
    #[arg(long = "client-config", global = true, value_name = "FILE")]
    pub client_config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Copy a container: `copy [remote:]<source> [[remote:]<destination>]`
    Copy {
        /// Source container or snapshot (`[remote:]name[/snapshot]`)
        source: String,
        /// Destination container (`[remote:][name]`)
        destination: Option<String>,
        /// Config key/value to apply to the new container
        #[arg(short = 'c', long = "config", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        config: Vec<(String, String)>,
        /// Profile to apply to the new container
        #[arg(short = 'p', long = "profile", value_name = "PROFILE")]
        profiles: Vec<String>,
        /// Make the new container ephemeral
        #[arg(short = 'e', long = "ephemeral", conflicts_with = "no_ephemeral")]
        ephemeral: bool,
        /// Make the new container persistent
        #[arg(long = "no-ephemeral")]
        no_ephemeral: bool,
        /// Use push mode (the source connects to the destination)
        #[arg(long = "push")]
        push: bool,
        /// Keep volatile configuration keys
        #[arg(long = "keep-volatile")]
        keep_volatile: bool,
    },
    /// Export a container backup: `export [remote:]<container> [target]`
    Export {
        /// Container to back up
        source: String,
        /// Target file (defaults to backup.tar.xz)
        target: Option<PathBuf>,
        /// Only back up the container, without snapshots
        #[arg(long = "container-only")]
        container_only: bool,
        /// Use the storage driver's optimized format (only btrfs and zfs)
        #[arg(long = "optimized-storage")]
        optimized_storage: bool,
    },
    /// List configured remotes
    Remotes,
    /// Show configuration discovery information
    ShowConfig,
    /// Write a default configuration to ~/.ctcopy/config.toml
    Init,
}

/// Parse a `key=value` pair; the value may itself contain `=`.
fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Bad key=value pair: {}", raw)),
    }
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Copy {
                source,
                destination,
                config,
                profiles,
                ephemeral,
                no_ephemeral,
                push,
                keep_volatile,
            }) => {
                let ephemeral = match (*ephemeral, *no_ephemeral) {
                    (true, _) => EphemeralFlag::Enabled,
                    (false, true) => EphemeralFlag::Disabled,
                    (false, false) => EphemeralFlag::Unspecified,
                };

                Ok(ExecutionMode::Copy(CopyConfig {
                    source: source.clone(),
                    destination: destination.clone(),
                    overrides: Overrides {
                        profiles: profiles.clone(),
                        config: config.iter().cloned().collect::<ConfigMap>(),
                    },
                    ephemeral,
                    transfer_mode: push.then_some(TransferMode::Push),
                    keep_volatile: *keep_volatile,
                }))
            }
            Some(Commands::Export {
                source,
                target,
                container_only,
                optimized_storage,
            }) => Ok(ExecutionMode::Export(ExportConfig {
                source: source.clone(),
                target: target.clone(),
                container_only: *container_only,
                optimized_storage: *optimized_storage,
            })),
            Some(Commands::Remotes) => Ok(ExecutionMode::ListRemotes),
            Some(Commands::ShowConfig) => Ok(ExecutionMode::ShowConfig),
            Some(Commands::Init) => Ok(ExecutionMode::InitConfig),
            None => Err(
                "No command specified. Use 'ctcopy --help' to see available commands.".to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn copy_mode(argv: &[&str]) -> CopyConfig {
        let args = Args::try_parse_from(argv).unwrap();
        match args.mode().unwrap() {
            ExecutionMode::Copy(config) => config,
            other => panic!("Expected Copy mode, got {:?}", other),
        }
    }

    #[test]
    fn test_copy_command_defaults() {
        let config = copy_mode(&["ctcopy", "copy", "hosta:web1"]);

        assert_eq!(config.source, "hosta:web1");
        assert_eq!(config.destination, None);
        assert_eq!(config.ephemeral, EphemeralFlag::Unspecified);
        assert_eq!(config.transfer_mode, None);
        assert!(!config.keep_volatile);
        assert!(config.overrides.profiles.is_empty());
    }

    #[test]
    fn test_copy_command_with_overrides() {
        let config = copy_mode(&[
            "ctcopy",
            "copy",
            "hosta:web1",
            "hostb:web1copy",
            "-c",
            "limits.cpu=2",
            "--config",
            "user.note=a=b",
            "-p",
            "web",
            "--profile",
            "gpu",
            "--ephemeral",
            "--push",
        ]);

        assert_eq!(config.destination.as_deref(), Some("hostb:web1copy"));
        assert_eq!(config.overrides.profiles, ["web", "gpu"]);
        assert_eq!(config.overrides.config["limits.cpu"], "2");
        assert_eq!(config.overrides.config["user.note"], "a=b");
        assert_eq!(config.ephemeral, EphemeralFlag::Enabled);
        assert_eq!(config.transfer_mode, Some(TransferMode::Push));
    }

    #[test]
    fn test_copy_no_ephemeral() {
        let config = copy_mode(&["ctcopy", "copy", "web1", "web2", "--no-ephemeral"]);
        assert_eq!(config.ephemeral, EphemeralFlag::Disabled);

        assert!(Args::try_parse_from(["ctcopy", "copy", "web1", "-e", "--no-ephemeral"]).is_err());
    }

    #[test]
    fn test_bad_key_value_rejected() {
        assert!(Args::try_parse_from(["ctcopy", "copy", "web1", "-c", "novalue"]).is_err());
        assert!(Args::try_parse_from(["ctcopy", "copy", "web1", "-c", "=x"]).is_err());
    }

    #[test]
    fn test_export_command() {
        let args = Args::try_parse_from([
            "ctcopy",
            "export",
            "hosta:web1",
            "web1.tar.xz",
            "--container-only",
        ])
        .unwrap();

        match args.mode().unwrap() {
            ExecutionMode::Export(config) => {
                assert_eq!(config.source, "hosta:web1");
                assert_eq!(config.target, Some(PathBuf::from("web1.tar.xz")));
                assert!(config.container_only);
                assert!(!config.optimized_storage);
            }
            other => panic!("Expected Export mode, got {:?}", other),
        }
    }

    #[test]
    fn test_global_options() {
        let args = Args::try_parse_from([
            "ctcopy",
            "remotes",
            "--client-config",
            "/tmp/ctcopy.toml",
            "-v",
        ])
        .unwrap();
        assert!(args.verbose);
        assert_eq!(args.client_config, Some(PathBuf::from("/tmp/ctcopy.toml")));
        assert!(matches!(args.mode().unwrap(), ExecutionMode::ListRemotes));
    }

    #[test]
    fn test_init_command() {
        let args = Args::try_parse_from(["ctcopy", "init"]).unwrap();
        assert!(matches!(args.mode().unwrap(), ExecutionMode::InitConfig));
    }

    #[test]
    fn test_no_command_error() {
        let args = Args {
            client_config: None,
            verbose: false,
            command: None,
        };
        assert!(args.mode().is_err());
    }
}
