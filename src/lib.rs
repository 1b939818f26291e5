//! # ctcopy
//!
//! Copies containers within a single container host or migrates them between
//! hosts, and exports container backups to local tarballs.
//!
//! ## Architecture Overview
//!
//! - **[`copy`]**: Copy orchestration, metadata reconciliation and the
//!   cross-host migration handshake
//! - **[`host`]**: Host API abstraction with an HTTPS implementation and an
//!   in-memory mock
//! - **[`backup`]**: Backup creation, download and cleanup
//! - **[`config`]**: Client configuration, remotes and `[remote:]name` parsing
//!
//! ## Features
//!
//! ### Copy
//! - **Local Copy**: The host duplicates the container itself when source
//!   and destination share a remote
//! - **Migration**: Single-use secrets from both hosts, in pull or push mode
//! - **Address Racing**: The destination tries each source address in turn
//!   until one is accepted
//!
//! ### Reconciliation
//! - **Overrides**: Extra profiles and config keys on top of the source's
//! - **Volatile Keys**: Host-managed `volatile.*` keys are dropped unless
//!   asked otherwise
//! - **Profile Check**: Migration refuses to start when the destination lacks
//!   a required profile
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ctcopy::{ClientConfig, ContainerCopier, EphemeralFlag, RestHost};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::default();
//!     let host = Arc::new(RestHost::new(config.clone())?);
//!
//!     let outcome = ContainerCopier::new(host, config)
//!         .copy_container("web1", Some("web2"), false, EphemeralFlag::Unspecified)
//!         .await?;
//!
//!     println!("Copied to {}", outcome.container_name);
//!     Ok(())
//! }
//! ```

/// Container backup export.
pub mod backup;

/// Client configuration and container references.
pub mod config;

/// Copy orchestration and cross-host migration.
///
/// Reconciles source metadata with overrides, then either asks the host for
/// a local copy or coordinates a migration between two hosts.
pub mod copy;

/// Host API abstraction.
pub mod host;

/// Environment constants and path utilities.
///
/// Centralizes hardcoded paths, API paths and configuration key names.
pub mod env;

// CLI module for command-line interface
pub mod cli;

// Re-export main copy types
pub use copy::{ContainerCopier, CopyError, CopyOutcome, CopyStrategy, EphemeralFlag, TransferMode};

// Re-export host implementations
pub use host::{HostApi, HostError, MockHost, RestHost};

// Re-export backup types
pub use backup::{BackupExporter, ExportError, ExportOptions};

pub use config::ClientConfig;
