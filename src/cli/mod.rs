//! CLI-specific functionality for ctcopy
//!
//! This module contains all CLI-related code including argument parsing
//! and configuration discovery.

pub mod args;
pub mod config;

pub use args::{Args, CopyConfig, ExecutionMode, ExportConfig};
pub use config::ConfigDiscovery;
