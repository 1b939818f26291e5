use anyhow::Context;
use ctcopy::cli::{Args, ConfigDiscovery, CopyConfig, ExecutionMode, ExportConfig};
use ctcopy::{BackupExporter, ClientConfig, ContainerCopier, ExportOptions, RestHost};
use std::io::{self, Write};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let default_filter = if args.verbose {
        "ctcopy=debug"
    } else {
        "ctcopy=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(io::stderr)
        .init();

    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&args, mode).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: &Args, mode: ExecutionMode) -> anyhow::Result<()> {
    match mode {
        ExecutionMode::ShowConfig => {
            ConfigDiscovery::show_discovery_info();
            return Ok(());
        }
        ExecutionMode::InitConfig => {
            let path = ConfigDiscovery::create_default_user_config()
                .context("Failed to create the user configuration")?;
            println!("Configuration file: {}", path.display());
            return Ok(());
        }
        _ => {}
    }

    let config = ConfigDiscovery::load(args.client_config.as_ref())
        .context("Failed to load client configuration")?;

    match mode {
        ExecutionMode::Copy(copy) => run_copy(config, copy).await,
        ExecutionMode::Export(export) => run_export(config, export).await,
        ExecutionMode::ListRemotes => {
            list_remotes(&config);
            Ok(())
        }
        ExecutionMode::ShowConfig | ExecutionMode::InitConfig => Ok(()),
    }
}

async fn run_copy(config: ClientConfig, copy: CopyConfig) -> anyhow::Result<()> {
    info!("Copying {}", copy.source);

    let host = Arc::new(RestHost::new(config.clone()).context("Failed to set up host client")?);
    let mut copier = ContainerCopier::new(host, config).with_overrides(copy.overrides);
    if let Some(mode) = copy.transfer_mode {
        copier = copier.with_transfer_mode(mode);
    }

    let outcome = copier
        .copy_container(
            &copy.source,
            copy.destination.as_deref(),
            copy.keep_volatile,
            copy.ephemeral,
        )
        .await
        .with_context(|| format!("Failed to copy {}", copy.source))?;

    if outcome.name_assigned_by_host {
        println!("Container name is: {}", outcome.container_name);
    }
    info!(
        "Copy of {} finished as {}",
        copy.source, outcome.container_name
    );
    Ok(())
}

async fn run_export(config: ClientConfig, export: ExportConfig) -> anyhow::Result<()> {
    let host = Arc::new(RestHost::new(config.clone()).context("Failed to set up host client")?);
    let options = ExportOptions {
        container_only: export.container_only,
        optimized_storage: export.optimized_storage,
    };

    let mut stderr = io::stderr();
    let mut progress = |bytes: u64| {
        let _ = write!(stderr, "\rExporting the backup: {} bytes", bytes);
        let _ = stderr.flush();
    };

    let report = BackupExporter::new(host, config)
        .export(&export.source, export.target.as_deref(), options, &mut progress)
        .await
        .with_context(|| format!("Failed to export {}", export.source))?;

    eprintln!();
    println!(
        "Backup exported successfully to {} ({} bytes)",
        report.target.display(),
        report.bytes_written
    );
    Ok(())
}

fn list_remotes(config: &ClientConfig) {
    println!("Configured remotes:");
    for (name, endpoint) in &config.remotes {
        let marker = if *name == config.default_remote {
            " (default)"
        } else {
            ""
        };
        println!("  {}{} - {}", name, marker, endpoint.addr);
    }
}
