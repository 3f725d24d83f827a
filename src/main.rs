//! trustprov - TEE Content Management Provisioning Agent
//!
//! Command line front end for running provisioning sessions and inspecting
//! the documents exchanged with the enrollment server.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trustprov::{
    codec::{
        build_system_info_document, build_trustlet_request_document, parse_commands, MemoryType,
        TrustletInstallationRequest, TrustletPayload,
    },
    config::ProvisionerConfig,
    device::{DeviceInfoProvider, StaticDeviceInfo},
    ProvisioningAgent, ProvisioningState, StateCallback,
};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "trustprov")]
#[command(version)]
#[command(about = "TEE content management provisioning agent")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "TRUSTPROV_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the device, optionally for a service provider
    Provision {
        /// Service provider id, 0 for the device only
        #[arg(long, default_value = "0")]
        spid: u32,
    },

    /// Install a trustlet for a service provider
    Install {
        /// Service provider id
        #[arg(long)]
        spid: u32,

        #[command(flatten)]
        trustlet: TrustletArgs,
    },

    /// Remove the device's root container registration
    Unregister,

    /// Decode a command document and print a summary
    Decode {
        /// File holding the command document
        file: PathBuf,
    },

    /// Print the system information document
    SystemInfo,

    /// Print a trustlet installation request document
    TrustletRequest {
        #[command(flatten)]
        trustlet: TrustletArgs,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[derive(Args)]
struct TrustletArgs {
    /// Trustlet UUID
    #[arg(long)]
    uuid: Uuid,

    /// File holding the trustlet binary, or its key with --key
    #[arg(long)]
    file: PathBuf,

    /// The file holds the trustlet encryption key
    #[arg(long)]
    key: bool,

    /// Minimum trustlet version
    #[arg(long, default_value = "0")]
    min_version: u32,

    /// Hash of the trustlet public key, as hex
    #[arg(long)]
    puk_hash: String,

    /// Memory to load the trustlet into: 0 internal preferred, 1 internal, 2 external
    #[arg(long, default_value = "2")]
    memory_type: u32,

    /// Number of trustlet instances
    #[arg(long, default_value = "1")]
    instances: u32,

    /// Trustlet flags
    #[arg(long, default_value = "0")]
    flags: u32,
}

impl TrustletArgs {
    fn to_request(&self) -> Result<TrustletInstallationRequest> {
        let data = std::fs::read(&self.file)
            .with_context(|| format!("Failed to read {}", self.file.display()))?;
        let memory_type = match self.memory_type {
            0 => MemoryType::InternalPreferred,
            1 => MemoryType::Internal,
            2 => MemoryType::External,
            other => anyhow::bail!("Unknown memory type {}", other),
        };
        let payload = if self.key {
            TrustletPayload::Key(data)
        } else {
            TrustletPayload::Binary {
                data,
                memory_type,
                num_instances: self.instances,
                flags: self.flags,
            }
        };
        Ok(TrustletInstallationRequest {
            uuid: self.uuid,
            payload,
            min_version: self.min_version,
            puk_hash: hex::decode(self.puk_hash.trim()).context("Invalid public key hash")?,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("trustprov={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Provision { spid } => {
            let agent = build_agent(config)?;
            run_session(|callback| async move { agent.provision(spid, callback).await }).await?;
        }
        Commands::Install { spid, trustlet } => {
            let request = trustlet.to_request()?;
            let agent = build_agent(config)?;
            run_session(|callback| async move {
                agent.install_trustlet(spid, request, callback).await
            })
            .await?;
        }
        Commands::Unregister => {
            let agent = build_agent(config)?;
            run_session(|callback| async move { agent.unregister_root_container(callback).await })
                .await?;
        }
        Commands::Decode { file } => {
            decode_document(&file)?;
        }
        Commands::SystemInfo => {
            show_system_info(config).await?;
        }
        Commands::TrustletRequest { trustlet } => {
            let document = build_trustlet_request_document(&trustlet.to_request()?)?;
            println!("{}", String::from_utf8_lossy(&document));
        }
        Commands::Config { default } => {
            show_config(if default { None } else { Some(&config) })?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ProvisionerConfig> {
    if let Some(path) = path {
        return Ok(ProvisionerConfig::from_file(path)?);
    }
    match ProvisionerConfig::default_path() {
        Some(path) if path.exists() => {
            tracing::debug!(path = %path.display(), "Using configuration file");
            Ok(ProvisionerConfig::from_file(&path)?)
        }
        _ => Ok(ProvisionerConfig::default()),
    }
}

fn build_agent(config: ProvisionerConfig) -> Result<ProvisioningAgent> {
    Ok(ProvisioningAgent::builder().config(config).build()?)
}

/// Start a session, log its progress and wait for it to end.
async fn run_session<F, Fut>(start: F) -> Result<()>
where
    F: FnOnce(StateCallback) -> Fut,
    Fut: std::future::Future<Output = trustprov::Result<tokio::task::JoinHandle<()>>>,
{
    let failed = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&failed);
    let callback: StateCallback = Arc::new(move |state| match state {
        ProvisioningState::Connecting => tracing::info!("Connecting to server"),
        ProvisioningState::InstallingTrustlet(binary) => {
            tracing::info!(bytes = binary.len(), "Received trustlet binary")
        }
        ProvisioningState::Finished => tracing::info!("Provisioning finished"),
        ProvisioningState::Error(kind) => {
            flag.store(true, Ordering::SeqCst);
            tracing::error!(code = kind.code(), "Provisioning error: {}", kind)
        }
        ProvisioningState::ThreadExiting => tracing::debug!("Session task exiting"),
    });

    let handle = start(callback).await?;
    handle.await.context("Provisioning session panicked")?;

    if failed.load(Ordering::SeqCst) {
        anyhow::bail!("Provisioning did not complete");
    }
    Ok(())
}

fn decode_document(path: &Path) -> Result<()> {
    let body = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let batch = parse_commands(&body)?;

    let commands: Vec<_> = batch
        .slots
        .iter()
        .map(|slot| match slot {
            Ok(command) => serde_json::json!({
                "id": command.id,
                "type": command.command_type.as_wire(),
                "ignoreError": command.ignore_error,
                "bytes": command.payload.len(),
            }),
            Err(rejected) => serde_json::json!({
                "id": rejected.id,
                "type": rejected.command_type.as_wire(),
                "ignoreError": rejected.ignore_error,
                "rejected": rejected.kind,
                "reason": rejected.reason,
            }),
        })
        .collect();

    let summary = serde_json::json!({
        "valid": batch.is_valid(),
        "violations": batch.violations,
        "commands": commands,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn show_system_info(config: ProvisionerConfig) -> Result<()> {
    let device = StaticDeviceInfo::from(&config.device);
    let agent = build_agent(config)?;

    let version = match agent.get_version().await {
        Ok(version) => version,
        Err(e) => {
            tracing::warn!("TEE version unavailable, reporting zeros: {}", e);
            Default::default()
        }
    };
    let os = device.os_info().await?;

    let document = build_system_info_document(&version, &os)?;
    println!("{}", String::from_utf8_lossy(&document));
    Ok(())
}

fn show_config(config: Option<&ProvisionerConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}
