//! Uplink agent
//!
//! Loads the agent configuration, bootstraps the builtin modules and keeps
//! them running until SIGINT/SIGTERM.
//!
//! Usage:
//!   uplink-agent --config agent.toml [--log-filter debug] [--backend-service host:port,...]

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use uplink_agent::config::AgentConfig;
use uplink_agent::module::{builtin_registry, Collaborators, ModuleManager};
use uplink_agent::utils::{init_logging_from_config, wait_for_shutdown_signal};

#[derive(Parser, Debug)]
#[command(name = "uplink-agent", version, about = "Telemetry uplink agent")]
struct Args {
    /// Configuration file (.toml or .json); defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "info" or "uplink_agent::remote=debug" (RUST_LOG wins)
    #[arg(long)]
    log_filter: Option<String>,

    /// Override collector.backend_service
    #[arg(long)]
    backend_service: Option<String>,
}

fn load_config(args: &Args) -> anyhow::Result<AgentConfig> {
    let mut config = match &args.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::default(),
    };
    if let Some(filter) = &args.log_filter {
        config.logging.get_or_insert_with(Default::default).filter = Some(filter.clone());
    }
    if let Some(backend) = &args.backend_service {
        config.collector.backend_service = backend.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {:#}", e);
            return ExitCode::from(2);
        }
    };
    init_logging_from_config(config.logging.as_ref());

    info!(
        "Starting uplink agent {} for service {}",
        env!("CARGO_PKG_VERSION"),
        config.agent.service_name
    );

    let registry = builtin_registry(&config, Collaborators::standard(&config));
    let mut modules = ModuleManager::new();

    if let Err(e) = modules.init(&registry, &config.modules).await {
        error!("Agent bootstrap failed: {}", e);
        modules.shutdown().await;
        return ExitCode::FAILURE;
    }

    wait_for_shutdown_signal().await;

    modules.shutdown().await;
    info!("Uplink agent stopped");
    ExitCode::SUCCESS
}
