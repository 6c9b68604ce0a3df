//! ---
//! ota_section: "05-networking-external-interfaces"
//! ota_subsection: "binary"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Control CLI for operators driving an update module by hand."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{ArgAction, Parser, Subcommand};
use r_ota_common::{init_tracing, AgentConfig};
use tracing::debug;

mod device;
mod lifecycle;

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "R-OTA update module control utility",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        value_name = "ID",
        help = "Module to operate on (defaults to the first configured module)"
    )]
    module: Option<String>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print version information and exit"
    )]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(flatten)]
    Lifecycle(lifecycle::LifecycleCommand),
    #[command(about = "Act as the OTA master on the configured queues")]
    SimulateDevice(device::SimulateDeviceCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("r-otactl {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    let Some(command) = cli.command else {
        return Err(anyhow!("no command given; see --help"));
    };

    let config = load_config(cli.config.as_ref())?;
    init_tracing("r-otactl", &config.logging)?;
    let (module_id, module_config) = match cli.module.as_deref() {
        Some(id) => config
            .modules
            .get_key_value(id)
            .ok_or_else(|| anyhow!("module '{id}' is not configured"))?,
        None => config
            .modules
            .first()
            .ok_or_else(|| anyhow!("no modules configured"))?,
    };
    debug!(module = %module_id, "selected update module");

    match command {
        Commands::Lifecycle(cmd) => lifecycle::run(cmd, &config, module_id, module_config),
        Commands::SimulateDevice(cmd) => device::run(cmd, module_config),
    }
}

fn load_config(explicit: Option<&PathBuf>) -> Result<AgentConfig> {
    let mut candidates = Vec::new();
    if let Some(path) = explicit {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("/etc/r-ota/agent.toml"));
    candidates.push(PathBuf::from("configs/agent.toml"));
    AgentConfig::load(&candidates)
}
