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
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use prometheus::{Encoder, Registry, TextEncoder};
use r_ota_channel::ChannelMetrics;
use r_ota_common::{AgentConfig, ModuleConfig};
use r_ota_core::{StatePersistence, UpdateModule};
use r_ota_logging::{log_system_event, LogContext, SystemEventOutcome};
use r_ota_persistence::{FileStorage, ModuleStorage, PersistenceMetrics};
use serde_json::{json, Value};

/// Lifecycle operations forwarded to the update module.
#[derive(Debug, Subcommand)]
pub enum LifecycleCommand {
    /// Stage an image and have the device download it.
    Prepare(PrepareArgs),
    /// Install and activate the prepared image.
    Update,
    /// Roll back a prepared or activated image.
    Revert,
    /// Finish the update cycle.
    Apply,
    /// Ask the module to reboot the component.
    Reboot,
    /// Print the stored module state as JSON.
    Status,
    /// Print the active vendor version.
    Version,
}

#[derive(Debug, Args)]
pub struct PrepareArgs {
    /// Gzip-compressed update image.
    #[arg(long, value_name = "FILE")]
    image: PathBuf,

    /// Vendor version carried by the image.
    #[arg(long = "vendor-version", value_name = "VERSION")]
    vendor_version: String,

    /// Optional JSON annotations passed through to the module.
    #[arg(long, value_name = "JSON")]
    annotations: Option<String>,
}

impl LifecycleCommand {
    fn name(&self) -> &'static str {
        match self {
            LifecycleCommand::Prepare(_) => "prepare",
            LifecycleCommand::Update => "update",
            LifecycleCommand::Revert => "revert",
            LifecycleCommand::Apply => "apply",
            LifecycleCommand::Reboot => "reboot",
            LifecycleCommand::Status => "status",
            LifecycleCommand::Version => "version",
        }
    }
}

/// Execute one lifecycle command against the selected module.
pub fn run(
    command: LifecycleCommand,
    config: &AgentConfig,
    module_id: &str,
    module_config: &ModuleConfig,
) -> Result<()> {
    let registry = Registry::new();
    let storage: Arc<dyn ModuleStorage> = Arc::new(FileStorage::new(&config.storage.directory));
    let persistence = StatePersistence::new(module_id, storage)
        .with_metrics(Arc::new(PersistenceMetrics::new(&registry)?));
    let mut module = build_module(module_id, module_config, persistence)?
        .with_channel_metrics(Arc::new(ChannelMetrics::new(&registry)?));

    module.init()?;
    let name = command.name();
    let outcome = match command {
        LifecycleCommand::Prepare(args) => {
            let annotations = args
                .annotations
                .as_deref()
                .map(serde_json::from_str::<Value>)
                .transpose()
                .context("annotations must be valid JSON")?;
            module
                .prepare(&args.image, &args.vendor_version, annotations.as_ref())
                .map(|()| None)
        }
        LifecycleCommand::Update => module.update().map(Some),
        LifecycleCommand::Revert => module.revert().map(Some),
        LifecycleCommand::Apply => module.apply().map(Some),
        LifecycleCommand::Reboot => module.reboot().map(|()| None),
        LifecycleCommand::Status => {
            println!("{}", serde_json::to_string_pretty(module.state())?);
            Ok(None)
        }
        LifecycleCommand::Version => {
            println!("{}", module.vendor_version());
            Ok(None)
        }
    };

    let context = LogContext::new()
        .with_module(module_id)
        .with_operation(name);
    match &outcome {
        Ok(_) => log_system_event(
            Some(&context),
            "cli.command",
            "command completed",
            SystemEventOutcome::Success,
        ),
        Err(err) => log_system_event(
            Some(&context),
            "cli.command",
            &err.to_string(),
            SystemEventOutcome::Fault,
        ),
    }

    if config.metrics.dump {
        dump_metrics(&registry)?;
    }
    module.close()?;

    if let Some(reboot_required) = outcome.with_context(|| format!("{name} failed"))? {
        let state = module.state();
        println!(
            "{}",
            json!({
                "phase": state.phase,
                "vendorVersion": state.vendor_version,
                "pendingVersion": state.pending_version,
                "rebootRequired": reboot_required,
            })
        );
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn build_module(
    module_id: &str,
    module_config: &ModuleConfig,
    persistence: StatePersistence,
) -> Result<r_ota_core::OtaUpdateModule<r_ota_channel::MqueueTransport>> {
    r_ota_core::OtaUpdateModule::from_config(module_config.clone(), persistence)
        .with_context(|| format!("unable to construct module '{module_id}'"))
}

#[cfg(not(target_os = "linux"))]
fn build_module(
    module_id: &str,
    _module_config: &ModuleConfig,
    _persistence: StatePersistence,
) -> Result<r_ota_core::OtaUpdateModule<r_ota_channel::MemoryTransport>> {
    anyhow::bail!("module '{module_id}' needs POSIX message queues, which this platform lacks")
}

fn dump_metrics(registry: &Registry) -> Result<()> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    eprintln!("{}", String::from_utf8_lossy(&buffer));
    Ok(())
}
