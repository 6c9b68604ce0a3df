//! ---
//! ota_section: "05-networking-external-interfaces"
//! ota_subsection: "binary"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Bench stand-in for the device-side OTA master."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use anyhow::Result;
use clap::Args;
use r_ota_common::ModuleConfig;

/// Options for the simulated OTA master.
#[derive(Debug, Args)]
pub struct SimulateDeviceCommand {
    /// Opcode to answer with a failure status (repeatable).
    #[arg(long = "fail", value_name = "OPCODE")]
    fail: Vec<i64>,

    /// Stop after answering this many commands.
    #[arg(long, value_name = "N")]
    count: Option<usize>,

    /// Leave the queues in place on exit.
    #[arg(long = "keep-queues", action = clap::ArgAction::SetTrue)]
    keep_queues: bool,
}

#[cfg(target_os = "linux")]
pub fn run(command: SimulateDeviceCommand, module_config: &ModuleConfig) -> Result<()> {
    use std::time::Duration;

    use anyhow::Context;
    use r_ota_channel::{Command, DeviceEndpoint, Status};
    use tracing::{info, warn};

    const POLL: Duration = Duration::from_secs(1);

    let mut endpoint = DeviceEndpoint::create(
        &module_config.send_queue_name,
        &module_config.receive_queue_name,
    )
    .context("unable to create device queues")?;
    info!(
        command_queue = %module_config.send_queue_name,
        status_queue = %module_config.receive_queue_name,
        "simulated OTA master listening"
    );

    let mut answered = 0usize;
    while command.count.map_or(true, |limit| answered < limit) {
        let Some(opcode) = endpoint.next_opcode(POLL)? else {
            continue;
        };
        let status = if command.fail.contains(&opcode) {
            Status::Failed
        } else {
            Status::Success
        };
        match Command::from_code(opcode) {
            Some(cmd) => info!(command = %cmd, %status, "answering command"),
            None => warn!(opcode, %status, "answering unknown opcode"),
        }
        endpoint.reply(status, module_config.timeout)?;
        answered += 1;
    }

    if !command.keep_queues {
        endpoint.remove()?;
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn run(_command: SimulateDeviceCommand, _module_config: &ModuleConfig) -> Result<()> {
    anyhow::bail!("the simulated device needs POSIX message queues, which this platform lacks")
}
