//! ---
//! ota_section: "02-command-channel"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Synchronous command/status channel to the OTA master."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Command channel between the update agent and the device-side OTA master.
//!
//! A [`CommandChannel`] opens a fresh session on its [`CommandTransport`] for every
//! sequence, sends the commands strictly in order and waits for an acknowledgement
//! after each one. The first failure aborts the sequence; the session is dropped, and
//! with it both queues, on every exit path.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

pub mod command;
pub mod memory;
pub mod metrics;
#[cfg(target_os = "linux")]
pub mod mqueue;
pub mod transport;

pub use command::{Command, Status, FRAME_LEN};
pub use memory::{MemoryTransport, Reply};
pub use metrics::ChannelMetrics;
#[cfg(target_os = "linux")]
pub use mqueue::{DeviceEndpoint, MqueueTransport};
pub use transport::{CommandSession, CommandTransport};

/// Result alias used throughout the channel crate.
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Direction of a queue relative to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    /// Commands flowing to the device.
    Outbound,
    /// Statuses flowing back from the device.
    Inbound,
}

/// Error type for the command channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// A queue could not be opened.
    #[error("unable to open {direction} queue {queue}: {source}")]
    Open {
        /// Queue name as configured.
        queue: String,
        /// Which side of the channel failed.
        direction: Direction,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The outbound queue stayed full until the deadline.
    #[error("timed out after {timeout:?} sending {command}")]
    SendTimeout {
        /// Command that could not be delivered.
        command: Command,
        /// Configured bound.
        timeout: Duration,
    },
    /// Sending failed for a reason other than the deadline.
    #[error("failed sending {command}: {source}")]
    Send {
        /// Command that could not be delivered.
        command: Command,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// No status arrived before the deadline.
    #[error("timed out after {timeout:?} awaiting status for {command}")]
    ReceiveTimeout {
        /// Command whose status never arrived.
        command: Command,
        /// Configured bound.
        timeout: Duration,
    },
    /// Receiving failed for a reason other than the deadline.
    #[error("failed receiving status for {command}: {source}")]
    Receive {
        /// Command whose status could not be read.
        command: Command,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The status reply was not a single frame.
    #[error("malformed status for {command}: expected 8 bytes, got {len}")]
    Malformed {
        /// Command the reply belonged to.
        command: Command,
        /// Length actually received.
        len: usize,
    },
    /// The device answered with a non-success status.
    #[error("device rejected {command} with status {status}")]
    Rejected {
        /// Command the device refused.
        command: Command,
        /// Status it replied with.
        status: Status,
    },
}

impl ChannelError {
    /// Command the failure relates to, if the channel got that far.
    #[must_use]
    pub fn command(&self) -> Option<Command> {
        match self {
            ChannelError::Open { .. } => None,
            ChannelError::SendTimeout { command, .. }
            | ChannelError::Send { command, .. }
            | ChannelError::ReceiveTimeout { command, .. }
            | ChannelError::Receive { command, .. }
            | ChannelError::Malformed { command, .. }
            | ChannelError::Rejected { command, .. } => Some(*command),
        }
    }

    /// Whether the deadline expired.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ChannelError::SendTimeout { .. } | ChannelError::ReceiveTimeout { .. }
        )
    }

    /// Whether the device itself refused the command.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, ChannelError::Rejected { .. })
    }

    /// Short label used for metrics and structured logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelError::Open { .. } => "open",
            ChannelError::SendTimeout { .. } => "send_timeout",
            ChannelError::Send { .. } => "send",
            ChannelError::ReceiveTimeout { .. } => "receive_timeout",
            ChannelError::Receive { .. } => "receive",
            ChannelError::Malformed { .. } => "malformed",
            ChannelError::Rejected { .. } => "rejected",
        }
    }
}

/// Sends ordered command sequences over a transport and checks each status.
#[derive(Debug)]
pub struct CommandChannel<T> {
    transport: T,
    metrics: Option<Arc<ChannelMetrics>>,
}

impl<T: CommandTransport> CommandChannel<T> {
    /// Wrap a transport.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            metrics: None,
        }
    }

    /// Attach metrics collection.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<ChannelMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Access the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send `commands` in order, waiting for a success status after each one.
    ///
    /// The first failure is returned immediately and the remaining commands are never
    /// sent. The session is closed before returning in every case.
    pub fn send_commands(&self, commands: &[Command]) -> Result<()> {
        let mut session = self.transport.open()?;
        for &command in commands {
            let started = Instant::now();
            let outcome = session.send_and_await(command).and_then(|status| {
                if status.is_success() {
                    Ok(())
                } else {
                    Err(ChannelError::Rejected { command, status })
                }
            });
            let elapsed = started.elapsed();
            match outcome {
                Ok(()) => {
                    debug!(%command, elapsed_ms = elapsed.as_millis() as u64, "command acknowledged");
                    if let Some(metrics) = &self.metrics {
                        metrics.record_acknowledged(command, elapsed);
                    }
                }
                Err(err) => {
                    warn!(%command, kind = err.kind(), error = %err, "command sequence aborted");
                    if let Some(metrics) = &self.metrics {
                        metrics.record_failure(command, err.kind());
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}
