//! ---
//! ota_section: "01-core-functionality"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Errors surfaced by update module operations."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use std::io;
use std::path::PathBuf;

use r_ota_channel::{ChannelError, Command, Status};
use r_ota_common::ConfigError;
use r_ota_persistence::PersistenceError;

use crate::state::{Operation, TransitionError};

/// Result alias for update module operations.
pub type Result<T> = std::result::Result<T, ModuleError>;

/// Everything a lifecycle operation can fail with. Nothing is retried internally.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// The module configuration is incomplete.
    #[error("invalid module configuration: {0}")]
    Config(#[from] ConfigError),
    /// The update image could not be staged; no command was sent.
    #[error("failed to stage {} into {}: {source}", .image.display(), .target.display())]
    Io {
        image: PathBuf,
        target: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Opening, sending, or receiving on the command channel failed.
    #[error("{operation} aborted on the command channel: {source}")]
    Channel {
        operation: Operation,
        #[source]
        source: ChannelError,
    },
    /// The device answered a command with a non-success status.
    #[error("{operation} rejected by the device: {command} returned {status}")]
    Protocol {
        operation: Operation,
        command: Command,
        status: Status,
    },
    /// The durable snapshot could not be read or written.
    #[error("failed to {action} module state: {source}")]
    Persistence {
        action: &'static str,
        #[source]
        source: PersistenceError,
    },
    /// The operation is not legal in the current phase.
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
    /// The module does not implement this operation.
    #[error("{0} is not supported by this module")]
    Unsupported(&'static str),
}

impl ModuleError {
    /// Classify a channel failure: device rejections become protocol errors.
    pub fn from_channel(operation: Operation, err: ChannelError) -> Self {
        match err {
            ChannelError::Rejected { command, status } => ModuleError::Protocol {
                operation,
                command,
                status,
            },
            source => ModuleError::Channel { operation, source },
        }
    }

    /// Short label used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ModuleError::Config(_) => "config",
            ModuleError::Io { .. } => "io",
            ModuleError::Channel { .. } => "channel",
            ModuleError::Protocol { .. } => "protocol",
            ModuleError::Persistence { .. } => "persistence",
            ModuleError::InvalidTransition(_) => "invalid_transition",
            ModuleError::Unsupported(_) => "unsupported",
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn rejections_become_protocol_errors() {
        let err = ModuleError::from_channel(
            Operation::Update,
            ChannelError::Rejected {
                command: Command::Activate,
                status: Status::Failed,
            },
        );
        assert_eq!(err.kind(), "protocol");
        assert_eq!(
            err.to_string(),
            "update rejected by the device: activate returned failed"
        );
    }

    #[test]
    fn timeouts_stay_channel_errors() {
        let err = ModuleError::from_channel(
            Operation::Prepare,
            ChannelError::ReceiveTimeout {
                command: Command::Download,
                timeout: Duration::from_secs(1),
            },
        );
        assert_eq!(err.kind(), "channel");
        assert!(err.to_string().starts_with("prepare aborted on the command channel"));
    }
}
