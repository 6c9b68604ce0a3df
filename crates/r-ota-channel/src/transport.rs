//! ---
//! ota_section: "02-command-channel"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Transport capability used by the command channel."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use crate::command::{Command, Status};
use crate::Result;

/// Something that can open a request/response session with the OTA master.
///
/// Implementations must not hold any resources between sessions: every call to
/// [`CommandTransport::open`] acquires both directions and the returned session
/// releases them when dropped.
pub trait CommandTransport {
    /// Session type produced by [`CommandTransport::open`].
    type Session: CommandSession;

    /// Open both directions of the channel.
    fn open(&self) -> Result<Self::Session>;
}

/// An open channel. Dropping it closes both directions.
pub trait CommandSession {
    /// Deliver one command and wait, bounded by the transport timeout, for its status.
    fn send_and_await(&mut self, command: Command) -> Result<Status>;
}
