//! ---
//! ota_section: "02-command-channel"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Opcode and status codec for the OTA master wire protocol."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use std::fmt;

use strum::{Display, EnumIter};

/// Every message on either queue is exactly this many bytes.
pub const FRAME_LEN: usize = 8;

/// Encode a protocol integer as a little-endian frame.
#[must_use]
pub fn encode_frame(value: i64) -> [u8; FRAME_LEN] {
    value.to_le_bytes()
}

/// Decode a frame, returning `None` when the payload is not exactly [`FRAME_LEN`] bytes.
#[must_use]
pub fn decode_frame(bytes: &[u8]) -> Option<i64> {
    let frame: [u8; FRAME_LEN] = bytes.try_into().ok()?;
    Some(i64::from_le_bytes(frame))
}

/// Commands understood by the device-side OTA master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Command {
    /// Synchronise the update composition with the staged image.
    SyncCompose,
    /// Download the staged image into the inactive bank.
    Download,
    /// Install the downloaded image.
    Install,
    /// Activate the installed image.
    Activate,
    /// Roll back to the previously active image.
    Revert,
}

impl Command {
    /// Wire opcode for the command.
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Command::SyncCompose => 0,
            Command::Download => 1,
            Command::Install => 2,
            Command::Activate => 3,
            Command::Revert => 4,
        }
    }

    /// Resolve a wire opcode.
    #[must_use]
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Command::SyncCompose),
            1 => Some(Command::Download),
            2 => Some(Command::Install),
            3 => Some(Command::Activate),
            4 => Some(Command::Revert),
            _ => None,
        }
    }

    /// Encode the command as a wire frame.
    #[must_use]
    pub fn encode(self) -> [u8; FRAME_LEN] {
        encode_frame(self.code())
    }

    /// Decode a command frame received by the device side.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        decode_frame(bytes).and_then(Self::from_code)
    }
}

/// Status replied by the device for each command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The command completed.
    Success,
    /// The command failed on the device.
    Failed,
    /// Any other code; treated exactly like [`Status::Failed`].
    Unknown(i64),
}

impl Status {
    /// Wire code for the status.
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Status::Success => 0,
            Status::Failed => 1,
            Status::Unknown(code) => code,
        }
    }

    /// Map a wire code onto a status. Never fails: unknown codes are preserved.
    #[must_use]
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Status::Success,
            1 => Status::Failed,
            other => Status::Unknown(other),
        }
    }

    /// Whether the device acknowledged the command.
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Status::Success)
    }

    /// Encode the status as a wire frame.
    #[must_use]
    pub fn encode(self) -> [u8; FRAME_LEN] {
        encode_frame(self.code())
    }

    /// Decode a status frame. `None` means the reply was not a single frame.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        decode_frame(bytes).map(Self::from_code)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Success => f.write_str("success"),
            Status::Failed => f.write_str("failed"),
            Status::Unknown(code) => write!(f, "unknown({code})"),
        }
    }
}
