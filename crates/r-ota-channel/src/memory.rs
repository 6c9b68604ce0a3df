//! ---
//! ota_section: "02-command-channel"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "In-process scripted transport for tests and dry runs."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
//! In-memory stand-in for the OTA master.
//!
//! The transport records every command the agent delivers and answers according
//! to per-command rules, acknowledging anything without a rule. Clones share the
//! same device, so a test can keep a handle while the module owns another.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use crate::command::{Command, Status};
use crate::transport::{CommandSession, CommandTransport};
use crate::{ChannelError, Direction, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// How the simulated device reacts to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Reply with a well-formed status frame.
    Status(Status),
    /// Reply with raw bytes, used to exercise malformed frames.
    Raw(Vec<u8>),
    /// Accept the command but never answer.
    Timeout,
    /// Never accept the command.
    SendTimeout,
}

#[derive(Debug)]
struct Device {
    sent: Vec<Command>,
    rules: HashMap<Command, Reply>,
    fail_open: bool,
    opens: usize,
    closes: usize,
    timeout: Duration,
}

impl Default for Device {
    fn default() -> Self {
        Self {
            sent: Vec::new(),
            rules: HashMap::new(),
            fail_open: false,
            opens: 0,
            closes: 0,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Scripted in-memory transport.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    device: Arc<Mutex<Device>>,
}

impl MemoryTransport {
    /// Create a device that acknowledges every command.
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeout reported by simulated deadline expiries.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.device.lock().timeout = timeout;
        self
    }

    /// Answer `command` with `reply` from now on.
    pub fn respond_to(&self, command: Command, reply: Reply) {
        self.device.lock().rules.insert(command, reply);
    }

    /// Drop every reply rule; all commands are acknowledged again.
    pub fn reset_replies(&self) {
        self.device.lock().rules.clear();
    }

    /// Make subsequent opens fail as if the queues did not exist.
    pub fn fail_open(&self, fail: bool) {
        self.device.lock().fail_open = fail;
    }

    /// Commands the device has accepted so far, in order.
    pub fn sent(&self) -> Vec<Command> {
        self.device.lock().sent.clone()
    }

    /// Forget the recorded command history.
    pub fn clear_sent(&self) {
        self.device.lock().sent.clear();
    }

    /// Number of sessions successfully opened.
    pub fn open_count(&self) -> usize {
        self.device.lock().opens
    }

    /// Number of sessions closed.
    pub fn close_count(&self) -> usize {
        self.device.lock().closes
    }
}

impl CommandTransport for MemoryTransport {
    type Session = MemorySession;

    fn open(&self) -> Result<MemorySession> {
        let mut device = self.device.lock();
        if device.fail_open {
            return Err(ChannelError::Open {
                queue: "memory".to_owned(),
                direction: Direction::Outbound,
                source: io::Error::new(io::ErrorKind::NotFound, "simulated queue missing"),
            });
        }
        device.opens += 1;
        Ok(MemorySession {
            device: Arc::clone(&self.device),
        })
    }
}

/// Session handed out by [`MemoryTransport`].
#[derive(Debug)]
pub struct MemorySession {
    device: Arc<Mutex<Device>>,
}

impl CommandSession for MemorySession {
    fn send_and_await(&mut self, command: Command) -> Result<Status> {
        let mut device = self.device.lock();
        let reply = device
            .rules
            .get(&command)
            .cloned()
            .unwrap_or(Reply::Status(Status::Success));
        let timeout = device.timeout;
        if reply == Reply::SendTimeout {
            return Err(ChannelError::SendTimeout { command, timeout });
        }
        device.sent.push(command);
        trace!(%command, ?reply, "memory device received command");
        match reply {
            Reply::Status(status) => Ok(status),
            Reply::Raw(bytes) => {
                Status::decode(&bytes).ok_or(ChannelError::Malformed {
                    command,
                    len: bytes.len(),
                })
            }
            Reply::Timeout | Reply::SendTimeout => {
                Err(ChannelError::ReceiveTimeout { command, timeout })
            }
        }
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.device.lock().closes += 1;
    }
}
