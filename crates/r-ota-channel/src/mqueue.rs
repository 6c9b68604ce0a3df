//! ---
//! ota_section: "02-command-channel"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "POSIX message queue transport to the OTA master."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
//! POSIX message queue transport.
//!
//! The OTA master owns two queues: one it reads commands from and one it writes
//! statuses to. The agent never creates them; a missing queue is an open error.
//! [`DeviceEndpoint`] is the other side of the same pair and is used by the bench
//! simulator and by tests.

use std::io;
use std::time::Duration;

use posixmq::{OpenOptions, PosixMq};
use tracing::{debug, trace, warn};

use crate::command::{Command, Status, FRAME_LEN};
use crate::transport::{CommandSession, CommandTransport};
use crate::{ChannelError, Direction, Result};

const QUEUE_MODE: u32 = 0o600;
const DEVICE_QUEUE_CAPACITY: usize = 10;

fn queue_name(name: &str) -> String {
    if name.starts_with('/') {
        name.to_owned()
    } else {
        format!("/{name}")
    }
}

/// Transport opening the configured queue pair for every session.
#[derive(Debug, Clone)]
pub struct MqueueTransport {
    send_queue: String,
    receive_queue: String,
    timeout: Duration,
}

impl MqueueTransport {
    /// Build a transport for the given queue names and per-message timeout.
    pub fn new(
        send_queue: impl Into<String>,
        receive_queue: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            send_queue: queue_name(&send_queue.into()),
            receive_queue: queue_name(&receive_queue.into()),
            timeout,
        }
    }

    /// Bound applied to each send and each receive.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl CommandTransport for MqueueTransport {
    type Session = MqueueSession;

    fn open(&self) -> Result<MqueueSession> {
        let send = OpenOptions::writeonly()
            .open(&self.send_queue)
            .map_err(|source| ChannelError::Open {
                queue: self.send_queue.clone(),
                direction: Direction::Outbound,
                source,
            })?;
        let receive = OpenOptions::readonly()
            .open(&self.receive_queue)
            .map_err(|source| ChannelError::Open {
                queue: self.receive_queue.clone(),
                direction: Direction::Inbound,
                source,
            })?;
        // mq_receive refuses buffers smaller than the queue's message size.
        let capacity = receive
            .attributes()
            .map(|attrs| attrs.max_msg_len)
            .unwrap_or(FRAME_LEN)
            .max(FRAME_LEN);
        let mut buffer = vec![0; capacity];
        let stale = drain_pending(&receive, &mut buffer);
        if stale > 0 {
            warn!(
                receive_queue = %self.receive_queue,
                stale,
                "discarded statuses left over from an earlier session"
            );
        }
        debug!(
            send_queue = %self.send_queue,
            receive_queue = %self.receive_queue,
            "opened command queues"
        );
        Ok(MqueueSession {
            send,
            receive,
            buffer,
            timeout: self.timeout,
        })
    }
}

/// Drop every status already waiting on `receive` without blocking.
///
/// A status that arrives after its receive deadline expired would otherwise be read as
/// the answer to the next session's first command.
fn drain_pending(receive: &PosixMq, buffer: &mut [u8]) -> usize {
    let pending = receive
        .attributes()
        .map(|attrs| attrs.current_messages)
        .unwrap_or(0);
    let mut drained = 0;
    for _ in 0..pending {
        match receive.recv_timeout(buffer, Duration::ZERO) {
            Ok((_, len)) => {
                trace!(len, "stale status discarded");
                drained += 1;
            }
            Err(_) => break,
        }
    }
    drained
}

/// Open queue pair. Both descriptors are closed when the session is dropped.
#[derive(Debug)]
pub struct MqueueSession {
    send: PosixMq,
    receive: PosixMq,
    buffer: Vec<u8>,
    timeout: Duration,
}

impl CommandSession for MqueueSession {
    fn send_and_await(&mut self, command: Command) -> Result<Status> {
        let timeout = self.timeout;
        self.send
            .send_timeout(0, &command.encode(), timeout)
            .map_err(|source| match source.kind() {
                io::ErrorKind::TimedOut => ChannelError::SendTimeout { command, timeout },
                _ => ChannelError::Send { command, source },
            })?;
        trace!(%command, "command sent");

        let (_, len) = self
            .receive
            .recv_timeout(&mut self.buffer, timeout)
            .map_err(|source| match source.kind() {
                io::ErrorKind::TimedOut => ChannelError::ReceiveTimeout { command, timeout },
                _ => ChannelError::Receive { command, source },
            })?;
        Status::decode(&self.buffer[..len]).ok_or(ChannelError::Malformed { command, len })
    }
}

/// Device side of the queue pair.
#[derive(Debug)]
pub struct DeviceEndpoint {
    command_queue: String,
    status_queue: String,
    commands: PosixMq,
    statuses: PosixMq,
    buffer: Vec<u8>,
}

impl DeviceEndpoint {
    /// Create (if missing) and open both queues as the OTA master would.
    ///
    /// `command_queue` is the queue the agent sends on; `status_queue` the one it
    /// receives from.
    pub fn create(command_queue: &str, status_queue: &str) -> io::Result<Self> {
        let command_queue = queue_name(command_queue);
        let status_queue = queue_name(status_queue);
        let commands = OpenOptions::readwrite()
            .create()
            .mode(QUEUE_MODE)
            .capacity(DEVICE_QUEUE_CAPACITY)
            .max_msg_len(FRAME_LEN)
            .open(&command_queue)?;
        let statuses = OpenOptions::readwrite()
            .create()
            .mode(QUEUE_MODE)
            .capacity(DEVICE_QUEUE_CAPACITY)
            .max_msg_len(FRAME_LEN)
            .open(&status_queue)?;
        let capacity = commands
            .attributes()
            .map(|attrs| attrs.max_msg_len)
            .unwrap_or(FRAME_LEN)
            .max(FRAME_LEN);
        Ok(Self {
            command_queue,
            status_queue,
            commands,
            statuses,
            buffer: vec![0; capacity],
        })
    }

    /// Wait up to `timeout` for the next raw opcode. `None` means nothing arrived.
    pub fn next_opcode(&mut self, timeout: Duration) -> io::Result<Option<i64>> {
        match self.commands.recv_timeout(&mut self.buffer, timeout) {
            Ok((_, len)) => crate::command::decode_frame(&self.buffer[..len])
                .map(Some)
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("command frame of {len} bytes"),
                    )
                }),
            Err(err) if err.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Answer the agent.
    pub fn reply(&self, status: Status, timeout: Duration) -> io::Result<()> {
        self.statuses.send_timeout(0, &status.encode(), timeout)
    }

    /// Unlink both queues.
    pub fn remove(self) -> io::Result<()> {
        let DeviceEndpoint {
            command_queue,
            status_queue,
            commands,
            statuses,
            ..
        } = self;
        drop(commands);
        drop(statuses);
        posixmq::remove_queue(&command_queue)?;
        posixmq::remove_queue(&status_queue)?;
        Ok(())
    }
}
