//! ---
//! ota_section: "01-core-functionality"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Update phase state machine and version bookkeeping."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
//! Update phases and their legal transitions.
//!
//! Transitions are pure: they read the current [`ModuleState`] and return a [`Step`]
//! describing which commands to send and what the state becomes once they are
//! acknowledged. Nothing here touches the device or storage.

use std::fmt;

use r_ota_channel::Command;
use serde::{Deserialize, Serialize};

const PREPARE_COMMANDS: &[Command] = &[Command::SyncCompose, Command::Download];
const UPDATE_COMMANDS: &[Command] = &[Command::Install, Command::Activate];
const REVERT_COMMANDS: &[Command] = &[Command::Revert];

/// Position of the module in the update lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePhase {
    /// No update in flight.
    #[default]
    Idle,
    /// Image staged and downloaded by the device.
    Prepared,
    /// Image installed and activated.
    Updated,
}

impl UpdatePhase {
    /// Lowercase name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            UpdatePhase::Idle => "idle",
            UpdatePhase::Prepared => "prepared",
            UpdatePhase::Updated => "updated",
        }
    }
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle operations that move the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Prepare,
    Update,
    Revert,
    Apply,
}

impl Operation {
    /// Lowercase name used in logs and errors.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Prepare => "prepare",
            Operation::Update => "update",
            Operation::Revert => "revert",
            Operation::Apply => "apply",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operation requested in a phase that cannot accept it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot {operation} while {phase}")]
pub struct TransitionError {
    pub operation: Operation,
    pub phase: UpdatePhase,
}

/// Essential module state; exactly what goes into the durable snapshot.
///
/// `vendor_version` is whatever the device is running from this module's point of
/// view. Update and Revert swap it with `pending_version` rather than editing either.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ModuleState {
    pub phase: UpdatePhase,
    pub vendor_version: String,
    pub pending_version: String,
}

/// Outcome of planning a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Already in the target phase; send nothing, write nothing.
    Noop,
    /// Send `commands` in order; on success the module becomes `next`.
    Advance {
        commands: &'static [Command],
        next: ModuleState,
    },
}

impl Step {
    /// Commands the step would send.
    #[must_use]
    pub fn commands(&self) -> &'static [Command] {
        match self {
            Step::Noop => &[],
            Step::Advance { commands, .. } => *commands,
        }
    }

    /// Whether the step changes anything.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        matches!(self, Step::Noop)
    }
}

impl ModuleState {
    /// State with `vendor_version` active and nothing pending.
    pub fn idle(vendor_version: impl Into<String>) -> Self {
        Self {
            phase: UpdatePhase::Idle,
            vendor_version: vendor_version.into(),
            pending_version: String::new(),
        }
    }

    /// Stage `version`: SyncCompose then Download, version becomes pending.
    #[must_use]
    pub fn prepare(&self, version: &str) -> Step {
        if self.phase == UpdatePhase::Prepared {
            return Step::Noop;
        }
        Step::Advance {
            commands: PREPARE_COMMANDS,
            next: ModuleState {
                phase: UpdatePhase::Prepared,
                vendor_version: self.vendor_version.clone(),
                pending_version: version.to_owned(),
            },
        }
    }

    /// Install and activate the prepared image, swapping the versions.
    ///
    /// Only a prepared image can be installed: from `Idle` this is a
    /// [`TransitionError`] and nothing is sent to the device.
    pub fn update(&self) -> Result<Step, TransitionError> {
        match self.phase {
            UpdatePhase::Updated => Ok(Step::Noop),
            UpdatePhase::Prepared => Ok(Step::Advance {
                commands: UPDATE_COMMANDS,
                next: self.swapped(UpdatePhase::Updated),
            }),
            UpdatePhase::Idle => Err(TransitionError {
                operation: Operation::Update,
                phase: self.phase,
            }),
        }
    }

    /// Roll back. Versions are swapped back only if the update was activated.
    #[must_use]
    pub fn revert(&self) -> Step {
        let next = match self.phase {
            UpdatePhase::Idle => return Step::Noop,
            UpdatePhase::Prepared => ModuleState {
                phase: UpdatePhase::Idle,
                ..self.clone()
            },
            UpdatePhase::Updated => self.swapped(UpdatePhase::Idle),
        };
        Step::Advance {
            commands: REVERT_COMMANDS,
            next,
        }
    }

    /// Finish the cycle without talking to the device.
    #[must_use]
    pub fn apply(&self) -> Step {
        if self.phase == UpdatePhase::Idle {
            return Step::Noop;
        }
        Step::Advance {
            commands: &[],
            next: ModuleState {
                phase: UpdatePhase::Idle,
                ..self.clone()
            },
        }
    }

    fn swapped(&self, phase: UpdatePhase) -> ModuleState {
        ModuleState {
            phase,
            vendor_version: self.pending_version.clone(),
            pending_version: self.vendor_version.clone(),
        }
    }
}
