//! ---
//! ota_section: "01-core-functionality"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Update state machine and lifecycle orchestration."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
//! Core of the update agent: the phase state machine, the snapshot adapter that
//! makes it durable, image staging, and the module that ties them to the command
//! channel.

pub mod error;
pub mod lifecycle;
pub mod module;
pub mod persistence;
pub mod staging;
pub mod state;

pub use error::{ModuleError, Result};
pub use lifecycle::UpdateModule;
pub use module::OtaUpdateModule;
pub use persistence::StatePersistence;
pub use staging::{GzipImageStager, ImageStager};
pub use state::{ModuleState, Operation, Step, TransitionError, UpdatePhase};
