//! ---
//! ota_section: "03-persistence-logging"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Structured logging adapters for update module lifecycle events."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Logging helpers shared by the update agent crates.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a baseline tracing subscriber suitable for development and tests.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer().with_test_writer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Update module identifier.
    pub module: Option<&'a str>,
    /// Lifecycle operation in progress (prepare, update, ...).
    pub operation: Option<&'a str>,
    /// Update phase the module was in when the event was emitted.
    pub phase: Option<&'a str>,
    /// Vendor version currently recorded as active.
    pub vendor_version: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a module identifier.
    pub fn with_module(mut self, module: &'a str) -> Self {
        self.module = Some(module);
        self
    }

    /// Attach the operation name.
    pub fn with_operation(mut self, operation: &'a str) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Attach the current phase.
    pub fn with_phase(mut self, phase: &'a str) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Attach the active vendor version.
    pub fn with_vendor_version(mut self, version: &'a str) -> Self {
        self.vendor_version = Some(version);
        self
    }
}

/// High-level outcome used when emitting lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventOutcome {
    /// The operation completed successfully.
    Success,
    /// The operation completed without doing anything.
    Skipped,
    /// The operation failed or was aborted.
    Fault,
}

impl SystemEventOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            SystemEventOutcome::Success => "success",
            SystemEventOutcome::Skipped => "skipped",
            SystemEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized lifecycle event with its outcome.
pub fn log_system_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: SystemEventOutcome,
) {
    let ctx = context.cloned().unwrap_or_default();
    macro_rules! emit {
        ($level:expr) => {
            tracing::event!(
                $level,
                event,
                outcome = outcome.as_str(),
                module = ctx.module.unwrap_or(""),
                operation = ctx.operation.unwrap_or(""),
                phase = ctx.phase.unwrap_or(""),
                vendor_version = ctx.vendor_version.unwrap_or(""),
                message = %message
            )
        };
    }
    match outcome {
        SystemEventOutcome::Success => emit!(Level::INFO),
        SystemEventOutcome::Skipped => emit!(Level::DEBUG),
        SystemEventOutcome::Fault => emit!(Level::ERROR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macros_emit_without_panic() {
        init();
        let ctx = LogContext::new()
            .with_module("ecu-a")
            .with_operation("prepare");
        ota_info!(context = ctx.clone(), "module prepared");
        ota_debug!("debug message");
        ota_warn!(context = ctx.clone(), "slow device: {}ms", 1200);
        ota_error!(context = ctx, "error code: {}", 42);
    }

    #[test]
    fn init_does_not_panic() {
        init();
        init();
    }

    #[test]
    fn system_event_helper_emits() {
        init();
        let ctx = LogContext::new().with_module("ecu-a").with_phase("idle");
        log_system_event(
            Some(&ctx),
            "test.event",
            "system event helper executed",
            SystemEventOutcome::Success,
        );
        log_system_event(
            None,
            "test.event",
            "system event helper fault",
            SystemEventOutcome::Fault,
        );
    }
}
