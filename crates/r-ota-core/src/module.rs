//! ---
//! ota_section: "01-core-functionality"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Update module driving the OTA master through the update lifecycle."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
//! Update module for a component flashed by a device-side OTA master.
//!
//! Every mutating operation follows the same order: plan the transition, send the
//! planned commands, save the resulting state, and only then adopt it in memory. A
//! failure at any point leaves both the stored and the in-memory state untouched.

use std::path::Path;
use std::sync::Arc;

use r_ota_channel::{ChannelMetrics, CommandChannel, CommandTransport};
use r_ota_common::ModuleConfig;
use r_ota_logging::{log_system_event, ota_debug, ota_info, ota_warn, LogContext, SystemEventOutcome};
use r_ota_persistence::ModuleStorage;
use serde_json::Value;

use crate::error::{ModuleError, Result};
use crate::lifecycle::UpdateModule;
use crate::persistence::StatePersistence;
use crate::staging::{GzipImageStager, ImageStager};
use crate::state::{ModuleState, Operation, Step};

/// Update module talking to the OTA master over a [`CommandTransport`].
pub struct OtaUpdateModule<T, S = GzipImageStager> {
    id: String,
    config: ModuleConfig,
    channel: CommandChannel<T>,
    stager: S,
    persistence: StatePersistence,
    state: ModuleState,
}

#[cfg(target_os = "linux")]
impl OtaUpdateModule<r_ota_channel::MqueueTransport> {
    /// Build a module using the POSIX queues named in `config`.
    pub fn from_config(config: ModuleConfig, persistence: StatePersistence) -> Result<Self> {
        let transport = r_ota_channel::MqueueTransport::new(
            config.send_queue_name.clone(),
            config.receive_queue_name.clone(),
            config.timeout,
        );
        Self::with_persistence(config, transport, persistence, GzipImageStager)
    }
}

impl<T: CommandTransport> OtaUpdateModule<T> {
    /// Build a module staging gzip images.
    pub fn new(
        id: impl Into<String>,
        config: ModuleConfig,
        transport: T,
        storage: Arc<dyn ModuleStorage>,
    ) -> Result<Self> {
        Self::with_stager(id, config, transport, storage, GzipImageStager)
    }
}

impl<T: CommandTransport, S: ImageStager> OtaUpdateModule<T, S> {
    /// Build a module with a custom image stager.
    pub fn with_stager(
        id: impl Into<String>,
        config: ModuleConfig,
        transport: T,
        storage: Arc<dyn ModuleStorage>,
        stager: S,
    ) -> Result<Self> {
        let persistence = StatePersistence::new(id, storage);
        Self::with_persistence(config, transport, persistence, stager)
    }

    /// Build a module around a prepared persistence adapter; the module takes its id
    /// from the adapter.
    ///
    /// Validates `config` and restores the last stored state; a stored snapshot that
    /// cannot be decoded fails construction instead of silently starting from idle.
    /// Metrics attached to `persistence` see this initial load.
    pub fn with_persistence(
        config: ModuleConfig,
        transport: T,
        persistence: StatePersistence,
        stager: S,
    ) -> Result<Self> {
        config.validate()?;
        let id = persistence.module_id().to_owned();
        let state = persistence
            .load()
            .map_err(|source| ModuleError::Persistence {
                action: "restore",
                source,
            })?
            .unwrap_or_default();
        ota_debug!(
            context = LogContext::new()
                .with_module(&id)
                .with_phase(state.phase.as_str())
                .with_vendor_version(&state.vendor_version),
            "update module created"
        );
        Ok(Self {
            id,
            config,
            channel: CommandChannel::new(transport),
            stager,
            persistence,
            state,
        })
    }

    /// Attach command channel metrics.
    #[must_use]
    pub fn with_channel_metrics(self, metrics: Arc<ChannelMetrics>) -> Self {
        Self {
            channel: self.channel.with_metrics(metrics),
            ..self
        }
    }

    /// Current in-memory state; always equal to the last stored snapshot.
    pub fn state(&self) -> &ModuleState {
        &self.state
    }

    /// Configuration the module was built with.
    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    /// Transport used for the command channel.
    pub fn transport(&self) -> &T {
        self.channel.transport()
    }

    fn context(&self, operation: Operation) -> LogContext<'_> {
        LogContext::new()
            .with_module(&self.id)
            .with_operation(operation.as_str())
            .with_phase(self.state.phase.as_str())
            .with_vendor_version(&self.state.vendor_version)
    }

    /// Run a planned step: send its commands, persist, then adopt the new state.
    fn execute(&mut self, operation: Operation, step: Step) -> Result<()> {
        let Step::Advance { commands, next } = step else {
            log_system_event(
                Some(&self.context(operation)),
                "module.transition",
                "already in target phase",
                SystemEventOutcome::Skipped,
            );
            return Ok(());
        };

        if !commands.is_empty() {
            if let Err(err) = self.channel.send_commands(commands) {
                let err = ModuleError::from_channel(operation, err);
                self.report_failure(operation, &err);
                return Err(err);
            }
        }

        if let Err(source) = self.persistence.save(&next) {
            let err = ModuleError::Persistence {
                action: operation.as_str(),
                source,
            };
            // The device already accepted the commands; only the record is behind.
            ota_warn!(
                context = self.context(operation),
                "device accepted {} command(s) but state was not saved",
                commands.len()
            );
            self.report_failure(operation, &err);
            return Err(err);
        }

        let previous = self.state.phase;
        self.state = next;
        ota_info!(
            context = self.context(operation),
            "phase changed from {} to {} (pending version {:?})",
            previous,
            self.state.phase,
            self.state.pending_version
        );
        Ok(())
    }

    fn report_failure(&self, operation: Operation, err: &ModuleError) {
        log_system_event(
            Some(&self.context(operation)),
            "module.transition",
            &format!("{} failure: {err}", err.kind()),
            SystemEventOutcome::Fault,
        );
    }
}

impl<T: CommandTransport, S: ImageStager> UpdateModule for OtaUpdateModule<T, S> {
    fn id(&self) -> &str {
        &self.id
    }

    fn init(&mut self) -> Result<()> {
        ota_debug!(
            context = LogContext::new().with_module(&self.id),
            "update module initialised"
        );
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        ota_debug!(
            context = LogContext::new().with_module(&self.id),
            "update module closed"
        );
        Ok(())
    }

    fn vendor_version(&self) -> &str {
        &self.state.vendor_version
    }

    fn prepare(
        &mut self,
        image_path: &Path,
        vendor_version: &str,
        annotations: Option<&Value>,
    ) -> Result<()> {
        let annotations = annotations
            .map(|value| value.to_string())
            .unwrap_or_default();
        ota_debug!(
            context = self.context(Operation::Prepare),
            "prepare requested: image {}, version {}, annotations {}",
            image_path.display(),
            vendor_version,
            annotations
        );

        let step = self.state.prepare(vendor_version);
        if !step.is_noop() {
            let target = self.config.target_file.clone();
            if let Err(source) = self.stager.stage(image_path, &target) {
                let err = ModuleError::Io {
                    image: image_path.to_path_buf(),
                    target,
                    source,
                };
                self.report_failure(Operation::Prepare, &err);
                return Err(err);
            }
        }
        self.execute(Operation::Prepare, step)
    }

    fn update(&mut self) -> Result<bool> {
        let step = self.state.update().inspect_err(|err| {
            self.report_failure(Operation::Update, &ModuleError::InvalidTransition(*err));
        })?;
        self.execute(Operation::Update, step)?;
        Ok(false)
    }

    fn revert(&mut self) -> Result<bool> {
        let step = self.state.revert();
        self.execute(Operation::Revert, step)?;
        Ok(false)
    }

    fn apply(&mut self) -> Result<bool> {
        let step = self.state.apply();
        self.execute(Operation::Apply, step)?;
        Ok(false)
    }

    fn reboot(&mut self) -> Result<()> {
        ota_debug!(
            context = LogContext::new().with_module(&self.id),
            "reboot requested"
        );
        Err(ModuleError::Unsupported("reboot"))
    }
}

impl<T, S> std::fmt::Debug for OtaUpdateModule<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtaUpdateModule")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use r_ota_channel::{Command, MemoryTransport};
    use r_ota_persistence::MemoryStorage;

    use super::*;
    use crate::state::UpdatePhase;

    struct RefusingStager;

    impl ImageStager for RefusingStager {
        fn stage(&self, _image: &Path, _target: &Path) -> io::Result<u64> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only target"))
        }
    }

    struct CountingStager;

    impl ImageStager for CountingStager {
        fn stage(&self, _image: &Path, _target: &Path) -> io::Result<u64> {
            Ok(42)
        }
    }

    fn config() -> ModuleConfig {
        ModuleConfig::new("/ota_cmd", "/ota_sts", "/tmp/r-ota-unit/image.bin")
    }

    #[test]
    fn staging_failure_sends_nothing() {
        let transport = MemoryTransport::new();
        let storage = Arc::new(MemoryStorage::new());
        let mut module = OtaUpdateModule::with_stager(
            "ecu",
            config(),
            transport.clone(),
            storage.clone(),
            RefusingStager,
        )
        .unwrap();

        let err = module
            .prepare(Path::new("/nonexistent.gz"), "2.0", None)
            .unwrap_err();
        assert_eq!(err.kind(), "io");
        assert!(transport.sent().is_empty());
        assert_eq!(transport.open_count(), 0);
        assert_eq!(storage.write_count(), 0);
        assert_eq!(module.state().phase, UpdatePhase::Idle);
    }

    #[test]
    fn prepare_then_update_swaps_versions() {
        let transport = MemoryTransport::new();
        let storage = Arc::new(MemoryStorage::new());
        storage.insert(
            "ecu",
            r_ota_persistence::encode_snapshot(&ModuleState::idle("1.0")).unwrap(),
        );
        let mut module =
            OtaUpdateModule::with_stager("ecu", config(), transport.clone(), storage, CountingStager)
                .unwrap();
        assert_eq!(module.vendor_version(), "1.0");

        module.prepare(Path::new("image.gz"), "2.0", None).unwrap();
        assert!(!module.update().unwrap());
        assert_eq!(module.vendor_version(), "2.0");
        assert_eq!(module.state().pending_version, "1.0");
        assert_eq!(
            transport.sent(),
            vec![
                Command::SyncCompose,
                Command::Download,
                Command::Install,
                Command::Activate
            ]
        );
    }

    #[test]
    fn invalid_configuration_fails_construction() {
        let err = OtaUpdateModule::new(
            "ecu",
            ModuleConfig::new("", "/ota_sts", "/tmp/x"),
            MemoryTransport::new(),
            Arc::new(MemoryStorage::new()),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn reboot_is_unsupported() {
        let mut module = OtaUpdateModule::new(
            "ecu",
            config(),
            MemoryTransport::new(),
            Arc::new(MemoryStorage::new()),
        )
        .unwrap();
        assert!(matches!(
            module.reboot(),
            Err(ModuleError::Unsupported("reboot"))
        ));
    }
}
