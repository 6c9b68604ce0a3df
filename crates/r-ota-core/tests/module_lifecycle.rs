//! ---
//! ota_section: "01-core-functionality"
//! ota_subsection: "integration-tests"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Lifecycle behaviour of the update module against a scripted device."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use flate2::write::GzEncoder;
use flate2::Compression;
use prometheus::Registry;
use r_ota_channel::{ChannelMetrics, Command, MemoryTransport, Reply, Status};
use r_ota_common::ModuleConfig;
use r_ota_core::{
    ModuleError, ModuleState, OtaUpdateModule, StatePersistence, UpdateModule, UpdatePhase,
};
use r_ota_persistence::{
    encode_snapshot, FileStorage, MemoryStorage, ModuleStorage, PersistenceMetrics,
};
use serde_json::json;
use tempfile::{tempdir, TempDir};

const IMAGE: &[u8] = b"firmware image payload";

struct Fixture {
    dir: TempDir,
    transport: MemoryTransport,
    storage: Arc<MemoryStorage>,
}

impl Fixture {
    fn new() -> Result<Self> {
        r_ota_logging::init();
        Ok(Self {
            dir: tempdir()?,
            transport: MemoryTransport::new().with_timeout(Duration::from_secs(1)),
            storage: Arc::new(MemoryStorage::new()),
        })
    }

    fn target(&self) -> PathBuf {
        self.dir.path().join("staging").join("image.bin")
    }

    fn config(&self) -> ModuleConfig {
        ModuleConfig::new("/ota_cmd", "/ota_sts", self.target())
            .with_timeout(Duration::from_secs(1))
    }

    fn image(&self) -> Result<PathBuf> {
        let path = self.dir.path().join("image.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(IMAGE)?;
        fs::write(&path, encoder.finish()?)?;
        Ok(path)
    }

    fn seed(&self, state: &ModuleState) -> Result<()> {
        self.storage.insert("ecu", encode_snapshot(state)?);
        Ok(())
    }

    fn module(&self) -> Result<OtaUpdateModule<MemoryTransport>> {
        let mut module = OtaUpdateModule::new(
            "ecu",
            self.config(),
            self.transport.clone(),
            self.storage.clone(),
        )?;
        module.init()?;
        Ok(module)
    }

    fn stored(&self) -> Result<ModuleState> {
        let bytes = self.storage.get_module_state("ecu")?;
        Ok(r_ota_persistence::decode_snapshot::<ModuleState>(&bytes)?.state)
    }
}

fn state(phase: UpdatePhase, vendor: &str, pending: &str) -> ModuleState {
    ModuleState {
        phase,
        vendor_version: vendor.into(),
        pending_version: pending.into(),
    }
}

#[test]
fn full_cycle_stages_image_and_swaps_versions() -> Result<()> {
    let fx = Fixture::new()?;
    fx.seed(&ModuleState::idle("1.0"))?;
    let mut module = fx.module()?;

    module.prepare(&fx.image()?, "2.0", None)?;
    assert_eq!(fs::read(fx.target())?, IMAGE);
    assert_eq!(fx.stored()?, state(UpdatePhase::Prepared, "1.0", "2.0"));

    assert!(!module.update()?);
    assert_eq!(module.vendor_version(), "2.0");
    assert_eq!(fx.stored()?, state(UpdatePhase::Updated, "2.0", "1.0"));

    assert!(!module.apply()?);
    assert_eq!(fx.stored()?, state(UpdatePhase::Idle, "2.0", "1.0"));

    assert_eq!(
        fx.transport.sent(),
        vec![
            Command::SyncCompose,
            Command::Download,
            Command::Install,
            Command::Activate
        ]
    );
    assert_eq!(fx.transport.open_count(), fx.transport.close_count());
    module.close()?;
    Ok(())
}

#[test]
fn operations_in_target_phase_do_nothing() -> Result<()> {
    let fx_prepared = Fixture::new()?;
    fx_prepared.seed(&state(UpdatePhase::Prepared, "1.0", "2.0"))?;
    let mut module = fx_prepared.module()?;

    // No image exists at this path; a no-op prepare must not try to stage it.
    module.prepare(Path::new("/nonexistent/image.gz"), "3.0", None)?;
    assert_eq!(module.state(), &state(UpdatePhase::Prepared, "1.0", "2.0"));

    let fx_updated = Fixture::new()?;
    fx_updated.seed(&state(UpdatePhase::Updated, "2.0", "1.0"))?;
    let mut module = fx_updated.module()?;
    assert!(!module.update()?);

    let fx_idle = Fixture::new()?;
    let mut idle = fx_idle.module()?;
    assert!(!idle.revert()?);
    assert!(!idle.apply()?);

    for fixture in [&fx_prepared, &fx_updated, &fx_idle] {
        assert!(fixture.transport.sent().is_empty());
        assert_eq!(fixture.transport.open_count(), 0);
        assert_eq!(fixture.storage.write_count(), 0);
    }
    Ok(())
}

#[test]
fn revert_after_prepare_keeps_active_version() -> Result<()> {
    let fx = Fixture::new()?;
    fx.seed(&ModuleState::idle("1.0"))?;
    let mut module = fx.module()?;

    module.prepare(&fx.image()?, "2.0", None)?;
    fx.transport.clear_sent();
    module.revert()?;

    assert_eq!(fx.transport.sent(), vec![Command::Revert]);
    assert_eq!(module.vendor_version(), "1.0");
    assert_eq!(fx.stored()?, state(UpdatePhase::Idle, "1.0", "2.0"));
    Ok(())
}

#[test]
fn revert_after_update_swaps_back() -> Result<()> {
    let fx = Fixture::new()?;
    fx.seed(&state(UpdatePhase::Updated, "2.0", "1.0"))?;
    let mut module = fx.module()?;

    module.revert()?;
    assert_eq!(fx.transport.sent(), vec![Command::Revert]);
    assert_eq!(fx.stored()?, state(UpdatePhase::Idle, "1.0", "2.0"));
    Ok(())
}

#[test]
fn update_without_prepared_image_is_rejected() -> Result<()> {
    let fx = Fixture::new()?;
    let mut module = fx.module()?;

    let err = module.update().unwrap_err();
    assert!(matches!(err, ModuleError::InvalidTransition(_)));
    assert!(fx.transport.sent().is_empty());
    assert_eq!(fx.storage.write_count(), 0);
    Ok(())
}

#[test]
fn timeout_leaves_state_unchanged() -> Result<()> {
    let fx = Fixture::new()?;
    fx.seed(&ModuleState::idle("1.0"))?;
    fx.transport.respond_to(Command::Download, Reply::Timeout);
    let mut module = fx.module()?;

    let err = module.prepare(&fx.image()?, "2.0", None).unwrap_err();
    assert_eq!(err.kind(), "channel");
    assert_eq!(module.state(), &ModuleState::idle("1.0"));
    assert_eq!(fx.stored()?, ModuleState::idle("1.0"));
    assert_eq!(fx.storage.write_count(), 0);
    assert_eq!(fx.transport.open_count(), fx.transport.close_count());
    Ok(())
}

#[test]
fn failed_status_stops_the_sequence() -> Result<()> {
    let fx = Fixture::new()?;
    fx.seed(&state(UpdatePhase::Prepared, "1.0", "2.0"))?;
    fx.transport
        .respond_to(Command::Install, Reply::Status(Status::Failed));
    let mut module = fx.module()?;

    let err = module.update().unwrap_err();
    match err {
        ModuleError::Protocol {
            command, status, ..
        } => {
            assert_eq!(command, Command::Install);
            assert_eq!(status, Status::Failed);
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(fx.transport.sent(), vec![Command::Install]);
    assert_eq!(module.state().phase, UpdatePhase::Prepared);
    Ok(())
}

#[test]
fn unknown_status_codes_are_failures() -> Result<()> {
    let fx = Fixture::new()?;
    fx.transport
        .respond_to(Command::SyncCompose, Reply::Status(Status::Unknown(7)));
    let mut module = fx.module()?;

    let err = module.prepare(&fx.image()?, "2.0", None).unwrap_err();
    assert_eq!(err.kind(), "protocol");
    assert_eq!(fx.transport.sent(), vec![Command::SyncCompose]);
    Ok(())
}

#[test]
fn missing_queue_sends_nothing() -> Result<()> {
    let fx = Fixture::new()?;
    fx.transport.fail_open(true);
    let mut module = fx.module()?;

    let err = module.prepare(&fx.image()?, "2.0", None).unwrap_err();
    assert_eq!(err.kind(), "channel");
    assert!(fx.transport.sent().is_empty());
    assert_eq!(module.state().phase, UpdatePhase::Idle);
    Ok(())
}

#[test]
fn save_failure_keeps_previous_state() -> Result<()> {
    let fx = Fixture::new()?;
    fx.seed(&state(UpdatePhase::Prepared, "1.0", "2.0"))?;
    let mut module = fx.module()?;
    fx.storage.fail_writes(true);

    let err = module.update().unwrap_err();
    assert_eq!(err.kind(), "persistence");
    assert_eq!(module.state(), &state(UpdatePhase::Prepared, "1.0", "2.0"));
    assert_eq!(fx.stored()?, state(UpdatePhase::Prepared, "1.0", "2.0"));
    Ok(())
}

#[test]
fn reboot_always_fails() -> Result<()> {
    let fx = Fixture::new()?;
    let mut module = fx.module()?;
    assert!(matches!(
        module.reboot(),
        Err(ModuleError::Unsupported("reboot"))
    ));
    assert!(fx.transport.sent().is_empty());
    Ok(())
}

#[test]
fn corrupted_snapshot_fails_construction() -> Result<()> {
    let fx = Fixture::new()?;
    fx.storage.insert("ecu", b"not a snapshot".to_vec());
    let err = fx.module().unwrap_err();
    let err = err.downcast::<ModuleError>()?;
    assert_eq!(err.kind(), "persistence");
    Ok(())
}

#[test]
fn restart_resumes_from_file_storage() -> Result<()> {
    let fx = Fixture::new()?;
    let state_dir = tempdir()?;
    let image = fx.image()?;

    {
        let storage: Arc<dyn ModuleStorage> = Arc::new(FileStorage::new(state_dir.path()));
        let mut module =
            OtaUpdateModule::new("ecu", fx.config(), fx.transport.clone(), storage)?;
        module.prepare(&image, "2.0", None)?;
    }

    let storage: Arc<dyn ModuleStorage> = Arc::new(FileStorage::new(state_dir.path()));
    let mut module = OtaUpdateModule::new("ecu", fx.config(), fx.transport.clone(), storage)?;
    assert_eq!(module.state(), &state(UpdatePhase::Prepared, "", "2.0"));

    module.update()?;
    assert_eq!(module.vendor_version(), "2.0");
    Ok(())
}

#[test]
fn channel_metrics_follow_acknowledgements() -> Result<()> {
    let fx = Fixture::new()?;
    let registry = Registry::new();
    let metrics = Arc::new(ChannelMetrics::new(&registry)?);
    fx.transport
        .respond_to(Command::Download, Reply::Status(Status::Failed));
    let mut module = fx.module()?.with_channel_metrics(metrics.clone());

    assert!(module.prepare(&fx.image()?, "2.0", None).is_err());
    assert_eq!(metrics.acknowledged(Command::SyncCompose), 1);
    assert_eq!(metrics.acknowledged(Command::Download), 0);
    assert_eq!(metrics.failures(Command::Download, "rejected"), 1);
    Ok(())
}

#[test]
fn apply_after_prepare_finishes_without_device() -> Result<()> {
    let fx = Fixture::new()?;
    fx.seed(&state(UpdatePhase::Prepared, "1.0", "2.0"))?;
    let mut module = fx.module()?;

    assert!(!module.apply()?);
    assert_eq!(module.state(), &state(UpdatePhase::Idle, "1.0", "2.0"));
    assert_eq!(fx.stored()?, state(UpdatePhase::Idle, "1.0", "2.0"));
    assert!(fx.transport.sent().is_empty());
    assert_eq!(fx.transport.open_count(), 0);
    assert_eq!(fx.storage.write_count(), 1);
    Ok(())
}

#[test]
fn prepare_accepts_annotations() -> Result<()> {
    let fx = Fixture::new()?;
    let mut module = fx.module()?;
    let annotations = json!({"component": "ecu", "priority": 1});

    module.prepare(&fx.image()?, "2.0", Some(&annotations))?;
    assert_eq!(module.state(), &state(UpdatePhase::Prepared, "", "2.0"));
    Ok(())
}

#[test]
fn persistence_metrics_count_the_initial_load() -> Result<()> {
    let fx = Fixture::new()?;
    let registry = Registry::new();
    let metrics = Arc::new(PersistenceMetrics::new(&registry)?);
    fx.seed(&ModuleState::idle("1.0"))?;

    let persistence =
        StatePersistence::new("ecu", fx.storage.clone()).with_metrics(metrics.clone());
    let mut module = OtaUpdateModule::with_persistence(
        fx.config(),
        fx.transport.clone(),
        persistence,
        r_ota_core::GzipImageStager,
    )?;
    assert_eq!(module.id(), "ecu");
    assert_eq!(metrics.loaded("ecu"), 1);

    module.prepare(&fx.image()?, "2.0", None)?;
    assert_eq!(metrics.saved("ecu"), 1);

    fx.storage.insert("broken", b"not a snapshot".to_vec());
    let persistence =
        StatePersistence::new("broken", fx.storage.clone()).with_metrics(metrics.clone());
    let err = OtaUpdateModule::with_persistence(
        fx.config(),
        fx.transport.clone(),
        persistence,
        r_ota_core::GzipImageStager,
    )
    .unwrap_err();
    assert_eq!(err.kind(), "persistence");
    assert_eq!(metrics.failed("broken", "load"), 1);
    assert_eq!(metrics.loaded("broken"), 0);
    Ok(())
}
