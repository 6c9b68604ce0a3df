//! ---
//! ota_section: "03-persistence-logging"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Prometheus metrics for module state persistence."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use prometheus::{IntCounterVec, Opts, Registry};

use crate::Result;

/// Metrics published by the persistence subsystem.
#[derive(Clone)]
pub struct PersistenceMetrics {
    snapshots_saved: IntCounterVec,
    snapshots_failed: IntCounterVec,
    snapshots_loaded: IntCounterVec,
}

impl PersistenceMetrics {
    /// Register all persistence metrics with the provided registry.
    pub fn new(registry: &Registry) -> Result<Self> {
        let snapshots_saved = IntCounterVec::new(
            Opts::new(
                "r_ota_snapshots_saved_total",
                "Total number of module state snapshots successfully persisted",
            ),
            &["module"],
        )?;
        registry.register(Box::new(snapshots_saved.clone()))?;

        let snapshots_failed = IntCounterVec::new(
            Opts::new(
                "r_ota_snapshots_failed_total",
                "Total number of module state snapshot operations that failed",
            ),
            &["module", "stage"],
        )?;
        registry.register(Box::new(snapshots_failed.clone()))?;

        let snapshots_loaded = IntCounterVec::new(
            Opts::new(
                "r_ota_snapshots_loaded_total",
                "Total number of module state snapshots restored at startup",
            ),
            &["module"],
        )?;
        registry.register(Box::new(snapshots_loaded.clone()))?;

        Ok(Self {
            snapshots_saved,
            snapshots_failed,
            snapshots_loaded,
        })
    }

    /// Record a successful snapshot for the provided module.
    pub fn record_snapshot_saved(&self, module: &str) {
        self.snapshots_saved.with_label_values(&[module]).inc();
    }

    /// Record a failed snapshot operation; `stage` is `load` or `save`.
    pub fn record_snapshot_failed(&self, module: &str, stage: &str) {
        self.snapshots_failed
            .with_label_values(&[module, stage])
            .inc();
    }

    /// Record a snapshot restored at construction.
    pub fn record_snapshot_loaded(&self, module: &str) {
        self.snapshots_loaded.with_label_values(&[module]).inc();
    }

    /// Saved count for one module.
    pub fn saved(&self, module: &str) -> u64 {
        self.snapshots_saved.with_label_values(&[module]).get()
    }

    /// Restored count for one module.
    pub fn loaded(&self, module: &str) -> u64 {
        self.snapshots_loaded.with_label_values(&[module]).get()
    }

    /// Failure count for one module and stage.
    pub fn failed(&self, module: &str, stage: &str) -> u64 {
        self.snapshots_failed
            .with_label_values(&[module, stage])
            .get()
    }
}

impl std::fmt::Debug for PersistenceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceMetrics").finish_non_exhaustive()
    }
}
