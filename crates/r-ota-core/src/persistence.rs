//! ---
//! ota_section: "01-core-functionality"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Bridge between module state and the host's state storage."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use std::sync::Arc;

use r_ota_persistence::{
    decode_snapshot, encode_snapshot, ModuleStorage, PersistenceMetrics, Result, Snapshot,
};
use tracing::debug;

use crate::state::ModuleState;

/// Serializes [`ModuleState`] to and from the storage slot of one module.
///
/// Holds no copy of the state; the module owns it.
pub struct StatePersistence {
    module_id: String,
    storage: Arc<dyn ModuleStorage>,
    metrics: Option<Arc<PersistenceMetrics>>,
}

impl StatePersistence {
    /// Bind the adapter to `module_id` in `storage`.
    pub fn new(module_id: impl Into<String>, storage: Arc<dyn ModuleStorage>) -> Self {
        Self {
            module_id: module_id.into(),
            storage,
            metrics: None,
        }
    }

    /// Storage key this adapter reads and writes.
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// Attach metrics collection.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<PersistenceMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Read the last durable state. `None` when nothing was ever saved.
    pub fn load(&self) -> Result<Option<ModuleState>> {
        let outcome = self.storage.get_module_state(&self.module_id).and_then(|bytes| {
            if bytes.is_empty() {
                return Ok(None);
            }
            decode_snapshot::<ModuleState>(&bytes).map(Some)
        });
        match &outcome {
            Ok(Some(_)) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_snapshot_loaded(&self.module_id);
                }
            }
            Ok(None) => debug!(module = %self.module_id, "no stored module state"),
            Err(_) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_snapshot_failed(&self.module_id, "load");
                }
            }
        }
        Ok(outcome?.map(|snapshot: Snapshot<ModuleState>| snapshot.state))
    }

    /// Replace the durable state with `state`.
    pub fn save(&self, state: &ModuleState) -> Result<()> {
        let outcome = encode_snapshot(state)
            .and_then(|bytes| self.storage.set_module_state(&self.module_id, &bytes));
        if let Some(metrics) = &self.metrics {
            match outcome {
                Ok(()) => metrics.record_snapshot_saved(&self.module_id),
                Err(_) => metrics.record_snapshot_failed(&self.module_id, "save"),
            }
        }
        outcome
    }
}

impl std::fmt::Debug for StatePersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatePersistence")
            .field("module_id", &self.module_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use r_ota_persistence::{MemoryStorage, PersistenceError};

    use super::*;
    use crate::state::UpdatePhase;

    fn reachable_states() -> Vec<ModuleState> {
        let mut states = Vec::new();
        for phase in [UpdatePhase::Idle, UpdatePhase::Prepared, UpdatePhase::Updated] {
            for (vendor, pending) in [("", ""), ("1.0.0", ""), ("1.0.0", "2.0.0"), ("2.0.0", "1.0.0")] {
                states.push(ModuleState {
                    phase,
                    vendor_version: vendor.into(),
                    pending_version: pending.into(),
                });
            }
        }
        states
    }

    #[test]
    fn every_reachable_state_round_trips() {
        let storage = Arc::new(MemoryStorage::new());
        let persistence = StatePersistence::new("ecu", storage);
        for state in reachable_states() {
            persistence.save(&state).unwrap();
            assert_eq!(persistence.load().unwrap(), Some(state));
        }
    }

    #[test]
    fn empty_slot_loads_nothing() {
        let persistence = StatePersistence::new("ecu", Arc::new(MemoryStorage::new()));
        assert_eq!(persistence.load().unwrap(), None);
    }

    #[test]
    fn legacy_unversioned_blob_is_rejected() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert(
            "ecu",
            br#"{"state":1,"vendorVersion":"1.0","pendingVersion":"2.0"}"#.to_vec(),
        );
        let persistence = StatePersistence::new("ecu", storage);
        assert!(matches!(persistence.load(), Err(PersistenceError::Json(_))));
    }

    #[test]
    fn modules_do_not_share_slots() {
        let storage: Arc<MemoryStorage> = Arc::new(MemoryStorage::new());
        let a = StatePersistence::new("a", storage.clone());
        let b = StatePersistence::new("b", storage);
        a.save(&ModuleState::idle("1.0")).unwrap();
        assert_eq!(b.load().unwrap(), None);
    }
}
