//! ---
//! ota_section: "03-persistence-logging"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Module state storage and snapshot envelopes."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Storage bindings for update module state.
//!
//! The host owns a key-value store of opaque per-module blobs. This crate defines
//! that seam ([`ModuleStorage`]), ships in-memory and file-backed backends, and wraps
//! payloads in a versioned, hashed snapshot envelope.

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Wrapper for IO errors encountered while reading/writing state files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues, including malformed snapshots.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Reported when a snapshot fails integrity verification.
    #[error("snapshot hash mismatch")]
    HashMismatch,
    /// Reported when a snapshot was written by an unknown schema version.
    #[error("unsupported snapshot version {found} (supported: {supported})")]
    UnsupportedVersion {
        /// Version found in the envelope.
        found: u16,
        /// Version this build understands.
        supported: u16,
    },
    /// Reported for module ids that cannot be used as storage keys.
    #[error("invalid module id {0:?}")]
    InvalidKey(String),
    /// Failure reported by an external storage backend.
    #[error("storage backend error: {0}")]
    Backend(String),
    /// Wrapper for Prometheus metrics registration failures.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub mod metrics;
pub mod snapshot;
pub mod storage;

pub use metrics::PersistenceMetrics;
pub use snapshot::{decode_snapshot, encode_snapshot, Snapshot, SNAPSHOT_VERSION};
pub use storage::{FileStorage, MemoryStorage, ModuleStorage};
