//! ---
//! ota_section: "03-persistence-logging"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Versioned snapshot envelope for module state blobs."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::{PersistenceError, Result};

/// Current snapshot envelope version.
pub const SNAPSHOT_VERSION: u16 = 1;

/// A decoded snapshot together with its envelope metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    /// Schema version the snapshot was written with.
    pub version: u16,
    /// When the snapshot was written.
    pub saved_at: DateTime<Utc>,
    /// The payload.
    pub state: T,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SnapshotEnvelope {
    version: u16,
    saved_at: DateTime<Utc>,
    hash: String,
    state: Value,
}

/// Serialize `state` into a versioned, hashed envelope.
pub fn encode_snapshot<T: Serialize>(state: &T) -> Result<Vec<u8>> {
    let state = serde_json::to_value(state)?;
    let envelope = SnapshotEnvelope {
        version: SNAPSHOT_VERSION,
        saved_at: Utc::now(),
        hash: compute_hash(&state)?,
        state,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Decode an envelope produced by [`encode_snapshot`].
///
/// Unknown versions, hash mismatches, and payloads that do not match `T` are all
/// rejected; nothing is defaulted.
pub fn decode_snapshot<T: DeserializeOwned>(bytes: &[u8]) -> Result<Snapshot<T>> {
    let envelope: SnapshotEnvelope = serde_json::from_slice(bytes)?;
    if envelope.version != SNAPSHOT_VERSION {
        return Err(PersistenceError::UnsupportedVersion {
            found: envelope.version,
            supported: SNAPSHOT_VERSION,
        });
    }
    if compute_hash(&envelope.state)? != envelope.hash {
        return Err(PersistenceError::HashMismatch);
    }
    Ok(Snapshot {
        version: envelope.version,
        saved_at: envelope.saved_at,
        state: serde_json::from_value(envelope.state)?,
    })
}

fn compute_hash(state: &Value) -> Result<String> {
    let serialized = serde_json::to_vec(state)?;
    let mut hasher = Sha256::new();
    hasher.update(serialized);
    Ok(hex::encode(hasher.finalize()))
}
