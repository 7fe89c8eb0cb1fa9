//! Durable model storage
//!
//! One live artifact per sensor key plus a metadata record holding the last
//! training instant. The store is the only source of truth for whether a
//! sensor has been trained before.

mod file;
#[cfg(test)]
mod memory;

pub use file::{FileModelStore, ARTIFACT_FILE, METADATA_FILE};
#[cfg(test)]
pub use memory::MemoryModelStore;

use crate::models::{ModelState, SensorKey};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Current on-disk format
pub const FORMAT_VERSION: u32 = 1;

/// Model state and training instant as read back from the store
pub type LoadedModel<R> = (Option<ModelState<R>>, Option<DateTime<Utc>>);

/// Metadata persisted next to each artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub gateway_id: String,
    pub sensor_id: String,
    pub sensor_type: String,
    pub last_trained_at: Option<DateTime<Utc>>,
    pub model_name: String,
    /// SHA-256 of the artifact bytes, hex encoded
    pub checksum: String,
    pub format_version: u32,
}

impl ModelMetadata {
    pub fn key(&self) -> SensorKey {
        SensorKey::new(&self.gateway_id, &self.sensor_id, &self.sensor_type)
    }
}

/// Persistence contract for per-sensor models
pub trait ModelStore<R>: Send + Sync {
    /// Replace the live artifact for `key`
    fn save(&self, key: &SensorKey, state: &ModelState<R>, trained_at: DateTime<Utc>) -> Result<()>;

    /// Read back the artifact and its training instant; `(None, None)` if never saved
    fn load(&self, key: &SensorKey) -> Result<LoadedModel<R>>;

    /// Metadata of every stored model, ordered by key
    fn list(&self) -> Result<Vec<ModelMetadata>>;
}

/// Compute SHA256 checksum of data
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
