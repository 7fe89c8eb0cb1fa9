//! Filesystem model store
//!
//! Layout: `<root>/<gateway>/<sensor>/<type>/{model.json,metadata.json}`.
//! Every file is written to a temporary sibling, fsynced, then renamed into
//! place; the artifact goes first so metadata never points at a missing or
//! stale artifact for longer than one rename.

use super::{compute_checksum, LoadedModel, ModelMetadata, ModelStore, FORMAT_VERSION};
use crate::models::{ModelState, SensorKey};
use crate::predictor::Regressor;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Serialized model state
pub const ARTIFACT_FILE: &str = "model.json";

/// Training metadata and artifact checksum
pub const METADATA_FILE: &str = "metadata.json";

/// Stores one JSON artifact per sensor under a root directory
pub struct FileModelStore<R> {
    root: PathBuf,
    _model: PhantomData<fn() -> R>,
}

impl<R> FileModelStore<R> {
    /// Create a store rooted at `root`, creating the directory if needed
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create model directory {:?}", root))?;
        Ok(Self {
            root,
            _model: PhantomData,
        })
    }

    /// Open an existing store without creating anything
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            anyhow::bail!("Model directory not found: {:?}", root);
        }
        Ok(Self {
            root,
            _model: PhantomData,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the files for `key`
    pub fn key_dir(&self, key: &SensorKey) -> PathBuf {
        self.root
            .join(escape_segment(&key.gateway_id))
            .join(escape_segment(&key.sensor_id))
            .join(escape_segment(&key.sensor_type))
    }

    /// Metadata for `key` without reading the artifact
    pub fn metadata(&self, key: &SensorKey) -> Result<Option<ModelMetadata>> {
        Self::read_metadata(&self.key_dir(key).join(METADATA_FILE))
    }

    fn read_metadata(path: &Path) -> Result<Option<ModelMetadata>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read metadata {:?}", path));
            }
        };
        let metadata = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse metadata {:?}", path))?;
        Ok(Some(metadata))
    }

    /// Read metadata and artifact, retrying once if a save raced the read
    fn read_verified(&self, dir: &Path) -> Result<Option<(ModelMetadata, Vec<u8>)>> {
        let mut last_mismatch = None;

        for attempt in 0..2 {
            let Some(metadata) = Self::read_metadata(&dir.join(METADATA_FILE))? else {
                return Ok(None);
            };
            let artifact_path = dir.join(ARTIFACT_FILE);
            let bytes = fs::read(&artifact_path)
                .with_context(|| format!("Failed to read model artifact {:?}", artifact_path))?;

            let checksum = compute_checksum(&bytes);
            if checksum == metadata.checksum {
                return Ok(Some((metadata, bytes)));
            }

            warn!(
                path = %artifact_path.display(),
                attempt,
                expected = %metadata.checksum,
                actual = %checksum,
                "Model checksum mismatch"
            );
            last_mismatch = Some((metadata.checksum, checksum));
        }

        match last_mismatch {
            Some((expected, actual)) => Err(anyhow::anyhow!(
                "Checksum mismatch in {:?}: expected {}, got {}",
                dir,
                expected,
                actual
            )),
            None => Ok(None),
        }
    }

    fn collect_metadata(dir: &Path, depth: usize, out: &mut Vec<ModelMetadata>) -> Result<()> {
        if depth == 3 {
            if let Some(metadata) = Self::read_metadata(&dir.join(METADATA_FILE))? {
                out.push(metadata);
            }
            return Ok(());
        }

        let entries =
            fs::read_dir(dir).with_context(|| format!("Failed to list directory {:?}", dir))?;
        for entry in entries {
            let entry = entry.with_context(|| format!("Failed to list directory {:?}", dir))?;
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                Self::collect_metadata(&entry.path(), depth + 1, out)?;
            }
        }
        Ok(())
    }
}

impl<R> ModelStore<R> for FileModelStore<R>
where
    R: Regressor + Serialize + DeserializeOwned,
{
    fn save(
        &self,
        key: &SensorKey,
        state: &ModelState<R>,
        trained_at: DateTime<Utc>,
    ) -> Result<()> {
        let dir = self.key_dir(key);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create model directory {:?}", dir))?;

        let mut stored = state.clone();
        stored.last_trained_at = Some(trained_at);
        let artifact = serde_json::to_vec(&stored).context("Failed to serialize model state")?;

        let metadata = ModelMetadata {
            gateway_id: key.gateway_id.clone(),
            sensor_id: key.sensor_id.clone(),
            sensor_type: key.sensor_type.clone(),
            last_trained_at: Some(trained_at),
            model_name: state.regressor.name(),
            checksum: compute_checksum(&artifact),
            format_version: FORMAT_VERSION,
        };
        let metadata_bytes =
            serde_json::to_vec_pretty(&metadata).context("Failed to serialize model metadata")?;

        write_atomic(&dir.join(ARTIFACT_FILE), &artifact)?;
        write_atomic(&dir.join(METADATA_FILE), &metadata_bytes)?;

        info!(
            sensor = %key,
            path = %dir.display(),
            checksum = %metadata.checksum,
            size = artifact.len(),
            "Model saved"
        );
        Ok(())
    }

    fn load(&self, key: &SensorKey) -> Result<LoadedModel<R>> {
        let dir = self.key_dir(key);
        let Some((metadata, bytes)) = self.read_verified(&dir)? else {
            debug!(sensor = %key, "No stored model");
            return Ok((None, None));
        };

        if metadata.format_version != FORMAT_VERSION {
            anyhow::bail!(
                "Unsupported model format version {} in {:?}",
                metadata.format_version,
                dir
            );
        }

        let mut state: ModelState<R> = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse model artifact in {:?}", dir))?;
        state.last_trained_at = metadata.last_trained_at;

        debug!(sensor = %key, last_trained_at = ?metadata.last_trained_at, "Model loaded");
        Ok((Some(state), metadata.last_trained_at))
    }

    fn list(&self) -> Result<Vec<ModelMetadata>> {
        let mut out = Vec::new();
        Self::collect_metadata(&self.root, 0, &mut out)?;
        out.sort_by_key(|m| m.key());
        Ok(out)
    }
}

/// Write to a temp file, sync, then rename to the final path
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("json.tmp");
    let mut file = File::create(&temp_path)
        .with_context(|| format!("Failed to create temp file {:?}", temp_path))?;

    file.write_all(bytes)
        .with_context(|| format!("Failed to write {:?}", temp_path))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync {:?}", temp_path))?;

    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;
    Ok(())
}

/// Make an identifier safe as a single path segment.
///
/// Alphanumerics, `-` and `_` pass through; every other byte becomes `%XX`.
/// The empty string maps to a lone `%`, which no escaped id can produce.
pub fn escape_segment(segment: &str) -> String {
    if segment.is_empty() {
        return "%".to_string();
    }
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}
