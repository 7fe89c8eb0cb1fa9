//! In-process model store
//!
//! Keeps models in a map and counts calls. Used where durability is not
//! wanted, chiefly for exercising the coordinator.

use super::{LoadedModel, ModelMetadata, ModelStore, FORMAT_VERSION};
use crate::models::{ModelState, SensorKey};
use crate::predictor::Regressor;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Map-backed store with call counters and switchable save failures
pub struct MemoryModelStore<R> {
    models: Mutex<BTreeMap<SensorKey, (ModelState<R>, DateTime<Utc>)>>,
    saves: AtomicUsize,
    loads: AtomicUsize,
    fail_saves: AtomicBool,
}

impl<R> MemoryModelStore<R> {
    pub fn new() -> Self {
        Self {
            models: Mutex::new(BTreeMap::new()),
            saves: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
            fail_saves: AtomicBool::new(false),
        }
    }

    /// Number of `save` calls so far, failed ones included
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Make every subsequent `save` fail
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.models.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R> Default for MemoryModelStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Regressor> MemoryModelStore<R> {
    /// Seed a model directly, bypassing the counters
    pub fn insert(&self, key: SensorKey, state: ModelState<R>, trained_at: DateTime<Utc>) {
        if let Ok(mut models) = self.models.lock() {
            models.insert(key, (state, trained_at));
        }
    }

    pub fn get(&self, key: &SensorKey) -> Option<(ModelState<R>, DateTime<Utc>)> {
        self.models.lock().ok().and_then(|m| m.get(key).cloned())
    }
}

impl<R: Regressor> ModelStore<R> for MemoryModelStore<R> {
    fn save(
        &self,
        key: &SensorKey,
        state: &ModelState<R>,
        trained_at: DateTime<Utc>,
    ) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves.load(Ordering::SeqCst) {
            anyhow::bail!("Simulated write failure for {}", key);
        }

        let mut stored = state.clone();
        stored.last_trained_at = Some(trained_at);
        self.models
            .lock()
            .map_err(|_| anyhow::anyhow!("Model map lock poisoned"))?
            .insert(key.clone(), (stored, trained_at));
        Ok(())
    }

    fn load(&self, key: &SensorKey) -> Result<LoadedModel<R>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let models = self
            .models
            .lock()
            .map_err(|_| anyhow::anyhow!("Model map lock poisoned"))?;
        Ok(match models.get(key) {
            Some((state, at)) => (Some(state.clone()), Some(*at)),
            None => (None, None),
        })
    }

    fn list(&self) -> Result<Vec<ModelMetadata>> {
        let models = self
            .models
            .lock()
            .map_err(|_| anyhow::anyhow!("Model map lock poisoned"))?;
        Ok(models
            .iter()
            .map(|(key, (state, at))| ModelMetadata {
                gateway_id: key.gateway_id.clone(),
                sensor_id: key.sensor_id.clone(),
                sensor_type: key.sensor_type.clone(),
                last_trained_at: Some(*at),
                model_name: state.regressor.name(),
                checksum: String::new(),
                format_version: FORMAT_VERSION,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::ScaledLinearRegression;
    use chrono::TimeZone;

    #[test]
    fn test_counts_and_failures() {
        let store = MemoryModelStore::<ScaledLinearRegression>::new();
        let key = SensorKey::new("gw", "s", "t");
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        assert_eq!(store.load(&key).unwrap().0, None);
        store.save(&key, &ModelState::new(Default::default()), at).unwrap();
        assert_eq!(store.load(&key).unwrap().1, Some(at));

        store.set_fail_saves(true);
        assert!(store.save(&key, &ModelState::new(Default::default()), at).is_err());

        assert_eq!(store.save_count(), 2);
        assert_eq!(store.load_count(), 2);
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
