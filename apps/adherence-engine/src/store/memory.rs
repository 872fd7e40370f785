use super::BaselineBackend;
use crate::baseline::PatientBaseline;
use crate::engine::AnomalyResult;
use crate::error::StoreError;
use crate::logs::PatientId;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

/// Volatile backend for tests and throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    baselines: RwLock<HashMap<PatientId, PatientBaseline>>,
    detections: RwLock<HashMap<PatientId, Vec<AnomalyResult>>>,
    fail_writes: AtomicBool,
    fail_loads: RwLock<HashSet<PatientId>>,
    loads: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with [`StoreError::Unavailable`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes `load` fail with [`StoreError::Unavailable`] for one patient.
    pub fn set_fail_loads(&self, patient_id: PatientId, fail: bool) {
        let mut failing = self.fail_loads.write().unwrap_or_else(PoisonError::into_inner);
        if fail {
            failing.insert(patient_id);
        } else {
            failing.remove(&patient_id);
        }
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory backend is read-only".to_string()));
        }
        Ok(())
    }
}

impl BaselineBackend for MemoryBackend {
    fn load(&self, patient_id: PatientId) -> Result<Option<PatientBaseline>, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_loads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&patient_id)
        {
            return Err(StoreError::Unavailable(format!(
                "memory backend cannot read patient {patient_id}"
            )));
        }
        let baselines = self.baselines.read().unwrap_or_else(PoisonError::into_inner);
        Ok(baselines.get(&patient_id).cloned())
    }

    fn store(&self, baseline: &PatientBaseline) -> Result<(), StoreError> {
        self.check_writable()?;
        self.baselines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(baseline.patient_id, baseline.clone());
        Ok(())
    }

    fn patient_ids(&self) -> Result<Vec<PatientId>, StoreError> {
        let baselines = self.baselines.read().unwrap_or_else(PoisonError::into_inner);
        Ok(baselines.keys().copied().collect())
    }

    fn record_detection(&self, result: &AnomalyResult) -> Result<(), StoreError> {
        self.check_writable()?;
        self.detections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(result.patient_id)
            .or_default()
            .push(result.clone());
        Ok(())
    }

    fn latest_detection(&self, patient_id: PatientId) -> Result<Option<AnomalyResult>, StoreError> {
        let detections = self.detections.read().unwrap_or_else(PoisonError::into_inner);
        Ok(detections
            .get(&patient_id)
            .and_then(|history| history.last())
            .cloned())
    }
}
