use crate::baseline::PatientBaseline;
use crate::engine::AnomalyResult;
use crate::error::StoreError;
use crate::logs::PatientId;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

mod file;
mod memory;
mod sqlite;

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// Durable storage addressed by patient id.
pub trait BaselineBackend: Send + Sync {
    fn load(&self, patient_id: PatientId) -> Result<Option<PatientBaseline>, StoreError>;
    fn store(&self, baseline: &PatientBaseline) -> Result<(), StoreError>;
    fn patient_ids(&self) -> Result<Vec<PatientId>, StoreError>;
    fn record_detection(&self, result: &AnomalyResult) -> Result<(), StoreError>;
    fn latest_detection(&self, patient_id: PatientId) -> Result<Option<AnomalyResult>, StoreError>;
}

impl<T: BaselineBackend + ?Sized> BaselineBackend for Arc<T> {
    fn load(&self, patient_id: PatientId) -> Result<Option<PatientBaseline>, StoreError> {
        (**self).load(patient_id)
    }

    fn store(&self, baseline: &PatientBaseline) -> Result<(), StoreError> {
        (**self).store(baseline)
    }

    fn patient_ids(&self) -> Result<Vec<PatientId>, StoreError> {
        (**self).patient_ids()
    }

    fn record_detection(&self, result: &AnomalyResult) -> Result<(), StoreError> {
        (**self).record_detection(result)
    }

    fn latest_detection(&self, patient_id: PatientId) -> Result<Option<AnomalyResult>, StoreError> {
        (**self).latest_detection(patient_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum StoreKind {
    #[default]
    Sqlite,
    File,
    Memory,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown store kind {other:?}; expected sqlite, file or memory")),
        }
    }
}

pub fn open_backend(kind: StoreKind, data_dir: &Path) -> Result<Box<dyn BaselineBackend>, StoreError> {
    Ok(match kind {
        StoreKind::Sqlite => Box::new(SqliteBackend::open(&data_dir.join("adherence.sqlite3"))?),
        StoreKind::File => Box::new(FileBackend::open(data_dir)?),
        StoreKind::Memory => Box::new(MemoryBackend::new()),
    })
}

/// Per-patient baselines with a process-local cache over a durable backend.
pub struct BaselineStore {
    backend: Box<dyn BaselineBackend>,
    cache: RwLock<HashMap<PatientId, PatientBaseline>>,
}

impl BaselineStore {
    pub fn new(backend: impl BaselineBackend + 'static) -> Self {
        Self::from_boxed(Box::new(backend))
    }

    pub fn from_boxed(backend: Box<dyn BaselineBackend>) -> Self {
        Self {
            backend,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, patient_id: PatientId) -> Result<Option<PatientBaseline>, StoreError> {
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = cache.get(&patient_id) {
                return Ok(Some(hit.clone()));
            }
        }

        let loaded = self.backend.load(patient_id)?;
        if let Some(baseline) = &loaded {
            self.cache
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(patient_id)
                .or_insert_with(|| baseline.clone());
        }
        Ok(loaded)
    }

    /// Writes through to the backend, then the cache.
    ///
    /// The cache lock is held across the backend write so no reader in this
    /// process sees the previous baseline once `save` returns. A failed write
    /// leaves the cache as it was.
    pub fn save(&self, baseline: PatientBaseline) -> Result<(), StoreError> {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        self.backend.store(&baseline)?;
        cache.insert(baseline.patient_id, baseline);
        Ok(())
    }

    pub fn list_all(&self) -> Result<Vec<PatientId>, StoreError> {
        let mut ids = self.backend.patient_ids()?;
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    pub fn record_detection(&self, result: &AnomalyResult) -> Result<(), StoreError> {
        self.backend.record_detection(result)
    }

    pub fn latest_detection(&self, patient_id: PatientId) -> Result<Option<AnomalyResult>, StoreError> {
        self.backend.latest_detection(patient_id)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::baseline::PatientBaseline;

    pub struct XorShift(pub u64);

    impl XorShift {
        pub fn next_u64(&mut self) -> u64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            self.0
        }

        /// Uniform in [0, scale) with a full 53-bit mantissa.
        pub fn next_f64(&mut self, scale: f64) -> f64 {
            (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64 * scale
        }
    }

    pub fn assert_same_bits(left: &PatientBaseline, right: &PatientBaseline) {
        assert_eq!(left.mean_hour.to_bits(), right.mean_hour.to_bits());
        assert_eq!(left.std_hour.to_bits(), right.std_hour.to_bits());
        assert_eq!(
            left.mean_adherence_rate.to_bits(),
            right.mean_adherence_rate.to_bits()
        );
        assert_eq!(left.weekday_pattern.len(), right.weekday_pattern.len());
        for (day, rate) in &left.weekday_pattern {
            assert_eq!(rate.to_bits(), right.weekday_pattern[day].to_bits(), "day {day}");
        }
    }
}
