use super::BaselineBackend;
use crate::baseline::PatientBaseline;
use crate::engine::AnomalyResult;
use crate::error::StoreError;
use crate::logs::PatientId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// One JSON document per patient:
///
/// ```text
/// <root>/baselines/<patient_id>.json
/// <root>/detections/<patient_id>.json   (latest detection only)
/// ```
#[derive(Debug, Clone)]
pub struct FileBackend {
    baselines_dir: PathBuf,
    detections_dir: PathBuf,
}

impl FileBackend {
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        let baselines_dir = root.join("baselines");
        let detections_dir = root.join("detections");
        fs::create_dir_all(&baselines_dir)?;
        fs::create_dir_all(&detections_dir)?;
        Ok(Self {
            baselines_dir,
            detections_dir,
        })
    }

    fn baseline_path(&self, patient_id: PatientId) -> PathBuf {
        self.baselines_dir.join(format!("{patient_id}.json"))
    }

    fn detection_path(&self, patient_id: PatientId) -> PathBuf {
        self.detections_dir.join(format!("{patient_id}.json"))
    }
}

impl BaselineBackend for FileBackend {
    fn load(&self, patient_id: PatientId) -> Result<Option<PatientBaseline>, StoreError> {
        read_json(&self.baseline_path(patient_id), patient_id)
    }

    fn store(&self, baseline: &PatientBaseline) -> Result<(), StoreError> {
        write_json_atomic(&self.baseline_path(baseline.patient_id), baseline)
    }

    fn patient_ids(&self) -> Result<Vec<PatientId>, StoreError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.baselines_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<PatientId>().ok())
            else {
                tracing::debug!(path = %path.display(), "ignoring unrecognised baseline file");
                continue;
            };
            ids.push(id);
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn record_detection(&self, result: &AnomalyResult) -> Result<(), StoreError> {
        write_json_atomic(&self.detection_path(result.patient_id), result)
    }

    fn latest_detection(&self, patient_id: PatientId) -> Result<Option<AnomalyResult>, StoreError> {
        read_json(&self.detection_path(patient_id), patient_id)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path, patient_id: PatientId) -> Result<Option<T>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)?;
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|err| StoreError::Corrupt {
            patient_id,
            reason: format!("{}: {err}", path.display()),
        })
}

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Writes via a temp file unique to this call, so concurrent writers of the
/// same document never rename each other's temp file away.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp = path.with_extension(format!("json.{}-{seq}.tmp", std::process::id()));
    fs::write(&tmp, serde_json::to_string_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::Sensitivity;
    use crate::engine::SkipReason;
    use crate::store::testing::{assert_same_bits, XorShift};
    use chrono::Utc;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn baseline(patient_id: PatientId) -> PatientBaseline {
        PatientBaseline {
            patient_id,
            mean_hour: 8.123_456_789,
            std_hour: 0.612_345_678_9,
            mean_adherence_rate: 6.0 / 7.0,
            weekday_pattern: (0..7).map(|day| (day, 1.0 / (day as f64 + 1.0))).collect(),
            sensitivity: Sensitivity::High,
            sample_count: 42,
            trained_at: Utc::now(),
        }
    }

    #[test]
    fn baseline_round_trips_exactly() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        let original = baseline(17);
        backend.store(&original).unwrap();

        let reopened = FileBackend::open(dir.path()).unwrap();
        assert_eq!(reopened.load(17).unwrap(), Some(original));
        assert!(reopened.load(18).unwrap().is_none());
    }

    #[test]
    fn generated_floats_round_trip_bit_for_bit() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        let mut rng = XorShift(0x9E37_79B9_7F4A_7C15);

        for patient_id in 0..500 {
            let mut original = baseline(patient_id);
            original.mean_hour = rng.next_f64(24.0);
            original.std_hour = 0.5 + rng.next_f64(6.0);
            original.mean_adherence_rate = rng.next_f64(1.0);
            original.weekday_pattern = (0..7).map(|day| (day, rng.next_f64(1.0))).collect();

            backend.store(&original).unwrap();
            let loaded = backend.load(patient_id).unwrap().unwrap();
            assert_same_bits(&original, &loaded);
        }
    }

    #[test]
    fn concurrent_detection_writes_for_one_patient_all_succeed() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(FileBackend::open(dir.path()).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let backend = backend.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        backend
                            .record_detection(&AnomalyResult::skipped(11, SkipReason::NoData))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(backend.latest_detection(11).unwrap().is_some());
        assert_eq!(fs::read_dir(dir.path().join("detections")).unwrap().count(), 1);
    }

    #[test]
    fn patient_ids_skip_temp_and_foreign_files() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        backend.store(&baseline(3)).unwrap();
        backend.store(&baseline(1)).unwrap();
        fs::write(dir.path().join("baselines/2.json.tmp"), "{}").unwrap();
        fs::write(dir.path().join("baselines/notes.json"), "{}").unwrap();

        assert_eq!(backend.patient_ids().unwrap(), vec![1, 3]);
    }

    #[test]
    fn corrupt_baseline_is_reported() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        fs::write(dir.path().join("baselines/5.json"), "{not json").unwrap();
        assert!(matches!(
            backend.load(5),
            Err(StoreError::Corrupt { patient_id: 5, .. })
        ));
    }

    #[test]
    fn latest_detection_replaces_previous() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        backend
            .record_detection(&AnomalyResult::skipped(8, SkipReason::NoData))
            .unwrap();
        backend
            .record_detection(&AnomalyResult::skipped(8, SkipReason::NoBaseline))
            .unwrap();
        let latest = backend.latest_detection(8).unwrap().unwrap();
        assert_eq!(latest.skip_reason(), Some(SkipReason::NoBaseline));
        assert!(backend.latest_detection(9).unwrap().is_none());
    }
}
