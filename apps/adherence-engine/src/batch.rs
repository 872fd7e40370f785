use crate::engine::{AnomalyEngine, AnomalyResult};
use crate::error::EngineResult;
use crate::logs::{DoseEvent, PatientId};
use serde::Serialize;
use std::fmt::Display;

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub patient_id: PatientId,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub scanned: usize,
    pub anomalies: Vec<AnomalyResult>,
    pub failures: Vec<BatchFailure>,
}

#[derive(Clone)]
pub struct BatchRunner {
    engine: AnomalyEngine,
}

impl BatchRunner {
    pub fn new(engine: AnomalyEngine) -> Self {
        Self { engine }
    }

    /// Runs detection for every patient with a stored baseline.
    ///
    /// A patient whose logs cannot be fetched or whose detection fails is
    /// recorded in `failures` and skipped. Only failing to enumerate the
    /// store aborts the batch.
    pub fn detect_for_all<F, E>(&self, fetch_recent_logs: F) -> EngineResult<BatchReport>
    where
        F: Fn(PatientId) -> Result<Vec<DoseEvent>, E>,
        E: Display,
    {
        let patient_ids = self.engine.store().list_all()?;
        let mut report = BatchReport {
            scanned: patient_ids.len(),
            ..BatchReport::default()
        };

        for patient_id in patient_ids {
            let outcome = fetch_recent_logs(patient_id)
                .map_err(|err| err.to_string())
                .and_then(|logs| {
                    self.engine
                        .detect(patient_id, &logs)
                        .map_err(|err| err.to_string())
                });
            match outcome {
                Ok(result) if result.is_anomaly => report.anomalies.push(result),
                Ok(_) => {}
                Err(reason) => {
                    tracing::warn!(patient_id, error = %reason, "batch detection failed for patient");
                    report.failures.push(BatchFailure { patient_id, reason });
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            anomalies = report.anomalies.len(),
            failures = report.failures.len(),
            "batch detection finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::{PatientBaseline, Sensitivity};
    use crate::store::{BaselineBackend, BaselineStore, MemoryBackend};
    use chrono::{NaiveDate, NaiveDateTime, Utc};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn runner_with_patients(ids: &[PatientId]) -> BatchRunner {
        let store = Arc::new(BaselineStore::new(MemoryBackend::new()));
        for id in ids {
            store
                .save(PatientBaseline {
                    patient_id: *id,
                    mean_hour: 9.0,
                    std_hour: 1.0,
                    mean_adherence_rate: 1.0,
                    weekday_pattern: BTreeMap::new(),
                    sensitivity: Sensitivity::Medium,
                    sample_count: 20,
                    trained_at: Utc::now(),
                })
                .unwrap();
        }
        BatchRunner::new(AnomalyEngine::new(store))
    }

    #[test]
    fn fetch_failure_is_isolated_to_one_patient() {
        let runner = runner_with_patients(&[1, 2, 3, 4]);
        let report = runner
            .detect_for_all(|patient_id| match patient_id {
                2 => Err("log service timed out"),
                // patient 3 behaves normally, the rest dose at 15:00
                3 => Ok(vec![DoseEvent::taken(at(9))]),
                _ => Ok(vec![DoseEvent::taken(at(15))]),
            })
            .unwrap();

        assert_eq!(report.scanned, 4);
        let flagged: Vec<PatientId> = report.anomalies.iter().map(|r| r.patient_id).collect();
        assert_eq!(flagged, vec![1, 4]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].patient_id, 2);
        assert!(report.failures[0].reason.contains("timed out"));
    }

    #[test]
    fn detection_failure_is_isolated_to_one_patient() {
        let backend = Arc::new(MemoryBackend::new());
        for id in [1, 2, 3] {
            backend
                .store(&PatientBaseline {
                    patient_id: id,
                    mean_hour: 9.0,
                    std_hour: 1.0,
                    mean_adherence_rate: 1.0,
                    weekday_pattern: BTreeMap::new(),
                    sensitivity: Sensitivity::Medium,
                    sample_count: 20,
                    trained_at: Utc::now(),
                })
                .unwrap();
        }
        backend.set_fail_loads(2, true);
        let runner = BatchRunner::new(AnomalyEngine::new(Arc::new(BaselineStore::new(
            backend.clone(),
        ))));

        let report = runner
            .detect_for_all(|_| Ok::<_, String>(vec![DoseEvent::taken(at(15))]))
            .unwrap();

        assert_eq!(report.scanned, 3);
        let flagged: Vec<PatientId> = report.anomalies.iter().map(|r| r.patient_id).collect();
        assert_eq!(flagged, vec![1, 3]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].patient_id, 2);
        assert!(report.failures[0].reason.contains("cannot read patient 2"));
    }

    #[test]
    fn empty_windows_are_not_reported() {
        let runner = runner_with_patients(&[1]);
        let report = runner
            .detect_for_all(|_| Ok::<_, String>(Vec::new()))
            .unwrap();
        assert!(report.anomalies.is_empty());
        assert!(report.failures.is_empty());
    }

    #[test]
    fn no_baselines_yields_empty_report() {
        let runner = runner_with_patients(&[]);
        let report = runner
            .detect_for_all(|_| Ok::<_, String>(vec![DoseEvent::taken(at(15))]))
            .unwrap();
        assert_eq!(report.scanned, 0);
        assert!(report.anomalies.is_empty());
    }
}
