use crate::baseline::{PatientBaseline, Sensitivity};
use crate::error::{EngineError, EngineResult};
use crate::features::{extract_features, Features};
use crate::logs::{DoseEvent, PatientId};
use crate::store::BaselineStore;
use chrono::Utc;
use std::sync::Arc;

pub mod detectors;
pub mod result;

pub use result::{
    AnomalyResult, AnomalyType, Candidate, DetectionDetails, Finding, SkipPattern, SkipReason,
};

#[derive(Clone)]
pub struct AnomalyEngine {
    store: Arc<BaselineStore>,
}

impl AnomalyEngine {
    pub fn new(store: Arc<BaselineStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<BaselineStore> {
        &self.store
    }

    pub fn detect(&self, patient_id: PatientId, recent_logs: &[DoseEvent]) -> EngineResult<AnomalyResult> {
        let Some(baseline) = self.store.get(patient_id)? else {
            tracing::debug!(patient_id, "detection skipped: no baseline");
            return Ok(AnomalyResult::skipped(patient_id, SkipReason::NoBaseline));
        };
        if recent_logs.is_empty() {
            tracing::debug!(patient_id, "detection skipped: no recent logs");
            return Ok(AnomalyResult::skipped(patient_id, SkipReason::NoData));
        }

        let features = extract_features(recent_logs);
        let result = evaluate(&baseline, &features);
        if let Some(kind) = result.anomaly_type {
            tracing::info!(
                patient_id,
                anomaly_type = kind.as_str(),
                score = result.anomaly_score,
                "adherence anomaly detected"
            );
        }
        Ok(result)
    }

    /// Changes the Z-score threshold of an existing baseline.
    ///
    /// The stored baseline is untouched when the level is unknown or the patient
    /// has never been trained.
    pub fn configure_sensitivity(&self, patient_id: PatientId, level: &str) -> EngineResult<PatientBaseline> {
        let sensitivity: Sensitivity = level.parse()?;
        let mut baseline = self
            .store
            .get(patient_id)?
            .ok_or(EngineError::NoBaseline(patient_id))?;

        baseline.sensitivity = sensitivity;
        self.store.save(baseline.clone())?;
        tracing::info!(patient_id, sensitivity = %sensitivity, "sensitivity reconfigured");
        Ok(baseline)
    }
}

/// Runs all detectors of `features` against `baseline`.
///
/// Candidates are evaluated timing, adherence drop, skipping; the primary is the
/// highest score, earliest detector on ties.
pub fn evaluate(baseline: &PatientBaseline, features: &Features) -> AnomalyResult {
    let threshold = baseline.threshold();

    let mut candidates: Vec<Candidate> = [
        detectors::detect_timing(features, baseline, threshold),
        detectors::detect_adherence_drop(features, baseline, threshold),
        detectors::detect_skipping(features, baseline),
    ]
    .into_iter()
    .flatten()
    .collect();
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let primary = candidates.first().cloned();
    let (anomaly_score, anomaly_type, alert_message) = match &primary {
        Some(candidate) => (
            candidate.score,
            Some(candidate.kind()),
            candidate.finding.alert_message(),
        ),
        None => (0.0, None, "No anomalies detected".to_string()),
    };

    AnomalyResult {
        patient_id: baseline.patient_id,
        is_anomaly: primary.is_some(),
        anomaly_score,
        anomaly_type,
        alert_message,
        details: DetectionDetails::Evaluated {
            primary,
            all_anomalies: candidates,
            baseline: baseline.summary(),
            threshold,
        },
        detected_at: Utc::now(),
    }
}
