use crate::baseline::{PatientBaseline, Sensitivity, DEFAULT_MEAN_HOUR, MIN_STD_HOUR};
use crate::error::EngineResult;
use crate::features::{extract_features, Features};
use crate::logs::{DoseEvent, PatientId};
use crate::store::BaselineStore;
use chrono::{DateTime, Utc};
use statrs::statistics::Statistics;
use std::sync::Arc;

/// Below this many timestamped doses a baseline is kept but flagged as low confidence.
pub const MIN_CONFIDENT_SAMPLES: usize = 5;

#[derive(Clone)]
pub struct BaselineTrainer {
    store: Arc<BaselineStore>,
}

impl BaselineTrainer {
    pub fn new(store: Arc<BaselineStore>) -> Self {
        Self { store }
    }

    /// Builds a fresh baseline from `logs` and replaces whatever was stored.
    pub fn train(
        &self,
        patient_id: PatientId,
        logs: &[DoseEvent],
        sensitivity: Sensitivity,
    ) -> EngineResult<PatientBaseline> {
        let features = extract_features(logs);
        if features.timestamped_count() < MIN_CONFIDENT_SAMPLES {
            tracing::warn!(
                patient_id,
                timestamped = features.timestamped_count(),
                required = MIN_CONFIDENT_SAMPLES,
                "training baseline with too few timestamped doses; confidence is degraded"
            );
        }

        let baseline = build_baseline(patient_id, &features, sensitivity, logs.len(), Utc::now());
        self.store.save(baseline.clone())?;
        tracing::info!(
            patient_id,
            samples = baseline.sample_count,
            mean_hour = baseline.mean_hour,
            std_hour = baseline.std_hour,
            adherence = baseline.mean_adherence_rate,
            sensitivity = %baseline.sensitivity,
            "baseline trained"
        );
        Ok(baseline)
    }
}

pub fn build_baseline(
    patient_id: PatientId,
    features: &Features,
    sensitivity: Sensitivity,
    sample_count: usize,
    trained_at: DateTime<Utc>,
) -> PatientBaseline {
    let (mean_hour, std_hour) = hour_profile(&features.hours);
    PatientBaseline {
        patient_id,
        mean_hour,
        std_hour,
        mean_adherence_rate: features.overall_adherence,
        weekday_pattern: features.adherence_by_day.clone(),
        sensitivity,
        sample_count,
        trained_at,
    }
}

/// Mean and population standard deviation of dose hours, std floored at 0.5.
fn hour_profile(hours: &[f64]) -> (f64, f64) {
    let mean_hour = if hours.is_empty() {
        DEFAULT_MEAN_HOUR
    } else {
        hours.iter().mean()
    };
    let std_hour = if hours.len() < 2 {
        1.0
    } else {
        hours.iter().population_std_dev()
    };
    (mean_hour, std_hour.max(MIN_STD_HOUR))
}
