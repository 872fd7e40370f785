use crate::alerts::AlertSink;
use crate::baseline::{BaselineSummary, Sensitivity};
use crate::batch::{BatchReport, BatchRunner};
use crate::engine::{AnomalyEngine, AnomalyResult};
use crate::error::{EngineError, EngineResult};
use crate::logs::{DoseEvent, PatientId};
use crate::source::LogSource;
use crate::store::BaselineStore;
use crate::trainer::BaselineTrainer;
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Caller-side rules layered on top of the detector.
#[derive(Debug, Clone)]
pub struct ServicePolicy {
    pub default_sensitivity: Sensitivity,
    pub min_history_days: u64,
    pub training_window_days: u64,
    pub recent_window_days: u64,
}

impl Default for ServicePolicy {
    fn default() -> Self {
        Self {
            default_sensitivity: Sensitivity::Medium,
            min_history_days: 7,
            training_window_days: 30,
            recent_window_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryView {
    pub baseline: BaselineSummary,
    pub latest_detection: Option<AnomalyResult>,
}

/// Entry point for request handlers and jobs: train, detect, history,
/// configure and batch detection over one shared store.
pub struct AdherenceService {
    store: Arc<BaselineStore>,
    trainer: BaselineTrainer,
    engine: AnomalyEngine,
    batch: BatchRunner,
    sink: Arc<dyn AlertSink>,
    policy: ServicePolicy,
}

impl AdherenceService {
    pub fn new(store: Arc<BaselineStore>, sink: Arc<dyn AlertSink>, policy: ServicePolicy) -> Self {
        let engine = AnomalyEngine::new(store.clone());
        Self {
            trainer: BaselineTrainer::new(store.clone()),
            batch: BatchRunner::new(engine.clone()),
            engine,
            store,
            sink,
            policy,
        }
    }

    pub fn policy(&self) -> &ServicePolicy {
        &self.policy
    }

    pub fn train(
        &self,
        patient_id: PatientId,
        logs: &[DoseEvent],
        sensitivity: Option<&str>,
    ) -> EngineResult<BaselineSummary> {
        let sensitivity = match sensitivity {
            Some(raw) => raw.parse()?,
            None => self.policy.default_sensitivity,
        };
        let days = history_days(logs);
        if days < self.policy.min_history_days {
            return Err(EngineError::InsufficientTrainingData {
                days,
                required: self.policy.min_history_days,
            });
        }
        Ok(self.trainer.train(patient_id, logs, sensitivity)?.summary())
    }

    pub fn train_from_source(
        &self,
        patient_id: PatientId,
        source: &dyn LogSource,
        sensitivity: Option<&str>,
        now: NaiveDateTime,
    ) -> EngineResult<BaselineSummary> {
        let since = window_start(now, self.policy.training_window_days)?;
        let logs = source.fetch(patient_id, Some(since))?;
        self.train(patient_id, &logs, sensitivity)
    }

    /// Detects, records the outcome, and hands anomalies to the alert sink.
    pub fn detect(&self, patient_id: PatientId, logs: &[DoseEvent]) -> EngineResult<AnomalyResult> {
        let result = self.engine.detect(patient_id, logs)?;
        if result.skip_reason().is_none() {
            self.store.record_detection(&result)?;
        }
        if result.is_anomaly {
            self.sink.dispatch(&result);
        }
        Ok(result)
    }

    pub fn detect_from_source(
        &self,
        patient_id: PatientId,
        source: &dyn LogSource,
        now: NaiveDateTime,
    ) -> EngineResult<AnomalyResult> {
        let logs = source.fetch(patient_id, Some(self.recent_since(now)?))?;
        self.detect(patient_id, &logs)
    }

    pub fn history(&self, patient_id: PatientId) -> EngineResult<HistoryView> {
        let baseline = self
            .store
            .get(patient_id)?
            .ok_or(EngineError::NoBaseline(patient_id))?;
        Ok(HistoryView {
            baseline: baseline.summary(),
            latest_detection: self.store.latest_detection(patient_id)?,
        })
    }

    pub fn configure(&self, patient_id: PatientId, level: &str) -> EngineResult<BaselineSummary> {
        Ok(self.engine.configure_sensitivity(patient_id, level)?.summary())
    }

    pub fn batch_detect(&self, source: &dyn LogSource, now: NaiveDateTime) -> EngineResult<BatchReport> {
        let since = self.recent_since(now)?;
        let report = self
            .batch
            .detect_for_all(|patient_id| source.fetch(patient_id, Some(since)))?;
        for result in &report.anomalies {
            if let Err(err) = self.store.record_detection(result) {
                tracing::warn!(patient_id = result.patient_id, error = %err, "failed to record batch detection");
            }
            self.sink.dispatch(result);
        }
        Ok(report)
    }

    fn recent_since(&self, now: NaiveDateTime) -> EngineResult<NaiveDateTime> {
        window_start(now, self.policy.recent_window_days)
    }
}

/// Start of a look-back window of `days` ending at `now`.
fn window_start(now: NaiveDateTime, days: u64) -> EngineResult<NaiveDateTime> {
    i64::try_from(days)
        .ok()
        .and_then(TimeDelta::try_days)
        .and_then(|span| now.checked_sub_signed(span))
        .ok_or(EngineError::InvalidWindow { days })
}

/// Distinct calendar days covered by the events' timestamps.
pub fn history_days(logs: &[DoseEvent]) -> u64 {
    let days: BTreeSet<NaiveDate> = logs
        .iter()
        .filter_map(DoseEvent::effective_time)
        .map(|ts| ts.date())
        .collect();
    days.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::ChannelAlertSink;
    use crate::engine::{AnomalyType, SkipReason};
    use crate::store::MemoryBackend;
    use chrono::NaiveDate;
    use std::collections::HashMap;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn week_of_morning_doses() -> Vec<DoseEvent> {
        (4..=10)
            .flat_map(|day| [DoseEvent::taken(at(day, 8)), DoseEvent::taken(at(day, 9))])
            .collect()
    }

    fn service() -> (AdherenceService, tokio::sync::mpsc::UnboundedReceiver<AnomalyResult>) {
        let (sink, rx) = ChannelAlertSink::channel();
        let store = Arc::new(BaselineStore::new(MemoryBackend::new()));
        (
            AdherenceService::new(store, Arc::new(sink), ServicePolicy::default()),
            rx,
        )
    }

    #[test]
    fn train_rejects_short_history() {
        let (service, _rx) = service();
        let logs: Vec<DoseEvent> = (4..=8).map(|day| DoseEvent::taken(at(day, 8))).collect();
        assert!(matches!(
            service.train(1, &logs, None),
            Err(EngineError::InsufficientTrainingData { days: 5, required: 7 })
        ));
        assert!(matches!(service.history(1), Err(EngineError::NoBaseline(1))));
    }

    #[test]
    fn train_rejects_unknown_sensitivity() {
        let (service, _rx) = service();
        assert!(matches!(
            service.train(1, &week_of_morning_doses(), Some("maximum")),
            Err(EngineError::InvalidSensitivity(_))
        ));
    }

    #[test]
    fn detect_records_and_dispatches_anomalies() {
        let (service, mut rx) = service();
        let summary = service.train(1, &week_of_morning_doses(), Some("high")).unwrap();
        assert_eq!(summary.sensitivity, Sensitivity::High);
        assert_eq!(summary.sample_count, 14);

        let result = service.detect(1, &[DoseEvent::taken(at(11, 20))]).unwrap();
        assert_eq!(result.anomaly_type, Some(AnomalyType::UnusualTiming));
        assert_eq!(rx.try_recv().unwrap().patient_id, 1);

        let history = service.history(1).unwrap();
        let latest = history.latest_detection.unwrap();
        assert!(latest.is_anomaly);
    }

    #[test]
    fn skipped_detections_are_not_recorded() {
        let (service, mut rx) = service();
        let result = service.detect(5, &[DoseEvent::taken(at(4, 9))]).unwrap();
        assert_eq!(result.skip_reason(), Some(SkipReason::NoBaseline));
        assert!(rx.try_recv().is_err());

        service.train(5, &week_of_morning_doses(), None).unwrap();
        service.detect(5, &[]).unwrap();
        assert!(service.history(5).unwrap().latest_detection.is_none());
    }

    #[test]
    fn batch_detect_uses_recent_window_and_dispatches() {
        let (service, mut rx) = service();
        service.train(1, &week_of_morning_doses(), None).unwrap();
        service.train(2, &week_of_morning_doses(), None).unwrap();

        let mut late = week_of_morning_doses();
        late.push(DoseEvent::taken(at(20, 22)));
        let source: HashMap<PatientId, Vec<DoseEvent>> = HashMap::from([(1, late)]);

        let report = service.batch_detect(&source, at(21, 0)).unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.anomalies.len(), 1);
        assert_eq!(report.anomalies[0].patient_id, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].patient_id, 2);
        assert_eq!(rx.try_recv().unwrap().patient_id, 1);
    }

    #[test]
    fn configure_returns_updated_summary() {
        let (service, _rx) = service();
        service.train(3, &week_of_morning_doses(), None).unwrap();
        let summary = service.configure(3, "Low").unwrap();
        assert_eq!(summary.sensitivity, Sensitivity::Low);
        assert!(matches!(service.configure(4, "low"), Err(EngineError::NoBaseline(4))));
    }

    #[test]
    fn oversized_windows_are_errors_not_panics() {
        let (sink, _rx) = ChannelAlertSink::channel();
        let store = Arc::new(BaselineStore::new(MemoryBackend::new()));
        let service = AdherenceService::new(
            store,
            Arc::new(sink),
            ServicePolicy {
                training_window_days: u64::MAX,
                recent_window_days: 200_000_000,
                ..ServicePolicy::default()
            },
        );
        let source: HashMap<PatientId, Vec<DoseEvent>> =
            HashMap::from([(1, week_of_morning_doses())]);

        assert!(matches!(
            service.train_from_source(1, &source, None, at(11, 0)),
            Err(EngineError::InvalidWindow { days: u64::MAX })
        ));
        assert!(matches!(
            service.detect_from_source(1, &source, at(11, 0)),
            Err(EngineError::InvalidWindow { days: 200_000_000 })
        ));
        assert!(matches!(
            service.batch_detect(&source, at(11, 0)),
            Err(EngineError::InvalidWindow { .. })
        ));
        assert_eq!(window_start(at(11, 0), 7).unwrap(), at(4, 0));
    }

    #[test]
    fn history_days_counts_distinct_dates() {
        let logs = vec![
            DoseEvent::taken(at(4, 8)),
            DoseEvent::taken(at(4, 20)),
            DoseEvent::missed(at(6, 8)),
            DoseEvent::default(),
        ];
        assert_eq!(history_days(&logs), 2);
    }
}
