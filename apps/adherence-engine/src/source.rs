use crate::error::{EngineError, EngineResult};
use crate::logs::{DoseEvent, PatientId};
use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Where dose logs come from when the caller does not pass them explicitly.
pub trait LogSource: Send + Sync {
    /// Events at or after `since`; events without any timestamp are always kept.
    fn fetch(&self, patient_id: PatientId, since: Option<NaiveDateTime>) -> EngineResult<Vec<DoseEvent>>;
}

fn within_window(event: &DoseEvent, since: Option<NaiveDateTime>) -> bool {
    match (since, event.effective_time()) {
        (Some(since), Some(ts)) => ts >= since,
        _ => true,
    }
}

/// Reads `<dir>/<patient_id>.json`, a JSON array of dose events.
#[derive(Debug, Clone)]
pub struct JsonDirLogSource {
    dir: PathBuf,
}

impl JsonDirLogSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, patient_id: PatientId) -> PathBuf {
        self.dir.join(format!("{patient_id}.json"))
    }
}

impl LogSource for JsonDirLogSource {
    fn fetch(&self, patient_id: PatientId, since: Option<NaiveDateTime>) -> EngineResult<Vec<DoseEvent>> {
        let path = self.path_for(patient_id);
        let mut events = read_log_file(&path).map_err(|reason| EngineError::LogSource {
            patient_id,
            reason,
        })?;
        events.retain(|event| within_window(event, since));
        Ok(events)
    }
}

pub fn read_log_file(path: &Path) -> Result<Vec<DoseEvent>, String> {
    let raw = fs::read_to_string(path).map_err(|err| format!("read {}: {err}", path.display()))?;
    serde_json::from_str(&raw).map_err(|err| format!("parse {}: {err}", path.display()))
}

impl LogSource for HashMap<PatientId, Vec<DoseEvent>> {
    fn fetch(&self, patient_id: PatientId, since: Option<NaiveDateTime>) -> EngineResult<Vec<DoseEvent>> {
        let events = self.get(&patient_id).ok_or_else(|| EngineError::LogSource {
            patient_id,
            reason: "no logs available".to_string(),
        })?;
        Ok(events
            .iter()
            .filter(|event| within_window(event, since))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn at(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    #[test]
    fn json_dir_source_filters_by_since() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("12.json"),
            r#"[
                {"taken_at": "2024-03-01T09:00:00", "status": "verified"},
                {"scheduled_time": "2024-03-06T09:00:00", "status": "missed"},
                {"status": "missed"},
                {"taken_at": "2024-03-07T08:45:00"}
            ]"#,
        )
        .unwrap();
        let source = JsonDirLogSource::new(dir.path());

        let all = source.fetch(12, None).unwrap();
        assert_eq!(all.len(), 4);

        let recent = source.fetch(12, Some(at(5))).unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent.iter().all(|event| event.effective_time().map_or(true, |ts| ts >= at(5))));
    }

    #[test]
    fn missing_file_is_a_log_source_error() {
        let dir = TempDir::new().unwrap();
        let source = JsonDirLogSource::new(dir.path());
        assert!(matches!(
            source.fetch(3, None),
            Err(EngineError::LogSource { patient_id: 3, .. })
        ));
    }

    #[test]
    fn map_source_errors_for_unknown_patient() {
        let source: HashMap<PatientId, Vec<DoseEvent>> =
            HashMap::from([(1, vec![DoseEvent::taken(at(4))])]);
        assert_eq!(source.fetch(1, Some(at(4))).unwrap().len(), 1);
        assert!(source.fetch(1, Some(at(5))).unwrap().is_empty());
        assert!(source.fetch(2, None).is_err());
    }
}
