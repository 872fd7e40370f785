use super::BaselineBackend;
use crate::baseline::{PatientBaseline, Sensitivity};
use crate::engine::AnomalyResult;
use crate::error::StoreError;
use crate::logs::PatientId;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS patient_baselines (
    patient_id INTEGER PRIMARY KEY,
    mean_hour REAL NOT NULL,
    std_hour REAL NOT NULL,
    mean_adherence_rate REAL NOT NULL,
    weekday_pattern TEXT NOT NULL,
    sensitivity TEXT NOT NULL,
    sample_count INTEGER NOT NULL,
    trained_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS anomaly_detections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    patient_id INTEGER NOT NULL,
    is_anomaly INTEGER NOT NULL,
    anomaly_score REAL NOT NULL,
    anomaly_type TEXT NULL,
    detected_at TEXT NOT NULL,
    payload TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS anomaly_detections_patient_idx
    ON anomaly_detections (patient_id, id);
"#;

pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

struct BaselineRow {
    patient_id: PatientId,
    mean_hour: f64,
    std_hour: f64,
    mean_adherence_rate: f64,
    weekday_pattern: String,
    sensitivity: String,
    sample_count: i64,
    trained_at: String,
}

impl SqliteBackend {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".to_string()))?;
        f(&conn)
    }
}

impl BaselineRow {
    fn into_baseline(self) -> Result<PatientBaseline, StoreError> {
        let patient_id = self.patient_id;
        let corrupt = |reason: String| StoreError::Corrupt { patient_id, reason };

        let weekday_pattern: BTreeMap<u8, f64> = serde_json::from_str(&self.weekday_pattern)
            .map_err(|err| corrupt(format!("weekday_pattern: {err}")))?;
        let sensitivity: Sensitivity = self
            .sensitivity
            .parse()
            .map_err(|_| corrupt(format!("sensitivity {:?}", self.sensitivity)))?;
        let trained_at = DateTime::parse_from_rfc3339(&self.trained_at)
            .map_err(|err| corrupt(format!("trained_at: {err}")))?
            .with_timezone(&Utc);
        let sample_count = usize::try_from(self.sample_count)
            .map_err(|_| corrupt(format!("sample_count {}", self.sample_count)))?;

        Ok(PatientBaseline {
            patient_id,
            mean_hour: self.mean_hour,
            std_hour: self.std_hour,
            mean_adherence_rate: self.mean_adherence_rate,
            weekday_pattern,
            sensitivity,
            sample_count,
            trained_at,
        })
    }
}

impl BaselineBackend for SqliteBackend {
    fn load(&self, patient_id: PatientId) -> Result<Option<PatientBaseline>, StoreError> {
        let row = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    r#"
                    SELECT patient_id, mean_hour, std_hour, mean_adherence_rate,
                           weekday_pattern, sensitivity, sample_count, trained_at
                    FROM patient_baselines
                    WHERE patient_id = ?1
                    "#,
                    params![patient_id],
                    |row| {
                        Ok(BaselineRow {
                            patient_id: row.get(0)?,
                            mean_hour: row.get(1)?,
                            std_hour: row.get(2)?,
                            mean_adherence_rate: row.get(3)?,
                            weekday_pattern: row.get(4)?,
                            sensitivity: row.get(5)?,
                            sample_count: row.get(6)?,
                            trained_at: row.get(7)?,
                        })
                    },
                )
                .optional()?)
        })?;
        row.map(BaselineRow::into_baseline).transpose()
    }

    fn store(&self, baseline: &PatientBaseline) -> Result<(), StoreError> {
        let weekday_pattern = serde_json::to_string(&baseline.weekday_pattern)?;
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO patient_baselines (
                    patient_id, mean_hour, std_hour, mean_adherence_rate,
                    weekday_pattern, sensitivity, sample_count, trained_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT (patient_id) DO UPDATE SET
                    mean_hour = excluded.mean_hour,
                    std_hour = excluded.std_hour,
                    mean_adherence_rate = excluded.mean_adherence_rate,
                    weekday_pattern = excluded.weekday_pattern,
                    sensitivity = excluded.sensitivity,
                    sample_count = excluded.sample_count,
                    trained_at = excluded.trained_at
                "#,
                params![
                    baseline.patient_id,
                    baseline.mean_hour,
                    baseline.std_hour,
                    baseline.mean_adherence_rate,
                    weekday_pattern,
                    baseline.sensitivity.as_str(),
                    baseline.sample_count as i64,
                    baseline.trained_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    fn patient_ids(&self) -> Result<Vec<PatientId>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT patient_id FROM patient_baselines ORDER BY patient_id ASC")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, PatientId>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    fn record_detection(&self, result: &AnomalyResult) -> Result<(), StoreError> {
        let payload = serde_json::to_string(result)?;
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO anomaly_detections (
                    patient_id, is_anomaly, anomaly_score, anomaly_type, detected_at, payload
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    result.patient_id,
                    result.is_anomaly,
                    result.anomaly_score,
                    result.anomaly_type.map(|kind| kind.as_str()),
                    result.detected_at.to_rfc3339(),
                    payload,
                ],
            )?;
            Ok(())
        })
    }

    fn latest_detection(&self, patient_id: PatientId) -> Result<Option<AnomalyResult>, StoreError> {
        let payload: Option<String> = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    r#"
                    SELECT payload
                    FROM anomaly_detections
                    WHERE patient_id = ?1
                    ORDER BY id DESC
                    LIMIT 1
                    "#,
                    params![patient_id],
                    |row| row.get(0),
                )
                .optional()?)
        })?;
        payload
            .map(|raw| {
                serde_json::from_str(&raw).map_err(|err| StoreError::Corrupt {
                    patient_id,
                    reason: format!("detection payload: {err}"),
                })
            })
            .transpose()
    }
}
