use crate::logs::PatientId;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("baseline storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("baseline storage encoding error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("baseline database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored record for patient {patient_id} is corrupt: {reason}")]
    Corrupt { patient_id: PatientId, reason: String },
    #[error("baseline backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid sensitivity {0:?}; expected one of high, medium, low")]
    InvalidSensitivity(String),
    #[error("no baseline trained for patient {0}")]
    NoBaseline(PatientId),
    #[error("insufficient training history: {days} day(s) of logs, at least {required} required")]
    InsufficientTrainingData { days: u64, required: u64 },
    #[error("look-back window of {days} day(s) is out of range")]
    InvalidWindow { days: u64 },
    #[error("failed to load logs for patient {patient_id}: {reason}")]
    LogSource { patient_id: PatientId, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type EngineResult<T> = Result<T, EngineError>;
