//! Per-patient medication adherence baselines and anomaly detection.
//!
//! A baseline is trained from a patient's dose history (typical dose hour,
//! overall adherence, per-weekday adherence) and later compared against a
//! recent window of logs to flag unusual timing, adherence drops and
//! weekday skipping patterns.

pub mod alerts;
pub mod baseline;
pub mod batch;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod logs;
pub mod scheduler;
pub mod service;
pub mod source;
pub mod store;
pub mod trainer;

pub use baseline::{BaselineSummary, PatientBaseline, Sensitivity};
pub use engine::{AnomalyEngine, AnomalyResult, AnomalyType};
pub use error::{EngineError, EngineResult, StoreError};
pub use logs::{DoseEvent, DoseStatus, PatientId};
pub use service::{AdherenceService, ServicePolicy};
pub use store::{BaselineStore, StoreKind};
pub use trainer::BaselineTrainer;
