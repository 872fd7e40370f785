use crate::error::EngineError;
use crate::features::DEFAULT_DAY_ADHERENCE;
use crate::logs::PatientId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const MIN_STD_HOUR: f64 = 0.5;
pub const DEFAULT_MEAN_HOUR: f64 = 9.0;

/// Z-score threshold applied to a patient's baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    High,
    #[default]
    Medium,
    Low,
}

impl Sensitivity {
    pub const ALL: [Sensitivity; 3] = [Self::High, Self::Medium, Self::Low];

    pub fn threshold(self) -> f64 {
        match self {
            Self::High => 2.0,
            Self::Medium => 2.5,
            Self::Low => 3.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sensitivity {
    type Err = EngineError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(EngineError::InvalidSensitivity(raw.to_string())),
        }
    }
}

/// Statistical profile of one patient's dose-taking behaviour.
///
/// Persisted at full precision; [`BaselineSummary`] is the rounded outward shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientBaseline {
    pub patient_id: PatientId,
    pub mean_hour: f64,
    pub std_hour: f64,
    pub mean_adherence_rate: f64,
    pub weekday_pattern: BTreeMap<u8, f64>,
    pub sensitivity: Sensitivity,
    pub sample_count: usize,
    pub trained_at: DateTime<Utc>,
}

impl PatientBaseline {
    pub fn weekday_rate(&self, day: u8) -> f64 {
        self.weekday_pattern
            .get(&day)
            .copied()
            .unwrap_or(DEFAULT_DAY_ADHERENCE)
    }

    pub fn threshold(&self) -> f64 {
        self.sensitivity.threshold()
    }

    pub fn summary(&self) -> BaselineSummary {
        BaselineSummary::from(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineSummary {
    pub patient_id: PatientId,
    pub mean_hour: f64,
    pub std_hour: f64,
    pub mean_adherence_rate: f64,
    pub weekday_pattern: BTreeMap<u8, f64>,
    pub sensitivity: Sensitivity,
    pub sample_count: usize,
    pub trained_at: DateTime<Utc>,
}

impl From<&PatientBaseline> for BaselineSummary {
    fn from(baseline: &PatientBaseline) -> Self {
        Self {
            patient_id: baseline.patient_id,
            mean_hour: round_to(baseline.mean_hour, 2),
            std_hour: round_to(baseline.std_hour, 2),
            mean_adherence_rate: round_to(baseline.mean_adherence_rate, 3),
            weekday_pattern: baseline
                .weekday_pattern
                .iter()
                .map(|(day, rate)| (*day, round_to(*rate, 3)))
                .collect(),
            sensitivity: baseline.sensitivity,
            sample_count: baseline.sample_count,
            trained_at: baseline.trained_at,
        }
    }
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
