use crate::baseline::{round_to, BaselineSummary};
use crate::logs::PatientId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    UnusualTiming,
    AdherenceDrop,
    SkippingPattern,
}

impl AnomalyType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnusualTiming => "unusual_timing",
            Self::AdherenceDrop => "adherence_drop",
            Self::SkippingPattern => "skipping_pattern",
        }
    }
}

/// Why a detection run did not evaluate any detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoBaseline,
    NoData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipPattern {
    Weekend,
    Irregular,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Finding {
    UnusualTiming {
        expected_time: String,
        deviation_hours: f64,
        recent_hours: Vec<f64>,
    },
    AdherenceDrop {
        baseline_adherence: String,
        recent_adherence: String,
        drop: String,
    },
    SkippingPattern {
        skipped_days: Vec<String>,
        pattern: SkipPattern,
    },
}

impl Finding {
    pub fn kind(&self) -> AnomalyType {
        match self {
            Self::UnusualTiming { .. } => AnomalyType::UnusualTiming,
            Self::AdherenceDrop { .. } => AnomalyType::AdherenceDrop,
            Self::SkippingPattern { .. } => AnomalyType::SkippingPattern,
        }
    }

    pub fn alert_message(&self) -> String {
        match self {
            Self::UnusualTiming {
                expected_time,
                deviation_hours,
                ..
            } => format!(
                "Unusual medication timing: doses are usually taken around {expected_time}, \
                 recent doses deviate by {deviation_hours:.1} hours"
            ),
            Self::AdherenceDrop {
                baseline_adherence,
                recent_adherence,
                drop,
            } => format!(
                "Adherence drop: recent adherence is {recent_adherence} against a usual \
                 {baseline_adherence} ({drop} decrease)"
            ),
            Self::SkippingPattern {
                skipped_days,
                pattern,
            } => {
                let label = match pattern {
                    SkipPattern::Weekend => "weekend",
                    SkipPattern::Irregular => "irregular",
                };
                format!(
                    "Skipping pattern ({label}): doses are being missed on {}",
                    skipped_days.join(", ")
                )
            }
        }
    }
}

/// A detector that crossed its threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(serialize_with = "serialize_2dp")]
    pub score: f64,
    #[serde(flatten)]
    pub finding: Finding,
}

impl Candidate {
    pub fn kind(&self) -> AnomalyType {
        self.finding.kind()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DetectionDetails {
    Skipped {
        error: SkipReason,
    },
    Evaluated {
        primary: Option<Candidate>,
        all_anomalies: Vec<Candidate>,
        baseline: BaselineSummary,
        threshold: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub patient_id: PatientId,
    pub is_anomaly: bool,
    #[serde(serialize_with = "serialize_3dp")]
    pub anomaly_score: f64,
    pub anomaly_type: Option<AnomalyType>,
    #[serde(rename = "alert")]
    pub alert_message: String,
    pub details: DetectionDetails,
    pub detected_at: DateTime<Utc>,
}

impl AnomalyResult {
    pub fn skipped(patient_id: PatientId, reason: SkipReason) -> Self {
        let alert_message = match reason {
            SkipReason::NoBaseline => "No baseline trained for this patient",
            SkipReason::NoData => "No recent medication logs to analyse",
        };
        Self {
            patient_id,
            is_anomaly: false,
            anomaly_score: 0.0,
            anomaly_type: None,
            alert_message: alert_message.to_string(),
            details: DetectionDetails::Skipped { error: reason },
            detected_at: Utc::now(),
        }
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match &self.details {
            DetectionDetails::Skipped { error } => Some(*error),
            DetectionDetails::Evaluated { .. } => None,
        }
    }

    pub fn candidates(&self) -> &[Candidate] {
        match &self.details {
            DetectionDetails::Evaluated { all_anomalies, .. } => all_anomalies,
            DetectionDetails::Skipped { .. } => &[],
        }
    }

    pub fn primary(&self) -> Option<&Candidate> {
        match &self.details {
            DetectionDetails::Evaluated { primary, .. } => primary.as_ref(),
            DetectionDetails::Skipped { .. } => None,
        }
    }
}

fn serialize_2dp<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(round_to(*value, 2))
}

fn serialize_3dp<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(round_to(*value, 3))
}
