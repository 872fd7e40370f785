use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub type PatientId = i64;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoseStatus {
    #[default]
    Verified,
    Missed,
    #[serde(other)]
    Unverified,
}

impl DoseStatus {
    pub fn is_verified(self) -> bool {
        matches!(self, Self::Verified)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::Missed => "missed",
            Self::Unverified => "unverified",
        }
    }
}

/// One recorded dose as handed over by the medication log layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DoseEvent {
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub taken_at: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub scheduled_time: Option<NaiveDateTime>,
    #[serde(default)]
    pub status: DoseStatus,
}

impl DoseEvent {
    pub fn taken(taken_at: NaiveDateTime) -> Self {
        Self {
            taken_at: Some(taken_at),
            scheduled_time: None,
            status: DoseStatus::Verified,
        }
    }

    pub fn missed(scheduled_time: NaiveDateTime) -> Self {
        Self {
            taken_at: None,
            scheduled_time: Some(scheduled_time),
            status: DoseStatus::Missed,
        }
    }

    pub fn with_status(mut self, status: DoseStatus) -> Self {
        self.status = status;
        self
    }

    /// Timestamp used to place the event on a calendar day.
    pub fn effective_time(&self) -> Option<NaiveDateTime> {
        self.taken_at.or(self.scheduled_time)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Str(String),
    Int(i64),
    Float(f64),
}

impl RawTimestamp {
    fn to_naive(&self) -> Option<NaiveDateTime> {
        match self {
            RawTimestamp::Str(raw) => parse_timestamp(raw),
            RawTimestamp::Int(ms) => millis_to_naive(*ms),
            RawTimestamp::Float(ms) => millis_to_naive(*ms as i64),
        }
    }
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<RawTimestamp> = Option::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(RawTimestamp::to_naive))
}

/// Parses an ISO-8601 timestamp into wall-clock time.
///
/// Offsets are honoured by keeping the local time of the given offset, so a dose
/// taken at `08:30+02:00` lands at hour 8.5. Bare dates map to midnight.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_local());
    }
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

fn millis_to_naive(ms: i64) -> Option<NaiveDateTime> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.naive_utc())
}
