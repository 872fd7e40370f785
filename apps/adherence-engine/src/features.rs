use crate::logs::DoseEvent;
use chrono::{Datelike, NaiveDateTime, Timelike};
use std::collections::BTreeMap;

/// Adherence assumed for a weekday with no events.
pub const DEFAULT_DAY_ADHERENCE: f64 = 1.0;

pub const DAY_NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Features {
    /// Fractional hour of day (hour + minute/60) of every event with `taken_at`.
    pub hours: Vec<f64>,
    /// Weekday (0 = Monday) parallel to `hours`.
    pub weekdays: Vec<u8>,
    /// 1 for a verified dose, 0 otherwise; one entry per event.
    pub adherence: Vec<u8>,
    pub adherence_by_day: BTreeMap<u8, f64>,
    pub overall_adherence: f64,
}

impl Features {
    pub fn timestamped_count(&self) -> usize {
        self.hours.len()
    }

    pub fn day_adherence(&self, day: u8) -> f64 {
        self.adherence_by_day
            .get(&day)
            .copied()
            .unwrap_or(DEFAULT_DAY_ADHERENCE)
    }
}

pub fn fractional_hour(ts: NaiveDateTime) -> f64 {
    ts.hour() as f64 + ts.minute() as f64 / 60.0
}

pub fn weekday_index(ts: NaiveDateTime) -> u8 {
    ts.weekday().num_days_from_monday() as u8
}

pub fn day_name(day: u8) -> &'static str {
    DAY_NAMES.get(day as usize).copied().unwrap_or("?")
}

pub fn extract_features(logs: &[DoseEvent]) -> Features {
    if logs.is_empty() {
        return Features {
            overall_adherence: 1.0,
            ..Features::default()
        };
    }

    let mut hours = Vec::with_capacity(logs.len());
    let mut weekdays = Vec::with_capacity(logs.len());
    let mut adherence = Vec::with_capacity(logs.len());
    let mut per_day: [(u32, u32); 7] = [(0, 0); 7];

    for log in logs {
        let taken = u8::from(log.status.is_verified());
        adherence.push(taken);

        if let Some(taken_at) = log.taken_at {
            hours.push(fractional_hour(taken_at));
            weekdays.push(weekday_index(taken_at));
        }
        if let Some(ts) = log.effective_time() {
            let slot = &mut per_day[weekday_index(ts) as usize];
            slot.0 += u32::from(taken);
            slot.1 += 1;
        }
    }

    let adherence_by_day = per_day
        .iter()
        .enumerate()
        .map(|(day, (taken, total))| {
            let ratio = if *total == 0 {
                DEFAULT_DAY_ADHERENCE
            } else {
                *taken as f64 / *total as f64
            };
            (day as u8, ratio)
        })
        .collect();

    let verified: u32 = adherence.iter().map(|value| u32::from(*value)).sum();
    let overall_adherence = verified as f64 / adherence.len() as f64;

    Features {
        hours,
        weekdays,
        adherence,
        adherence_by_day,
        overall_adherence,
    }
}
