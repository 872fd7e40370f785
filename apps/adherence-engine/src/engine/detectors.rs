use super::result::{Candidate, Finding, SkipPattern};
use crate::baseline::{round_to, PatientBaseline};
use crate::features::{day_name, Features};

const MIN_DROP_SAMPLES: usize = 3;
const SKIP_BASELINE_FLOOR: f64 = 0.5;
const SKIP_RECENT_CEILING: f64 = 0.3;
const SKIP_SCORE_PER_DAY: f64 = 1.5;
const WEEKEND_DAYS: [u8; 2] = [5, 6];

/// Minimum relative adherence drop that counts as an anomaly.
///
/// Shares the Z-score knob with the timing detector, so a lower Z threshold
/// (higher sensitivity) also demands a smaller drop.
pub fn adherence_drop_threshold(z_threshold: f64) -> f64 {
    0.15 + 0.05 * z_threshold
}

/// `HH:MM` rendering of a fractional hour, minutes truncated.
pub fn format_hour(hour: f64) -> String {
    let whole = hour.floor();
    let minutes = ((hour - whole) * 60.0).floor() as u32;
    format!("{:02}:{:02}", (whole as i64).rem_euclid(24), minutes.min(59))
}

fn percent(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}

pub fn detect_timing(
    features: &Features,
    baseline: &PatientBaseline,
    threshold: f64,
) -> Option<Candidate> {
    let max_z = features
        .hours
        .iter()
        .map(|hour| ((hour - baseline.mean_hour) / baseline.std_hour).abs())
        .fold(None, |acc: Option<f64>, z| Some(acc.map_or(z, |best| best.max(z))))?;

    if max_z <= threshold {
        return None;
    }

    let tail_start = features.hours.len().saturating_sub(3);
    Some(Candidate {
        score: max_z,
        finding: Finding::UnusualTiming {
            expected_time: format_hour(baseline.mean_hour),
            deviation_hours: round_to(max_z * baseline.std_hour, 2),
            recent_hours: features.hours[tail_start..]
                .iter()
                .map(|hour| round_to(*hour, 1))
                .collect(),
        },
    })
}

pub fn detect_adherence_drop(
    features: &Features,
    baseline: &PatientBaseline,
    threshold: f64,
) -> Option<Candidate> {
    if features.adherence.len() < MIN_DROP_SAMPLES {
        return None;
    }
    let baseline_rate = baseline.mean_adherence_rate;
    if baseline_rate <= 0.0 {
        return None;
    }

    let recent_rate = features.overall_adherence;
    let drop = (baseline_rate - recent_rate) / baseline_rate;
    if drop <= adherence_drop_threshold(threshold) {
        return None;
    }

    Some(Candidate {
        score: drop * 10.0,
        finding: Finding::AdherenceDrop {
            baseline_adherence: percent(baseline_rate),
            recent_adherence: percent(recent_rate),
            drop: percent(drop),
        },
    })
}

pub fn detect_skipping(features: &Features, baseline: &PatientBaseline) -> Option<Candidate> {
    let skipped: Vec<u8> = features
        .adherence_by_day
        .iter()
        .filter(|(day, recent)| {
            baseline.weekday_rate(**day) > SKIP_BASELINE_FLOOR && **recent < SKIP_RECENT_CEILING
        })
        .map(|(day, _)| *day)
        .collect();

    if skipped.is_empty() {
        return None;
    }

    let pattern = if skipped.iter().all(|day| WEEKEND_DAYS.contains(day)) {
        SkipPattern::Weekend
    } else {
        SkipPattern::Irregular
    };

    Some(Candidate {
        score: skipped.len() as f64 * SKIP_SCORE_PER_DAY,
        finding: Finding::SkippingPattern {
            skipped_days: skipped.iter().map(|day| day_name(*day).to_string()).collect(),
            pattern,
        },
    })
}
