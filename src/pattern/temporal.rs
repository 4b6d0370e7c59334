//! Temporal detection engine (§4.1): per-category event-count time series,
//! FFT dominant-frequency match, trend direction, and phase-intensity checks.

use std::collections::HashMap;

use ndarray::Array1;
use rustfft::{num_complex::Complex64, FftPlanner};
use uuid::Uuid;

use super::{EngineKind, Pattern, PatternMatch, TemporalProfile};
use crate::baseline::Trend;
use crate::event::{Event, EventCategory};

/// One bucketed count series for a single event category over the window.
struct Series {
    counts: Vec<f64>,
    interval_seconds: u64,
}

fn bucket_series(events: &[Event], category: EventCategory, interval_seconds: u64) -> Option<Series> {
    let in_category: Vec<&Event> = events.iter().filter(|e| e.category == category).collect();
    if in_category.is_empty() {
        return None;
    }
    let t0 = in_category.iter().map(|e| e.timestamp).min().unwrap();
    let t1 = in_category.iter().map(|e| e.timestamp).max().unwrap();
    let span_seconds = (t1 - t0).num_seconds().max(0) as u64;
    let bucket_count = (span_seconds / interval_seconds.max(1)) as usize + 1;

    let mut counts = vec![0.0_f64; bucket_count];
    for event in &in_category {
        let offset = (event.timestamp - t0).num_seconds().max(0) as u64;
        let idx = (offset / interval_seconds.max(1)) as usize;
        counts[idx.min(bucket_count - 1)] += 1.0;
    }
    Some(Series { counts, interval_seconds })
}

fn rolling_mean(counts: &[f64]) -> f64 {
    if counts.is_empty() {
        0.0
    } else {
        counts.iter().sum::<f64>() / counts.len() as f64
    }
}

fn rolling_variance(counts: &[f64], mean: f64) -> f64 {
    if counts.len() < 2 {
        0.0
    } else {
        counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / counts.len() as f64
    }
}

fn first_difference(counts: &[f64]) -> Vec<f64> {
    counts.windows(2).map(|w| w[1] - w[0]).collect()
}

fn trend_from_diffs(diffs: &[f64]) -> Trend {
    if diffs.is_empty() {
        return Trend::Stable;
    }
    let mean = diffs.iter().sum::<f64>() / diffs.len() as f64;
    let sign_flips = diffs.windows(2).filter(|w| w[0].signum() != w[1].signum() && w[0] != 0.0 && w[1] != 0.0).count();
    if sign_flips as f64 / diffs.len().max(1) as f64 > 0.4 {
        Trend::Volatile
    } else if mean.abs() < 1e-6 {
        Trend::Stable
    } else if mean > 0.0 {
        Trend::Increasing
    } else {
        Trend::Decreasing
    }
}

/// Dominant non-DC frequency in Hz and its relative magnitude (0-1 of the
/// total spectral energy excluding DC), computed over the bucketed series.
fn dominant_frequency(series: &Series) -> (f64, f64) {
    let n = series.counts.len();
    if n < 4 {
        return (0.0, 0.0);
    }
    let mut buffer: Vec<Complex64> = series.counts.iter().map(|c| Complex64::new(*c, 0.0)).collect();
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    fft.process(&mut buffer);

    let magnitudes: Array1<f64> = Array1::from_iter(buffer.iter().take(n / 2 + 1).map(|c| c.norm()));
    let total_energy: f64 = magnitudes.iter().skip(1).sum();
    if total_energy <= 0.0 {
        return (0.0, 0.0);
    }

    let (peak_idx, peak_mag) = magnitudes
        .iter()
        .enumerate()
        .skip(1)
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap())
        .map(|(i, m)| (i, *m))
        .unwrap_or((0, 0.0));

    let sample_rate_hz = 1.0 / series.interval_seconds.max(1) as f64;
    let frequency_hz = peak_idx as f64 * sample_rate_hz / n as f64;
    let relative_magnitude = (peak_mag / total_energy).min(1.0);
    (frequency_hz, relative_magnitude)
}

fn phase_intensity_match(counts: &[f64], mean: f64, variance: f64) -> f64 {
    if counts.is_empty() || variance <= 0.0 {
        return 0.0;
    }
    let sigma = variance.sqrt();
    let elevated = counts.iter().filter(|c| **c > mean + sigma).count();
    (elevated as f64 / counts.len() as f64).min(1.0)
}

/// Evaluates one temporal pattern against the bucketed time series for
/// whichever event category the pattern's indicators (if any) name, falling
/// back to all categories pooled together. Weighted-mean confidence over the
/// matched features, per the pattern's own feature weights (§4.1).
pub fn evaluate(pattern: &Pattern, events: &[Event]) -> Vec<PatternMatch> {
    let Some(profile) = &pattern.temporal_profile else { return Vec::new() };
    if events.is_empty() {
        return Vec::new();
    }

    let mut per_category: HashMap<EventCategory, Series> = HashMap::new();
    for category in [
        EventCategory::Network,
        EventCategory::Process,
        EventCategory::UserActivity,
        EventCategory::File,
        EventCategory::Email,
        EventCategory::Auth,
        EventCategory::Generic,
    ] {
        if let Some(series) = bucket_series(events, category, pattern.temporal_interval_seconds) {
            per_category.insert(category, series);
        }
    }

    let mut matches = Vec::new();
    for (_, series) in per_category {
        if series.counts.len() < 4 {
            continue;
        }
        let mean = rolling_mean(&series.counts);
        let variance = rolling_variance(&series.counts, mean);
        let diffs = first_difference(&series.counts);
        let trend = trend_from_diffs(&diffs);
        let (frequency_hz, frequency_strength) = dominant_frequency(&series);
        let phase_match = phase_intensity_match(&series.counts, mean, variance);

        let freq_matched = (frequency_hz - profile.expected_dominant_frequency_hz).abs() <= profile.frequency_tolerance_hz;
        let trend_matched = trend == profile.expected_trend;

        let total_weight = profile.frequency_weight + profile.trend_weight + profile.phase_weight;
        if total_weight <= 0.0 {
            continue;
        }
        let mut score = 0.0;
        if freq_matched {
            score += profile.frequency_weight * frequency_strength;
        }
        if trend_matched {
            score += profile.trend_weight;
        }
        score += profile.phase_weight * phase_match;
        let confidence = (score / total_weight).min(1.0);

        if confidence < pattern.confidence_threshold {
            continue;
        }

        let t0 = events.iter().map(|e| e.timestamp).min().unwrap();
        let t1 = events.iter().map(|e| e.timestamp).max().unwrap();
        let evidence: Vec<Uuid> = events.iter().map(|e| e.id).collect();

        matches.push(PatternMatch {
            match_id: Uuid::new_v4(),
            pattern_id: pattern.id.clone(),
            pattern_version: pattern.version,
            confidence,
            evidence,
            completion: 1.0,
            predicted_next_stages: Vec::new(),
            contributing_engines: vec![EngineKind::Temporal],
            t0,
            t1,
            behavioral_anomaly_score: None,
            risk_contribution: confidence * pattern.severity_weight * 10.0,
        });
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event_at(category: EventCategory, seconds: i64) -> Event {
        Event {
            id: Uuid::new_v4(),
            timestamp: Utc::now() + chrono::Duration::seconds(seconds),
            category,
            principal_id: None,
            severity: 0.1,
            confidence: 0.9,
            risk_score: 0.0,
            payload: crate::event::EventPayload::Generic { fields: vec![] },
        }
    }

    #[test]
    fn no_temporal_profile_yields_no_matches() {
        let pattern = Pattern {
            id: "t1".into(),
            version: 1,
            name: "t1".into(),
            pattern_type: super::super::PatternType::Temporal,
            severity_weight: 1.0,
            confidence_threshold: 0.1,
            stages: vec![],
            indicators: vec![],
            behavioral_threshold: 50.0,
            temporal_interval_seconds: 60,
            temporal_profile: None,
        };
        let events: Vec<Event> = (0..10).map(|i| event_at(EventCategory::Network, i * 60)).collect();
        assert!(evaluate(&pattern, &events).is_empty());
    }

    #[test]
    fn sparse_series_below_minimum_buckets_is_skipped_b3() {
        let pattern = Pattern {
            id: "t2".into(),
            version: 1,
            name: "t2".into(),
            pattern_type: super::super::PatternType::Temporal,
            severity_weight: 1.0,
            confidence_threshold: 0.1,
            stages: vec![],
            indicators: vec![],
            behavioral_threshold: 50.0,
            temporal_interval_seconds: 60,
            temporal_profile: Some(TemporalProfile {
                expected_dominant_frequency_hz: 0.01,
                frequency_tolerance_hz: 0.01,
                expected_trend: Trend::Stable,
                frequency_weight: 0.4,
                trend_weight: 0.3,
                phase_weight: 0.3,
            }),
        };
        let events = vec![event_at(EventCategory::Network, 0), event_at(EventCategory::Network, 60)];
        assert!(evaluate(&pattern, &events).is_empty());
    }
}
