//! Sequence detection engine (§4.1): ordered-stage rule evaluation with
//! per-stage confidence renormalization.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use super::{EngineKind, Pattern, PatternMatch, PredictedStage};
use crate::event::Event;

const GAMMA: f64 = 0.5;

#[derive(Debug, Default)]
pub struct SequenceEngineStats {
    pub stage_errors: AtomicU64,
}

#[derive(Clone)]
struct Partial {
    stage_reached: usize,
    evidence: Vec<Uuid>,
    predicate_confidence_product: f64,
    transition_product: f64,
    t0: DateTime<Utc>,
    t1: DateTime<Utc>,
}

fn transition_probability(pattern: &Pattern, from_stage: usize, to_stage: usize) -> f64 {
    pattern.stages[from_stage]
        .transitions
        .iter()
        .find(|(s, _)| *s == to_stage)
        .map(|(_, p)| *p)
        .unwrap_or(1.0)
}

fn finalize(pattern: &Pattern, partial: &Partial) -> Option<PatternMatch> {
    let stages_total = pattern.stages.len().max(1) as f64;
    let completion = (partial.stage_reached + 1) as f64 / stages_total;
    let raw = partial.predicate_confidence_product * partial.transition_product;
    let confidence = raw * completion.powf(GAMMA);

    if confidence < pattern.confidence_threshold {
        return None;
    }

    let predicted_next_stages = if partial.stage_reached + 1 < pattern.stages.len() {
        let next = partial.stage_reached + 1;
        let stage = &pattern.stages[next];
        vec![PredictedStage {
            stage: next,
            probability: transition_probability(pattern, partial.stage_reached, next),
            expected_time: partial.t1 + chrono::Duration::seconds(stage.typical_lag_seconds),
        }]
    } else {
        Vec::new()
    };

    Some(PatternMatch {
        match_id: Uuid::new_v4(),
        pattern_id: pattern.id.clone(),
        pattern_version: pattern.version,
        confidence,
        evidence: partial.evidence.clone(),
        completion: completion.min(1.0),
        predicted_next_stages,
        contributing_engines: vec![EngineKind::Sequence],
        t0: partial.t0,
        t1: partial.t1,
        behavioral_anomaly_score: None,
        risk_contribution: pattern.severity_weight * confidence * 10.0,
    })
}

/// Evaluates one sequential pattern against a pre-sorted event batch,
/// returning every partial/complete candidate whose renormalized confidence
/// already clears the pattern's own `confidence_threshold` (§3 invariant).
/// Deadline is checked between events so a slow pattern degrades to
/// `truncated` rather than blocking the whole call (§5).
pub fn evaluate_pattern(
    pattern: &Pattern,
    events: &[Event],
    deadline: Instant,
    stats: &SequenceEngineStats,
) -> (Vec<PatternMatch>, bool) {
    if pattern.stages.is_empty() {
        return (Vec::new(), false);
    }

    let mut partials: Vec<Partial> = Vec::new();
    let mut truncated = false;

    for event in events {
        if Instant::now() >= deadline {
            truncated = true;
            break;
        }

        let mut extended = Vec::new();
        let mut was_extended = vec![false; partials.len()];
        for (i, partial) in partials.iter().enumerate() {
            let next_idx = partial.stage_reached + 1;
            if next_idx >= pattern.stages.len() {
                continue;
            }
            let stage = &pattern.stages[next_idx];
            match stage.predicate.matches(event) {
                Ok(true) => {
                    let gap = (event.timestamp - partial.t1).num_seconds();
                    if gap >= stage.lag_min_seconds && gap <= stage.lag_max_seconds {
                        let mut next = partial.clone();
                        next.stage_reached = next_idx;
                        next.evidence.push(event.id);
                        next.predicate_confidence_product *= stage.predicate_confidence;
                        next.transition_product *= transition_probability(pattern, partial.stage_reached, next_idx);
                        next.t1 = event.timestamp;
                        extended.push(next);
                        was_extended[i] = true;
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    stats.stage_errors.fetch_add(1, Ordering::Relaxed);
                    debug!(pattern = %pattern.id, stage = next_idx, error = %e, "stage predicate failed, discarding partial");
                }
            }
        }
        // A partial that advances is replaced by its extension rather than
        // kept alongside it, so the same lineage is never double-finalized
        // at two different completion points (§4.1 S2).
        let mut kept: Vec<Partial> = partials
            .into_iter()
            .zip(was_extended)
            .filter(|(_, extended)| !extended)
            .map(|(p, _)| p)
            .collect();
        kept.extend(extended);
        partials = kept;

        let stage0 = &pattern.stages[0];
        match stage0.predicate.matches(event) {
            Ok(true) => partials.push(Partial {
                stage_reached: 0,
                evidence: vec![event.id],
                predicate_confidence_product: stage0.predicate_confidence,
                transition_product: 1.0,
                t0: event.timestamp,
                t1: event.timestamp,
            }),
            Ok(false) => {}
            Err(e) => {
                stats.stage_errors.fetch_add(1, Ordering::Relaxed);
                debug!(pattern = %pattern.id, stage = 0, error = %e, "start predicate failed");
            }
        }
    }

    // S2 tie-break: when two partials share the same final event, keep the
    // highest-confidence one.
    let mut by_final_event: std::collections::HashMap<Uuid, PatternMatch> = std::collections::HashMap::new();
    for partial in &partials {
        if let Some(m) = finalize(pattern, partial) {
            let final_event = *m.evidence.last().unwrap();
            match by_final_event.get(&final_event) {
                Some(existing) if existing.confidence >= m.confidence => {}
                _ => {
                    by_final_event.insert(final_event, m);
                }
            }
        }
    }

    (by_final_event.into_values().collect(), truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{AuthOutcome, EventCategory, EventPayload};
    use crate::pattern::{EventPredicate, PatternType, SequenceStage, StageRole};
    use std::time::Duration;

    fn event(cat: EventCategory, ts: DateTime<Utc>) -> Event {
        Event {
            id: Uuid::new_v4(),
            timestamp: ts,
            category: cat,
            principal_id: None,
            severity: 0.5,
            confidence: 0.9,
            risk_score: 0.0,
            payload: match cat {
                EventCategory::Network => EventPayload::Network {
                    source_ip: "10.0.0.1".into(),
                    dest_ip: "10.0.0.2".into(),
                    dest_port: 443,
                    protocol: "tcp".into(),
                    bytes_transferred: 100,
                },
                _ => EventPayload::Process {
                    process_name: "x".into(),
                    command_line: "x".into(),
                    parent_process: None,
                    pid: 1,
                },
            },
        }
    }

    fn apt_pattern() -> Pattern {
        Pattern {
            id: "apt-1".into(),
            version: 1,
            name: "APT sequence".into(),
            pattern_type: PatternType::Sequential,
            severity_weight: 1.0,
            confidence_threshold: 0.1,
            stages: vec![
                SequenceStage {
                    index: 0,
                    name: "recon".into(),
                    predicate: EventPredicate::Category(EventCategory::Network),
                    predicate_confidence: 0.9,
                    lag_min_seconds: 0,
                    lag_max_seconds: 300,
                    typical_lag_seconds: 100,
                    role: StageRole::Start,
                    transitions: vec![(1, 0.9)],
                },
                SequenceStage {
                    index: 1,
                    name: "exploit".into(),
                    predicate: EventPredicate::Category(EventCategory::Process),
                    predicate_confidence: 0.9,
                    lag_min_seconds: 0,
                    lag_max_seconds: 600,
                    typical_lag_seconds: 200,
                    role: StageRole::Mid,
                    transitions: vec![(2, 0.9)],
                },
                SequenceStage {
                    index: 2,
                    name: "exec".into(),
                    predicate: EventPredicate::Category(EventCategory::Process),
                    predicate_confidence: 0.9,
                    lag_min_seconds: 0,
                    lag_max_seconds: 900,
                    typical_lag_seconds: 300,
                    role: StageRole::End,
                    transitions: vec![],
                },
            ],
            indicators: vec![],
            behavioral_threshold: 50.0,
            temporal_interval_seconds: 60,
            temporal_profile: None,
        }
    }

    #[test]
    fn scenario_s1_full_sequential_match() {
        let pattern = apt_pattern();
        let t0 = Utc::now();
        let e1 = event(EventCategory::Network, t0 + chrono::Duration::seconds(1000));
        let e2 = event(EventCategory::Process, t0 + chrono::Duration::seconds(1200));
        let e3 = event(EventCategory::Process, t0 + chrono::Duration::seconds(1500));
        let events = vec![e1.clone(), e2.clone(), e3.clone()];

        let stats = SequenceEngineStats::default();
        let (matches, truncated) =
            evaluate_pattern(&pattern, &events, Instant::now() + Duration::from_secs(5), &stats);

        assert!(!truncated);
        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!(m.completion, 1.0);
        assert_eq!(m.evidence, vec![e1.id, e2.id, e3.id]);
        assert!(m.confidence >= pattern.confidence_threshold);
    }

    #[test]
    fn scenario_s2_sequence_broken_by_lag() {
        let pattern = apt_pattern();
        let t0 = Utc::now();
        let e1 = event(EventCategory::Network, t0 + chrono::Duration::seconds(1000));
        let e2 = event(EventCategory::Process, t0 + chrono::Duration::seconds(1200));
        let e3 = event(EventCategory::Process, t0 + chrono::Duration::seconds(2500));
        let events = vec![e1.clone(), e2.clone(), e3.clone()];

        let stats = SequenceEngineStats::default();
        let (matches, _) = evaluate_pattern(&pattern, &events, Instant::now() + Duration::from_secs(5), &stats);

        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert!((m.completion - 2.0 / 3.0).abs() < 1e-9);
        assert!(!m.evidence.contains(&e3.id));
    }

    #[test]
    fn empty_event_window_yields_empty_result_b1() {
        let pattern = apt_pattern();
        let stats = SequenceEngineStats::default();
        let (matches, truncated) =
            evaluate_pattern(&pattern, &[], Instant::now() + Duration::from_secs(5), &stats);
        assert!(matches.is_empty());
        assert!(!truncated);
    }

    #[test]
    fn auth_failure_predicate_matches_locked_and_failure() {
        let mut e = event(EventCategory::Auth, Utc::now());
        e.payload = EventPayload::Auth { outcome: AuthOutcome::Failure, method: "password".into(), source_ip: None };
        assert!(EventPredicate::AuthFailure.matches(&e).unwrap());
    }
}
