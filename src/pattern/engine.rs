//! Dispatch and fusion for the Pattern Recognition Engine (§4.1): runs every
//! engine that covers a pattern's type concurrently, then folds overlapping
//! same-pattern candidates into one match via probabilistic-OR confidence
//! fusion.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::FutureExt;
use tracing::{error, warn};

use super::registry::{PatternFilter, PatternRegistry};
use super::sequence::SequenceEngineStats;
use super::{behavioral, sequence, statistical, temporal};
use super::{AnalysisType, EngineKind, Pattern, PatternMatch};
use crate::baseline::{anomaly::AnomalyDetector, BaselineStore};
use crate::error::{CoreError, CoreResult};
use crate::event::sorted_events;
use crate::event::Event;

/// Request shape for one §4.1 evaluation call.
pub struct EvaluationRequest<'a> {
    pub events: Vec<Event>,
    pub pattern_ids: Option<&'a [String]>,
    pub threshold: f64,
    pub include_predictions: bool,
    pub analysis_type: AnalysisType,
    pub deadline: Duration,
}

#[derive(Debug, Default)]
pub struct EvaluationMetadata {
    pub truncated: bool,
    pub engines_failed: Vec<EngineKind>,
    pub stage_errors: u64,
    /// Per-engine wall-clock time spent in this call (SPEC_FULL.md §10.6,
    /// mirroring the teacher's performance-monitor habit). Observability
    /// only; never part of the match-confidence contract.
    pub engine_durations: Vec<(EngineKind, Duration)>,
}

pub struct EvaluationOutcome {
    pub matches: Vec<PatternMatch>,
    pub metadata: EvaluationMetadata,
}

/// Fuses per-engine candidates for the same pattern id into the final match
/// set per §4.1 step 4: overlapping-evidence candidates combine via
/// probabilistic OR; non-overlapping candidates are kept distinct.
fn fuse(candidates: Vec<PatternMatch>) -> Vec<PatternMatch> {
    let mut fused: Vec<PatternMatch> = Vec::new();
    'outer: for candidate in candidates {
        for existing in fused.iter_mut() {
            if existing.pattern_id == candidate.pattern_id && existing.overlaps(&candidate) {
                let combined_confidence = 1.0 - (1.0 - existing.confidence) * (1.0 - candidate.confidence);
                let mut evidence = existing.evidence.clone();
                for id in &candidate.evidence {
                    if !evidence.contains(id) {
                        evidence.push(*id);
                    }
                }
                let mut engines = existing.contributing_engines.clone();
                for engine in &candidate.contributing_engines {
                    if !engines.contains(engine) {
                        engines.push(*engine);
                    }
                }
                existing.confidence = combined_confidence;
                existing.evidence = evidence;
                existing.contributing_engines = engines;
                existing.completion = existing.completion.max(candidate.completion);
                existing.t0 = existing.t0.min(candidate.t0);
                existing.t1 = existing.t1.max(candidate.t1);
                existing.risk_contribution = existing.risk_contribution.max(candidate.risk_contribution);
                continue 'outer;
            }
        }
        fused.push(candidate);
    }
    fused
}

/// Runs the full §4.1 pipeline: pre-sort, dispatch, concurrent per-engine
/// evaluation, fusion, thresholding. `include_predictions` is honored by the
/// sequence engine directly (it always attaches `predicted_next_stages`; the
/// flag controls whether callers keep or discard that field downstream, per
/// the Open Questions decision in DESIGN.md).
pub async fn evaluate(
    registry: &PatternRegistry,
    baselines: &BaselineStore,
    detector: &dyn AnomalyDetector,
    request: EvaluationRequest<'_>,
) -> CoreResult<EvaluationOutcome> {
    let events = sorted_events(request.events);
    let deadline = Instant::now() + request.deadline;

    let filter = PatternFilter { pattern_type: None, ids: request.pattern_ids.map(|ids| ids.to_vec()) };
    let mut patterns = registry.list(&filter).await;
    patterns.retain(|p| request.analysis_type.engines().iter().any(|k| engine_covers(*k, p)));

    if events.is_empty() || patterns.is_empty() {
        return Ok(EvaluationOutcome { matches: Vec::new(), metadata: EvaluationMetadata::default() });
    }

    let engines = request.analysis_type.engines();
    let mut engine_futures = Vec::new();
    let sequence_stats = SequenceEngineStats::default();

    for kind in &engines {
        let patterns = &patterns;
        let events = &events;
        let sequence_stats = &sequence_stats;
        let engine_kind = *kind;
        let raw: std::pin::Pin<Box<dyn std::future::Future<Output = (EngineKind, Vec<PatternMatch>, bool)> + '_>> =
            match kind {
                EngineKind::Sequence => Box::pin(async move {
                    let mut out = Vec::new();
                    let mut truncated = false;
                    for pattern in patterns.iter().filter(|p| p.pattern_type == super::PatternType::Sequential) {
                        let (mut m, t) = sequence::evaluate_pattern(pattern, events, deadline, sequence_stats);
                        truncated |= t;
                        out.append(&mut m);
                    }
                    (EngineKind::Sequence, out, truncated)
                }),
                EngineKind::Behavioral => Box::pin(async move {
                    let mut out = Vec::new();
                    for pattern in patterns.iter().filter(|p| p.pattern_type == super::PatternType::Behavioral) {
                        let mut m = behavioral::evaluate(pattern, baselines, detector, events).await;
                        out.append(&mut m);
                    }
                    (EngineKind::Behavioral, out, false)
                }),
                EngineKind::Temporal => Box::pin(async move {
                    let mut out = Vec::new();
                    for pattern in patterns.iter().filter(|p| p.pattern_type == super::PatternType::Temporal) {
                        out.append(&mut temporal::evaluate(pattern, events));
                    }
                    (EngineKind::Temporal, out, false)
                }),
                EngineKind::Statistical => Box::pin(async move {
                    let mut out = Vec::new();
                    for pattern in patterns.iter().filter(|p| p.pattern_type == super::PatternType::Statistical) {
                        let mut m = statistical::evaluate(pattern, baselines, events).await;
                        out.append(&mut m);
                    }
                    (EngineKind::Statistical, out, false)
                }),
            };
        let started = Instant::now();
        // Panics from an engine are caught here and downgraded to
        // `EngineDegraded` rather than aborting the whole call (§7).
        let guarded = AssertUnwindSafe(raw).catch_unwind().map(move |outcome| match outcome {
            Ok(v) => (v.0, v.1, v.2, false, started.elapsed()),
            Err(_) => {
                error!(engine = ?engine_kind, "engine panicked during evaluation, degrading");
                (engine_kind, Vec::new(), false, true, started.elapsed())
            }
        });
        let guarded: std::pin::Pin<
            Box<dyn std::future::Future<Output = (EngineKind, Vec<PatternMatch>, bool, bool, Duration)> + '_>,
        > = Box::pin(guarded);
        engine_futures.push(guarded);
    }

    let results = join_all(engine_futures).await;

    let mut candidates = Vec::new();
    let mut truncated = false;
    let mut engines_failed = Vec::new();
    let mut engine_durations = Vec::new();
    for (kind, mut matches, engine_truncated, engine_failed, elapsed) in results {
        truncated |= engine_truncated;
        engine_durations.push((kind, elapsed));
        if engine_failed {
            engines_failed.push(kind);
        } else if matches.is_empty() {
            warn!(engine = ?kind, "engine produced no candidate matches this call");
        }
        candidates.append(&mut matches);
    }

    if !engines_failed.is_empty() {
        warn!(degraded = ?engines_failed, "one or more engines degraded this call");
    }
    if !engines.is_empty() && engines_failed.len() == engines.len() {
        return Err(CoreError::EngineDegraded { engines: engines_failed.iter().map(|k| format!("{k:?}")).collect() });
    }

    let fused = fuse(candidates);
    let thresholded: Vec<PatternMatch> = fused.into_iter().filter(|m| m.confidence >= request.threshold).collect();

    let matches = if request.include_predictions {
        thresholded
    } else {
        thresholded
            .into_iter()
            .map(|mut m| {
                m.predicted_next_stages.clear();
                m
            })
            .collect()
    };

    Ok(EvaluationOutcome {
        matches,
        metadata: EvaluationMetadata {
            truncated,
            engines_failed,
            stage_errors: sequence_stats.stage_errors.load(Ordering::Relaxed),
            engine_durations,
        },
    })
}

fn engine_covers(kind: EngineKind, pattern: &Pattern) -> bool {
    matches!(
        (kind, pattern.pattern_type),
        (EngineKind::Sequence, super::PatternType::Sequential)
            | (EngineKind::Behavioral, super::PatternType::Behavioral)
            | (EngineKind::Temporal, super::PatternType::Temporal)
            | (EngineKind::Statistical, super::PatternType::Statistical)
            | (_, super::PatternType::Hybrid)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::anomaly::StatisticalFallbackDetector;
    use crate::event::{EventCategory, EventPayload};
    use crate::pattern::registry::MergePolicy;
    use crate::pattern::{EventPredicate, PatternType, SequenceStage, StageRole};
    use chrono::Utc;
    use uuid::Uuid;

    fn event(cat: EventCategory, ts: chrono::DateTime<Utc>) -> Event {
        Event {
            id: Uuid::new_v4(),
            timestamp: ts,
            category: cat,
            principal_id: None,
            severity: 0.5,
            confidence: 0.9,
            risk_score: 0.0,
            payload: EventPayload::Generic { fields: vec![] },
        }
    }

    fn single_stage_pattern() -> Pattern {
        Pattern {
            id: "p1".into(),
            version: 1,
            name: "p1".into(),
            pattern_type: PatternType::Sequential,
            severity_weight: 1.0,
            confidence_threshold: 0.1,
            stages: vec![SequenceStage {
                index: 0,
                name: "start".into(),
                predicate: EventPredicate::Category(EventCategory::Network),
                predicate_confidence: 0.9,
                lag_min_seconds: 0,
                lag_max_seconds: 300,
                typical_lag_seconds: 0,
                role: StageRole::Start,
                transitions: vec![],
            }],
            indicators: vec![],
            behavioral_threshold: 50.0,
            temporal_interval_seconds: 60,
            temporal_profile: None,
        }
    }

    #[tokio::test]
    async fn empty_event_window_returns_empty_set() {
        let registry = PatternRegistry::new();
        registry.register(single_stage_pattern(), MergePolicy::Merge).await.unwrap();
        let baselines = BaselineStore::new();
        let detector = StatisticalFallbackDetector;
        let outcome = evaluate(
            &registry,
            &baselines,
            &detector,
            EvaluationRequest {
                events: vec![],
                pattern_ids: None,
                threshold: 0.0,
                include_predictions: true,
                analysis_type: AnalysisType::All,
                deadline: Duration::from_secs(1),
            },
        )
        .await
        .unwrap();
        assert!(outcome.matches.is_empty());
    }

    #[tokio::test]
    async fn single_engine_dispatch_finds_sequential_match() {
        let registry = PatternRegistry::new();
        registry.register(single_stage_pattern(), MergePolicy::Merge).await.unwrap();
        let baselines = BaselineStore::new();
        let detector = StatisticalFallbackDetector;
        let events = vec![event(EventCategory::Network, Utc::now())];
        let outcome = evaluate(
            &registry,
            &baselines,
            &detector,
            EvaluationRequest {
                events,
                pattern_ids: None,
                threshold: 0.0,
                include_predictions: true,
                analysis_type: AnalysisType::Sequential,
                deadline: Duration::from_secs(1),
            },
        )
        .await
        .unwrap();
        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].pattern_id, "p1");
    }

    #[tokio::test]
    async fn threshold_drops_low_confidence_matches() {
        let registry = PatternRegistry::new();
        registry.register(single_stage_pattern(), MergePolicy::Merge).await.unwrap();
        let baselines = BaselineStore::new();
        let detector = StatisticalFallbackDetector;
        let events = vec![event(EventCategory::Network, Utc::now())];
        let outcome = evaluate(
            &registry,
            &baselines,
            &detector,
            EvaluationRequest {
                events,
                pattern_ids: None,
                threshold: 0.99,
                include_predictions: true,
                analysis_type: AnalysisType::Sequential,
                deadline: Duration::from_secs(1),
            },
        )
        .await
        .unwrap();
        assert!(outcome.matches.is_empty());
    }

    #[tokio::test]
    async fn metadata_reports_no_degradation_on_success() {
        let registry = PatternRegistry::new();
        registry.register(single_stage_pattern(), MergePolicy::Merge).await.unwrap();
        let baselines = BaselineStore::new();
        let detector = StatisticalFallbackDetector;
        let events = vec![event(EventCategory::Network, Utc::now())];
        let outcome = evaluate(
            &registry,
            &baselines,
            &detector,
            EvaluationRequest {
                events,
                pattern_ids: None,
                threshold: 0.0,
                include_predictions: true,
                analysis_type: AnalysisType::All,
                deadline: Duration::from_secs(1),
            },
        )
        .await
        .unwrap();
        assert!(outcome.metadata.engines_failed.is_empty());
        assert!(!outcome.metadata.truncated);
    }

    #[tokio::test]
    async fn metadata_reports_a_duration_per_dispatched_engine() {
        let registry = PatternRegistry::new();
        registry.register(single_stage_pattern(), MergePolicy::Merge).await.unwrap();
        let baselines = BaselineStore::new();
        let detector = StatisticalFallbackDetector;
        let events = vec![event(EventCategory::Network, Utc::now())];
        let outcome = evaluate(
            &registry,
            &baselines,
            &detector,
            EvaluationRequest {
                events,
                pattern_ids: None,
                threshold: 0.0,
                include_predictions: true,
                analysis_type: AnalysisType::All,
                deadline: Duration::from_secs(1),
            },
        )
        .await
        .unwrap();
        assert_eq!(outcome.metadata.engine_durations.len(), AnalysisType::All.engines().len());
    }
}
