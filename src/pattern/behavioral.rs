//! Behavioral detection engine (§4.1): bridges into §4.2's baseline/anomaly
//! subsystem and converts risky principals into candidate `PatternMatch`es.

use std::collections::HashSet;

use uuid::Uuid;

use super::{EngineKind, Pattern, PatternMatch};
use crate::baseline::{anomaly::AnomalyDetector, extract_features, BaselineStore};
use crate::error::CoreError;
use crate::event::Event;

const TOP_K_EVIDENCE: usize = 5;

/// Runs §4.2 for every principal observed in `events`, emitting a candidate
/// match for each whose `overall_risk` clears `pattern.behavioral_threshold`.
/// A principal with no registered profile is skipped rather than failing
/// the whole call (§4.1 failure semantics: the engine degrades gracefully).
pub async fn evaluate(
    pattern: &Pattern,
    store: &BaselineStore,
    detector: &dyn AnomalyDetector,
    events: &[Event],
) -> Vec<PatternMatch> {
    let mut principals: Vec<String> = events
        .iter()
        .filter_map(|e| e.principal_id.clone())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    principals.sort();

    let mut matches = Vec::new();
    for principal_id in principals {
        let features = extract_features(&principal_id, events);
        match store.analyze(&principal_id, &features, detector, Vec::new()).await {
            Ok(result) if result.overall_risk >= pattern.behavioral_threshold => {
                let confidence = (result.overall_risk / 100.0).min(1.0);
                if confidence < pattern.confidence_threshold {
                    continue;
                }

                let mut evidence: Vec<Uuid> = events
                    .iter()
                    .filter(|e| e.principal_id.as_deref() == Some(principal_id.as_str()))
                    .rev()
                    .take(TOP_K_EVIDENCE)
                    .map(|e| e.id)
                    .collect();
                evidence.reverse();

                let window = events
                    .iter()
                    .filter(|e| e.principal_id.as_deref() == Some(principal_id.as_str()))
                    .map(|e| e.timestamp)
                    .collect::<Vec<_>>();
                let t0 = window.iter().min().copied().unwrap_or_else(chrono::Utc::now);
                let t1 = window.iter().max().copied().unwrap_or(t0);

                matches.push(PatternMatch {
                    match_id: Uuid::new_v4(),
                    pattern_id: pattern.id.clone(),
                    pattern_version: pattern.version,
                    confidence,
                    evidence,
                    completion: 1.0,
                    predicted_next_stages: Vec::new(),
                    contributing_engines: vec![EngineKind::Behavioral],
                    t0,
                    t1,
                    behavioral_anomaly_score: Some(result.anomalies.len() as f64),
                    risk_contribution: result.overall_risk * pattern.severity_weight / 10.0,
                });
            }
            Ok(_) => {}
            Err(CoreError::UnknownPrincipal(_)) => {}
            Err(_) => {}
        }
    }
    matches
}
