//! Statistical detection engine (§4.1): z-score indicators against the
//! recent baseline, aggregated by weighted probabilistic OR.

use std::collections::HashSet;

use uuid::Uuid;

use super::{EngineKind, Pattern, PatternMatch};
use crate::baseline::{extract_features, BaselineStore};
use crate::event::Event;

const EPSILON: f64 = 1e-6;

fn z_score(value: f64, baseline_value: f64, sigma: f64) -> f64 {
    (value - baseline_value) / sigma.max(EPSILON)
}

pub async fn evaluate(pattern: &Pattern, store: &BaselineStore, events: &[Event]) -> Vec<PatternMatch> {
    if pattern.indicators.is_empty() {
        return Vec::new();
    }

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

        let mut fired_weights = Vec::new();
        for indicator in &pattern.indicators {
            let Some(baseline) = store.get_baseline(&principal_id, &indicator.metric).await else { continue };
            let value = features.get(&indicator.metric);
            let z = z_score(value, baseline.baseline_value, baseline.sigma());
            if z.abs() > indicator.threshold {
                fired_weights.push(indicator.weight.clamp(0.0, 1.0));
            }
        }

        if fired_weights.is_empty() {
            continue;
        }

        let confidence = (1.0 - fired_weights.iter().fold(1.0, |acc, w| acc * (1.0 - w))).min(1.0);
        if confidence < pattern.confidence_threshold {
            continue;
        }

        let evidence: Vec<Uuid> = events
            .iter()
            .filter(|e| e.principal_id.as_deref() == Some(principal_id.as_str()))
            .map(|e| e.id)
            .collect();
        let t0 = events
            .iter()
            .filter(|e| e.principal_id.as_deref() == Some(principal_id.as_str()))
            .map(|e| e.timestamp)
            .min()
            .unwrap_or_else(chrono::Utc::now);
        let t1 = events
            .iter()
            .filter(|e| e.principal_id.as_deref() == Some(principal_id.as_str()))
            .map(|e| e.timestamp)
            .max()
            .unwrap_or(t0);

        matches.push(PatternMatch {
            match_id: Uuid::new_v4(),
            pattern_id: pattern.id.clone(),
            pattern_version: pattern.version,
            confidence,
            evidence,
            completion: 1.0,
            predicted_next_stages: Vec::new(),
            contributing_engines: vec![EngineKind::Statistical],
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

    #[test]
    fn pattern_with_empty_indicators_never_matches_b2() {
        // exercised at the call site in engine.rs; z_score sanity here.
        assert!(z_score(10.0, 10.0, 0.0).abs() < 1e-6);
        assert!(z_score(20.0, 10.0, 1.0) > 1.0);
    }
}
