//! Pattern Recognition Engine (§4.1) and its supporting data model (§3).

pub mod behavioral;
pub mod engine;
pub mod registry;
pub mod sequence;
pub mod statistical;
pub mod temporal;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatternType {
    Sequential,
    Behavioral,
    Temporal,
    Statistical,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineKind {
    Sequence,
    Behavioral,
    Temporal,
    Statistical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisType {
    Sequential,
    Behavioral,
    Temporal,
    Statistical,
    All,
}

impl AnalysisType {
    pub fn engines(self) -> Vec<EngineKind> {
        match self {
            AnalysisType::Sequential => vec![EngineKind::Sequence],
            AnalysisType::Behavioral => vec![EngineKind::Behavioral],
            AnalysisType::Temporal => vec![EngineKind::Temporal],
            AnalysisType::Statistical => vec![EngineKind::Statistical],
            AnalysisType::All => vec![
                EngineKind::Sequence,
                EngineKind::Behavioral,
                EngineKind::Temporal,
                EngineKind::Statistical,
            ],
        }
    }
}

/// A structured event matcher, closed so `Pattern` stays a plain value type
/// that can be snapshotted and versioned (§4.3) rather than holding a
/// trait-object predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPredicate {
    Category(crate::event::EventCategory),
    PrincipalPresent,
    PayloadFieldContains { field: String, substring: String },
    AuthFailure,
    All(Vec<EventPredicate>),
    Any(Vec<EventPredicate>),
}

impl EventPredicate {
    /// Returns `None` on a structural mismatch that should fail only the
    /// stage being evaluated (§4.1 tie-break policy), never the whole call.
    pub fn matches(&self, event: &crate::event::Event) -> Result<bool, String> {
        use crate::event::EventPayload;
        Ok(match self {
            EventPredicate::Category(cat) => event.category == *cat,
            EventPredicate::PrincipalPresent => event.principal_id.is_some(),
            EventPredicate::AuthFailure => matches!(
                &event.payload,
                EventPayload::Auth { outcome: crate::event::AuthOutcome::Failure, .. }
                    | EventPayload::Auth { outcome: crate::event::AuthOutcome::Locked, .. }
            ),
            EventPredicate::PayloadFieldContains { field, substring } => {
                payload_field(&event.payload, field)
                    .map(|v| v.contains(substring.as_str()))
                    .unwrap_or(false)
            }
            EventPredicate::All(preds) => {
                for p in preds {
                    if !p.matches(event)? {
                        return Ok(false);
                    }
                }
                true
            }
            EventPredicate::Any(preds) => {
                for p in preds {
                    if p.matches(event)? {
                        return Ok(true);
                    }
                }
                false
            }
        })
    }
}

fn payload_field<'a>(payload: &'a crate::event::EventPayload, field: &str) -> Option<&'a str> {
    use crate::event::EventPayload;
    match (payload, field) {
        (EventPayload::Network { source_ip, .. }, "source_ip") => Some(source_ip),
        (EventPayload::Network { dest_ip, .. }, "dest_ip") => Some(dest_ip),
        (EventPayload::Process { process_name, .. }, "process_name") => Some(process_name),
        (EventPayload::Process { command_line, .. }, "command_line") => Some(command_line),
        (EventPayload::File { path, .. }, "path") => Some(path),
        (EventPayload::UserActivity { action, .. }, "action") => Some(action),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageRole {
    Start,
    Mid,
    Peak,
    End,
}

/// One stage in a sequential/temporal pattern's stage graph (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceStage {
    pub index: usize,
    pub name: String,
    pub predicate: EventPredicate,
    /// Confidence contributed by this stage's predicate firing, used in the
    /// partial-match confidence product (§4.1).
    pub predicate_confidence: f64,
    pub lag_min_seconds: i64,
    pub lag_max_seconds: i64,
    pub typical_lag_seconds: i64,
    pub role: StageRole,
    /// Transition probabilities to subsequent stage indices; must sum to
    /// <= 1 (§3 invariant).
    pub transitions: Vec<(usize, f64)>,
}

impl SequenceStage {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.lag_min_seconds <= self.typical_lag_seconds && self.typical_lag_seconds <= self.lag_max_seconds) {
            return Err(format!("stage {} violates lag_min <= typical <= lag_max", self.index));
        }
        let sum: f64 = self.transitions.iter().map(|(_, p)| p).sum();
        if sum > 1.0 + 1e-9 {
            return Err(format!("stage {} transition probabilities sum to {sum} > 1", self.index));
        }
        Ok(())
    }
}

/// A statistical/behavioral indicator used by patterns of those types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Indicator {
    pub name: String,
    pub metric: String,
    pub threshold: f64,
    pub weight: f64,
}

/// Expected temporal signature for a temporal pattern (§4.1 temporal
/// engine): a dominant-frequency band, trend direction, and the relative
/// weight each feature contributes to the pattern's confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalProfile {
    pub expected_dominant_frequency_hz: f64,
    pub frequency_tolerance_hz: f64,
    pub expected_trend: crate::baseline::Trend,
    pub frequency_weight: f64,
    pub trend_weight: f64,
    pub phase_weight: f64,
}

/// A named detection template (§3). Immutable once loaded except through
/// the versioned learning-feedback path (§4.3, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub version: u32,
    pub name: String,
    pub pattern_type: PatternType,
    pub severity_weight: f64,
    pub confidence_threshold: f64,
    pub stages: Vec<SequenceStage>,
    pub indicators: Vec<Indicator>,
    /// Behavioral engine threshold on `overall_risk` (0-100) above which a
    /// `BehavioralAnalysisResult` becomes a `PatternMatch` (§4.1).
    pub behavioral_threshold: f64,
    pub temporal_interval_seconds: u64,
    pub temporal_profile: Option<TemporalProfile>,
}

impl Pattern {
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("pattern id must not be empty".into());
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(format!("pattern {} confidence_threshold out of [0,1]", self.id));
        }
        for stage in &self.stages {
            stage.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictedStage {
    pub stage: usize,
    pub probability: f64,
    pub expected_time: DateTime<Utc>,
}

/// A confidence-scored instance of a pattern found in a window of events
/// (§3). Invariant: `confidence >= pattern.confidence_threshold`, `t0 <= t1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternMatch {
    pub match_id: Uuid,
    pub pattern_id: String,
    pub pattern_version: u32,
    pub confidence: f64,
    pub evidence: Vec<Uuid>,
    pub completion: f64,
    pub predicted_next_stages: Vec<PredictedStage>,
    pub contributing_engines: Vec<EngineKind>,
    pub t0: DateTime<Utc>,
    pub t1: DateTime<Utc>,
    pub behavioral_anomaly_score: Option<f64>,
    /// Contribution to a principal's `overall_risk` when this match is fed
    /// back into §4.2's risk formula.
    pub risk_contribution: f64,
}

impl PatternMatch {
    pub fn overlaps(&self, other: &PatternMatch) -> bool {
        self.pattern_id == other.pattern_id && self.t0 <= other.t1 && other.t0 <= self.t1
    }
}
