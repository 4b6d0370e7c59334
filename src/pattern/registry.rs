//! Pattern Registry (§4.3): load, validate, version, and expose patterns.
//! Readers take a shared lock; writers publish a new immutable snapshot via
//! `Arc` swap so in-flight readers finish against the version they started
//! with (§5).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{Pattern, PatternType};
use crate::error::{BatchOutcome, CoreError, ItemError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    Merge,
    Overwrite,
    SkipExisting,
}

#[derive(Debug, Default, Clone)]
pub struct PatternFilter {
    pub pattern_type: Option<PatternType>,
    pub ids: Option<Vec<String>>,
}

impl PatternFilter {
    fn matches(&self, pattern: &Pattern) -> bool {
        if let Some(t) = self.pattern_type {
            if pattern.pattern_type != t {
                return false;
            }
        }
        if let Some(ids) = &self.ids {
            if !ids.contains(&pattern.id) {
                return false;
            }
        }
        true
    }
}

type Snapshot = Arc<HashMap<String, Pattern>>;

/// Counters feeding the learning-feedback path (§4.7), kept separate from
/// pattern weights themselves.
#[derive(Debug, Clone, Default)]
pub struct FeedbackCounters {
    pub false_positives: u32,
    pub false_negatives: u32,
    pub accuracy_observations: u32,
}

#[derive(Debug)]
pub struct PatternRegistry {
    snapshot: RwLock<Snapshot>,
    feedback: RwLock<HashMap<String, FeedbackCounters>>,
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self { snapshot: RwLock::new(Arc::new(HashMap::new())), feedback: RwLock::new(HashMap::new()) }
    }

    pub async fn register(&self, mut pattern: Pattern, merge_policy: MergePolicy) -> Result<(), CoreError> {
        pattern.validate().map_err(CoreError::InvalidInput)?;
        let mut guard = self.snapshot.write().await;
        let mut next = (**guard).clone();
        match (next.get(&pattern.id), merge_policy) {
            (Some(existing), MergePolicy::SkipExisting) => {
                let _ = existing;
                return Ok(());
            }
            (Some(existing), MergePolicy::Merge) if existing.version >= pattern.version => {
                return Err(CoreError::InvalidInput(format!(
                    "pattern {} already registered at version >= {}",
                    pattern.id, pattern.version
                )));
            }
            (Some(existing), _) => {
                pattern.version = existing.version + 1;
            }
            (None, _) => {}
        }
        next.insert(pattern.id.clone(), pattern);
        *guard = Arc::new(next);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<Pattern> {
        self.snapshot.read().await.get(id).cloned()
    }

    pub async fn list(&self, filter: &PatternFilter) -> Vec<Pattern> {
        self.snapshot
            .read()
            .await
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect()
    }

    /// Returns an immutable point-in-time snapshot, the handle every
    /// detection engine evaluates against so the evaluation completes
    /// against one consistent set of patterns even if writers run
    /// concurrently (§4.1 step 2, §5).
    pub async fn snapshot(&self) -> Snapshot {
        self.snapshot.read().await.clone()
    }

    /// Atomic import: either all patterns in `batch` are valid and load, or
    /// none do (§4.3).
    pub async fn import(&self, batch: Vec<Pattern>, merge_policy: MergePolicy) -> Result<BatchOutcome<String, Pattern>, CoreError> {
        for pattern in &batch {
            pattern.validate().map_err(CoreError::InvalidInput)?;
        }

        let mut guard = self.snapshot.write().await;
        let mut next = (**guard).clone();
        let mut outcome = BatchOutcome::new();

        for mut pattern in batch {
            match (next.get(&pattern.id), merge_policy) {
                (Some(_), MergePolicy::SkipExisting) => continue,
                (Some(existing), _) => pattern.version = existing.version + 1,
                (None, _) => {}
            }
            let id = pattern.id.clone();
            next.insert(pattern.id.clone(), pattern);
            outcome.succeeded.push(id);
        }

        *guard = Arc::new(next);
        Ok(outcome)
    }

    pub async fn export(&self, ids: Option<&[String]>) -> Vec<Pattern> {
        let snapshot = self.snapshot.read().await;
        match ids {
            Some(ids) => ids.iter().filter_map(|id| snapshot.get(id).cloned()).collect(),
            None => snapshot.values().cloned().collect(),
        }
    }

    /// Applies analyst feedback on a match's pattern (§4.7). Counters live
    /// separately from the pattern; crossing a threshold raises or lowers
    /// `confidence_threshold` by a bounded step and bumps the version so
    /// prior matches stay pinned to the version they were produced against.
    pub async fn apply_feedback(&self, pattern_id: &str, feedback: Feedback) -> Result<(), CoreError> {
        const FALSE_POSITIVE_LIMIT: u32 = 5;
        const FALSE_NEGATIVE_LIMIT: u32 = 5;
        const STEP: f64 = 0.02;
        const CEILING: f64 = 0.95;
        const FLOOR: f64 = 0.40;

        let mut counters_guard = self.feedback.write().await;
        let counters = counters_guard.entry(pattern_id.to_string()).or_default();
        if feedback.false_positive {
            counters.false_positives += 1;
        }
        if feedback.false_negative {
            counters.false_negatives += 1;
        }
        if feedback.accuracy.is_some() {
            counters.accuracy_observations += 1;
        }

        let raise = counters.false_positives >= FALSE_POSITIVE_LIMIT;
        let lower = counters.false_negatives >= FALSE_NEGATIVE_LIMIT;
        if raise {
            counters.false_positives = 0;
        }
        if lower {
            counters.false_negatives = 0;
        }
        drop(counters_guard);

        if !raise && !lower {
            return Ok(());
        }

        let mut guard = self.snapshot.write().await;
        let mut next = (**guard).clone();
        let Some(pattern) = next.get(pattern_id).cloned() else {
            return Err(CoreError::PatternNotFound(pattern_id.to_string()));
        };
        let mut updated = pattern;
        if raise {
            updated.confidence_threshold = (updated.confidence_threshold + STEP).min(CEILING);
        }
        if lower {
            updated.confidence_threshold = (updated.confidence_threshold - STEP).max(FLOOR);
        }
        updated.version += 1;
        next.insert(pattern_id.to_string(), updated);
        *guard = Arc::new(next);
        Ok(())
    }
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Feedback {
    pub accuracy: Option<f64>,
    pub false_positive: bool,
    pub false_negative: bool,
    pub suggested_improvements: Option<String>,
}

/// Result type alias kept for call sites that want the `ItemError` shape
/// without re-spelling `BatchOutcome`.
pub type ImportOutcome = BatchOutcome<String, Pattern>;

#[allow(dead_code)]
fn _assert_item_error_shape(_: ItemError<Pattern>) {}
