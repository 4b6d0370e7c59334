//! Feature Extractor (§2, §4.2): converts time-windowed events into a
//! fixed-shape behavioral feature vector, F=50 as in the reference
//! implementation.

use std::collections::HashMap;

use crate::event::{AuthOutcome, Event, EventCategory};

pub const FEATURE_COUNT: usize = 50;

/// Fixed ordering of named features; anything beyond the named prefix is
/// `reserved_<n>` so the vector shape stays stable as new metrics are added
/// without shifting indices already in use.
fn feature_names() -> [&'static str; FEATURE_COUNT] {
    const NAMED: [&str; 10] = [
        "login_frequency",
        "off_hours_logins",
        "failed_login_attempts",
        "privileged_operations",
        "data_volume_accessed",
        "unique_resources_accessed",
        "external_connections",
        "bulk_operations",
        "session_duration_avg",
        "concurrent_sessions",
    ];
    let mut names = [""; FEATURE_COUNT];
    for (i, n) in NAMED.iter().enumerate() {
        names[i] = n;
    }
    // Remaining slots are reserved for future metrics; populated at runtime
    // via `Box::leak` would be unidiomatic, so reserved names are computed
    // lazily by `FeatureVector::name_at` instead of stored here.
    names
}

#[derive(Debug, Clone)]
pub struct FeatureVector {
    values: [f64; FEATURE_COUNT],
}

impl FeatureVector {
    pub fn zeroed() -> Self {
        Self { values: [0.0; FEATURE_COUNT] }
    }

    fn index_of(metric: &str) -> Option<usize> {
        feature_names().iter().position(|n| *n == metric)
    }

    fn name_at(index: usize) -> String {
        let names = feature_names();
        if !names[index].is_empty() {
            names[index].to_string()
        } else {
            format!("reserved_{index}")
        }
    }

    /// Sets a named feature. Unknown names beyond the fixed ordering are
    /// ignored (§4.2: "missing metrics -> 0").
    pub fn set(&mut self, metric: &str, value: f64) {
        if let Some(i) = Self::index_of(metric) {
            self.values[i] = value;
        }
    }

    pub fn get(&self, metric: &str) -> f64 {
        Self::index_of(metric).map(|i| self.values[i]).unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (String, f64)> + '_ {
        (0..FEATURE_COUNT).map(|i| (Self::name_at(i), self.values[i]))
    }

    pub fn raw(&self) -> &[f64; FEATURE_COUNT] {
        &self.values
    }

    pub fn non_zero_fraction(&self) -> f64 {
        let non_zero = self.values.iter().filter(|v| v.abs() > f64::EPSILON).count();
        non_zero as f64 / FEATURE_COUNT as f64
    }
}

/// Builds a `FeatureVector` from a time-windowed batch of events for one
/// principal, per §2's Feature Extractor responsibility.
pub fn extract_features(principal_id: &str, events: &[Event]) -> FeatureVector {
    let mut v = FeatureVector::zeroed();
    let mine: Vec<&Event> = events
        .iter()
        .filter(|e| e.principal_id.as_deref() == Some(principal_id))
        .collect();

    if mine.is_empty() {
        return v;
    }

    let logins = mine
        .iter()
        .filter(|e| matches!(e.category, EventCategory::Auth))
        .count();
    v.set("login_frequency", logins as f64);

    let off_hours = mine
        .iter()
        .filter(|e| matches!(e.category, EventCategory::Auth))
        .filter(|e| {
            use chrono::Timelike;
            let hour = e.timestamp.hour();
            !(8..20).contains(&hour)
        })
        .count();
    v.set("off_hours_logins", off_hours as f64);

    let failed_logins = mine
        .iter()
        .filter_map(|e| match &e.payload {
            crate::event::EventPayload::Auth { outcome, .. } => Some(outcome),
            _ => None,
        })
        .filter(|o| matches!(o, AuthOutcome::Failure | AuthOutcome::Locked))
        .count();
    v.set("failed_login_attempts", failed_logins as f64);

    let file_ops = mine
        .iter()
        .filter(|e| matches!(e.category, EventCategory::File))
        .count();
    v.set("bulk_operations", file_ops as f64);

    let unique_resources: std::collections::HashSet<String> = mine
        .iter()
        .filter_map(|e| match &e.payload {
            crate::event::EventPayload::File { path, .. } => Some(path.clone()),
            crate::event::EventPayload::UserActivity { resource: Some(r), .. } => Some(r.clone()),
            _ => None,
        })
        .collect();
    v.set("unique_resources_accessed", unique_resources.len() as f64);

    let external_connections = mine
        .iter()
        .filter(|e| matches!(e.category, EventCategory::Network))
        .count();
    v.set("external_connections", external_connections as f64);

    v
}

/// Maps a feature vector back into a `(name, value)` map, used by NLP and
/// reporting surfaces that want a dynamic view rather than the fixed array.
pub fn as_map(features: &FeatureVector) -> HashMap<String, f64> {
    features.iter().collect()
}
