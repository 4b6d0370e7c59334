//! Typed event model (§3). The ingress normalizes raw source payloads into
//! these before anything downstream ever sees them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    Network,
    Process,
    UserActivity,
    File,
    Email,
    Auth,
    Generic,
}

/// Category-specific payload. A closed sum type rather than an open map,
/// per the design note on dynamic typing in the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Network {
        source_ip: String,
        dest_ip: String,
        dest_port: u16,
        protocol: String,
        bytes_transferred: u64,
    },
    Process {
        process_name: String,
        command_line: String,
        parent_process: Option<String>,
        pid: u32,
    },
    UserActivity {
        action: String,
        resource: Option<String>,
    },
    File {
        path: String,
        operation: String,
    },
    Email {
        from: String,
        to: Vec<String>,
        subject: String,
    },
    Auth {
        outcome: AuthOutcome,
        method: String,
        source_ip: Option<String>,
    },
    Generic {
        fields: Vec<(String, String)>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthOutcome {
    Success,
    Failure,
    Locked,
}

/// A single timestamped security-relevant observation.
///
/// Invariants (enforced by producers, not re-validated per read): timestamp
/// is monotone within a single event source; `id` is unique within a
/// monitoring session's evaluation window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub category: EventCategory,
    pub principal_id: Option<String>,
    pub severity: f64,
    pub confidence: f64,
    pub risk_score: f64,
    pub payload: EventPayload,
}

impl Event {
    /// Sort key for §4.1 step 1 (pre-sort by `(timestamp, id)`, stable).
    pub fn sort_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.timestamp, self.id)
    }
}

/// Sorts events by `(timestamp, id)` as required before any detection engine
/// runs (§4.1 step 1).
pub fn sorted_events(mut events: Vec<Event>) -> Vec<Event> {
    events.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    events
}
