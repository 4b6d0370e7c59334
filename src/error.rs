//! Crate-wide error taxonomy (§7).
//!
//! `CoreError` covers every caller-surfaced failure kind. Internal glue that
//! never crosses a public boundary (lock poisoning, serialization bugs in
//! helper code) uses `anyhow::Error` and is converted here.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unknown principal: {0}")]
    UnknownPrincipal(String),

    #[error("pattern not found: {0}")]
    PatternNotFound(String),

    #[error("engine degraded: {engines:?}")]
    EngineDegraded { engines: Vec<String> },

    #[error("event source unavailable: {source_id}")]
    SourceUnavailable { source_id: String },

    #[error("notification failed on channel {channel}: {reason}")]
    NotificationFailed { channel: String, reason: String },

    #[error("cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

/// One failed item inside an otherwise-successful batch operation (§7
/// propagation policy: per-item failures never short-circuit the batch).
#[derive(Debug)]
pub struct ItemError<K> {
    pub item: K,
    pub error: CoreError,
}

/// Outcome of a batch operation: successes plus per-item failures.
#[derive(Debug)]
pub struct BatchOutcome<T, K> {
    pub succeeded: Vec<T>,
    pub failed: Vec<ItemError<K>>,
}

impl<T, K> BatchOutcome<T, K> {
    pub fn new() -> Self {
        Self { succeeded: Vec::new(), failed: Vec::new() }
    }

    pub fn is_fully_successful(&self) -> bool {
        self.failed.is_empty()
    }
}

impl<T, K> Default for BatchOutcome<T, K> {
    fn default() -> Self {
        Self::new()
    }
}

/// A structured per-document error for the NLP batch pipeline (§4.4 failure
/// semantics): isolated, never aborts the batch.
#[derive(Debug, Clone)]
pub struct ProcessingError {
    pub document_id: Uuid,
    pub stage: String,
    pub message: String,
}
