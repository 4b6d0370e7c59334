//! Event Source capability (§6).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::event::Event;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceHealth {
    Healthy,
    Degraded,
    Unavailable,
}

/// Events must be monotonic within a cursor range; the core does not
/// require cross-source ordering (§6).
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn fetch_since(
        &self,
        source_id: &str,
        cursor: Option<Cursor>,
    ) -> Result<(Vec<Event>, Cursor), CoreError>;

    async fn health(&self, source_id: &str) -> SourceHealth;
}
