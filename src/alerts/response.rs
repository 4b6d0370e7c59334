//! Auto-response action lifecycle (§4.6 Auto-response).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use uuid::Uuid;

use super::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseActionKind {
    NotifyOnCallOnly,
    RequireStepUpAuth,
    IsolatePrincipalSessions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseActionStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseAction {
    pub action_id: Uuid,
    pub kind: ResponseActionKind,
    pub status: ResponseActionStatus,
    pub failure_reason: Option<String>,
}

impl ResponseAction {
    pub fn new(kind: ResponseActionKind) -> Self {
        Self { action_id: Uuid::new_v4(), kind, status: ResponseActionStatus::Pending, failure_reason: None }
    }
}

/// Picks the default action kind for an alert's severity; a real deployment
/// can override this, but the core itself only needs one sane default per
/// severity.
pub fn default_action_kind(severity: Severity) -> ResponseActionKind {
    match severity {
        Severity::Critical => ResponseActionKind::IsolatePrincipalSessions,
        Severity::High => ResponseActionKind::RequireStepUpAuth,
        Severity::Medium | Severity::Low => ResponseActionKind::NotifyOnCallOnly,
    }
}

/// What an escalation rule's free-form `actions` string (§4.6, §6) resolves
/// to: either a response action run through the lifecycle above, or a
/// notification handed to the configured sinks under that name as a
/// channel. An action string that doesn't name a known response kind is
/// assumed to be the latter (e.g. `notify_oncall`, `page_oncall`).
pub enum EscalationAction {
    Response(ResponseActionKind),
    Notify(String),
}

pub fn resolve_escalation_action(action: &str) -> EscalationAction {
    match action {
        "isolate_principal_sessions" => EscalationAction::Response(ResponseActionKind::IsolatePrincipalSessions),
        "require_step_up_auth" => EscalationAction::Response(ResponseActionKind::RequireStepUpAuth),
        other => EscalationAction::Notify(other.to_string()),
    }
}

/// Runs one response action through pending -> executing -> {completed,
/// failed}, with an execution timeout counted as `failed` (§5 Cancellation &
/// timeouts).
pub async fn execute(action: &mut ResponseAction, per_attempt_timeout: Duration) {
    action.status = ResponseActionStatus::Executing;
    let outcome = timeout(per_attempt_timeout, run_action(action.kind)).await;
    match outcome {
        Ok(Ok(())) => action.status = ResponseActionStatus::Completed,
        Ok(Err(reason)) => {
            action.status = ResponseActionStatus::Failed;
            action.failure_reason = Some(reason);
        }
        Err(_) => {
            action.status = ResponseActionStatus::Failed;
            action.failure_reason = Some("execution timed out".into());
        }
    }
}

/// Placeholder action body: the core defines the lifecycle contract, not
/// the side effect itself (that's an external integration concern per §6).
async fn run_action(_kind: ResponseActionKind) -> Result<(), String> {
    Ok(())
}
