//! Typed configuration records (§6).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Queue backpressure policy for a monitoring session's alert queue (§5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueuePolicy {
    Block,
    Drop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerfLimits {
    pub max_concurrent_analyses: usize,
    pub queue_depth: usize,
    pub tick_timeout_seconds: u64,
    pub queue_policy: QueuePolicy,
}

impl Default for PerfLimits {
    fn default() -> Self {
        Self {
            max_concurrent_analyses: 8,
            queue_depth: 1024,
            tick_timeout_seconds: 30,
            queue_policy: QueuePolicy::Block,
        }
    }
}

/// One escalation rule (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRule {
    pub rule_id: String,
    pub condition: EscalationCondition,
    pub delay_seconds: u64,
    pub actions: Vec<String>,
    pub max_escalations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EscalationCondition {
    ConfidenceAbove(f64),
    SeverityAtLeast(crate::alerts::Severity),
    PatternCountInWindow { pattern_id: String, count: u32, window_seconds: u64 },
    AgeSeconds(u64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub retention_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { retention_days: 30 }
    }
}

/// Configuration for one monitoring session (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub check_interval_seconds: u64,
    pub alert_threshold: f64,
    pub notification_channels: Vec<String>,
    pub auto_response_enabled: bool,
    pub escalation_rules: Vec<EscalationRule>,
    pub retention: RetentionConfig,
    pub perf_limits: PerfLimits,
    /// Consecutive tick failures before the session transitions to `error`.
    pub max_consecutive_errors: u32,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.check_interval_seconds == 0 {
            return Err(CoreError::ConfigInvalid("check_interval_seconds must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.alert_threshold) {
            return Err(CoreError::ConfigInvalid("alert_threshold must be in [0,1]".into()));
        }
        if self.retention.retention_days == 0 {
            return Err(CoreError::ConfigInvalid("retention_days must be > 0".into()));
        }
        if self.perf_limits.max_concurrent_analyses == 0 {
            return Err(CoreError::ConfigInvalid("max_concurrent_analyses must be > 0".into()));
        }
        for rule in &self.escalation_rules {
            if rule.max_escalations == 0 {
                return Err(CoreError::ConfigInvalid(format!(
                    "escalation rule {} has max_escalations = 0",
                    rule.rule_id
                )));
            }
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 60,
            alert_threshold: 0.6,
            notification_channels: Vec::new(),
            auto_response_enabled: false,
            escalation_rules: Vec::new(),
            retention: RetentionConfig::default(),
            perf_limits: PerfLimits::default(),
            max_consecutive_errors: 5,
        }
    }
}

/// Global language-support configuration (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub supported_languages: Vec<String>,
    pub default_language: String,
    pub translation_enabled: bool,
    pub language_confidence_threshold: f64,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            supported_languages: vec![
                "en".into(), "ru".into(), "zh".into(), "ko".into(), "es".into(), "de".into(),
            ],
            default_language: "en".into(),
            translation_enabled: false,
            language_confidence_threshold: 0.55,
        }
    }
}
