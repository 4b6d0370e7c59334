//! Real-Time Monitoring Controller (§4.5): session state machine, periodic
//! tick driver, and session statistics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, warn};
use uuid::Uuid;

use crate::alerts::AlertPipeline;
use crate::baseline::{anomaly::AnomalyDetector, BaselineStore};
use crate::clock::{periodic_ticker, SharedClock};
use crate::config::SessionConfig;
use crate::error::{CoreError, CoreResult};
use crate::pattern::engine::{self, EvaluationRequest};
use crate::pattern::registry::PatternRegistry;
use crate::pattern::AnalysisType;
use crate::sources::EventSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Active,
    Paused,
    Error,
    Stopped,
}

#[derive(Debug, Default)]
pub struct SessionStatistics {
    pub analysis_time_ema_millis: std::sync::Mutex<f64>,
    pub data_points: AtomicU64,
    pub matches_detected: AtomicU64,
    pub error_count: AtomicU64,
    pub ticks_run: AtomicU64,
    pub ticks_dropped: AtomicU64,
}

const ANALYSIS_TIME_ALPHA: f64 = 0.5;

impl SessionStatistics {
    fn record_tick(&self, elapsed: StdDuration, events_seen: usize, matches_found: usize) {
        let millis = elapsed.as_secs_f64() * 1000.0;
        let mut ema = self.analysis_time_ema_millis.lock().unwrap();
        *ema = if self.ticks_run.load(Ordering::Relaxed) == 0 {
            millis
        } else {
            ANALYSIS_TIME_ALPHA * millis + (1.0 - ANALYSIS_TIME_ALPHA) * *ema
        };
        self.ticks_run.fetch_add(1, Ordering::Relaxed);
        self.data_points.fetch_add(events_seen as u64, Ordering::Relaxed);
        self.matches_detected.fetch_add(matches_found as u64, Ordering::Relaxed);
    }
}

/// Resets the non-reentrancy flag when a tick returns by any path,
/// including early `return`s.
struct TickGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// One monitoring session (§3, §4.5): pattern set, sources, config, and the
/// mutable state a running tick loop advances.
pub struct MonitoringSession {
    pub session_id: Uuid,
    pub pattern_ids: Vec<String>,
    pub source_ids: Vec<String>,
    pub config: SessionConfig,
    status: RwLock<SessionStatus>,
    last_check_time: RwLock<Option<DateTime<Utc>>>,
    consecutive_errors: AtomicU64,
    stop_requested: AtomicBool,
    ticking: AtomicBool,
    pub stats: SessionStatistics,
}

impl MonitoringSession {
    pub fn new(pattern_ids: Vec<String>, source_ids: Vec<String>, config: SessionConfig) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self {
            session_id: Uuid::new_v4(),
            pattern_ids,
            source_ids,
            config,
            status: RwLock::new(SessionStatus::Active),
            last_check_time: RwLock::new(None),
            consecutive_errors: AtomicU64::new(0),
            stop_requested: AtomicBool::new(false),
            ticking: AtomicBool::new(false),
            stats: SessionStatistics::default(),
        })
    }

    pub async fn status(&self) -> SessionStatus {
        *self.status.read().await
    }

    /// active <-> paused (§4.5 state machine).
    pub async fn pause(&self) -> CoreResult<()> {
        let mut status = self.status.write().await;
        if *status != SessionStatus::Active {
            return Err(CoreError::InvalidInput("can only pause an active session".into()));
        }
        *status = SessionStatus::Paused;
        Ok(())
    }

    pub async fn resume(&self) -> CoreResult<()> {
        let mut status = self.status.write().await;
        if *status != SessionStatus::Paused {
            return Err(CoreError::InvalidInput("can only resume a paused session".into()));
        }
        *status = SessionStatus::Active;
        Ok(())
    }

    /// Observed at tick boundaries; an in-progress tick runs to completion
    /// (§4.5 Cancellation).
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    async fn mark_error(&self) {
        let consecutive = self.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.error_count.fetch_add(1, Ordering::Relaxed);
        if consecutive >= self.config.max_consecutive_errors as u64 {
            *self.status.write().await = SessionStatus::Error;
        }
    }

    fn clear_errors(&self) {
        self.consecutive_errors.store(0, Ordering::SeqCst);
    }

    /// Runs one tick: fetch events since `last_check_time` from every
    /// configured source, invoke §4.1, and submit alerts for matches above
    /// threshold (§4.5 steps 1-3). Non-reentrant: a `try_lock` failure means
    /// a tick is already running, and the caller should count a drop instead
    /// of blocking (§4.5 Ordering guarantees, §5).
    #[allow(clippy::too_many_arguments)]
    pub async fn tick(
        &self,
        sources: &HashMap<String, Arc<dyn EventSource>>,
        registry: &PatternRegistry,
        baselines: &BaselineStore,
        detector: &dyn AnomalyDetector,
        alerts: &AlertPipeline,
    ) {
        if self
            .ticking
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.stats.ticks_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(session = %self.session_id, "tick skipped: previous tick still running");
            return;
        }
        let _guard = TickGuard { flag: &self.ticking };

        if self.stop_requested.load(Ordering::SeqCst) {
            return;
        }
        if self.status().await != SessionStatus::Active {
            return;
        }

        let started = std::time::Instant::now();
        let since = *self.last_check_time.read().await;
        let now = Utc::now();

        let mut events = Vec::new();
        let mut any_source_ok = false;
        for source_id in &self.source_ids {
            let Some(source) = sources.get(source_id) else { continue };
            match source.fetch_since(source_id, since.map(|t| crate::sources::Cursor(t.to_rfc3339()))).await {
                Ok((mut fetched, _cursor)) => {
                    any_source_ok = true;
                    events.append(&mut fetched);
                }
                Err(CoreError::SourceUnavailable { source_id }) => {
                    warn!(session = %self.session_id, source_id, "event source unavailable during tick");
                }
                Err(e) => {
                    error!(session = %self.session_id, error = %e, "event source error during tick");
                }
            }
        }
        *self.last_check_time.write().await = Some(now);

        if !any_source_ok && !self.source_ids.is_empty() {
            self.mark_error().await;
            return;
        }

        let outcome = engine::evaluate(
            registry,
            baselines,
            detector,
            EvaluationRequest {
                events: events.clone(),
                pattern_ids: Some(&self.pattern_ids),
                threshold: self.config.alert_threshold,
                include_predictions: true,
                analysis_type: AnalysisType::All,
                deadline: StdDuration::from_secs(self.config.perf_limits.tick_timeout_seconds),
            },
        )
        .await;

        match outcome {
            Ok(result) => {
                self.clear_errors();
                for m in &result.matches {
                    if m.confidence < self.config.alert_threshold {
                        continue;
                    }
                    let alert_id = alerts.submit(self.session_id, &m.pattern_id, Vec::new(), m);
                    alerts.notify(alert_id, &self.config).await;
                    alerts.auto_respond(alert_id, &self.config).await;
                }
                self.stats.record_tick(started.elapsed(), events.len(), result.matches.len());
            }
            Err(e) => {
                error!(session = %self.session_id, error = %e, "pattern evaluation failed during tick");
                self.mark_error().await;
            }
        }

        // Re-evaluate escalation rules for every still-open alert from this
        // session on every tick, not only the ones just submitted above, so
        // a rule with `delay_seconds > 0` gets a chance to fire once its
        // delay has elapsed (S5) instead of being checked exactly once at
        // `age_seconds == 0` and never again.
        for alert_id in alerts.open_alert_ids_for_session(self.session_id) {
            alerts.evaluate_escalations(alert_id, &self.config).await;
        }

        if self.stop_requested.load(Ordering::SeqCst) {
            *self.status.write().await = SessionStatus::Stopped;
        }
    }
}

/// Drives `session.tick()` at `session.config.check_interval_seconds` using
/// the shared clock abstraction, until `stop_requested` flips (§4.5).
pub async fn run_session_loop(
    session: Arc<MonitoringSession>,
    sources: HashMap<String, Arc<dyn EventSource>>,
    registry: Arc<PatternRegistry>,
    baselines: Arc<BaselineStore>,
    detector: Arc<dyn AnomalyDetector>,
    alerts: Arc<AlertPipeline>,
    _clock: SharedClock,
) {
    let mut ticker = periodic_ticker(session.config.check_interval());
    loop {
        ticker.tick().await;
        if session.stop_requested.load(Ordering::SeqCst) {
            break;
        }
        session.tick(&sources, &registry, &baselines, detector.as_ref(), &alerts).await;
        if session.status().await == SessionStatus::Stopped {
            break;
        }
    }
}
