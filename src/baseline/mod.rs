//! Behavioral Baseline & Anomaly Subsystem (§4.2): per-principal per-metric
//! baselines updated by EMA, deviation scoring, and risk/confidence metrics.

pub mod anomaly;
pub mod features;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{CoreError, CoreResult};
use crate::pattern::PatternMatch;

pub use anomaly::{Anomaly, AnomalySeverity, ANOMALY_ERROR_THRESHOLD};
pub use features::{FeatureVector, FEATURE_COUNT};

const EMA_ALPHA: f64 = 0.1;
const DEFAULT_TOLERANCE: f64 = 0.2;
const MAX_SIGNIFICANCE: f64 = 5.0;
const TREND_HISTORY_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Stable,
    Increasing,
    Decreasing,
    Volatile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    pub principal_id: String,
    pub metric: String,
    pub baseline_value: f64,
    pub variation_tolerance: f64,
    pub confidence: f64,
    pub trend: Trend,
    pub last_updated: DateTime<Utc>,
    /// EMA estimate of variance, used by the statistical anomaly fallback
    /// (§4.2) when no model runtime is available.
    variance_estimate: f64,
    #[serde(skip)]
    recent_deltas: VecDeque<f64>,
}

impl Baseline {
    fn new(principal_id: &str, metric: &str, value: f64, confidence: f64) -> Self {
        Self {
            principal_id: principal_id.to_string(),
            metric: metric.to_string(),
            baseline_value: value,
            variation_tolerance: DEFAULT_TOLERANCE,
            confidence,
            trend: Trend::Stable,
            last_updated: Utc::now(),
            variance_estimate: 0.0,
            recent_deltas: VecDeque::new(),
        }
    }

    pub fn sigma(&self) -> f64 {
        self.variance_estimate.sqrt()
    }

    /// EMA update per §4.2 and property P3: `value <- 0.1*v + 0.9*value`.
    fn apply_update(&mut self, v: f64, c: f64) {
        let relative_delta = (v - self.baseline_value) / self.baseline_value.max(1.0);
        self.recent_deltas.push_back(relative_delta);
        if self.recent_deltas.len() > TREND_HISTORY_LEN {
            self.recent_deltas.pop_front();
        }

        let squared_error = (v - self.baseline_value).powi(2);
        self.variance_estimate = EMA_ALPHA * squared_error + (1.0 - EMA_ALPHA) * self.variance_estimate;

        self.baseline_value = EMA_ALPHA * v + (1.0 - EMA_ALPHA) * self.baseline_value;
        self.confidence = c.max(self.confidence * 0.95);
        self.last_updated = Utc::now();
        self.trend = self.compute_trend();
    }

    fn compute_trend(&self) -> Trend {
        if self.recent_deltas.len() < 2 {
            return if self.recent_deltas.back().copied().unwrap_or(0.0).abs() < self.variation_tolerance * 0.5 {
                Trend::Stable
            } else if self.recent_deltas.back().copied().unwrap_or(0.0) > 0.0 {
                Trend::Increasing
            } else {
                Trend::Decreasing
            };
        }
        let sign_flips = self
            .recent_deltas
            .iter()
            .zip(self.recent_deltas.iter().skip(1))
            .filter(|(a, b)| a.signum() != b.signum() && a.abs() > 1e-9 && b.abs() > 1e-9)
            .count();
        if sign_flips >= 2 {
            return Trend::Volatile;
        }
        let mean: f64 = self.recent_deltas.iter().sum::<f64>() / self.recent_deltas.len() as f64;
        if mean.abs() < self.variation_tolerance * 0.5 {
            Trend::Stable
        } else if mean > 0.0 {
            Trend::Increasing
        } else {
            Trend::Decreasing
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviationDirection {
    Increasing,
    Decreasing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deviation {
    pub metric: String,
    pub relative_deviation: f64,
    pub significance: f64,
    pub direction: DeviationDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskCategory {
    Low,
    Medium,
    High,
    Critical,
}

pub fn risk_category(overall_risk: f64) -> RiskCategory {
    if overall_risk >= 75.0 {
        RiskCategory::Critical
    } else if overall_risk >= 50.0 {
        RiskCategory::High
    } else if overall_risk >= 25.0 {
        RiskCategory::Medium
    } else {
        RiskCategory::Low
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceMetrics {
    pub data_quality: f64,
    pub baseline_stability: f64,
    pub model_confidence: f64,
    pub overall: f64,
}

/// Secondary, non-contributing deviation stream (SPEC_FULL.md §10.6):
/// compares a principal's own baseline against the peer group's median
/// rather than its own history. Never folds into `overall_risk`; the
/// primary deviation model in this struct is `deviations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerDeviation {
    pub metric: String,
    pub principal_value: f64,
    pub peer_median: f64,
    pub relative_deviation: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehavioralAnalysisResult {
    pub principal_id: String,
    pub overall_risk: f64,
    pub category: RiskCategory,
    pub deviations: Vec<Deviation>,
    pub peer_deviations: Vec<PeerDeviation>,
    pub anomalies: Vec<Anomaly>,
    pub pattern_matches: Vec<PatternMatch>,
    pub recommendations: Vec<String>,
    pub confidence: ConfidenceMetrics,
}

#[derive(Debug, Clone)]
struct PrincipalProfile {
    historical_risk: f64,
    peer_group: Option<String>,
}

/// Per-principal map of metric -> baseline, sharded by principal id (§5):
/// writes to a principal are serialized via the per-principal `RwLock`;
/// reads within a single deviation scan see a consistent snapshot.
#[derive(Debug, Default)]
pub struct BaselineStore {
    principals: DashMap<String, PrincipalProfile>,
    baselines: DashMap<String, Arc<RwLock<HashMap<String, Baseline>>>>,
    /// Principal -> peer group -> baselines contributed, for the peer-group
    /// supplement described in SPEC_FULL.md §10.6.
    peer_groups: DashMap<String, Vec<String>>,
}

impl BaselineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_principal(&self, principal_id: &str, peer_group: Option<String>) {
        if let Some(group) = &peer_group {
            self.peer_groups.entry(group.clone()).or_default().push(principal_id.to_string());
        }
        self.principals
            .entry(principal_id.to_string())
            .or_insert(PrincipalProfile { historical_risk: 0.0, peer_group });
    }

    fn shard(&self, principal_id: &str) -> Arc<RwLock<HashMap<String, Baseline>>> {
        self.baselines
            .entry(principal_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(HashMap::new())))
            .clone()
    }

    /// EMA baseline update (§4.2, property P3). Creates the baseline on
    /// first observation of `metric` for `principal_id`.
    pub async fn update_baseline(&self, principal_id: &str, metric: &str, v: f64, c: f64) {
        let shard = self.shard(principal_id);
        let mut guard = shard.write().await;
        match guard.get_mut(metric) {
            Some(baseline) => baseline.apply_update(v, c),
            None => {
                guard.insert(metric.to_string(), Baseline::new(principal_id, metric, v, c));
            }
        }
    }

    pub async fn get_baseline(&self, principal_id: &str, metric: &str) -> Option<Baseline> {
        let shard = self.shard(principal_id);
        let guard = shard.read().await;
        guard.get(metric).cloned()
    }

    /// Computes deviations for every metric in `features` that has a
    /// baseline, per §4.2. Metrics with no prior baseline are skipped
    /// (nothing to deviate from yet) rather than treated as zero-deviation.
    pub async fn deviations(&self, principal_id: &str, features: &FeatureVector) -> Vec<Deviation> {
        let shard = self.shard(principal_id);
        let guard = shard.read().await;
        let mut out = Vec::new();
        for (metric, value) in features.iter() {
            let Some(baseline) = guard.get(metric) else { continue };
            let relative_deviation = (value - baseline.baseline_value).abs() / baseline.baseline_value.max(1.0);
            if relative_deviation > baseline.variation_tolerance {
                let significance = (relative_deviation / baseline.variation_tolerance).min(MAX_SIGNIFICANCE);
                let direction = if *value >= baseline.baseline_value {
                    DeviationDirection::Increasing
                } else {
                    DeviationDirection::Decreasing
                };
                out.push(Deviation { metric: metric.clone(), relative_deviation, significance, direction });
            }
        }
        out
    }

    /// Peer-group relative baselining (SPEC_FULL.md §10.6): for each metric
    /// with a baseline, compares the principal's own baseline value to the
    /// median baseline value of its peer-group members (self included).
    /// A principal with no assigned peer group yields an empty vec.
    async fn peer_deviations(&self, principal_id: &str) -> Vec<PeerDeviation> {
        let Some(peer_group) = self.principals.get(principal_id).and_then(|p| p.peer_group.clone()) else {
            return Vec::new();
        };
        let Some(members) = self.peer_groups.get(&peer_group).map(|m| m.clone()) else {
            return Vec::new();
        };

        let own_shard = self.shard(principal_id);
        let own_baselines = own_shard.read().await.clone();

        let mut out = Vec::new();
        for (metric, own_baseline) in &own_baselines {
            let mut peer_values: Vec<f64> = Vec::new();
            for member in &members {
                if member == principal_id {
                    peer_values.push(own_baseline.baseline_value);
                    continue;
                }
                if let Some(b) = self.get_baseline(member, metric).await {
                    peer_values.push(b.baseline_value);
                }
            }
            if peer_values.len() < 2 {
                continue;
            }
            peer_values.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let mid = peer_values.len() / 2;
            let peer_median = if peer_values.len() % 2 == 0 {
                (peer_values[mid - 1] + peer_values[mid]) / 2.0
            } else {
                peer_values[mid]
            };
            let relative_deviation = (own_baseline.baseline_value - peer_median).abs() / peer_median.max(1.0);
            out.push(PeerDeviation {
                metric: metric.clone(),
                principal_value: own_baseline.baseline_value,
                peer_median,
                relative_deviation,
            });
        }
        out
    }

    async fn baseline_stability(&self, principal_id: &str) -> f64 {
        let shard = self.shard(principal_id);
        let guard = shard.read().await;
        if guard.is_empty() {
            return 0.5;
        }
        let stable_confident =
            guard.values().filter(|b| b.confidence > 0.7 && b.trend == Trend::Stable).count();
        stable_confident as f64 / guard.len() as f64
    }

    fn has_principal(&self, principal_id: &str) -> bool {
        self.principals.contains_key(principal_id)
    }

    fn historical_risk(&self, principal_id: &str) -> f64 {
        self.principals.get(principal_id).map(|p| p.historical_risk).unwrap_or(0.0)
    }

    pub fn set_historical_risk(&self, principal_id: &str, risk: f64) {
        if let Some(mut profile) = self.principals.get_mut(principal_id) {
            profile.historical_risk = risk.clamp(0.0, 100.0);
        }
    }

    /// Runs the full §4.2 pipeline for one principal: deviation detection,
    /// anomaly detection (model-backed or statistical fallback), risk
    /// scoring, and confidence metrics.
    pub async fn analyze(
        &self,
        principal_id: &str,
        features: &FeatureVector,
        detector: &dyn anomaly::AnomalyDetector,
        pattern_matches: Vec<PatternMatch>,
    ) -> CoreResult<BehavioralAnalysisResult> {
        if !self.has_principal(principal_id) {
            return Err(CoreError::UnknownPrincipal(principal_id.to_string()));
        }

        let deviations = self.deviations(principal_id, features).await;
        let peer_deviations = self.peer_deviations(principal_id).await;

        let shard = self.shard(principal_id);
        let baselines_snapshot = shard.read().await.clone();
        let anomalies = detector.detect(features, &baselines_snapshot).await;

        let deviation_component: f64 = deviations.iter().map(|d| d.significance * 10.0).sum();
        let anomaly_component = anomalies.len() as f64 * 5.0;
        let pattern_component: f64 = pattern_matches.iter().map(|m| m.risk_contribution).sum();

        let overall_risk =
            (self.historical_risk(principal_id) + deviation_component + anomaly_component + pattern_component)
                .min(100.0);

        let data_quality = features.non_zero_fraction();
        let baseline_stability = self.baseline_stability(principal_id).await;
        let model_confidence = detector.confidence();
        let overall_confidence = (data_quality + baseline_stability + model_confidence) / 3.0;

        Ok(BehavioralAnalysisResult {
            principal_id: principal_id.to_string(),
            overall_risk,
            category: risk_category(overall_risk),
            deviations,
            peer_deviations,
            anomalies,
            pattern_matches,
            recommendations: recommendations_for(overall_risk),
            confidence: ConfidenceMetrics {
                data_quality,
                baseline_stability,
                model_confidence,
                overall: overall_confidence,
            },
        })
    }
}

fn recommendations_for(overall_risk: f64) -> Vec<String> {
    match risk_category(overall_risk) {
        RiskCategory::Critical => vec![
            "isolate the principal's active sessions pending review".into(),
            "escalate to the on-call security responder".into(),
        ],
        RiskCategory::High => vec!["require step-up authentication on next access".into()],
        RiskCategory::Medium => vec!["flag for analyst review during the next triage pass".into()],
        RiskCategory::Low => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ema_update_matches_property_p3() {
        let store = BaselineStore::new();
        store.register_principal("alice", None);
        store.update_baseline("alice", "login_frequency", 10.0, 0.9).await;
        store.update_baseline("alice", "login_frequency", 15.0, 0.9).await;
        let baseline = store.get_baseline("alice", "login_frequency").await.unwrap();
        assert!((baseline.baseline_value - 10.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn scenario_s3_baseline_deviation() {
        let store = BaselineStore::new();
        store.register_principal("alice", None);
        store.update_baseline("alice", "login_frequency", 10.0, 0.9).await;

        let mut features = FeatureVector::zeroed();
        features.set("login_frequency", 15.0);
        let deviations = store.deviations("alice", &features).await;

        let dev = deviations.iter().find(|d| d.metric == "login_frequency").unwrap();
        assert!((dev.relative_deviation - 0.5).abs() < 1e-9);
        assert!((dev.significance - 2.5).abs() < 1e-9);
        assert_eq!(dev.direction, DeviationDirection::Increasing);
    }

    #[tokio::test]
    async fn unknown_principal_is_surfaced() {
        let store = BaselineStore::new();
        let features = FeatureVector::zeroed();
        let detector = anomaly::StatisticalFallbackDetector;
        let result = store.analyze("ghost", &features, &detector, Vec::new()).await;
        assert!(matches!(result, Err(CoreError::UnknownPrincipal(_))));
    }

    #[tokio::test]
    async fn peer_deviation_compares_against_group_median() {
        let store = BaselineStore::new();
        store.register_principal("alice", Some("engineering".into()));
        store.register_principal("bob", Some("engineering".into()));
        store.register_principal("carol", Some("engineering".into()));
        store.update_baseline("alice", "login_frequency", 10.0, 0.9).await;
        store.update_baseline("bob", "login_frequency", 10.0, 0.9).await;
        store.update_baseline("carol", "login_frequency", 40.0, 0.9).await;

        let features = FeatureVector::zeroed();
        let detector = anomaly::StatisticalFallbackDetector;
        let result = store.analyze("carol", &features, &detector, Vec::new()).await.unwrap();

        let dev = result.peer_deviations.iter().find(|d| d.metric == "login_frequency").unwrap();
        assert!((dev.peer_median - 10.0).abs() < 1e-9);
        assert!(dev.relative_deviation > 0.0);
    }

    #[tokio::test]
    async fn principal_with_no_peer_group_has_no_peer_deviations() {
        let store = BaselineStore::new();
        store.register_principal("alice", None);
        store.update_baseline("alice", "login_frequency", 10.0, 0.9).await;
        let features = FeatureVector::zeroed();
        let detector = anomaly::StatisticalFallbackDetector;
        let result = store.analyze("alice", &features, &detector, Vec::new()).await.unwrap();
        assert!(result.peer_deviations.is_empty());
    }

    #[tokio::test]
    async fn risk_capped_at_100_and_category_follows_thresholds() {
        let store = BaselineStore::new();
        store.register_principal("bob", None);
        store.set_historical_risk("bob", 95.0);
        let features = FeatureVector::zeroed();
        let detector = anomaly::StatisticalFallbackDetector;
        let result = store.analyze("bob", &features, &detector, Vec::new()).await.unwrap();
        assert!(result.overall_risk <= 100.0);
        assert_eq!(result.category, RiskCategory::Critical);
    }
}
