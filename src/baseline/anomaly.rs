//! Autoencoder-style anomaly detection with a statistical fallback (§4.2).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::features::FeatureVector;
use super::Baseline;
use crate::model_runtime::{ModelRuntime, Tensor};

/// Reconstruction-error threshold, named rather than left as a magic
/// number inline (§9 open question).
pub const ANOMALY_ERROR_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnomalySeverity {
    Medium,
    High,
    Critical,
}

fn severity_for_error(error: f64) -> AnomalySeverity {
    if error > 2.0 {
        AnomalySeverity::Critical
    } else if error > 1.0 {
        AnomalySeverity::High
    } else {
        AnomalySeverity::Medium
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub feature: String,
    pub reconstruction_error: f64,
    pub severity: AnomalySeverity,
}

/// Abstracts over "a model runtime is available" vs "fall back to
/// statistics", so `BaselineStore::analyze` doesn't need to know which.
#[async_trait]
pub trait AnomalyDetector: Send + Sync {
    async fn detect(&self, features: &FeatureVector, baselines: &HashMap<String, Baseline>) -> Vec<Anomaly>;
    /// Contributes to `ConfidenceMetrics::model_confidence`.
    fn confidence(&self) -> f64;
}

/// Statistical fallback: `e_i = |x_i - baseline.value| / max(sigma_i, eps)`.
#[derive(Debug, Default)]
pub struct StatisticalFallbackDetector;

const EPSILON: f64 = 1e-6;

#[async_trait]
impl AnomalyDetector for StatisticalFallbackDetector {
    async fn detect(&self, features: &FeatureVector, baselines: &HashMap<String, Baseline>) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();
        for (metric, value) in features.iter() {
            let Some(baseline) = baselines.get(&metric) else { continue };
            let sigma = baseline.sigma().max(EPSILON);
            let error = (value - baseline.baseline_value).abs() / sigma;
            if error > ANOMALY_ERROR_THRESHOLD {
                anomalies.push(Anomaly { feature: metric, reconstruction_error: error, severity: severity_for_error(error) });
            }
        }
        anomalies
    }

    fn confidence(&self) -> f64 {
        // No model backing this detector; a conservative fixed confidence
        // keeps `ConfidenceMetrics::overall` from over-stating certainty.
        0.5
    }
}

/// Model-backed detector: calls an autoencoder-style model via the Model
/// Runtime capability and compares input to its reconstruction (§4.2's
/// primary path). Falls back to the same statistics `StatisticalFallbackDetector`
/// uses when the runtime call itself fails, since a model-runtime fault is
/// exactly the "no model available" case (§4.2, §7 `EngineDegraded`).
pub struct ModelBackedDetector {
    runtime: Arc<dyn ModelRuntime>,
    model_id: String,
}

impl ModelBackedDetector {
    pub fn new(runtime: Arc<dyn ModelRuntime>, model_id: impl Into<String>) -> Self {
        Self { runtime, model_id: model_id.into() }
    }

    /// Runs the configured model against `features` and returns its
    /// reconstruction `x_hat`.
    pub async fn predict_sync(&self, features: &FeatureVector) -> anyhow::Result<FeatureVector> {
        let input = Tensor::vector(features.raw().iter().map(|v| *v as f32).collect());
        let output = self.runtime.predict(&self.model_id, input).await?;
        let mut reconstructed = FeatureVector::zeroed();
        for (i, (name, _)) in features.iter().enumerate() {
            let value = output.data.get(i).copied().unwrap_or(0.0) as f64;
            reconstructed.set(&name, value);
        }
        Ok(reconstructed)
    }
}

#[async_trait]
impl AnomalyDetector for ModelBackedDetector {
    async fn detect(&self, features: &FeatureVector, baselines: &HashMap<String, Baseline>) -> Vec<Anomaly> {
        match self.predict_sync(features).await {
            Ok(reconstructed) => anomalies_from_reconstruction(features, &reconstructed),
            Err(e) => {
                tracing::warn!(model_id = %self.model_id, error = %e, "model runtime prediction failed, using statistical fallback");
                StatisticalFallbackDetector.detect(features, baselines).await
            }
        }
    }

    fn confidence(&self) -> f64 {
        // A working model backs this detector's output, so it contributes
        // more certainty than the fixed-statistics fallback's 0.5.
        0.85
    }
}

/// Compares an input vector against its model reconstruction, emitting an
/// `Anomaly` per feature whose error exceeds the threshold (§4.2).
pub fn anomalies_from_reconstruction(input: &FeatureVector, reconstructed: &FeatureVector) -> Vec<Anomaly> {
    input
        .iter()
        .filter_map(|(name, value)| {
            let error = (value - reconstructed.get(&name)).abs();
            (error > ANOMALY_ERROR_THRESHOLD)
                .then(|| Anomaly { feature: name, reconstruction_error: error, severity: severity_for_error(error) })
        })
        .collect()
}
