//! Model Runtime capability (§6). When unavailable, engines fall back to
//! pattern/statistical paths (§4.2, §4.4): callers hold an
//! `Option<Arc<dyn ModelRuntime>>`, never a hard dependency.

use std::collections::HashMap;

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Tensor {
    pub fn vector(data: Vec<f32>) -> Self {
        let len = data.len();
        Self { shape: vec![len], data }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeInfo {
    pub loaded_models: Vec<String>,
    pub vocabulary_sizes: HashMap<String, usize>,
}

#[async_trait]
pub trait ModelRuntime: Send + Sync {
    async fn predict(&self, model_id: &str, tensor_in: Tensor) -> anyhow::Result<Tensor>;
    async fn info(&self) -> RuntimeInfo;
}

/// A runtime that always reports no loaded models, used to make "no model
/// runtime configured" an explicit, testable state rather than `Option`
/// juggling at every call site.
#[derive(Debug, Default)]
pub struct UnavailableRuntime;

#[async_trait]
impl ModelRuntime for UnavailableRuntime {
    async fn predict(&self, model_id: &str, _tensor_in: Tensor) -> anyhow::Result<Tensor> {
        anyhow::bail!("model runtime unavailable, cannot run model {model_id}")
    }

    async fn info(&self) -> RuntimeInfo {
        RuntimeInfo { loaded_models: Vec::new(), vocabulary_sizes: HashMap::new() }
    }
}
