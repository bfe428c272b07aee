use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One text-completion call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub stream: bool,
    /// Upper bound on generated tokens, if the service supports it.
    pub num_predict: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
}

/// Transport to a text-completion service. One call is one attempt; retries, timeouts and
/// cancellation live in [`crate::InferenceClient`].
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerateRequest) -> Result<String>;

    async fn list_models(&self) -> Result<Vec<ModelInfo>>;
}
