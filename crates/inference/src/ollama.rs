use crate::error::from_status;
use crate::{GenerateRequest, InferenceBackend, InferenceError, ModelInfo, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const ERROR_BODY_PREVIEW_CHARS: usize = 200;

/// Backend for an Ollama-compatible HTTP API (`/api/generate`, `/api/tags`).
pub struct OllamaBackend {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Deserialize)]
struct GenerateReply {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    eval_count: Option<u64>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
}

#[derive(Deserialize)]
struct TagsReply {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|err| {
                InferenceError::connection_refused(format!("build http client: {err}"))
            })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn read_stream(mut response: reqwest::Response) -> Result<String> {
        let mut buffer: Vec<u8> = Vec::new();
        let mut text = String::new();
        let mut done = false;

        while let Some(chunk) = response.chunk().await? {
            buffer.extend_from_slice(&chunk);
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                done |= apply_stream_line(&line, &mut text)?;
            }
        }
        if !buffer.is_empty() {
            done |= apply_stream_line(&buffer, &mut text)?;
        }

        if !done {
            if text.is_empty() {
                return Err(InferenceError::malformed(
                    "stream ended before any completion text",
                ));
            }
            log::warn!("Inference stream ended without a done marker");
        }
        Ok(text)
    }
}

/// Decode one NDJSON line of a streamed reply, appending its text. Returns the `done` flag.
pub(crate) fn apply_stream_line(line: &[u8], text: &mut String) -> Result<bool> {
    let trimmed = String::from_utf8_lossy(line);
    let trimmed = trimmed.trim();
    if trimmed.is_empty() {
        return Ok(false);
    }
    let reply: GenerateReply = serde_json::from_str(trimmed)
        .map_err(|err| InferenceError::malformed(format!("invalid stream line: {err}")))?;
    if let Some(error) = reply.error {
        return Err(InferenceError::malformed(error));
    }
    if let Some(part) = reply.response {
        text.push_str(&part);
    }
    if reply.done {
        log_token_usage(reply.prompt_eval_count, reply.eval_count);
    }
    Ok(reply.done)
}

fn log_token_usage(prompt_tokens: Option<u64>, completion_tokens: Option<u64>) {
    if prompt_tokens.is_some() || completion_tokens.is_some() {
        log::debug!(
            "Inference used {} prompt + {} completion tokens",
            prompt_tokens.unwrap_or(0),
            completion_tokens.unwrap_or(0)
        );
    }
}

fn preview(body: &str) -> String {
    let mut out: String = body.chars().take(ERROR_BODY_PREVIEW_CHARS).collect();
    if body.chars().count() > ERROR_BODY_PREVIEW_CHARS {
        out.push('…');
    }
    out
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    fn name(&self) -> &str {
        &self.base_url
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String> {
        let body = GenerateBody {
            model: &request.model,
            prompt: &request.prompt,
            stream: request.stream,
            options: GenerateOptions {
                temperature: request.temperature,
                num_predict: request.num_predict,
            },
        };

        let response = self
            .client
            .post(self.url("/api/generate"))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(from_status(
                status.as_u16(),
                format!("HTTP {status}: {}", preview(&text)),
            ));
        }

        if request.stream {
            return Self::read_stream(response).await;
        }

        let bytes = response.bytes().await?;
        let reply: GenerateReply = serde_json::from_slice(&bytes).map_err(|err| {
            InferenceError::malformed(format!(
                "invalid generate reply ({err}): {}",
                preview(&String::from_utf8_lossy(&bytes))
            ))
        })?;
        if let Some(error) = reply.error {
            return Err(InferenceError::malformed(error));
        }
        log_token_usage(reply.prompt_eval_count, reply.eval_count);
        reply
            .response
            .ok_or_else(|| InferenceError::malformed("generate reply has no `response` field"))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self.client.get(self.url("/api/tags")).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(from_status(
                status.as_u16(),
                format!("HTTP {status}: {}", preview(&text)),
            ));
        }
        let bytes = response.bytes().await?;
        let tags: TagsReply = serde_json::from_slice(&bytes)
            .map_err(|err| InferenceError::malformed(format!("invalid tags reply: {err}")))?;
        Ok(tags.models)
    }
}
