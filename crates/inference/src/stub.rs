use crate::{GenerateRequest, InferenceBackend, InferenceError, InferenceErrorKind, ModelInfo, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

type Responder = dyn Fn(&GenerateRequest) -> Result<String> + Send + Sync;

/// Deterministic in-process backend for tests and offline runs.
///
/// Scripted failures are consumed first, one per call; after that every call goes to the
/// responder closure.
pub struct StubBackend {
    responder: Box<Responder>,
    failures: Mutex<VecDeque<InferenceError>>,
    hanging_attempts: AtomicU32,
    calls: AtomicU32,
    requests: Mutex<Vec<GenerateRequest>>,
    models: Vec<ModelInfo>,
}

impl StubBackend {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&GenerateRequest) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            failures: Mutex::new(VecDeque::new()),
            hanging_attempts: AtomicU32::new(0),
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
            models: vec![ModelInfo {
                name: "stub".to_string(),
                size: None,
                modified_at: None,
            }],
        }
    }

    pub fn fixed(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_| Ok(text.clone()))
    }

    #[must_use]
    pub fn with_failures(self, kinds: impl IntoIterator<Item = InferenceErrorKind>) -> Self {
        {
            let mut queue = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
            queue.extend(
                kinds
                    .into_iter()
                    .map(|kind| InferenceError::new(kind, "scripted stub failure")),
            );
        }
        self
    }

    /// The first `n` calls never complete; the client's attempt timeout must rescue them.
    #[must_use]
    pub fn with_hanging_attempts(self, n: u32) -> Self {
        self.hanging_attempts.store(n, Ordering::SeqCst);
        self
    }

    #[must_use]
    pub fn with_models(mut self, names: &[&str]) -> Self {
        self.models = names
            .iter()
            .map(|name| ModelInfo {
                name: (*name).to_string(),
                size: None,
                modified_at: None,
            })
            .collect();
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl InferenceBackend for StubBackend {
    fn name(&self) -> &str {
        "stub"
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let hang = self
            .hanging_attempts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hang {
            return std::future::pending::<Result<String>>().await;
        }

        let scripted = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(err) = scripted {
            return Err(err);
        }

        (self.responder)(request)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(self.models.clone())
    }
}
