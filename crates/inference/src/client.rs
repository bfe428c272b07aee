use crate::clock::{Clock, TokioClock};
use crate::retry::{RetryMachine, RetryPolicy, RetryState};
use crate::{GenerateRequest, InferenceBackend, InferenceError, ModelInfo, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Resilient front for an [`InferenceBackend`]: per-attempt timeouts, exponential backoff and
/// cooperative cancellation. Holds no per-request state, so one client serves many workers.
#[derive(Clone)]
pub struct InferenceClient {
    backend: Arc<dyn InferenceBackend>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    stream: bool,
    num_predict: Option<u32>,
}

impl InferenceClient {
    pub fn new(backend: Arc<dyn InferenceBackend>, policy: RetryPolicy) -> Self {
        Self {
            backend,
            clock: Arc::new(TokioClock::new()),
            policy,
            stream: false,
            num_predict: None,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub const fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    #[must_use]
    pub const fn with_num_predict(mut self, num_predict: Option<u32>) -> Self {
        self.num_predict = num_predict;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Send `prompt` and return the raw completion text.
    ///
    /// Connection failures, timeouts and overload are retried per the policy; malformed
    /// responses fail at once. Cancellation stops new attempts immediately and interrupts
    /// backoff waits; an attempt already in flight runs to completion or its own timeout and
    /// its result is discarded.
    pub async fn request(
        &self,
        prompt: &str,
        model: &str,
        temperature: f32,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let request = GenerateRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
            temperature,
            stream: self.stream,
            num_predict: self.num_predict,
        };
        let mut machine = RetryMachine::new(self.policy.clone().with_attempt_timeout(timeout));
        let max_attempts = machine.policy().max_attempts;
        let mut response: Option<String> = None;
        machine.start();

        loop {
            match machine.state().clone() {
                RetryState::Idle => {
                    machine.start();
                }
                RetryState::Requesting { attempt } => {
                    if cancel.is_cancelled() {
                        machine.cancel();
                        continue;
                    }
                    let attempt_timeout = machine.attempt_timeout();
                    log::debug!(
                        "Inference attempt {attempt}/{max_attempts} to {} (model {model}, timeout {attempt_timeout:?})",
                        self.backend.name()
                    );

                    let started = self.clock.now();
                    // A cancel that lands mid-attempt is observed once the attempt settles.
                    let outcome = tokio::select! {
                        result = self.backend.generate(&request) => result,
                        _ = self.clock.sleep(attempt_timeout) => Err(InferenceError::timeout(
                            format!("no response within {attempt_timeout:?}"),
                        )),
                    };
                    let elapsed = self.clock.now().saturating_sub(started);

                    match outcome {
                        _ if cancel.is_cancelled() => {
                            log::debug!("Inference attempt {attempt} settled after cancellation; discarding it");
                            machine.cancel();
                        }
                        Ok(text) => {
                            machine.on_success(elapsed);
                            response = Some(text);
                        }
                        Err(err) => {
                            log::warn!("Inference attempt {attempt}/{max_attempts} failed: {err}");
                            machine.on_failure(err, elapsed);
                        }
                    }
                }
                RetryState::BackoffWait { attempt, delay } => {
                    log::info!(
                        "Retrying inference request in {delay:?} (attempt {} of {max_attempts})",
                        attempt + 1
                    );
                    let started = self.clock.now();
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            machine.cancel();
                        }
                        _ = self.clock.sleep(delay) => {
                            let waited = self.clock.now().saturating_sub(started);
                            machine.on_wait_elapsed(waited);
                        }
                    }
                }
                RetryState::Succeeded { attempts } => {
                    if attempts > 1 {
                        log::info!("Inference request succeeded after {attempts} attempts");
                    }
                    return response
                        .take()
                        .ok_or_else(|| InferenceError::malformed("empty response"));
                }
                RetryState::Failed { error } => return Err(error),
            }
        }
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        self.backend.list_models().await
    }
}
