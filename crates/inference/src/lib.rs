//! Client for a local text-completion service.
//!
//! [`InferenceClient`] wraps any [`InferenceBackend`] with per-attempt timeouts and an
//! explicit retry state machine ([`RetryMachine`]) driven by an injectable [`Clock`], so the
//! whole backoff schedule can be exercised without real delays.

mod backend;
mod client;
mod clock;
mod error;
mod ollama;
mod retry;
mod stub;

pub use backend::{GenerateRequest, InferenceBackend, ModelInfo};
pub use client::InferenceClient;
pub use clock::{Clock, ManualClock, TokioClock};
pub use error::{InferenceError, InferenceErrorKind, Result};
pub use ollama::{OllamaBackend, DEFAULT_BASE_URL};
pub use retry::{RetryMachine, RetryPolicy, RetryState};
pub use stub::StubBackend;
pub use tokio_util::sync::CancellationToken;
