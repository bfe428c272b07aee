use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, InferenceError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceErrorKind {
    ConnectionRefused,
    Timeout,
    MalformedResponse,
    ServiceOverload,
    Cancelled,
}

impl InferenceErrorKind {
    /// Transient failures worth another attempt. A malformed protocol response will not get
    /// better on retry.
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::ConnectionRefused | Self::Timeout | Self::ServiceOverload
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionRefused => "connection refused",
            Self::Timeout => "timeout",
            Self::MalformedResponse => "malformed response",
            Self::ServiceOverload => "service overloaded",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for InferenceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message} (after {attempts} attempt(s))")]
pub struct InferenceError {
    pub kind: InferenceErrorKind,
    pub message: String,
    pub attempts: u32,
}

impl InferenceError {
    pub fn new(kind: InferenceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts: 0,
        }
    }

    pub fn connection_refused(message: impl Into<String>) -> Self {
        Self::new(InferenceErrorKind::ConnectionRefused, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(InferenceErrorKind::Timeout, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(InferenceErrorKind::MalformedResponse, message)
    }

    pub fn overload(message: impl Into<String>) -> Self {
        Self::new(InferenceErrorKind::ServiceOverload, message)
    }

    pub fn cancelled() -> Self {
        Self::new(InferenceErrorKind::Cancelled, "request cancelled")
    }

    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<reqwest::Error> for InferenceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::timeout(err.to_string());
        }
        if err.is_connect() {
            return Self::connection_refused(err.to_string());
        }
        if let Some(status) = err.status() {
            return from_status(status.as_u16(), err.to_string());
        }
        if err.is_decode() || err.is_body() {
            return Self::malformed(err.to_string());
        }
        // Remaining transport failures (reset, broken pipe) behave like an unreachable service.
        Self::connection_refused(err.to_string())
    }
}

pub(crate) fn from_status(status: u16, message: impl Into<String>) -> InferenceError {
    match status {
        429 | 502 | 503 | 504 => InferenceError::overload(message),
        408 => InferenceError::timeout(message),
        _ => InferenceError::malformed(message),
    }
}
