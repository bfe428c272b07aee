use crate::InferenceError;
use std::time::Duration;

/// Retry schedule for one logical request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Wait after failed attempt `attempt` (1-based): base doubled per attempt, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Ceiling on cumulative time spent in attempts and waits.
    pub fn total_budget(&self) -> Duration {
        let per_attempt = self.attempt_timeout.max(self.max_delay);
        per_attempt
            .checked_mul(self.max_attempts.max(1))
            .unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryState {
    Idle,
    Requesting { attempt: u32 },
    BackoffWait { attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    Failed { error: InferenceError },
}

impl RetryState {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. })
    }
}

/// Pure transition logic for `Idle → Requesting → (BackoffWait → Requesting)* → Succeeded | Failed`.
///
/// The machine does no I/O and never sleeps; the driver reports how long each step took so
/// the cumulative budget can be enforced against any clock.
#[derive(Debug, Clone)]
pub struct RetryMachine {
    policy: RetryPolicy,
    state: RetryState,
    spent: Duration,
}

impl RetryMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: RetryState::Idle,
            spent: Duration::ZERO,
        }
    }

    pub fn state(&self) -> &RetryState {
        &self.state
    }

    pub fn spent(&self) -> Duration {
        self.spent
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn start(&mut self) -> &RetryState {
        if self.state == RetryState::Idle {
            self.state = RetryState::Requesting { attempt: 1 };
        }
        &self.state
    }

    /// Timeout for the attempt in flight: the per-attempt timeout, clipped to what is left of
    /// the cumulative budget.
    pub fn attempt_timeout(&self) -> Duration {
        let remaining = self.policy.total_budget().saturating_sub(self.spent);
        self.policy.attempt_timeout.min(remaining)
    }

    pub fn on_success(&mut self, elapsed: Duration) -> &RetryState {
        if let RetryState::Requesting { attempt } = self.state {
            self.spent += elapsed;
            self.state = RetryState::Succeeded { attempts: attempt };
        }
        &self.state
    }

    pub fn on_failure(&mut self, error: InferenceError, elapsed: Duration) -> &RetryState {
        let RetryState::Requesting { attempt } = self.state else {
            return &self.state;
        };
        self.spent += elapsed;

        if !error.is_retryable() || attempt >= self.policy.max_attempts {
            self.state = RetryState::Failed {
                error: error.with_attempts(attempt),
            };
            return &self.state;
        }

        let delay = self.policy.delay_for(attempt);
        if self.spent + delay >= self.policy.total_budget() {
            log::debug!(
                "Retry budget exhausted after {attempt} attempt(s) ({:?} spent)",
                self.spent
            );
            self.state = RetryState::Failed {
                error: error.with_attempts(attempt),
            };
            return &self.state;
        }

        self.state = RetryState::BackoffWait { attempt, delay };
        &self.state
    }

    pub fn on_wait_elapsed(&mut self, waited: Duration) -> &RetryState {
        if let RetryState::BackoffWait { attempt, .. } = self.state {
            self.spent += waited;
            self.state = RetryState::Requesting {
                attempt: attempt + 1,
            };
        }
        &self.state
    }

    /// Cancellation wins from any non-terminal state.
    pub fn cancel(&mut self) -> &RetryState {
        if !self.state.is_terminal() {
            let attempts = match self.state {
                RetryState::Requesting { attempt } | RetryState::BackoffWait { attempt, .. } => {
                    attempt
                }
                _ => 0,
            };
            self.state = RetryState::Failed {
                error: InferenceError::cancelled().with_attempts(attempts),
            };
        }
        &self.state
    }
}
