//! Bounded exponential backoff for rate-limited chat requests.
//!
//! The controller is a pure state machine; the chat session performs the
//! waiting and the placeholder updates it asks for.

use std::time::Duration;

use crate::core::config::RetrySettings;
use crate::core::transport::TransportError;

/// Decides whether a failure is the upstream asking us to slow down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitClassifier {
    statuses: Vec<u16>,
    markers: Vec<String>,
}

impl RateLimitClassifier {
    pub fn new(statuses: Vec<u16>, markers: Vec<String>) -> Self {
        Self { statuses, markers }
    }

    /// Only upstream answers are classified; a dropped connection never is.
    pub fn is_rate_limited(&self, err: &TransportError) -> bool {
        let TransportError::Http { status, message } = err else {
            return false;
        };
        self.statuses.contains(status)
            || self
                .markers
                .iter()
                .any(|marker| !marker.is_empty() && message.contains(marker.as_str()))
    }
}

impl Default for RateLimitClassifier {
    fn default() -> Self {
        let settings = RetrySettings::default();
        Self::new(settings.rate_limit_statuses, settings.rate_limit_markers)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub classifier: RateLimitClassifier,
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: settings.base_delay(),
            classifier: RateLimitClassifier::new(
                settings.rate_limit_statuses.clone(),
                settings.rate_limit_markers.clone(),
            ),
        }
    }

    /// Delay before attempt `attempt + 1`: `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    pub fn start(&self) -> RetryState {
        RetryState::Attempting(0)
    }

    /// Transition out of `Attempting(attempt)` after it failed with `err`.
    pub fn on_failure(&self, attempt: u32, err: &TransportError) -> RetryState {
        let rate_limited = self.classifier.is_rate_limited(err);
        if rate_limited && attempt < self.max_retries {
            RetryState::RetryWait(attempt)
        } else if rate_limited {
            RetryState::FailedTerminal(TerminalFailure::RateLimitExhausted)
        } else {
            RetryState::FailedTerminal(TerminalFailure::Upstream(err.clone()))
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalFailure {
    /// Still rate limited after the last permitted retry.
    RateLimitExhausted,
    /// Any failure not classified as rate limiting; never retried.
    Upstream(TransportError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryState {
    Attempting(u32),
    RetryWait(u32),
    Success,
    FailedTerminal(TerminalFailure),
}

impl RetryState {
    /// `Attempting(n)` becomes `Success` once its stream closes cleanly.
    pub fn on_success(self) -> RetryState {
        match self {
            RetryState::Attempting(_) => RetryState::Success,
            other => other,
        }
    }

    /// `RetryWait(n)` becomes `Attempting(n + 1)` once the delay has elapsed;
    /// other states are unchanged.
    pub fn on_wait_elapsed(self) -> RetryState {
        match self {
            RetryState::RetryWait(attempt) => RetryState::Attempting(attempt + 1),
            other => other,
        }
    }
}

/// Placeholder content shown while waiting out a rate limit.
pub fn wait_placeholder(wait_message: &str, delay: Duration, attempt: u32, max_retries: u32) -> String {
    let secs = (delay.as_millis() as f64 / 1000.0).round() as u64;
    format!(
        "{wait_message}\n\n(Retrying in {secs}s... {}/{max_retries})",
        attempt + 1
    )
}
