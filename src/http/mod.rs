// Blocking HTTP helpers shared by the Ollama client and the page fetcher


use anyhow::{Result, anyhow};
use std::time::Duration;
use tracing::{debug, error, warn};

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;

/// How often and how patiently a request is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Delay before the second attempt; doubles after every failure
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    #[inline]
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            initial_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    #[inline]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(EXPONENTIAL_BACKOFF_BASE.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Build a ureq agent with a global timeout
#[inline]
pub fn build_agent(timeout: Duration, user_agent: Option<&str>) -> ureq::Agent {
    let builder = ureq::Agent::config_builder().timeout_global(Some(timeout));
    match user_agent {
        Some(user_agent) => builder.user_agent(user_agent).build().into(),
        None => builder.build().into(),
    }
}

/// Whether a failed request is worth repeating
#[inline]
pub fn is_retryable(error: &ureq::Error) -> bool {
    match error {
        ureq::Error::StatusCode(status) => *status >= 500,
        ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound
        | ureq::Error::Timeout(_)
        | ureq::Error::Io(_) => true,
        _ => false,
    }
}

/// Run `request_fn` until it succeeds, a non-retryable error occurs, or attempts run out
///
/// Server errors (5xx) and transport failures are retried with exponential
/// backoff; client errors (4xx) fail immediately.
#[inline]
pub fn request_with_retry<T, F>(policy: &RetryPolicy, target: &str, mut request_fn: F) -> Result<T>
where
    F: FnMut() -> Result<T, ureq::Error>,
{
    let attempts = policy.attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        debug!("HTTP request attempt {}/{} to {}", attempt, attempts, target);

        match request_fn() {
            Ok(response) => {
                debug!("Request succeeded on attempt {}", attempt);
                return Ok(response);
            }
            Err(ureq::Error::StatusCode(status)) if status < 500 => {
                warn!("Client error (status {}), not retrying", status);
                return Err(anyhow!("Client error: HTTP {} from {}", status, target));
            }
            Err(error) if is_retryable(&error) => {
                warn!(
                    "Retryable error: {}, attempt {}/{}",
                    error, attempt, attempts
                );
                last_error = Some(anyhow!("Request error: {}", error));

                if attempt < attempts {
                    let delay = policy.delay_for(attempt);
                    debug!("Waiting {:?} before retry", delay);
                    std::thread::sleep(delay);
                }
            }
            Err(error) => {
                warn!("Non-retryable error: {}", error);
                return Err(anyhow!("Non-retryable error: {}", error));
            }
        }
    }

    error!("All retry attempts failed for request to {}", target);

    Err(last_error.unwrap_or_else(|| anyhow!("Request failed after retries")))
}
