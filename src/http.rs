//! Blocking HTTP with a per-client rate limiter and bounded retry.
//!
//! One request in flight at a time. `HttpClient` owns its limiter state, so
//! two clients never share a "last request" timestamp.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::SourcesConfig;
use crate::error::{DefsError, Result};

/// Wait used when a server sends a `Retry-After` we cannot parse.
const RETRY_AFTER_FALLBACK: Duration = Duration::from_secs(2);

/// Statuses for which `Retry-After` is honored.
const RETRY_AFTER_STATUSES: [u16; 2] = [429, 503];

// ─────────────────────────────────────────────────────────────────────────────
// Clock
// ─────────────────────────────────────────────────────────────────────────────

pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&mut self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rate limiting
// ─────────────────────────────────────────────────────────────────────────────

/// Minimum spacing between requests, plus a random jitter whenever the
/// caller actually has to wait.
pub struct RateLimiter {
    min_interval: Duration,
    jitter_min: Duration,
    jitter_max: Duration,
    last: Option<Instant>,
    rng: StdRng,
}

impl RateLimiter {
    pub fn new(requests_per_sec: u32, jitter_min: Duration, jitter_max: Duration) -> Self {
        RateLimiter {
            min_interval: Duration::from_secs(1) / requests_per_sec.max(1),
            jitter_min,
            jitter_max: jitter_max.max(jitter_min),
            last: None,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    fn jitter(&mut self) -> Duration {
        if self.jitter_max.is_zero() {
            return Duration::ZERO;
        }
        self.rng.gen_range(self.jitter_min..=self.jitter_max)
    }

    /// Block until the next request may go out, then stamp it.
    pub fn wait<C: Clock + ?Sized>(&mut self, clock: &mut C) {
        if let Some(last) = self.last {
            let elapsed = clock.now().saturating_duration_since(last);
            if elapsed < self.min_interval {
                let pause = self.min_interval - elapsed + self.jitter();
                clock.sleep(pause);
            }
        }
        self.last = Some(clock.now());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Retry policy
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub retryable_statuses: Vec<u16>,
    /// Upper bound on any server-requested `Retry-After` wait.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            backoff_base: Duration::from_millis(600),
            retryable_statuses: vec![429, 500, 502, 503, 504],
            max_retry_after: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Exponential backoff after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }

    /// Delay requested by a `Retry-After` header given in seconds, capped
    /// at `max_retry_after`.
    pub fn retry_after(&self, header: &str) -> Duration {
        header
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .unwrap_or(RETRY_AFTER_FALLBACK)
            .min(self.max_retry_after)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub retry_after: Option<String>,
    pub body: String,
}

/// A single GET with no retry or pacing of its own.
pub trait Transport {
    fn send(&self, url: &str, query: &[(&str, &str)]) -> Result<HttpResponse>;
}

pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .user_agent(user_agent)
            .timeout(timeout)
            .build();
        UreqTransport { agent }
    }
}

impl Transport for UreqTransport {
    fn send(&self, url: &str, query: &[(&str, &str)]) -> Result<HttpResponse> {
        let mut request = self.agent.get(url).set("Accept", "application/json");
        for (key, value) in query {
            request = request.query(key, value);
        }

        // Non-2xx statuses are data here, not errors
        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(transport)) => {
                return Err(DefsError::Http {
                    url: url.to_string(),
                    message: transport.to_string(),
                })
            }
        };

        let status = response.status();
        let retry_after = response.header("Retry-After").map(str::to_string);
        let body = response.into_string().map_err(|e| DefsError::Http {
            url: url.to_string(),
            message: format!("failed to read body: {}", e),
        })?;

        Ok(HttpResponse { status, retry_after, body })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// JSON GET as seen by the fetchers.
pub trait JsonGet {
    fn get_json(&mut self, url: &str, query: &[(&str, &str)]) -> Result<Value>;
}

pub struct HttpClient<T = UreqTransport, C = SystemClock> {
    transport: T,
    clock: C,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl HttpClient<UreqTransport, SystemClock> {
    pub fn from_config(config: &SourcesConfig) -> Self {
        let transport = UreqTransport::new(
            &config.user_agent,
            Duration::from_secs(config.timeout_secs),
        );
        HttpClient::new(transport, SystemClock, config.rate_limiter(), config.retry_policy())
    }
}

impl<T: Transport, C: Clock> HttpClient<T, C> {
    pub fn new(transport: T, clock: C, limiter: RateLimiter, retry: RetryPolicy) -> Self {
        HttpClient { transport, clock, limiter, retry }
    }

    /// GET with pacing and retry. A retryable status that survives every
    /// attempt is returned as-is; a transport error that does is returned
    /// as `Err`.
    pub fn get(&mut self, url: &str, query: &[(&str, &str)]) -> Result<HttpResponse> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1u32;
        loop {
            self.limiter.wait(&mut self.clock);
            let delay = match self.transport.send(url, query) {
                Ok(response) if self.retry.is_retryable(response.status) => {
                    if attempt >= max_attempts {
                        warn!(url, status = response.status, attempts = attempt, "giving up after retries");
                        return Ok(response);
                    }
                    match response.retry_after.as_deref() {
                        Some(header) if RETRY_AFTER_STATUSES.contains(&response.status) => {
                            self.retry.retry_after(header)
                        }
                        _ => self.retry.backoff(attempt),
                    }
                }
                Ok(response) => return Ok(response),
                Err(e) => {
                    if attempt >= max_attempts {
                        warn!(url, error = %e, attempts = attempt, "giving up after retries");
                        return Err(e);
                    }
                    debug!(url, error = %e, "transport error");
                    self.retry.backoff(attempt)
                }
            };
            debug!(url, attempt, ?delay, "retrying");
            self.clock.sleep(delay);
            attempt += 1;
        }
    }
}

impl<T: Transport, C: Clock> JsonGet for HttpClient<T, C> {
    fn get_json(&mut self, url: &str, query: &[(&str, &str)]) -> Result<Value> {
        let response = self.get(url, query)?;
        if response.status != 200 {
            return Err(DefsError::Status {
                url: url.to_string(),
                status: response.status,
            });
        }
        Ok(serde_json::from_str(&response.body)?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test doubles
// ─────────────────────────────────────────────────────────────────────────────

/// `JsonGet` backed by a closure, for fetcher and pipeline tests.
#[cfg(test)]
pub(crate) struct FnHttp<F>(pub F);

#[cfg(test)]
impl<F> FnHttp<F>
where
    F: FnMut(&str, &[(&str, &str)]) -> Result<Value>,
{
    pub(crate) fn new(f: F) -> Self {
        FnHttp(f)
    }
}

#[cfg(test)]
impl<F> JsonGet for FnHttp<F>
where
    F: FnMut(&str, &[(&str, &str)]) -> Result<Value>,
{
    fn get_json(&mut self, url: &str, query: &[(&str, &str)]) -> Result<Value> {
        (self.0)(url, query)
    }
}
