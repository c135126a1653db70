//! Fetch pipeline: bounded retries over the managed connection
//!
//! A fetch runs at most `max_retries + 1` attempts. Every attempt leases the
//! connection handle, wraps the upstream call in a per-request timeout and
//! classifies the result:
//!
//! | Result                         | Outcome            | Retry? |
//! |--------------------------------|--------------------|--------|
//! | 2xx                            | `Success`          | -      |
//! | 400 / 401 / 403 / 404, other 4xx | `PermanentError` | never  |
//! | 429                            | `RetryableError`   | longer backoff |
//! | 5xx, unexpected status         | `RetryableError`   | backoff |
//! | timeout, reset, DNS            | `TransportError`   | backoff |
//! | resource exhaustion            | `TransportError`   | teardown, then backoff |
//!
//! A request shape that once failed permanently is remembered and refused
//! without touching the network for the rest of the process lifetime.

use crate::cancel::CancelSignal;
use crate::connection::ConnectionManager;
use crate::error::{ErrorClass, ResilienceError};
use bytes::Bytes;
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Description of one upstream request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchRequest {
    /// Short label used in logs and statistics
    pub label: String,
    /// Path relative to the upstream base
    pub endpoint: String,
    /// Query parameters, in order
    pub params: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn new(label: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            endpoint: endpoint.into(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Identity of the request shape for permanent-failure blocking
    pub fn shape(&self) -> String {
        let mut shape = self.endpoint.clone();
        for (i, (key, value)) in self.params.iter().enumerate() {
            shape.push(if i == 0 { '?' } else { '&' });
            shape.push_str(key);
            shape.push('=');
            shape.push_str(value);
        }
        shape
    }
}

/// Raw upstream answer, body fully read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Bytes,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Upstream that answers requests over a connection handle.
///
/// Implementations must release any per-request stream before returning,
/// whether they succeed or fail.
#[async_trait::async_trait]
pub trait DataSource<C: Send + Sync + 'static>: Send + Sync {
    async fn request(&self, conn: &C, request: &FetchRequest)
        -> Result<RawResponse, ResilienceError>;
}

/// Result of a fetch after all attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Success(Bytes),
    RetryableError(ResilienceError),
    PermanentError(ResilienceError),
    TransportError(ResilienceError),
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success(_))
    }

    /// The failure carried by this outcome, if any
    pub fn error(&self) -> Option<&ResilienceError> {
        match self {
            FetchOutcome::Success(_) => None,
            FetchOutcome::RetryableError(e)
            | FetchOutcome::PermanentError(e)
            | FetchOutcome::TransportError(e) => Some(e),
        }
    }

    fn from_error(error: ResilienceError) -> Self {
        match error.class() {
            ErrorClass::Transport | ErrorClass::ResourceExhaustion => {
                FetchOutcome::TransportError(error)
            }
            ErrorClass::PermanentPeer => FetchOutcome::PermanentError(error),
            ErrorClass::RetryablePeer | ErrorClass::LogicError => {
                FetchOutcome::RetryableError(error)
            }
        }
    }
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchOutcome::Success(body) => write!(f, "success ({} bytes)", body.len()),
            FetchOutcome::RetryableError(e) => write!(f, "retryable: {}", e),
            FetchOutcome::PermanentError(e) => write!(f, "permanent: {}", e),
            FetchOutcome::TransportError(e) => write!(f, "transport: {}", e),
        }
    }
}

/// Map an HTTP-like status to an outcome
pub fn classify_status(response: RawResponse) -> FetchOutcome {
    match response.status {
        200..=299 => FetchOutcome::Success(response.body),
        429 => FetchOutcome::RetryableError(ResilienceError::RateLimited),
        status @ 400..=499 => FetchOutcome::PermanentError(ResilienceError::PeerRejected(status)),
        status => FetchOutcome::RetryableError(ResilienceError::PeerUnavailable(status)),
    }
}

/// Retry timing for the fetch pipeline
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Cap for the exponential delay
    pub max_delay: Duration,
    /// Extra multiple applied when the peer rate-limits us
    pub rate_limit_multiplier: u32,
    /// Random extra delay as a fraction of the computed delay (0 disables)
    pub jitter_factor: f64,
    /// Per-attempt timeout
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            rate_limit_multiplier: 3,
            jitter_factor: 0.0,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32, rate_limited: bool) -> Duration {
        let factor = 2_u32.saturating_pow(attempt);
        let mut delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if rate_limited {
            delay = delay.saturating_mul(self.rate_limit_multiplier.max(1));
        }

        if self.jitter_factor > 0.0 {
            let jitter = rand::rng().random_range(0.0..self.jitter_factor);
            delay += Duration::from_secs_f64(delay.as_secs_f64() * jitter);
        }
        delay
    }
}

/// Lifetime counters for the pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    /// Individual upstream attempts
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    /// Teardowns forced by wedged transport errors
    pub forced_teardowns: u64,
    /// Requests refused because their shape is blocked
    pub blocked: u64,
}

/// Retrying fetcher on top of the connection manager
pub struct FetchPipeline<C: Send + Sync + 'static> {
    connections: ConnectionManager<C>,
    source: Arc<dyn DataSource<C>>,
    policy: RetryPolicy,
    cancel: CancelSignal,
    blocked: HashMap<String, ResilienceError>,
    stats: FetchStats,
}

impl<C: Send + Sync + 'static> FetchPipeline<C> {
    pub fn new(
        connections: ConnectionManager<C>,
        source: Arc<dyn DataSource<C>>,
        policy: RetryPolicy,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            connections,
            source,
            policy,
            cancel,
            blocked: HashMap::new(),
            stats: FetchStats::default(),
        }
    }

    /// Fetch `request`, retrying up to `max_retries` times.
    ///
    /// Never panics and never returns early with a bare error: every exit
    /// path yields a [`FetchOutcome`]. When cancelled during a backoff wait
    /// the last failure is returned as-is.
    pub async fn fetch(&mut self, request: &FetchRequest, max_retries: u32) -> FetchOutcome {
        let shape = request.shape();
        if let Some(reason) = self.blocked.get(&shape) {
            self.stats.blocked += 1;
            debug!(request = %request.label, %reason, "Request shape blocked, skipping");
            return FetchOutcome::PermanentError(ResilienceError::Blocked(format!(
                "{} ({})",
                request.label, reason
            )));
        }

        let mut attempt = 0;
        loop {
            let outcome = self.attempt(request).await;
            let error = match &outcome {
                FetchOutcome::Success(body) => {
                    self.stats.successes += 1;
                    debug!(request = %request.label, bytes = body.len(), attempt, "Fetch succeeded");
                    return outcome;
                }
                FetchOutcome::PermanentError(e) => {
                    self.stats.failures += 1;
                    warn!(request = %request.label, error = %e, "Permanent failure, blocking request shape");
                    self.blocked.insert(shape, e.clone());
                    return outcome;
                }
                FetchOutcome::RetryableError(e) | FetchOutcome::TransportError(e) => e.clone(),
            };

            if error.is_wedged() {
                warn!(request = %request.label, %error, "Transport wedged, tearing down connection");
                self.stats.forced_teardowns += 1;
                self.connections.teardown().await;
            }

            if attempt >= max_retries {
                self.stats.failures += 1;
                warn!(
                    request = %request.label,
                    attempts = attempt + 1,
                    %error,
                    "Fetch failed after all attempts"
                );
                return outcome;
            }

            let delay = self.policy.delay_for(attempt, error.is_rate_limited());
            info!(
                request = %request.label,
                attempt = attempt + 1,
                max_attempts = max_retries + 1,
                delay_ms = delay.as_millis() as u64,
                %error,
                "Retrying fetch"
            );
            if self.cancel.sleep(delay).await.is_err() {
                self.stats.failures += 1;
                return outcome;
            }
            attempt += 1;
        }
    }

    async fn attempt(&mut self, request: &FetchRequest) -> FetchOutcome {
        self.stats.attempts += 1;
        let result = {
            let lease = match self.connections.acquire().await {
                Ok(lease) => lease,
                Err(e) => return FetchOutcome::from_error(e),
            };
            let timeout = self.policy.request_timeout;
            match tokio::time::timeout(timeout, self.source.request(&lease, request)).await {
                Ok(result) => result,
                Err(_) => Err(ResilienceError::Timeout(timeout)),
            }
        };

        match result {
            Ok(response) => classify_status(response),
            Err(e) => FetchOutcome::from_error(e),
        }
    }

    /// Tear the connection handle down (soft reset, periodic cleanup)
    pub async fn teardown(&mut self) {
        self.connections.teardown().await;
    }

    /// Whether `request` has been blocked after a permanent failure
    pub fn is_blocked(&self, request: &FetchRequest) -> bool {
        self.blocked.contains_key(&request.shape())
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.len()
    }

    pub fn connections(&self) -> &ConnectionManager<C> {
        &self.connections
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn stats(&self) -> FetchStats {
        self.stats
    }
}
