//! Resilience Tracker: failure counting and escalation decisions
//!
//! The tracker is a pure-logic state machine. Callers report the outcome of
//! every fetch through [`ResilienceTracker::record_success`] and
//! [`ResilienceTracker::record_failure`]; both return the escalations the
//! caller must act on (tear down the connection, restart the process, switch
//! to the fallback view). The tracker never performs side effects itself.
//!
//! Escalation ladder on failure, evaluated in order:
//!
//! 1. `consecutive_failures >= soft_reset_threshold` → [`Escalation::SoftReset`]
//! 2. `system_error_count >= hard_reset_threshold` → [`Escalation::HardReset`]
//! 3. time since last success `>= extended_failure_after` → [`Escalation::EnterExtendedFailure`]
//!    (also checked on its own by [`ResilienceTracker::check_extended`], so
//!    silence without recorded failures still counts)
//! 4. `api_call_count >= preventive_restart_calls` → [`Escalation::PreventiveRestart`]
//!
//! # Example
//!
//! ```
//! use lumen_core_resilience::error::ResilienceError;
//! use lumen_core_resilience::tracker::{Escalation, ResilienceTracker, TrackerConfig};
//! use lumen_core_resilience::clock::ManualClock;
//! use std::sync::Arc;
//!
//! let config = TrackerConfig { soft_reset_threshold: 2, ..Default::default() };
//! let mut tracker = ResilienceTracker::new(config, Arc::new(ManualClock::new()));
//!
//! let err = ResilienceError::PeerUnavailable(503);
//! assert!(tracker.record_failure("current", &err).is_empty());
//! let escalations = tracker.record_failure("current", &err);
//! assert!(matches!(escalations[0], Escalation::SoftReset { .. }));
//! assert_eq!(tracker.state().consecutive_failures, 0);
//! ```

use crate::clock::Clock;
use crate::error::ResilienceError;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Thresholds driving the escalation ladder
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Consecutive failures before the connection is torn down
    pub soft_reset_threshold: u32,
    /// Failures since the last success before the process restarts
    pub hard_reset_threshold: u32,
    /// How long the fallback view is held after a soft reset
    pub soft_reset_cooldown: Duration,
    /// Time without success before entering extended failure mode
    pub extended_failure_after: Duration,
    /// Spacing of recovery probes while in extended failure mode
    pub recovery_probe_interval: Duration,
    /// Upstream calls before a preventive restart (quota protection)
    pub preventive_restart_calls: u32,
    /// Time without success after which data counts as stale
    pub stale_after: Duration,
    /// Per-domain error count that flags the domain as broken
    pub domain_error_limit: u32,
    /// Consecutive failures that raise the warning indicator
    pub elevated_failures: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            soft_reset_threshold: 5,
            hard_reset_threshold: 15,
            soft_reset_cooldown: Duration::from_secs(30),
            extended_failure_after: Duration::from_secs(15 * 60),
            recovery_probe_interval: Duration::from_secs(30 * 60),
            preventive_restart_calls: 350,
            stale_after: Duration::from_secs(15 * 60),
            domain_error_limit: 3,
            elevated_failures: 2,
        }
    }
}

impl TrackerConfig {
    /// Check the thresholds are coherent
    pub fn validate(&self) -> Result<(), String> {
        if self.soft_reset_threshold == 0 {
            return Err("soft_reset_threshold must be greater than 0".to_string());
        }
        if self.soft_reset_threshold >= self.hard_reset_threshold {
            return Err(format!(
                "soft_reset_threshold ({}) must be lower than hard_reset_threshold ({})",
                self.soft_reset_threshold, self.hard_reset_threshold
            ));
        }
        if self.recovery_probe_interval.is_zero() {
            return Err("recovery_probe_interval must be greater than 0".to_string());
        }
        if self.preventive_restart_calls == 0 {
            return Err("preventive_restart_calls must be greater than 0".to_string());
        }
        if self.domain_error_limit == 0 {
            return Err("domain_error_limit must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Decision the caller must carry out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Escalation {
    /// Tear the connection down and hold the fallback view for `cooldown`
    SoftReset { cooldown: Duration },
    /// Restart the process; soft resets did not help
    HardReset { system_errors: u32 },
    /// Switch to the fallback view and probe periodically
    EnterExtendedFailure { since_success: Duration },
    /// Restart the process to stay inside the upstream call quota
    PreventiveRestart { api_calls: u32 },
    /// Left extended failure mode after `outage`
    Recovered { outage: Duration },
}

impl Escalation {
    /// Whether this escalation ends the current process
    pub fn is_restart(&self) -> bool {
        matches!(
            self,
            Escalation::HardReset { .. } | Escalation::PreventiveRestart { .. }
        )
    }
}

/// Independently counted failure domains outside the fetch path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FailureDomain {
    /// Rendering of priority (scheduled) sessions
    Scheduled,
    /// Any other rendering or display error
    Display,
}

impl fmt::Display for FailureDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureDomain::Scheduled => f.write_str("scheduled"),
            FailureDomain::Display => f.write_str("display"),
        }
    }
}

/// Display-facing error state, highest priority first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorState {
    ExtendedFailure,
    PermanentError,
    NoConnectivity,
    DomainErrors,
    StaleData,
    ElevatedFailures,
    Nominal,
}

impl ErrorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorState::ExtendedFailure => "extended-failure",
            ErrorState::PermanentError => "permanent-error",
            ErrorState::NoConnectivity => "no-connectivity",
            ErrorState::DomainErrors => "domain-errors",
            ErrorState::StaleData => "stale-data",
            ErrorState::ElevatedFailures => "elevated-failures",
            ErrorState::Nominal => "nominal",
        }
    }

    pub fn is_nominal(&self) -> bool {
        *self == ErrorState::Nominal
    }
}

impl fmt::Display for ErrorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the counters and flags the tracker maintains
#[derive(Debug, Clone)]
pub struct ResilienceState {
    pub consecutive_failures: u32,
    pub system_error_count: u32,
    pub last_success_at: Option<Instant>,
    pub in_extended_failure_mode: bool,
    pub extended_since: Option<Instant>,
    pub next_probe_at: Option<Instant>,
    pub has_permanent_error: bool,
    pub api_call_count: u32,
    pub calls_by_kind: BTreeMap<String, u32>,
    pub soft_resets: u32,
    pub domain_errors: BTreeMap<FailureDomain, u32>,
}

impl ResilienceState {
    fn new() -> Self {
        Self {
            consecutive_failures: 0,
            system_error_count: 0,
            last_success_at: None,
            in_extended_failure_mode: false,
            extended_since: None,
            next_probe_at: None,
            has_permanent_error: false,
            api_call_count: 0,
            calls_by_kind: BTreeMap::new(),
            soft_resets: 0,
            domain_errors: BTreeMap::new(),
        }
    }
}

/// Owns [`ResilienceState`] and turns outcomes into escalations
pub struct ResilienceTracker {
    config: TrackerConfig,
    clock: Arc<dyn Clock>,
    started_at: Instant,
    state: ResilienceState,
}

impl ResilienceTracker {
    pub fn new(config: TrackerConfig, clock: Arc<dyn Clock>) -> Self {
        let started_at = clock.now();
        Self {
            config,
            clock,
            started_at,
            state: ResilienceState::new(),
        }
    }

    /// Record a successful fetch of `kind`
    pub fn record_success(&mut self, kind: &str) -> Vec<Escalation> {
        let now = self.clock.now();
        let mut escalations = Vec::new();

        if self.state.in_extended_failure_mode {
            let outage = now.saturating_duration_since(self.reference_success());
            info!(
                outage_mins = outage.as_secs() / 60,
                "Upstream recovered, leaving extended failure mode"
            );
            self.state.in_extended_failure_mode = false;
            self.state.extended_since = None;
            self.state.next_probe_at = None;
            escalations.push(Escalation::Recovered { outage });
        }

        self.state.consecutive_failures = 0;
        self.state.system_error_count = 0;
        self.state.last_success_at = Some(now);
        self.count_call(kind);

        if let Some(escalation) = self.preventive_restart_due() {
            escalations.push(escalation);
        }
        escalations
    }

    /// Record a failed fetch of `kind`
    pub fn record_failure(&mut self, kind: &str, error: &ResilienceError) -> Vec<Escalation> {
        let now = self.clock.now();
        let mut escalations = Vec::new();

        self.state.consecutive_failures += 1;
        self.state.system_error_count += 1;
        if error.is_permanent() && !self.state.has_permanent_error {
            warn!(kind, %error, "Permanent upstream error recorded");
            self.state.has_permanent_error = true;
        }
        warn!(
            kind,
            consecutive = self.state.consecutive_failures,
            system_errors = self.state.system_error_count,
            class = %error.class(),
            "Fetch failure recorded"
        );

        if self.state.consecutive_failures >= self.config.soft_reset_threshold {
            self.state.consecutive_failures = 0;
            self.state.soft_resets += 1;
            escalations.push(Escalation::SoftReset {
                cooldown: self.config.soft_reset_cooldown,
            });
        }

        if self.state.system_error_count >= self.config.hard_reset_threshold {
            escalations.push(Escalation::HardReset {
                system_errors: self.state.system_error_count,
            });
        }

        if self.state.in_extended_failure_mode {
            if self.probe_due() {
                self.state.next_probe_at = Some(now + self.config.recovery_probe_interval);
            }
        } else if let Some(escalation) = self.check_extended() {
            escalations.push(escalation);
        }

        if let Some(escalation) = self.preventive_restart_due() {
            escalations.push(escalation);
        }
        escalations
    }

    /// Enter extended failure mode once the time since the last success
    /// reaches the threshold, whether or not a failure was just recorded.
    ///
    /// Returns the entry escalation only on the transition.
    pub fn check_extended(&mut self) -> Option<Escalation> {
        if self.state.in_extended_failure_mode {
            return None;
        }
        let now = self.clock.now();
        let since_success = now.saturating_duration_since(self.reference_success());
        if since_success < self.config.extended_failure_after {
            return None;
        }
        self.state.in_extended_failure_mode = true;
        self.state.extended_since = Some(now);
        self.state.next_probe_at = Some(now + self.config.recovery_probe_interval);
        Some(Escalation::EnterExtendedFailure { since_success })
    }

    /// Preventive restart decision, checked before every fetch as well
    pub fn preventive_restart_due(&self) -> Option<Escalation> {
        (self.state.api_call_count >= self.config.preventive_restart_calls).then_some(
            Escalation::PreventiveRestart {
                api_calls: self.state.api_call_count,
            },
        )
    }

    /// Whether a recovery probe should be attempted now
    pub fn probe_due(&self) -> bool {
        self.state.in_extended_failure_mode
            && self
                .state
                .next_probe_at
                .map_or(true, |at| self.clock.now() >= at)
    }

    /// Count an error in a non-fetch domain
    pub fn record_domain_error(&mut self, domain: FailureDomain) -> u32 {
        let count = self.state.domain_errors.entry(domain).or_insert(0);
        *count += 1;
        warn!(%domain, count = *count, "Domain error recorded");
        *count
    }

    /// Forget errors in a domain after it worked again
    pub fn clear_domain_errors(&mut self, domain: FailureDomain) {
        self.state.domain_errors.remove(&domain);
    }

    pub fn domain_errors(&self, domain: FailureDomain) -> u32 {
        self.state.domain_errors.get(&domain).copied().unwrap_or(0)
    }

    /// Whether a domain has reached the error limit
    pub fn domain_exceeded(&self, domain: FailureDomain) -> bool {
        self.domain_errors(domain) >= self.config.domain_error_limit
    }

    /// Derive the single active display error state
    pub fn error_state(&self, connected: bool) -> ErrorState {
        let now = self.clock.now();
        if self.state.in_extended_failure_mode {
            ErrorState::ExtendedFailure
        } else if self.state.has_permanent_error {
            ErrorState::PermanentError
        } else if !connected {
            ErrorState::NoConnectivity
        } else if self
            .state
            .domain_errors
            .values()
            .any(|count| *count >= self.config.domain_error_limit)
        {
            ErrorState::DomainErrors
        } else if now.saturating_duration_since(self.reference_success()) > self.config.stale_after
        {
            ErrorState::StaleData
        } else if self.state.consecutive_failures >= self.config.elevated_failures {
            ErrorState::ElevatedFailures
        } else {
            ErrorState::Nominal
        }
    }

    pub fn in_extended_failure_mode(&self) -> bool {
        self.state.in_extended_failure_mode
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.consecutive_failures
    }

    pub fn api_call_count(&self) -> u32 {
        self.state.api_call_count
    }

    /// Time since the last success, or since start if there was none
    pub fn since_success(&self) -> Duration {
        self.clock
            .now()
            .saturating_duration_since(self.reference_success())
    }

    pub fn state(&self) -> &ResilienceState {
        &self.state
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    fn reference_success(&self) -> Instant {
        self.state.last_success_at.unwrap_or(self.started_at)
    }

    fn count_call(&mut self, kind: &str) {
        self.state.api_call_count += 1;
        *self
            .state
            .calls_by_kind
            .entry(kind.to_string())
            .or_insert(0) += 1;
    }
}
