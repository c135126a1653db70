/*!
 * Cycle orchestrator: the top-level loop
 *
 * Each iteration picks what to show (priority session, normal rotation or
 * the fallback view), fetches once, hands the data to every mode that
 * renders this cycle, and paces itself. Tracker escalations are carried out
 * as they arise; restarts and shutdown unwind the iteration as errors and
 * end the run.
 */

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use lumen_core_resilience::{FailureDomain, ResilienceError};

use crate::context::{AppContext, Presented, Snapshots};
use crate::error::{LumenError, Result};
use crate::memory::MemoryMonitor;
use crate::modes::{allocate_budgets, needed_kinds, BudgetCarry, DisplayMode};
use crate::restart::{DailyRestart, RestartReason};
use crate::schedule::{Schedule, ScheduleWindow};
use crate::session::SessionRunner;

/// What the loop is doing this iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Normal,
    PriorityActivity,
    ExtendedFailure,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorState::Normal => f.write_str("normal"),
            OrchestratorState::PriorityActivity => f.write_str("priority"),
            OrchestratorState::ExtendedFailure => f.write_str("extended-failure"),
        }
    }
}

/// Why [`Orchestrator::run`] returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunExit {
    Shutdown,
    Restart(RestartReason),
}

/// Per-iteration bookkeeping for pacing and the summary line
#[derive(Debug, Clone)]
pub struct CycleRecord {
    pub index: u64,
    pub started_at: Instant,
    pub state: OrchestratorState,
    /// Labels of the views that were on screen
    pub shown: Vec<String>,
}

impl CycleRecord {
    fn new(index: u64, started_at: Instant) -> Self {
        Self {
            index,
            started_at,
            state: OrchestratorState::Normal,
            shown: Vec::new(),
        }
    }
}

pub struct Orchestrator<C: Send + Sync + 'static> {
    ctx: AppContext<C>,
    schedule: Schedule,
    session: SessionRunner,
    daily: DailyRestart,
    memory: MemoryMonitor,
    started_at: Instant,
    cycles: u64,
    max_cycles: Option<u64>,
    schedules_disabled: bool,
    last: Option<CycleRecord>,
}

impl<C: Send + Sync + 'static> Orchestrator<C> {
    pub fn new(ctx: AppContext<C>) -> Self {
        let config = &ctx.config;
        let schedule = Schedule::new(config.schedules.clone());
        let session = SessionRunner::new(
            Duration::from_secs(config.session.segment_secs),
            config.connection.cleanup_every_segments,
        );
        let daily = DailyRestart::from_config(&config.restart);
        let started_at = ctx.clock.now();
        Self {
            ctx,
            schedule,
            session,
            daily,
            memory: MemoryMonitor::new(),
            started_at,
            cycles: 0,
            max_cycles: None,
            schedules_disabled: false,
            last: None,
        }
    }

    /// Stop after `cycles` iterations
    pub fn with_max_cycles(mut self, cycles: u64) -> Self {
        self.max_cycles = Some(cycles);
        self
    }

    pub fn context(&self) -> &AppContext<C> {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut AppContext<C> {
        &mut self.ctx
    }

    pub fn into_context(self) -> AppContext<C> {
        self.ctx
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Record of the last completed iteration
    pub fn last_cycle(&self) -> Option<&CycleRecord> {
        self.last.as_ref()
    }

    pub fn schedules_disabled(&self) -> bool {
        self.schedules_disabled
    }

    pub fn memory(&self) -> &MemoryMonitor {
        &self.memory
    }

    /// Run iterations until shutdown, a restart, or the cycle limit
    pub async fn run(&mut self) -> RunExit {
        info!(
            rotation = self.ctx.config.rotation.len(),
            schedules = self.schedule.len(),
            cycle_secs = self.ctx.config.cycle.duration_secs,
            "Orchestrator started"
        );

        loop {
            if self.ctx.cancel.is_cancelled() {
                info!(cycles = self.cycles, "Shutdown requested");
                return RunExit::Shutdown;
            }
            if self.max_cycles.is_some_and(|max| self.cycles >= max) {
                info!(cycles = self.cycles, "Cycle limit reached");
                return RunExit::Shutdown;
            }

            self.cycles += 1;
            let mut record = CycleRecord::new(self.cycles, self.ctx.clock.now());
            let result = match self.iteration(&mut record).await {
                Ok(()) => self.pace(&record).await,
                Err(e) => Err(e),
            };
            self.last = Some(record);

            if let Err(e) = result {
                if let Some(exit) = self.handle_fault(e).await {
                    return exit;
                }
            }
        }
    }

    async fn iteration(&mut self, record: &mut CycleRecord) -> Result<()> {
        let uptime = record.started_at.saturating_duration_since(self.started_at);
        if let Some(reason) = self.daily.due(uptime, self.ctx.wall.now()) {
            info!(%reason, "Daily restart due");
            return Err(LumenError::Restart(reason));
        }
        if let Some(reason) = self.rapid_cycling(uptime) {
            error!(%reason, "Rapid cycling detected, restarting");
            return Err(LumenError::Restart(reason));
        }

        // Silence counts too: blocked requests and link outages record no failures
        if let Some(escalation) = self.ctx.tracker.check_extended() {
            self.ctx.apply(vec![escalation]).await?;
        }
        if self.ctx.tracker.in_extended_failure_mode() {
            record.state = OrchestratorState::ExtendedFailure;
        }

        if !self.ctx.check_connectivity().await {
            let fallback = self.ctx.config.cycle.fallback();
            self.ctx.hold_fallback(fallback).await?;
            record.shown.push("fallback".to_string());
            return Ok(());
        }

        if self.ctx.tracker.in_extended_failure_mode() {
            if self.ctx.tracker.probe_due() && self.ctx.probe().await? {
                // Recovered: normal rotation resumes next iteration
                record.shown.push("probe".to_string());
                return Ok(());
            }
            let fallback = self.ctx.config.cycle.fallback();
            self.ctx.hold_fallback(fallback).await?;
            record.shown.push("fallback".to_string());
            return Ok(());
        }

        if let Some(window) = self.active_window() {
            record.state = OrchestratorState::PriorityActivity;
            let total = window.remaining(self.ctx.wall.now());
            let summary = self.session.run(&mut self.ctx, &window, total).await?;
            record
                .shown
                .push(format!("{} x{}", window.name, summary.shown));
            return Ok(());
        }

        self.rotation(record).await
    }

    /// Restart decision when the average iteration since startup stays
    /// below the configured floor
    fn rapid_cycling(&self, uptime: Duration) -> Option<RestartReason> {
        let cycle = &self.ctx.config.cycle;
        let completed = self.cycles.saturating_sub(1);
        if cycle.rapid_cycle_after == 0 || completed <= cycle.rapid_cycle_after {
            return None;
        }
        let average = uptime / u32::try_from(completed).unwrap_or(u32::MAX);
        (average < Duration::from_secs(cycle.rapid_cycle_avg_secs)).then_some(
            RestartReason::RapidCycling {
                cycles: completed,
                average,
            },
        )
    }

    /// The active priority window, unless schedules are disabled
    fn active_window(&mut self) -> Option<ScheduleWindow> {
        if self.schedules_disabled {
            return None;
        }
        if self.ctx.tracker.domain_exceeded(FailureDomain::Scheduled) {
            error!(
                errors = self.ctx.tracker.domain_errors(FailureDomain::Scheduled),
                "Schedules disabled due to errors"
            );
            self.schedules_disabled = true;
            return None;
        }
        self.schedule.active(self.ctx.wall.now()).cloned()
    }

    /// Normal rotation: fetch once, then show each enabled mode in turn
    async fn rotation(&mut self, record: &mut CycleRecord) -> Result<()> {
        let cycle = &self.ctx.config.cycle;
        let budgets = allocate_budgets(
            cycle.duration(),
            &self.ctx.config.rotation,
            Duration::from_secs(cycle.min_mode_secs),
        );
        let fallback = cycle.fallback();

        let mut snapshots = Snapshots::new();
        for kind in needed_kinds(&budgets) {
            let refresh_after = self.ctx.config.data.for_kind(kind).refresh_after();
            if let Some(snapshot) = self.ctx.refresh(kind, refresh_after).await? {
                snapshots.insert(kind, snapshot);
            }
        }

        let mut carry = BudgetCarry::default();
        let mut render_failed = false;
        for budget in budgets {
            if !budget.mode.needs().iter().all(|kind| snapshots.contains_key(kind)) {
                debug!(mode = ?budget.mode, "Data missing, passing budget on");
                carry.skip(budget.duration);
                continue;
            }

            let duration = carry.take(budget.duration);
            let mode = DisplayMode::from(budget.mode);
            let view = self.ctx.view(&snapshots);
            match self
                .ctx
                .show(&mode, &view, duration, FailureDomain::Display)
                .await?
            {
                Presented::Shown => record.shown.push(mode.label().to_string()),
                Presented::Skipped => carry.skip(duration),
                Presented::Failed => {
                    render_failed = true;
                    carry.skip(duration);
                }
            }
        }

        if !render_failed && !record.shown.is_empty() {
            self.ctx.tracker.clear_domain_errors(FailureDomain::Display);
        }

        let leftover = carry.leftover();
        if record.shown.is_empty() {
            warn!("Nothing displayable this cycle, showing fallback");
            let hold = if leftover.is_zero() { fallback } else { leftover };
            self.ctx.hold_fallback(hold).await?;
            record.shown.push("fallback".to_string());
        } else if !leftover.is_zero() {
            self.ctx.hold_fallback(leftover).await?;
        }
        Ok(())
    }

    /// Safety delay after a suspiciously fast iteration, then the summary
    async fn pace(&mut self, record: &CycleRecord) -> Result<()> {
        let cycle = &self.ctx.config.cycle;
        let fast = Duration::from_secs(cycle.fast_cycle_secs);
        let safety = Duration::from_secs(cycle.safety_delay_secs);
        let stats_every = cycle.cache_stats_every;

        let elapsed = self.ctx.clock.now().saturating_duration_since(record.started_at);
        if elapsed < fast {
            warn!(
                cycle = record.index,
                elapsed_ms = elapsed.as_millis() as u64,
                delay_secs = safety.as_secs(),
                "Cycle finished too fast, inserting safety delay"
            );
            self.ctx.cancel.sleep(safety).await?;
        }

        let now = self.ctx.clock.now();
        let memory = self.memory.checkpoint();
        let tracker = &self.ctx.tracker;
        info!(
            cycle = record.index,
            state = %record.state,
            shown = %record.shown.join(","),
            secs = now.saturating_duration_since(record.started_at).as_secs(),
            uptime_mins = now.saturating_duration_since(self.started_at).as_secs() / 60,
            rss_kb = memory.map(|m| m.rss_kb()),
            mem_pct = memory.map(|m| m.percent()),
            api_calls = tracker.api_call_count(),
            call_limit = tracker.config().preventive_restart_calls,
            failures = tracker.consecutive_failures(),
            indicator = %tracker.error_state(self.ctx.is_connected()),
            "Cycle complete"
        );

        if stats_every > 0 && record.index % stats_every == 0 {
            for (name, stats) in self.ctx.renderer().cache_stats() {
                info!(cache = name, %stats, "Cache statistics");
            }
            let fetch = self.ctx.pipeline.stats();
            let connections = self.ctx.pipeline.connections().stats();
            info!(
                attempts = fetch.attempts,
                failures = fetch.failures,
                blocked = fetch.blocked,
                forced_teardowns = fetch.forced_teardowns,
                handles_created = connections.created,
                teardowns = connections.teardowns,
                "Fetch statistics"
            );
            if let Some(report) = self.memory.report() {
                info!(
                    current_kb = report.current.rss_kb(),
                    peak_kb = report.peak.rss_kb(),
                    baseline_kb = report.baseline.rss_kb(),
                    growth_kb = report.growth_kb(),
                    mem_pct = report.current.percent(),
                    checkpoints = report.checkpoints,
                    "Memory report"
                );
            }
        }
        Ok(())
    }

    /// Outer-loop handling of an iteration error.
    ///
    /// Returns the exit for restart and shutdown. Anything else is an
    /// internal fault: counted as a failure, then waited out.
    async fn handle_fault(&mut self, err: LumenError) -> Option<RunExit> {
        let err = match err {
            LumenError::Shutdown => return Some(RunExit::Shutdown),
            LumenError::Restart(reason) => return Some(RunExit::Restart(reason)),
            other => other,
        };

        error!(
            cycle = self.cycles,
            error = %err,
            category = %err.category(),
            "Iteration failed"
        );
        let escalations = self
            .ctx
            .tracker
            .record_failure("iteration", &ResilienceError::Logic(err.to_string()));
        match self.ctx.apply(escalations).await {
            Ok(()) => {}
            Err(LumenError::Restart(reason)) => return Some(RunExit::Restart(reason)),
            Err(LumenError::Shutdown) => return Some(RunExit::Shutdown),
            Err(e) => warn!(error = %e, "Recovery action failed"),
        }

        let cycle = &self.ctx.config.cycle;
        let delay = if self.ctx.tracker.consecutive_failures() >= cycle.error_delay_long_after {
            Duration::from_secs(cycle.error_delay_long_secs)
        } else {
            Duration::from_secs(cycle.error_delay_secs)
        };
        debug!(delay_secs = delay.as_secs(), "Waiting after fault");
        match self.ctx.cancel.sleep(delay).await {
            Ok(()) => None,
            Err(_) => Some(RunExit::Shutdown),
        }
    }
}
