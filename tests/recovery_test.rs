//! Escalation ladder end to end: retries, soft and hard resets, extended
//! failure mode, the call quota and faults inside an iteration.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::Instant;

use common::{rotation, test_config, Harness, Step};
use lumen::modes::{DisplayMode, RotationMode};
use lumen::orchestrator::{OrchestratorState, RunExit};
use lumen::restart::RestartReason;
use lumen_core_resilience::{ErrorState, FailureDomain, ResilienceError};

#[tokio::test(start_paused = true)]
async fn test_connections_never_pile_up() {
    let harness = Harness::new();
    harness.source.script(
        "current",
        [
            Step::Status(200),
            Step::Status(503),
            Step::Fail(ResilienceError::Transport("connection reset".to_string())),
            Step::Hang,
            Step::Fail(ResilienceError::from_transport_message("Too many open files")),
            Step::Status(429),
            Step::Status(200),
            Step::Hang,
            Step::Hang,
            Step::Hang,
            Step::Status(500),
        ],
    );
    let mut config = test_config();
    config.rotation = rotation(&[(RotationMode::Weather, None)]);
    let mut orchestrator = harness.orchestrator(config).with_max_cycles(8);
    orchestrator.run().await;

    assert!(harness.source.requests().len() >= 11);
    assert!(harness.factory.max_live() <= 1);
    assert!(harness.factory.live() <= 1);
    let connections = orchestrator.context().pipeline.connections();
    assert!(connections.live_handles() <= 1);
    assert_eq!(connections.open_streams(), 0);
    assert!(orchestrator.context().pipeline.stats().forced_teardowns >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_soft_reset_after_three_retryable_failures() {
    let harness = Harness::new();
    harness.source.set_default(Step::Status(503));
    let mut config = test_config();
    config.recovery.soft_reset_threshold = 3;
    config.rotation = rotation(&[(RotationMode::Weather, None)]);
    config.data.current.max_retries = 0;
    let mut orchestrator = harness.orchestrator(config).with_max_cycles(3);
    orchestrator.run().await;

    let ctx = orchestrator.context();
    assert_eq!(harness.source.count("current"), 3);
    assert_eq!(ctx.pipeline.connections().stats().teardowns, 1);
    assert_eq!(harness.factory.closed(), 1);
    assert_eq!(ctx.tracker.consecutive_failures(), 0);
    assert_eq!(ctx.tracker.state().system_error_count, 3);
    // The cooldown hold shows the fallback view
    assert!(harness
        .timeline()
        .contains(&("clock".to_string(), 30)));
}

#[tokio::test(start_paused = true)]
async fn test_permanent_error_is_never_retried() {
    let harness = Harness::new();
    harness.source.script("forecast", [Step::Status(404)]);
    let mut config = test_config();
    config.data.forecast.refresh_after_secs = 0;
    let mut orchestrator = harness.orchestrator(config).with_max_cycles(3);
    orchestrator.run().await;

    assert_eq!(harness.source.count("forecast"), 1);
    assert_eq!(harness.source.count("current"), 3);
    let tracker = &orchestrator.context().tracker;
    assert!(tracker.state().has_permanent_error);
    assert_eq!(tracker.error_state(true), ErrorState::PermanentError);
    assert!(harness
        .frames()
        .iter()
        .all(|f| f.mode != DisplayMode::Forecast));
}

#[tokio::test(start_paused = true)]
async fn test_preventive_restart_before_next_fetch() {
    let harness = Harness::new();
    let mut config = test_config();
    config.api.max_calls_before_restart = 3;
    config.data.forecast.refresh_after_secs = 0;
    config.rotation = rotation(&[(RotationMode::Weather, None), (RotationMode::Forecast, Some(60))]);
    let mut orchestrator = harness.orchestrator(config);

    let exit = orchestrator.run().await;

    assert_eq!(
        exit,
        RunExit::Restart(RestartReason::Preventive { api_calls: 3 })
    );
    // The third call reached the limit; the forecast fetch after it never went out
    assert_eq!(
        harness.source.requests(),
        vec!["current", "forecast", "current"]
    );
    assert_eq!(orchestrator.cycles(), 2);
    assert_eq!(harness.labels(), vec!["weather", "forecast"]);
}

#[tokio::test(start_paused = true)]
async fn test_hard_reset_after_repeated_soft_resets() {
    let harness = Harness::new();
    harness.source.set_default(Step::Status(503));
    let mut config = test_config();
    config.rotation = rotation(&[(RotationMode::Weather, None)]);
    config.data.current.max_retries = 0;
    config.recovery.extended_failure_secs = 1_000_000;
    let mut orchestrator = harness.orchestrator(config).with_max_cycles(100);

    let exit = orchestrator.run().await;

    assert_eq!(
        exit,
        RunExit::Restart(RestartReason::HardReset { system_errors: 15 })
    );
    assert_eq!(harness.source.count("current"), 15);
    // The third soft reset is decided but the restart wins: only two teardowns ran
    assert_eq!(orchestrator.context().tracker.state().soft_resets, 3);
    assert_eq!(
        orchestrator.context().pipeline.connections().stats().teardowns,
        2
    );
}

#[tokio::test(start_paused = true)]
async fn test_extended_failure_entry_probe_and_exit() {
    let harness = Harness::new();
    harness.source.set_default(Step::Status(503));
    let mut config = test_config();
    config.rotation = rotation(&[(RotationMode::Weather, None)]);

    let mut orchestrator = harness.orchestrator(config).with_max_cycles(5);
    orchestrator.run().await;
    assert!(orchestrator.context().tracker.in_extended_failure_mode());
    assert_eq!(
        orchestrator.last_cycle().unwrap().state,
        OrchestratorState::ExtendedFailure
    );
    // Three failed cycles of three attempts; the fourth enters before fetching
    let requests_at_entry = harness.source.requests().len();
    assert_eq!(requests_at_entry, 9);

    // Well before the first probe: nothing is fetched
    let mut orchestrator = orchestrator.with_max_cycles(8);
    orchestrator.run().await;
    assert_eq!(harness.source.requests().len(), requests_at_entry);
    assert!(harness
        .frames()
        .iter()
        .skip(3)
        .all(|f| f.mode == DisplayMode::Clock && f.indicator == ErrorState::ExtendedFailure));

    harness.source.set_default(Step::Status(200));
    let mut orchestrator = orchestrator.with_max_cycles(12);
    orchestrator.run().await;

    let ctx = orchestrator.context();
    assert!(!ctx.tracker.in_extended_failure_mode());
    assert!(harness.source.requests().len() > requests_at_entry);
    assert_eq!(
        orchestrator.last_cycle().unwrap().state,
        OrchestratorState::Normal
    );
    assert_eq!(harness.labels().last().unwrap(), "weather");
}

#[tokio::test(start_paused = true)]
async fn test_extended_entry_with_only_blocked_requests() {
    let harness = Harness::new();
    harness.source.set_default(Step::Status(401));
    let mut config = test_config();
    config.rotation = rotation(&[(RotationMode::Weather, None)]);
    let mut orchestrator = harness.orchestrator(config).with_max_cycles(4);
    orchestrator.run().await;

    // Rejected once, blocked afterwards; 900 s of silence still escalates
    assert_eq!(harness.source.count("current"), 1);
    let tracker = &orchestrator.context().tracker;
    assert_eq!(tracker.state().system_error_count, 1);
    assert!(tracker.in_extended_failure_mode());
    assert_eq!(
        orchestrator.last_cycle().unwrap().state,
        OrchestratorState::ExtendedFailure
    );
    assert_eq!(
        harness.frames().last().unwrap().indicator,
        ErrorState::ExtendedFailure
    );
}

#[tokio::test(start_paused = true)]
async fn test_extended_entry_during_link_outage() {
    let harness = Harness::new();
    harness.link.0.store(false, Ordering::SeqCst);
    let mut orchestrator = harness.orchestrator(test_config()).with_max_cycles(4);
    orchestrator.run().await;

    assert!(harness.source.requests().is_empty());
    assert!(orchestrator.context().tracker.in_extended_failure_mode());
    let indicators: Vec<ErrorState> = harness.frames().iter().map(|f| f.indicator).collect();
    assert_eq!(
        indicators,
        vec![
            ErrorState::NoConnectivity,
            ErrorState::NoConnectivity,
            ErrorState::NoConnectivity,
            ErrorState::ExtendedFailure,
        ]
    );
    assert_eq!(
        orchestrator.last_cycle().unwrap().state,
        OrchestratorState::ExtendedFailure
    );
}

#[tokio::test(start_paused = true)]
async fn test_fault_is_counted_and_waited_out() {
    let harness = Harness::new();
    harness.switches.fail_all.store(true, Ordering::SeqCst);
    let mut config = test_config();
    config.rotation = rotation(&[(RotationMode::Weather, None)]);
    let mut orchestrator = harness.orchestrator(config).with_max_cycles(1);

    let start = Instant::now();
    assert_eq!(orchestrator.run().await, RunExit::Shutdown);
    let elapsed = start.elapsed();

    let tracker = &orchestrator.context().tracker;
    assert_eq!(tracker.consecutive_failures(), 1);
    assert_eq!(tracker.domain_errors(FailureDomain::Display), 1);
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_secs(30));
}
