/*!
 * Application context: the single owner of cache, tracker, pipeline and
 * collaborators, passed by reference through the orchestrator
 */

use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use lumen_core_resilience::{
    CancelSignal, Clock, ConnectionFactory, ConnectionManager, DataSource, Escalation,
    FailureDomain, FetchOutcome, FetchPipeline, FreshnessCache, ResilienceError,
    ResilienceTracker, SystemClock,
};

use crate::config::LumenConfig;
use crate::data::DataKind;
use crate::error::{LumenError, Result};
use crate::modes::DisplayMode;
use crate::render::{RenderOutcome, Renderer, ViewData};
use crate::restart::RestartReason;
use crate::schedule::{LocalWallClock, WallClock};
use crate::source::{AlwaysConnected, Connectivity};

/// Payload of one data kind as handed to the renderer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub body: Bytes,
    /// Served from an expired cache entry
    pub stale: bool,
}

/// Data gathered during one iteration
pub type Snapshots = BTreeMap<DataKind, Snapshot>;

/// What became of a view the orchestrator asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presented {
    /// Rendered and held for its full duration
    Shown,
    /// The renderer had nothing to show
    Skipped,
    /// The renderer failed; counted against the domain
    Failed,
}

/// External collaborators the context is built from
pub struct Collaborators<C: Send + Sync + 'static> {
    pub factory: Arc<dyn ConnectionFactory<C>>,
    pub source: Arc<dyn DataSource<C>>,
    pub renderer: Box<dyn Renderer>,
    pub connectivity: Arc<dyn Connectivity>,
    pub clock: Arc<dyn Clock>,
    pub wall: Arc<dyn WallClock>,
    pub cancel: Option<CancelSignal>,
}

impl<C: Send + Sync + 'static> Collaborators<C> {
    pub fn new(
        factory: Arc<dyn ConnectionFactory<C>>,
        source: Arc<dyn DataSource<C>>,
        renderer: Box<dyn Renderer>,
    ) -> Self {
        Self {
            factory,
            source,
            renderer,
            connectivity: Arc::new(AlwaysConnected),
            clock: Arc::new(SystemClock),
            wall: Arc::new(LocalWallClock),
            cancel: None,
        }
    }

    pub fn with_connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_wall_clock(mut self, wall: Arc<dyn WallClock>) -> Self {
        self.wall = wall;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

pub struct AppContext<C: Send + Sync + 'static> {
    pub config: LumenConfig,
    pub clock: Arc<dyn Clock>,
    pub wall: Arc<dyn WallClock>,
    pub cancel: CancelSignal,
    pub pipeline: FetchPipeline<C>,
    pub cache: FreshnessCache<DataKind, Bytes>,
    pub tracker: ResilienceTracker,
    renderer: Box<dyn Renderer>,
    connectivity: Arc<dyn Connectivity>,
    connected: bool,
}

impl<C: Send + Sync + 'static> AppContext<C> {
    pub fn new(config: LumenConfig, parts: Collaborators<C>) -> Self {
        let cancel = parts.cancel.unwrap_or_else(|| {
            CancelSignal::with_slice(Duration::from_millis(config.cycle.wait_slice_ms.max(1)))
        });
        let connections =
            ConnectionManager::new(parts.factory, config.connection.connection_config())
                .with_cancel(cancel.clone());
        let pipeline = FetchPipeline::new(
            connections,
            parts.source,
            config.api.retry_policy(),
            cancel.clone(),
        );
        let tracker = ResilienceTracker::new(config.tracker_config(), parts.clock.clone());

        Self {
            cache: FreshnessCache::new(parts.clock.clone()),
            clock: parts.clock,
            wall: parts.wall,
            cancel,
            pipeline,
            tracker,
            renderer: parts.renderer,
            connectivity: parts.connectivity,
            connected: true,
            config,
        }
    }

    /// Ask the connectivity collaborator and remember the answer
    pub async fn check_connectivity(&mut self) -> bool {
        let connected = self.connectivity.is_connected().await;
        if connected != self.connected {
            if connected {
                info!("Network link restored");
            } else {
                warn!("Network link down");
            }
        }
        self.connected = connected;
        connected
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Data for `kind`, fetched unless the cached value is younger than
    /// `refresh_after`.
    ///
    /// The tracker sees the outcome before this returns. A failed fetch
    /// falls back to the cached value, marked stale once it has expired.
    pub async fn refresh(
        &mut self,
        kind: DataKind,
        refresh_after: Duration,
    ) -> Result<Option<Snapshot>> {
        let settings = self.config.data.for_kind(kind).clone();
        if !settings.enabled {
            return Ok(None);
        }

        if let (Some(body), Some(age)) = (self.cache.get(&kind), self.cache.age(&kind)) {
            if age < refresh_after {
                debug!(%kind, age_secs = age.as_secs(), "Using cached data");
                return Ok(Some(Snapshot {
                    body: body.clone(),
                    stale: false,
                }));
            }
        }

        // Quota check happens before the call, not after
        if let Some(escalation) = self.tracker.preventive_restart_due() {
            self.apply(vec![escalation]).await?;
        }
        if self.cancel.is_cancelled() {
            return Err(LumenError::Shutdown);
        }

        let request = settings.request(kind);
        let outcome = self.pipeline.fetch(&request, settings.max_retries).await;
        match outcome {
            FetchOutcome::Success(body) => {
                self.cache.put(kind, body.clone(), settings.max_age());
                let escalations = self.tracker.record_success(kind.as_str());
                self.apply(escalations).await?;
                Ok(Some(Snapshot { body, stale: false }))
            }
            FetchOutcome::PermanentError(ResilienceError::Blocked(_)) => Ok(self.cached(kind)),
            failed => {
                if self.cancel.is_cancelled() {
                    return Err(LumenError::Shutdown);
                }
                if let Some(err) = failed.error() {
                    let escalations = self.tracker.record_failure(kind.as_str(), err);
                    self.apply(escalations).await?;
                }
                Ok(self.cached(kind))
            }
        }
    }

    /// Cached value regardless of age
    fn cached(&self, kind: DataKind) -> Option<Snapshot> {
        if let Some(body) = self.cache.get(&kind) {
            return Some(Snapshot {
                body: body.clone(),
                stale: false,
            });
        }
        self.cache.get_stale(&kind).map(|(body, age)| {
            debug!(%kind, age_secs = age.as_secs(), "Serving expired data");
            Snapshot {
                body: body.clone(),
                stale: true,
            }
        })
    }

    /// One real fetch of the first enabled kind, used as a recovery probe
    pub async fn probe(&mut self) -> Result<bool> {
        let Some(kind) = DataKind::ALL
            .into_iter()
            .find(|kind| self.config.data.for_kind(*kind).enabled)
        else {
            return Ok(false);
        };
        info!(%kind, "Running recovery probe");
        self.refresh(kind, Duration::ZERO).await?;
        Ok(!self.tracker.in_extended_failure_mode())
    }

    /// Carry out tracker escalations.
    ///
    /// Restarts come back as `Err(LumenError::Restart)`; nothing after them
    /// in the list is executed.
    pub async fn apply(&mut self, escalations: Vec<Escalation>) -> Result<()> {
        let restart = escalations.iter().find_map(|escalation| match escalation {
            Escalation::HardReset { system_errors } => Some(RestartReason::HardReset {
                system_errors: *system_errors,
            }),
            Escalation::PreventiveRestart { api_calls } => Some(RestartReason::Preventive {
                api_calls: *api_calls,
            }),
            _ => None,
        });
        if let Some(reason) = restart {
            match &reason {
                RestartReason::Preventive { api_calls } => warn!(
                    api_calls,
                    limit = self.tracker.config().preventive_restart_calls,
                    "Upstream call budget used up, restarting"
                ),
                _ => error!(%reason, "Soft resets did not help, restarting"),
            }
            return Err(LumenError::Restart(reason));
        }

        for escalation in escalations {
            match escalation {
                Escalation::SoftReset { cooldown } => {
                    warn!(
                        cooldown_secs = cooldown.as_secs(),
                        "Soft reset: recreating connection"
                    );
                    self.pipeline.teardown().await;
                    self.hold_fallback(cooldown).await?;
                }
                Escalation::EnterExtendedFailure { since_success } => {
                    error!(
                        since_success_mins = since_success.as_secs() / 60,
                        "Entering extended failure mode"
                    );
                }
                Escalation::Recovered { outage } => {
                    info!(outage_mins = outage.as_secs() / 60, "Recovered from extended failure");
                }
                Escalation::HardReset { .. } | Escalation::PreventiveRestart { .. } => {}
            }
        }
        Ok(())
    }

    /// View over the gathered snapshots with the current indicator
    pub fn view(&self, snapshots: &Snapshots) -> ViewData {
        let body = |kind: DataKind| snapshots.get(&kind).map(|s: &Snapshot| s.body.clone());
        ViewData {
            current: body(DataKind::CurrentConditions),
            forecast: body(DataKind::Forecast),
            indicator: self.tracker.error_state(self.connected),
            stale: snapshots.values().any(|s| s.stale),
        }
    }

    /// Render `mode` and hold it for `duration`.
    ///
    /// Render failures are counted against `domain`; only shutdown
    /// propagates.
    pub async fn show(
        &mut self,
        mode: &DisplayMode,
        view: &ViewData,
        duration: Duration,
        domain: FailureDomain,
    ) -> Result<Presented> {
        match self.renderer.render(mode, view, duration) {
            Ok(RenderOutcome::Shown) => {
                self.cancel.sleep(duration).await?;
                Ok(Presented::Shown)
            }
            Ok(RenderOutcome::Skipped) => {
                debug!(%mode, "Nothing to show");
                Ok(Presented::Skipped)
            }
            Err(e) if e.is_control() => Err(e),
            Err(e) => {
                warn!(%mode, error = %e, category = %e.category(), "Render failed");
                self.tracker.record_domain_error(domain);
                Ok(Presented::Failed)
            }
        }
    }

    /// Hold the minimal fallback view for `duration`.
    ///
    /// An error here means not even the fallback could be drawn.
    pub async fn hold_fallback(&mut self, duration: Duration) -> Result<()> {
        let view = ViewData::empty(self.tracker.error_state(self.connected));
        self.renderer.render(&DisplayMode::Clock, &view, duration)?;
        self.cancel.sleep(duration).await?;
        Ok(())
    }

    pub fn renderer(&self) -> &dyn Renderer {
        self.renderer.as_ref()
    }

    /// Release the connection before the process goes away
    pub async fn shutdown(&mut self) {
        self.pipeline.teardown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lumen_core_resilience::{ErrorState, FetchRequest, ManualClock, RawResponse};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Conn;
    struct Factory;

    #[async_trait]
    impl ConnectionFactory<Conn> for Factory {
        async fn create(&self) -> std::result::Result<Conn, ResilienceError> {
            Ok(Conn)
        }
    }

    struct Scripted(Mutex<VecDeque<u16>>);

    #[async_trait]
    impl DataSource<Conn> for Scripted {
        async fn request(
            &self,
            _conn: &Conn,
            _request: &FetchRequest,
        ) -> std::result::Result<RawResponse, ResilienceError> {
            let status = self.0.lock().unwrap().pop_front().unwrap_or(200);
            Ok(RawResponse::new(status, Bytes::from_static(b"{}")))
        }
    }

    struct Quiet;

    impl Renderer for Quiet {
        fn render(
            &mut self,
            _mode: &DisplayMode,
            _view: &ViewData,
            _remaining: Duration,
        ) -> Result<RenderOutcome> {
            Ok(RenderOutcome::Shown)
        }
    }

    fn context(statuses: &[u16], clock: Arc<ManualClock>) -> AppContext<Conn> {
        let mut config = LumenConfig::default();
        config.data.current.max_retries = 0;
        let parts = Collaborators::new(
            Arc::new(Factory),
            Arc::new(Scripted(Mutex::new(statuses.iter().copied().collect()))),
            Box::new(Quiet),
        )
        .with_clock(clock);
        AppContext::new(config, parts)
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_respects_refresh_after() {
        let clock = Arc::new(ManualClock::new());
        let mut ctx = context(&[], clock.clone());
        let hour = Duration::from_secs(3600);

        ctx.refresh(DataKind::CurrentConditions, hour).await.unwrap();
        ctx.refresh(DataKind::CurrentConditions, hour).await.unwrap();
        assert_eq!(ctx.tracker.api_call_count(), 1);

        clock.advance(Duration::from_secs(901));
        ctx.refresh(DataKind::CurrentConditions, hour).await.unwrap();
        assert_eq!(ctx.tracker.api_call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_serves_stale_copy() {
        let clock = Arc::new(ManualClock::new());
        let mut ctx = context(&[200, 503], clock.clone());
        ctx.refresh(DataKind::CurrentConditions, Duration::ZERO)
            .await
            .unwrap();

        clock.advance(Duration::from_secs(1000));
        let snapshot = ctx
            .refresh(DataKind::CurrentConditions, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert!(snapshot.stale);
        assert_eq!(ctx.tracker.consecutive_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_kind_not_fetched() {
        let clock = Arc::new(ManualClock::new());
        let mut ctx = context(&[], clock);
        ctx.config.data.forecast.enabled = false;
        assert!(ctx
            .refresh(DataKind::Forecast, Duration::ZERO)
            .await
            .unwrap()
            .is_none());
        assert_eq!(ctx.pipeline.stats().attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_request_not_recorded_twice() {
        let clock = Arc::new(ManualClock::new());
        let mut ctx = context(&[404], clock);
        ctx.refresh(DataKind::CurrentConditions, Duration::ZERO)
            .await
            .unwrap();
        ctx.refresh(DataKind::CurrentConditions, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(ctx.pipeline.stats().attempts, 1);
        assert_eq!(ctx.tracker.state().system_error_count, 1);
        assert_eq!(ctx.tracker.error_state(true), ErrorState::PermanentError);
    }

    #[tokio::test(start_paused = true)]
    async fn test_view_reports_indicator_and_staleness() {
        let clock = Arc::new(ManualClock::new());
        let ctx = context(&[], clock);
        let mut snapshots = Snapshots::new();
        snapshots.insert(
            DataKind::CurrentConditions,
            Snapshot {
                body: Bytes::from_static(b"{}"),
                stale: true,
            },
        );
        let view = ctx.view(&snapshots);
        assert!(view.stale);
        assert!(view.current.is_some());
        assert!(view.forecast.is_none());
    }
}
