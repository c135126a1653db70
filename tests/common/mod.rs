//! Fakes for driving the orchestrator end to end on virtual time

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lumen::config::LumenConfig;
use lumen::context::{AppContext, Collaborators};
use lumen::error::{LumenError, Result};
use lumen::modes::{DisplayMode, ModeSlot, RotationMode};
use lumen::orchestrator::Orchestrator;
use lumen::render::{RenderOutcome, Renderer, ViewData};
use lumen::schedule::WallClock;
use lumen::source::Connectivity;
use lumen_core_resilience::{
    CancelSignal, ConnectionFactory, DataSource, ErrorState, FetchRequest, RawResponse,
    ResilienceError,
};

#[derive(Debug)]
pub struct FakeConn {
    pub id: usize,
}

/// Counts handle lifecycles and remembers the most that were ever alive
#[derive(Default)]
pub struct CountingFactory {
    created: AtomicUsize,
    closed: AtomicUsize,
    max_live: AtomicUsize,
}

impl CountingFactory {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.created() - self.closed()
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionFactory<FakeConn> for CountingFactory {
    async fn create(&self) -> std::result::Result<FakeConn, ResilienceError> {
        let id = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(self.live(), Ordering::SeqCst);
        Ok(FakeConn { id })
    }

    async fn close(&self, _conn: FakeConn) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// One scripted reply
#[derive(Debug, Clone)]
pub enum Step {
    Status(u16),
    Fail(ResilienceError),
    /// Never answers; the request timeout fires
    Hang,
}

/// Data source replaying per-label scripts, falling back to a default step
pub struct ScriptedSource {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    default: Mutex<Step>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default: Mutex::new(Step::Status(200)),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, label: &str, steps: impl IntoIterator<Item = Step>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(label.to_string())
            .or_default()
            .extend(steps);
    }

    pub fn set_default(&self, step: Step) {
        *self.default.lock().unwrap() = step;
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, label: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.as_str() == label)
            .count()
    }

    fn next(&self, label: &str) -> Step {
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(label)
            .and_then(|steps| steps.pop_front());
        scripted.unwrap_or_else(|| self.default.lock().unwrap().clone())
    }
}

#[async_trait]
impl DataSource<FakeConn> for ScriptedSource {
    async fn request(
        &self,
        _conn: &FakeConn,
        request: &FetchRequest,
    ) -> std::result::Result<RawResponse, ResilienceError> {
        self.requests.lock().unwrap().push(request.label.clone());
        match self.next(&request.label) {
            Step::Status(status) => Ok(RawResponse::new(
                status,
                Bytes::from(format!(r#"[{{"Kind":"{}"}}]"#, request.label)),
            )),
            Step::Fail(error) => Err(error),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(RawResponse::new(200, Bytes::new()))
            }
        }
    }
}

/// A frame the recording renderer put on screen
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub mode: DisplayMode,
    pub remaining: Duration,
    pub indicator: ErrorState,
    pub stale: bool,
}

impl Frame {
    pub fn label(&self) -> &str {
        self.mode.label()
    }
}

/// Renderer switches shared with the test body
#[derive(Default)]
pub struct RenderSwitches {
    pub events: AtomicBool,
    pub fail_scheduled: AtomicBool,
    pub fail_all: AtomicBool,
}

pub struct RecordingRenderer {
    frames: Arc<Mutex<Vec<Frame>>>,
    switches: Arc<RenderSwitches>,
}

impl Renderer for RecordingRenderer {
    fn render(
        &mut self,
        mode: &DisplayMode,
        view: &ViewData,
        remaining: Duration,
    ) -> Result<RenderOutcome> {
        if self.switches.fail_all.load(Ordering::SeqCst) {
            return Err(LumenError::Render("panel offline".to_string()));
        }
        let shown = match mode {
            DisplayMode::Weather => view.current.is_some(),
            DisplayMode::Forecast => view.current.is_some() && view.forecast.is_some(),
            DisplayMode::Events => self.switches.events.load(Ordering::SeqCst),
            DisplayMode::Clock | DisplayMode::Test => true,
            DisplayMode::Scheduled { .. } => {
                if self.switches.fail_scheduled.load(Ordering::SeqCst) {
                    return Err(LumenError::Render("schedule asset broken".to_string()));
                }
                true
            }
        };
        if !shown {
            return Ok(RenderOutcome::Skipped);
        }
        self.frames.lock().unwrap().push(Frame {
            mode: mode.clone(),
            remaining,
            indicator: view.indicator,
            stale: view.stale,
        });
        Ok(RenderOutcome::Shown)
    }
}

pub struct FixedWall(Mutex<NaiveDateTime>);

impl FixedWall {
    pub fn at(hour: u32, minute: u32) -> Self {
        // A Monday
        let at = NaiveDate::from_ymd_opt(2026, 3, 16)
            .and_then(|d| d.and_hms_opt(hour, minute, 0))
            .unwrap();
        Self(Mutex::new(at))
    }

    pub fn set(&self, at: NaiveDateTime) {
        *self.0.lock().unwrap() = at;
    }
}

impl WallClock for FixedWall {
    fn now(&self) -> NaiveDateTime {
        *self.0.lock().unwrap()
    }
}

pub struct Link(pub AtomicBool);

#[async_trait]
impl Connectivity for Link {
    async fn is_connected(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a test needs to poke at while the orchestrator runs
pub struct Harness {
    pub factory: Arc<CountingFactory>,
    pub source: Arc<ScriptedSource>,
    pub frames: Arc<Mutex<Vec<Frame>>>,
    pub switches: Arc<RenderSwitches>,
    pub wall: Arc<FixedWall>,
    pub link: Arc<Link>,
    pub cancel: CancelSignal,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            factory: Arc::new(CountingFactory::default()),
            source: Arc::new(ScriptedSource::new()),
            frames: Arc::new(Mutex::new(Vec::new())),
            switches: Arc::new(RenderSwitches::default()),
            wall: Arc::new(FixedWall::at(12, 0)),
            link: Arc::new(Link(AtomicBool::new(true))),
            cancel: CancelSignal::new(),
        }
    }

    pub fn orchestrator(&self, config: LumenConfig) -> Orchestrator<FakeConn> {
        let renderer = RecordingRenderer {
            frames: self.frames.clone(),
            switches: self.switches.clone(),
        };
        let parts = Collaborators::<FakeConn>::new(
            self.factory.clone(),
            self.source.clone(),
            Box::new(renderer),
        )
        .with_wall_clock(self.wall.clone())
        .with_connectivity(self.link.clone())
        .with_cancel(self.cancel.clone());
        Orchestrator::new(AppContext::new(config, parts))
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.frames()
            .iter()
            .map(|f| f.label().to_string())
            .collect()
    }

    /// (label, seconds) of every frame, in order
    pub fn timeline(&self) -> Vec<(String, u64)> {
        self.frames()
            .iter()
            .map(|f| (f.label().to_string(), f.remaining.as_secs()))
            .collect()
    }
}

/// Defaults with the wall-clock restart out of the way
pub fn test_config() -> LumenConfig {
    let mut config = LumenConfig::default();
    config.restart.daily_enabled = false;
    config
}

pub fn rotation(slots: &[(RotationMode, Option<u64>)]) -> Vec<ModeSlot> {
    slots
        .iter()
        .map(|(mode, secs)| ModeSlot::new(*mode, *secs))
        .collect()
}
