/*!
 * Configuration types for Lumen
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use lumen_core_resilience::{ConnectionConfig, RetryPolicy, TrackerConfig};

use crate::data::{DataKind, DataKindConfig};
use crate::error::{LumenError, Result};
use crate::modes::{ModeSlot, RotationMode};
use crate::schedule::ScheduleWindow;

/// Top-level configuration, one section per concern
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LumenConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub connection: ConnectionSettings,

    #[serde(default)]
    pub cycle: CycleConfig,

    #[serde(default)]
    pub session: SessionConfig,

    /// Display modes in rotation order
    #[serde(default = "default_rotation")]
    pub rotation: Vec<ModeSlot>,

    /// Priority activity windows
    #[serde(default)]
    pub schedules: Vec<ScheduleWindow>,

    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub restart: RestartConfig,

    #[serde(default)]
    pub render: RenderConfig,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level for diagnostic output
    pub level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for level = debug)
    pub verbose: bool,
}

/// Upstream API access and retry timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Absolute base URL every endpoint is joined onto
    pub base_url: String,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Query parameter the key is sent as
    pub api_key_param: String,

    pub user_agent: String,

    /// Per-request timeout
    pub request_timeout_secs: u64,

    pub retry_base_delay_secs: u64,
    pub retry_max_delay_secs: u64,

    /// Backoff multiple applied to HTTP 429
    pub rate_limit_multiplier: u32,

    /// Random extra delay fraction (0 = exact backoff)
    pub jitter_factor: f64,

    /// Upstream calls before a preventive restart
    pub max_calls_before_restart: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://dataservice.accuweather.com/".to_string(),
            api_key_env: "LUMEN_API_KEY".to_string(),
            api_key_param: "apikey".to_string(),
            user_agent: format!("lumen/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: 30,
            retry_base_delay_secs: 2,
            retry_max_delay_secs: 30,
            rate_limit_multiplier: 3,
            jitter_factor: 0.0,
            max_calls_before_restart: 350,
        }
    }
}

impl ApiConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_secs(self.retry_base_delay_secs),
            max_delay: Duration::from_secs(self.retry_max_delay_secs),
            rate_limit_multiplier: self.rate_limit_multiplier,
            jitter_factor: self.jitter_factor,
            request_timeout: self.request_timeout(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// API key from the configured environment variable, if set
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

/// Escalation thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub soft_reset_threshold: u32,
    pub hard_reset_threshold: u32,
    /// Fallback view hold after a soft reset
    pub soft_reset_cooldown_secs: u64,
    /// Time without success before extended failure mode
    pub extended_failure_secs: u64,
    /// Recovery probe spacing in extended failure mode
    pub recovery_probe_secs: u64,
    /// Time without success before data is flagged stale
    pub stale_data_secs: u64,
    /// Domain errors before the domain is flagged (and schedules disabled)
    pub domain_error_limit: u32,
    /// Consecutive failures that raise the warning indicator
    pub elevated_failures: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            soft_reset_threshold: 5,
            hard_reset_threshold: 15,
            soft_reset_cooldown_secs: 30,
            extended_failure_secs: 900,
            recovery_probe_secs: 1800,
            stale_data_secs: 900,
            domain_error_limit: 3,
            elevated_failures: 2,
        }
    }
}

/// Connection handle lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Pause after teardown before a new handle may be created
    pub settle_delay_ms: u64,
    /// Ceiling for concurrently open request streams
    pub max_open_streams: usize,
    /// Force a teardown every N session segments
    pub cleanup_every_segments: u32,
    /// Optional `host:port` probed to decide whether the link is up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_address: Option<String>,
    /// Minimum spacing between link probes
    pub reconnect_cooldown_secs: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            settle_delay_ms: 500,
            max_open_streams: 8,
            cleanup_every_segments: 4,
            probe_address: None,
            reconnect_cooldown_secs: 300,
        }
    }
}

impl ConnectionSettings {
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            max_open_streams: self.max_open_streams,
        }
    }
}

/// Longest wait slice; shutdown is noticed within one slice
pub const MAX_WAIT_SLICE_MS: u64 = 200;

/// Orchestrator pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// Total time budget of one rotation iteration
    pub duration_secs: u64,
    /// Smallest budget any mode is given
    pub min_mode_secs: u64,
    /// An iteration shorter than this is suspicious
    pub fast_cycle_secs: u64,
    /// Delay inserted after a suspiciously fast iteration
    pub safety_delay_secs: u64,
    /// Completed cycles before the average cycle time is judged (0 disables)
    pub rapid_cycle_after: u64,
    /// Restart when the average cycle since startup is shorter than this
    pub rapid_cycle_avg_secs: u64,
    /// Delay after an iteration fault
    pub error_delay_secs: u64,
    /// Delay after an iteration fault once failures pile up
    pub error_delay_long_secs: u64,
    /// Consecutive failures that switch to the long error delay
    pub error_delay_long_after: u32,
    /// How long the fallback view is held when nothing else can be shown
    pub fallback_secs: u64,
    /// Log cache statistics every N cycles (0 disables)
    pub cache_stats_every: u64,
    /// Cancellation check granularity for waits
    pub wait_slice_ms: u64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            duration_secs: 300,
            min_mode_secs: 10,
            fast_cycle_secs: 10,
            safety_delay_secs: 30,
            rapid_cycle_after: 10,
            rapid_cycle_avg_secs: 10,
            error_delay_secs: 5,
            error_delay_long_secs: 30,
            error_delay_long_after: 3,
            fallback_secs: 300,
            cache_stats_every: 50,
            wait_slice_ms: 100,
        }
    }
}

impl CycleConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn fallback(&self) -> Duration {
        Duration::from_secs(self.fallback_secs)
    }
}

/// Segmented session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub segment_secs: u64,
    /// Cached data younger than this is reused instead of fetched
    pub data_refresh_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            segment_secs: 300,
            data_refresh_secs: 300,
        }
    }
}

/// Per-kind data settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "DataKindConfig::current_defaults")]
    pub current: DataKindConfig,

    #[serde(default = "DataKindConfig::forecast_defaults")]
    pub forecast: DataKindConfig,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            current: DataKindConfig::current_defaults(),
            forecast: DataKindConfig::forecast_defaults(),
        }
    }
}

impl DataConfig {
    pub fn for_kind(&self, kind: DataKind) -> &DataKindConfig {
        match kind {
            DataKind::CurrentConditions => &self.current,
            DataKind::Forecast => &self.forecast,
        }
    }
}

/// Restart policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    /// Pause before re-executing
    pub delay_secs: u64,
    pub daily_enabled: bool,
    /// Local hour of the daily restart window
    pub daily_hour: u32,
    /// Length of the daily restart window
    pub daily_window_mins: u64,
    /// Uptime required before the daily window applies
    pub min_uptime_hours: u64,
    /// Uptime that forces a restart regardless of the hour
    pub max_uptime_hours: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            delay_secs: 10,
            daily_enabled: true,
            daily_hour: 3,
            daily_window_mins: 5,
            min_uptime_hours: 1,
            max_uptime_hours: 24,
        }
    }
}

/// Terminal renderer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Directory holding `<mode>.txt` banner assets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_dir: Option<PathBuf>,
    pub asset_cache_size: usize,
    pub text_cache_size: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            asset_dir: None,
            asset_cache_size: 12,
            text_cache_size: 50,
        }
    }
}

impl Default for LumenConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            api: ApiConfig::default(),
            recovery: RecoveryConfig::default(),
            connection: ConnectionSettings::default(),
            cycle: CycleConfig::default(),
            session: SessionConfig::default(),
            rotation: default_rotation(),
            schedules: Vec::new(),
            data: DataConfig::default(),
            restart: RestartConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

fn default_rotation() -> Vec<ModeSlot> {
    vec![
        ModeSlot::new(RotationMode::Weather, None),
        ModeSlot::new(RotationMode::Forecast, Some(60)),
        ModeSlot::new(RotationMode::Events, Some(30)),
        ModeSlot {
            enabled: false,
            ..ModeSlot::new(RotationMode::Test, Some(20))
        },
    ]
}

impl LumenConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            LumenError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config: LumenConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| LumenError::Config(format!("TOML encode error: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Default config location (`<config dir>/lumen/lumen.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("lumen").join("lumen.toml"))
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        let recovery = &self.recovery;
        TrackerConfig {
            soft_reset_threshold: recovery.soft_reset_threshold,
            hard_reset_threshold: recovery.hard_reset_threshold,
            soft_reset_cooldown: Duration::from_secs(recovery.soft_reset_cooldown_secs),
            extended_failure_after: Duration::from_secs(recovery.extended_failure_secs),
            recovery_probe_interval: Duration::from_secs(recovery.recovery_probe_secs),
            preventive_restart_calls: self.api.max_calls_before_restart,
            stale_after: Duration::from_secs(recovery.stale_data_secs),
            domain_error_limit: recovery.domain_error_limit,
            elevated_failures: recovery.elevated_failures,
        }
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> Result<()> {
        self.tracker_config().validate().map_err(LumenError::Config)?;

        let base = reqwest::Url::parse(&self.api.base_url).map_err(|e| {
            LumenError::Config(format!("api.base_url '{}' is not absolute: {}", self.api.base_url, e))
        })?;
        if base.cannot_be_a_base() {
            return Err(LumenError::Config(format!(
                "api.base_url '{}' cannot be used as a base",
                self.api.base_url
            )));
        }
        if self.api.request_timeout_secs == 0 {
            return Err(LumenError::Config(
                "api.request_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.api.jitter_factor) {
            return Err(LumenError::Config(
                "api.jitter_factor must be within [0, 1)".to_string(),
            ));
        }

        let cycle = &self.cycle;
        if cycle.duration_secs == 0 {
            return Err(LumenError::Config(
                "cycle.duration_secs must be greater than 0".to_string(),
            ));
        }
        let fixed: u64 = self
            .rotation
            .iter()
            .filter(|slot| slot.enabled)
            .filter_map(|slot| slot.duration_secs)
            .sum();
        if fixed > cycle.duration_secs {
            return Err(LumenError::Config(format!(
                "cycle.duration_secs ({}) must cover the fixed mode budgets ({})",
                cycle.duration_secs, fixed
            )));
        }
        if cycle.wait_slice_ms == 0 || cycle.wait_slice_ms > MAX_WAIT_SLICE_MS {
            return Err(LumenError::Config(format!(
                "cycle.wait_slice_ms ({}) must be between 1 and {}",
                cycle.wait_slice_ms, MAX_WAIT_SLICE_MS
            )));
        }
        if self.recovery.extended_failure_secs < cycle.fallback_secs {
            return Err(LumenError::Config(format!(
                "recovery.extended_failure_secs ({}) must be at least cycle.fallback_secs ({})",
                self.recovery.extended_failure_secs, cycle.fallback_secs
            )));
        }
        if self.session.segment_secs == 0 {
            return Err(LumenError::Config(
                "session.segment_secs must be greater than 0".to_string(),
            ));
        }
        if self.connection.cleanup_every_segments == 0 {
            return Err(LumenError::Config(
                "connection.cleanup_every_segments must be greater than 0".to_string(),
            ));
        }
        if self.connection.max_open_streams == 0 {
            return Err(LumenError::Config(
                "connection.max_open_streams must be greater than 0".to_string(),
            ));
        }
        if self.restart.daily_hour > 23 {
            return Err(LumenError::Config(format!(
                "restart.daily_hour ({}) must be between 0 and 23",
                self.restart.daily_hour
            )));
        }

        for window in &self.schedules {
            window.validate().map_err(LumenError::Config)?;
        }
        for kind in DataKind::ALL {
            self.data
                .for_kind(kind)
                .validate()
                .map_err(|e| LumenError::Config(format!("data.{}: {}", kind, e)))?;
        }
        Ok(())
    }
}
