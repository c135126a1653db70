/*!
 * Process restart: reasons, daily schedule and self re-exec
 */

use chrono::{NaiveDateTime, Timelike};
use std::fmt;
use std::time::Duration;

use crate::config::RestartConfig;
use crate::error::LumenError;

/// Why the process is about to restart
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartReason {
    /// Soft resets did not help
    HardReset { system_errors: u32 },
    /// Upstream call quota protection
    Preventive { api_calls: u32 },
    /// Routine daily restart
    Scheduled { uptime: Duration },
    /// Iterations keep finishing far too quickly, despite the safety delay
    RapidCycling { cycles: u64, average: Duration },
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartReason::HardReset { system_errors } => {
                write!(f, "hard reset after {} system errors", system_errors)
            }
            RestartReason::Preventive { api_calls } => {
                write!(f, "preventive restart after {} upstream calls", api_calls)
            }
            RestartReason::Scheduled { uptime } => {
                write!(f, "daily restart after {:.1}h uptime", uptime.as_secs_f64() / 3600.0)
            }
            RestartReason::RapidCycling { cycles, average } => write!(
                f,
                "rapid cycling: {} cycles averaging {:.1}s",
                cycles,
                average.as_secs_f64()
            ),
        }
    }
}

/// Daily restart policy
#[derive(Debug, Clone)]
pub struct DailyRestart {
    enabled: bool,
    hour: u32,
    window: Duration,
    min_uptime: Duration,
    max_uptime: Duration,
}

impl DailyRestart {
    pub fn from_config(config: &RestartConfig) -> Self {
        Self {
            enabled: config.daily_enabled,
            hour: config.daily_hour,
            window: Duration::from_secs(config.daily_window_mins * 60),
            min_uptime: Duration::from_secs(config.min_uptime_hours * 3600),
            max_uptime: Duration::from_secs(config.max_uptime_hours * 3600),
        }
    }

    /// Restart is due after `max_uptime`, or inside the daily window once
    /// the process has been up for at least `min_uptime`.
    pub fn due(&self, uptime: Duration, now: NaiveDateTime) -> Option<RestartReason> {
        if !self.enabled {
            return None;
        }
        let in_window = now.hour() == self.hour
            && u64::from(now.minute()) * 60 < self.window.as_secs().max(60);
        if uptime > self.max_uptime || (in_window && uptime > self.min_uptime) {
            Some(RestartReason::Scheduled { uptime })
        } else {
            None
        }
    }
}

/// Replace the running process with a fresh copy of itself.
///
/// Only returns if the re-exec failed.
#[cfg(unix)]
pub fn restart_process() -> LumenError {
    use std::os::unix::process::CommandExt;

    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => return LumenError::Io(e),
    };
    let err = std::process::Command::new(exe)
        .args(std::env::args_os().skip(1))
        .exec();
    LumenError::Io(err)
}

/// Replace the running process with a fresh copy of itself.
///
/// Re-exec is not available here; the supervisor is expected to restart us
/// when we exit with [`crate::error::EXIT_RESTART`].
#[cfg(not(unix))]
pub fn restart_process() -> LumenError {
    LumenError::Other("in-place restart unsupported on this platform".to_string())
}
