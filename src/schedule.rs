/*!
 * Priority activity windows on the local wall clock
 */

use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shortest session an active window yields
pub const MIN_SESSION: Duration = Duration::from_secs(60);

/// Local wall-clock time source
pub trait WallClock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Wall clock backed by the system's local time zone
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalWallClock;

impl WallClock for LocalWallClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// A named daily window during which a priority session runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleWindow {
    pub name: String,

    #[serde(with = "hhmm")]
    pub start: NaiveTime,

    #[serde(with = "hhmm")]
    pub end: NaiveTime,

    /// Weekdays the window applies to; empty means every day
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub days: Vec<Weekday>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ScheduleWindow {
    pub fn new(name: impl Into<String>, start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            name: name.into(),
            start,
            end,
            days: Vec::new(),
            enabled: true,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("schedule name must not be empty".to_string());
        }
        if self.start >= self.end {
            return Err(format!(
                "schedule '{}': start {} must be before end {}",
                self.name,
                self.start.format("%H:%M"),
                self.end.format("%H:%M")
            ));
        }
        Ok(())
    }

    /// Whether `now` falls inside this window
    pub fn is_active(&self, now: NaiveDateTime) -> bool {
        if !self.enabled {
            return false;
        }
        if !self.days.is_empty() && !self.days.contains(&now.weekday()) {
            return false;
        }
        let time = now.time();
        self.start <= time && time < self.end
    }

    /// Time left in the window, never less than [`MIN_SESSION`]
    pub fn remaining(&self, now: NaiveDateTime) -> Duration {
        let left = (self.end - now.time()).to_std().unwrap_or(Duration::ZERO);
        left.max(MIN_SESSION)
    }
}

/// The configured windows
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    windows: Vec<ScheduleWindow>,
}

impl Schedule {
    pub fn new(windows: Vec<ScheduleWindow>) -> Self {
        Self { windows }
    }

    /// First window active at `now`
    pub fn active(&self, now: NaiveDateTime) -> Option<&ScheduleWindow> {
        self.windows.iter().find(|window| window.is_active(now))
    }

    pub fn is_empty(&self) -> bool {
        self.windows.iter().all(|window| !window.enabled)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }
}

/// `HH:MM` (seconds optional) time-of-day encoding
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(|e| serde::de::Error::custom(format!("invalid time '{}': {}", raw, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    /// 2026-03-16 is a Monday
    fn monday(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 16)
            .unwrap()
            .and_time(time(h, m))
    }

    #[test]
    fn test_window_membership() {
        let window = ScheduleWindow::new("morning", time(7, 0), time(8, 30));
        assert!(!window.is_active(monday(6, 59)));
        assert!(window.is_active(monday(7, 0)));
        assert!(window.is_active(monday(8, 29)));
        assert!(!window.is_active(monday(8, 30)));
    }

    #[test]
    fn test_remaining_has_floor() {
        let window = ScheduleWindow::new("morning", time(7, 0), time(8, 30));
        assert_eq!(window.remaining(monday(7, 0)), Duration::from_secs(90 * 60));
        let almost_over = NaiveDate::from_ymd_opt(2026, 3, 16)
            .unwrap()
            .and_hms_opt(8, 29, 50)
            .unwrap();
        assert_eq!(window.remaining(almost_over), MIN_SESSION);
    }

    #[test]
    fn test_weekday_filter() {
        let mut window = ScheduleWindow::new("school", time(7, 0), time(8, 0));
        window.days = vec![Weekday::Tue, Weekday::Wed];
        assert!(!window.is_active(monday(7, 30)));
        let tuesday = monday(7, 30) + chrono::Duration::days(1);
        assert!(window.is_active(tuesday));
    }

    #[test]
    fn test_disabled_window_never_active() {
        let mut window = ScheduleWindow::new("off", time(0, 0), time(23, 59));
        window.enabled = false;
        let schedule = Schedule::new(vec![window]);
        assert!(schedule.active(monday(12, 0)).is_none());
        assert!(schedule.is_empty());
    }

    #[test]
    fn test_validate_rejects_inverted_window() {
        let window = ScheduleWindow::new("night", time(22, 0), time(6, 0));
        assert!(window.validate().is_err());
        assert!(ScheduleWindow::new("ok", time(6, 0), time(7, 0)).validate().is_ok());
    }

    #[test]
    fn test_toml_encoding() {
        #[derive(Deserialize)]
        struct Wrapper {
            schedules: Vec<ScheduleWindow>,
        }
        let parsed: Wrapper = toml::from_str(
            r#"
[[schedules]]
name = "dinner"
start = "17:30"
end = "19:00:00"
days = ["Mon", "fri"]
"#,
        )
        .unwrap();
        let window = &parsed.schedules[0];
        assert_eq!(window.start, time(17, 30));
        assert_eq!(window.end, time(19, 0));
        assert_eq!(window.days, vec![Weekday::Mon, Weekday::Fri]);
        assert!(window.enabled);
    }
}
