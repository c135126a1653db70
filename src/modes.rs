/*!
 * Display modes and per-cycle time budgets
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::data::DataKind;

/// Modes that can take part in the normal rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationMode {
    Weather,
    Forecast,
    Events,
    Clock,
    /// Panel test pattern
    Test,
}

impl RotationMode {
    /// Data kinds this mode cannot render without
    pub fn needs(&self) -> &'static [DataKind] {
        match self {
            RotationMode::Weather => &[DataKind::CurrentConditions],
            RotationMode::Forecast => &[DataKind::CurrentConditions, DataKind::Forecast],
            RotationMode::Events | RotationMode::Clock | RotationMode::Test => &[],
        }
    }
}

/// One entry of the configured rotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeSlot {
    pub mode: RotationMode,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Fixed budget; `None` shares whatever the fixed slots leave over
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

impl ModeSlot {
    pub fn new(mode: RotationMode, duration_secs: Option<u64>) -> Self {
        Self {
            mode,
            enabled: true,
            duration_secs,
        }
    }
}

/// What the renderer is asked to draw
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayMode {
    Weather,
    Forecast,
    Events,
    /// Minimal always-available view, also used as the degraded fallback
    Clock,
    /// Pattern for checking the panel's pixels and colours
    Test,
    /// Priority session segment
    Scheduled {
        name: String,
        segment: u32,
        /// Fraction of the session already elapsed (0.0 - 1.0)
        progress: f64,
    },
}

impl DisplayMode {
    pub fn label(&self) -> &str {
        match self {
            DisplayMode::Weather => "weather",
            DisplayMode::Forecast => "forecast",
            DisplayMode::Events => "events",
            DisplayMode::Clock => "clock",
            DisplayMode::Test => "test",
            DisplayMode::Scheduled { name, .. } => name.as_str(),
        }
    }
}

impl From<RotationMode> for DisplayMode {
    fn from(mode: RotationMode) -> Self {
        match mode {
            RotationMode::Weather => DisplayMode::Weather,
            RotationMode::Forecast => DisplayMode::Forecast,
            RotationMode::Events => DisplayMode::Events,
            RotationMode::Clock => DisplayMode::Clock,
            RotationMode::Test => DisplayMode::Test,
        }
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayMode::Scheduled {
                name,
                segment,
                progress,
            } => write!(f, "{} #{} ({:.0}%)", name, segment, progress * 100.0),
            other => f.write_str(other.label()),
        }
    }
}

/// Time granted to one mode in one iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    pub mode: RotationMode,
    pub duration: Duration,
}

/// Split `total` across the enabled slots.
///
/// Fixed slots get their configured duration, the flexible slots share the
/// remainder evenly. Nobody gets less than `min`.
pub fn allocate_budgets(total: Duration, slots: &[ModeSlot], min: Duration) -> Vec<Budget> {
    let enabled: Vec<&ModeSlot> = slots.iter().filter(|slot| slot.enabled).collect();
    let fixed: Duration = enabled
        .iter()
        .filter_map(|slot| slot.duration_secs)
        .map(Duration::from_secs)
        .sum();
    let flexible = enabled
        .iter()
        .filter(|slot| slot.duration_secs.is_none())
        .count() as u32;
    let share = if flexible == 0 {
        Duration::ZERO
    } else {
        total.saturating_sub(fixed) / flexible
    };

    enabled
        .into_iter()
        .map(|slot| Budget {
            mode: slot.mode,
            duration: slot
                .duration_secs
                .map(Duration::from_secs)
                .unwrap_or(share)
                .max(min),
        })
        .collect()
}

/// Kinds needed by at least one enabled mode
pub fn needed_kinds(budgets: &[Budget]) -> Vec<DataKind> {
    let mut kinds: Vec<DataKind> = budgets
        .iter()
        .flat_map(|budget| budget.mode.needs().iter().copied())
        .collect();
    kinds.sort();
    kinds.dedup();
    kinds
}

/// Carries unused budget forward to the next mode that actually shows
#[derive(Debug, Default)]
pub struct BudgetCarry {
    pending: Duration,
}

impl BudgetCarry {
    /// Budget for the next mode, including anything carried over
    pub fn take(&mut self, budget: Duration) -> Duration {
        budget + std::mem::take(&mut self.pending)
    }

    /// Hand a skipped mode's budget on
    pub fn skip(&mut self, budget: Duration) {
        self.pending += budget;
    }

    /// Time nobody used by the end of the rotation
    pub fn leftover(&self) -> Duration {
        self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_remainder_goes_to_flexible_slot() {
        let slots = vec![
            ModeSlot::new(RotationMode::Weather, None),
            ModeSlot::new(RotationMode::Forecast, Some(60)),
            ModeSlot::new(RotationMode::Events, Some(30)),
        ];
        let budgets = allocate_budgets(secs(300), &slots, secs(10));
        assert_eq!(
            budgets.iter().map(|b| b.duration).collect::<Vec<_>>(),
            vec![secs(210), secs(60), secs(30)]
        );
    }

    #[test]
    fn test_disabled_slot_time_goes_to_flexible_slot() {
        let mut slots = vec![
            ModeSlot::new(RotationMode::Weather, None),
            ModeSlot::new(RotationMode::Forecast, Some(60)),
        ];
        slots[1].enabled = false;
        let budgets = allocate_budgets(secs(300), &slots, secs(10));
        assert_eq!(budgets.len(), 1);
        assert_eq!(budgets[0].duration, secs(300));
    }

    #[test]
    fn test_minimum_budget_enforced() {
        let slots = vec![
            ModeSlot::new(RotationMode::Weather, None),
            ModeSlot::new(RotationMode::Events, Some(3)),
        ];
        let budgets = allocate_budgets(secs(20), &slots, secs(10));
        assert_eq!(budgets[0].duration, secs(17));
        assert_eq!(budgets[1].duration, secs(10));
    }

    #[test]
    fn test_flexible_slots_share_evenly() {
        let slots = vec![
            ModeSlot::new(RotationMode::Weather, None),
            ModeSlot::new(RotationMode::Clock, None),
        ];
        let budgets = allocate_budgets(secs(300), &slots, secs(10));
        assert_eq!(budgets[0].duration, secs(150));
        assert_eq!(budgets[1].duration, secs(150));
    }

    #[test]
    fn test_pattern_needs_no_data() {
        let slots = vec![
            ModeSlot::new(RotationMode::Weather, None),
            ModeSlot::new(RotationMode::Test, Some(20)),
        ];
        let budgets = allocate_budgets(secs(300), &slots, secs(10));
        assert_eq!(budgets[1].duration, secs(20));
        assert!(RotationMode::Test.needs().is_empty());
        assert_eq!(needed_kinds(&budgets), vec![DataKind::CurrentConditions]);
    }

    #[test]
    fn test_needed_kinds_deduplicated() {
        let slots = vec![
            ModeSlot::new(RotationMode::Weather, None),
            ModeSlot::new(RotationMode::Forecast, Some(60)),
            ModeSlot::new(RotationMode::Events, Some(30)),
        ];
        let budgets = allocate_budgets(secs(300), &slots, secs(10));
        assert_eq!(
            needed_kinds(&budgets),
            vec![DataKind::CurrentConditions, DataKind::Forecast]
        );

        let events_only = allocate_budgets(
            secs(300),
            &[ModeSlot::new(RotationMode::Events, None)],
            secs(10),
        );
        assert!(needed_kinds(&events_only).is_empty());
    }

    #[test]
    fn test_budget_carry_forwards_skipped_time() {
        let mut carry = BudgetCarry::default();
        carry.skip(secs(60));
        assert_eq!(carry.take(secs(30)), secs(90));
        assert_eq!(carry.leftover(), Duration::ZERO);
        carry.skip(secs(30));
        assert_eq!(carry.leftover(), secs(30));
    }

    #[test]
    fn test_display_labels() {
        let scheduled = DisplayMode::Scheduled {
            name: "morning".to_string(),
            segment: 2,
            progress: 0.25,
        };
        assert_eq!(scheduled.label(), "morning");
        assert_eq!(scheduled.to_string(), "morning #2 (25%)");
        assert_eq!(DisplayMode::from(RotationMode::Forecast), DisplayMode::Forecast);
        assert_eq!(DisplayMode::from(RotationMode::Test).label(), "test");
    }
}
