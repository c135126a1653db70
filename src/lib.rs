/*!
 * Lumen - control core of an always-on display appliance
 *
 * Polls a remote data API on a fixed cadence and keeps a small display busy
 * indefinitely on constrained hardware:
 * - Rotating display modes with per-mode time budgets
 * - Priority sessions in configured daily windows, run in bounded segments
 * - Retrying fetches with backoff over a single reusable connection
 * - Freshness-bounded cache with stale fallback
 * - Escalating recovery: soft reset, extended failure mode, process restart
 *
 * The resilience primitives live in `lumen-core-resilience`; this crate wires
 * them to configuration, HTTP, the terminal renderer and the process.
 */

pub mod config;
pub mod context;
pub mod data;
pub mod error;
pub mod logging;
pub mod memory;
pub mod modes;
pub mod orchestrator;
pub mod render;
pub mod restart;
pub mod schedule;
pub mod session;
pub mod source;

// Re-export commonly used types
pub use config::LumenConfig;
pub use context::{AppContext, Collaborators};
pub use data::DataKind;
pub use error::{LumenError, Result};
pub use modes::DisplayMode;
pub use orchestrator::{Orchestrator, RunExit};
pub use render::{RenderOutcome, Renderer, ViewData};
pub use restart::RestartReason;
pub use schedule::{ScheduleWindow, WallClock};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
