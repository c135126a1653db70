//! Lumen Core Resilience: pure-logic recovery primitives for always-on displays
//!
//! # Overview
//!
//! An unattended display polls a flaky upstream for days at a time on a
//! device with a small, hard ceiling of sockets and buffers. This crate holds
//! the pieces that keep such a loop alive:
//!
//! - **Freshness Cache**: last good value per data kind, with a maximum age
//! - **Bounded Cache**: fixed-capacity FIFO store for assets and measurements
//! - **Connection Manager**: exactly one lazily created handle, leased per
//!   request, torn down on demand
//! - **Fetch Pipeline**: bounded retries, status classification, backoff and
//!   teardown of wedged transports
//! - **Resilience Tracker**: failure counters that turn into soft resets, hard
//!   restarts, extended failure mode and preventive restarts
//! - **Cancel Signal**: interruptible waits for prompt shutdown
//!
//! # Key Principles
//!
//! This crate has no knowledge of:
//! - The wire protocol spoken to the upstream
//! - What the fetched payloads mean
//! - How anything is rendered
//!
//! Collaborators plug in through [`ConnectionFactory`] and [`DataSource`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Cycle Orchestrator              │
//! └──────┬───────────────────────┬──────────┘
//!        │ fetch(request)        │ outcome
//!        ▼                       ▼
//! ┌──────────────────┐   ┌──────────────────┐
//! │  Fetch Pipeline  │   │    Resilience    │  ← escalations
//! │ (retry, backoff) │   │     Tracker      │
//! └──────┬───────────┘   └──────────────────┘
//!        │ acquire / teardown
//!        ▼
//! ┌──────────────────┐
//! │ Connection Mgr   │  ← one handle, leased streams
//! └──────┬───────────┘
//!        ▼
//!    DataSource
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use lumen_core_resilience::prelude::*;
//! use std::sync::Arc;
//!
//! struct Conn;
//! struct Factory;
//! struct Upstream;
//!
//! #[async_trait::async_trait]
//! impl ConnectionFactory<Conn> for Factory {
//!     async fn create(&self) -> Result<Conn, ResilienceError> {
//!         Ok(Conn)
//!     }
//! }
//!
//! #[async_trait::async_trait]
//! impl DataSource<Conn> for Upstream {
//!     async fn request(&self, _conn: &Conn, _req: &FetchRequest)
//!         -> Result<RawResponse, ResilienceError> {
//!         Ok(RawResponse::new(200, "{}"))
//!     }
//! }
//!
//! # async fn example() {
//! let connections = ConnectionManager::new(Arc::new(Factory), ConnectionConfig::default());
//! let mut pipeline = FetchPipeline::new(
//!     connections,
//!     Arc::new(Upstream),
//!     RetryPolicy::default(),
//!     CancelSignal::new(),
//! );
//!
//! let outcome = pipeline.fetch(&FetchRequest::new("current", "/current"), 2).await;
//! assert!(outcome.is_success());
//! # }
//! ```

pub mod bounded_cache;
pub mod cancel;
pub mod clock;
pub mod connection;
pub mod error;
pub mod fetch;
pub mod freshness;
pub mod tracker;

// Re-export main types for convenience
pub use bounded_cache::{BoundedCache, CacheStats};
pub use cancel::CancelSignal;
pub use clock::{Clock, ManualClock, SystemClock};
pub use connection::{ConnectionConfig, ConnectionFactory, ConnectionManager, ConnectionStats, Lease};
pub use error::{ErrorClass, ResilienceError};
pub use fetch::{
    classify_status, DataSource, FetchOutcome, FetchPipeline, FetchRequest, FetchStats,
    RawResponse, RetryPolicy,
};
pub use freshness::{CacheEntry, FreshnessCache};
pub use tracker::{
    ErrorState, Escalation, FailureDomain, ResilienceState, ResilienceTracker, TrackerConfig,
};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use lumen_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::cancel::CancelSignal;
    pub use super::clock::{Clock, SystemClock};
    pub use super::connection::{ConnectionConfig, ConnectionFactory, ConnectionManager};
    pub use super::error::ResilienceError;
    pub use super::fetch::{DataSource, FetchOutcome, FetchPipeline, FetchRequest, RawResponse, RetryPolicy};
    pub use super::freshness::FreshnessCache;
    pub use super::tracker::{ErrorState, Escalation, ResilienceTracker, TrackerConfig};
}
