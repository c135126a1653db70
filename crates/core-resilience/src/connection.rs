//! Single-handle connection manager
//!
//! Unlike a pool, the display appliance talks to one upstream over one
//! long-lived handle. The manager creates that handle lazily, hands out
//! short-lived [`Lease`]s for each request and can tear the handle down
//! completely when the transport looks wedged.
//!
//! Two counters back the resource invariants:
//! - `live_handles` counts handles that have been created and not yet
//!   released. It never exceeds one.
//! - `open_streams` counts leases currently outstanding. Each lease releases
//!   its slot when dropped, on success and failure paths alike.

use crate::cancel::CancelSignal;
use crate::error::ResilienceError;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Factory trait for creating and closing connection handles
#[async_trait::async_trait]
pub trait ConnectionFactory<C: Send + Sync + 'static>: Send + Sync {
    /// Create a new handle
    async fn create(&self) -> Result<C, ResilienceError>;

    /// Release a handle (optional cleanup)
    async fn close(&self, conn: C) {
        drop(conn);
    }
}

/// Configuration for the connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Pause after teardown so the platform can reclaim sockets
    pub settle_delay: Duration,
    /// Ceiling for simultaneously open per-request streams
    pub max_open_streams: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(500),
            max_open_streams: 4,
        }
    }
}

/// Decrements the live-handle counter when the handle is gone
#[derive(Debug)]
struct HandleToken(Arc<AtomicUsize>);

impl Drop for HandleToken {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct LiveHandle<C> {
    conn: C,
    created_at: Instant,
    token: HandleToken,
}

/// Per-request borrow of the active handle.
///
/// Holding a lease occupies one stream slot; dropping it gives the slot back.
pub struct Lease<'a, C> {
    conn: &'a C,
    _stream: StreamSlot,
}

impl<C> Deref for Lease<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn
    }
}

#[derive(Debug)]
struct StreamSlot(Arc<AtomicUsize>);

impl Drop for StreamSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Lifetime counters for the manager
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Handles created
    pub created: u64,
    /// Teardowns performed (including no-op teardowns with no live handle)
    pub teardowns: u64,
    /// Leases handed out
    pub leases: u64,
    /// Lease requests refused because the stream ceiling was reached
    pub refused: u64,
}

/// Owns at most one live connection handle
pub struct ConnectionManager<C: Send + Sync + 'static> {
    factory: Arc<dyn ConnectionFactory<C>>,
    config: ConnectionConfig,
    handle: Option<LiveHandle<C>>,
    live_handles: Arc<AtomicUsize>,
    open_streams: Arc<AtomicUsize>,
    stats: ConnectionStats,
    cancel: Option<CancelSignal>,
}

impl<C: Send + Sync + 'static> ConnectionManager<C> {
    pub fn new(factory: Arc<dyn ConnectionFactory<C>>, config: ConnectionConfig) -> Self {
        Self {
            factory,
            config,
            handle: None,
            live_handles: Arc::new(AtomicUsize::new(0)),
            open_streams: Arc::new(AtomicUsize::new(0)),
            stats: ConnectionStats::default(),
            cancel: None,
        }
    }

    /// Let shutdown cut the post-teardown settle delay short
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Borrow the active handle, creating it first if needed.
    ///
    /// Fails with [`ResilienceError::ResourceExhausted`] when the stream
    /// ceiling is reached, and with the factory's error when the handle
    /// cannot be created.
    pub async fn acquire(&mut self) -> Result<Lease<'_, C>, ResilienceError> {
        let open = self.open_streams.load(Ordering::SeqCst);
        if open >= self.config.max_open_streams {
            self.stats.refused += 1;
            return Err(ResilienceError::ResourceExhausted(format!(
                "{} of {} streams open",
                open, self.config.max_open_streams
            )));
        }

        if self.handle.is_none() {
            let leaked = self.live_handles.load(Ordering::SeqCst);
            if leaked > 0 {
                error!(leaked, "Previous connection handle not fully released");
            }
            let conn = self.factory.create().await?;
            self.live_handles.fetch_add(1, Ordering::SeqCst);
            self.stats.created += 1;
            debug!(created = self.stats.created, "Connection handle created");
            self.handle = Some(LiveHandle {
                conn,
                created_at: Instant::now(),
                token: HandleToken(self.live_handles.clone()),
            });
        }

        self.stats.leases += 1;
        self.open_streams.fetch_add(1, Ordering::SeqCst);
        let slot = StreamSlot(self.open_streams.clone());
        match self.handle.as_ref() {
            Some(handle) => Ok(Lease {
                conn: &handle.conn,
                _stream: slot,
            }),
            None => Err(ResilienceError::Logic(
                "connection handle missing after creation".to_string(),
            )),
        }
    }

    /// Fully release the active handle, then wait out the settle delay.
    ///
    /// Safe to call when no handle exists.
    pub async fn teardown(&mut self) {
        self.stats.teardowns += 1;
        if let Some(LiveHandle {
            conn,
            created_at,
            token,
        }) = self.handle.take()
        {
            self.factory.close(conn).await;
            drop(token);
            info!(
                age_secs = created_at.elapsed().as_secs(),
                teardowns = self.stats.teardowns,
                "Connection handle torn down"
            );
        } else {
            debug!("Teardown requested with no live handle");
        }

        let settle = self.config.settle_delay;
        if settle.is_zero() {
            return;
        }
        match &self.cancel {
            // The handle is already gone; an interrupted settle only shortens the pause
            Some(cancel) => {
                if cancel.sleep(settle).await.is_err() {
                    debug!("Settle delay cut short by shutdown");
                }
            }
            None => tokio::time::sleep(settle).await,
        }
    }

    /// Whether a handle currently exists
    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    /// Handles created and not yet released
    pub fn live_handles(&self) -> usize {
        self.live_handles.load(Ordering::SeqCst)
    }

    /// Leases currently outstanding
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}
