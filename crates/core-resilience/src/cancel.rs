//! Cooperative cancellation and interruptible waits
//!
//! Every wait in the display loop goes through [`CancelSignal::sleep`], which
//! wakes in short slices and returns [`ResilienceError::Cancelled`] as soon as
//! shutdown is requested.

use crate::error::ResilienceError;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default slice for interruptible waits
pub const DEFAULT_WAIT_SLICE: Duration = Duration::from_millis(100);

/// Shared shutdown flag
#[derive(Debug, Clone)]
pub struct CancelSignal {
    token: CancellationToken,
    slice: Duration,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::with_slice(DEFAULT_WAIT_SLICE)
    }

    /// Create a signal whose waits re-check the flag every `slice`
    pub fn with_slice(slice: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            slice: slice.max(Duration::from_millis(1)),
        }
    }

    /// Request shutdown
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for `duration`, returning early if the signal fires
    pub async fn sleep(&self, duration: Duration) -> Result<(), ResilienceError> {
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.is_cancelled() {
                return Err(ResilienceError::Cancelled);
            }
            let step = remaining.min(self.slice);
            tokio::select! {
                _ = tokio::time::sleep(step) => {}
                _ = self.token.cancelled() => return Err(ResilienceError::Cancelled),
            }
            remaining -= step;
        }
        if self.is_cancelled() {
            return Err(ResilienceError::Cancelled);
        }
        Ok(())
    }

    /// Resolves once shutdown has been requested
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_runs_full_duration() {
        let signal = CancelSignal::new();
        let start = Instant::now();
        signal.sleep(Duration::from_secs(3)).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_within_one_slice() {
        let signal = CancelSignal::with_slice(Duration::from_millis(200));
        let remote = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            remote.cancel();
        });

        let start = Instant::now();
        let result = signal.sleep(Duration::from_secs(300)).await;
        assert_eq!(result, Err(ResilienceError::Cancelled));
        assert!(start.elapsed() <= Duration::from_millis(2200));
    }

    #[tokio::test]
    async fn test_already_cancelled_returns_immediately() {
        let signal = CancelSignal::new();
        signal.cancel();
        assert!(signal.is_cancelled());
        assert_eq!(
            signal.sleep(Duration::from_secs(60)).await,
            Err(ResilienceError::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_zero_sleep_is_ok() {
        let signal = CancelSignal::new();
        tokio_test::assert_ok!(signal.sleep(Duration::ZERO).await);
    }
}
