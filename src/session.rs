/*!
 * Segmented session runner
 *
 * A priority activity may last hours. It is cut into fixed-size segments so
 * that every segment re-validates cached data, and every Nth segment tears
 * the connection down as a safety net against slow handle leaks.
 */

use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use lumen_core_resilience::FailureDomain;

use crate::context::{AppContext, Presented, Snapshots};
use crate::data::DataKind;
use crate::error::Result;
use crate::modes::DisplayMode;
use crate::schedule::ScheduleWindow;

/// Budget bookkeeping of the running session
#[derive(Debug, Clone)]
pub struct SessionProgress {
    pub started_at: Instant,
    pub total_duration: Duration,
    pub segment_duration: Duration,
    elapsed: Duration,
    segments: u32,
}

impl SessionProgress {
    /// Segment budget handed out so far
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn elapsed_ratio(&self) -> f64 {
        if self.total_duration.is_zero() {
            return 1.0;
        }
        (self.elapsed.as_secs_f64() / self.total_duration.as_secs_f64()).min(1.0)
    }

    pub fn segments(&self) -> u32 {
        self.segments
    }
}

/// One bounded slice of a session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    /// 1-based
    pub index: u32,
    pub duration: Duration,
    /// Tear the connection down before running this segment
    pub cleanup_due: bool,
    /// Session fraction elapsed when the segment starts
    pub progress: f64,
}

/// What a finished session did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub segments: u32,
    pub shown: u32,
    pub failed: u32,
    pub teardowns: u32,
    /// Ended early because the schedule domain hit its error limit
    pub aborted: bool,
}

#[derive(Debug)]
pub struct SessionRunner {
    segment_duration: Duration,
    cleanup_every: u32,
    progress: Option<SessionProgress>,
}

impl SessionRunner {
    pub fn new(segment_duration: Duration, cleanup_every: u32) -> Self {
        Self {
            segment_duration: segment_duration.max(Duration::from_secs(1)),
            cleanup_every: cleanup_every.max(1),
            progress: None,
        }
    }

    pub fn start(&mut self, total_duration: Duration, now: Instant) {
        self.progress = Some(SessionProgress {
            started_at: now,
            total_duration,
            segment_duration: self.segment_duration,
            elapsed: Duration::ZERO,
            segments: 0,
        });
    }

    /// Next segment, `min(segment, total - elapsed)` long, or `None` when
    /// the session is complete
    pub fn next_segment(&mut self) -> Option<Segment> {
        let cleanup_every = self.cleanup_every;
        let progress = self.progress.as_mut()?;
        let left = progress.total_duration.saturating_sub(progress.elapsed);
        if left.is_zero() {
            return None;
        }

        let ratio = progress.elapsed_ratio();
        let duration = progress.segment_duration.min(left);
        progress.elapsed += duration;
        progress.segments += 1;
        Some(Segment {
            index: progress.segments,
            duration,
            cleanup_due: progress.segments % cleanup_every == 0,
            progress: ratio,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.progress
            .as_ref()
            .map_or(true, |p| p.elapsed >= p.total_duration)
    }

    pub fn progress(&self) -> Option<&SessionProgress> {
        self.progress.as_ref()
    }

    /// Drop the session state
    pub fn finish(&mut self) -> Option<SessionProgress> {
        self.progress.take()
    }

    /// Run a priority session for `window` lasting `total`.
    ///
    /// Returns when the session is complete, or early once schedule render
    /// errors reach their limit. Restart and shutdown propagate as errors.
    pub async fn run<C: Send + Sync + 'static>(
        &mut self,
        ctx: &mut AppContext<C>,
        window: &ScheduleWindow,
        total: Duration,
    ) -> Result<SessionSummary> {
        self.start(total, ctx.clock.now());
        info!(
            window = %window.name,
            total_mins = total.as_secs() / 60,
            segment_secs = self.segment_duration.as_secs(),
            "Starting priority session"
        );

        let refresh_after = ctx
            .config
            .data
            .current
            .refresh_after()
            .max(Duration::from_secs(ctx.config.session.data_refresh_secs));
        let mut summary = SessionSummary::default();

        while let Some(segment) = self.next_segment() {
            summary.segments += 1;
            if segment.cleanup_due {
                info!(segment = segment.index, "Periodic connection cleanup");
                ctx.pipeline.teardown().await;
                summary.teardowns += 1;
            }

            let mut snapshots = Snapshots::new();
            if let Some(current) = ctx
                .refresh(DataKind::CurrentConditions, refresh_after)
                .await?
            {
                snapshots.insert(DataKind::CurrentConditions, current);
            }

            let mode = DisplayMode::Scheduled {
                name: window.name.clone(),
                segment: segment.index,
                progress: segment.progress,
            };
            let view = ctx.view(&snapshots);
            match ctx
                .show(&mode, &view, segment.duration, FailureDomain::Scheduled)
                .await?
            {
                Presented::Shown => summary.shown += 1,
                presented => {
                    if presented == Presented::Failed {
                        summary.failed += 1;
                        if ctx.tracker.domain_exceeded(FailureDomain::Scheduled) {
                            warn!(
                                window = %window.name,
                                errors = ctx.tracker.domain_errors(FailureDomain::Scheduled),
                                "Too many schedule render errors, ending session"
                            );
                            summary.aborted = true;
                            break;
                        }
                    }
                    ctx.hold_fallback(segment.duration).await?;
                }
            }
        }

        self.finish();
        if summary.failed == 0 {
            ctx.tracker.clear_domain_errors(FailureDomain::Scheduled);
        }
        info!(
            window = %window.name,
            segments = summary.segments,
            teardowns = summary.teardowns,
            failed = summary.failed,
            "Priority session finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mins(m: u64) -> Duration {
        Duration::from_secs(m * 60)
    }

    fn drain(runner: &mut SessionRunner) -> Vec<Segment> {
        std::iter::from_fn(|| runner.next_segment()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_segments_cover_total_exactly() {
        for (total, segment) in [(125, 5), (7, 3), (3, 5), (60, 60), (61, 60)] {
            let mut runner = SessionRunner::new(mins(segment), 4);
            runner.start(mins(total), Instant::now());
            let segments = drain(&mut runner);

            let expected = (total + segment - 1) / segment;
            assert_eq!(segments.len() as u64, expected, "{}m/{}m", total, segment);
            let sum: Duration = segments.iter().map(|s| s.duration).sum();
            assert_eq!(sum, mins(total));
            assert!(segments[..segments.len() - 1]
                .iter()
                .all(|s| s.duration == mins(segment)));
            assert!(segments.last().unwrap().duration <= mins(segment));
            assert!(runner.is_complete());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_every_fourth_segment() {
        let mut runner = SessionRunner::new(mins(5), 4);
        runner.start(mins(125), Instant::now());
        let segments = drain(&mut runner);
        assert_eq!(segments.len(), 25);
        let cleanups: Vec<u32> = segments
            .iter()
            .filter(|s| s.cleanup_due)
            .map(|s| s.index)
            .collect();
        assert_eq!(cleanups, vec![4, 8, 12, 16, 20, 24]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_ratio() {
        let mut runner = SessionRunner::new(mins(5), 4);
        runner.start(mins(20), Instant::now());
        let ratios: Vec<f64> = drain(&mut runner).iter().map(|s| s.progress).collect();
        assert_eq!(ratios, vec![0.0, 0.25, 0.5, 0.75]);
        assert_eq!(runner.progress().unwrap().elapsed_ratio(), 1.0);
    }

    #[test]
    fn test_not_started_is_complete() {
        let mut runner = SessionRunner::new(mins(5), 4);
        assert!(runner.is_complete());
        assert!(runner.next_segment().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_clears_progress() {
        let mut runner = SessionRunner::new(mins(5), 4);
        runner.start(mins(10), Instant::now());
        runner.next_segment();
        assert!(!runner.is_complete());
        let progress = runner.finish().unwrap();
        assert_eq!(progress.segments(), 1);
        assert!(runner.progress().is_none());
    }
}
