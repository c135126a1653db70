/*!
 * Process memory checkpoints
 *
 * The appliance runs for days on a fixed memory budget, so every cycle
 * summary carries the resident size of this process. A slow climb between
 * reports is the early sign of a leak the restart policy will eventually
 * paper over.
 */

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::debug;

/// Resident memory of this process against the machine total
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    pub rss_bytes: u64,
    pub total_bytes: u64,
}

impl MemorySample {
    pub fn rss_kb(&self) -> u64 {
        self.rss_bytes / 1024
    }

    /// Share of total memory, one decimal place
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.rss_bytes as f64 * 1000.0 / self.total_bytes as f64).round() / 10.0
    }
}

/// Summary over all checkpoints so far
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryReport {
    pub baseline: MemorySample,
    pub current: MemorySample,
    pub peak: MemorySample,
    pub checkpoints: u64,
}

impl MemoryReport {
    /// Change in resident size since the first checkpoint
    pub fn growth_kb(&self) -> i64 {
        self.current.rss_kb() as i64 - self.baseline.rss_kb() as i64
    }
}

pub struct MemoryMonitor {
    system: System,
    pid: Option<Pid>,
    baseline: Option<MemorySample>,
    current: Option<MemorySample>,
    peak: Option<MemorySample>,
    checkpoints: u64,
}

impl MemoryMonitor {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                debug!(error = e, "Process id unavailable, memory not tracked");
                None
            }
        };
        Self {
            system: System::new(),
            pid,
            baseline: None,
            current: None,
            peak: None,
            checkpoints: 0,
        }
    }

    /// Sample this process and remember the result
    pub fn checkpoint(&mut self) -> Option<MemorySample> {
        let sample = self.sample()?;
        self.record(sample);
        Some(sample)
    }

    /// Fold a sample into the baseline, current and peak values
    pub fn record(&mut self, sample: MemorySample) {
        self.baseline.get_or_insert(sample);
        self.current = Some(sample);
        if self.peak.map_or(true, |peak| sample.rss_bytes > peak.rss_bytes) {
            self.peak = Some(sample);
        }
        self.checkpoints += 1;
    }

    pub fn report(&self) -> Option<MemoryReport> {
        Some(MemoryReport {
            baseline: self.baseline?,
            current: self.current?,
            peak: self.peak?,
            checkpoints: self.checkpoints,
        })
    }

    pub fn checkpoints(&self) -> u64 {
        self.checkpoints
    }

    fn sample(&mut self) -> Option<MemorySample> {
        let pid = self.pid?;
        self.system.refresh_memory();
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        let rss_bytes = self.system.process(pid)?.memory();
        Some(MemorySample {
            rss_bytes,
            total_bytes: self.system.total_memory(),
        })
    }
}

impl Default for MemoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}
