//!
//! Timing statistics of the worker.
//!
//! The worker measures how long each tick takes and keeps a running
//! summary of it (Welford's online mean / variance) so the jitter of an
//! execution context can be inspected without any logging.
//!

use std::time::Duration;

/// A summary of the worker's tick execution times
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ExecutionStats {
    /// The number of ticks measured
    pub count: u64,
    /// The shortest tick
    pub min: Duration,
    /// The longest tick
    pub max: Duration,
    /// The mean tick duration (in seconds)
    pub mean: f64,
    /// The standard deviation of the tick duration (in seconds)
    pub stddev: f64,
    /// The number of ticks that took longer than the period
    pub overruns: u64,
    /// The number of external triggers that arrived while a trigger was
    /// already pending
    pub coalesced: u64,
    /// The number of periodic releases the wait strategy found already
    /// passed
    pub missed_releases: u64,
}

/// Accumulates tick durations into [`ExecutionStats`]
#[derive(Debug, Default)]
pub(crate) struct TimeMeasure {
    stats: ExecutionStats,
    m2: f64,
}

impl TimeMeasure {
    /// Record the duration of one tick against the period in force
    pub fn record(&mut self, elapsed: Duration, period: Duration) {
        let stats = &mut self.stats;
        stats.count += 1;
        if stats.count == 1 {
            stats.min = elapsed;
            stats.max = elapsed;
        } else {
            stats.min = stats.min.min(elapsed);
            stats.max = stats.max.max(elapsed);
        }
        if elapsed > period {
            stats.overruns += 1;
        }

        let sample = elapsed.as_secs_f64();
        let delta = sample - stats.mean;
        stats.mean += delta / stats.count as f64;
        self.m2 += delta * (sample - stats.mean);
        stats.stddev = if stats.count > 1 {
            (self.m2 / (stats.count - 1) as f64).sqrt()
        } else {
            0.0
        };
    }

    /// Take over the counters kept by the wait strategy
    pub fn record_strategy(&mut self, coalesced: u64, missed_releases: u64) {
        self.stats.coalesced = coalesced;
        self.stats.missed_releases = missed_releases;
    }

    /// The current summary
    pub fn stats(&self) -> ExecutionStats {
        self.stats
    }
}
