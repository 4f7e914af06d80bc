use super::{
    histogram::{Histogram, HistogramSnapshot},
    meter::{Meter, MeterSnapshot},
};
use std::time::{Duration, Instant};

/// A histogram of durations, in nanoseconds, paired with a meter of how often they occur.
#[derive(Debug, Clone, Default)]
pub struct Timer {
    histogram: Histogram,
    meter: Meter,
}

impl Timer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, duration: Duration) {
        let nanos = i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX);
        self.histogram.update(nanos);
        self.meter.mark(1);
    }

    pub fn update_since(&self, start: Instant) {
        self.update(start.elapsed());
    }

    /// Runs `f` and records how long it took.
    pub fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        self.update_since(start);
        result
    }

    #[must_use]
    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            histogram: self.histogram.snapshot(),
            meter: self.meter.snapshot(),
        }
    }
}

/// Immutable view of a [`Timer`]. Values are in nanoseconds.
#[derive(Debug, Clone, Default)]
pub struct TimerSnapshot {
    histogram: HistogramSnapshot,
    meter: MeterSnapshot,
}

impl TimerSnapshot {
    #[must_use]
    pub const fn count(&self) -> i64 {
        self.histogram.count()
    }

    #[must_use]
    pub fn min(&self) -> i64 {
        self.histogram.min()
    }

    #[must_use]
    pub fn max(&self) -> i64 {
        self.histogram.max()
    }

    #[must_use]
    pub fn mean(&self) -> f64 {
        self.histogram.mean()
    }

    #[must_use]
    pub fn std_dev(&self) -> f64 {
        self.histogram.std_dev()
    }

    #[must_use]
    pub fn variance(&self) -> f64 {
        self.histogram.variance()
    }

    #[must_use]
    pub fn percentile(&self, p: f64) -> f64 {
        self.histogram.percentile(p)
    }

    #[must_use]
    pub const fn rates(&self) -> &MeterSnapshot {
        &self.meter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_durations_in_nanoseconds() {
        let timer = Timer::new();
        timer.update(Duration::from_millis(2));
        timer.update(Duration::from_millis(4));

        let snapshot = timer.snapshot();
        assert_eq!(snapshot.count(), 2);
        assert_eq!(snapshot.min(), 2_000_000);
        assert_eq!(snapshot.max(), 4_000_000);
        assert!((snapshot.mean() - 3_000_000.0).abs() < 1e-6);
        assert_eq!(snapshot.rates().count, 2);
    }

    #[test]
    fn time_returns_closure_result() {
        let timer = Timer::new();
        let value = timer.time(|| 42);
        assert_eq!(value, 42);
        assert_eq!(timer.snapshot().count(), 1);
    }
}
