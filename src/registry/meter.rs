use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

const TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Exponentially weighted moving average of a per-second rate.
#[derive(Debug)]
struct Ewma {
    alpha: f64,
    rate: f64,
    uncounted: i64,
    initialized: bool,
}

impl Ewma {
    fn over_minutes(minutes: f64) -> Self {
        Self {
            alpha: 1.0 - (-TICK_INTERVAL.as_secs_f64() / 60.0 / minutes).exp(),
            rate: 0.0,
            uncounted: 0,
            initialized: false,
        }
    }

    const fn update(&mut self, n: i64) {
        self.uncounted += n;
    }

    #[allow(clippy::cast_precision_loss)]
    fn tick(&mut self) {
        let instant = self.uncounted as f64 / TICK_INTERVAL.as_secs_f64();
        self.uncounted = 0;
        if self.initialized {
            self.rate += self.alpha * (instant - self.rate);
        } else {
            self.rate = instant;
            self.initialized = true;
        }
    }
}

#[derive(Debug)]
struct MeterState {
    count: i64,
    start: Instant,
    last_tick: Instant,
    m1: Ewma,
    m5: Ewma,
    m15: Ewma,
}

impl MeterState {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            start: now,
            last_tick: now,
            m1: Ewma::over_minutes(1.0),
            m5: Ewma::over_minutes(5.0),
            m15: Ewma::over_minutes(15.0),
        }
    }

    // Ticks are applied lazily: every whole interval since the last tick is
    // replayed before the state is read or written.
    fn tick_if_necessary(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_tick).as_nanos();
        let interval = TICK_INTERVAL.as_nanos();
        let ticks = elapsed / interval;
        if ticks == 0 {
            return;
        }
        for _ in 0..ticks {
            self.m1.tick();
            self.m5.tick();
            self.m15.tick();
        }
        let remainder = u64::try_from(elapsed % interval).unwrap_or_default();
        self.last_tick = now - Duration::from_nanos(remainder);
    }

    #[allow(clippy::cast_precision_loss)]
    fn snapshot(&self, now: Instant) -> MeterSnapshot {
        let elapsed = now.saturating_duration_since(self.start).as_secs_f64();
        let rate_mean = if elapsed > 0.0 {
            self.count as f64 / elapsed
        } else {
            0.0
        };
        MeterSnapshot {
            count: self.count,
            rate1: self.m1.rate,
            rate5: self.m5.rate,
            rate15: self.m15.rate,
            rate_mean,
        }
    }
}

/// Counts events and tracks their rate over 1, 5 and 15 minute windows.
#[derive(Debug, Clone)]
pub struct Meter {
    state: Arc<Mutex<MeterState>>,
}

impl Default for Meter {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(MeterState::new(Instant::now()))),
        }
    }
}

impl Meter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, n: i64) {
        self.mark_at(n, Instant::now());
    }

    fn mark_at(&self, n: i64, now: Instant) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.tick_if_necessary(now);
        state.count += n;
        state.m1.update(n);
        state.m5.update(n);
        state.m15.update(n);
    }

    #[must_use]
    pub fn snapshot(&self) -> MeterSnapshot {
        self.snapshot_at(Instant::now())
    }

    fn snapshot_at(&self, now: Instant) -> MeterSnapshot {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.tick_if_necessary(now);
        state.snapshot(now)
    }
}

/// Rates are events per second.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeterSnapshot {
    pub count: i64,
    pub rate1: f64,
    pub rate5: f64,
    pub rate15: f64,
    pub rate_mean: f64,
}
