use std::sync::{
    Arc,
    atomic::{AtomicI64, AtomicU64, Ordering},
};

/// Holds the last integer value it was updated with.
#[derive(Debug, Clone, Default)]
pub struct Gauge {
    value: Arc<AtomicI64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GaugeSnapshot {
    pub value: i64,
}

impl Gauge {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    #[must_use]
    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> GaugeSnapshot {
        GaugeSnapshot {
            value: self.value(),
        }
    }
}

/// Holds the last floating point value it was updated with.
///
/// The value is stored as raw `f64` bits so reads and writes stay lock free.
#[derive(Debug, Clone, Default)]
pub struct GaugeFloat64 {
    bits: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaugeFloat64Snapshot {
    pub value: f64,
}

impl GaugeFloat64 {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Adds `delta` to the current value.
    pub fn add(&self, delta: f64) {
        // The closure always returns Some, so the update cannot fail.
        let _ = self
            .bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + delta).to_bits())
            });
    }

    #[must_use]
    pub fn value(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn snapshot(&self) -> GaugeFloat64Snapshot {
        GaugeFloat64Snapshot {
            value: self.value(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauge_keeps_last_value() {
        let gauge = Gauge::new();
        gauge.update(3);
        gauge.update(8);
        assert_eq!(gauge.snapshot().value, 8);
    }

    #[test]
    fn float_gauge_updates_and_adds() {
        let gauge = GaugeFloat64::new();
        assert!(gauge.value().abs() < f64::EPSILON);

        gauge.update(7.7);
        assert!((gauge.snapshot().value - 7.7).abs() < f64::EPSILON);

        gauge.add(0.3);
        gauge.add(-2.0);
        assert!((gauge.value() - 6.0).abs() < 1e-9);
    }
}
