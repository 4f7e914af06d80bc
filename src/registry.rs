mod counter;
mod gauge;
mod histogram;
mod meter;
mod timer;

pub use counter::{Counter, CounterSnapshot};
pub use gauge::{Gauge, GaugeFloat64, GaugeFloat64Snapshot, GaugeSnapshot};
pub use histogram::{Histogram, HistogramSnapshot, RESERVOIR_SIZE};
pub use meter::{Meter, MeterSnapshot};
pub use timer::{Timer, TimerSnapshot};

use crate::error::RegistryError;
use std::{
    collections::BTreeMap,
    sync::{Arc, OnceLock, PoisonError, RwLock},
};

/// A registered metric of any supported kind.
#[derive(Debug, Clone)]
pub enum Metric {
    Counter(Counter),
    Gauge(Gauge),
    GaugeFloat64(GaugeFloat64),
    Histogram(Histogram),
    Meter(Meter),
    Timer(Timer),
}

impl Metric {
    /// The kind tag used on the wire.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Counter(_) => Counter::KIND,
            Self::Gauge(_) => Gauge::KIND,
            Self::GaugeFloat64(_) => GaugeFloat64::KIND,
            Self::Histogram(_) => Histogram::KIND,
            Self::Meter(_) => Meter::KIND,
            Self::Timer(_) => Timer::KIND,
        }
    }
}

/// Implemented by every metric handle a [`MetricsRegistry`] can hand out.
pub trait RegistryMetric: Default + Clone + Into<Metric> {
    const KIND: &'static str;

    fn from_metric(metric: &Metric) -> Option<&Self>;
}

macro_rules! registry_metric {
    ($ty:ident, $kind:literal) => {
        impl RegistryMetric for $ty {
            const KIND: &'static str = $kind;

            fn from_metric(metric: &Metric) -> Option<&Self> {
                match metric {
                    Metric::$ty(m) => Some(m),
                    _ => None,
                }
            }
        }

        impl From<$ty> for Metric {
            fn from(metric: $ty) -> Self {
                Self::$ty(metric)
            }
        }
    };
}

registry_metric!(Counter, "counter");
registry_metric!(Gauge, "gauge");
registry_metric!(GaugeFloat64, "gauge64");
registry_metric!(Histogram, "histogram");
registry_metric!(Meter, "meter");
registry_metric!(Timer, "timer");

/// Source of metrics for a reporter.
pub trait Registry: Send + Sync {
    /// Visits every currently registered metric exactly once.
    fn for_each(&self, f: &mut dyn FnMut(&str, &Metric));
}

impl<R: Registry + ?Sized> Registry for Arc<R> {
    fn for_each(&self, f: &mut dyn FnMut(&str, &Metric)) {
        (**self).for_each(f);
    }
}

/// Thread-safe map of metric names to metric handles.
///
/// Cloning is cheap and every clone sees the same metrics.
///
/// # Example
/// ```
/// use metrics_udp_reporter::MetricsRegistry;
///
/// let registry = MetricsRegistry::new();
/// registry.get_or_register_counter("requests.served").unwrap().inc(1);
/// assert_eq!(registry.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsRegistry {
    metrics: Arc<RwLock<BTreeMap<String, Metric>>>,
}

impl MetricsRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry used when a reporter isn't given one.
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<MetricsRegistry> = OnceLock::new();
        GLOBAL.get_or_init(Self::new)
    }

    /// Registers `metric` under `name`.
    ///
    /// # Errors
    /// Returns [`RegistryError::DuplicateMetric`] if the name is taken.
    pub fn register(&self, name: &str, metric: impl Into<Metric>) -> Result<(), RegistryError> {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        if metrics.contains_key(name) {
            return Err(RegistryError::DuplicateMetric(name.to_string()));
        }
        metrics.insert(name.to_string(), metric.into());
        Ok(())
    }

    /// Returns the metric registered under `name`, registering a new one if there is none.
    ///
    /// # Errors
    /// Returns [`RegistryError::KindMismatch`] if `name` holds a metric of another kind.
    pub fn get_or_register<M: RegistryMetric>(&self, name: &str) -> Result<M, RegistryError> {
        if let Some(existing) = self.get(name) {
            return Self::downcast(name, &existing);
        }

        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have registered it between the two locks.
        let existing = metrics
            .entry(name.to_string())
            .or_insert_with(|| M::default().into());
        Self::downcast(name, existing)
    }

    fn downcast<M: RegistryMetric>(name: &str, metric: &Metric) -> Result<M, RegistryError> {
        M::from_metric(metric)
            .cloned()
            .ok_or_else(|| RegistryError::KindMismatch {
                name: name.to_string(),
                existing: metric.kind(),
                requested: M::KIND,
            })
    }

    /// # Errors
    /// See [`MetricsRegistry::get_or_register`].
    pub fn get_or_register_counter(&self, name: &str) -> Result<Counter, RegistryError> {
        self.get_or_register(name)
    }

    /// # Errors
    /// See [`MetricsRegistry::get_or_register`].
    pub fn get_or_register_gauge(&self, name: &str) -> Result<Gauge, RegistryError> {
        self.get_or_register(name)
    }

    /// # Errors
    /// See [`MetricsRegistry::get_or_register`].
    pub fn get_or_register_gauge_f64(&self, name: &str) -> Result<GaugeFloat64, RegistryError> {
        self.get_or_register(name)
    }

    /// # Errors
    /// See [`MetricsRegistry::get_or_register`].
    pub fn get_or_register_histogram(&self, name: &str) -> Result<Histogram, RegistryError> {
        self.get_or_register(name)
    }

    /// # Errors
    /// See [`MetricsRegistry::get_or_register`].
    pub fn get_or_register_meter(&self, name: &str) -> Result<Meter, RegistryError> {
        self.get_or_register(name)
    }

    /// # Errors
    /// See [`MetricsRegistry::get_or_register`].
    pub fn get_or_register_timer(&self, name: &str) -> Result<Timer, RegistryError> {
        self.get_or_register(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Metric> {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn unregister(&self, name: &str) -> Option<Metric> {
        self.metrics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Registry for MetricsRegistry {
    // Handles are cloned out first so `f` may touch the registry without deadlocking.
    fn for_each(&self, f: &mut dyn FnMut(&str, &Metric)) {
        let metrics: Vec<(String, Metric)> = self
            .metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, metric)| (name.clone(), metric.clone()))
            .collect();
        for (name, metric) in &metrics {
            f(name, metric);
        }
    }
}
