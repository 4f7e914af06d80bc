use crate::{
    error::MetricsError,
    registry::{
        Counter, GaugeFloat64, Histogram, Metric, MetricsRegistry, RegistryMetric, Timer,
    },
};
use metrics::Unit;
use std::{
    collections::{BTreeMap, HashMap},
    fmt::Write,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

#[derive(Debug)]
enum Handle {
    Counter(Counter),
    Gauge(GaugeFloat64),
    Histogram(Histogram),
    Timer(Timer, Unit),
}

impl metrics::CounterFn for Handle {
    fn increment(&self, value: u64) {
        if let Self::Counter(counter) = self {
            counter.inc(i64::try_from(value).unwrap_or(i64::MAX));
        }
    }

    fn absolute(&self, value: u64) {
        if let Self::Counter(counter) = self {
            counter.store(i64::try_from(value).unwrap_or(i64::MAX));
        }
    }
}

impl metrics::GaugeFn for Handle {
    fn increment(&self, value: f64) {
        if let Self::Gauge(gauge) = self {
            gauge.add(value);
        }
    }

    fn decrement(&self, value: f64) {
        if let Self::Gauge(gauge) = self {
            gauge.add(-value);
        }
    }

    fn set(&self, value: f64) {
        if let Self::Gauge(gauge) = self {
            gauge.update(value);
        }
    }
}

impl metrics::HistogramFn for Handle {
    #[allow(clippy::cast_possible_truncation)]
    fn record(&self, value: f64) {
        match self {
            Self::Histogram(histogram) => histogram.update(value as i64),
            Self::Timer(timer, unit) => timer.update(to_duration(value, *unit)),
            Self::Counter(_) | Self::Gauge(_) => {}
        }
    }
}

const fn is_time_unit(unit: Unit) -> bool {
    matches!(
        unit,
        Unit::Seconds | Unit::Milliseconds | Unit::Microseconds | Unit::Nanoseconds
    )
}

fn to_duration(value: f64, unit: Unit) -> Duration {
    let seconds = match unit {
        Unit::Seconds => value,
        Unit::Milliseconds => value / 1e3,
        Unit::Microseconds => value / 1e6,
        _ => value / 1e9,
    };
    Duration::try_from_secs_f64(seconds).unwrap_or_default()
}

/// Registry name for a facade key. Labels become extra `key=value` segments, sorted by key.
fn registry_name(key: &metrics::Key) -> String {
    let labels = key
        .labels()
        .map(|label| (label.key(), label.value()))
        .collect::<BTreeMap<_, _>>();
    let mut name = key.name().to_string();
    for (k, v) in labels {
        let _ = write!(name, ".{k}={v}");
    }
    name
}

/// Feeds the [`metrics`] facade into a [`MetricsRegistry`].
///
/// Counters map to [`Counter`], gauges to [`GaugeFloat64`] and histograms to
/// [`Histogram`]. A histogram described with a time unit is kept as a [`Timer`]
/// instead, so its percentiles are reported in milliseconds. A histogram that was
/// already recorded before being described stays a [`Histogram`].
#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    registry: MetricsRegistry,
    time_units: Arc<RwLock<HashMap<String, Unit>>>,
}

impl Default for MetricsRecorder {
    /// A recorder over [`MetricsRegistry::global`].
    fn default() -> Self {
        Self::new(MetricsRegistry::global().clone())
    }
}

impl MetricsRecorder {
    #[must_use]
    pub fn new(registry: MetricsRegistry) -> Self {
        Self {
            registry,
            time_units: Arc::default(),
        }
    }

    #[must_use]
    pub const fn registry(&self) -> &MetricsRegistry {
        &self.registry
    }

    /// Sets this recorder as the global recorder.
    /// All metrics recorded through the facade after this call land in the registry.
    ///
    /// # Example
    /// ```
    /// use metrics_udp_reporter::MetricsRecorder;
    /// if let Err(e) = MetricsRecorder::default().install() {
    ///     eprintln!("Failed to install metrics recorder: {}", e);
    /// }
    /// ```
    ///
    /// # Errors
    /// Returns an error if a global recorder was already set.
    pub fn install(self) -> Result<(), MetricsError> {
        metrics::set_global_recorder(self).map_err(Into::into)
    }

    fn lookup<M: RegistryMetric>(&self, name: &str) -> Option<M> {
        match self.registry.get_or_register(name) {
            Ok(metric) => Some(metric),
            Err(e) => {
                log::warn!("Ignoring updates to {name}: {e}");
                None
            }
        }
    }

    fn time_unit(&self, name: &str) -> Option<Unit> {
        self.time_units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
    }
}

impl metrics::Recorder for MetricsRecorder {
    fn describe_counter(
        &self,
        key_name: metrics::KeyName,
        _unit: Option<Unit>,
        _description: metrics::SharedString,
    ) {
        log::trace!("Described counter {}", key_name.as_str());
    }

    fn describe_gauge(
        &self,
        key_name: metrics::KeyName,
        _unit: Option<Unit>,
        _description: metrics::SharedString,
    ) {
        log::trace!("Described gauge {}", key_name.as_str());
    }

    fn describe_histogram(
        &self,
        key_name: metrics::KeyName,
        unit: Option<Unit>,
        _description: metrics::SharedString,
    ) {
        if let Some(unit) = unit.filter(|u| is_time_unit(*u)) {
            self.time_units
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key_name.as_str().to_string(), unit);
        }
    }

    fn register_counter(
        &self,
        key: &metrics::Key,
        _meta: &metrics::Metadata<'_>,
    ) -> metrics::Counter {
        self.lookup(&registry_name(key))
            .map_or_else(metrics::Counter::noop, |counter| {
                metrics::Counter::from_arc(Arc::new(Handle::Counter(counter)))
            })
    }

    fn register_gauge(&self, key: &metrics::Key, _meta: &metrics::Metadata<'_>) -> metrics::Gauge {
        self.lookup(&registry_name(key))
            .map_or_else(metrics::Gauge::noop, |gauge| {
                metrics::Gauge::from_arc(Arc::new(Handle::Gauge(gauge)))
            })
    }

    fn register_histogram(
        &self,
        key: &metrics::Key,
        _meta: &metrics::Metadata<'_>,
    ) -> metrics::Histogram {
        let name = registry_name(key);
        let handle = match (self.time_unit(key.name()), self.registry.get(&name)) {
            // Recorded before it was described: keep feeding the existing histogram.
            (_, Some(Metric::Histogram(histogram))) => Some(Handle::Histogram(histogram)),
            (Some(unit), _) => self
                .lookup::<Timer>(&name)
                .map(|timer| Handle::Timer(timer, unit)),
            (None, _) => self.lookup::<Histogram>(&name).map(Handle::Histogram),
        };
        handle.map_or_else(metrics::Histogram::noop, |handle| {
            metrics::Histogram::from_arc(Arc::new(handle))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_land_in_registry() {
        let recorder = MetricsRecorder::new(MetricsRegistry::new());
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!("requests").increment(4);
            metrics::counter!("requests").increment(2);
        });

        let counter = recorder.registry().get_or_register_counter("requests").unwrap();
        assert_eq!(counter.count(), 6);
    }

    #[test]
    fn absolute_overwrites_counter() {
        let recorder = MetricsRecorder::new(MetricsRegistry::new());
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!("restarts").increment(4);
            metrics::counter!("restarts").absolute(1);
        });

        let counter = recorder.registry().get_or_register_counter("restarts").unwrap();
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn gauges_are_float_gauges() {
        let recorder = MetricsRecorder::new(MetricsRegistry::new());
        metrics::with_local_recorder(&recorder, || {
            let gauge = metrics::gauge!("queue_size");
            gauge.set(10.0);
            gauge.increment(2.5);
            gauge.decrement(0.5);
        });

        let gauge = recorder.registry().get_or_register_gauge_f64("queue_size").unwrap();
        assert!((gauge.value() - 12.0).abs() < 1e-9);
    }

    #[test]
    fn labels_become_name_segments() {
        let recorder = MetricsRecorder::new(MetricsRegistry::new());
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!("http", "status" => "200", "method" => "get").increment(1);
        });

        assert!(matches!(
            recorder.registry().get("http.method=get.status=200"),
            Some(Metric::Counter(_))
        ));
    }

    #[test]
    fn histograms_record_integer_samples() {
        let recorder = MetricsRecorder::new(MetricsRegistry::new());
        metrics::with_local_recorder(&recorder, || {
            metrics::histogram!("payload_bytes").record(512.9);
        });

        let snapshot = recorder
            .registry()
            .get_or_register_histogram("payload_bytes")
            .unwrap()
            .snapshot();
        assert_eq!(snapshot.count(), 1);
        assert_eq!(snapshot.max(), 512);
    }

    #[test]
    fn time_unit_histograms_become_timers() {
        let recorder = MetricsRecorder::new(MetricsRegistry::new());
        metrics::with_local_recorder(&recorder, || {
            metrics::describe_histogram!("latency", Unit::Milliseconds, "request latency");
            metrics::histogram!("latency").record(2.0);
        });

        let snapshot = recorder
            .registry()
            .get_or_register_timer("latency")
            .unwrap()
            .snapshot();
        assert_eq!(snapshot.count(), 1);
        assert_eq!(snapshot.max(), 2_000_000);
    }

    #[test]
    fn describing_after_recording_keeps_histogram() {
        let recorder = MetricsRecorder::new(MetricsRegistry::new());
        metrics::with_local_recorder(&recorder, || {
            metrics::histogram!("latency").record(2.0);
            metrics::describe_histogram!("latency", Unit::Milliseconds, "request latency");
            metrics::histogram!("latency").record(3.0);
            metrics::histogram!("latency").record(4.0);
        });

        let Some(Metric::Histogram(histogram)) = recorder.registry().get("latency") else {
            panic!("latency should stay a histogram");
        };
        let snapshot = histogram.snapshot();
        assert_eq!(snapshot.count(), 3);
        assert_eq!(snapshot.max(), 4);
    }

    #[test]
    fn kind_clash_falls_back_to_noop() {
        let registry = MetricsRegistry::new();
        registry.get_or_register_gauge("jobs").unwrap().update(3);
        let recorder = MetricsRecorder::new(registry);
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!("jobs").increment(1);
        });

        assert!(matches!(recorder.registry().get("jobs"), Some(Metric::Gauge(_))));
    }

    #[test]
    fn negative_durations_clamp_to_zero() {
        assert_eq!(to_duration(-5.0, Unit::Seconds), Duration::ZERO);
        assert_eq!(to_duration(250.0, Unit::Milliseconds), Duration::from_millis(250));
    }
}
