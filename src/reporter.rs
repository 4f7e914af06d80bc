mod transport;

pub use transport::{Transport, UdpTransport};

use crate::{
    error::ReporterError,
    measure::{DefaultValues, Field, Measure},
    registry::{MetricsRegistry, Registry},
};
use crossbeam_channel::Receiver;
#[cfg(not(feature = "tokio"))]
use crossbeam_channel::Sender;
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};
#[cfg(not(feature = "tokio"))]
use std::thread;
#[cfg(feature = "tokio")]
use tokio::{sync::oneshot, task};

/// Wire format version of the documents produced by [`Reporter`].
pub const VERSION: &str = "1.0.1";

/// Quantiles reported for every histogram and timer unless configured otherwise.
pub const DEFAULT_PERCENTILES: [f64; 5] = [0.50, 0.75, 0.95, 0.99, 0.999];

/// Where [`ReporterBuilder`] sends measures unless told otherwise.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:5000";

fn default_registry() -> Arc<dyn Registry> {
    Arc::new(MetricsRegistry::global().clone())
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Periodically ships every metric of a registry as one JSON datagram per metric.
pub struct Reporter<T = UdpTransport> {
    registry: Arc<dyn Registry>,
    transport: T,
    default_values: DefaultValues,
    percentiles: Vec<f64>,
    version: &'static str,
}

impl Reporter<UdpTransport> {
    /// Creates a reporter sending to `addr` over UDP.
    ///
    /// Without a registry the process-wide [`MetricsRegistry::global`] is used.
    /// Without default values only the metrics themselves are sent.
    ///
    /// # Example
    /// ```
    /// use metrics_udp_reporter::{MetricsRegistry, Reporter};
    /// use std::sync::Arc;
    ///
    /// let registry = MetricsRegistry::new();
    /// let reporter = Reporter::new(Some(Arc::new(registry.clone())), "127.0.0.1:5000", None)
    ///     .expect("reporter");
    /// registry.get_or_register_counter("jobs.done").unwrap().inc(1);
    /// let _ = reporter.flush_once();
    /// ```
    ///
    /// # Errors
    /// Returns [`ReporterError::AddressResolution`] if `addr` doesn't resolve and
    /// [`ReporterError::Socket`] if the UDP socket can't be opened.
    pub fn new(
        registry: Option<Arc<dyn Registry>>,
        addr: &str,
        default_values: Option<DefaultValues>,
    ) -> Result<Self, ReporterError> {
        let transport = UdpTransport::connect(addr)?;
        Ok(Self::with_transport(
            registry.unwrap_or_else(default_registry),
            transport,
            default_values.unwrap_or_default(),
        ))
    }

    /// Closes the socket. Later flushes fail with [`ReporterError::Socket`].
    pub fn close(&mut self) {
        self.transport.close();
    }
}

impl<T: Transport> Reporter<T> {
    pub fn with_transport(
        registry: Arc<dyn Registry>,
        transport: T,
        default_values: DefaultValues,
    ) -> Self {
        Self {
            registry,
            transport,
            default_values,
            percentiles: DEFAULT_PERCENTILES.to_vec(),
            version: VERSION,
        }
    }

    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    #[must_use]
    pub const fn default_values(&self) -> &DefaultValues {
        &self.default_values
    }

    #[must_use]
    pub fn percentiles(&self) -> &[f64] {
        &self.percentiles
    }

    #[must_use]
    pub const fn version(&self) -> &'static str {
        self.version
    }

    /// Builds a measure for every registered metric and sends each as its own datagram.
    ///
    /// Measures that can't be encoded are skipped. The first failed send aborts the
    /// flush, so metrics after it aren't sent.
    ///
    /// # Errors
    /// Returns [`ReporterError::Socket`] if a datagram couldn't be sent.
    pub fn flush_once(&self) -> Result<(), ReporterError> {
        let mut measures = Vec::new();
        self.registry.for_each(&mut |name, metric| {
            let mut measure = Measure::new(name, &self.default_values);
            measure.add(metric, &self.percentiles);
            measures.push(measure);
        });

        for measure in &measures {
            let payload = match measure.to_json() {
                Ok(payload) => payload,
                Err(e) => {
                    log::debug!("Skipping measure {:?}: {e}", measure.get("identifier0"));
                    continue;
                }
            };
            self.transport.send(&payload)?;
            log::trace!("Sent {} byte measure", payload.len());
        }
        Ok(())
    }

    /// Flushes every `interval` until `stop` receives a message or its sender is dropped.
    ///
    /// Errors and panics inside a flush are logged and the loop carries on.
    pub fn flush_each(&self, interval: Duration, stop: &Receiver<()>) {
        log::info!("Flushing metrics every {interval:?}");
        let ticker = crossbeam_channel::tick(interval);
        loop {
            crossbeam_channel::select! {
                recv(ticker) -> _ => self.guarded_flush(),
                recv(stop) -> _ => break,
            }
        }
        log::info!("Metrics flush loop stopped");
    }

    /// Async counterpart of [`Reporter::flush_each`].
    #[cfg(feature = "tokio")]
    pub async fn flush_each_async(&self, interval: Duration, mut stop: oneshot::Receiver<()>) {
        log::info!("Flushing metrics every {interval:?}");
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.guarded_flush(),
                _ = &mut stop => break,
            }
        }
        log::info!("Metrics flush loop stopped");
    }

    fn guarded_flush(&self) {
        match panic::catch_unwind(AssertUnwindSafe(|| self.flush_once())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!("Failed to flush metrics: {e}"),
            Err(payload) => log::error!("Metrics flush panicked: {}", panic_message(&*payload)),
        }
    }
}

impl<T: Transport + 'static> Reporter<T> {
    /// Runs [`Reporter::flush_each`] on a background thread.
    #[cfg(not(feature = "tokio"))]
    #[must_use]
    pub fn spawn(self, interval: Duration) -> FlushHandle {
        let (stop, stopped) = crossbeam_channel::bounded(1);
        let worker = thread::spawn(move || self.flush_each(interval, &stopped));
        FlushHandle { stop, worker }
    }

    /// Runs [`Reporter::flush_each_async`] on a Tokio task. Must be called inside a runtime.
    #[cfg(feature = "tokio")]
    #[must_use]
    pub fn spawn(self, interval: Duration) -> FlushHandle {
        let (stop, stopped) = oneshot::channel();
        let worker = task::spawn(async move { self.flush_each_async(interval, stopped).await });
        FlushHandle { stop, worker }
    }
}

/// Controls a flush loop started by [`Reporter::spawn`]. Dropping it also ends the loop.
#[derive(Debug)]
pub struct FlushHandle {
    #[cfg(not(feature = "tokio"))]
    stop: Sender<()>,
    #[cfg(not(feature = "tokio"))]
    worker: thread::JoinHandle<()>,
    #[cfg(feature = "tokio")]
    stop: oneshot::Sender<()>,
    #[cfg(feature = "tokio")]
    worker: task::JoinHandle<()>,
}

impl FlushHandle {
    /// Stops the loop and waits for the current flush to finish.
    #[cfg(not(feature = "tokio"))]
    pub fn stop(self) {
        let _ = self.stop.send(());
        if self.worker.join().is_err() {
            log::error!("Metrics flush thread panicked");
        }
    }

    /// Stops the loop and waits for the current flush to finish.
    #[cfg(feature = "tokio")]
    pub async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.worker.await {
            log::error!("Metrics flush task failed: {e}");
        }
    }
}

/// Configures and builds a [`Reporter`].
///
/// # Example
/// ```
/// use metrics_udp_reporter::{MetricsRegistry, ReporterBuilder};
///
/// let reporter = ReporterBuilder::default()
///     .address("127.0.0.1:5000")
///     .registry(MetricsRegistry::new())
///     .default_value("client", "billing")
///     .percentiles(&[0.5, 0.99])
///     .build()
///     .expect("reporter");
/// assert_eq!(reporter.percentiles(), &[0.5, 0.99]);
/// ```
pub struct ReporterBuilder {
    registry: Option<Arc<dyn Registry>>,
    address: String,
    default_values: DefaultValues,
    percentiles: Vec<f64>,
}

impl Default for ReporterBuilder {
    fn default() -> Self {
        Self {
            registry: None,
            address: DEFAULT_ADDRESS.into(),
            default_values: DefaultValues::new(),
            percentiles: DEFAULT_PERCENTILES.to_vec(),
        }
    }
}

impl ReporterBuilder {
    /// Sets the collector address, as `host:port`.
    #[must_use]
    pub fn address(mut self, address: &str) -> Self {
        self.address = address.to_string();
        self
    }

    #[must_use]
    pub fn registry<R: Registry + 'static>(mut self, registry: R) -> Self {
        self.registry = Some(Arc::new(registry));
        self
    }

    /// Adds a value sent with every measure.
    #[must_use]
    pub fn default_value(mut self, key: &str, value: impl Into<Field>) -> Self {
        self.default_values.insert(key.to_string(), value.into());
        self
    }

    /// Replaces all default values.
    #[must_use]
    pub fn default_values(mut self, default_values: DefaultValues) -> Self {
        self.default_values = default_values;
        self
    }

    #[must_use]
    pub fn percentiles(mut self, percentiles: &[f64]) -> Self {
        self.percentiles = percentiles.to_vec();
        self
    }

    /// Builds a reporter sending over UDP to the configured address.
    ///
    /// # Errors
    /// See [`Reporter::new`].
    pub fn build(self) -> Result<Reporter, ReporterError> {
        let transport = UdpTransport::connect(&self.address)?;
        Ok(self.build_with_transport(transport))
    }

    /// Builds a reporter over a custom transport. The configured address is ignored.
    pub fn build_with_transport<T: Transport>(self, transport: T) -> Reporter<T> {
        let mut reporter = Reporter::with_transport(
            self.registry.unwrap_or_else(default_registry),
            transport,
            self.default_values,
        );
        reporter.percentiles = self.percentiles;
        reporter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Metric, MetricsRegistry};
    use serde_json::{Value, json};
    use std::{
        io,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    /// Keeps every payload, failing from the `fail_at`th send onwards.
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Vec<u8>>>,
        attempts: AtomicUsize,
        fail_at: Option<usize>,
    }

    impl RecordingTransport {
        fn failing_at(n: usize) -> Self {
            Self {
                fail_at: Some(n),
                ..Self::default()
            }
        }

        fn payloads(&self) -> Vec<Value> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|p| serde_json::from_slice(p).unwrap())
                .collect()
        }
    }

    impl Transport for RecordingTransport {
        fn send(&self, payload: &[u8]) -> io::Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_at.is_some_and(|n| attempt >= n) {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
            }
            self.sent.lock().unwrap().push(payload.to_vec());
            Ok(())
        }
    }

    struct PanickingRegistry {
        calls: Arc<AtomicUsize>,
    }

    impl Registry for PanickingRegistry {
        fn for_each(&self, _f: &mut dyn FnMut(&str, &Metric)) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            panic!("registry exploded");
        }
    }

    fn registry_with(names: &[&str]) -> MetricsRegistry {
        let registry = MetricsRegistry::new();
        for name in names {
            registry.get_or_register_counter(name).unwrap().inc(1);
        }
        registry
    }

    #[test]
    fn defaults() {
        let reporter = ReporterBuilder::default()
            .registry(MetricsRegistry::new())
            .build_with_transport(RecordingTransport::default());
        assert_eq!(reporter.percentiles(), &DEFAULT_PERCENTILES);
        assert_eq!(reporter.version(), "1.0.1");
        assert!(reporter.default_values().is_empty());
    }

    #[test]
    fn one_datagram_per_metric() {
        let reporter = ReporterBuilder::default()
            .registry(registry_with(&["a", "b.c", "d"]))
            .default_value("client", "dummy-client")
            .build_with_transport(RecordingTransport::default());

        reporter.flush_once().unwrap();
        let payloads = reporter.transport().payloads();
        assert_eq!(payloads.len(), 3);
        assert_eq!(
            payloads[1],
            json!({
                "identifier0": "b",
                "identifier1": "c",
                "client": "dummy-client",
                "kind": "counter",
                "counter": 1,
            })
        );
    }

    #[test]
    fn send_failure_aborts_flush() {
        let reporter = ReporterBuilder::default()
            .registry(registry_with(&["a", "b", "c", "d"]))
            .build_with_transport(RecordingTransport::failing_at(3));

        let err = reporter.flush_once().unwrap_err();
        assert!(matches!(err, ReporterError::Socket(_)));
        assert_eq!(reporter.transport().payloads().len(), 2);
        assert_eq!(reporter.transport().attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn unencodable_measure_is_skipped() {
        let registry = registry_with(&["a", "c"]);
        registry.get_or_register_gauge_f64("b").unwrap().update(f64::INFINITY);
        let reporter = ReporterBuilder::default()
            .registry(registry)
            .build_with_transport(RecordingTransport::default());

        reporter.flush_once().unwrap();
        let names: Vec<_> = reporter
            .transport()
            .payloads()
            .iter()
            .map(|p| p["identifier0"].clone())
            .collect();
        assert_eq!(names, vec![json!("a"), json!("c")]);
    }

    #[test]
    fn custom_percentiles_apply_to_histograms() {
        let registry = MetricsRegistry::new();
        registry.get_or_register_histogram("sizes").unwrap().update(7);
        let reporter = ReporterBuilder::default()
            .registry(registry)
            .percentiles(&[0.9])
            .build_with_transport(RecordingTransport::default());

        reporter.flush_once().unwrap();
        let payloads = reporter.transport().payloads();
        let histogram = payloads[0]["histogram"].as_object().unwrap();
        assert_eq!(histogram["p90"], json!(7.0));
        assert!(!histogram.contains_key("p50"));
    }

    #[test]
    fn saturated_timer_samples_flush_cleanly() {
        let registry = MetricsRegistry::new();
        let timer = registry.get_or_register_timer("big").unwrap();
        timer.update(Duration::from_secs(u64::MAX));
        timer.update(Duration::from_secs(u64::MAX));
        let reporter = ReporterBuilder::default()
            .registry(registry)
            .build_with_transport(RecordingTransport::default());

        reporter.flush_once().unwrap();
        let payloads = reporter.transport().payloads();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["timer"]["count"], json!(2));
        assert_eq!(payloads[0]["timer"]["max"], json!(i64::MAX));
    }

    #[test]
    fn direct_flush_does_not_catch_panics() {
        let reporter = Reporter::with_transport(
            Arc::new(PanickingRegistry {
                calls: Arc::default(),
            }),
            RecordingTransport::default(),
            DefaultValues::new(),
        );
        let result = panic::catch_unwind(AssertUnwindSafe(|| reporter.flush_once()));
        assert!(result.is_err());
    }

    #[test]
    fn flush_loop_survives_panics_and_stops_on_signal() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reporter = Reporter::with_transport(
            Arc::new(PanickingRegistry {
                calls: calls.clone(),
            }),
            RecordingTransport::default(),
            DefaultValues::new(),
        );
        let (stop, stopped) = crossbeam_channel::bounded(1);

        std::thread::scope(|s| {
            s.spawn(|| reporter.flush_each(Duration::from_millis(5), &stopped));
            while calls.load(Ordering::SeqCst) < 3 {
                std::thread::sleep(Duration::from_millis(5));
            }
            stop.send(()).unwrap();
        });
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn flush_loop_ends_when_stop_sender_dropped() {
        let reporter = ReporterBuilder::default()
            .registry(MetricsRegistry::new())
            .build_with_transport(RecordingTransport::default());
        let (stop, stopped) = crossbeam_channel::bounded::<()>(1);
        drop(stop);
        reporter.flush_each(Duration::from_secs(3600), &stopped);
    }

    #[cfg(not(feature = "tokio"))]
    #[test]
    fn spawned_loop_keeps_flushing_after_errors() {
        let transport = Arc::new(RecordingTransport::failing_at(1));
        let reporter = ReporterBuilder::default()
            .registry(registry_with(&["a"]))
            .build_with_transport(transport.clone());

        let handle = reporter.spawn(Duration::from_millis(5));
        while transport.attempts.load(Ordering::SeqCst) < 3 {
            std::thread::sleep(Duration::from_millis(5));
        }
        handle.stop();
        assert!(transport.payloads().is_empty());
    }

    #[cfg(feature = "tokio")]
    #[tokio::test]
    async fn spawned_task_keeps_flushing_after_errors() {
        let transport = Arc::new(RecordingTransport::failing_at(1));
        let reporter = ReporterBuilder::default()
            .registry(registry_with(&["a"]))
            .build_with_transport(transport.clone());

        let handle = reporter.spawn(Duration::from_millis(5));
        while transport.attempts.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.stop().await;
        assert!(transport.payloads().is_empty());
    }
}
