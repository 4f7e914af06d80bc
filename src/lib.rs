#![warn(clippy::pedantic, clippy::nursery, clippy::cargo, clippy::perf)]

//! # `metrics_udp_reporter`
//!
//! Snapshots a metrics registry and ships every metric as a flat JSON document over UDP,
//! one datagram per metric, to a collector such as a Logstash UDP input.
//!
//! A metric named `api.requests` with default values `{"client": "billing"}` is sent as:
//!
//! ```json
//! {"identifier0": "api", "identifier1": "requests", "client": "billing", "kind": "counter", "counter": 6}
//! ```
//!
//! Metrics live in a [`MetricsRegistry`]. They can be registered directly or recorded through the
//! [`metrics`] facade once a [`MetricsRecorder`] is installed.
//!
//! ```no_run
//! use metrics_udp_reporter::{MetricsRecorder, ReporterBuilder};
//! use std::time::Duration;
//!
//! MetricsRecorder::default().install().expect("recorder");
//! let reporter = ReporterBuilder::default()
//!     .address("logstash.internal:5000")
//!     .default_value("client", "billing")
//!     .build()
//!     .expect("reporter");
//! let _handle = reporter.spawn(Duration::from_secs(10));
//!
//! metrics::counter!("api.requests").increment(1);
//! ```
//!
//! ## Async Support
//!
//! With the `tokio` feature enabled, [`Reporter::spawn`] runs the flush loop on a Tokio task
//! instead of a thread and must be called from within a Tokio runtime:
//!
//! ```toml
//! [dependencies]
//! metrics_udp_reporter = { version = "...", features = ["tokio"] }
//! ```
//!
//! Delivery is best effort: a datagram that is lost or refused is not retried.

mod error;
mod measure;
mod recorder;
mod registry;
mod reporter;

pub use error::{MetricsError, RegistryError, ReporterError};
pub use measure::{DefaultValues, Field, Measure, percentile_key};
pub use recorder::MetricsRecorder;
pub use registry::{
    Counter, CounterSnapshot, Gauge, GaugeFloat64, GaugeFloat64Snapshot, GaugeSnapshot,
    Histogram, HistogramSnapshot, Meter, MeterSnapshot, Metric, MetricsRegistry, RESERVOIR_SIZE,
    Registry, RegistryMetric, Timer, TimerSnapshot,
};
pub use reporter::{
    DEFAULT_ADDRESS, DEFAULT_PERCENTILES, FlushHandle, Reporter, ReporterBuilder, Transport,
    UdpTransport, VERSION,
};
