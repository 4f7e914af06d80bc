use crate::{
    error::ReporterError,
    registry::{Counter, Gauge, GaugeFloat64, Histogram, Meter, Metric, Timer},
};
use serde::{Serialize, Serializer, ser::Error as _};
use std::{collections::BTreeMap, time::Duration};

/// Values merged into every measure, keyed by field name.
pub type DefaultValues = BTreeMap<String, Field>;

/// A single value inside a [`Measure`].
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Str(String),
    Int(i64),
    Float(f64),
    Map(BTreeMap<String, Field>),
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Str(v) => serializer.serialize_str(v),
            Self::Int(v) => serializer.serialize_i64(*v),
            Self::Float(v) if v.is_finite() => serializer.serialize_f64(*v),
            // JSON has no representation for NaN or infinities.
            Self::Float(v) => Err(S::Error::custom(format!("unsupported float value {v}"))),
            Self::Map(fields) => fields.serialize(serializer),
        }
    }
}

impl From<&str> for Field {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Field {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for Field {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Field {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for Field {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<BTreeMap<String, Self>> for Field {
    fn from(value: BTreeMap<String, Self>) -> Self {
        Self::Map(value)
    }
}

/// The flattened JSON document sent for one metric.
///
/// A metric named `a.b.c` yields `identifier0 = "a"`, `identifier1 = "b"`,
/// `identifier2 = "c"`, followed by the default values, a `kind` tag and the
/// metric's own values under a key named after its kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Measure(BTreeMap<String, Field>);

impl Measure {
    /// Creates a measure holding the identifiers of `name` and every default value.
    ///
    /// Default values are applied last, so a default named like an identifier replaces it.
    #[must_use]
    pub fn new(name: &str, default_values: &DefaultValues) -> Self {
        let mut fields: BTreeMap<String, Field> = name
            .split('.')
            .enumerate()
            .map(|(i, segment)| (format!("identifier{i}"), segment.into()))
            .collect();
        fields.extend(default_values.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self(fields)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Field> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Field>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn set_kind(&mut self, kind: &str, value: impl Into<Field>) {
        self.insert("kind", kind);
        self.insert(kind, value);
    }

    /// Adds `metric`'s values using the builder for its kind.
    pub fn add(&mut self, metric: &Metric, percentiles: &[f64]) {
        match metric {
            Metric::Counter(counter) => self.add_counter(counter),
            Metric::Gauge(gauge) => self.add_gauge(gauge),
            Metric::GaugeFloat64(gauge) => self.add_gauge_f64(gauge),
            Metric::Histogram(histogram) => self.add_histogram(histogram, percentiles),
            Metric::Meter(meter) => self.add_meter(meter),
            Metric::Timer(timer) => self.add_timer(timer, percentiles),
        }
    }

    pub fn add_counter(&mut self, counter: &Counter) {
        self.set_kind("counter", counter.snapshot().count);
    }

    pub fn add_gauge(&mut self, gauge: &Gauge) {
        self.set_kind("gauge", gauge.snapshot().value);
    }

    pub fn add_gauge_f64(&mut self, gauge: &GaugeFloat64) {
        self.set_kind("gauge64", gauge.snapshot().value);
    }

    pub fn add_histogram(&mut self, histogram: &Histogram, percentiles: &[f64]) {
        let snapshot = histogram.snapshot();
        let mut fields: BTreeMap<String, Field> = BTreeMap::new();
        fields.insert("count".into(), Field::Int(snapshot.count()));
        fields.insert("max".into(), Field::Int(snapshot.max()));
        fields.insert("min".into(), Field::Int(snapshot.min()));
        fields.insert("mean".into(), Field::Float(snapshot.mean()));
        fields.insert("stddev".into(), Field::Float(snapshot.std_dev()));
        fields.insert("var".into(), Field::Float(snapshot.variance()));
        for &p in percentiles {
            fields.insert(percentile_key(p), Field::Float(snapshot.percentile(p)));
        }
        self.set_kind("histogram", fields);
    }

    pub fn add_meter(&mut self, meter: &Meter) {
        let snapshot = meter.snapshot();
        let mut fields: BTreeMap<String, Field> = BTreeMap::new();
        fields.insert("count".into(), Field::Int(snapshot.count));
        fields.insert("rate1".into(), Field::Float(snapshot.rate1));
        fields.insert("rate5".into(), Field::Float(snapshot.rate5));
        fields.insert("rate15".into(), Field::Float(snapshot.rate15));
        fields.insert("mean".into(), Field::Float(snapshot.rate_mean));
        self.set_kind("meter", fields);
    }

    /// Only the percentiles are converted to milliseconds; every other timer
    /// field stays in raw nanoseconds, which is what the collector schema expects.
    pub fn add_timer(&mut self, timer: &Timer, percentiles: &[f64]) {
        let snapshot = timer.snapshot();
        let mut fields: BTreeMap<String, Field> = BTreeMap::new();
        fields.insert("count".into(), Field::Int(snapshot.count()));
        fields.insert("max".into(), Field::Int(snapshot.max()));
        fields.insert("min".into(), Field::Int(snapshot.min()));
        fields.insert("mean".into(), Field::Float(snapshot.mean()));
        fields.insert("stddev".into(), Field::Float(snapshot.std_dev()));
        fields.insert("var".into(), Field::Float(snapshot.variance()));
        for &p in percentiles {
            fields.insert(
                percentile_key(p),
                Field::Float(nanos_to_millis(snapshot.percentile(p))),
            );
        }
        self.set_kind("timer", fields);
    }

    /// Encodes the measure as a self-contained JSON object.
    ///
    /// # Errors
    /// Returns [`ReporterError::Encode`] if a value can't be represented in JSON.
    pub fn to_json(&self) -> Result<Vec<u8>, ReporterError> {
        serde_json::to_vec(self).map_err(Into::into)
    }
}

/// Renders a quantile as a field name: `0.5` becomes `p50` and `0.999` becomes `p99_9`.
///
/// Very small or large values switch to exponent form the way `%g` does,
/// so `1e-7` becomes `p1e-05`.
#[must_use]
pub fn percentile_key(p: f64) -> String {
    format!("p{}", general_format(p * 100.0)).replace('.', "_")
}

// Shortest digits, in exponent form when the exponent is below -4 or at least 6.
fn general_format(x: f64) -> String {
    if x == 0.0 || !x.is_finite() {
        return x.to_string();
    }
    let scientific = format!("{x:e}");
    let Some((mantissa, exp)) = scientific.split_once('e') else {
        return x.to_string();
    };
    match exp.parse::<i32>() {
        Ok(exp) if !(-4..6).contains(&exp) => {
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.unsigned_abs())
        }
        _ => x.to_string(),
    }
}

// Truncates to whole nanoseconds before converting.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn nanos_to_millis(nanos: f64) -> f64 {
    Duration::from_nanos(nanos as u64).as_secs_f64() * 1000.0
}
