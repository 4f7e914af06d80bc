use rand::Rng;
use std::sync::{Arc, Mutex, PoisonError};

/// Number of values retained by a histogram's reservoir.
pub const RESERVOIR_SIZE: usize = 1028;

/// Uniform random sample of a stream, using Vitter's algorithm R.
#[derive(Debug)]
struct UniformSample {
    count: i64,
    values: Vec<i64>,
}

impl UniformSample {
    fn new() -> Self {
        Self {
            count: 0,
            values: Vec::with_capacity(RESERVOIR_SIZE),
        }
    }

    fn update(&mut self, value: i64) {
        self.count += 1;
        if self.values.len() < RESERVOIR_SIZE {
            self.values.push(value);
            return;
        }
        let slot = rand::rng().random_range(0..self.count);
        if let Ok(slot) = usize::try_from(slot) {
            if slot < RESERVOIR_SIZE {
                self.values[slot] = value;
            }
        }
    }
}

/// Tracks the distribution of a stream of integer values.
#[derive(Debug, Clone)]
pub struct Histogram {
    sample: Arc<Mutex<UniformSample>>,
}

impl Default for Histogram {
    fn default() -> Self {
        Self {
            sample: Arc::new(Mutex::new(UniformSample::new())),
        }
    }
}

impl Histogram {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, value: i64) {
        self.sample
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .update(value);
    }

    pub fn clear(&self) {
        *self.sample.lock().unwrap_or_else(PoisonError::into_inner) = UniformSample::new();
    }

    /// Copies the current sample. Later updates don't affect the snapshot.
    #[must_use]
    pub fn snapshot(&self) -> HistogramSnapshot {
        let sample = self.sample.lock().unwrap_or_else(PoisonError::into_inner);
        let mut values = sample.values.clone();
        let count = sample.count;
        drop(sample);

        values.sort_unstable();
        HistogramSnapshot { count, values }
    }
}

/// Immutable view of a [`Histogram`]. All statistics are zero when nothing was recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistogramSnapshot {
    count: i64,
    values: Vec<i64>,
}

#[allow(clippy::cast_precision_loss)]
impl HistogramSnapshot {
    /// Total number of recorded values, including those evicted from the sample.
    #[must_use]
    pub const fn count(&self) -> i64 {
        self.count
    }

    #[must_use]
    pub fn min(&self) -> i64 {
        self.values.first().copied().unwrap_or_default()
    }

    #[must_use]
    pub fn max(&self) -> i64 {
        self.values.last().copied().unwrap_or_default()
    }

    /// Sum of the sampled values. Widened so saturated samples can't overflow.
    #[must_use]
    pub fn sum(&self) -> i128 {
        self.values.iter().map(|&v| i128::from(v)).sum()
    }

    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.sum() as f64 / self.values.len() as f64
    }

    /// Population variance of the sampled values.
    #[must_use]
    pub fn variance(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let squares: f64 = self
            .values
            .iter()
            .map(|&v| {
                let d = v as f64 - mean;
                d * d
            })
            .sum();
        squares / self.values.len() as f64
    }

    #[must_use]
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Interpolated value at quantile `p` (0.0..=1.0), ranked over `n + 1` positions.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn percentile(&self, p: f64) -> f64 {
        let size = self.values.len();
        if size == 0 {
            return 0.0;
        }
        let pos = p * (size + 1) as f64;
        if pos < 1.0 {
            self.values[0] as f64
        } else if pos >= size as f64 {
            self.values[size - 1] as f64
        } else {
            let lower = self.values[pos as usize - 1] as f64;
            let upper = self.values[pos as usize] as f64;
            (upper - lower).mul_add(pos.fract(), lower)
        }
    }

    /// The sampled values in ascending order.
    #[must_use]
    pub fn values(&self) -> &[i64] {
        &self.values
    }
}
