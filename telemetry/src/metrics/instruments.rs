use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Label key used for trace exemplars.
pub const EXEMPLAR_TRACE_LABEL: &str = "TraceID";

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, amount: u64) {
        self.value.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A value that can go up and down, stored as `f64` bits.
#[derive(Debug, Default)]
pub struct Gauge {
    bits: AtomicU64,
}

impl Gauge {
    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn add(&self, delta: f64) {
        let _ = self.bits.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
            Some((f64::from_bits(bits) + delta).to_bits())
        });
    }

    pub fn inc(&self) {
        self.add(1.0);
    }

    pub fn dec(&self) {
        self.add(-1.0);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// A sample attached to a histogram bucket, linking it to a trace.
#[derive(Debug, Clone, PartialEq)]
pub struct Exemplar {
    pub labels: Vec<(String, String)>,
    pub value: f64,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
}

impl Exemplar {
    pub fn for_trace(trace_id: impl Into<String>, value: f64) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0.0, |elapsed| elapsed.as_secs_f64());
        Self {
            labels: vec![(EXEMPLAR_TRACE_LABEL.to_string(), trace_id.into())],
            value,
            timestamp,
        }
    }
}

#[derive(Debug)]
struct HistogramState {
    // One slot per bound plus the +Inf bucket; not cumulative.
    counts: Vec<u64>,
    exemplars: Vec<Option<Exemplar>>,
    sum: f64,
    count: u64,
}

/// Point-in-time copy of a histogram with cumulative bucket counts.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    /// `(upper bound, cumulative count)`; the last bound is `+Inf`.
    pub buckets: Vec<(f64, u64)>,
    pub exemplars: Vec<Option<Exemplar>>,
    pub sum: f64,
    pub count: u64,
}

/// A fixed-bucket histogram. Count, sum and buckets are updated together.
#[derive(Debug)]
pub struct Histogram {
    bounds: Arc<[f64]>,
    state: Mutex<HistogramState>,
}

impl Histogram {
    pub(crate) fn new(bounds: Arc<[f64]>) -> Self {
        let slots = bounds.len() + 1;
        Self {
            bounds,
            state: Mutex::new(HistogramState {
                counts: vec![0; slots],
                exemplars: vec![None; slots],
                sum: 0.0,
                count: 0,
            }),
        }
    }

    pub fn observe(&self, value: f64) {
        self.record(value, None);
    }

    pub fn observe_with_exemplar(&self, value: f64, exemplar: Exemplar) {
        self.record(value, Some(exemplar));
    }

    fn record(&self, value: f64, exemplar: Option<Exemplar>) {
        if value.is_nan() {
            return;
        }
        let slot = self
            .bounds
            .iter()
            .position(|bound| value <= *bound)
            .unwrap_or(self.bounds.len());

        let mut state = self.state.lock();
        if let Some(count) = state.counts.get_mut(slot) {
            *count += 1;
        }
        if let Some(exemplar) = exemplar {
            if let Some(kept) = state.exemplars.get_mut(slot) {
                *kept = Some(exemplar);
            }
        }
        state.sum += value;
        state.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.state.lock().count
    }

    pub fn sum(&self) -> f64 {
        self.state.lock().sum
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let state = self.state.lock();
        let mut cumulative = 0;
        let buckets = self
            .bounds
            .iter()
            .copied()
            .chain(std::iter::once(f64::INFINITY))
            .zip(state.counts.iter())
            .map(|(bound, count)| {
                cumulative += count;
                (bound, cumulative)
            })
            .collect();
        HistogramSnapshot {
            buckets,
            exemplars: state.exemplars.clone(),
            sum: state.sum,
            count: state.count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauge_moves_both_ways() {
        let gauge = Gauge::default();
        gauge.inc();
        gauge.inc();
        gauge.dec();
        gauge.add(0.5);
        assert!((gauge.get() - 1.5).abs() < f64::EPSILON);
        gauge.set(-3.0);
        assert!((gauge.get() + 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_histogram_cumulative_buckets() {
        let histogram = Histogram::new(Arc::from(vec![0.1, 1.0]));
        histogram.observe(0.05);
        histogram.observe(0.5);
        histogram.observe(0.5);
        histogram.observe(7.0);
        histogram.observe(f64::NAN);

        let snapshot = histogram.snapshot();
        assert_eq!(snapshot.count, 4);
        assert!((snapshot.sum - 8.05).abs() < 1e-9);
        assert_eq!(snapshot.buckets, vec![(0.1, 1), (1.0, 3), (f64::INFINITY, 4)]);
    }

    #[test]
    fn test_histogram_keeps_latest_exemplar_per_bucket() {
        let histogram = Histogram::new(Arc::from(vec![1.0]));
        histogram.observe_with_exemplar(0.2, Exemplar::for_trace("a", 0.2));
        histogram.observe_with_exemplar(0.4, Exemplar::for_trace("b", 0.4));

        let snapshot = histogram.snapshot();
        let kept = snapshot.exemplars[0].as_ref().unwrap();
        assert_eq!(kept.labels[0].1, "b");
        assert!(snapshot.exemplars[1].is_none());
    }
}
