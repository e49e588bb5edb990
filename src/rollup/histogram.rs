//! Fixed-bucket duration histogram rollup.

use crate::point::{HistogramValue, PointValue, RawMetric};
use crate::rollup::{encode_key, synthesize_point, Rollup};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::HashMap;

const NANOS_PER_SECOND: f64 = 1e9;

/// Accumulates request durations into per-key histograms.
///
/// Accumulators live for the process lifetime and are never reset;
/// each emission is a full snapshot, which is what cumulative
/// histogram scrape semantics expect.
pub struct HistogramRollup {
    name: String,
    tags: Vec<String>,
    buckets: Vec<f64>,
    inner: Mutex<HistogramState>,
}

#[derive(Default)]
struct HistogramState {
    accumulators: FxHashMap<String, Accumulator>,
    touched: FxHashSet<String>,
}

struct Accumulator {
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

impl Accumulator {
    fn new(buckets: usize) -> Self {
        Self {
            counts: vec![0; buckets],
            sum: 0.0,
            count: 0,
        }
    }

    fn observe(&mut self, seconds: f64, bounds: &[f64]) {
        if let Some(index) = bounds.iter().position(|bound| seconds <= *bound) {
            self.counts[index] += 1;
        }
        self.sum += seconds;
        self.count += 1;
    }

    fn snapshot(&self, bounds: &[f64]) -> HistogramValue {
        let mut cumulative = 0;
        let buckets = bounds
            .iter()
            .zip(&self.counts)
            .map(|(bound, count)| {
                cumulative += count;
                (*bound, cumulative)
            })
            .collect();
        HistogramValue {
            buckets,
            sum: self.sum,
            count: self.count,
        }
    }
}

impl HistogramRollup {
    /// Create a histogram rollup with the given bucket upper bounds in
    /// seconds. Bounds must be sorted ascending; validation happens at
    /// configuration time.
    pub fn new<S: Into<String>>(name: S, tags: Vec<String>, buckets: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            tags,
            buckets,
            inner: Mutex::new(HistogramState::default()),
        }
    }
}

impl Rollup for HistogramRollup {
    fn record(&self, source_id: &str, tags: &HashMap<String, String>, duration_ns: i64) {
        #[allow(clippy::cast_precision_loss)]
        let seconds = duration_ns as f64 / NANOS_PER_SECOND;
        let key = encode_key(source_id, tags, &self.tags);
        let mut state = self.inner.lock();
        let buckets = self.buckets.len();
        state
            .accumulators
            .entry(key.clone())
            .or_insert_with(|| Accumulator::new(buckets))
            .observe(seconds, &self.buckets);
        state.touched.insert(key);
    }

    fn rollup(&self, timestamp_ms: i64) -> Vec<RawMetric> {
        let mut state = self.inner.lock();
        let touched = std::mem::take(&mut state.touched);
        touched
            .into_iter()
            .filter_map(|key| {
                let snapshot = state.accumulators.get(&key)?.snapshot(&self.buckets);
                synthesize_point(
                    &self.name,
                    timestamp_ms,
                    &key,
                    &self.tags,
                    PointValue::Histogram(snapshot),
                )
            })
            .collect()
    }
}
