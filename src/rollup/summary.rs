//! Streaming-quantile duration summary rollup.

use crate::point::{PointValue, RawMetric, SummaryValue};
use crate::rollup::{encode_key, synthesize_point, Rollup};
use parking_lot::Mutex;
use quantiles::ckms::CKMS;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::HashMap;

const NANOS_PER_SECOND: f64 = 1e9;

/// CKMS error bound: quantile estimates are within 0.1% of exact.
const CKMS_ERROR: f64 = 0.001;

/// Quantiles reported per key.
const QUANTILES: &[f64] = &[0.5, 0.9, 0.99];

/// Accumulates request durations into per-key streaming summaries.
///
/// Like the histogram rollup, accumulators live for the process
/// lifetime; each emission is a full snapshot.
pub struct SummaryRollup {
    name: String,
    tags: Vec<String>,
    inner: Mutex<SummaryState>,
}

#[derive(Default)]
struct SummaryState {
    accumulators: FxHashMap<String, Accumulator>,
    touched: FxHashSet<String>,
}

struct Accumulator {
    quantiles: CKMS<f64>,
    sum: f64,
    count: u64,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            quantiles: CKMS::new(CKMS_ERROR),
            sum: 0.0,
            count: 0,
        }
    }

    fn observe(&mut self, seconds: f64) {
        self.quantiles.insert(seconds);
        self.sum += seconds;
        self.count += 1;
    }

    fn snapshot(&self) -> SummaryValue {
        let quantiles = QUANTILES
            .iter()
            .filter_map(|quantile| {
                self.quantiles
                    .query(*quantile)
                    .map(|(_, value)| (*quantile, value))
            })
            .collect();
        SummaryValue {
            quantiles,
            sum: self.sum,
            count: self.count,
        }
    }
}

impl SummaryRollup {
    /// Create a summary rollup emitting points with the given name,
    /// keyed by the given tag allow-list.
    pub fn new<S: Into<String>>(name: S, tags: Vec<String>) -> Self {
        Self {
            name: name.into(),
            tags,
            inner: Mutex::new(SummaryState::default()),
        }
    }
}

impl Rollup for SummaryRollup {
    fn record(&self, source_id: &str, tags: &HashMap<String, String>, duration_ns: i64) {
        #[allow(clippy::cast_precision_loss)]
        let seconds = duration_ns as f64 / NANOS_PER_SECOND;
        let key = encode_key(source_id, tags, &self.tags);
        let mut state = self.inner.lock();
        state
            .accumulators
            .entry(key.clone())
            .or_insert_with(Accumulator::new)
            .observe(seconds);
        state.touched.insert(key);
    }

    fn rollup(&self, timestamp_ms: i64) -> Vec<RawMetric> {
        let mut state = self.inner.lock();
        let touched = std::mem::take(&mut state.touched);
        touched
            .into_iter()
            .filter_map(|key| {
                let snapshot = state.accumulators.get(&key)?.snapshot();
                synthesize_point(
                    &self.name,
                    timestamp_ms,
                    &key,
                    &self.tags,
                    PointValue::Summary(snapshot),
                )
            })
            .collect()
    }
}
