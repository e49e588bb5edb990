//! Request-count rollup.

use crate::point::{PointValue, RawMetric};
use crate::rollup::{encode_key, synthesize_point, Rollup};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::HashMap;

/// Counts requests per key, emitting cumulative totals.
///
/// Totals survive across intervals so scrapers see a monotone series;
/// only the per-interval touched set resets on emission.
pub struct CounterRollup {
    name: String,
    tags: Vec<String>,
    inner: Mutex<CounterState>,
}

#[derive(Default)]
struct CounterState {
    totals: FxHashMap<String, u64>,
    touched: FxHashSet<String>,
}

impl CounterRollup {
    /// Create a counter rollup emitting points with the given name,
    /// keyed by the given tag allow-list.
    pub fn new<S: Into<String>>(name: S, tags: Vec<String>) -> Self {
        Self {
            name: name.into(),
            tags,
            inner: Mutex::new(CounterState::default()),
        }
    }
}

impl Rollup for CounterRollup {
    fn record(&self, source_id: &str, tags: &HashMap<String, String>, _duration_ns: i64) {
        let key = encode_key(source_id, tags, &self.tags);
        let mut state = self.inner.lock();
        *state.totals.entry(key.clone()).or_insert(0) += 1;
        state.touched.insert(key);
    }

    fn rollup(&self, timestamp_ms: i64) -> Vec<RawMetric> {
        let mut state = self.inner.lock();
        let touched = std::mem::take(&mut state.touched);
        touched
            .into_iter()
            .filter_map(|key| {
                #[allow(clippy::cast_precision_loss)]
                let total = state.totals.get(&key).copied().unwrap_or(0) as f64;
                synthesize_point(&self.name, timestamp_ms, &key, &self.tags, PointValue::Counter(total))
            })
            .collect()
    }
}
