//! The metric point abstraction.
//!
//! A [`RawMetric`] is one named, labeled, typed observation flowing from
//! the ingestion pipeline into the store. Identity is a stable hash of
//! the label set (excluding the reserved name label): two points with the
//! same labels collide by design, and the store keeps only the latest.

pub mod convert;
pub mod labels;

pub use convert::Converter;

use once_cell::sync::OnceCell;
use prometheus::proto;
use rustc_hash::FxHasher;
use std::collections::BTreeMap;
use std::hash::Hasher;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Reserved label carrying the metric name in exposition label sets.
/// Never part of a point's identity.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// The typed value of a point.
#[derive(Debug, Clone, PartialEq)]
pub enum PointValue {
    /// Monotonically increasing total.
    Counter(f64),
    /// Point-in-time measurement.
    Gauge(f64),
    /// Bucketed distribution snapshot.
    Histogram(HistogramValue),
    /// Quantile summary snapshot.
    Summary(SummaryValue),
}

/// A histogram snapshot: cumulative counts per finite bucket bound.
/// The implicit `+Inf` bucket is the sample count.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistogramValue {
    /// `(upper_bound, cumulative_count)` pairs, sorted by bound.
    pub buckets: Vec<(f64, u64)>,
    /// Sum of all observed values.
    pub sum: f64,
    /// Count of all observed values.
    pub count: u64,
}

/// A summary snapshot: streaming quantile estimates.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SummaryValue {
    /// `(quantile, value)` pairs.
    pub quantiles: Vec<(f64, f64)>,
    /// Sum of all observed values.
    pub sum: f64,
    /// Count of all observed values.
    pub count: u64,
}

impl PointValue {
    /// The exposition family type for this variant.
    pub fn family_type(&self) -> proto::MetricType {
        match self {
            PointValue::Counter(_) => proto::MetricType::COUNTER,
            PointValue::Gauge(_) => proto::MetricType::GAUGE,
            PointValue::Histogram(_) => proto::MetricType::HISTOGRAM,
            PointValue::Summary(_) => proto::MetricType::SUMMARY,
        }
    }

    /// Serialize this value into an exposition metric record.
    pub fn write_into(&self, metric: &mut proto::Metric) {
        match self {
            PointValue::Counter(value) => {
                let mut counter = proto::Counter::default();
                counter.set_value(*value);
                metric.set_counter(counter);
            },
            PointValue::Gauge(value) => {
                let mut gauge = proto::Gauge::default();
                gauge.set_value(*value);
                metric.set_gauge(gauge);
            },
            PointValue::Histogram(hist) => {
                let mut out = proto::Histogram::default();
                out.set_sample_count(hist.count);
                out.set_sample_sum(hist.sum);
                for (bound, cumulative) in &hist.buckets {
                    let mut bucket = proto::Bucket::default();
                    bucket.set_upper_bound(*bound);
                    bucket.set_cumulative_count(*cumulative);
                    out.mut_bucket().push(bucket);
                }
                metric.set_histogram(out);
            },
            PointValue::Summary(summary) => {
                let mut out = proto::Summary::default();
                out.set_sample_count(summary.count);
                out.set_sample_sum(summary.sum);
                for (quantile, value) in &summary.quantiles {
                    let mut entry = proto::Quantile::default();
                    entry.set_quantile(*quantile);
                    entry.set_value(*value);
                    out.mut_quantile().push(entry);
                }
                metric.set_summary(out);
            },
        }
    }
}

/// One named, labeled, typed metric observation.
///
/// Mutable through the conversion pipeline; identity is computed lazily
/// the first time the store keys on it, after all transforms have run.
#[derive(Debug, Clone)]
pub struct RawMetric {
    name: String,
    origin: String,
    labels: BTreeMap<String, String>,
    value: PointValue,
    timestamp_ms: Option<i64>,
    help: Option<String>,
    id: OnceCell<u64>,
    expire_at: Option<Instant>,
    // Shared across clones so snapshots observe sweep state.
    swept: Arc<AtomicBool>,
}

impl RawMetric {
    /// Create a point with no labels or timestamp.
    pub fn new<N: Into<String>, O: Into<String>>(name: N, origin: O, value: PointValue) -> Self {
        Self {
            name: name.into(),
            origin: origin.into(),
            labels: BTreeMap::new(),
            value,
            timestamp_ms: None,
            help: None,
            id: OnceCell::new(),
            expire_at: None,
            swept: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attach a label set.
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    /// Attach an observation timestamp in milliseconds.
    pub fn with_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }

    /// Attach exposition help text.
    pub fn with_help<S: Into<String>>(mut self, help: S) -> Self {
        self.help = Some(help.into());
        self
    }

    /// The metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the metric.
    pub fn set_name<S: Into<String>>(&mut self, name: S) {
        self.name = name.into();
    }

    /// The emitting subsystem.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Replace the origin.
    pub fn set_origin<S: Into<String>>(&mut self, origin: S) {
        self.origin = origin.into();
    }

    /// The label set, lexicographically ordered by key.
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Mutable access to the label set for pipeline transforms.
    pub fn labels_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.labels
    }

    /// The typed value.
    pub fn value(&self) -> &PointValue {
        &self.value
    }

    /// Replace the value.
    pub fn set_value(&mut self, value: PointValue) {
        self.value = value;
    }

    /// Observation timestamp in milliseconds, when known.
    pub fn timestamp_ms(&self) -> Option<i64> {
        self.timestamp_ms
    }

    /// Exposition help text, when set.
    pub fn help(&self) -> Option<&str> {
        self.help.as_deref()
    }

    /// Set exposition help text.
    pub fn set_help<S: Into<String>>(&mut self, help: S) {
        self.help = Some(help.into());
    }

    /// Stable identity: a hash over every label pair except the reserved
    /// name label. Computed once, after the pipeline has finished
    /// mutating the point.
    pub fn id(&self) -> u64 {
        *self.id.get_or_init(|| {
            let mut hasher = FxHasher::default();
            for (key, value) in &self.labels {
                if key == METRIC_NAME_LABEL {
                    continue;
                }
                hasher.write(key.as_bytes());
                hasher.write_u8(0xff);
                hasher.write(value.as_bytes());
                hasher.write_u8(0xfe);
            }
            hasher.finish()
        })
    }

    /// Rough wire-size estimate used for batching heuristics only:
    /// 8 bytes of value, 8 for the timestamp when present, plus the
    /// label bytes.
    pub fn estimate_size(&self) -> usize {
        let mut size = 8;
        if self.timestamp_ms.is_some() {
            size += 8;
        }
        size + self
            .labels
            .iter()
            .map(|(key, value)| key.len() + value.len())
            .sum::<usize>()
    }

    /// Stamp the expiry instant. Called by the store on every insert.
    pub fn set_expiry(&mut self, expire_at: Instant) {
        self.expire_at = Some(expire_at);
    }

    /// The expiry instant, `None` meaning never.
    pub fn expires_at(&self) -> Option<Instant> {
        self.expire_at
    }

    /// Whether this point has expired. Monotonic: once swept, a point
    /// stays swept even if the clock moves.
    pub fn is_swept(&self) -> bool {
        if self.swept.load(Ordering::Acquire) {
            return true;
        }
        match self.expire_at {
            Some(at) if at <= Instant::now() => {
                self.swept.store(true, Ordering::Release);
                true
            },
            _ => false,
        }
    }

    /// Force the swept state.
    pub fn mark_swept(&self) {
        self.swept.store(true, Ordering::Release);
    }

    /// The exposition family type of this point.
    pub fn family_type(&self) -> proto::MetricType {
        self.value.family_type()
    }

    /// Serialize this point into an exposition metric record: labels
    /// (minus the reserved name label), value, and timestamp.
    pub fn fill_metric(&self, metric: &mut proto::Metric) {
        for (key, value) in &self.labels {
            if key == METRIC_NAME_LABEL {
                continue;
            }
            let mut pair = proto::LabelPair::default();
            pair.set_name(key.clone());
            pair.set_value(value.clone());
            metric.mut_label().push(pair);
        }
        self.value.write_into(metric);
        if let Some(timestamp_ms) = self.timestamp_ms {
            metric.set_timestamp_ms(timestamp_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn test_identity_ignores_name_label() {
        let shared = labels(&[("source_id", "s1"), ("deployment", "west")]);

        let mut with_name = shared.clone();
        with_name.insert(METRIC_NAME_LABEL.to_string(), "memory".to_string());

        let p1 = RawMetric::new("memory", "rep", PointValue::Gauge(10.0)).with_labels(shared);
        let p2 = RawMetric::new("cpu", "rep", PointValue::Gauge(5.0)).with_labels(with_name);
        assert_eq!(p1.id(), p2.id());
    }

    #[test]
    fn test_identity_sensitive_to_label_values() {
        let p1 = RawMetric::new("memory", "rep", PointValue::Gauge(10.0))
            .with_labels(labels(&[("source_id", "s1")]));
        let p2 = RawMetric::new("memory", "rep", PointValue::Gauge(10.0))
            .with_labels(labels(&[("source_id", "s2")]));
        assert_ne!(p1.id(), p2.id());
    }

    #[test]
    fn test_size_estimate() {
        let point = RawMetric::new("memory", "rep", PointValue::Gauge(10.0))
            .with_labels(labels(&[("ab", "cdef")]));
        // 8 value bytes + 2 + 4 label bytes, no timestamp.
        assert_eq!(point.estimate_size(), 14);

        let point = point.with_timestamp(1_000);
        assert_eq!(point.estimate_size(), 22);
    }

    #[test]
    fn test_sweep_is_monotonic() {
        let mut point = RawMetric::new("memory", "rep", PointValue::Gauge(10.0));
        assert!(!point.is_swept());

        point.set_expiry(Instant::now() - Duration::from_millis(1));
        assert!(point.is_swept());

        // Re-stamping a future expiry does not resurrect a swept point.
        point.set_expiry(Instant::now() + Duration::from_secs(60));
        assert!(point.is_swept());
    }

    #[test]
    fn test_clones_share_sweep_state() {
        let mut point = RawMetric::new("memory", "rep", PointValue::Gauge(10.0));
        point.set_expiry(Instant::now() - Duration::from_millis(1));
        let snapshot = point.clone();
        assert!(point.is_swept());
        assert!(snapshot.is_swept());
    }

    #[test]
    fn test_counter_serialization() {
        let point = RawMetric::new("requests", "router", PointValue::Counter(42.0))
            .with_labels(labels(&[("source_id", "s1")]))
            .with_timestamp(1_234);

        let mut metric = proto::Metric::default();
        point.fill_metric(&mut metric);
        assert_eq!(metric.get_counter().get_value(), 42.0);
        assert_eq!(metric.get_timestamp_ms(), 1_234);
        assert_eq!(metric.get_label().len(), 1);
        assert_eq!(metric.get_label()[0].get_name(), "source_id");
    }

    #[test]
    fn test_histogram_serialization() {
        let hist = HistogramValue {
            buckets: vec![(0.1, 1), (1.0, 3)],
            sum: 1.7,
            count: 3,
        };
        let mut metric = proto::Metric::default();
        PointValue::Histogram(hist).write_into(&mut metric);

        let out = metric.get_histogram();
        assert_eq!(out.get_sample_count(), 3);
        assert!((out.get_sample_sum() - 1.7).abs() < f64::EPSILON);
        assert_eq!(out.get_bucket().len(), 2);
        assert_eq!(out.get_bucket()[1].get_cumulative_count(), 3);
    }

    #[test]
    fn test_summary_serialization() {
        let summary = SummaryValue {
            quantiles: vec![(0.5, 2.0), (0.99, 8.0)],
            sum: 17.0,
            count: 3,
        };
        let mut metric = proto::Metric::default();
        PointValue::Summary(summary).write_into(&mut metric);

        let out = metric.get_summary();
        assert_eq!(out.get_sample_count(), 3);
        assert_eq!(out.get_quantile().len(), 2);
        assert_eq!(out.get_quantile()[0].get_quantile(), 0.5);
    }
}
