//! Interval rollup of timer envelopes.
//!
//! High-cardinality HTTP timers are folded into bounded-cardinality
//! aggregates keyed by source id plus an explicit ordered tag allow-list;
//! tags outside the list are invisible to the rollup. Aggregators share
//! one key codec and one point-synthesis path.

pub mod counter;
pub mod histogram;
pub mod summary;

pub use counter::CounterRollup;
pub use histogram::HistogramRollup;
pub use summary::SummaryRollup;

use crate::point::{PointValue, RawMetric};
use std::collections::{BTreeMap, HashMap};

/// Separator between the segments of an encoded rollup key.
const KEY_SEPARATOR: &str = "%%";

/// Origin sentinel for rolled-up points owned by an application.
pub const APPLICATION_ORIGIN: &str = "application";

/// Origin for rolled-up points that carry no application identity.
pub const PLATFORM_ORIGIN: &str = "platform";

/// An interval aggregator over timer observations.
pub trait Rollup: Send + Sync {
    /// Fold one timer observation into the aggregate for its key.
    fn record(&self, source_id: &str, tags: &HashMap<String, String>, duration_ns: i64);

    /// Emit one point per key touched since the previous call, stamped
    /// with the given timestamp.
    fn rollup(&self, timestamp_ms: i64) -> Vec<RawMetric>;
}

/// A rollup that records nothing and emits nothing.
///
/// Stands in for aggregators that are not configured, so the emission
/// schedule is uniform regardless of configuration.
pub struct NullRollup;

impl Rollup for NullRollup {
    fn record(&self, _source_id: &str, _tags: &HashMap<String, String>, _duration_ns: i64) {}

    fn rollup(&self, _timestamp_ms: i64) -> Vec<RawMetric> {
        Vec::new()
    }
}

/// Encode a rollup key: the source id followed by the allow-listed tag
/// values, in allow-list order. Missing tags encode as empty segments.
pub(crate) fn encode_key(
    source_id: &str,
    tags: &HashMap<String, String>,
    allow_list: &[String],
) -> String {
    let mut segments = Vec::with_capacity(1 + allow_list.len());
    segments.push(source_id);
    for tag in allow_list {
        segments.push(tags.get(tag).map_or("", String::as_str));
    }
    segments.join(KEY_SEPARATOR)
}

/// Decode a rollup key back into a source id and label set. Returns
/// `None` when the segment count does not match the allow-list; callers
/// skip such keys.
pub(crate) fn decode_key(
    key: &str,
    allow_list: &[String],
) -> Option<(String, BTreeMap<String, String>)> {
    let segments: Vec<&str> = key.split(KEY_SEPARATOR).collect();
    if segments.len() != allow_list.len() + 1 {
        return None;
    }
    let source_id = segments[0].to_string();
    let labels = allow_list
        .iter()
        .zip(&segments[1..])
        .filter(|(_, value)| !value.is_empty())
        .map(|(tag, value)| (tag.clone(), (*value).to_string()))
        .collect();
    Some((source_id, labels))
}

/// Synthesize a rolled-up point from a decoded key.
///
/// Keys that fail to decode are logged and skipped. Keys carrying an
/// application identity get the application-ownership origin.
pub(crate) fn synthesize_point(
    name: &str,
    timestamp_ms: i64,
    key: &str,
    allow_list: &[String],
    value: PointValue,
) -> Option<RawMetric> {
    let Some((source_id, mut labels)) = decode_key(key, allow_list) else {
        tracing::warn!(key, "skipping rollup key with unexpected segment count");
        return None;
    };
    let origin = if labels.contains_key("app_id") {
        labels.insert("origin".to_string(), APPLICATION_ORIGIN.to_string());
        APPLICATION_ORIGIN
    } else {
        PLATFORM_ORIGIN
    };
    labels.insert("source_id".to_string(), source_id);
    Some(
        RawMetric::new(name, origin, value)
            .with_labels(labels)
            .with_timestamp(timestamp_ms),
    )
}
