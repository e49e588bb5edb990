//! The envelope data model.
//!
//! An envelope is one telemetry event pulled from the platform event
//! stream: a gauge (one or more named measurements), a counter (a
//! monotonic total), or a timer (a start/stop pair for one request).
//! Envelopes carry free-form tags; a handful of tags (`deployment`,
//! `peer_type`, `app_id`) drive filtering and rollup routing.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;

/// Gauge field names that identify a container-resource envelope.
///
/// A gauge envelope whose metric names all fall in this set is classified
/// as a container metric; everything else is a value metric.
pub const CONTAINER_FIELDS: &[&str] = &["cpu", "memory", "disk", "memory_quota", "disk_quota"];

/// One telemetry event from the upstream transport.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Identity of the emitting source (job, application guid, ...).
    pub source_id: String,
    /// Instance within the source, empty when not applicable.
    pub instance_id: String,
    /// Event time in nanoseconds since the epoch.
    pub timestamp: i64,
    /// Free-form tags attached by the platform.
    pub tags: HashMap<String, String>,
    /// The typed payload.
    pub message: EnvelopeMessage,
}

/// The typed payload of an envelope.
#[derive(Debug, Clone)]
pub enum EnvelopeMessage {
    /// Point-in-time measurements, one or more per envelope.
    Gauge(GaugeMessage),
    /// A monotonically increasing count.
    Counter(CounterMessage),
    /// A request timing observation.
    Timer(TimerMessage),
}

/// A set of named gauge measurements.
#[derive(Debug, Clone, Default)]
pub struct GaugeMessage {
    /// Measurements keyed by metric name. Ordered so conversion output
    /// is deterministic.
    pub metrics: BTreeMap<String, GaugeValue>,
}

/// A single gauge measurement.
#[derive(Debug, Clone)]
pub struct GaugeValue {
    /// Unit hint, empty when the source did not set one.
    pub unit: String,
    /// The measured value.
    pub value: f64,
}

/// A monotonic counter observation.
#[derive(Debug, Clone)]
pub struct CounterMessage {
    /// Counter name.
    pub name: String,
    /// Increment since the previous observation.
    pub delta: u64,
    /// Cumulative total.
    pub total: u64,
}

/// A request timing observation.
#[derive(Debug, Clone)]
pub struct TimerMessage {
    /// Timer name; HTTP ingress timers use a well-known name.
    pub name: String,
    /// Start of the timed interval, nanoseconds since the epoch.
    pub start: i64,
    /// End of the timed interval, nanoseconds since the epoch.
    pub stop: i64,
}

impl TimerMessage {
    /// Duration of the timed interval in nanoseconds. Negative intervals
    /// (clock skew between edges) clamp to zero.
    pub fn duration_ns(&self) -> i64 {
        (self.stop - self.start).max(0)
    }
}

impl Envelope {
    /// Classify this envelope into the metric-category vocabulary.
    ///
    /// Gauges split into container metrics (well-known resource fields)
    /// and value metrics (everything else). An empty gauge has no
    /// category and produces no points downstream.
    pub fn category(&self) -> Option<MetricCategory> {
        match &self.message {
            EnvelopeMessage::Counter(_) => Some(MetricCategory::CounterEvent),
            EnvelopeMessage::Timer(_) => Some(MetricCategory::HttpStartStop),
            EnvelopeMessage::Gauge(gauge) => {
                if gauge.metrics.is_empty() {
                    None
                } else if gauge
                    .metrics
                    .keys()
                    .all(|name| CONTAINER_FIELDS.contains(&name.as_str()))
                {
                    Some(MetricCategory::ContainerMetric)
                } else {
                    Some(MetricCategory::ValueMetric)
                }
            },
        }
    }

    /// The deployment tag, when present.
    pub fn deployment(&self) -> Option<&str> {
        self.tags.get("deployment").map(String::as_str)
    }
}

/// The fixed metric-category vocabulary used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetricCategory {
    /// Container resource gauges (cpu, memory, disk, quotas).
    ContainerMetric,
    /// Monotonic counters.
    CounterEvent,
    /// HTTP request timers.
    HttpStartStop,
    /// All other gauges.
    ValueMetric,
}

impl MetricCategory {
    /// All categories, in vocabulary order.
    pub const ALL: [MetricCategory; 4] = [
        MetricCategory::ContainerMetric,
        MetricCategory::CounterEvent,
        MetricCategory::HttpStartStop,
        MetricCategory::ValueMetric,
    ];

    /// The vocabulary name of this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricCategory::ContainerMetric => "container-metric",
            MetricCategory::CounterEvent => "counter-event",
            MetricCategory::HttpStartStop => "http-start-stop",
            MetricCategory::ValueMetric => "value-metric",
        }
    }
}

impl FromStr for MetricCategory {
    type Err = crate::core::SpoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "container-metric" => Ok(MetricCategory::ContainerMetric),
            "counter-event" => Ok(MetricCategory::CounterEvent),
            "http-start-stop" => Ok(MetricCategory::HttpStartStop),
            "value-metric" => Ok(MetricCategory::ValueMetric),
            other => Err(crate::core::SpoutError::UnknownCategory(other.to_string())),
        }
    }
}

impl std::fmt::Display for MetricCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category allow-list controlling which envelope kinds are processed.
///
/// The default filter is unrestricted (everything enabled). Listing any
/// category switches to deny-by-default: only the listed categories pass.
#[derive(Debug, Clone, Default)]
pub struct CategoryFilter {
    enabled: Option<HashSet<MetricCategory>>,
}

impl CategoryFilter {
    /// A filter with every category enabled.
    pub fn all() -> Self {
        Self { enabled: None }
    }

    /// A deny-by-default filter enabling exactly the given categories.
    pub fn only<I: IntoIterator<Item = MetricCategory>>(categories: I) -> Self {
        Self {
            enabled: Some(categories.into_iter().collect()),
        }
    }

    /// Build a filter from vocabulary names; an empty list allows all.
    pub fn from_names(names: &[String]) -> crate::core::Result<Self> {
        if names.is_empty() {
            return Ok(Self::all());
        }
        let categories = names
            .iter()
            .map(|name| name.parse())
            .collect::<crate::core::Result<HashSet<_>>>()?;
        Ok(Self {
            enabled: Some(categories),
        })
    }

    /// Whether the given category passes the filter.
    pub fn allows(&self, category: MetricCategory) -> bool {
        match &self.enabled {
            None => true,
            Some(set) => set.contains(&category),
        }
    }

    /// Whether this filter is the allow-everything default.
    pub fn is_unrestricted(&self) -> bool {
        self.enabled.is_none()
    }
}
