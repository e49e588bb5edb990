//! The conversion pipeline.
//!
//! A [`Converter`] owns an ordered list of in-place point transforms and
//! builds points from envelopes. The default chain normalizes names,
//! sanitizes label sets, and promotes origin-system label aliases; label
//! ordering is structural (the label map is sorted by construction).
//! Order matters: label sanitation must run before identity hashing and
//! name normalization before any name-based matching, so transforms run
//! at conversion time and identities are computed afterwards.

use crate::core::{Envelope, EnvelopeMessage};
use crate::point::labels::{normalize_name, promote_labels, sanitize_labels};
use crate::point::{PointValue, RawMetric};
use std::collections::BTreeMap;

/// An in-place point transform.
pub type Transform = Box<dyn Fn(&mut RawMetric) + Send + Sync>;

/// Legacy container short-names and their exposition replacements.
const CONTAINER_RENAMES: &[(&str, &str, &str)] = &[
    ("cpu", "container_metric_cpu_percentage", "CPU usage of the container, in percent"),
    ("memory", "container_metric_memory_bytes", "Memory in use by the container, in bytes"),
    ("disk", "container_metric_disk_bytes", "Disk in use by the container, in bytes"),
    (
        "memory_quota",
        "container_metric_memory_bytes_quota",
        "Memory quota of the container, in bytes",
    ),
    (
        "disk_quota",
        "container_metric_disk_bytes_quota",
        "Disk quota of the container, in bytes",
    ),
];

/// Ordered, replaceable list of point transforms plus envelope
/// conversion.
pub struct Converter {
    transforms: Vec<Transform>,
}

impl Default for Converter {
    fn default() -> Self {
        Self::new()
    }
}

impl Converter {
    /// The default pipeline: normalize name, sanitize labels, promote
    /// label aliases.
    pub fn new() -> Self {
        Self {
            transforms: vec![
                normalize_name_transform(),
                sanitize_labels_transform(),
                promote_labels_transform(),
            ],
        }
    }

    /// A pipeline with no transforms. Points pass through untouched.
    pub fn empty() -> Self {
        Self {
            transforms: Vec::new(),
        }
    }

    /// A pipeline with exactly the given transforms, in order.
    pub fn with_transforms(transforms: Vec<Transform>) -> Self {
        Self { transforms }
    }

    /// Add a transform that runs before the existing chain.
    pub fn prepend(mut self, transform: Transform) -> Self {
        self.transforms.insert(0, transform);
        self
    }

    /// Add a transform that runs after the existing chain.
    pub fn append(mut self, transform: Transform) -> Self {
        self.transforms.push(transform);
        self
    }

    /// Run every transform over a point, in order.
    pub fn apply(&self, point: &mut RawMetric) {
        for transform in &self.transforms {
            transform(point);
        }
    }

    /// Build points from an envelope and run them through the pipeline.
    ///
    /// Gauges produce one point per measurement, counters one point
    /// carrying the cumulative total. Timers produce nothing here; they
    /// reach the store only through the rollup path.
    pub fn convert(&self, envelope: &Envelope) -> Vec<RawMetric> {
        let timestamp_ms = envelope.timestamp / 1_000_000;
        let origin = envelope
            .tags
            .get("origin")
            .cloned()
            .unwrap_or_else(|| envelope.source_id.clone());

        let mut points = match &envelope.message {
            EnvelopeMessage::Gauge(gauge) => gauge
                .metrics
                .iter()
                .map(|(name, measurement)| {
                    let mut labels = base_labels(envelope);
                    if !measurement.unit.is_empty() {
                        labels.insert("unit".to_string(), measurement.unit.clone());
                    }
                    RawMetric::new(name.clone(), origin.clone(), PointValue::Gauge(measurement.value))
                        .with_labels(labels)
                        .with_timestamp(timestamp_ms)
                })
                .collect(),
            EnvelopeMessage::Counter(counter) => {
                #[allow(clippy::cast_precision_loss)]
                let total = counter.total as f64;
                vec![RawMetric::new(counter.name.clone(), origin, PointValue::Counter(total))
                    .with_labels(base_labels(envelope))
                    .with_timestamp(timestamp_ms)]
            },
            EnvelopeMessage::Timer(_) => Vec::new(),
        };

        for point in &mut points {
            self.apply(point);
        }
        points
    }
}

fn base_labels(envelope: &Envelope) -> BTreeMap<String, String> {
    let mut labels: BTreeMap<String, String> = envelope
        .tags
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    labels.insert("source_id".to_string(), envelope.source_id.clone());
    if !envelope.instance_id.is_empty() {
        labels.insert("instance_id".to_string(), envelope.instance_id.clone());
    }
    labels
}

/// Normalize the metric name for exposition.
pub fn normalize_name_transform() -> Transform {
    Box::new(|point| {
        let normalized = normalize_name(point.name());
        point.set_name(normalized);
    })
}

/// Strip reserved and unexpressible label names.
pub fn sanitize_labels_transform() -> Transform {
    Box::new(|point| sanitize_labels(point.labels_mut()))
}

/// Promote origin-system label aliases to canonical keys.
pub fn promote_labels_transform() -> Transform {
    Box::new(|point| promote_labels(point.labels_mut()))
}

/// Prefix every metric name with a namespace.
pub fn namespace_transform<S: Into<String>>(namespace: S) -> Transform {
    let namespace = namespace.into();
    Box::new(move |point| {
        point.set_name(format!("{}_{}", namespace, point.name()));
    })
}

/// Suffix counter names with `_total` when missing.
pub fn counter_total_suffix_transform() -> Transform {
    Box::new(|point| {
        if matches!(point.value(), PointValue::Counter(_)) && !point.name().ends_with("_total") {
            point.set_name(format!("{}_total", point.name()));
        }
    })
}

/// Retro-compatible renaming for consumers of the legacy exposition
/// names: container short-names map onto fixed `container_metric_*`
/// names, and every other point is reclassified by its value kind.
pub fn retro_naming_transform() -> Transform {
    Box::new(|point| {
        if let Some((_, renamed, help)) = CONTAINER_RENAMES
            .iter()
            .find(|(short, _, _)| *short == point.name())
        {
            point.set_name(*renamed);
            point.set_help(*help);
            return;
        }
        let origin = normalize_name(point.origin());
        match point.value() {
            PointValue::Counter(_) => {
                let renamed = format!("counter_event_{}_{}_total", origin, point.name());
                point.set_name(renamed);
            },
            PointValue::Gauge(_) => {
                let renamed = format!("value_metric_{}_{}", origin, point.name());
                point.set_name(renamed);
            },
            _ => {},
        }
    })
}
