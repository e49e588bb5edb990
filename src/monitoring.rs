//! Internal self-observability metrics.
//!
//! A fixed set of counters and gauges describing the pipeline itself:
//! envelopes in, drops, per-category receipt, and store health. They
//! live in their own registry, are mutated by the nozzle and store, and
//! are appended to every exposition response after application metrics.

use crate::core::MetricCategory;
use prometheus::{proto, IntCounter, IntGauge, Registry};

/// The pipeline's own operational metrics.
#[derive(Clone)]
pub struct InternalMetrics {
    registry: Registry,
    /// Envelopes read from the upstream stream.
    pub ingress_envelopes: IntCounter,
    /// Envelopes displaced from the ingress ring before being read.
    pub ingress_dropped: IntCounter,
    /// Timer envelopes displaced from the timer ring before being read.
    pub timers_dropped: IntCounter,
    /// Points dropped because the store channel was full.
    pub points_dropped: IntCounter,
    /// Container-resource gauge envelopes processed.
    pub container_metrics: IntCounter,
    /// Counter envelopes processed.
    pub counter_events: IntCounter,
    /// HTTP timer envelopes routed to the rollup path.
    pub http_timers: IntCounter,
    /// Value gauge envelopes processed.
    pub value_metrics: IntCounter,
    /// Unix time of the most recently read envelope.
    pub last_envelope_seconds: IntGauge,
    /// Points physically removed by the sweeper.
    pub points_swept: IntCounter,
    /// Metric families that failed to encode during a scrape.
    pub render_errors: IntCounter,
}

impl Default for InternalMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl InternalMetrics {
    /// Create and register the full metric set.
    pub fn new() -> Self {
        let registry = Registry::new();
        let metrics = Self {
            ingress_envelopes: counter(
                "nozzle_ingress_envelopes_total",
                "Envelopes read from the upstream stream",
            ),
            ingress_dropped: counter(
                "nozzle_ingress_dropped_total",
                "Envelopes displaced from the ingress buffer before being read",
            ),
            timers_dropped: counter(
                "nozzle_timers_dropped_total",
                "Timer envelopes displaced from the timer buffer before being read",
            ),
            points_dropped: counter(
                "nozzle_points_dropped_total",
                "Points dropped because the store channel was full",
            ),
            container_metrics: counter(
                "nozzle_container_metrics_total",
                "Container-resource gauge envelopes processed",
            ),
            counter_events: counter(
                "nozzle_counter_events_total",
                "Counter envelopes processed",
            ),
            http_timers: counter(
                "nozzle_http_timers_total",
                "HTTP timer envelopes routed to the rollup path",
            ),
            value_metrics: counter(
                "nozzle_value_metrics_total",
                "Value gauge envelopes processed",
            ),
            last_envelope_seconds: gauge(
                "nozzle_last_envelope_seconds",
                "Unix time of the most recently read envelope",
            ),
            points_swept: counter(
                "store_points_swept_total",
                "Points physically removed by the sweeper",
            ),
            render_errors: counter(
                "store_render_errors_total",
                "Metric families that failed to encode during a scrape",
            ),
            registry,
        };
        for collector in [
            &metrics.ingress_envelopes,
            &metrics.ingress_dropped,
            &metrics.timers_dropped,
            &metrics.points_dropped,
            &metrics.container_metrics,
            &metrics.counter_events,
            &metrics.http_timers,
            &metrics.value_metrics,
            &metrics.points_swept,
            &metrics.render_errors,
        ] {
            metrics
                .registry
                .register(Box::new(collector.clone()))
                .expect("metric registration");
        }
        metrics
            .registry
            .register(Box::new(metrics.last_envelope_seconds.clone()))
            .expect("metric registration");
        metrics
    }

    /// Bump the received counter for an envelope category.
    pub fn observe_category(&self, category: MetricCategory) {
        match category {
            MetricCategory::ContainerMetric => self.container_metrics.inc(),
            MetricCategory::CounterEvent => self.counter_events.inc(),
            MetricCategory::HttpStartStop => self.http_timers.inc(),
            MetricCategory::ValueMetric => self.value_metrics.inc(),
        }
    }

    /// Gather the internal families for exposition.
    pub fn gather(&self) -> Vec<proto::MetricFamily> {
        self.registry.gather()
    }
}

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::new(name, help).expect("valid counter definition")
}

fn gauge(name: &str, help: &str) -> IntGauge {
    IntGauge::new(name, help).expect("valid gauge definition")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_metrics_gather() {
        let metrics = InternalMetrics::new();
        metrics.ingress_envelopes.inc();
        metrics.observe_category(MetricCategory::ValueMetric);
        metrics.last_envelope_seconds.set(1_700_000_000);

        let families = metrics.gather();
        assert_eq!(families.len(), 11);

        let names: Vec<&str> = families.iter().map(proto::MetricFamily::get_name).collect();
        assert!(names.contains(&"nozzle_ingress_envelopes_total"));
        assert!(names.contains(&"nozzle_value_metrics_total"));
        assert!(names.contains(&"nozzle_last_envelope_seconds"));
    }

    #[test]
    fn test_category_counters() {
        let metrics = InternalMetrics::new();
        metrics.observe_category(MetricCategory::HttpStartStop);
        metrics.observe_category(MetricCategory::HttpStartStop);
        metrics.observe_category(MetricCategory::CounterEvent);

        assert_eq!(metrics.http_timers.get(), 2);
        assert_eq!(metrics.counter_events.get(), 1);
        assert_eq!(metrics.container_metrics.get(), 0);
    }
}
