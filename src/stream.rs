//! Upstream transport seam.
//!
//! The nozzle never talks to the platform event stream directly; it pulls
//! envelope batches through the traits here. The embedding process wires
//! in a real connector (with its own authentication and reconnect
//! policy); tests wire in scripted streams.

use crate::core::{CategoryFilter, Envelope, MetricCategory, Result};

/// Envelope kinds a connector can be asked to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeSelector {
    /// Gauge envelopes.
    Gauge,
    /// Counter envelopes.
    Counter,
    /// Timer envelopes.
    Timer,
}

/// Request describing the stream the nozzle wants to read.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    /// Shard identity; readers sharing a shard id split the stream.
    pub shard_id: String,
    /// Prefer platform tags over legacy ones where the transport offers both.
    pub use_preferred_tags: bool,
    /// Envelope kinds to deliver. Empty requests everything.
    pub selectors: Vec<EnvelopeSelector>,
}

impl StreamRequest {
    /// Build a request from the configured category filter.
    ///
    /// An unrestricted filter omits selectors entirely (the transport
    /// delivers everything); an opt-in filter requests exactly the
    /// envelope kinds that can still produce points.
    pub fn new(shard_id: String, use_preferred_tags: bool, filter: &CategoryFilter) -> Self {
        let selectors = if filter.is_unrestricted() {
            Vec::new()
        } else {
            let mut selectors = Vec::new();
            if filter.allows(MetricCategory::ContainerMetric)
                || filter.allows(MetricCategory::ValueMetric)
            {
                selectors.push(EnvelopeSelector::Gauge);
            }
            if filter.allows(MetricCategory::CounterEvent) {
                selectors.push(EnvelopeSelector::Counter);
            }
            if filter.allows(MetricCategory::HttpStartStop) {
                selectors.push(EnvelopeSelector::Timer);
            }
            selectors
        };
        Self {
            shard_id,
            use_preferred_tags,
            selectors,
        }
    }
}

/// A live envelope stream.
///
/// `next_batch` blocks until the transport has envelopes; the reader task
/// is suspended on this call and nowhere else.
#[async_trait::async_trait]
pub trait EnvelopeStream: Send {
    /// Pull the next batch of envelopes.
    async fn next_batch(&mut self) -> Result<Vec<Envelope>>;
}

/// Factory for envelope streams.
#[async_trait::async_trait]
pub trait StreamConnector: Send + Sync {
    /// Open a stream matching the request.
    async fn connect(&self, request: StreamRequest) -> Result<Box<dyn EnvelopeStream>>;
}
