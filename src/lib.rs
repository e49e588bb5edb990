//! Spout - streaming telemetry nozzle with a Prometheus exposition store.
//!
//! Spout ingests a high-volume, unordered stream of telemetry envelopes
//! (gauges, counters, timers) from a platform event stream, converts them
//! into uniquely-identified metric points, rolls timer envelopes up into
//! bounded-cardinality counters/histograms/summaries, and serves the latest
//! value per identity in Prometheus exposition format over HTTP.
//!
//! # Architecture
//!
//! - `stream`: the upstream transport seam (envelope batches in)
//! - `nozzle`: lock-free buffering, filtering, batching, rollup scheduling
//! - `point`: the metric point abstraction and conversion pipeline
//! - `rollup`: interval aggregation of timer envelopes
//! - `store`: expiring concurrent metric store and exposition renderer
//! - `api`: HTTP endpoint serving scrapes
//! - `core`: configuration, errors, and the envelope data model
//!
//! # Example
//!
//! ```no_run
//! use spout::core::Config;
//! use spout::monitoring::InternalMetrics;
//! use spout::nozzle::Nozzle;
//! use spout::store::MetricStore;
//! use std::sync::Arc;
//!
//! # fn connector() -> Arc<dyn spout::stream::StreamConnector> { unimplemented!() }
//! #[tokio::main]
//! async fn main() -> spout::Result<()> {
//!     let config = Config::default();
//!     let metrics = Arc::new(InternalMetrics::new());
//!     let store = Arc::new(MetricStore::new(&config.store, Arc::clone(&metrics))?);
//!     let nozzle = Nozzle::new(connector(), Arc::clone(&store), metrics, config.clone());
//!     tokio::spawn(spout::api::start_server(Arc::clone(&store), config.exposition));
//!     nozzle.run().await
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod api;
pub mod core;
pub mod monitoring;
pub mod nozzle;
pub mod point;
pub mod rollup;
pub mod store;
pub mod stream;

// Re-export core types for convenience
pub use crate::core::{Config, Result, SpoutError};
pub use crate::point::{PointValue, RawMetric};
