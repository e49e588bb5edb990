//! The ingestion orchestrator.
//!
//! `Nozzle::run` drives four concurrent activities: an envelope reader
//! feeding the ingress ring, a point batcher (the ring's only consumer),
//! a timer recorder feeding the rollup aggregators, and a rollup ticker
//! emitting aggregates on a fixed interval. Converted points flow
//! through a bounded channel into the store's insert workers.
//!
//! Backpressure never blocks the ingestion path: full rings displace
//! their oldest item, and a full point channel drops the whole batch.
//! Every loop observes a shared shutdown flag, so `shutdown()` winds
//! the pipeline down cleanly.

pub mod ring;

pub use ring::OverwriteRing;

use crate::core::{
    CategoryFilter, Config, Envelope, EnvelopeMessage, MetricCategory, Result, RollupKind,
    TimerMessage,
};
use crate::monitoring::InternalMetrics;
use crate::point::{Converter, RawMetric};
use crate::rollup::{CounterRollup, HistogramRollup, NullRollup, Rollup, SummaryRollup};
use crate::store::MetricStore;
use crate::stream::{StreamConnector, StreamRequest};
use crossbeam_channel::{Sender, TrySendError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;

/// Only server-side timers are rolled up; the client-side timer for the
/// same request would double count it.
const SERVER_PEER_TYPE: &str = "server";

/// Tag that marks a timer as explicitly attributed to an application.
const APP_TAG: &str = "app_id";

/// Sleep applied by ring consumers when a poll finds nothing.
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

static GUID: Lazy<Regex> = Lazy::new(|| {
    Regex::new("^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("valid guid pattern")
});

/// The ingestion pipeline.
pub struct Nozzle {
    connector: Arc<dyn StreamConnector>,
    store: Arc<MetricStore>,
    metrics: Arc<InternalMetrics>,
    converter: Arc<Converter>,
    config: Config,
    ingress: Arc<OverwriteRing<Envelope>>,
    timers: Arc<OverwriteRing<Envelope>>,
    rollups: [Arc<dyn Rollup>; 3],
    shutdown: watch::Sender<bool>,
}

impl Nozzle {
    /// Wire a nozzle to its collaborators. Rollup aggregators are built
    /// from the configuration; kinds not listed run as no-ops so the
    /// emission schedule is uniform.
    pub fn new(
        connector: Arc<dyn StreamConnector>,
        store: Arc<MetricStore>,
        metrics: Arc<InternalMetrics>,
        config: Config,
    ) -> Self {
        let ingress = {
            let dropped = metrics.ingress_dropped.clone();
            Arc::new(OverwriteRing::with_alert(config.nozzle.ingress_capacity, move |total| {
                dropped.inc();
                if total == 1 || total % 10_000 == 0 {
                    tracing::warn!(total, "ingress buffer full, dropping oldest envelopes");
                }
            }))
        };
        let timers = {
            let dropped = metrics.timers_dropped.clone();
            Arc::new(OverwriteRing::with_alert(config.nozzle.timer_capacity, move |total| {
                dropped.inc();
                if total == 1 || total % 10_000 == 0 {
                    tracing::warn!(total, "timer buffer full, dropping oldest envelopes");
                }
            }))
        };

        let rollup_tags = config.rollup.tags.clone();
        let active = &config.rollup.metrics;
        let counter: Arc<dyn Rollup> = if active.contains(&RollupKind::Counter) {
            Arc::new(CounterRollup::new("http_total", rollup_tags.clone()))
        } else {
            Arc::new(NullRollup)
        };
        let histogram: Arc<dyn Rollup> = if active.contains(&RollupKind::Histogram) {
            Arc::new(HistogramRollup::new(
                "http_duration_seconds",
                rollup_tags.clone(),
                config.rollup.buckets.clone(),
            ))
        } else {
            Arc::new(NullRollup)
        };
        let summary: Arc<dyn Rollup> = if active.contains(&RollupKind::Summary) {
            Arc::new(SummaryRollup::new("http_duration_seconds_summary", rollup_tags))
        } else {
            Arc::new(NullRollup)
        };

        let (shutdown, _) = watch::channel(false);
        Self {
            connector,
            store,
            metrics,
            converter: Arc::new(Converter::new()),
            config,
            ingress,
            timers,
            rollups: [counter, histogram, summary],
            shutdown,
        }
    }

    /// Replace the conversion pipeline.
    pub fn with_converter(mut self, converter: Converter) -> Self {
        self.converter = Arc::new(converter);
        self
    }

    /// Flip the shutdown flag. Every background loop drains and exits.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Run the pipeline until `shutdown()` is invoked or the upstream
    /// stream fails. Stream failures surface to the caller; retry and
    /// backoff belong to the connector.
    pub async fn run(&self) -> Result<()> {
        let filter = CategoryFilter::from_names(&self.config.nozzle.categories)?;
        let request = StreamRequest::new(
            self.config.nozzle.shard_id.clone(),
            self.config.nozzle.use_preferred_tags,
            &filter,
        );
        tracing::info!(shard_id = %request.shard_id, "connecting to envelope stream");
        let mut stream = self.connector.connect(request).await?;

        let (sender, receiver) = crossbeam_channel::bounded(self.config.nozzle.channel_capacity);
        let insert_workers = Arc::clone(&self.store)
            .spawn_insert_workers(self.config.nozzle.insert_workers, receiver);
        let sweeper = Arc::clone(&self.store).start_sweeper(self.shutdown.subscribe());

        let batcher = tokio::spawn(
            BatcherTask {
                ingress: Arc::clone(&self.ingress),
                timers: Arc::clone(&self.timers),
                converter: Arc::clone(&self.converter),
                metrics: Arc::clone(&self.metrics),
                sender: sender.clone(),
                deployments: self.config.nozzle.deployments.clone(),
                filter,
                http_timer_name: self.config.nozzle.http_timer_name.clone(),
                flush_interval: self.config.nozzle.flush_interval,
                max_batch_bytes: self.config.nozzle.max_batch_bytes,
                shutdown: self.shutdown.subscribe(),
            }
            .run(),
        );
        let recorder = tokio::spawn(
            RecorderTask {
                timers: Arc::clone(&self.timers),
                rollups: self.rollups.clone(),
                shutdown: self.shutdown.subscribe(),
            }
            .run(),
        );
        let ticker = tokio::spawn(
            TickerTask {
                rollups: self.rollups.clone(),
                metrics: Arc::clone(&self.metrics),
                sender,
                interval: self.config.rollup.interval,
                max_batch_bytes: self.config.nozzle.max_batch_bytes,
                shutdown: self.shutdown.subscribe(),
            }
            .run(),
        );

        // Envelope reader: the only suspension point is the transport.
        let mut shutdown = self.shutdown.subscribe();
        let result = loop {
            if *shutdown.borrow() {
                break Ok(());
            }
            tokio::select! {
                _ = shutdown.changed() => {},
                batch = stream.next_batch() => match batch {
                    Ok(envelopes) => {
                        for envelope in envelopes {
                            self.metrics.ingress_envelopes.inc();
                            self.metrics
                                .last_envelope_seconds
                                .set(envelope.timestamp / 1_000_000_000);
                            self.ingress.push(envelope);
                        }
                    },
                    Err(error) => {
                        tracing::error!(%error, "envelope stream failed");
                        break Err(error);
                    },
                },
            }
        };

        // Wind everything down: flip the flag, wait for the loops, then
        // join the insert workers once every channel sender is gone.
        self.shutdown.send_replace(true);
        let _ = tokio::join!(batcher, recorder, ticker, sweeper);
        tokio::task::spawn_blocking(move || {
            for worker in insert_workers {
                let _ = worker.join();
            }
        })
        .await?;
        tracing::info!("nozzle stopped");
        result
    }
}

/// Whether a timer envelope is eligible for the rollup path.
///
/// Eligible timers carry the well-known HTTP ingress name and a server
/// peer type. A timer sourced from a bare application guid without an
/// explicit application tag is excluded: the source id already is the
/// application identity and the rolled-up point would be attributed
/// twice.
pub(crate) fn eligible_for_rollup(
    envelope: &Envelope,
    timer: &TimerMessage,
    http_timer_name: &str,
) -> bool {
    if timer.name != http_timer_name {
        return false;
    }
    let server_side = envelope
        .tags
        .get("peer_type")
        .is_some_and(|peer| peer.eq_ignore_ascii_case(SERVER_PEER_TYPE));
    if !server_side {
        return false;
    }
    if GUID.is_match(&envelope.source_id) && !envelope.tags.contains_key(APP_TAG) {
        return false;
    }
    true
}

/// Truncate a wall-clock time to the start of its rollup interval.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn truncate_timestamp(now_ms: i64, interval: Duration) -> i64 {
    let interval_ms = interval.as_millis().max(1) as i64;
    (now_ms / interval_ms) * interval_ms
}

fn unix_now_ms() -> i64 {
    #[allow(clippy::cast_possible_truncation)]
    {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }
}

/// Non-blocking handoff to the store channel: a full channel drops the
/// whole batch and counts it, never retries.
fn offer_batch(sender: &Sender<Vec<RawMetric>>, metrics: &InternalMetrics, batch: Vec<RawMetric>) {
    match sender.try_send(batch) {
        Ok(()) => {},
        Err(TrySendError::Full(dropped)) => {
            metrics.points_dropped.inc_by(dropped.len() as u64);
            tracing::warn!(count = dropped.len(), "store channel full, dropping batch");
        },
        Err(TrySendError::Disconnected(_)) => {},
    }
}

/// Sole consumer of the ingress ring: filters, routes timers, converts,
/// and batches.
struct BatcherTask {
    ingress: Arc<OverwriteRing<Envelope>>,
    timers: Arc<OverwriteRing<Envelope>>,
    converter: Arc<Converter>,
    metrics: Arc<InternalMetrics>,
    sender: Sender<Vec<RawMetric>>,
    deployments: Vec<String>,
    filter: CategoryFilter,
    http_timer_name: String,
    flush_interval: Duration,
    max_batch_bytes: usize,
    shutdown: watch::Receiver<bool>,
}

impl BatcherTask {
    async fn run(self) {
        let mut batch = Vec::new();
        let mut batch_bytes = 0usize;
        let mut last_flush = Instant::now();

        loop {
            let shutting_down = *self.shutdown.borrow();
            let mut worked = false;
            while let Some(envelope) = self.ingress.pop() {
                worked = true;
                self.process(envelope, &mut batch, &mut batch_bytes);
                if batch_bytes >= self.max_batch_bytes {
                    self.flush(&mut batch, &mut batch_bytes);
                    last_flush = Instant::now();
                }
            }
            if !batch.is_empty() && last_flush.elapsed() >= self.flush_interval {
                self.flush(&mut batch, &mut batch_bytes);
                last_flush = Instant::now();
            }
            if shutting_down {
                self.flush(&mut batch, &mut batch_bytes);
                return;
            }
            if worked {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(IDLE_BACKOFF).await;
            }
        }
    }

    fn process(&self, envelope: Envelope, batch: &mut Vec<RawMetric>, batch_bytes: &mut usize) {
        if !self.deployments.is_empty() {
            let allowed = envelope
                .deployment()
                .is_some_and(|deployment| self.deployments.iter().any(|d| d == deployment));
            if !allowed {
                return;
            }
        }

        if let EnvelopeMessage::Timer(timer) = &envelope.message {
            if !self.filter.allows(MetricCategory::HttpStartStop) {
                return;
            }
            if eligible_for_rollup(&envelope, timer, &self.http_timer_name) {
                self.metrics.observe_category(MetricCategory::HttpStartStop);
                self.timers.push(envelope);
            }
            return;
        }

        // A malformed envelope has no category and produces no points.
        let Some(category) = envelope.category() else {
            return;
        };
        if !self.filter.allows(category) {
            return;
        }
        self.metrics.observe_category(category);

        for point in self.converter.convert(&envelope) {
            *batch_bytes += point.estimate_size();
            batch.push(point);
        }
    }

    fn flush(&self, batch: &mut Vec<RawMetric>, batch_bytes: &mut usize) {
        *batch_bytes = 0;
        if batch.is_empty() {
            return;
        }
        offer_batch(&self.sender, &self.metrics, std::mem::take(batch));
    }
}

/// Sole consumer of the timer ring: folds durations into the rollups.
struct RecorderTask {
    timers: Arc<OverwriteRing<Envelope>>,
    rollups: [Arc<dyn Rollup>; 3],
    shutdown: watch::Receiver<bool>,
}

impl RecorderTask {
    async fn run(self) {
        loop {
            let shutting_down = *self.shutdown.borrow();
            let mut worked = false;
            while let Some(envelope) = self.timers.pop() {
                worked = true;
                if let EnvelopeMessage::Timer(timer) = &envelope.message {
                    let duration_ns = timer.duration_ns();
                    for rollup in &self.rollups {
                        rollup.record(&envelope.source_id, &envelope.tags, duration_ns);
                    }
                }
            }
            if shutting_down {
                return;
            }
            if worked {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(IDLE_BACKOFF).await;
            }
        }
    }
}

/// Emits every rollup's accumulated points once per interval, chunked
/// through the same backpressure path as ordinary points.
struct TickerTask {
    rollups: [Arc<dyn Rollup>; 3],
    metrics: Arc<InternalMetrics>,
    sender: Sender<Vec<RawMetric>>,
    interval: Duration,
    max_batch_bytes: usize,
    shutdown: watch::Receiver<bool>,
}

impl TickerTask {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; consume it so emission
        // starts one full interval in.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => self.emit(),
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        // Final emission so accumulated points are not lost.
                        self.emit();
                        return;
                    }
                },
            }
        }
    }

    fn emit(&self) {
        let timestamp_ms = truncate_timestamp(unix_now_ms(), self.interval);
        for rollup in &self.rollups {
            let mut batch = Vec::new();
            let mut batch_bytes = 0usize;
            for point in rollup.rollup(timestamp_ms) {
                batch_bytes += point.estimate_size();
                batch.push(point);
                if batch_bytes >= self.max_batch_bytes {
                    offer_batch(&self.sender, &self.metrics, std::mem::take(&mut batch));
                    batch_bytes = 0;
                }
            }
            if !batch.is_empty() {
                offer_batch(&self.sender, &self.metrics, batch);
            }
        }
    }
}
