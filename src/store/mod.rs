//! The expiring concurrent metric store.
//!
//! A two-level concurrent map: metric name → shard, shard → points keyed
//! by identity. Inserts overwrite by identity and stamp a fresh TTL;
//! expired points are marked swept lazily and physically removed only by
//! the periodic sweeper, so scrapes in flight never observe torn state.

pub mod exposition;

pub use exposition::{accepts_gzip, NegotiatedEncoder};

use crate::core::{Result, SpoutError, StoreConfig};
use crate::monitoring::InternalMetrics;
use crate::point::RawMetric;
use ahash::RandomState;
use dashmap::DashMap;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

type Shard = DashMap<u64, RawMetric, RandomState>;

/// Concurrent metric store with per-point TTL.
pub struct MetricStore {
    shards: DashMap<String, Shard, RandomState>,
    ttl: Duration,
    sweep_interval: Duration,
    sweep_pool: rayon::ThreadPool,
    metrics: Arc<InternalMetrics>,
}

impl MetricStore {
    /// Create a store with the given configuration. Builds the
    /// fixed-size sweep pool up front.
    pub fn new(config: &StoreConfig, metrics: Arc<InternalMetrics>) -> Result<Self> {
        let sweep_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.sweep_workers)
            .thread_name(|index| format!("spout-sweep-{index}"))
            .build()
            .map_err(|error| SpoutError::store(error.to_string()))?;
        Ok(Self {
            shards: DashMap::with_hasher(RandomState::new()),
            ttl: config.ttl,
            sweep_interval: config.sweep_interval,
            sweep_pool,
            metrics,
        })
    }

    /// Insert a point, overwriting any prior point with the same
    /// identity and stamping a fresh expiry.
    pub fn insert(&self, mut point: RawMetric) {
        point.set_expiry(Instant::now() + self.ttl);
        let id = point.id();
        self.shards
            .entry(point.name().to_string())
            .or_insert_with(|| DashMap::with_hasher(RandomState::new()))
            .insert(id, point);
    }

    /// Remove every swept point, fanning the shard list across the
    /// sweep pool. Emptied shards are dropped.
    pub fn sweep(&self) {
        let names: Vec<String> = self.shards.iter().map(|entry| entry.key().clone()).collect();
        self.sweep_pool.install(|| {
            names.par_iter().for_each(|name| {
                let expired: Vec<u64> = match self.shards.get(name) {
                    Some(shard) => shard
                        .iter()
                        .filter(|entry| entry.value().is_swept())
                        .map(|entry| *entry.key())
                        .collect(),
                    None => return,
                };
                if let Some(shard) = self.shards.get(name) {
                    for id in expired {
                        if shard.remove(&id).is_some() {
                            self.metrics.points_swept.inc();
                        }
                    }
                }
                self.shards.remove_if(name, |_, shard| shard.is_empty());
            });
        });
    }

    /// Spawn the periodic sweep task. Stops when the shutdown flag
    /// flips.
    pub fn start_sweeper(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let store = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(store.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let store = Arc::clone(&store);
                        if let Err(error) = tokio::task::spawn_blocking(move || store.sweep()).await {
                            tracing::warn!(%error, "sweep task failed");
                        }
                    },
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    },
                }
            }
        })
    }

    /// Spawn `count` insert workers draining point batches from the
    /// channel into the store. Workers exit when every sender is gone.
    pub fn spawn_insert_workers(
        self: Arc<Self>,
        count: usize,
        receiver: crossbeam_channel::Receiver<Vec<RawMetric>>,
    ) -> Vec<std::thread::JoinHandle<()>> {
        (0..count)
            .map(|index| {
                let store = Arc::clone(&self);
                let receiver = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("spout-insert-{index}"))
                    .spawn(move || {
                        while let Ok(batch) = receiver.recv() {
                            for point in batch {
                                store.insert(point);
                            }
                        }
                    })
                    .expect("spawn insert worker")
            })
            .collect()
    }

    /// A read-only copy of every stored point, grouped by name. Swept
    /// points remain visible here until the sweeper removes them.
    pub fn snapshot(&self) -> HashMap<String, Vec<RawMetric>> {
        self.shards
            .iter()
            .map(|entry| {
                let points = entry
                    .value()
                    .iter()
                    .map(|point| point.value().clone())
                    .collect();
                (entry.key().clone(), points)
            })
            .collect()
    }

    /// Number of per-name shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Total number of stored points, swept included.
    pub fn point_count(&self) -> usize {
        self.shards.iter().map(|entry| entry.value().len()).sum()
    }

    /// The internal metrics shared with this store.
    pub(crate) fn internal_metrics(&self) -> &InternalMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::PointValue;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn test_store(ttl: Duration) -> Arc<MetricStore> {
        let config = StoreConfig {
            ttl,
            sweep_interval: Duration::from_secs(60),
            sweep_workers: 2,
        };
        Arc::new(MetricStore::new(&config, Arc::new(InternalMetrics::new())).unwrap())
    }

    fn point(name: &str, source_id: &str, value: f64) -> RawMetric {
        let labels: BTreeMap<String, String> =
            [("source_id".to_string(), source_id.to_string())].into();
        RawMetric::new(name, "test", PointValue::Gauge(value)).with_labels(labels)
    }

    #[test]
    fn test_insert_same_identity_overwrites() {
        let store = test_store(Duration::from_secs(60));
        store.insert(point("memory", "s1", 10.0));
        store.insert(point("memory", "s1", 20.0));

        assert_eq!(store.point_count(), 1);
        let snapshot = store.snapshot();
        assert_eq!(*snapshot["memory"][0].value(), PointValue::Gauge(20.0));
    }

    #[test]
    fn test_distinct_identities_coexist() {
        let store = test_store(Duration::from_secs(60));
        store.insert(point("memory", "s1", 10.0));
        store.insert(point("memory", "s2", 20.0));
        store.insert(point("cpu", "s1", 1.0));

        assert_eq!(store.shard_count(), 2);
        assert_eq!(store.point_count(), 3);
        assert_eq!(store.snapshot()["memory"].len(), 2);
    }

    #[test]
    fn test_expired_point_survives_until_sweep() {
        let store = test_store(Duration::from_millis(5));
        store.insert(point("memory", "s1", 10.0));
        std::thread::sleep(Duration::from_millis(20));

        // Expired but not yet removed.
        let snapshot = store.snapshot();
        assert!(snapshot["memory"][0].is_swept());
        assert_eq!(store.point_count(), 1);

        store.sweep();
        assert_eq!(store.point_count(), 0);
        assert_eq!(store.shard_count(), 0);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_reinsert_resets_expiry() {
        let store = test_store(Duration::from_millis(60));
        store.insert(point("memory", "s1", 10.0));
        std::thread::sleep(Duration::from_millis(40));
        store.insert(point("memory", "s1", 11.0));
        std::thread::sleep(Duration::from_millis(40));

        // 80ms after the first insert, but only 40ms after the second.
        let snapshot = store.snapshot();
        assert!(!snapshot["memory"][0].is_swept());
    }

    #[test]
    fn test_sweep_keeps_live_points() {
        let store = test_store(Duration::from_secs(60));
        store.insert(point("memory", "s1", 10.0));
        store.sweep();
        assert_eq!(store.point_count(), 1);
    }

    #[test]
    fn test_sweep_counts_removals() {
        let store = test_store(Duration::from_millis(1));
        store.insert(point("memory", "s1", 10.0));
        store.insert(point("cpu", "s1", 1.0));
        std::thread::sleep(Duration::from_millis(10));

        store.sweep();
        assert_eq!(store.internal_metrics().points_swept.get(), 2);
    }

    #[test]
    fn test_insert_workers_drain_channel() {
        let store = test_store(Duration::from_secs(60));
        let (sender, receiver) = crossbeam_channel::bounded(4);
        let workers = Arc::clone(&store).spawn_insert_workers(2, receiver);

        sender
            .send(vec![point("memory", "s1", 10.0), point("cpu", "s1", 1.0)])
            .unwrap();
        sender.send(vec![point("memory", "s2", 20.0)]).unwrap();
        drop(sender);

        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(store.point_count(), 3);
    }
}
