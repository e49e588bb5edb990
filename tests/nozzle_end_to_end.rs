//! End-to-end pipeline tests: scripted envelope stream in, exposition
//! text out.

use spout::core::{
    Config, CounterMessage, Envelope, EnvelopeMessage, GaugeMessage, GaugeValue, TimerMessage,
};
use spout::monitoring::InternalMetrics;
use spout::nozzle::Nozzle;
use spout::point::PointValue;
use spout::store::MetricStore;
use spout::stream::{EnvelopeStream, StreamConnector, StreamRequest};
use spout::{Result, SpoutError};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Connector yielding a fixed script of envelope batches, then blocking
/// forever like an idle stream.
struct ScriptedConnector {
    batches: parking_lot::Mutex<Option<Vec<Vec<Envelope>>>>,
}

impl ScriptedConnector {
    fn new(batches: Vec<Vec<Envelope>>) -> Arc<Self> {
        Arc::new(Self {
            batches: parking_lot::Mutex::new(Some(batches)),
        })
    }
}

#[async_trait::async_trait]
impl StreamConnector for ScriptedConnector {
    async fn connect(&self, _request: StreamRequest) -> Result<Box<dyn EnvelopeStream>> {
        let batches = self.batches.lock().take().unwrap_or_default();
        Ok(Box::new(ScriptedStream {
            batches: batches.into(),
        }))
    }
}

struct ScriptedStream {
    batches: VecDeque<Vec<Envelope>>,
}

#[async_trait::async_trait]
impl EnvelopeStream for ScriptedStream {
    async fn next_batch(&mut self) -> Result<Vec<Envelope>> {
        match self.batches.pop_front() {
            Some(batch) => Ok(batch),
            None => std::future::pending().await,
        }
    }
}

/// Connector whose stream fails on the first read.
struct FailingConnector;

#[async_trait::async_trait]
impl StreamConnector for FailingConnector {
    async fn connect(&self, _request: StreamRequest) -> Result<Box<dyn EnvelopeStream>> {
        Ok(Box::new(FailingStream))
    }
}

struct FailingStream;

#[async_trait::async_trait]
impl EnvelopeStream for FailingStream {
    async fn next_batch(&mut self) -> Result<Vec<Envelope>> {
        Err(SpoutError::stream("connection reset by peer"))
    }
}

fn fast_config() -> Config {
    let mut config = Config::default();
    config.nozzle.flush_interval = Duration::from_millis(50);
    config.rollup.interval = Duration::from_millis(100);
    config.rollup.metrics = vec![
        spout::core::RollupKind::Counter,
        spout::core::RollupKind::Histogram,
        spout::core::RollupKind::Summary,
    ];
    config
}

fn pipeline(
    connector: Arc<dyn StreamConnector>,
    config: Config,
) -> (Arc<Nozzle>, Arc<MetricStore>) {
    let metrics = Arc::new(InternalMetrics::new());
    let store = Arc::new(MetricStore::new(&config.store, Arc::clone(&metrics)).unwrap());
    let nozzle = Arc::new(Nozzle::new(connector, Arc::clone(&store), metrics, config));
    (nozzle, store)
}

fn gauge_envelope(source_id: &str, fields: &[(&str, f64)]) -> Envelope {
    let metrics = fields
        .iter()
        .map(|(name, value)| {
            (
                (*name).to_string(),
                GaugeValue {
                    unit: String::new(),
                    value: *value,
                },
            )
        })
        .collect();
    Envelope {
        source_id: source_id.to_string(),
        instance_id: String::new(),
        timestamp: 0,
        tags: HashMap::new(),
        message: EnvelopeMessage::Gauge(GaugeMessage { metrics }),
    }
}

fn server_timer(source_id: &str, seconds: i64) -> Envelope {
    let mut tags = HashMap::new();
    tags.insert("peer_type".to_string(), "server".to_string());
    tags.insert("status_code".to_string(), "200".to_string());
    Envelope {
        source_id: source_id.to_string(),
        instance_id: String::new(),
        timestamp: 0,
        tags,
        message: EnvelopeMessage::Timer(TimerMessage {
            name: "http".to_string(),
            start: 0,
            stop: seconds * 1_000_000_000,
        }),
    }
}

#[tokio::test]
async fn gauge_envelope_reaches_exposition() {
    let connector = ScriptedConnector::new(vec![vec![gauge_envelope(
        "s1",
        &[("memory", 10.0), ("cpu", 5.0)],
    )]]);
    let (nozzle, store) = pipeline(connector, fast_config());

    let runner = Arc::clone(&nozzle);
    let handle = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(Duration::from_millis(300)).await;

    let output = store.render_text().unwrap();
    assert!(output.contains("memory{source_id=\"s1\"} 10"), "missing memory point:\n{output}");
    assert!(output.contains("cpu{source_id=\"s1\"} 5"), "missing cpu point:\n{output}");

    nozzle.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn counter_envelope_stores_cumulative_total() {
    let envelope = Envelope {
        source_id: "router".to_string(),
        instance_id: String::new(),
        timestamp: 0,
        tags: HashMap::new(),
        message: EnvelopeMessage::Counter(CounterMessage {
            name: "requests".to_string(),
            delta: 1,
            total: 41,
        }),
    };
    // Two observations of the same identity: the later total wins.
    let mut second = envelope.clone();
    if let EnvelopeMessage::Counter(counter) = &mut second.message {
        counter.total = 42;
    }
    let connector = ScriptedConnector::new(vec![vec![envelope, second]]);
    let (nozzle, store) = pipeline(connector, fast_config());

    let runner = Arc::clone(&nozzle);
    let handle = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(Duration::from_millis(300)).await;

    let snapshot = store.snapshot();
    let points = &snapshot["requests"];
    assert_eq!(points.len(), 1, "same identity must collapse to one point");
    assert_eq!(*points[0].value(), PointValue::Counter(42.0));

    nozzle.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn server_timers_roll_up_into_aggregates() {
    let timers = vec![
        server_timer("gorouter", 2),
        server_timer("gorouter", 7),
        server_timer("gorouter", 8),
    ];
    let connector = ScriptedConnector::new(vec![timers]);
    let (nozzle, store) = pipeline(connector, fast_config());

    let runner = Arc::clone(&nozzle);
    let handle = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(Duration::from_millis(500)).await;

    let snapshot = store.snapshot();

    let totals = &snapshot["http_total"];
    assert_eq!(totals.len(), 1);
    assert_eq!(*totals[0].value(), PointValue::Counter(3.0));
    assert_eq!(totals[0].labels()["source_id"], "gorouter");
    assert_eq!(totals[0].labels()["status_code"], "200");

    let durations = &snapshot["http_duration_seconds"];
    match durations[0].value() {
        PointValue::Histogram(hist) => {
            assert_eq!(hist.count, 3);
            assert!((hist.sum - 17.0).abs() < 1e-6, "sum was {}", hist.sum);
        },
        other => panic!("expected histogram, got {other:?}"),
    }

    let summaries = &snapshot["http_duration_seconds_summary"];
    match summaries[0].value() {
        PointValue::Summary(summary) => {
            assert_eq!(summary.count, 3);
            assert!((summary.sum - 17.0).abs() < 1e-6);
        },
        other => panic!("expected summary, got {other:?}"),
    }

    nozzle.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn client_timer_does_not_roll_up() {
    let server = server_timer("gorouter", 2);
    let mut client = server_timer("gorouter", 2);
    client
        .tags
        .insert("peer_type".to_string(), "client".to_string());
    let connector = ScriptedConnector::new(vec![vec![server, client]]);
    let (nozzle, store) = pipeline(connector, fast_config());

    let runner = Arc::clone(&nozzle);
    let handle = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(Duration::from_millis(500)).await;

    let snapshot = store.snapshot();
    // Only the server-side timer of the pair contributes.
    assert_eq!(*snapshot["http_total"][0].value(), PointValue::Counter(1.0));

    nozzle.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn stream_failure_surfaces_to_caller() {
    let (nozzle, _store) = pipeline(Arc::new(FailingConnector), fast_config());
    let result = nozzle.run().await;
    assert!(matches!(result, Err(SpoutError::Stream(_))));
}

#[tokio::test]
async fn shutdown_stops_an_idle_pipeline() {
    let connector = ScriptedConnector::new(Vec::new());
    let (nozzle, _store) = pipeline(connector, fast_config());

    let runner = Arc::clone(&nozzle);
    let handle = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    nozzle.shutdown();
    let joined = tokio::time::timeout(Duration::from_secs(5), handle).await;
    joined.unwrap().unwrap().unwrap();
}
