//! Per-tab monitoring pipeline.
//!
//! One producer task reads CDP events and heap samples and turns them into
//! [`MonitorEvent`]s; one consumer task drains the bounded queue, persists
//! every event and runs it through the tab's correlation engine.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tabscope_core::config::Config;
use tabscope_core::paths::tab_dir;
use tabscope_core::{Clock, Error, MonitorEvent, Result, SystemClock};
use tabscope_storage::JsonlWriter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cdp::{CdpClient, CdpEvent};
use crate::console;
use crate::correlation::{CorrelationEngine, CorrelationObserver, CorrelationReport, Severity};
use crate::discovery::PageTarget;
use crate::memory::MemorySampler;
use crate::network::NetworkMonitor;

pub const EVENTS_STEM: &str = "events";
pub const CORRELATIONS_STEM: &str = "correlations";

const SUBSCRIBED_EVENTS: &[&str] = &[
    "Network.requestWillBeSent",
    "Network.responseReceived",
    "Network.loadingFinished",
    "Network.loadingFailed",
    "Runtime.consoleAPICalled",
    "Runtime.exceptionThrown",
];

/// Logs every correlation at a level matching its severity.
pub struct LogObserver {
    target_id: String,
}

impl LogObserver {
    pub fn new(target_id: &str) -> Self {
        Self {
            target_id: target_id.to_string(),
        }
    }
}

#[async_trait]
impl CorrelationObserver for LogObserver {
    async fn on_correlation(&self, report: &CorrelationReport) -> Result<()> {
        match report.severity {
            Severity::Critical | Severity::Warning => warn!(
                target_id = %self.target_id,
                event_id = %report.event_id,
                severity = ?report.severity,
                "{}",
                report.evidence
            ),
            Severity::Info => info!(
                target_id = %self.target_id,
                event_id = %report.event_id,
                "{}",
                report.evidence
            ),
        }
        Ok(())
    }
}

/// Consumer side of a tab: persistence plus correlation.
pub struct TabPipeline {
    events: JsonlWriter,
    correlations: JsonlWriter,
    engine: CorrelationEngine,
}

impl TabPipeline {
    pub fn new(dir: &Path, engine: CorrelationEngine) -> Self {
        Self {
            events: JsonlWriter::new(dir, EVENTS_STEM),
            correlations: JsonlWriter::new(dir, CORRELATIONS_STEM),
            engine,
        }
    }

    /// Persist one event, correlate it, and persist the resulting report.
    /// Write failures are logged; the event still reaches the engine.
    pub async fn handle(&mut self, event: MonitorEvent) -> Option<CorrelationReport> {
        if let Err(e) = self.events.append(&event) {
            warn!(error = %e, kind = event.kind(), "Failed to write event record");
        }

        let report = self.engine.add_event_notify(event).await?;
        if let Err(e) = self.correlations.append(&report) {
            warn!(error = %e, event_id = %report.event_id, "Failed to write correlation record");
        }
        Some(report)
    }

    pub fn engine(&self) -> &CorrelationEngine {
        &self.engine
    }

    pub fn events_writer(&self) -> &JsonlWriter {
        &self.events
    }

    pub fn correlations_writer(&self) -> &JsonlWriter {
        &self.correlations
    }
}

/// Turns raw CDP events into normalized records for one tab.
struct EventProducer {
    network: NetworkMonitor,
    sampler: MemorySampler,
    clock: Arc<dyn Clock>,
    queue: mpsc::Sender<MonitorEvent>,
    dropped: u64,
}

impl EventProducer {
    fn on_cdp_event(&mut self, event: CdpEvent) -> bool {
        let normalized = if event.method.starts_with("Network.") {
            self.network.handle_event(&event.method, event.params)
        } else {
            console::normalize(&event.method, event.params, self.clock.now())
        };
        match normalized {
            Some(ev) => self.enqueue(ev),
            None => true,
        }
    }

    fn on_heap_usage(&mut self, used: u64, total: u64) -> bool {
        let now = self.clock.now();
        self.sampler
            .observe(used, total, now)
            .into_iter()
            .all(|ev| self.enqueue(ev))
    }

    /// Returns false once the consumer is gone.
    fn enqueue(&mut self, event: MonitorEvent) -> bool {
        match self.queue.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(ev)) => {
                self.dropped += 1;
                warn!(
                    kind = ev.kind(),
                    dropped = self.dropped,
                    "Event queue full, dropping record"
                );
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

pub struct TabMonitor {
    target_id: String,
    producer: JoinHandle<()>,
    consumer: JoinHandle<()>,
}

impl TabMonitor {
    /// Attach to `target` and start its producer and consumer tasks.
    pub async fn spawn(target: PageTarget, config: &Config, records_dir: &Path) -> Result<Self> {
        let ws_url = target.web_socket_debugger_url.clone().ok_or_else(|| {
            Error::NotFound(format!("Target {} has no WebSocket URL", target.id))
        })?;

        let client = CdpClient::connect(
            &ws_url,
            Duration::from_secs(config.chrome.command_timeout_secs),
        )
        .await?;
        // Subscribe before enabling so no early event is missed.
        let events = client.subscribe_events(SUBSCRIBED_EVENTS, None).await;
        client.enable_domain("Network").await?;
        client.enable_domain("Runtime").await?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let hostname = target.hostname();
        let engine = CorrelationEngine::new(config.correlation.clone(), &hostname, clock.clone())
            .with_observer(Arc::new(LogObserver::new(&target.id)));
        let dir = tab_dir(records_dir, &target.id);
        debug!(target_id = %target.id, dir = %dir.display(), "Tab records directory");
        let mut pipeline = TabPipeline::new(&dir, engine);

        let (queue_tx, mut queue_rx) = mpsc::channel::<MonitorEvent>(config.queue.capacity.max(1));
        let producer = EventProducer {
            network: NetworkMonitor::new(config.network.clone(), clock.clone()),
            sampler: MemorySampler::new(&config.memory),
            clock,
            queue: queue_tx,
            dropped: 0,
        };
        let sample_every = Duration::from_secs(config.memory.sample_interval_secs.max(1));

        let target_id = target.id.clone();
        let producer = tokio::spawn(run_producer(
            target_id.clone(),
            client,
            events,
            producer,
            sample_every,
        ));

        let consumer_id = target_id.clone();
        let consumer = tokio::spawn(async move {
            while let Some(event) = queue_rx.recv().await {
                pipeline.handle(event).await;
            }
            debug!(target_id = %consumer_id, "Tab event queue drained");
        });

        Ok(Self {
            target_id,
            producer,
            consumer,
        })
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    /// True once the CDP connection is gone and the queue has drained.
    pub fn is_finished(&self) -> bool {
        self.producer.is_finished() && self.consumer.is_finished()
    }

    pub fn shutdown(self) {
        self.producer.abort();
        self.consumer.abort();
    }
}

async fn run_producer(
    target_id: String,
    client: CdpClient,
    mut events: mpsc::Receiver<CdpEvent>,
    mut producer: EventProducer,
    sample_every: Duration,
) {
    let mut ticker = tokio::time::interval(sample_every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        let keep_going = tokio::select! {
            event = events.recv() => match event {
                Some(event) => producer.on_cdp_event(event),
                None => {
                    info!(target_id = %target_id, "CDP connection closed");
                    false
                }
            },
            _ = ticker.tick() => match client.get_heap_usage().await {
                Ok((used, total)) => producer.on_heap_usage(used, total),
                Err(e) => {
                    debug!(target_id = %target_id, error = %e, "Heap sample failed");
                    !client.is_closed()
                }
            },
        };
        if !keep_going {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabscope_core::config::CorrelationConfig;
    use tabscope_core::event::{LargeTransferAlert, MemorySample, NetworkCompletion, ResourceType};
    use tabscope_core::ManualClock;
    use tempfile::TempDir;

    const MB: u64 = 1024 * 1024;

    fn completion(ts: f64, size: u64) -> MonitorEvent {
        MonitorEvent::NetworkRequestComplete(NetworkCompletion {
            timestamp: ts,
            request_id: "1000.1".into(),
            url: "https://app.test/data.bin".into(),
            method: "GET".into(),
            resource_type: ResourceType::Fetch,
            status: Some(200),
            mime_type: None,
            encoded_data_length: size,
            upload_bytes: 0,
            duration_ms: None,
            large_response_alert: (size > MB).then_some(LargeTransferAlert {
                size,
                threshold: MB,
            }),
            large_data_alert: None,
            detailed_stack: None,
        })
    }

    fn memory(ts: f64, used: u64) -> MonitorEvent {
        MonitorEvent::Memory(MemorySample {
            timestamp: ts,
            used_js_heap_size: used,
            total_js_heap_size: used * 2,
        })
    }

    #[tokio::test]
    async fn test_pipeline_persists_events_and_correlations() {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(100.0));
        let engine = CorrelationEngine::new(CorrelationConfig::default(), "app.test", clock.clone())
            .with_observer(Arc::new(LogObserver::new("T1")));
        let mut pipeline = TabPipeline::new(temp_dir.path(), engine);

        assert!(pipeline.handle(completion(100.0, 6 * MB)).await.is_none());
        clock.advance(3.0);
        let report = pipeline.handle(memory(103.0, 80 * MB)).await.unwrap();
        assert_eq!(report.severity, Severity::Warning);
        assert_eq!(report.hostname, "app.test");

        let events = pipeline.events_writer().read_today().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["type"], "network_request_complete");
        assert_eq!(events[1]["type"], "memory");

        let correlations = pipeline.correlations_writer().read_today().unwrap();
        assert_eq!(correlations.len(), 1);
        assert_eq!(correlations[0]["severity"], "warning");
        assert_eq!(correlations[0]["eventId"], report.event_id.as_str());
        assert_eq!(pipeline.engine().window_len(), 2);
    }

    #[tokio::test]
    async fn test_unwritable_dir_does_not_stop_correlation() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, "file, not a directory").unwrap();

        let clock = Arc::new(ManualClock::new(0.0));
        let engine =
            CorrelationEngine::new(CorrelationConfig::default(), "app.test", clock.clone());
        let mut pipeline = TabPipeline::new(&blocker.join("tab"), engine);

        assert!(pipeline.handle(completion(0.0, 2 * MB)).await.is_none());
        clock.advance(1.0);
        assert!(pipeline.handle(memory(1.0, 10 * MB)).await.is_some());
    }

    #[tokio::test]
    async fn test_producer_routes_and_reports_closed_queue() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(10.0));
        let config = Config::default();
        let (tx, mut rx) = mpsc::channel(8);
        let mut producer = EventProducer {
            network: NetworkMonitor::new(config.network.clone(), clock.clone()),
            sampler: MemorySampler::new(&config.memory),
            clock,
            queue: tx,
            dropped: 0,
        };

        let console = CdpEvent {
            method: "Runtime.consoleAPICalled".into(),
            params: serde_json::json!({
                "type": "warn",
                "args": [{"type": "string", "value": "slow"}]
            }),
        };
        assert!(producer.on_cdp_event(console));
        assert!(producer.on_heap_usage(40 * MB, 64 * MB));

        assert_eq!(rx.recv().await.unwrap().kind(), "console");
        assert_eq!(rx.recv().await.unwrap().kind(), "memory");

        drop(rx);
        assert!(!producer.on_heap_usage(30 * MB, 64 * MB));
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_stopping() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(10.0));
        let config = Config::default();
        let (tx, _rx) = mpsc::channel(1);
        let mut producer = EventProducer {
            network: NetworkMonitor::new(config.network.clone(), clock.clone()),
            sampler: MemorySampler::new(&config.memory),
            clock,
            queue: tx,
            dropped: 0,
        };

        assert!(producer.on_heap_usage(40 * MB, 64 * MB));
        assert!(producer.on_heap_usage(41 * MB, 64 * MB));
        assert_eq!(producer.dropped, 1);
    }
}
