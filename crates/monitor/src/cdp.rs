//! Low-level Chrome DevTools Protocol (CDP) client over WebSocket.
//!
//! Requests are correlated to responses by id; events are fanned out to
//! per-method subscribers, optionally filtered on the payload `sessionId`.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tabscope_core::{Error, Result};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// A CDP notification as delivered to subscribers.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
}

struct Listener {
    session_id: Option<String>,
    tx: mpsc::Sender<CdpEvent>,
}

type ListenerMap = Arc<Mutex<HashMap<String, Vec<Listener>>>>;

/// A CDP WebSocket client that can send commands and receive responses/events.
pub struct CdpClient {
    /// Sender to write messages to the WebSocket.
    ws_tx: mpsc::Sender<String>,
    /// Pending command responses, keyed by request ID.
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>,
    /// Auto-incrementing command ID.
    next_id: AtomicU64,
    /// Event listeners (domain.event -> channels).
    event_listeners: ListenerMap,
    command_timeout: Duration,
    closed: Arc<AtomicBool>,
    _reader_handle: tokio::task::JoinHandle<()>,
    _writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a Chrome CDP WebSocket endpoint.
    pub async fn connect(ws_url: &str, command_timeout: Duration) -> Result<Self> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| {
                Error::Cdp(format!("Failed to connect to CDP endpoint {}: {}", ws_url, e))
            })?;

        let (mut ws_sink, mut ws_stream_read) = ws_stream.split();

        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let pending_clone = pending.clone();

        let event_listeners: ListenerMap = Arc::new(Mutex::new(HashMap::new()));
        let events_clone = event_listeners.clone();

        let closed = Arc::new(AtomicBool::new(false));
        let closed_clone = closed.clone();

        // Writer task: owns the sink, forwards messages from channel
        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!("CDP WebSocket write error: {}", e);
                    break;
                }
            }
        });

        // Reader task: reads from WebSocket, dispatches responses and events
        let reader_handle = tokio::spawn(async move {
            while let Some(msg_result) = ws_stream_read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<Value>(&text) {
                        Ok(val) => dispatch_message(val, &pending_clone, &events_clone).await,
                        Err(e) => debug!(error = %e, "Ignoring non-JSON CDP frame"),
                    },
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            closed_clone.store(true, Ordering::SeqCst);
            // Dropping the senders ends every subscriber stream.
            events_clone.lock().await.clear();
            pending_clone.lock().await.clear();
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            event_listeners,
            command_timeout,
            closed,
            _reader_handle: reader_handle,
            _writer_handle: writer_handle,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send a CDP command and wait for the response.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        self.send_command_in_session(method, params, None).await
    }

    /// Send a CDP command, routed to a flattened target session when
    /// `session_id` is given.
    pub async fn send_command_in_session(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let mut msg = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        if let Some(session) = session_id {
            msg["sessionId"] = json!(session);
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        if let Err(e) = self.ws_tx.send(msg.to_string()).await {
            self.pending.lock().await.remove(&id);
            return Err(Error::Cdp(format!("Failed to send CDP command: {}", e)));
        }

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(response)) => {
                if let Some(error) = response.get("error") {
                    Err(Error::Cdp(format!("{} failed: {}", method, error)))
                } else {
                    Ok(response.get("result").cloned().unwrap_or(Value::Null))
                }
            }
            Ok(Err(_)) => Err(Error::Cdp("CDP response channel closed".to_string())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::Timeout(format!(
                    "CDP command '{}' timed out after {}s",
                    method,
                    self.command_timeout.as_secs()
                )))
            }
        }
    }

    /// Subscribe to several CDP events on one channel. Events arrive in wire
    /// order across all of the methods. With a `session_id`, only events whose
    /// payload carries that `sessionId` are delivered.
    pub async fn subscribe_events(
        &self,
        methods: &[&str],
        session_id: Option<&str>,
    ) -> mpsc::Receiver<CdpEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut listeners = self.event_listeners.lock().await;
        for method in methods {
            listeners
                .entry(method.to_string())
                .or_insert_with(Vec::new)
                .push(Listener {
                    session_id: session_id.map(str::to_string),
                    tx: tx.clone(),
                });
        }
        rx
    }

    /// Enable a CDP domain (e.g., "Network", "Runtime").
    pub async fn enable_domain(&self, domain: &str) -> Result<()> {
        self.send_command(&format!("{}.enable", domain), json!({}))
            .await?;
        Ok(())
    }

    /// `Runtime.getHeapUsage` as `(usedSize, totalSize)` in bytes.
    pub async fn get_heap_usage(&self) -> Result<(u64, u64)> {
        let result = self.send_command("Runtime.getHeapUsage", json!({})).await?;
        let used = result.get("usedSize").and_then(|v| v.as_f64());
        let total = result.get("totalSize").and_then(|v| v.as_f64());
        match (used, total) {
            (Some(used), Some(total)) => Ok((used as u64, total as u64)),
            _ => Err(Error::Cdp(format!("Unexpected getHeapUsage result: {}", result))),
        }
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self._reader_handle.abort();
        self._writer_handle.abort();
    }
}

async fn dispatch_message(
    val: Value,
    pending: &Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    listeners: &Mutex<HashMap<String, Vec<Listener>>>,
) {
    if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
        if let Some(tx) = pending.lock().await.remove(&id) {
            let _ = tx.send(val);
        }
        return;
    }

    let Some(method) = val.get("method").and_then(|v| v.as_str()) else {
        return;
    };
    let session = val.get("sessionId").and_then(|v| v.as_str());
    let mut listeners = listeners.lock().await;
    if let Some(subscribers) = listeners.get_mut(method) {
        subscribers.retain(|l| !l.tx.is_closed());
        let params = val.get("params").cloned().unwrap_or(Value::Null);
        for listener in subscribers.iter() {
            if !session_matches(listener.session_id.as_deref(), session) {
                continue;
            }
            let event = CdpEvent {
                method: method.to_string(),
                params: params.clone(),
            };
            if listener.tx.try_send(event).is_err() {
                warn!(method = method, "CDP event subscriber is full, dropping event");
            }
        }
    }
}

fn session_matches(filter: Option<&str>, event_session: Option<&str>) -> bool {
    match filter {
        None => true,
        Some(wanted) => event_session == Some(wanted),
    }
}
