//! Sliding-window correlation of heterogeneous tab events.
//!
//! Each new event is checked against every window entry that arrived within
//! `window_seconds`. Rules are directional: the new event must match the
//! rule's first pattern and the window entry its second. The new event is
//! appended to the window whether or not anything matched.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Arc;
use tabscope_core::config::CorrelationConfig;
use tabscope_core::event::{bytes_to_mb, round2, MonitorEvent};
use tabscope_core::{truncate_chars, Clock, Result};
use tracing::{debug, warn};

const MAX_TEXT_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

/// One rule outcome inside a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CorrelationMatch {
    LargeNetworkToMemory {
        network_url: String,
        network_size_mb: f64,
        memory_used_mb: f64,
        time_delta: f64,
    },
    ConsoleErrorToNetworkFailure {
        network_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        network_status: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failure_text: Option<String>,
        error_message: String,
        time_delta: f64,
    },
    PerformanceTimingWithLargeResponse {
        network_url: String,
        network_size_mb: f64,
        message: String,
        time_delta: f64,
    },
}

impl CorrelationMatch {
    pub fn rule_type(&self) -> &'static str {
        match self {
            Self::LargeNetworkToMemory { .. } => "large_network_to_memory",
            Self::ConsoleErrorToNetworkFailure { .. } => "console_error_to_network_failure",
            Self::PerformanceTimingWithLargeResponse { .. } => {
                "performance_timing_with_large_response"
            }
        }
    }

    fn evidence(&self) -> String {
        match self {
            Self::LargeNetworkToMemory {
                network_url,
                network_size_mb,
                memory_used_mb,
                time_delta,
            } => format!(
                "heap at {:.2} MB {:.1}s after a {:.2} MB transfer from {}",
                memory_used_mb, time_delta, network_size_mb, network_url
            ),
            Self::ConsoleErrorToNetworkFailure {
                network_url,
                network_status,
                failure_text,
                error_message,
                time_delta,
            } => {
                let cause = match (network_status, failure_text) {
                    (Some(status), _) if *status >= 400 => format!("HTTP {}", status),
                    (_, Some(text)) => text.clone(),
                    _ => "failure".to_string(),
                };
                format!(
                    "error \"{}\" {:.1}s after {} on {}",
                    error_message, time_delta, cause, network_url
                )
            }
            Self::PerformanceTimingWithLargeResponse {
                network_url,
                network_size_mb,
                message,
                time_delta,
            } => format!(
                "timing log \"{}\" {:.1}s after a {:.2} MB response from {}",
                message, time_delta, network_size_mb, network_url
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationReport {
    pub timestamp: f64,
    pub hostname: String,
    pub primary_event: PrimaryEvent,
    pub correlations: Vec<CorrelationMatch>,
    pub severity: Severity,
    pub evidence: String,
    pub event_id: String,
}

/// Notification side-channel for new correlations.
#[async_trait]
pub trait CorrelationObserver: Send + Sync {
    async fn on_correlation(&self, report: &CorrelationReport) -> Result<()>;
}

struct WindowEntry {
    event: MonitorEvent,
    arrived_at: f64,
}

pub struct CorrelationEngine {
    settings: CorrelationConfig,
    hostname: String,
    clock: Arc<dyn Clock>,
    window: VecDeque<WindowEntry>,
    observer: Option<Arc<dyn CorrelationObserver>>,
}

impl CorrelationEngine {
    pub fn new(settings: CorrelationConfig, hostname: &str, clock: Arc<dyn Clock>) -> Self {
        let capacity = settings.window_size.max(1);
        Self {
            settings,
            hostname: hostname.to_string(),
            clock,
            window: VecDeque::with_capacity(capacity),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn CorrelationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Events currently eligible for matching, oldest first.
    pub fn window_events(&self) -> impl Iterator<Item = &MonitorEvent> {
        self.window.iter().map(|e| &e.event)
    }

    pub fn add_event(&mut self, event: MonitorEvent) -> Option<CorrelationReport> {
        let now = self.clock.now();

        let mut matches = Vec::new();
        for entry in &self.window {
            let delta = now - entry.arrived_at;
            if delta > self.settings.window_seconds {
                continue;
            }
            matches.extend(evaluate_rules(&event, &entry.event, round2(delta)));
        }

        let report = (!matches.is_empty()).then(|| self.build_report(&event, now, matches));

        let capacity = self.settings.window_size.max(1);
        while self.window.len() >= capacity {
            self.window.pop_front();
        }
        self.window.push_back(WindowEntry {
            event,
            arrived_at: now,
        });

        report
    }

    /// `add_event`, then await the observer. Observer errors are logged and
    /// never change the returned report.
    pub async fn add_event_notify(&mut self, event: MonitorEvent) -> Option<CorrelationReport> {
        let report = self.add_event(event)?;
        if let Some(observer) = &self.observer {
            if let Err(e) = observer.on_correlation(&report).await {
                warn!(error = %e, event_id = %report.event_id, "Correlation observer failed");
            }
        }
        Some(report)
    }

    fn build_report(
        &self,
        event: &MonitorEvent,
        now: f64,
        mut matches: Vec<CorrelationMatch>,
    ) -> CorrelationReport {
        let severity = classify_severity(&matches);
        matches.truncate(self.settings.max_reported.max(1));

        let evidence = matches
            .iter()
            .map(CorrelationMatch::evidence)
            .collect::<Vec<_>>()
            .join("; ");
        let primary_event = PrimaryEvent {
            kind: event.kind().to_string(),
            timestamp: event.timestamp(),
        };
        let event_id = event_id(&self.hostname, &primary_event, &matches);

        debug!(
            event_id = %event_id,
            severity = ?severity,
            matches = matches.len(),
            "Correlation detected"
        );

        CorrelationReport {
            timestamp: now,
            hostname: self.hostname.clone(),
            primary_event,
            correlations: matches,
            severity,
            evidence,
            event_id,
        }
    }
}

/// First match wins: network-failure errors, then large transfers, then timing logs.
pub fn classify_severity(matches: &[CorrelationMatch]) -> Severity {
    let types: Vec<&str> = matches.iter().map(CorrelationMatch::rule_type).collect();
    if types.iter().any(|t| *t == "console_error_to_network_failure") {
        Severity::Critical
    } else if types.iter().any(|t| t.contains("large_network")) {
        Severity::Warning
    } else {
        Severity::Info
    }
}

fn evaluate_rules(event: &MonitorEvent, other: &MonitorEvent, delta: f64) -> Vec<CorrelationMatch> {
    [
        large_network_to_memory(event, other, delta),
        console_error_to_network_failure(event, other, delta),
        performance_timing_with_large_response(event, other, delta),
    ]
    .into_iter()
    .flatten()
    .collect()
}

fn large_network_to_memory(
    event: &MonitorEvent,
    other: &MonitorEvent,
    delta: f64,
) -> Option<CorrelationMatch> {
    let (MonitorEvent::Memory(memory), MonitorEvent::NetworkRequestComplete(network)) =
        (event, other)
    else {
        return None;
    };
    let alert = network.large_transfer()?;
    Some(CorrelationMatch::LargeNetworkToMemory {
        network_url: network.url.clone(),
        network_size_mb: bytes_to_mb(alert.size),
        memory_used_mb: memory.used_mb(),
        time_delta: delta,
    })
}

fn console_error_to_network_failure(
    event: &MonitorEvent,
    other: &MonitorEvent,
    delta: f64,
) -> Option<CorrelationMatch> {
    let error_message = match event {
        MonitorEvent::Console(c) if is_error_level(&c.level) => &c.message,
        MonitorEvent::Exception(e) => &e.message,
        _ => return None,
    };
    let (network_url, network_status, failure_text) = match other {
        MonitorEvent::NetworkRequestComplete(n) if n.status.is_some_and(|s| s >= 400) => {
            (&n.url, n.status, None)
        }
        MonitorEvent::NetworkRequestFailed(f) => (&f.url, f.status, Some(f.error_text.clone())),
        _ => return None,
    };
    Some(CorrelationMatch::ConsoleErrorToNetworkFailure {
        network_url: network_url.clone(),
        network_status,
        failure_text,
        error_message: truncate_chars(error_message, MAX_TEXT_CHARS),
        time_delta: delta,
    })
}

fn performance_timing_with_large_response(
    event: &MonitorEvent,
    other: &MonitorEvent,
    delta: f64,
) -> Option<CorrelationMatch> {
    let (MonitorEvent::Console(console), MonitorEvent::NetworkRequestComplete(network)) =
        (event, other)
    else {
        return None;
    };
    if is_error_level(&console.level) || !console.message.to_lowercase().contains("time") {
        return None;
    }
    let alert = network.large_response_alert.as_ref()?;
    Some(CorrelationMatch::PerformanceTimingWithLargeResponse {
        network_url: network.url.clone(),
        network_size_mb: bytes_to_mb(alert.size),
        message: truncate_chars(&console.message, MAX_TEXT_CHARS),
        time_delta: delta,
    })
}

fn is_error_level(level: &str) -> bool {
    level.eq_ignore_ascii_case("error") || level.eq_ignore_ascii_case("exception")
}

fn event_id(hostname: &str, primary: &PrimaryEvent, matches: &[CorrelationMatch]) -> String {
    let rules: Vec<&str> = matches.iter().map(CorrelationMatch::rule_type).collect();
    let mut hasher = Sha256::new();
    hasher.update(hostname.as_bytes());
    hasher.update(b"|");
    hasher.update(primary.kind.as_bytes());
    hasher.update(b"|");
    hasher.update(primary.timestamp.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(rules.join(",").as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}
