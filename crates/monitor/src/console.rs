//! Console and exception normalisation.

use serde_json::Value;
use tabscope_core::event::{ConsoleEntry, ExceptionEntry, MonitorEvent};
use tracing::debug;

use crate::protocol::{ConsoleApiCalled, ExceptionThrown};

/// Normalise `Runtime.consoleAPICalled` / `Runtime.exceptionThrown`.
pub fn normalize(method: &str, params: Value, now: f64) -> Option<MonitorEvent> {
    match method {
        "Runtime.consoleAPICalled" => {
            let ev: ConsoleApiCalled = match serde_json::from_value(params) {
                Ok(ev) => ev,
                Err(e) => {
                    debug!(error = %e, "Malformed consoleAPICalled payload");
                    return None;
                }
            };
            Some(MonitorEvent::Console(console_entry(&ev, now)))
        }
        "Runtime.exceptionThrown" => {
            let ev: ExceptionThrown = match serde_json::from_value(params) {
                Ok(ev) => ev,
                Err(e) => {
                    debug!(error = %e, "Malformed exceptionThrown payload");
                    return None;
                }
            };
            Some(MonitorEvent::Exception(exception_entry(&ev, now)))
        }
        _ => None,
    }
}

pub fn console_entry(ev: &ConsoleApiCalled, now: f64) -> ConsoleEntry {
    let message = ev
        .args
        .iter()
        .map(|a| a.render())
        .collect::<Vec<_>>()
        .join(" ");
    let top = ev
        .stack_trace
        .as_ref()
        .and_then(|s| s.call_frames.first());
    ConsoleEntry {
        timestamp: now,
        level: if ev.kind.is_empty() {
            "log".to_string()
        } else {
            ev.kind.clone()
        },
        message,
        url: top.map(|f| f.url.clone()).filter(|u| !u.is_empty()),
        line_number: top.map(|f| f.line_number),
    }
}

pub fn exception_entry(ev: &ExceptionThrown, now: f64) -> ExceptionEntry {
    let details = &ev.exception_details;
    let message = details
        .exception
        .as_ref()
        .and_then(|e| e.description.clone())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| details.text.clone());
    ExceptionEntry {
        timestamp: now,
        message,
        url: details.url.clone().filter(|u| !u.is_empty()),
        line_number: details.line_number,
        column_number: details.column_number,
    }
}
