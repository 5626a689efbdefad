//! Normalized per-tab records.
//!
//! Every collector turns raw CDP notifications into a [`MonitorEvent`]. The
//! same value is written to the tab's JSONL stream and fed to the correlation
//! engine, so the serialized `type` tag doubles as the on-disk record type.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    Memory(MemorySample),
    Gc(GcObservation),
    Console(ConsoleEntry),
    Exception(ExceptionEntry),
    NetworkRequestComplete(NetworkCompletion),
    NetworkRequestFailed(NetworkFailure),
}

impl MonitorEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Gc(_) => "gc",
            Self::Console(_) => "console",
            Self::Exception(_) => "exception",
            Self::NetworkRequestComplete(_) => "network_request_complete",
            Self::NetworkRequestFailed(_) => "network_request_failed",
        }
    }

    pub fn timestamp(&self) -> f64 {
        match self {
            Self::Memory(e) => e.timestamp,
            Self::Gc(e) => e.timestamp,
            Self::Console(e) => e.timestamp,
            Self::Exception(e) => e.timestamp,
            Self::NetworkRequestComplete(e) => e.timestamp,
            Self::NetworkRequestFailed(e) => e.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySample {
    pub timestamp: f64,
    pub used_js_heap_size: u64,
    pub total_js_heap_size: u64,
}

impl MemorySample {
    pub fn used_mb(&self) -> f64 {
        bytes_to_mb(self.used_js_heap_size)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcObservation {
    pub timestamp: f64,
    pub before_bytes: u64,
    pub after_bytes: u64,
    pub reclaimed_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleEntry {
    pub timestamp: f64,
    /// CDP console API type: `log`, `warning`, `error`, `timeEnd`, ...
    pub level: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionEntry {
    pub timestamp: f64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_number: Option<i64>,
}

/// CDP `Network.ResourceType`, reduced to the values the monitor branches on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Document,
    Stylesheet,
    Image,
    Media,
    Font,
    Script,
    #[serde(rename = "XHR")]
    Xhr,
    Fetch,
    WebSocket,
    #[default]
    #[serde(other)]
    Other,
}

impl ResourceType {
    pub fn from_cdp(raw: &str) -> Self {
        match raw {
            "Document" => Self::Document,
            "Stylesheet" => Self::Stylesheet,
            "Image" => Self::Image,
            "Media" => Self::Media,
            "Font" => Self::Font,
            "Script" => Self::Script,
            "XHR" => Self::Xhr,
            "Fetch" => Self::Fetch,
            "WebSocket" => Self::WebSocket,
            _ => Self::Other,
        }
    }

    pub fn is_api(&self) -> bool {
        matches!(self, Self::Xhr | Self::Fetch)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LargeTransferAlert {
    pub size: u64,
    pub threshold: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub function_name: String,
    pub url: String,
    pub line_number: i64,
    pub column_number: i64,
    pub script_id: String,
}

/// One async continuation boundary (`parent` link) of an initiator stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncStackLevel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub frames: Vec<StackFrame>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackSnapshot {
    pub frames: Vec<StackFrame>,
    pub async_frames: Vec<AsyncStackLevel>,
    pub truncated: bool,
}

/// `detailedStack` field of a completion record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedStack {
    pub enabled: bool,
    pub reason: String,
    pub collection_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frames: Option<Vec<StackFrame>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub async_frames: Option<Vec<AsyncStackLevel>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
}

impl DetailedStack {
    pub fn attached(reason: String, collection_time: f64, snapshot: StackSnapshot) -> Self {
        Self {
            enabled: true,
            reason,
            collection_time,
            frames: Some(snapshot.frames),
            async_frames: Some(snapshot.async_frames),
            truncated: Some(snapshot.truncated),
        }
    }

    /// The reason fired but no snapshot was retained for the request.
    pub fn unattached(reason: String, collection_time: f64) -> Self {
        Self {
            enabled: false,
            reason,
            collection_time,
            frames: None,
            async_frames: None,
            truncated: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkCompletion {
    pub timestamp: f64,
    pub request_id: String,
    pub url: String,
    pub method: String,
    pub resource_type: ResourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub encoded_data_length: u64,
    pub upload_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_response_alert: Option<LargeTransferAlert>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_data_alert: Option<LargeTransferAlert>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detailed_stack: Option<DetailedStack>,
}

impl NetworkCompletion {
    /// Largest transfer alert on the record, response side first.
    pub fn large_transfer(&self) -> Option<&LargeTransferAlert> {
        self.large_response_alert
            .as_ref()
            .or(self.large_data_alert.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkFailure {
    pub timestamp: f64,
    pub request_id: String,
    pub url: String,
    pub method: String,
    pub resource_type: ResourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub error_text: String,
    pub canceled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
}

pub fn bytes_to_mb(bytes: u64) -> f64 {
    round2(bytes as f64 / (1024.0 * 1024.0))
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_tag_names() {
        let ev = MonitorEvent::Memory(MemorySample {
            timestamp: 1.0,
            used_js_heap_size: 10,
            total_js_heap_size: 20,
        });
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "memory");
        assert_eq!(v["usedJsHeapSize"], 10);
        assert_eq!(ev.kind(), "memory");
    }

    #[test]
    fn test_completion_omits_absent_fields() {
        let ev = MonitorEvent::NetworkRequestComplete(NetworkCompletion {
            timestamp: 2.0,
            request_id: "1.1".into(),
            url: "https://a.test/x".into(),
            method: "GET".into(),
            resource_type: ResourceType::Xhr,
            status: Some(200),
            mime_type: None,
            encoded_data_length: 500,
            upload_bytes: 0,
            duration_ms: None,
            large_response_alert: None,
            large_data_alert: None,
            detailed_stack: Some(DetailedStack::unattached("large_download".into(), 2.0)),
        });
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "network_request_complete");
        assert_eq!(v["resourceType"], "XHR");
        assert!(v.get("mimeType").is_none());
        assert_eq!(
            v["detailedStack"],
            json!({"enabled": false, "reason": "large_download", "collectionTime": 2.0})
        );
    }

    #[test]
    fn test_unknown_resource_type_is_other() {
        let rt: ResourceType = serde_json::from_value(json!("Ping")).unwrap();
        assert_eq!(rt, ResourceType::Other);
        assert_eq!(ResourceType::from_cdp("XHR"), ResourceType::Xhr);
        assert!(ResourceType::Fetch.is_api());
        assert!(!ResourceType::Script.is_api());
        assert_eq!(ResourceType::default(), ResourceType::Other);
    }

    #[test]
    fn test_bytes_to_mb() {
        assert_eq!(bytes_to_mb(6_291_456), 6.0);
        assert_eq!(bytes_to_mb(1_572_864), 1.5);
    }
}
