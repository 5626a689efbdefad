//! Typed views of the CDP event payloads the monitors consume.
//!
//! Every field is defaulted so a partially populated payload still decodes;
//! a payload that fails to decode at all is dropped by the caller.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    #[serde(default)]
    pub function_name: String,
    #[serde(default)]
    pub script_id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub line_number: i64,
    #[serde(default)]
    pub column_number: i64,
}

/// `Runtime.StackTrace`; `parent` links cross async boundaries.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTrace {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub call_frames: Vec<CallFrame>,
    #[serde(default)]
    pub parent: Option<Box<StackTrace>>,
}

impl StackTrace {
    /// True when neither this chain nor any parent carries a frame.
    pub fn is_empty(&self) -> bool {
        let mut level = Some(self);
        while let Some(trace) = level {
            if !trace.call_frames.is_empty() {
                return false;
            }
            level = trace.parent.as_deref();
        }
        true
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Initiator {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub stack: Option<StackTrace>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDataEntry {
    #[serde(default)]
    pub bytes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub post_data: Option<String>,
    #[serde(default)]
    pub post_data_entries: Vec<PostDataEntry>,
}

impl Request {
    /// Upload body size in bytes.
    ///
    /// `postData` is preferred; otherwise the base64 `postDataEntries` are
    /// summed using their decoded length.
    pub fn upload_bytes(&self) -> u64 {
        if let Some(body) = &self.post_data {
            return body.len() as u64;
        }
        self.post_data_entries
            .iter()
            .filter_map(|e| e.bytes.as_deref())
            .map(base64_decoded_len)
            .sum()
    }
}

/// Decoded size of a base64 payload. Line breaks and padding carry no data.
fn base64_decoded_len(encoded: &str) -> u64 {
    let symbols = encoded
        .bytes()
        .filter(|b| !b.is_ascii_whitespace() && *b != b'=')
        .count() as u64;
    symbols * 3 / 4
}

/// `Network.requestWillBeSent`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSent {
    pub request_id: String,
    #[serde(default)]
    pub request: Request,
    #[serde(default)]
    pub initiator: Initiator,
    #[serde(default, rename = "type")]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub wall_time: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// `Network.responseReceived`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceived {
    pub request_id: String,
    #[serde(default)]
    pub response: Response,
    #[serde(default, rename = "type")]
    pub resource_type: Option<String>,
}

/// `Network.loadingFinished`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFinished {
    pub request_id: String,
    #[serde(default)]
    pub encoded_data_length: f64,
    #[serde(default)]
    pub timestamp: Option<f64>,
}

/// `Network.loadingFailed`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFailed {
    pub request_id: String,
    #[serde(default)]
    pub error_text: String,
    #[serde(default)]
    pub canceled: bool,
    #[serde(default)]
    pub blocked_reason: Option<String>,
    #[serde(default, rename = "type")]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub timestamp: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub unserializable_value: Option<String>,
}

impl RemoteObject {
    /// Best-effort text rendering of a console argument.
    pub fn render(&self) -> String {
        match &self.value {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => self
                .description
                .clone()
                .or_else(|| self.unserializable_value.clone())
                .unwrap_or_else(|| self.kind.clone()),
            Some(other) => other.to_string(),
        }
    }
}

/// `Runtime.consoleAPICalled`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleApiCalled {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub args: Vec<RemoteObject>,
    #[serde(default)]
    pub stack_trace: Option<StackTrace>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub line_number: Option<i64>,
    #[serde(default)]
    pub column_number: Option<i64>,
    #[serde(default)]
    pub exception: Option<RemoteObject>,
}

/// `Runtime.exceptionThrown`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionThrown {
    #[serde(default)]
    pub exception_details: ExceptionDetails,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_will_be_sent_decodes_with_missing_fields() {
        let ev: RequestWillBeSent = serde_json::from_value(json!({
            "requestId": "42.1",
            "request": {"url": "https://a.test/api"},
            "type": "XHR"
        }))
        .unwrap();
        assert_eq!(ev.request_id, "42.1");
        assert_eq!(ev.request.method, "");
        assert!(ev.initiator.stack.is_none());
        assert_eq!(ev.request.upload_bytes(), 0);
    }

    #[test]
    fn test_upload_bytes_from_entries() {
        let req: Request = serde_json::from_value(json!({
            "url": "https://a.test",
            "postDataEntries": [{"bytes": "aGVsbG8="}, {"bytes": "d29ybGQh"}]
        }))
        .unwrap();
        // "hello" + "world!"
        assert_eq!(req.upload_bytes(), 5 + 6);
    }

    #[test]
    fn test_upload_bytes_ignores_line_breaks() {
        let req: Request = serde_json::from_value(json!({
            "postDataEntries": [{"bytes": "QUJD\nQUJD\r\n"}, {"bytes": "QUI=\n"}]
        }))
        .unwrap();
        // "ABCABC" + "AB"
        assert_eq!(req.upload_bytes(), 6 + 2);
    }

    #[test]
    fn test_empty_stack_detection() {
        let empty: StackTrace = serde_json::from_value(json!({
            "callFrames": [],
            "parent": {"callFrames": []}
        }))
        .unwrap();
        assert!(empty.is_empty());

        let nested: StackTrace = serde_json::from_value(json!({
            "callFrames": [],
            "parent": {"callFrames": [{"functionName": "f"}]}
        }))
        .unwrap();
        assert!(!nested.is_empty());
    }

    #[test]
    fn test_remote_object_render() {
        let s: RemoteObject =
            serde_json::from_value(json!({"type": "string", "value": "x"})).unwrap();
        assert_eq!(s.render(), "x");
        let n: RemoteObject =
            serde_json::from_value(json!({"type": "number", "value": 3})).unwrap();
        assert_eq!(n.render(), "3");
        let o: RemoteObject =
            serde_json::from_value(json!({"type": "object", "description": "Array(2)"})).unwrap();
        assert_eq!(o.render(), "Array(2)");
    }
}
