//! Per-`(origin, path)` request counters.
//!
//! Counters only grow for the lifetime of a monitor; the key space is bounded
//! by the distinct endpoints a tab talks to.

use std::collections::HashMap;
use url::Url;

/// `(origin, path)` with query string and fragment stripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrequencyKey {
    pub origin: String,
    pub path: String,
}

impl FrequencyKey {
    pub fn from_url(raw: &str) -> Self {
        match Url::parse(raw) {
            Ok(url) => Self {
                origin: url.origin().ascii_serialization(),
                path: url.path().to_string(),
            },
            Err(_) => {
                let without_query = raw.split(['?', '#']).next().unwrap_or(raw);
                Self {
                    origin: String::new(),
                    path: without_query.to_string(),
                }
            }
        }
    }

    pub fn is_json(&self) -> bool {
        self.path.to_ascii_lowercase().ends_with(".json")
    }
}

#[derive(Debug, Default)]
pub struct RequestFrequencyCounters {
    api_call_count: HashMap<FrequencyKey, u64>,
    resource_request_count: HashMap<FrequencyKey, u64>,
}

impl RequestFrequencyCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_api_call(&mut self, key: &FrequencyKey) -> u64 {
        bump(&mut self.api_call_count, key)
    }

    pub fn record_resource_request(&mut self, key: &FrequencyKey) -> u64 {
        bump(&mut self.resource_request_count, key)
    }

    pub fn api_calls(&self, key: &FrequencyKey) -> u64 {
        self.api_call_count.get(key).copied().unwrap_or(0)
    }

    pub fn resource_requests(&self, key: &FrequencyKey) -> u64 {
        self.resource_request_count.get(key).copied().unwrap_or(0)
    }
}

fn bump(map: &mut HashMap<FrequencyKey, u64>, key: &FrequencyKey) -> u64 {
    let count = map.entry(key.clone()).or_insert(0);
    *count += 1;
    *count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_is_stripped() {
        let a = FrequencyKey::from_url("https://api.test/v1/trades?since=1");
        let b = FrequencyKey::from_url("https://api.test/v1/trades?since=2#x");
        assert_eq!(a, b);
        assert_eq!(a.origin, "https://api.test");
        assert_eq!(a.path, "/v1/trades");
    }

    #[test]
    fn test_origin_distinguishes_ports() {
        let a = FrequencyKey::from_url("http://api.test:8080/x");
        let b = FrequencyKey::from_url("http://api.test/x");
        assert_ne!(a, b);
    }

    #[test]
    fn test_unparsable_url_falls_back() {
        let key = FrequencyKey::from_url("not a url?q=1");
        assert_eq!(key.path, "not a url");
        assert_eq!(key.origin, "");
    }

    #[test]
    fn test_json_detection() {
        assert!(FrequencyKey::from_url("https://a.test/data/config.JSON?v=3").is_json());
        assert!(!FrequencyKey::from_url("https://a.test/data/json").is_json());
    }

    #[test]
    fn test_counters_are_independent() {
        let mut counters = RequestFrequencyCounters::new();
        let key = FrequencyKey::from_url("https://a.test/x");
        assert_eq!(counters.record_api_call(&key), 1);
        assert_eq!(counters.record_api_call(&key), 2);
        assert_eq!(counters.record_resource_request(&key), 1);
        assert_eq!(counters.api_calls(&key), 2);
        assert_eq!(counters.resource_requests(&key), 1);
        assert_eq!(counters.api_calls(&FrequencyKey::from_url("https://b.test/x")), 0);
    }
}
