//! Network monitor with two-phase stack capture.
//!
//! Phase 1 runs on `Network.requestWillBeSent`: the request is counted and,
//! when it is an API call or a script with an initiator stack, a trimmed
//! snapshot is cached as a candidate. Phase 2 runs on
//! `Network.loadingFinished`: response size and repetition counts decide
//! whether the snapshot is attached to the completion record. The candidate
//! is removed at completion or failure either way.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tabscope_core::config::NetworkConfig;
use tabscope_core::event::{
    DetailedStack, LargeTransferAlert, MonitorEvent, NetworkCompletion, NetworkFailure,
    ResourceType,
};
use tabscope_core::Clock;
use tracing::{debug, warn};

use crate::frequency::{FrequencyKey, RequestFrequencyCounters};
use crate::protocol::{LoadingFailed, LoadingFinished, RequestWillBeSent, ResponseReceived};
use crate::stack::{trim_stack_trace, StackLimits};
use crate::stack_cache::{StackCandidate, StackCandidateCache, TriggerReason};

/// Confirmed reason for attaching a detailed stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackReason {
    LargeDownload,
    LargeUpload,
    HighFrequencyApi(u64),
    RepeatedResource(u64),
}

impl fmt::Display for StackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LargeDownload => f.write_str("large_download"),
            Self::LargeUpload => f.write_str("large_upload"),
            Self::HighFrequencyApi(n) => write!(f, "high_frequency_api_{}", n),
            Self::RepeatedResource(n) => write!(f, "repeated_resource_{}", n),
        }
    }
}

#[derive(Debug, Clone)]
struct InFlightRequest {
    url: String,
    method: String,
    resource_type: ResourceType,
    key: FrequencyKey,
    upload_bytes: u64,
    started_at: f64,
    status: Option<u16>,
    mime_type: Option<String>,
    seq: u64,
}

pub struct NetworkMonitor {
    config: NetworkConfig,
    limits: StackLimits,
    clock: Arc<dyn Clock>,
    candidates: StackCandidateCache,
    counters: RequestFrequencyCounters,
    in_flight: HashMap<String, InFlightRequest>,
    next_seq: u64,
}

impl NetworkMonitor {
    pub fn new(config: NetworkConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            limits: StackLimits::from(&config),
            candidates: StackCandidateCache::new(config.stack_cache_capacity, clock.clone()),
            counters: RequestFrequencyCounters::new(),
            in_flight: HashMap::new(),
            next_seq: 0,
            clock,
            config,
        }
    }

    /// Route a raw CDP notification. Unknown methods and undecodable payloads
    /// yield `None`.
    pub fn handle_event(&mut self, method: &str, params: Value) -> Option<MonitorEvent> {
        match method {
            "Network.requestWillBeSent" => {
                let ev: RequestWillBeSent = decode(method, params)?;
                self.on_request_will_be_sent(&ev);
                None
            }
            "Network.responseReceived" => {
                let ev: ResponseReceived = decode(method, params)?;
                self.on_response_received(&ev);
                None
            }
            "Network.loadingFinished" => {
                let ev: LoadingFinished = decode(method, params)?;
                self.on_loading_finished(&ev)
                    .map(MonitorEvent::NetworkRequestComplete)
            }
            "Network.loadingFailed" => {
                let ev: LoadingFailed = decode(method, params)?;
                self.on_loading_failed(&ev)
                    .map(MonitorEvent::NetworkRequestFailed)
            }
            _ => None,
        }
    }

    pub fn on_request_will_be_sent(&mut self, ev: &RequestWillBeSent) {
        let resource_type = ev
            .resource_type
            .as_deref()
            .map(ResourceType::from_cdp)
            .unwrap_or_default();
        let key = FrequencyKey::from_url(&ev.request.url);
        let upload_bytes = ev.request.upload_bytes();

        if resource_type.is_api() {
            self.counters.record_api_call(&key);
        } else if matches!(resource_type, ResourceType::Script | ResourceType::Stylesheet)
            || key.is_json()
        {
            self.counters.record_resource_request(&key);
        }

        self.track_in_flight(ev, resource_type, key, upload_bytes);

        let stack = ev.initiator.stack.as_ref();
        let has_stack = stack.is_some_and(|s| !s.is_empty());
        let Some(reason) = self.candidate_reason(resource_type, upload_bytes, has_stack) else {
            return;
        };

        let snapshot = stack
            .map(|s| trim_stack_trace(s, &self.limits))
            .unwrap_or_default();
        debug!(
            request_id = %ev.request_id,
            reason = %reason,
            frames = snapshot.frames.len(),
            "Cached stack candidate"
        );
        self.candidates.insert(
            &ev.request_id,
            snapshot,
            &ev.request.url,
            resource_type,
            reason,
        );
    }

    /// Phase 1 decision. Only XHR/Fetch and scripts with a stack qualify.
    pub fn candidate_reason(
        &self,
        resource_type: ResourceType,
        upload_bytes: u64,
        has_initiator_stack: bool,
    ) -> Option<TriggerReason> {
        match resource_type {
            ResourceType::Xhr | ResourceType::Fetch => {
                if upload_bytes > self.config.large_upload_bytes {
                    Some(TriggerReason::LargeUpload)
                } else {
                    Some(TriggerReason::XhrFetchCandidate)
                }
            }
            ResourceType::Script if has_initiator_stack => Some(TriggerReason::ScriptWithStack),
            _ => None,
        }
    }

    pub fn on_response_received(&mut self, ev: &ResponseReceived) {
        if let Some(req) = self.in_flight.get_mut(&ev.request_id) {
            req.status = ev.response.status;
            req.mime_type = ev.response.mime_type.clone();
        }
    }

    pub fn on_loading_finished(&mut self, ev: &LoadingFinished) -> Option<NetworkCompletion> {
        let candidate = self.candidates.take(&ev.request_id);
        let Some(req) = self.in_flight.remove(&ev.request_id) else {
            debug!(request_id = %ev.request_id, "Finished request was not tracked");
            return None;
        };

        let now = self.clock.now();
        let encoded = if ev.encoded_data_length.is_finite() && ev.encoded_data_length > 0.0 {
            ev.encoded_data_length as u64
        } else {
            0
        };

        let reason = self.confirm_reason(&req, encoded, candidate.as_ref());
        let detailed_stack = reason.map(|reason| {
            let reason = reason.to_string();
            match candidate {
                Some(c) => DetailedStack::attached(reason, now, c.snapshot),
                None => DetailedStack::unattached(reason, now),
            }
        });
        if let Some(stack) = &detailed_stack {
            debug!(
                request_id = %ev.request_id,
                reason = %stack.reason,
                enabled = stack.enabled,
                "Detailed stack confirmed"
            );
        }

        let alert_threshold = self.config.large_response_alert_bytes;
        Some(NetworkCompletion {
            timestamp: now,
            request_id: ev.request_id.clone(),
            url: req.url,
            method: req.method,
            resource_type: req.resource_type,
            status: req.status,
            mime_type: req.mime_type,
            encoded_data_length: encoded,
            upload_bytes: req.upload_bytes,
            duration_ms: Some(((now - req.started_at) * 1000.0).max(0.0)),
            large_response_alert: (encoded > alert_threshold).then(|| LargeTransferAlert {
                size: encoded,
                threshold: alert_threshold,
            }),
            large_data_alert: (req.upload_bytes > alert_threshold).then(|| LargeTransferAlert {
                size: req.upload_bytes,
                threshold: alert_threshold,
            }),
            detailed_stack,
        })
    }

    /// Phase 2 decision, first match wins.
    fn confirm_reason(
        &self,
        req: &InFlightRequest,
        encoded: u64,
        candidate: Option<&StackCandidate>,
    ) -> Option<StackReason> {
        if encoded > self.config.large_download_bytes {
            return Some(StackReason::LargeDownload);
        }

        // Only a retained candidate can confirm an upload; an evicted one falls through.
        let large_upload =
            candidate.is_some_and(|c| c.initial_trigger_reason == TriggerReason::LargeUpload);
        if large_upload {
            return Some(StackReason::LargeUpload);
        }

        let api_calls = self.counters.api_calls(&req.key);
        if api_calls >= self.config.high_frequency_api_threshold {
            return Some(StackReason::HighFrequencyApi(api_calls));
        }

        let resource_requests = self.counters.resource_requests(&req.key);
        if resource_requests >= self.config.repeated_resource_threshold
            && encoded > self.config.repeated_resource_min_bytes
        {
            return Some(StackReason::RepeatedResource(resource_requests));
        }

        None
    }

    pub fn on_loading_failed(&mut self, ev: &LoadingFailed) -> Option<NetworkFailure> {
        self.candidates.take(&ev.request_id);
        let req = self.in_flight.remove(&ev.request_id)?;
        Some(NetworkFailure {
            timestamp: self.clock.now(),
            request_id: ev.request_id.clone(),
            url: req.url,
            method: req.method,
            resource_type: ev
                .resource_type
                .as_deref()
                .map(ResourceType::from_cdp)
                .unwrap_or(req.resource_type),
            status: req.status,
            error_text: ev.error_text.clone(),
            canceled: ev.canceled,
            blocked_reason: ev.blocked_reason.clone(),
        })
    }

    pub fn candidates(&self) -> &StackCandidateCache {
        &self.candidates
    }

    pub fn counters(&self) -> &RequestFrequencyCounters {
        &self.counters
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    fn track_in_flight(
        &mut self,
        ev: &RequestWillBeSent,
        resource_type: ResourceType,
        key: FrequencyKey,
        upload_bytes: u64,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;

        if !self.in_flight.contains_key(&ev.request_id)
            && self.in_flight.len() >= self.config.in_flight_capacity
        {
            let oldest = self
                .in_flight
                .iter()
                .min_by_key(|(_, r)| r.seq)
                .map(|(id, _)| id.clone());
            if let Some(id) = oldest {
                self.in_flight.remove(&id);
                warn!(request_id = %id, "In-flight table full, dropped oldest request");
            }
        }

        self.in_flight.insert(
            ev.request_id.clone(),
            InFlightRequest {
                url: ev.request.url.clone(),
                method: ev.request.method.clone(),
                resource_type,
                key,
                upload_bytes,
                started_at: self.clock.now(),
                status: None,
                mime_type: None,
                seq,
            },
        );
    }
}

fn decode<T: DeserializeOwned>(method: &str, params: Value) -> Option<T> {
    match serde_json::from_value(params) {
        Ok(ev) => Some(ev),
        Err(e) => {
            warn!(method = method, error = %e, "Malformed CDP payload");
            None
        }
    }
}
