//! Bounded cache of provisional stack snapshots for in-flight requests.
//!
//! Eviction is by insertion time only; reading a candidate does not refresh
//! it. When full, inserting a new fingerprint evicts the entry with the
//! smallest `cached_at`, ties going to the earlier insertion.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tabscope_core::event::{ResourceType, StackSnapshot};
use tabscope_core::Clock;
use tracing::debug;

/// Why a request's stack was cached at request start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    LargeUpload,
    XhrFetchCandidate,
    ScriptWithStack,
}

impl TriggerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LargeUpload => "large_upload",
            Self::XhrFetchCandidate => "xhr_fetch_candidate",
            Self::ScriptWithStack => "script_with_stack",
        }
    }
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StackCandidate {
    pub request_fingerprint: String,
    pub snapshot: StackSnapshot,
    pub cached_at: f64,
    pub resource_url: String,
    pub resource_type: ResourceType,
    pub initial_trigger_reason: TriggerReason,
}

struct Slot {
    candidate: StackCandidate,
    seq: u64,
}

pub struct StackCandidateCache {
    capacity: usize,
    clock: Arc<dyn Clock>,
    entries: HashMap<String, Slot>,
    next_seq: u64,
    evictions: u64,
}

impl StackCandidateCache {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            capacity: capacity.max(1),
            clock,
            entries: HashMap::new(),
            next_seq: 0,
            evictions: 0,
        }
    }

    /// Cache a snapshot, stamping it with the current clock reading.
    /// Returns the fingerprint of the evicted entry, if any.
    pub fn insert(
        &mut self,
        request_fingerprint: &str,
        snapshot: StackSnapshot,
        resource_url: &str,
        resource_type: ResourceType,
        reason: TriggerReason,
    ) -> Option<String> {
        let candidate = StackCandidate {
            request_fingerprint: request_fingerprint.to_string(),
            snapshot,
            cached_at: self.clock.now(),
            resource_url: resource_url.to_string(),
            resource_type,
            initial_trigger_reason: reason,
        };
        self.insert_candidate(candidate)
    }

    pub fn insert_candidate(&mut self, candidate: StackCandidate) -> Option<String> {
        let seq = self.next_seq;
        self.next_seq += 1;

        // A redirect re-announces the same request id; replace in place.
        if let Some(slot) = self.entries.get_mut(&candidate.request_fingerprint) {
            *slot = Slot { candidate, seq };
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.evict_oldest()
        } else {
            None
        };

        self.entries
            .insert(candidate.request_fingerprint.clone(), Slot { candidate, seq });
        evicted
    }

    /// Remove and return the candidate for a finished request.
    pub fn take(&mut self, request_fingerprint: &str) -> Option<StackCandidate> {
        self.entries.remove(request_fingerprint).map(|s| s.candidate)
    }

    pub fn get(&self, request_fingerprint: &str) -> Option<&StackCandidate> {
        self.entries.get(request_fingerprint).map(|s| &s.candidate)
    }

    pub fn contains(&self, request_fingerprint: &str) -> bool {
        self.entries.contains_key(request_fingerprint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    fn evict_oldest(&mut self) -> Option<String> {
        let oldest = self
            .entries
            .iter()
            .min_by(|(_, a), (_, b)| {
                a.candidate
                    .cached_at
                    .total_cmp(&b.candidate.cached_at)
                    .then(a.seq.cmp(&b.seq))
            })
            .map(|(key, _)| key.clone())?;
        self.entries.remove(&oldest);
        self.evictions += 1;
        debug!(request_id = %oldest, "Evicted oldest stack candidate");
        Some(oldest)
    }
}
