//! JS heap sampling.
//!
//! Samples come from `Runtime.getHeapUsage`. A drop in used heap larger than
//! `gc_drop_ratio` between consecutive samples is reported as a `gc` event.

use tabscope_core::config::MemoryConfig;
use tabscope_core::event::{GcObservation, MemorySample, MonitorEvent};

pub struct MemorySampler {
    gc_drop_ratio: f64,
    last_used: Option<u64>,
}

impl MemorySampler {
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            gc_drop_ratio: config.gc_drop_ratio,
            last_used: None,
        }
    }

    /// Turn one heap reading into events: always a `memory` sample, preceded
    /// by a `gc` observation when the heap shrank enough.
    pub fn observe(&mut self, used: u64, total: u64, now: f64) -> Vec<MonitorEvent> {
        let mut events = Vec::with_capacity(2);
        if let Some(before) = self.last_used {
            if before > used {
                let reclaimed = before - used;
                if reclaimed as f64 > before as f64 * self.gc_drop_ratio {
                    events.push(MonitorEvent::Gc(GcObservation {
                        timestamp: now,
                        before_bytes: before,
                        after_bytes: used,
                        reclaimed_bytes: reclaimed,
                    }));
                }
            }
        }
        self.last_used = Some(used);
        events.push(MonitorEvent::Memory(MemorySample {
            timestamp: now,
            used_js_heap_size: used,
            total_js_heap_size: total,
        }));
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_first_sample_is_memory_only() {
        let mut sampler = MemorySampler::new(&MemoryConfig::default());
        let events = sampler.observe(50 * MB, 80 * MB, 1.0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), "memory");
    }

    #[test]
    fn test_large_drop_emits_gc() {
        let mut sampler = MemorySampler::new(&MemoryConfig::default());
        sampler.observe(100 * MB, 120 * MB, 1.0);
        let events = sampler.observe(60 * MB, 120 * MB, 6.0);
        assert_eq!(events.len(), 2);
        match &events[0] {
            MonitorEvent::Gc(gc) => assert_eq!(gc.reclaimed_bytes, 40 * MB),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_small_drop_or_growth_is_not_gc() {
        let mut sampler = MemorySampler::new(&MemoryConfig::default());
        sampler.observe(100 * MB, 120 * MB, 1.0);
        assert_eq!(sampler.observe(95 * MB, 120 * MB, 2.0).len(), 1);
        assert_eq!(sampler.observe(140 * MB, 160 * MB, 3.0).len(), 1);
    }
}
