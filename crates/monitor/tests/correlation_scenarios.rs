use serde_json::json;
use std::sync::Arc;
use tabscope_core::config::{CorrelationConfig, NetworkConfig};
use tabscope_core::event::{ConsoleEntry, MemorySample};
use tabscope_core::{ManualClock, MonitorEvent};
use tabscope_monitor::{CorrelationEngine, NetworkMonitor, Severity};

const MB: u64 = 1024 * 1024;

struct Tab {
    clock: Arc<ManualClock>,
    network: NetworkMonitor,
    engine: CorrelationEngine,
}

impl Tab {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(1_700_000_000.0));
        let engine =
            CorrelationEngine::new(CorrelationConfig::default(), "shop.test", clock.clone());
        Self {
            network: NetworkMonitor::new(NetworkConfig::default(), clock.clone()),
            engine,
            clock,
        }
    }

    fn now(&self) -> f64 {
        use tabscope_core::Clock;
        self.clock.now()
    }

    /// Drive a full request lifecycle and feed the resulting record to the engine.
    fn fetch(&mut self, id: &str, url: &str, status: u16, size: u64) -> MonitorEvent {
        self.network.handle_event(
            "Network.requestWillBeSent",
            json!({"requestId": id, "request": {"url": url, "method": "GET"}, "type": "Fetch"}),
        );
        self.network.handle_event(
            "Network.responseReceived",
            json!({"requestId": id, "response": {"url": url, "status": status}}),
        );
        self.network
            .handle_event(
                "Network.loadingFinished",
                json!({"requestId": id, "encodedDataLength": size}),
            )
            .expect("tracked request completes")
    }

    fn fail(&mut self, id: &str, url: &str, error: &str) -> MonitorEvent {
        self.network.handle_event(
            "Network.requestWillBeSent",
            json!({"requestId": id, "request": {"url": url, "method": "POST"}, "type": "XHR"}),
        );
        self.network
            .handle_event(
                "Network.loadingFailed",
                json!({"requestId": id, "errorText": error, "canceled": false}),
            )
            .expect("tracked request fails")
    }

    fn memory(&self, used: u64) -> MonitorEvent {
        MonitorEvent::Memory(MemorySample {
            timestamp: self.now(),
            used_js_heap_size: used,
            total_js_heap_size: used + 32 * MB,
        })
    }

    fn console(&self, level: &str, message: &str) -> MonitorEvent {
        MonitorEvent::Console(ConsoleEntry {
            timestamp: self.now(),
            level: level.to_string(),
            message: message.to_string(),
            url: None,
            line_number: None,
        })
    }
}

#[test]
fn large_download_then_memory_growth_is_a_warning() {
    let mut tab = Tab::new();
    let download = tab.fetch("1.1", "https://shop.test/catalog.json", 200, 6 * MB);
    assert!(tab.engine.add_event(download).is_none());

    tab.clock.advance(3.2);
    let report = tab.engine.add_event(tab.memory(180 * MB)).expect("memory correlates");
    assert_eq!(report.severity, Severity::Warning);
    assert_eq!(report.hostname, "shop.test");
    assert_eq!(report.primary_event.kind, "memory");

    let value = serde_json::to_value(&report).unwrap();
    let first = &value["correlations"][0];
    assert_eq!(first["type"], "large_network_to_memory");
    assert_eq!(first["network_url"], "https://shop.test/catalog.json");
    assert_eq!(first["network_size_mb"], 6.0);
    assert_eq!(first["memory_used_mb"], 180.0);
    assert_eq!(first["time_delta"], 3.2);
    assert_eq!(value["eventId"].as_str().map(str::len), Some(16));
}

#[test]
fn failed_checkout_then_console_error_is_critical() {
    let mut tab = Tab::new();
    let failed = tab.fail("2.1", "https://shop.test/api/checkout", "net::ERR_FAILED");
    tab.engine.add_event(failed);

    tab.clock.advance(0.4);
    let report = tab
        .engine
        .add_event(tab.console("error", "Checkout failed: network error"))
        .expect("console error correlates");
    assert_eq!(report.severity, Severity::Critical);

    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["correlations"][0]["type"], "console_error_to_network_failure");
    assert_eq!(value["correlations"][0]["failure_text"], "net::ERR_FAILED");
}

#[test]
fn server_error_and_large_download_before_exception_and_memory() {
    let mut tab = Tab::new();
    let big = tab.fetch("3.1", "https://shop.test/bundle.bin", 200, 3 * MB);
    tab.engine.add_event(big);
    tab.clock.advance(1.0);
    let broken = tab.fetch("3.2", "https://shop.test/api/cart", 503, 200);
    tab.engine.add_event(broken);

    tab.clock.advance(1.0);
    let report = tab
        .engine
        .add_event(tab.console("error", "cart unavailable"))
        .expect("error after 503");
    assert_eq!(report.severity, Severity::Critical);

    tab.clock.advance(1.0);
    let report = tab.engine.add_event(tab.memory(90 * MB)).expect("memory after big download");
    assert_eq!(report.severity, Severity::Warning);
    assert_eq!(report.correlations.len(), 1);
}

#[test]
fn timing_log_after_large_response_is_info() {
    let mut tab = Tab::new();
    let big = tab.fetch("4.1", "https://shop.test/images.json", 200, 2 * MB);
    tab.engine.add_event(big);

    tab.clock.advance(2.0);
    let report = tab
        .engine
        .add_event(tab.console("log", "render time: 812ms"))
        .expect("timing log correlates");
    assert_eq!(report.severity, Severity::Info);
    assert_eq!(
        report.correlations[0].rule_type(),
        "performance_timing_with_large_response"
    );
}

#[test]
fn events_outside_the_time_bound_never_correlate() {
    let mut tab = Tab::new();
    let big = tab.fetch("5.1", "https://shop.test/a.bin", 200, 4 * MB);
    tab.engine.add_event(big);

    tab.clock.advance(15.01);
    assert!(tab.engine.add_event(tab.memory(100 * MB)).is_none());

    let mut tab = Tab::new();
    let big = tab.fetch("5.2", "https://shop.test/b.bin", 200, 4 * MB);
    tab.engine.add_event(big);

    tab.clock.advance(14.99);
    assert!(tab.engine.add_event(tab.memory(100 * MB)).is_some());
}

#[test]
fn oldest_event_falls_out_of_a_full_window() {
    let mut tab = Tab::new();
    let big = tab.fetch("6.1", "https://shop.test/first.bin", 200, 8 * MB);
    tab.engine.add_event(big);

    for i in 0..20 {
        tab.clock.advance(0.1);
        let noise = tab.console("debug", &format!("tick {}", i));
        assert!(tab.engine.add_event(noise).is_none());
    }
    assert_eq!(tab.engine.window_len(), 20);

    tab.clock.advance(0.1);
    assert!(tab.engine.add_event(tab.memory(200 * MB)).is_none());
}

#[test]
fn small_responses_do_not_correlate_with_memory() {
    let mut tab = Tab::new();
    for i in 0..5 {
        let small = tab.fetch(&format!("7.{}", i), "https://shop.test/api/ping", 200, 900);
        tab.engine.add_event(small);
        tab.clock.advance(0.2);
    }
    assert!(tab.engine.add_event(tab.memory(60 * MB)).is_none());
}
