pub mod cdp;
pub mod console;
pub mod correlation;
pub mod discovery;
pub mod frequency;
pub mod memory;
pub mod network;
pub mod protocol;
pub mod stack;
pub mod stack_cache;
pub mod tab;

pub use cdp::{CdpClient, CdpEvent};
pub use correlation::{
    CorrelationEngine, CorrelationMatch, CorrelationObserver, CorrelationReport, Severity,
};
pub use discovery::{list_page_targets, PageTarget, TabSupervisor};
pub use network::{NetworkMonitor, StackReason};
pub use stack_cache::{StackCandidate, StackCandidateCache, TriggerReason};
pub use tab::{LogObserver, TabMonitor, TabPipeline};
