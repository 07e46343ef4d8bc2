//! Runtime metrics.
//!
//! Per-endpoint counters shared by the simulator, its workers and the
//! transport callbacks. Everything sits behind one mutex that is never held
//! across a call into other code; readers get an owned [`Snapshot`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::EndpointKind;

/// Adapter state reported before the first run
pub const IDLE_STATE: &str = "Idle";

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct PdPublisherStats {
    pub name: String,
    pub packets_sent: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct PdSubscriberStats {
    pub name: String,
    pub packets_received: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct MdSenderStats {
    pub name: String,
    pub requests_sent: u64,
    pub replies_received: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct MdListenerStats {
    pub name: String,
    pub requests_received: u64,
    pub replies_sent: u64,
}

/// Point-in-time copy of every counter, sorted by endpoint name
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub captured_at: DateTime<Utc>,
    pub simulator_running: bool,
    pub adapter_initialized: bool,
    pub adapter_state: String,
    pub pd_publishers: Vec<PdPublisherStats>,
    pub pd_subscribers: Vec<PdSubscriberStats>,
    pub md_senders: Vec<MdSenderStats>,
    pub md_listeners: Vec<MdListenerStats>,
}

impl Snapshot {
    pub fn pd_publisher(&self, name: &str) -> Option<&PdPublisherStats> {
        self.pd_publishers.iter().find(|s| s.name == name)
    }

    pub fn pd_subscriber(&self, name: &str) -> Option<&PdSubscriberStats> {
        self.pd_subscribers.iter().find(|s| s.name == name)
    }

    pub fn md_sender(&self, name: &str) -> Option<&MdSenderStats> {
        self.md_senders.iter().find(|s| s.name == name)
    }

    pub fn md_listener(&self, name: &str) -> Option<&MdListenerStats> {
        self.md_listeners.iter().find(|s| s.name == name)
    }

    /// Serialize as pretty-printed JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

struct MetricsState {
    simulator_running: bool,
    adapter_initialized: bool,
    adapter_state: String,
    pd_publishers: BTreeMap<String, PdPublisherStats>,
    pd_subscribers: BTreeMap<String, PdSubscriberStats>,
    md_senders: BTreeMap<String, MdSenderStats>,
    md_listeners: BTreeMap<String, MdListenerStats>,
}

impl Default for MetricsState {
    fn default() -> Self {
        Self {
            simulator_running: false,
            adapter_initialized: false,
            adapter_state: IDLE_STATE.to_string(),
            pd_publishers: BTreeMap::new(),
            pd_subscribers: BTreeMap::new(),
            md_senders: BTreeMap::new(),
            md_listeners: BTreeMap::new(),
        }
    }
}

trait NamedStats {
    fn named(name: &str) -> Self;
}

macro_rules! named_stats {
    ($($stats:ty),*) => {
        $(impl NamedStats for $stats {
            fn named(name: &str) -> Self {
                Self { name: name.to_string(), ..Self::default() }
            }
        })*
    };
}

named_stats!(PdPublisherStats, PdSubscriberStats, MdSenderStats, MdListenerStats);

/// Look up the entry for `name`, creating a zeroed one on first use
fn entry<'a, T: NamedStats>(map: &'a mut BTreeMap<String, T>, name: &str) -> &'a mut T {
    map.entry(name.to_string()).or_insert_with(|| T::named(name))
}

/// Thread-safe counter aggregator for one simulator instance
#[derive(Default)]
pub struct RuntimeMetrics {
    state: Mutex<MetricsState>,
}

impl RuntimeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MetricsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Back to the Idle baseline: no entries, not running
    pub fn reset(&self) {
        *self.state() = MetricsState::default();
    }

    pub fn set_simulator_running(&self, running: bool) {
        self.state().simulator_running = running;
    }

    pub fn set_adapter_status(&self, initialized: bool, state: impl Into<String>) {
        let mut guard = self.state();
        guard.adapter_initialized = initialized;
        guard.adapter_state = state.into();
    }

    pub fn adapter_state(&self) -> String {
        self.state().adapter_state.clone()
    }

    /// Create a zeroed entry so silent endpoints still show up in snapshots
    pub fn seed(&self, kind: EndpointKind, name: &str) {
        let mut state = self.state();
        match kind {
            EndpointKind::PdPublisher => {
                entry(&mut state.pd_publishers, name);
            }
            EndpointKind::PdSubscriber => {
                entry(&mut state.pd_subscribers, name);
            }
            EndpointKind::MdSender => {
                entry(&mut state.md_senders, name);
            }
            EndpointKind::MdListener => {
                entry(&mut state.md_listeners, name);
            }
        }
    }

    pub fn record_pd_publish(&self, name: &str) {
        let mut state = self.state();
        entry(&mut state.pd_publishers, name).packets_sent += 1;
    }

    pub fn record_pd_receive(&self, name: &str) {
        let mut state = self.state();
        entry(&mut state.pd_subscribers, name).packets_received += 1;
    }

    pub fn record_md_request_sent(&self, name: &str) {
        let mut state = self.state();
        entry(&mut state.md_senders, name).requests_sent += 1;
    }

    pub fn record_md_reply_received(&self, name: &str) {
        let mut state = self.state();
        entry(&mut state.md_senders, name).replies_received += 1;
    }

    pub fn record_md_request_received(&self, name: &str) {
        let mut state = self.state();
        entry(&mut state.md_listeners, name).requests_received += 1;
    }

    pub fn record_md_reply_sent(&self, name: &str) {
        let mut state = self.state();
        entry(&mut state.md_listeners, name).replies_sent += 1;
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.state();
        Snapshot {
            captured_at: Utc::now(),
            simulator_running: state.simulator_running,
            adapter_initialized: state.adapter_initialized,
            adapter_state: state.adapter_state.clone(),
            pd_publishers: state.pd_publishers.values().cloned().collect(),
            pd_subscribers: state.pd_subscribers.values().cloned().collect(),
            md_senders: state.md_senders.values().cloned().collect(),
            md_listeners: state.md_listeners.values().cloned().collect(),
        }
    }
}
