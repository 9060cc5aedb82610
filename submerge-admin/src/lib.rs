// Admin, config, system policies, logging, audit, metrics, etc.
//
// This crate is the coordinator's MBean-equivalent surface: a fixed,
// versioned set of getters/setters over a single-writer configuration
// snapshot, plus the counters the coordinator's drivers increment as they
// run. Per the design note on replacing reflective MBean registration,
// nothing here is discovered at runtime: `AdminHandle` is a plain struct
// with named methods, generated once rather than bound dynamically.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::info;

use submerge_base::WriteType;
use submerge_net::{Duration, NodeID};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub hinted_handoff_enabled: bool,
    pub hinted_handoff_disabled_dcs: BTreeSet<String>,
    pub max_hint_window: Duration,
    pub max_hints_in_progress: u64,
    pub read_rpc_timeout: Duration,
    pub write_rpc_timeout: Duration,
    pub counter_write_rpc_timeout: Duration,
    pub range_rpc_timeout: Duration,
    pub truncate_rpc_timeout: Duration,
    pub cas_contention_timeout: Duration,
    pub native_transport_max_concurrent_requests: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            hinted_handoff_enabled: true,
            hinted_handoff_disabled_dcs: BTreeSet::new(),
            max_hint_window: Duration::from_millis(3 * 60 * 60 * 1000),
            max_hints_in_progress: 128 * 1024,
            read_rpc_timeout: Duration::from_millis(5_000),
            write_rpc_timeout: Duration::from_millis(2_000),
            counter_write_rpc_timeout: Duration::from_millis(5_000),
            range_rpc_timeout: Duration::from_millis(10_000),
            truncate_rpc_timeout: Duration::from_millis(60_000),
            cas_contention_timeout: Duration::from_millis(1_000),
            native_transport_max_concurrent_requests: 256,
        }
    }
}

impl CoordinatorConfig {
    /// The per-write-type RPC timeout, used by the response collector.
    pub fn rpc_timeout_for(&self, write_type: WriteType) -> Duration {
        match write_type {
            WriteType::Counter => self.counter_write_rpc_timeout,
            WriteType::Cas => self.cas_contention_timeout,
            _ => self.write_rpc_timeout,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteTypeCounters {
    pub timeouts: u64,
    pub failures: u64,
    pub unavailable: u64,
}

/// Atomic counters incremented by the coordinator's drivers. Kept as a flat
/// struct of atomics (cheap, lock-free updates) except for the two
/// `BTreeMap`-keyed breakdowns (per-verb drops, per-write-type failures)
/// which are low-frequency enough to live behind a `Mutex`.
#[derive(Default)]
pub struct CoordinatorMetrics {
    pub total_hints: AtomicU64,
    pub total_hints_in_progress: AtomicU64,
    pub read_repair_attempted: AtomicU64,
    pub read_repair_repaired_blocking: AtomicU64,
    pub read_repair_repaired_background: AtomicU64,
    pub cas_contention: AtomicU64,
    pub overloaded: AtomicU64,
    dropped_by_verb: Mutex<BTreeMap<String, u64>>,
    write_type_counters: Mutex<BTreeMap<WriteType, WriteTypeCounters>>,
}

impl CoordinatorMetrics {
    pub fn increment_dropped(&self, verb: &str) {
        let mut map = self.dropped_by_verb.lock().unwrap();
        *map.entry(verb.to_string()).or_insert(0) += 1;
    }

    pub fn dropped_snapshot(&self) -> BTreeMap<String, u64> {
        self.dropped_by_verb.lock().unwrap().clone()
    }

    pub fn record_write_timeout(&self, write_type: WriteType) {
        self.write_type_counters.lock().unwrap().entry(write_type).or_default().timeouts += 1;
        if write_type == WriteType::Cas {
            self.cas_contention.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_write_failure(&self, write_type: WriteType) {
        self.write_type_counters.lock().unwrap().entry(write_type).or_default().failures += 1;
    }

    pub fn record_unavailable(&self, write_type: WriteType) {
        self.write_type_counters.lock().unwrap().entry(write_type).or_default().unavailable += 1;
    }

    pub fn write_type_snapshot(&self) -> BTreeMap<WriteType, WriteTypeCounters> {
        self.write_type_counters.lock().unwrap().clone()
    }
}

/// The fixed, versioned admin surface. Construct one per coordinator
/// process and thread it through every driver via `CoordinatorContext`
/// rather than reaching for a global.
pub struct AdminHandle {
    config: Mutex<Arc<CoordinatorConfig>>,
    metrics: Arc<CoordinatorMetrics>,
}

impl AdminHandle {
    pub fn new(config: CoordinatorConfig) -> AdminHandle {
        AdminHandle {
            config: Mutex::new(Arc::new(config)),
            metrics: Arc::new(CoordinatorMetrics::default()),
        }
    }

    pub fn config(&self) -> Arc<CoordinatorConfig> {
        self.config.lock().unwrap().clone()
    }

    pub fn metrics(&self) -> Arc<CoordinatorMetrics> {
        self.metrics.clone()
    }

    /// The single-writer config replace: a new, fully-built config value
    /// displaces the old `Arc` wholesale. Readers never block and never see
    /// a torn update.
    pub fn replace_config(&self, new_config: CoordinatorConfig) {
        info!(target: "submerge", "coordinator config updated");
        *self.config.lock().unwrap() = Arc::new(new_config);
    }

    pub fn set_hinted_handoff_enabled(&self, enabled: bool) {
        let mut next = (*self.config()).clone();
        next.hinted_handoff_enabled = enabled;
        self.replace_config(next);
    }

    pub fn set_max_hint_window(&self, window: Duration) {
        let mut next = (*self.config()).clone();
        next.max_hint_window = window;
        self.replace_config(next);
    }

    pub fn set_max_hints_in_progress(&self, max: u64) {
        let mut next = (*self.config()).clone();
        next.max_hints_in_progress = max;
        self.replace_config(next);
    }

    pub fn set_truncate_rpc_timeout(&self, timeout: Duration) {
        let mut next = (*self.config()).clone();
        next.truncate_rpc_timeout = timeout;
        self.replace_config(next);
    }

    pub fn set_cas_contention_timeout(&self, timeout: Duration) {
        let mut next = (*self.config()).clone();
        next.cas_contention_timeout = timeout;
        self.replace_config(next);
    }

    /// `describeSchemaVersions`: maps a schema version (rendered as a hex
    /// string) to the endpoints that reported it. Endpoints absent from
    /// `responses`, or present with `None`, are reported under the
    /// `"UNREACHABLE"` sentinel, matching hosts that did not respond within
    /// the RPC timeout.
    pub fn describe_schema_versions(
        &self,
        responses: &BTreeMap<NodeID, Option<[u8; 16]>>,
    ) -> BTreeMap<String, Vec<String>> {
        let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (endpoint, version) in responses {
            let key = match version {
                Some(v) => hex_encode(v),
                None => "UNREACHABLE".to_string(),
            };
            out.entry(key).or_default().push(format!("{:?}", endpoint));
        }
        for endpoints in out.values_mut() {
            endpoints.sort();
        }
        out
    }
}

fn hex_encode(bytes: &[u8; 16]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn replace_config_is_visible_to_new_readers() {
        let admin = AdminHandle::new(CoordinatorConfig::default());
        assert!(admin.config().hinted_handoff_enabled);
        admin.set_hinted_handoff_enabled(false);
        assert!(!admin.config().hinted_handoff_enabled);
    }

    #[test]
    fn describe_schema_versions_uses_unreachable_sentinel() {
        let admin = AdminHandle::new(CoordinatorConfig::default());
        let mut responses = BTreeMap::new();
        responses.insert(NodeID(1), Some([0u8; 16]));
        responses.insert(NodeID(2), None);
        let versions = admin.describe_schema_versions(&responses);
        assert_eq!(versions.get("UNREACHABLE").map(|v| v.len()), Some(1));
        assert_eq!(versions.len(), 2);
    }

    #[test]
    fn write_type_counters_are_tracked_independently() {
        let admin = AdminHandle::new(CoordinatorConfig::default());
        admin.metrics().record_write_timeout(WriteType::Cas);
        admin.metrics().record_write_timeout(WriteType::Simple);
        let snapshot = admin.metrics().write_type_snapshot();
        assert_eq!(snapshot[&WriteType::Cas].timeouts, 1);
        assert_eq!(snapshot[&WriteType::Simple].timeouts, 1);
        assert_eq!(admin.metrics().cas_contention.load(Ordering::Relaxed), 1);
    }
}
