// Component C: backpressured hint submission. `HintBacklog` is the
// per-endpoint half of the `totalHintsInProgress` invariant (§3: "sum(per
// endpoint) = global"); the global half is `CoordinatorMetrics`'s own
// `total_hints_in_progress` atomic, bumped in lock-step so the invariant
// holds outside of the single increment/decrement window each submission
// opens.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use submerge_admin::CoordinatorMetrics;
use submerge_base::{Error, Result};
use submerge_net::{Mutation, NodeID, NodeTime};

use crate::context::CoordinatorContext;

#[derive(Default)]
pub struct HintBacklog {
    per_endpoint: Mutex<BTreeMap<NodeID, u64>>,
}

impl HintBacklog {
    fn increment(&self, endpoint: NodeID, metrics: &CoordinatorMetrics) {
        metrics.total_hints_in_progress.fetch_add(1, Ordering::Relaxed);
        *self.per_endpoint.lock().unwrap().entry(endpoint).or_insert(0) += 1;
    }

    fn decrement(&self, endpoint: NodeID, metrics: &CoordinatorMetrics) {
        metrics.total_hints_in_progress.fetch_sub(1, Ordering::Relaxed);
        let mut map = self.per_endpoint.lock().unwrap();
        if let Some(count) = map.get_mut(&endpoint) {
            *count -= 1;
            if *count == 0 {
                map.remove(&endpoint);
            }
        }
    }

    pub fn in_progress_for(&self, endpoint: NodeID) -> u64 {
        *self.per_endpoint.lock().unwrap().get(&endpoint).unwrap_or(&0)
    }

    pub fn sum_per_endpoint(&self) -> u64 {
        self.per_endpoint.lock().unwrap().values().sum()
    }
}

pub struct HintSubmitter<'a> {
    ctx: &'a CoordinatorContext,
}

impl<'a> HintSubmitter<'a> {
    pub fn new(ctx: &'a CoordinatorContext) -> HintSubmitter<'a> {
        HintSubmitter { ctx }
    }

    /// `shouldHint(endpoint)`, §4.C.
    pub fn should_hint(&self, endpoint: NodeID) -> bool {
        let cfg = self.ctx.admin.config();
        if !cfg.hinted_handoff_enabled {
            return false;
        }
        if cfg.hinted_handoff_disabled_dcs.contains(&self.ctx.snitch.datacenter(endpoint)) {
            return false;
        }
        if self.ctx.liveness.downtime(endpoint).as_micros() > cfg.max_hint_window.as_micros() {
            return false;
        }
        true
    }

    /// Admits, computes a TTL, and (if the TTL is positive) writes the
    /// hint. Returns `Ok(true)` if a hint was actually written, `Ok(false)`
    /// if it was silently skipped because the TTL had already elapsed
    /// (never an error, §4.C), and `Err(Overloaded)` if the backpressure
    /// cap is breached.
    pub fn submit_hint(&self, mutation: &Mutation, endpoint: NodeID, now: NodeTime) -> Result<bool> {
        let cfg = self.ctx.admin.config();
        let metrics = self.ctx.admin.metrics();
        if metrics.total_hints_in_progress.load(Ordering::Relaxed) >= cfg.max_hints_in_progress {
            metrics.overloaded.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(target: "submerge", endpoint = ?endpoint, "hint backpressure cap breached");
            return Err(Error::overloaded());
        }

        let ttl = self.ctx.hint_store.calculate_hint_ttl(mutation);
        if ttl.as_micros() <= 0 {
            tracing::debug!(target: "submerge", endpoint = ?endpoint, "hint ttl already elapsed, skipping");
            return Ok(false);
        }

        let host_id = self.ctx.placement.host_id(endpoint);
        self.ctx.hint_backlog.increment(endpoint, &metrics);
        let result = self.ctx.hint_store.hint_for(mutation, now, ttl, host_id);
        self.ctx.hint_backlog.decrement(endpoint, &metrics);
        result?;

        metrics.total_hints.fetch_add(1, Ordering::Relaxed);
        tracing::info!(target: "submerge", endpoint = ?endpoint, "hint submitted");
        Ok(true)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testkit::InMemoryCluster;
    use submerge_lang::Path;
    use test_log::test;

    fn mutation() -> Mutation {
        Mutation {
            key: Path(vec![]),
            writes: vec![],
            timestamp: submerge_net::RealmTime { time: NodeTime(0), node: NodeID(0), event: 0 },
            is_counter: false,
        }
    }

    #[test]
    fn should_hint_false_when_disabled() {
        let cluster = InMemoryCluster::three_node_single_dc();
        let ctx = cluster.context_for(NodeID(0));
        ctx.admin.set_hinted_handoff_enabled(false);
        let submitter = HintSubmitter::new(&ctx);
        assert!(!submitter.should_hint(NodeID(1)));
    }

    #[test]
    fn should_hint_false_past_max_window() {
        let cluster = InMemoryCluster::three_node_single_dc();
        let ctx = cluster.context_for(NodeID(0));
        cluster.set_downtime(NodeID(1), submerge_net::Duration::from_millis(4 * 60 * 60 * 1000));
        let submitter = HintSubmitter::new(&ctx);
        assert!(!submitter.should_hint(NodeID(1)));
    }

    #[test]
    fn submit_hint_bumps_and_releases_counters() {
        let cluster = InMemoryCluster::three_node_single_dc();
        let ctx = cluster.context_for(NodeID(0));
        let submitter = HintSubmitter::new(&ctx);
        let m = mutation();
        let hinted = submitter.submit_hint(&m, NodeID(1), NodeTime(0)).unwrap();
        assert!(hinted);
        assert_eq!(ctx.hint_backlog.in_progress_for(NodeID(1)), 0);
        assert_eq!(ctx.admin.metrics().total_hints.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn submit_hint_overloaded_when_cap_breached() {
        let cluster = InMemoryCluster::three_node_single_dc();
        let ctx = cluster.context_for(NodeID(0));
        ctx.admin.set_max_hints_in_progress(0);
        let submitter = HintSubmitter::new(&ctx);
        let m = mutation();
        assert!(submitter.submit_hint(&m, NodeID(1), NodeTime(0)).is_err());
    }
}
