// Component D: the write dispatcher. Routes a mutation to local apply
// plus remote send, bundling each remote datacenter behind a single relay
// (§4.D) so cross-DC bandwidth never exceeds one message per DC per
// write (invariant 5 in spec §8).

use std::collections::BTreeMap;

use submerge_base::{ConsistencyLevel, Error, Result, WriteType};
use submerge_net::{Duration, Mutation, NodeID, NodeTime, SpecificMsg};

use crate::collector::{Flavor, ResponseCollector};
use crate::context::CoordinatorContext;
use crate::endpoint::EndpointResolver;
use crate::external::RrOutcome;
use crate::hints::HintSubmitter;

/// §9: a tagged variant in place of a virtual-dispatch write-performer
/// hierarchy.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PerformerKind {
    Standard,
    CounterLocal,
    CounterOnCoordinator,
}

pub struct WriteDispatcher<'a> {
    ctx: &'a CoordinatorContext,
    keyspace: String,
}

impl<'a> WriteDispatcher<'a> {
    pub fn new(ctx: &'a CoordinatorContext, keyspace: impl Into<String>) -> WriteDispatcher<'a> {
        WriteDispatcher { ctx, keyspace: keyspace.into() }
    }

    fn resolver(&self) -> EndpointResolver<'a> {
        EndpointResolver::new(self.ctx)
    }

    pub fn classify(&self, mutation: &Mutation) -> PerformerKind {
        if !mutation.is_counter() {
            return PerformerKind::Standard;
        }
        let (natural, pending) = self.resolver().replicas_for_write(&self.keyspace, &mutation.key);
        if natural.contains(&self.ctx.local_node) || pending.contains(&self.ctx.local_node) {
            PerformerKind::CounterLocal
        } else {
            PerformerKind::CounterOnCoordinator
        }
    }

    pub fn dispatch(&self, mutation: Mutation, write_type: WriteType, consistency: ConsistencyLevel, now: NodeTime) -> Result<()> {
        match self.classify(&mutation) {
            PerformerKind::Standard => self.dispatch_standard(mutation, write_type, consistency, now),
            PerformerKind::CounterLocal => self.dispatch_counter_local(mutation, consistency, now),
            PerformerKind::CounterOnCoordinator => self.dispatch_counter_forward(mutation, consistency),
        }
    }

    fn block_for(&self, consistency: ConsistencyLevel, targets: &[NodeID]) -> usize {
        if consistency.is_any() {
            return 1;
        }
        let scope = if consistency.is_local() {
            targets.iter().filter(|e| self.ctx.is_local_dc(**e)).count()
        } else {
            targets.len()
        };
        consistency.block_for(scope)
    }

    /// The common path: every write type other than the counter forms,
    /// and every mutation within an unlogged batch (logged/atomic batches
    /// go through the Batchlog Driver instead, §4.H).
    pub fn dispatch_standard(&self, mutation: Mutation, write_type: WriteType, consistency: ConsistencyLevel, now: NodeTime) -> Result<()> {
        let resolver = self.resolver();
        let (natural, pending) = resolver.replicas_for_write(&self.keyspace, &mutation.key);
        let mut targets = natural;
        for p in pending {
            if !targets.contains(&p) {
                targets.push(p);
            }
        }

        let block_for = self.block_for(consistency, &targets);
        let mut collector = ResponseCollector::new(targets.clone(), consistency, block_for, Flavor::Write(write_type));

        let live = self.ctx.liveness.live_members();
        if let Err(e) = collector.assure_sufficient_live_nodes(&live) {
            self.ctx.admin.metrics().record_unavailable(write_type);
            return Err(e);
        }

        let timeout = self.ctx.admin.config().rpc_timeout_for(write_type);
        let hinter = HintSubmitter::new(self.ctx);
        let mut remote_bundles: BTreeMap<String, Vec<NodeID>> = BTreeMap::new();

        for &dest in &targets {
            if self.ctx.is_local(dest) {
                match self.ctx.storage.apply(&mutation) {
                    Ok(()) => collector.on_response(dest),
                    Err(_) => collector.on_failure(dest),
                }
                continue;
            }
            if !self.ctx.liveness.is_alive(dest) {
                self.hint_or_drop(&hinter, &mutation, dest, consistency, now, &mut collector);
                continue;
            }
            if self.ctx.is_local_dc(dest) {
                self.send_one(dest, write_type, &mutation, timeout, &mut collector);
            } else {
                remote_bundles.entry(self.ctx.snitch.datacenter(dest)).or_default().push(dest);
            }
        }

        for (_dc, members) in remote_bundles {
            self.send_dc_bundle(members, write_type, &mutation, timeout, &mut collector);
        }

        let result = collector.await_result();
        self.record_outcome(write_type, &result);
        result
    }

    fn hint_or_drop(
        &self,
        hinter: &HintSubmitter<'_>,
        mutation: &Mutation,
        dest: NodeID,
        consistency: ConsistencyLevel,
        now: NodeTime,
        collector: &mut ResponseCollector,
    ) {
        if hinter.should_hint(dest) {
            if hinter.submit_hint(mutation, dest, now).unwrap_or(false) && consistency.is_any() {
                collector.on_response(dest);
            }
        }
        // Otherwise dropped silently: the collector will time out if
        // quorum cannot be reached without this destination (§4.D).
    }

    fn send_one(&self, dest: NodeID, write_type: WriteType, mutation: &Mutation, timeout: Duration, collector: &mut ResponseCollector) {
        let msg = SpecificMsg::Mutate { write_type, mutation: mutation.clone() };
        match self.ctx.messaging.send_rr(dest, msg, timeout) {
            RrOutcome::Reply(SpecificMsg::Ack) => collector.on_response(dest),
            RrOutcome::Reply(_) => collector.on_failure(dest),
            RrOutcome::Failure => collector.on_failure(dest),
            RrOutcome::Dropped => {
                self.ctx.admin.metrics().increment_dropped("MUTATE");
            }
        }
    }

    /// Picks a relay for a remote-DC bundle and attaches the remaining
    /// `members` as the forwarding header (one message per DC, per
    /// invariant 5 in spec §8).
    fn send_dc_bundle(&self, members: Vec<NodeID>, write_type: WriteType, mutation: &Mutation, timeout: Duration, collector: &mut ResponseCollector) {
        let mut members = members;
        let relay = members.remove(0);
        let msg = SpecificMsg::ForwardedMutate { write_type, mutation: mutation.clone(), forward_to: members.clone() };
        match self.ctx.messaging.send_rr(relay, msg, timeout) {
            RrOutcome::Reply(SpecificMsg::ForwardAck { acked }) => {
                for n in acked {
                    collector.on_response(n);
                }
            }
            RrOutcome::Reply(_) => collector.on_failure(relay),
            RrOutcome::Failure => collector.on_failure(relay),
            RrOutcome::Dropped => {
                self.ctx.admin.metrics().increment_dropped("MUTATE");
            }
        }
    }

    fn record_outcome(&self, write_type: WriteType, result: &Result<()>) {
        if let Err(e) = result {
            match e.kind() {
                submerge_base::ErrorKind::WriteTimeout { .. } => self.ctx.admin.metrics().record_write_timeout(write_type),
                submerge_base::ErrorKind::WriteFailure { .. } => self.ctx.admin.metrics().record_write_failure(write_type),
                _ => {}
            }
        }
    }

    /// Coordinator is itself a replica: apply locally, then forward the
    /// post-apply result to the remaining replicas as a plain write.
    /// Counter mutations are never hinted (§4.D; the conflicting-behavior
    /// open question in §9 is resolved literally in this implementation,
    /// see DESIGN.md).
    fn dispatch_counter_local(&self, mutation: Mutation, consistency: ConsistencyLevel, _now: NodeTime) -> Result<()> {
        self.ctx.storage.apply(&mutation)?;
        let (read_back, _ts) = self.ctx.storage.execute_local_read(&mutation.key)?.ok_or_else(|| {
            Error::invalid_request("counter mutation applied but produced no local row")
        })?;
        let forward = Mutation { key: mutation.key.clone(), writes: vec![(mutation.key.clone(), read_back)], timestamp: mutation.timestamp, is_counter: false };

        let resolver = self.resolver();
        let (natural, pending) = resolver.replicas_for_write(&self.keyspace, &mutation.key);
        let mut targets: Vec<NodeID> = natural.into_iter().chain(pending).filter(|n| !self.ctx.is_local(*n)).collect();
        targets.dedup();

        let block_for = self.block_for(consistency, &targets).saturating_sub(1);
        let mut collector = ResponseCollector::new(targets.clone(), consistency, block_for, Flavor::Write(WriteType::Counter));
        let timeout = self.ctx.admin.config().counter_write_rpc_timeout;
        for dest in targets {
            if self.ctx.liveness.is_alive(dest) {
                self.send_one(dest, WriteType::Counter, &forward, timeout, &mut collector);
            }
            // not alive: dropped, never hinted for counters (see above).
        }
        collector.await_result()
    }

    /// Coordinator is not a replica: forward the raw counter mutation to
    /// a chosen leader and await its acknowledgement.
    fn dispatch_counter_forward(&self, mutation: Mutation, consistency: ConsistencyLevel) -> Result<()> {
        let resolver = self.resolver();
        let (natural, _pending) = resolver.replicas_for_write(&self.keyspace, &mutation.key);
        let local_candidates = resolver.restrict_to_local_dc(&natural);
        let alive_local: Vec<NodeID> = resolver.filter_alive(&local_candidates);
        let leader = if !alive_local.is_empty() {
            alive_local[rand::random::<usize>() % alive_local.len()]
        } else {
            let sorted = resolver.sorted_by_proximity(&natural);
            *resolver.filter_alive(&sorted).first().ok_or_else(|| Error::unavailable(1, 0))?
        };

        let mut collector = ResponseCollector::new(vec![leader], consistency, 1, Flavor::Write(WriteType::Counter));
        let timeout = self.ctx.admin.config().counter_write_rpc_timeout;
        self.send_one(leader, WriteType::Counter, &mutation, timeout, &mut collector);
        let result = collector.await_result();
        self.record_outcome(WriteType::Counter, &result);
        result
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::external::StorageEngine;
    use crate::testkit::InMemoryCluster;
    use submerge_lang::{Bin, Path, Vals, Word};
    use submerge_net::RealmTime;
    use test_log::test;

    fn key(n: i64) -> Path {
        Path(vec![Word::from_bin_unchecked(Bin::new(n, 0))])
    }

    fn mutation(n: i64) -> Mutation {
        Mutation {
            key: key(n),
            writes: vec![(key(n), Vals::I64s(vec![n]))],
            timestamp: RealmTime { time: NodeTime(1), node: NodeID(0), event: 0 },
            is_counter: false,
        }
    }

    fn counter_mutation(n: i64) -> Mutation {
        Mutation { is_counter: true, ..mutation(n) }
    }

    #[test]
    fn quorum_write_succeeds_with_one_dead_replica_and_records_a_hint() {
        let cluster = InMemoryCluster::three_node_single_dc();
        let ctx = cluster.context_for(NodeID(0));
        cluster.kill(NodeID(2));
        let dispatcher = WriteDispatcher::new(&ctx, "ks");
        let result = dispatcher.dispatch(mutation(1), WriteType::Simple, ConsistencyLevel::Quorum, NodeTime(0));
        assert!(result.is_ok(), "{result:?}");
        assert_eq!(ctx.admin.metrics().total_hints.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn quorum_write_unavailable_with_two_dead_replicas() {
        let cluster = InMemoryCluster::three_node_single_dc();
        let ctx = cluster.context_for(NodeID(0));
        cluster.kill(NodeID(1));
        cluster.kill(NodeID(2));
        let dispatcher = WriteDispatcher::new(&ctx, "ks");
        let result = dispatcher.dispatch(mutation(1), WriteType::Simple, ConsistencyLevel::Quorum, NodeTime(0));
        assert!(matches!(result.unwrap_err().kind(), submerge_base::ErrorKind::Unavailable { .. }));
    }

    #[test]
    fn counter_write_classifies_local_when_coordinator_is_a_replica() {
        let cluster = InMemoryCluster::three_node_single_dc();
        let ctx = cluster.context_for(NodeID(0));
        let dispatcher = WriteDispatcher::new(&ctx, "ks");
        // RF == node count here, so every node is a replica of every key.
        assert_eq!(dispatcher.classify(&counter_mutation(1)), PerformerKind::CounterLocal);
    }

    #[test]
    fn counter_write_applies_locally_and_forwards_the_post_apply_result() {
        let cluster = InMemoryCluster::three_node_single_dc();
        let ctx = cluster.context_for(NodeID(0));
        let dispatcher = WriteDispatcher::new(&ctx, "ks");
        let result = dispatcher.dispatch(counter_mutation(1), WriteType::Counter, ConsistencyLevel::Quorum, NodeTime(1));
        assert!(result.is_ok(), "{result:?}");
        let readback = ctx.storage.execute_local_read(&key(1)).unwrap();
        assert_eq!(readback.map(|(v, _)| v), Some(Vals::I64s(vec![1])));
    }

    /// §4.D / §9: when the coordinator is not itself a replica, a counter
    /// mutation is forwarded whole to a chosen leader rather than applied
    /// locally first. This exercises `PerformerKind::CounterOnCoordinator`,
    /// which `classify` can only reach when `Mutation::is_counter` is a
    /// real, caller-set marker.
    #[test]
    fn counter_write_forwards_to_a_leader_when_coordinator_is_not_a_replica() {
        let cluster = InMemoryCluster::new(5, 3);
        let ctx = cluster.context_for(NodeID(0));
        let dispatcher = WriteDispatcher::new(&ctx, "ks");

        let n = (0..500)
            .find(|&n| dispatcher.classify(&counter_mutation(n)) == PerformerKind::CounterOnCoordinator)
            .expect("some key routes away from node 0 at rf=3 of 5 nodes");

        let mutation = counter_mutation(n);
        let result = dispatcher.dispatch(mutation.clone(), WriteType::Counter, ConsistencyLevel::One, NodeTime(1));
        assert!(result.is_ok(), "{result:?}");

        // Node 0 is not a replica for this key, so the coordinator's own
        // storage must be untouched; the mutation went to a leader instead.
        let local = ctx.storage.execute_local_read(&mutation.key).unwrap();
        assert!(local.is_none());
    }
}
