// Component H: the atomic batch (logged batch) driver. Sync-writes the
// batch to two batchlog endpoints at CL=one, executes the underlying
// mutations through the Write Dispatcher at the caller's CL, then
// asynchronously deletes the batchlog entry at CL=any (§4.H).

use std::collections::BTreeMap;

use submerge_base::{ConsistencyLevel, Error, Result, WriteType};
use submerge_net::{Mutation, NodeID, NodeTime, SpecificMsg};

use crate::context::CoordinatorContext;
use crate::external::RrOutcome;
use crate::write::WriteDispatcher;

pub struct BatchlogDriver<'a> {
    ctx: &'a CoordinatorContext,
    keyspace: String,
}

impl<'a> BatchlogDriver<'a> {
    pub fn new(ctx: &'a CoordinatorContext, keyspace: impl Into<String>) -> BatchlogDriver<'a> {
        BatchlogDriver { ctx, keyspace: keyspace.into() }
    }

    /// Same DC, different rack preferred; falls back to two endpoints in
    /// the same rack, then to a single self-only entry when the local DC
    /// has just one alive node (§4.H step 1).
    fn select_batchlog_endpoints(&self) -> Vec<NodeID> {
        let topo = self.ctx.placement.topology();
        let empty = BTreeMap::new();
        let racks = topo.get(&self.ctx.local_dc).unwrap_or(&empty);

        let alive_in_rack: Vec<Vec<NodeID>> = racks
            .values()
            .map(|members| members.iter().copied().filter(|n| self.ctx.liveness.is_alive(*n)).collect::<Vec<_>>())
            .filter(|v| !v.is_empty())
            .collect();

        if alive_in_rack.len() >= 2 {
            return alive_in_rack.iter().take(2).map(|v| v[0]).collect();
        }
        if let Some(members) = alive_in_rack.first() {
            return members.iter().take(2).copied().collect();
        }
        Vec::new()
    }

    /// Drives one atomic batch of mutations through all four steps.
    /// `now.micros()` doubles as the batch identifier: this crate's
    /// deterministic, caller-supplied clock (§5) makes it unique enough
    /// per coordinator without a separate UUID generator.
    pub fn execute_atomic_batch(&self, mutations: Vec<Mutation>, consistency: ConsistencyLevel, now: NodeTime) -> Result<()> {
        let batch_id = now.micros();
        let endpoints = self.select_batchlog_endpoints();
        if endpoints.is_empty() {
            return Err(Error::unavailable(1, 0));
        }

        let timeout = self.ctx.admin.config().write_rpc_timeout;
        for &dest in &endpoints {
            let msg = SpecificMsg::BatchlogWrite { batch_id, mutations: mutations.clone() };
            match self.ctx.messaging.send_rr(dest, msg, timeout) {
                RrOutcome::Reply(SpecificMsg::Ack) => {}
                RrOutcome::Reply(_) | RrOutcome::Failure | RrOutcome::Dropped => {
                    return Err(Error::write_failure(WriteType::BatchLog, 0, endpoints.len(), 1));
                }
            }
        }

        let dispatcher = WriteDispatcher::new(self.ctx, self.keyspace.clone());
        for mutation in &mutations {
            dispatcher.dispatch(mutation.clone(), WriteType::Batch, consistency, now)?;
        }

        for &dest in &endpoints {
            self.ctx.messaging.send_one_way(dest, SpecificMsg::BatchlogRemove { batch_id });
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::read::ReadExecutor;
    use crate::testkit::InMemoryCluster;
    use submerge_lang::{Bin, Path, Vals, Word};
    use submerge_net::RealmTime;
    use test_log::test;

    fn key(n: i64) -> Path {
        Path(vec![Word::from_bin_unchecked(Bin::new(n, 0))])
    }

    #[test]
    fn atomic_batch_applies_mutations_and_clears_the_log() {
        let cluster = InMemoryCluster::three_node_single_dc();
        let ctx = cluster.context_for(NodeID(0));
        let driver = BatchlogDriver::new(&ctx, "ks");
        let mutation = Mutation {
            key: key(5),
            writes: vec![(key(5), Vals::I64s(vec![5]))],
            timestamp: RealmTime { time: NodeTime(1), node: NodeID(0), event: 0 },
            is_counter: false,
        };
        driver.execute_atomic_batch(vec![mutation], ConsistencyLevel::Quorum, NodeTime(1)).unwrap();

        let readback = ReadExecutor::new(&ctx, "ks").read(&key(5), ConsistencyLevel::Quorum, false).unwrap();
        assert_eq!(readback, Some(Vals::I64s(vec![5])));
    }

    #[test]
    fn atomic_batch_unavailable_when_local_dc_entirely_dead() {
        let cluster = InMemoryCluster::three_node_single_dc();
        let ctx = cluster.context_for(NodeID(0));
        cluster.kill(NodeID(0));
        cluster.kill(NodeID(1));
        cluster.kill(NodeID(2));
        let driver = BatchlogDriver::new(&ctx, "ks");
        let mutation = Mutation {
            key: key(6),
            writes: vec![(key(6), Vals::I64s(vec![6]))],
            timestamp: RealmTime { time: NodeTime(1), node: NodeID(0), event: 0 },
            is_counter: false,
        };
        let result = driver.execute_atomic_batch(vec![mutation], ConsistencyLevel::Quorum, NodeTime(1));
        assert!(matches!(result.unwrap_err().kind(), submerge_base::ErrorKind::Unavailable { .. }));
    }
}
