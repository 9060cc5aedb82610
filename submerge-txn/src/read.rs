// Component E: the read executor. Per single-partition read: one data
// request plus blockFor-1 digest requests; on digest mismatch, a full
// CL=ALL re-read and asynchronous repair of whichever replicas were
// behind (§4.E).

use submerge_base::{ConsistencyLevel, Error, ErrorKind, Result};
use submerge_lang::{Path, Vals};
use submerge_net::{Duration, Mutation, NodeID, NodeTime, RealmTime, SpecificMsg};

use crate::collector::{Flavor, ResponseCollector};
use crate::context::CoordinatorContext;
use crate::endpoint::EndpointResolver;
use crate::external::RrOutcome;
use crate::reconcile::{self, Cell};

enum ReadReply {
    Data(Cell),
    Digest([u8; 32]),
}

/// A canonical digest over a cell, so the coordinator can compare a
/// digest reply against data it fetched itself. Real replicas compute
/// this from the storage engine; this crate computes the same function
/// so the comparison is meaningful for the in-memory testkit too.
pub fn digest_of(cell: &Cell) -> [u8; 32] {
    let bytes = rmp_serde::to_vec(cell).unwrap_or_default();
    let h = rapidhash::rapidhash(&bytes);
    let mut out = [0u8; 32];
    for (i, chunk) in out.chunks_mut(8).enumerate() {
        let salted = h.wrapping_add(i as u64).wrapping_mul(0x9E3779B97F4A7C15);
        chunk.copy_from_slice(&salted.to_le_bytes());
    }
    out
}

fn absent_cell(node: NodeID) -> Cell {
    (None, RealmTime { time: NodeTime(i64::MIN), node, event: 0 })
}

pub struct ReadExecutor<'a> {
    ctx: &'a CoordinatorContext,
    keyspace: String,
}

impl<'a> ReadExecutor<'a> {
    pub fn new(ctx: &'a CoordinatorContext, keyspace: impl Into<String>) -> ReadExecutor<'a> {
        ReadExecutor { ctx, keyspace: keyspace.into() }
    }

    fn resolver(&self) -> EndpointResolver<'a> {
        EndpointResolver::new(self.ctx)
    }

    fn send_read(&self, dest: NodeID, key: &Path, digest_only: bool, cl: ConsistencyLevel, timeout: Duration) -> Option<ReadReply> {
        if self.ctx.is_local(dest) {
            let cell = match self.ctx.storage.execute_local_read(key) {
                Ok(Some((v, ts))) => (Some(v), ts),
                Ok(None) => absent_cell(dest),
                Err(_) => return None,
            };
            return Some(if digest_only { ReadReply::Digest(digest_of(&cell)) } else { ReadReply::Data(cell) });
        }
        let msg = SpecificMsg::Read { key: key.clone(), digest_only, cl };
        match self.ctx.messaging.send_rr(dest, msg, timeout) {
            RrOutcome::Reply(SpecificMsg::ReadData { vals, timestamp }) => Some(ReadReply::Data((vals, timestamp))),
            RrOutcome::Reply(SpecificMsg::ReadDigest { digest }) => Some(ReadReply::Digest(digest)),
            RrOutcome::Reply(_) | RrOutcome::Failure | RrOutcome::Dropped => {
                self.ctx.admin.metrics().increment_dropped("READ");
                None
            }
        }
    }

    /// A single-partition read (§4.E, steps 1-3). `speculative_retry`
    /// matches the per-table configured retry: if the closest replica's
    /// data request fails, a further replica is tried as the new data
    /// source before giving up.
    pub fn read(&self, key: &Path, consistency: ConsistencyLevel, speculative_retry: bool) -> Result<Option<Vals>> {
        let resolver = self.resolver();
        let (natural, pending) = resolver.replicas_for_write(&self.keyspace, key);
        let mut targets = natural;
        for p in pending {
            if !targets.contains(&p) {
                targets.push(p);
            }
        }
        let sorted_alive = resolver.sorted_by_proximity(&resolver.filter_alive(&targets));

        let scope = if consistency.is_local() {
            targets.iter().filter(|e| self.ctx.is_local_dc(**e)).count()
        } else {
            targets.len()
        };
        let block_for = consistency.block_for(scope).max(1);

        if sorted_alive.len() < block_for {
            self.ctx.admin.metrics().record_unavailable(submerge_base::WriteType::Simple);
            return Err(Error::unavailable(block_for, sorted_alive.len()));
        }

        let mut contacted: Vec<NodeID> = sorted_alive.iter().take(block_for).copied().collect();
        let timeout = self.ctx.admin.config().read_rpc_timeout;
        let mut collector = ResponseCollector::new(contacted.clone(), consistency, block_for, Flavor::Read { data_present: false });
        let mut data_reply: Option<Cell> = None;
        let mut digest_replies: Vec<[u8; 32]> = Vec::new();

        for (i, &dest) in contacted.iter().enumerate() {
            match self.send_read(dest, key, i != 0, consistency, timeout) {
                Some(ReadReply::Data(cell)) => {
                    data_reply = Some(cell);
                    collector.on_response(dest);
                }
                Some(ReadReply::Digest(d)) => {
                    digest_replies.push(d);
                    collector.on_response(dest);
                }
                None => collector.on_failure(dest),
            }
        }

        // Speculative retry: the data replica itself failed; reach for
        // the next alive replica beyond the original blockFor as a new
        // data source before giving up.
        if data_reply.is_none() && speculative_retry {
            if let Some(&extra) = sorted_alive.get(block_for) {
                if let Some(ReadReply::Data(cell)) = self.send_read(extra, key, false, consistency, timeout) {
                    data_reply = Some(cell);
                    collector.on_response(extra);
                    contacted.push(extra);
                }
            }
        }

        if let Err(e) = collector.await_result() {
            return Err(rebuild_with_data_present(e, data_reply.is_some()));
        }

        let data_cell = match data_reply {
            Some(c) => c,
            None => {
                return Err(Error::read_timeout(collector.received_count(), block_for, false));
            }
        };

        if digest_replies.is_empty() {
            return Ok(data_cell.0);
        }

        let local_digest = digest_of(&data_cell);
        let mismatch = digest_replies.iter().any(|d| *d != local_digest);
        self.ctx.admin.metrics().read_repair_attempted.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if !mismatch {
            return Ok(data_cell.0);
        }

        self.repair(key, &contacted, timeout)
    }

    /// §4.E.3: full-data re-read at CL=ALL across the originally
    /// contacted replicas, then asynchronous repair of stragglers.
    fn repair(&self, key: &Path, contacted: &[NodeID], timeout: Duration) -> Result<Option<Vals>> {
        let mut responses: Vec<(NodeID, Cell)> = Vec::new();
        for &dest in contacted {
            if let Some(ReadReply::Data(cell)) = self.send_read(dest, key, false, ConsistencyLevel::All, timeout) {
                responses.push((dest, cell));
            }
        }
        let (winner_node, (vals, ts)) = match reconcile::reconcile_cell(responses.iter()) {
            Some((n, c)) => (*n, c.clone()),
            None => return Ok(None),
        };
        let _ = winner_node;

        let behind = reconcile::behind_replicas(responses.iter(), &ts);
        if !behind.is_empty() {
            let repair_mutation = Mutation { key: key.clone(), writes: vec![(key.clone(), vals.clone().unwrap_or(Vals::I64s(vec![]))) ], timestamp: ts, is_counter: false };
            for dest in behind {
                self.ctx.messaging.send_one_way(dest, SpecificMsg::Mutate { write_type: submerge_base::WriteType::Simple, mutation: repair_mutation.clone() });
            }
            self.ctx.admin.metrics().read_repair_repaired_background.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        Ok(vals)
    }

    /// Multi-partition convenience: reuses the single-partition path per
    /// key but caps the total rows returned across all partitions at
    /// `row_limit` (the group limit, §4.E).
    pub fn read_many(&self, keys: &[Path], row_limit: u64, consistency: ConsistencyLevel) -> Result<Vec<(Path, Vals)>> {
        let mut out = Vec::new();
        for key in keys {
            if out.len() as u64 >= row_limit {
                break;
            }
            if let Some(vals) = self.read(key, consistency, false)? {
                out.push((key.clone(), vals));
            }
        }
        Ok(out)
    }
}

fn rebuild_with_data_present(e: Error, data_present: bool) -> Error {
    match e.kind() {
        ErrorKind::WriteTimeout { received, block_for, .. } => Error::read_timeout(*received, *block_for, data_present),
        ErrorKind::WriteFailure { received, block_for, failures, .. } => Error::read_failure(*received, *block_for, *failures, data_present),
        _ => e,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testkit::InMemoryCluster;
    use crate::write::WriteDispatcher;
    use submerge_base::WriteType;
    use submerge_lang::{Bin, Word};
    use test_log::test;

    fn key(n: i64) -> Path {
        Path(vec![Word::from_bin_unchecked(Bin::new(n, 0))])
    }

    #[test]
    fn read_after_write_returns_value() {
        let cluster = InMemoryCluster::three_node_single_dc();
        let ctx = cluster.context_for(NodeID(0));
        let mutation = Mutation { key: key(7), writes: vec![(key(7), Vals::I64s(vec![42]))], timestamp: RealmTime { time: NodeTime(5), node: NodeID(0), event: 0 }, is_counter: false };
        WriteDispatcher::new(&ctx, "ks").dispatch(mutation, WriteType::Simple, ConsistencyLevel::Quorum, NodeTime(5)).unwrap();

        let executor = ReadExecutor::new(&ctx, "ks");
        let got = executor.read(&key(7), ConsistencyLevel::Quorum, false).unwrap();
        assert_eq!(got, Some(Vals::I64s(vec![42])));
    }

    #[test]
    fn read_repairs_a_stale_replica() {
        let cluster = InMemoryCluster::three_node_single_dc();
        let ctx0 = cluster.context_for(NodeID(0));
        let mutation_old = Mutation { key: key(9), writes: vec![(key(9), Vals::I64s(vec![1]))], timestamp: RealmTime { time: NodeTime(1), node: NodeID(0), event: 0 }, is_counter: false };
        WriteDispatcher::new(&ctx0, "ks").dispatch(mutation_old, WriteType::Simple, ConsistencyLevel::All, NodeTime(1)).unwrap();

        // Directly stamp a newer value onto one replica only, simulating
        // a write that reached only a minority.
        cluster.force_apply(NodeID(1), &Mutation { key: key(9), writes: vec![(key(9), Vals::I64s(vec![2]))], timestamp: RealmTime { time: NodeTime(2), node: NodeID(0), event: 0 }, is_counter: false });

        let executor = ReadExecutor::new(&ctx0, "ks");
        let got = executor.read(&key(9), ConsistencyLevel::Quorum, false).unwrap();
        assert_eq!(got, Some(Vals::I64s(vec![2])));
        assert_eq!(ctx0.admin.metrics().read_repair_repaired_background.load(std::sync::atomic::Ordering::Relaxed), 1);
    }
}
