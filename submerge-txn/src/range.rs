// Component F: the range scan driver.
//
// Splitting and merging operate over the token ring (the placement
// oracle's contract, §6); the wire-level `RangeBounds` a sub-request
// carries stays Path-denominated throughout, since this workspace's
// storage engine contract (§6) keys rows by partition path, not token,
// and a replica only ever physically holds keys the placement oracle
// actually assigned it, so every split's network request can safely
// carry the caller's full requested bounds and let the contacted
// replica's own holdings do the token-range filtering implicitly. A
// production embedding whose storage engine multiplexes multiple token
// ranges per replica would need to also narrow `RangeBounds` per split;
// that conversion lives on the far side of the `StorageEngine` trait.

use submerge_base::{ConsistencyLevel, Error, Result};
use submerge_lang::{Path, Vals};
use submerge_net::{NodeID, RangeBounds, RealmTime, SpecificMsg};

use crate::context::CoordinatorContext;
use crate::endpoint::EndpointResolver;
use crate::external::{RrOutcome, Token};
use crate::reconcile;

struct QueryRange {
    bounds: RangeBounds,
    owners: Vec<NodeID>,
}

struct MergedRange {
    bounds: RangeBounds,
    live_owners: Vec<NodeID>,
}

fn intersect(a: &[NodeID], b: &[NodeID]) -> Vec<NodeID> {
    a.iter().copied().filter(|x| b.contains(x)).collect()
}

/// `c0 = ceil(limit / (resultsPerRange * (1 - margin)))`, clamped to
/// `[1, rangeCount]` (§4.F.3).
pub fn initial_concurrency(limit: u64, results_per_range: f64, margin: f64, range_count: usize) -> usize {
    if range_count == 0 {
        return 0;
    }
    if results_per_range <= 0.0 {
        return range_count;
    }
    let c0 = (limit as f64 / (results_per_range * (1.0 - margin))).ceil();
    (c0 as usize).clamp(1, range_count)
}

/// `max(1, min(remainingRanges, ceil(remainingRows / rowsPerRange)))`; a
/// zero-row batch queries everything that is left in one shot (§4.F.3).
pub fn next_concurrency(remaining_ranges: usize, remaining_rows: u64, rows_per_range: f64) -> usize {
    if remaining_ranges == 0 {
        return 0;
    }
    if rows_per_range <= 0.0 {
        return remaining_ranges;
    }
    let c = (remaining_rows as f64 / rows_per_range).ceil() as usize;
    c.max(1).min(remaining_ranges)
}

pub struct RangeScanDriver<'a> {
    ctx: &'a CoordinatorContext,
    keyspace: String,
}

impl<'a> RangeScanDriver<'a> {
    pub fn new(ctx: &'a CoordinatorContext, keyspace: impl Into<String>) -> RangeScanDriver<'a> {
        RangeScanDriver { ctx, keyspace: keyspace.into() }
    }

    fn resolver(&self) -> EndpointResolver<'a> {
        EndpointResolver::new(self.ctx)
    }

    /// §4.F.1: one piece per ring boundary, in ascending token order. The
    /// vector is never treated as circular by the merge pass below, which
    /// is exactly what keeps a merge from ever crossing the wrap point.
    fn split(&self, bounds: &RangeBounds) -> Vec<QueryRange> {
        let boundaries: Vec<Token> = self.ctx.placement.sorted_tokens(&self.keyspace);
        if boundaries.is_empty() {
            let owners = self.ctx.placement.natural_endpoints(&self.keyspace, Token(0));
            return vec![QueryRange { bounds: bounds.clone(), owners }];
        }
        boundaries
            .iter()
            .map(|&token| {
                let owners = self.ctx.placement.natural_endpoints(&self.keyspace, token);
                QueryRange { bounds: bounds.clone(), owners }
            })
            .collect()
    }

    /// §4.F.2: merge consecutive pieces when their live, filtered
    /// endpoint intersection still meets `blockFor` and the snitch judges
    /// the merge worthwhile.
    fn merge(&self, pieces: Vec<QueryRange>, consistency: ConsistencyLevel) -> Vec<MergedRange> {
        let resolver = self.resolver();
        let mut out: Vec<MergedRange> = Vec::new();
        for piece in pieces {
            let live = resolver.filter_alive(&piece.owners);
            let merge_target = out.last().map(|prev: &MergedRange| {
                let merged_live = intersect(&prev.live_owners, &live);
                let block_for = consistency.block_for(piece.owners.len().max(prev.live_owners.len()));
                merged_live.len() >= block_for && self.ctx.snitch.is_worth_merging_for_range_query(&merged_live, &prev.live_owners, &live)
            });
            match merge_target {
                Some(true) => {
                    let prev = out.last_mut().unwrap();
                    prev.live_owners = intersect(&prev.live_owners, &live);
                }
                _ => out.push(MergedRange { bounds: piece.bounds, live_owners: live }),
            }
        }
        out
    }

    /// One range's worth of rows, up to `limit`, with a bound on how many
    /// follow-up rounds a single call will issue (§4.F.4 bolts this onto
    /// the per-range fetch; it must still terminate against a replica
    /// that keeps reporting a full page or keeps dropping the request).
    const MAX_SHORT_READ_ROUNDS: usize = 4;

    fn execute_range(&self, range: &MergedRange, limit: u64) -> Result<Vec<(Path, Vals, RealmTime)>> {
        if range.live_owners.is_empty() {
            return Err(Error::unavailable(1, 0));
        }
        let timeout = self.ctx.admin.config().range_rpc_timeout;
        let mut reconciled: Vec<(Path, Vals, RealmTime)> = Vec::new();
        let mut lower_exclusive: Option<Path> = None;

        for _round in 0..Self::MAX_SHORT_READ_ROUNDS {
            let want = limit.saturating_sub(reconciled.len() as u64);
            if want == 0 {
                break;
            }
            let mut per_replica: Vec<(NodeID, Vec<(Path, Vals, RealmTime)>)> = Vec::new();
            // A reply capped at `want`, or a reply we never got at all, both
            // mean a live owner might be holding data we haven't seen yet;
            // the follow-up resumes past the last reconciled key rather than
            // starting the range over.
            let mut more_may_remain = false;
            for &dest in &range.live_owners {
                if self.ctx.is_local(dest) {
                    match self.ctx.storage.execute_local_range(&range.bounds, want, lower_exclusive.as_ref()) {
                        Ok(rows) => {
                            if rows.len() as u64 >= want {
                                more_may_remain = true;
                            }
                            per_replica.push((dest, rows));
                        }
                        Err(_) => more_may_remain = true,
                    }
                    continue;
                }
                let msg = SpecificMsg::RangeRead { bounds: range.bounds.clone(), row_limit: want, lower_exclusive: lower_exclusive.clone() };
                match self.ctx.messaging.send_rr(dest, msg, timeout) {
                    RrOutcome::Reply(SpecificMsg::RangeData { rows }) => {
                        if rows.len() as u64 >= want {
                            more_may_remain = true;
                        }
                        per_replica.push((dest, rows));
                    }
                    RrOutcome::Reply(_) => {}
                    RrOutcome::Failure | RrOutcome::Dropped => {
                        self.ctx.admin.metrics().increment_dropped("RANGE_READ");
                        more_may_remain = true;
                    }
                }
            }

            if per_replica.is_empty() {
                if reconciled.is_empty() {
                    return Err(Error::read_timeout(0, 1, false));
                }
                break;
            }

            let batch = reconcile::reconcile_rows(per_replica);
            let batch_max = batch.iter().map(|(k, _, _)| k.clone()).max();
            reconciled.extend(batch);

            if (reconciled.len() as u64) >= limit || !more_may_remain {
                break;
            }
            // `batch_max` is `None` only when this round's replies (all
            // from live owners we haven't yet heard from) were empty;
            // keep the previous bound rather than re-scanning from the
            // start of the range.
            if let Some(max) = batch_max {
                lower_exclusive = Some(max);
            }
        }
        Ok(reconciled)
    }

    /// Drives the full scan: split, merge, then adaptively-concurrent
    /// per-range execution until `row_limit` rows have been gathered or
    /// every range has been queried (§4.F).
    pub fn scan(&self, bounds: RangeBounds, row_limit: u64, consistency: ConsistencyLevel) -> Result<Vec<(Path, Vals)>> {
        let pieces = self.split(&bounds);
        let mut remaining = self.merge(pieces, consistency);
        let mut out: Vec<(Path, Vals, RealmTime)> = Vec::new();

        const MARGIN: f64 = 0.1;
        let mut results_per_range_estimate = row_limit as f64 / remaining.len().max(1) as f64;
        let mut concurrency = initial_concurrency(row_limit, results_per_range_estimate, MARGIN, remaining.len());

        while !remaining.is_empty() && (out.len() as u64) < row_limit {
            let batch_size = concurrency.max(1).min(remaining.len());
            let batch: Vec<MergedRange> = remaining.drain(0..batch_size).collect();
            let ranges_queried = batch.len();
            let mut live_returned: u64 = 0;

            for range in &batch {
                let want = row_limit.saturating_sub(out.len() as u64);
                if want == 0 {
                    break;
                }
                let rows = self.execute_range(range, want)?;
                live_returned += rows.len() as u64;
                out.extend(rows);
            }

            if (out.len() as u64) >= row_limit || remaining.is_empty() {
                break;
            }

            let rows_per_range = live_returned as f64 / ranges_queried.max(1) as f64;
            results_per_range_estimate = rows_per_range;
            concurrency = next_concurrency(remaining.len(), row_limit.saturating_sub(out.len() as u64), rows_per_range);
        }
        let _ = results_per_range_estimate;

        out.sort_by(|a, b| a.0.cmp(&b.0));
        out.truncate(row_limit as usize);
        Ok(out.into_iter().map(|(k, v, _)| (k, v)).collect())
    }
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use super::*;
    use crate::context::CoordinatorContext;
    use crate::external::Messaging;
    use crate::testkit::InMemoryCluster;
    use crate::write::WriteDispatcher;
    use submerge_base::WriteType;
    use submerge_lang::{Bin, Word};
    use submerge_net::{Duration, NodeTime};
    use test_log::test;

    fn key(n: i64) -> Path {
        Path(vec![Word::from_bin_unchecked(Bin::new(n, 0))])
    }

    /// Drops the first `send_rr` aimed at `target`, then delegates
    /// normally (a transient per-RPC failure, not a dead node).
    struct FlakyOnce {
        inner: std::sync::Arc<dyn Messaging>,
        target: NodeID,
        burned: Mutex<bool>,
    }

    impl Messaging for FlakyOnce {
        fn send_one_way(&self, to: NodeID, msg: SpecificMsg) {
            self.inner.send_one_way(to, msg)
        }

        fn send_rr(&self, to: NodeID, msg: SpecificMsg, timeout: Duration) -> RrOutcome {
            if to == self.target {
                let mut burned = self.burned.lock().unwrap();
                if !*burned {
                    *burned = true;
                    return RrOutcome::Dropped;
                }
            }
            self.inner.send_rr(to, msg, timeout)
        }

        fn get_version(&self, endpoint: NodeID) -> u32 {
            self.inner.get_version(endpoint)
        }
    }

    fn full_bounds() -> RangeBounds {
        RangeBounds { start_inclusive: key(i64::MIN), end_exclusive: None }
    }

    #[test]
    fn full_replication_collapses_to_a_single_merged_range() {
        let cluster = InMemoryCluster::three_node_single_dc();
        let ctx = cluster.context_for(NodeID(0));
        let driver = RangeScanDriver::new(&ctx, "ks");
        let pieces = driver.split(&full_bounds());
        let merged = driver.merge(pieces, ConsistencyLevel::Quorum);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn partial_overlap_topology_does_not_merge() {
        let cluster = InMemoryCluster::new(5, 3);
        let ctx = cluster.context_for(NodeID(0));
        let driver = RangeScanDriver::new(&ctx, "ks");
        let pieces = driver.split(&full_bounds());
        let merged = driver.merge(pieces, ConsistencyLevel::Quorum);
        assert_eq!(merged.len(), 5);
    }

    #[test]
    fn scan_returns_written_rows_in_key_order() {
        let cluster = InMemoryCluster::three_node_single_dc();
        let ctx = cluster.context_for(NodeID(0));
        let dispatcher = WriteDispatcher::new(&ctx, "ks");
        for n in [3, 1, 2] {
            let mutation = submerge_net::Mutation {
                key: key(n),
                writes: vec![(key(n), Vals::I64s(vec![n]))],
                timestamp: RealmTime { time: NodeTime(n), node: NodeID(0), event: 0 },
                is_counter: false,
            };
            dispatcher.dispatch(mutation, WriteType::Simple, ConsistencyLevel::Quorum, NodeTime(n)).unwrap();
        }

        let driver = RangeScanDriver::new(&ctx, "ks");
        let rows = driver.scan(full_bounds(), 10, ConsistencyLevel::Quorum).unwrap();
        let keys: Vec<i64> = rows.iter().map(|(k, _)| k.0[0].as_bin().block()).collect();
        assert_eq!(keys, vec![1, 2, 3]);
    }

    #[test]
    fn concurrency_formulas_clamp_to_range_count() {
        assert_eq!(initial_concurrency(100, 10.0, 0.1, 3), 3);
        assert_eq!(initial_concurrency(5, 10.0, 0.1, 20), 1);
        assert_eq!(next_concurrency(10, 0, 5.0), 1);
        assert_eq!(next_concurrency(10, 50, 0.0), 10);
    }

    /// §4.F.4: a dropped reply from one live owner leaves the first round
    /// short of `row_limit` even though the cluster holds enough rows; the
    /// follow-up round, resumed past the last reconciled key, recovers it.
    #[test]
    fn short_read_follow_up_recovers_rows_a_dropped_reply_withheld() {
        let cluster = InMemoryCluster::three_node_single_dc();
        let base_ctx = cluster.context_for(NodeID(0));

        // Seed each node with a disjoint slice directly (bypassing
        // messaging), so the three nodes are not full replicas of one
        // another and losing one node's reply genuinely loses rows.
        let seed = |node: NodeID, ns: &[i64]| {
            let writes = ns.iter().map(|&n| (key(n), Vals::I64s(vec![n]))).collect();
            cluster.force_apply(node, &submerge_net::Mutation { key: key(ns[0]), writes, timestamp: RealmTime { time: NodeTime(1), node: NodeID(0), event: 0 }, is_counter: false });
        };
        seed(NodeID(0), &[1, 2]);
        seed(NodeID(1), &[3, 4]);
        seed(NodeID(2), &[5, 6]);

        let flaky = FlakyOnce { inner: base_ctx.messaging.clone(), target: NodeID(2), burned: Mutex::new(false) };
        let ctx = CoordinatorContext::new(
            base_ctx.placement.clone(),
            base_ctx.liveness.clone(),
            base_ctx.snitch.clone(),
            base_ctx.replication.clone(),
            std::sync::Arc::new(flaky),
            base_ctx.hint_store.clone(),
            base_ctx.storage.clone(),
            base_ctx.local_node,
            base_ctx.local_dc.clone(),
            base_ctx.local_rack.clone(),
            base_ctx.admin.clone(),
        );

        let driver = RangeScanDriver::new(&ctx, "ks");
        let rows = driver.scan(full_bounds(), 6, ConsistencyLevel::Quorum).unwrap();
        let keys: Vec<i64> = rows.iter().map(|(k, _)| k.0[0].as_bin().block()).collect();
        assert_eq!(keys, vec![1, 2, 3, 4, 5, 6]);
    }
}
