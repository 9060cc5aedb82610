// Shared by the Read Executor's digest-mismatch repair (§4.E.3) and the
// Range Scan Driver's per-range reconciliation (§4.F.4): choose the most
// recent cell across a set of replica responses. The spec orders by
// `(timestamp, then localDeletionTime, then value)`; this workspace's
// storage engine contract carries no tombstone/localDeletionTime of its
// own (an external, consumed-only collaborator, §1), so `RealmTime`'s own
// `(time, node, event)` total order stands in for the full tie-break,
// still deterministic, just one field shorter.

use std::collections::BTreeMap;

use submerge_lang::{Path, Vals};
use submerge_net::{NodeID, RealmTime};

/// One replica's answer for a single key: `None` for "replica has
/// nothing for this key" (never seen it, as opposed to an explicit
/// tombstone, which this workspace's data model does not carry).
pub type Cell = (Option<Vals>, RealmTime);

/// Picks the response with the greatest `RealmTime`; ties (impossible in
/// practice since `RealmTime` is node-unique, but the total order holds
/// regardless) resolve by the node field.
pub fn reconcile_cell<'a>(responses: impl Iterator<Item = &'a (NodeID, Cell)>) -> Option<&'a (NodeID, Cell)> {
    responses.max_by_key(|(_, (_, ts))| *ts)
}

/// Replicas whose reported cell is strictly behind the reconciled value:
/// the set the caller should issue repair writes to.
pub fn behind_replicas<'a>(responses: impl Iterator<Item = &'a (NodeID, Cell)>, reconciled: &RealmTime) -> Vec<NodeID> {
    responses.filter(|(_, (_, ts))| ts < reconciled).map(|(n, _)| *n).collect()
}

/// Reconciles a full-range response set (one `Vec<(Path, Vals, RealmTime)>`
/// per replica) into a single sorted-by-key row set, per §4.F.4.
pub fn reconcile_rows(per_replica: Vec<(NodeID, Vec<(Path, Vals, RealmTime)>)>) -> Vec<(Path, Vals, RealmTime)> {
    let mut by_key: BTreeMap<Path, Vec<(NodeID, Cell)>> = BTreeMap::new();
    for (node, rows) in per_replica {
        for (key, vals, ts) in rows {
            by_key.entry(key).or_default().push((node, (Some(vals), ts)));
        }
    }
    let mut out = Vec::with_capacity(by_key.len());
    for (key, responses) in by_key {
        if let Some((_, (Some(vals), ts))) = reconcile_cell(responses.iter()) {
            out.push((key, vals.clone(), *ts));
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use submerge_net::NodeTime;
    use test_log::test;

    fn rt(micros: i64) -> RealmTime {
        RealmTime { time: NodeTime(micros), node: NodeID(0), event: 0 }
    }

    #[test]
    fn reconcile_cell_picks_latest_timestamp() {
        let responses = vec![
            (NodeID(0), (Some(Vals::I64s(vec![1])), rt(10))),
            (NodeID(1), (Some(Vals::I64s(vec![2])), rt(20))),
        ];
        let winner = reconcile_cell(responses.iter()).unwrap();
        assert_eq!(winner.0, NodeID(1));
    }

    #[test]
    fn behind_replicas_excludes_the_winner() {
        let reconciled = rt(20);
        let responses = vec![
            (NodeID(0), (Some(Vals::I64s(vec![1])), rt(10))),
            (NodeID(1), (Some(Vals::I64s(vec![2])), rt(20))),
        ];
        let behind = behind_replicas(responses.iter(), &reconciled);
        assert_eq!(behind, vec![NodeID(0)]);
    }
}
