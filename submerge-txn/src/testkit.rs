// In-memory reference implementations of every external collaborator
// (`external.rs`), wired into a small synchronous cluster simulator. Not
// a production transport; the whole point is to let the drivers' unit
// tests exercise real quorum/failure/Paxos-contention behavior without
// a real network or storage engine.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use submerge_admin::{AdminHandle, CoordinatorConfig};
use submerge_base::{ConsistencyLevel, Result};
use submerge_lang::{Path, Vals};
use submerge_net::{Ballot, Commit, Duration, Mutation, NodeID, NodeTime, RangeBounds, RealmTime, SpecificMsg};

use crate::context::CoordinatorContext;
use crate::external::{HintStore, LivenessDetector, Messaging, PlacementOracle, ReplicationStrategy, RrOutcome, Snitch, StorageEngine, Token};
use crate::read::digest_of;

const RING_SIZE: u64 = 360;

#[derive(Default)]
struct PaxosState {
    promised: Option<Ballot>,
    accepted: Option<Commit>,
    most_recent_commit: Option<Commit>,
}

#[derive(Default)]
struct ReplicaState {
    storage: Mutex<BTreeMap<Path, (Vals, RealmTime)>>,
    paxos: Mutex<PaxosState>,
    batchlog: Mutex<BTreeMap<i64, Vec<Mutation>>>,
}

fn apply_to(replica: &ReplicaState, mutation: &Mutation) -> Result<()> {
    let mut storage = replica.storage.lock().unwrap();
    for (k, v) in &mutation.writes {
        match storage.get(k) {
            Some((_, ts)) if *ts >= mutation.timestamp => {}
            _ => {
                storage.insert(k.clone(), (v.clone(), mutation.timestamp));
            }
        }
    }
    Ok(())
}

fn absent_cell(node: NodeID) -> (Option<Vals>, RealmTime) {
    (None, RealmTime { time: NodeTime(i64::MIN), node, event: 0 })
}

struct ClusterInner {
    nodes: Vec<NodeID>,
    dc_of: BTreeMap<NodeID, String>,
    rack_of: BTreeMap<NodeID, String>,
    replicas: BTreeMap<NodeID, Arc<ReplicaState>>,
    dead: Mutex<BTreeSet<NodeID>>,
    downtime: Mutex<BTreeMap<NodeID, Duration>>,
    delivered_hints: Mutex<Vec<(u128, Mutation)>>,
    rf: usize,
    schema_version: [u8; 16],
}

impl ClusterInner {
    fn is_alive(&self, n: NodeID) -> bool {
        !self.dead.lock().unwrap().contains(&n)
    }

    fn dispatch(&self, to: NodeID, msg: SpecificMsg) -> SpecificMsg {
        let replica = self.replicas.get(&to).expect("unknown node in test cluster");
        match msg {
            SpecificMsg::Ping => SpecificMsg::Ack,

            SpecificMsg::Mutate { mutation, .. } => {
                let _ = apply_to(replica, &mutation);
                SpecificMsg::Ack
            }

            SpecificMsg::ForwardedMutate { mutation, forward_to, .. } => {
                let _ = apply_to(replica, &mutation);
                let mut acked = vec![to];
                for dest in forward_to {
                    if self.is_alive(dest) {
                        if let Some(r) = self.replicas.get(&dest) {
                            let _ = apply_to(r, &mutation);
                            acked.push(dest);
                        }
                    }
                }
                SpecificMsg::ForwardAck { acked }
            }

            SpecificMsg::Read { key, digest_only, .. } => {
                let cell = match replica.storage.lock().unwrap().get(&key).cloned() {
                    Some((v, ts)) => (Some(v), ts),
                    None => absent_cell(to),
                };
                if digest_only {
                    SpecificMsg::ReadDigest { digest: digest_of(&cell) }
                } else {
                    SpecificMsg::ReadData { vals: cell.0, timestamp: cell.1 }
                }
            }

            SpecificMsg::RangeRead { bounds, row_limit, lower_exclusive } => {
                let storage = replica.storage.lock().unwrap();
                let mut rows = Vec::new();
                for (k, (v, ts)) in storage.iter() {
                    if *k < bounds.start_inclusive {
                        continue;
                    }
                    if let Some(end) = &bounds.end_exclusive {
                        if k >= end {
                            continue;
                        }
                    }
                    if let Some(lo) = &lower_exclusive {
                        if k <= lo {
                            continue;
                        }
                    }
                    rows.push((k.clone(), v.clone(), *ts));
                    if rows.len() as u64 >= row_limit {
                        break;
                    }
                }
                SpecificMsg::RangeData { rows }
            }

            SpecificMsg::Prepare { ballot, .. } => {
                let mut state = replica.paxos.lock().unwrap();
                if let Some(p) = state.promised {
                    if ballot <= p {
                        return SpecificMsg::Promise { promised: false, accepted: state.accepted.clone(), most_recent_commit: state.most_recent_commit.clone() };
                    }
                }
                state.promised = Some(ballot);
                SpecificMsg::Promise { promised: true, accepted: state.accepted.clone(), most_recent_commit: state.most_recent_commit.clone() }
            }

            SpecificMsg::Propose { commit } => {
                let mut state = replica.paxos.lock().unwrap();
                if let Some(p) = state.promised {
                    if commit.ballot < p {
                        return SpecificMsg::Accepted { accepted: false, promised_ballot: p };
                    }
                }
                let ballot = commit.ballot;
                state.accepted = Some(commit);
                SpecificMsg::Accepted { accepted: true, promised_ballot: ballot }
            }

            SpecificMsg::Commit { commit } => {
                {
                    let mut state = replica.paxos.lock().unwrap();
                    state.most_recent_commit = Some(commit.clone());
                    state.accepted = None;
                }
                if let Some(update) = &commit.update {
                    let _ = apply_to(replica, update);
                }
                SpecificMsg::Ack
            }

            SpecificMsg::BatchlogWrite { batch_id, mutations } => {
                replica.batchlog.lock().unwrap().insert(batch_id, mutations);
                SpecificMsg::Ack
            }

            SpecificMsg::BatchlogRemove { batch_id } => {
                replica.batchlog.lock().unwrap().remove(&batch_id);
                SpecificMsg::Ack
            }

            SpecificMsg::Truncate { .. } => {
                replica.storage.lock().unwrap().clear();
                SpecificMsg::Ack
            }

            SpecificMsg::SchemaVersionProbe => SpecificMsg::SchemaVersionReply { schema_version: self.schema_version },

            SpecificMsg::HintDeliver { mutation, .. } => {
                let _ = apply_to(replica, &mutation);
                SpecificMsg::Ack
            }

            // Reply-only variants never arrive as a request in this simulator.
            _ => SpecificMsg::Ack,
        }
    }
}

pub struct InMemoryCluster {
    inner: Arc<ClusterInner>,
}

impl InMemoryCluster {
    /// Three nodes, one DC, two racks, RF = 3 (every node a replica of
    /// every key): the fixture most driver tests want.
    pub fn three_node_single_dc() -> InMemoryCluster {
        InMemoryCluster::new(3, 3)
    }

    pub fn new(node_count: usize, rf: usize) -> InMemoryCluster {
        let mut nodes = Vec::new();
        let mut dc_of = BTreeMap::new();
        let mut rack_of = BTreeMap::new();
        let mut replicas = BTreeMap::new();
        for i in 0..node_count {
            let n = NodeID(i as i64);
            nodes.push(n);
            dc_of.insert(n, "dc1".to_string());
            rack_of.insert(n, format!("rack{}", i % 2));
            replicas.insert(n, Arc::new(ReplicaState::default()));
        }
        InMemoryCluster {
            inner: Arc::new(ClusterInner {
                nodes,
                dc_of,
                rack_of,
                replicas,
                dead: Mutex::new(BTreeSet::new()),
                downtime: Mutex::new(BTreeMap::new()),
                delivered_hints: Mutex::new(Vec::new()),
                rf,
                schema_version: [7u8; 16],
            }),
        }
    }

    /// Two DCs of `per_dc` nodes each, RF = `rf` per DC: the fixture the
    /// cross-DC write-bundling and `EachQuorum`/`LocalQuorum` tests want.
    pub fn two_dc(per_dc: usize, rf: usize) -> InMemoryCluster {
        let mut nodes = Vec::new();
        let mut dc_of = BTreeMap::new();
        let mut rack_of = BTreeMap::new();
        let mut replicas = BTreeMap::new();
        for dc in 0..2 {
            for i in 0..per_dc {
                let n = NodeID((dc * per_dc + i) as i64);
                nodes.push(n);
                dc_of.insert(n, format!("dc{dc}"));
                rack_of.insert(n, format!("rack{}", i % 2));
                replicas.insert(n, Arc::new(ReplicaState::default()));
            }
        }
        InMemoryCluster {
            inner: Arc::new(ClusterInner {
                nodes,
                dc_of,
                rack_of,
                replicas,
                dead: Mutex::new(BTreeSet::new()),
                downtime: Mutex::new(BTreeMap::new()),
                delivered_hints: Mutex::new(Vec::new()),
                rf,
                schema_version: [7u8; 16],
            }),
        }
    }

    pub fn context_for(&self, node: NodeID) -> CoordinatorContext {
        let storage = Arc::new(TestStorage(self.inner.replicas[&node].clone()));
        CoordinatorContext::new(
            Arc::new(TestPlacement(self.inner.clone())),
            Arc::new(TestLiveness(self.inner.clone())),
            Arc::new(TestSnitch(self.inner.clone())),
            Arc::new(TestReplication(self.inner.clone())),
            Arc::new(TestMessaging(self.inner.clone())),
            Arc::new(TestHintStore(self.inner.clone())),
            storage,
            node,
            self.inner.dc_of[&node].clone(),
            self.inner.rack_of[&node].clone(),
            Arc::new(AdminHandle::new(CoordinatorConfig::default())),
        )
    }

    pub fn kill(&self, node: NodeID) {
        self.inner.dead.lock().unwrap().insert(node);
    }

    pub fn revive(&self, node: NodeID) {
        self.inner.dead.lock().unwrap().remove(&node);
    }

    pub fn set_downtime(&self, node: NodeID, d: Duration) {
        self.inner.downtime.lock().unwrap().insert(node, d);
    }

    /// Plants a value directly on one replica's storage, bypassing
    /// messaging (for constructing a replica that is behind or ahead
    /// of the rest of the cluster in a single step).
    pub fn force_apply(&self, node: NodeID, mutation: &Mutation) {
        let mut storage = self.inner.replicas[&node].storage.lock().unwrap();
        for (k, v) in &mutation.writes {
            storage.insert(k.clone(), (v.clone(), mutation.timestamp));
        }
    }

    pub fn delivered_hints(&self) -> Vec<(u128, Mutation)> {
        self.inner.delivered_hints.lock().unwrap().clone()
    }
}

struct TestPlacement(Arc<ClusterInner>);

impl PlacementOracle for TestPlacement {
    fn token_for(&self, _keyspace: &str, key: &Path) -> Token {
        let bytes = rmp_serde::to_vec(key).unwrap_or_default();
        Token(rapidhash::rapidhash(&bytes) % RING_SIZE)
    }

    fn natural_endpoints(&self, _keyspace: &str, token: Token) -> Vec<NodeID> {
        let n = self.0.nodes.len();
        if n == 0 {
            return Vec::new();
        }
        let idx = ((token.0 * n as u64) / RING_SIZE) as usize % n;
        let rf = self.0.rf.min(n);
        (0..rf).map(|i| self.0.nodes[(idx + i) % n]).collect()
    }

    fn pending_endpoints(&self, _keyspace: &str, _token: Token) -> Vec<NodeID> {
        Vec::new()
    }

    fn host_id(&self, endpoint: NodeID) -> u128 {
        endpoint.0 as u128
    }

    fn sorted_tokens(&self, _keyspace: &str) -> Vec<Token> {
        let n = self.0.nodes.len().max(1);
        (0..n).map(|i| Token((i as u64 * RING_SIZE) / n as u64)).collect()
    }

    fn topology(&self) -> BTreeMap<String, BTreeMap<String, Vec<NodeID>>> {
        let mut out: BTreeMap<String, BTreeMap<String, Vec<NodeID>>> = BTreeMap::new();
        for &n in &self.0.nodes {
            out.entry(self.0.dc_of[&n].clone()).or_default().entry(self.0.rack_of[&n].clone()).or_default().push(n);
        }
        out
    }
}

struct TestLiveness(Arc<ClusterInner>);

impl LivenessDetector for TestLiveness {
    fn is_alive(&self, endpoint: NodeID) -> bool {
        self.0.is_alive(endpoint)
    }

    fn downtime(&self, endpoint: NodeID) -> Duration {
        *self.0.downtime.lock().unwrap().get(&endpoint).unwrap_or(&Duration(0))
    }

    fn live_members(&self) -> BTreeSet<NodeID> {
        let dead = self.0.dead.lock().unwrap();
        self.0.nodes.iter().copied().filter(|n| !dead.contains(n)).collect()
    }

    fn unreachable_members(&self) -> BTreeSet<NodeID> {
        self.0.dead.lock().unwrap().clone()
    }

    fn live_token_owners(&self) -> BTreeSet<NodeID> {
        self.live_members()
    }
}

struct TestSnitch(Arc<ClusterInner>);

impl Snitch for TestSnitch {
    fn datacenter(&self, endpoint: NodeID) -> String {
        self.0.dc_of.get(&endpoint).cloned().unwrap_or_default()
    }

    fn rack(&self, endpoint: NodeID) -> String {
        self.0.rack_of.get(&endpoint).cloned().unwrap_or_default()
    }

    fn sort_by_proximity(&self, from: NodeID, endpoints: &[NodeID]) -> Vec<NodeID> {
        let from_dc = self.datacenter(from);
        let from_rack = self.rack(from);
        let mut v = endpoints.to_vec();
        v.sort_by_key(|&e| {
            if e == from {
                (0, e.0)
            } else if self.datacenter(e) == from_dc && self.rack(e) == from_rack {
                (1, e.0)
            } else if self.datacenter(e) == from_dc {
                (2, e.0)
            } else {
                (3, e.0)
            }
        });
        v
    }

    fn is_worth_merging_for_range_query(&self, merged: &[NodeID], left: &[NodeID], right: &[NodeID]) -> bool {
        merged.len() * 2 >= left.len() + right.len()
    }
}

struct TestReplication(Arc<ClusterInner>);

impl ReplicationStrategy for TestReplication {
    fn replication_factor(&self) -> usize {
        self.0.rf
    }

    fn block_for(&self, cl: ConsistencyLevel, _keyspace: &str) -> usize {
        cl.block_for(self.0.rf)
    }
}

struct TestMessaging(Arc<ClusterInner>);

impl Messaging for TestMessaging {
    fn send_one_way(&self, to: NodeID, msg: SpecificMsg) {
        if self.0.is_alive(to) {
            self.0.dispatch(to, msg);
        }
    }

    fn send_rr(&self, to: NodeID, msg: SpecificMsg, _timeout: Duration) -> RrOutcome {
        if !self.0.is_alive(to) {
            return RrOutcome::Dropped;
        }
        RrOutcome::Reply(self.0.dispatch(to, msg))
    }

    fn get_version(&self, _endpoint: NodeID) -> u32 {
        1
    }
}

struct TestHintStore(Arc<ClusterInner>);

impl HintStore for TestHintStore {
    fn hint_for(&self, mutation: &Mutation, _now: NodeTime, _ttl: Duration, host_id: u128) -> Result<()> {
        self.0.delivered_hints.lock().unwrap().push((host_id, mutation.clone()));
        Ok(())
    }

    fn calculate_hint_ttl(&self, _mutation: &Mutation) -> Duration {
        Duration::from_millis(10 * 60 * 1000)
    }
}

struct TestStorage(Arc<ReplicaState>);

impl StorageEngine for TestStorage {
    fn apply(&self, mutation: &Mutation) -> Result<()> {
        apply_to(&self.0, mutation)
    }

    fn execute_local_read(&self, key: &Path) -> Result<Option<(Vals, RealmTime)>> {
        Ok(self.0.storage.lock().unwrap().get(key).cloned())
    }

    fn execute_local_range(&self, bounds: &RangeBounds, row_limit: u64, lower_exclusive: Option<&Path>) -> Result<Vec<(Path, Vals, RealmTime)>> {
        let storage = self.0.storage.lock().unwrap();
        let mut rows = Vec::new();
        for (k, (v, ts)) in storage.iter() {
            if *k < bounds.start_inclusive {
                continue;
            }
            if let Some(end) = &bounds.end_exclusive {
                if k >= end {
                    continue;
                }
            }
            if let Some(lo) = lower_exclusive {
                if k <= lo {
                    continue;
                }
            }
            rows.push((k.clone(), v.clone(), *ts));
            if rows.len() as u64 >= row_limit {
                break;
            }
        }
        Ok(rows)
    }
}
