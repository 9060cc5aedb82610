// The narrow contracts this crate consumes but does not implement: the
// token ring / placement oracle, the per-endpoint liveness detector, the
// datacenter/rack snitch, the replication strategy's blockFor policy, the
// messaging transport, the hinted-handoff store, and the local storage
// engine. Every driver in this crate takes these only through
// `CoordinatorContext` (see `context.rs`); production callers supply their
// own implementations; `testkit` (test-only) supplies in-memory ones.

use std::collections::{BTreeMap, BTreeSet};

use submerge_lang::Path;
use submerge_net::{Duration, NodeID};

use submerge_base::{ConsistencyLevel, Result};

/// A position on the token ring. The placement oracle is the only thing
/// that knows how a partition key maps to one of these; the coordinator
/// only ever compares and sorts them.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Token(pub u64);

pub trait PlacementOracle: Send + Sync {
    fn token_for(&self, keyspace: &str, key: &Path) -> Token;
    fn natural_endpoints(&self, keyspace: &str, token: Token) -> Vec<NodeID>;
    fn pending_endpoints(&self, keyspace: &str, token: Token) -> Vec<NodeID>;
    fn host_id(&self, endpoint: NodeID) -> u128;
    /// All tokens that bound a distinct replica-set boundary on the ring,
    /// in ascending order; used by the range scan driver's splitting pass.
    fn sorted_tokens(&self, keyspace: &str) -> Vec<Token>;
    fn topology(&self) -> BTreeMap<String, BTreeMap<String, Vec<NodeID>>>;
}

pub trait LivenessDetector: Send + Sync {
    fn is_alive(&self, endpoint: NodeID) -> bool;
    fn downtime(&self, endpoint: NodeID) -> Duration;
    fn live_members(&self) -> BTreeSet<NodeID>;
    fn unreachable_members(&self) -> BTreeSet<NodeID>;
    fn live_token_owners(&self) -> BTreeSet<NodeID>;
}

pub trait Snitch: Send + Sync {
    fn datacenter(&self, endpoint: NodeID) -> String;
    fn rack(&self, endpoint: NodeID) -> String;
    /// Ascending by proximity to `from`; `from` itself, if present, sorts
    /// first.
    fn sort_by_proximity(&self, from: NodeID, endpoints: &[NodeID]) -> Vec<NodeID>;
    /// Whether merging two adjacent range pieces whose live, filtered
    /// endpoint sets are `left`/`right` (intersecting into `merged`) is
    /// worth the loss of parallelism, given topology.
    fn is_worth_merging_for_range_query(&self, merged: &[NodeID], left: &[NodeID], right: &[NodeID]) -> bool;
}

pub trait ReplicationStrategy: Send + Sync {
    fn replication_factor(&self) -> usize;
    fn block_for(&self, cl: ConsistencyLevel, keyspace: &str) -> usize;
}

/// The outcome of a single request/response send. This crate is
/// deliberately sans-async (see `submerge-net::Node`'s queue-draining
/// design and the workspace's `stateright`-model-checked Paxos texture):
/// `send_rr` resolves synchronously rather than registering a callback
/// with a reactor, which keeps the drivers plain control flow and keeps
/// the Paxos state machine trivially model-checkable. A production
/// embedding would have the transport invoke the equivalent of
/// `on_response`/`on_failure` from its own I/O thread instead; that
/// wiring is out of scope (the "messaging" external contract, per spec).
#[derive(Clone, Debug)]
pub enum RrOutcome {
    Reply(submerge_net::SpecificMsg),
    /// The replica returned an explicit failure (`sendRRWithFailure`).
    Failure,
    /// The task aged out before first execution, or the destination was
    /// never reachable; bookkept against the verb's dropped-message
    /// counter by the caller.
    Dropped,
}

pub trait Messaging: Send + Sync {
    fn send_one_way(&self, to: NodeID, msg: submerge_net::SpecificMsg);
    fn send_rr(&self, to: NodeID, msg: submerge_net::SpecificMsg, timeout: Duration) -> RrOutcome;
    fn get_version(&self, endpoint: NodeID) -> u32;
}

pub trait HintStore: Send + Sync {
    /// Wraps `mutation` for eventual delivery to `host_id`, stamped `now`
    /// with the computed `ttl`.
    fn hint_for(&self, mutation: &submerge_net::Mutation, now: submerge_net::NodeTime, ttl: Duration, host_id: u128) -> Result<()>;
    /// The oldest gc-grace across the tables a mutation touches,
    /// converted to a hint TTL.
    fn calculate_hint_ttl(&self, mutation: &submerge_net::Mutation) -> Duration;
}

pub trait StorageEngine: Send + Sync {
    fn apply(&self, mutation: &submerge_net::Mutation) -> Result<()>;
    fn execute_local_read(&self, key: &Path) -> Result<Option<(submerge_lang::Vals, submerge_net::RealmTime)>>;
    /// `lower_exclusive`, when set, excludes everything at or before that
    /// key, the short-read-protection follow-up request (§4.E.4, §4.F.4)
    /// uses it to resume past the last row already reconciled.
    fn execute_local_range(
        &self,
        bounds: &submerge_net::RangeBounds,
        row_limit: u64,
        lower_exclusive: Option<&Path>,
    ) -> Result<Vec<(Path, submerge_lang::Vals, submerge_net::RealmTime)>>;
}

/// Stands in for the jittered `Thread.sleep` backoff the Paxos driver's
/// contention retry uses. Production code sleeps for real; tests inject a
/// no-op so the retry loop stays deterministic and fast.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, d: Duration);
}

pub struct RealSleeper;
impl Sleeper for RealSleeper {
    fn sleep(&self, d: Duration) {
        std::thread::sleep(std::time::Duration::from_micros(d.as_micros().max(0) as u64));
    }
}
