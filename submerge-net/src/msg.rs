use serde::{Deserialize, Serialize};

use submerge_base::{ConsistencyLevel, WriteType};
use submerge_lang::{Path, Vals};

use crate::ballot::Ballot;
use crate::time::{NodeID, RealmTime};

/// A single-partition write: the partition key plus the column writes it
/// carries. The storage engine is an external collaborator (it is the one
/// that actually applies a `Mutation`); this crate only needs to move the
/// value around and identify it for dedup/forwarding purposes.
///
/// `is_counter` is set by the caller that builds the mutation (the query
/// layer, which knows the table's column kind) and consulted by the write
/// dispatcher to route between the plain and counter performer kinds
/// (§4.D). It carries no merge semantics of its own; the storage engine
/// still owns how a counter update actually combines with the prior value.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Mutation {
    pub key: Path,
    pub writes: Vec<(Path, Vals)>,
    pub timestamp: RealmTime,
    pub is_counter: bool,
}

impl Mutation {
    pub fn is_counter(&self) -> bool {
        self.is_counter
    }
}

/// A `Commit` is the Paxos payload: a ballot plus the mutation it proposes.
/// A _prepare_ commit carries no writes (`mutation.writes` is empty); a
/// _proposal_ commit carries the update to apply; a _committed_ commit has
/// been learned by a quorum.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Commit {
    pub ballot: Ballot,
    pub key: Path,
    pub update: Option<Mutation>,
}

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct RangeBounds {
    pub start_inclusive: Path,
    pub end_exclusive: Option<Path>,
}

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum SpecificMsg {
    Ping,
    Ack,

    /// Apply a mutation locally, replying with `Ack` (or a failure at the
    /// transport layer, see `sendRRWithFailure` in the messaging contract).
    Mutate { write_type: WriteType, mutation: Mutation },

    /// A cross-DC write bundle: the coordinator addresses exactly one
    /// relay per remote datacenter, which applies locally and fans the
    /// mutation out to `forward_to` itself (§4.D). `ForwardAck` reports
    /// which of `{relay} ∪ forward_to` actually acknowledged.
    ForwardedMutate { write_type: WriteType, mutation: Mutation, forward_to: Vec<NodeID> },
    ForwardAck { acked: Vec<NodeID> },

    /// A single-partition read. `digest_only` distinguishes the one data
    /// request from the blockFor-1 digest requests of a quorum read.
    Read { key: Path, digest_only: bool, cl: ConsistencyLevel },
    ReadData { vals: Option<Vals>, timestamp: RealmTime },
    ReadDigest { digest: [u8; 32] },

    /// A range-scan sub-request; always full data (ranges never use
    /// digests, per the range scan driver's design). `lower_exclusive`
    /// carries the short-read-protection restart point (the last
    /// clustering key already delivered to the client).
    RangeRead { bounds: RangeBounds, row_limit: u64, lower_exclusive: Option<Path> },
    RangeData { rows: Vec<(Path, Vals, RealmTime)> },

    /// Paxos messages.
    Prepare { ballot: Ballot, key: Path },
    Promise {
        promised: bool,
        accepted: Option<Commit>,
        most_recent_commit: Option<Commit>,
    },
    Propose { commit: Commit },
    Accepted { accepted: bool, promised_ballot: Ballot },
    Commit { commit: Commit },

    /// Batchlog protocol.
    BatchlogWrite { batch_id: i64, mutations: Vec<Mutation> },
    BatchlogRemove { batch_id: i64 },

    /// Cluster truncate.
    Truncate { table: Path },

    /// Hinted-handoff delivery.
    HintDeliver { mutation: Mutation, target: NodeID },

    /// Schema-version probe (`describeSchemaVersions`, §6).
    SchemaVersionProbe,
    SchemaVersionReply { schema_version: [u8; 16] },
}

// All inter-node communication takes the form of Messages. A message has
// a set of common fields, followed by a variable (enum) field for the
// specifics of a given type of message.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Msg {
    pub src: NodeID,
    pub dst: NodeID,
    pub txn_time: RealmTime, // Uniquely identifies transaction
    pub msg_time: RealmTime,
    pub sequence: i64,
    pub response: bool,
    pub specific: SpecificMsg,
}
