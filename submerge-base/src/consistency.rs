// Base-level consistency and write-type classification, shared by every
// driver in the coordinator (quorum counting, error reporting, metrics,
// per-verb RPC timeout selection) rather than owned by any one of them.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum ConsistencyLevel {
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    Serial,
    LocalSerial,
    LocalOne,
}

impl ConsistencyLevel {
    pub fn is_serial(self) -> bool {
        matches!(self, ConsistencyLevel::Serial | ConsistencyLevel::LocalSerial)
    }

    pub fn is_local(self) -> bool {
        matches!(
            self,
            ConsistencyLevel::LocalQuorum | ConsistencyLevel::LocalSerial | ConsistencyLevel::LocalOne
        )
    }

    pub fn is_any(self) -> bool {
        matches!(self, ConsistencyLevel::Any)
    }

    /// The quorum-commit consistency a Paxos round should use to read and to
    /// broadcast commits at, given the serial CL the caller asked for.
    pub fn commit_cl(self) -> ConsistencyLevel {
        match self {
            ConsistencyLevel::LocalSerial => ConsistencyLevel::LocalQuorum,
            _ => ConsistencyLevel::Quorum,
        }
    }

    /// The minimum number of replicas that must acknowledge, given the
    /// replication factor in scope for this CL (the full RF for
    /// cluster-wide levels, the local-DC RF for `Local*` levels) and the
    /// endpoint count actually being targeted.
    pub fn block_for(self, replication_factor: usize) -> usize {
        match self {
            ConsistencyLevel::Any => 0,
            ConsistencyLevel::One | ConsistencyLevel::LocalOne => 1.min(replication_factor.max(1)),
            ConsistencyLevel::Two => 2.min(replication_factor.max(1)),
            ConsistencyLevel::Three => 3.min(replication_factor.max(1)),
            ConsistencyLevel::All => replication_factor,
            ConsistencyLevel::Quorum
            | ConsistencyLevel::LocalQuorum
            | ConsistencyLevel::EachQuorum
            | ConsistencyLevel::Serial
            | ConsistencyLevel::LocalSerial => replication_factor / 2 + 1,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum WriteType {
    Simple,
    UnloggedBatch,
    Batch,
    Counter,
    Cas,
    BatchLog,
}

impl std::fmt::Display for WriteType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WriteType::Simple => "SIMPLE",
            WriteType::UnloggedBatch => "UNLOGGED_BATCH",
            WriteType::Batch => "BATCH",
            WriteType::Counter => "COUNTER",
            WriteType::Cas => "CAS",
            WriteType::BatchLog => "BATCH_LOG",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn quorum_of_three_is_two() {
        assert_eq!(ConsistencyLevel::Quorum.block_for(3), 2);
    }

    #[test]
    fn all_of_three_is_three() {
        assert_eq!(ConsistencyLevel::All.block_for(3), 3);
    }

    #[test]
    fn any_never_blocks() {
        assert_eq!(ConsistencyLevel::Any.block_for(5), 0);
    }
}
