use serde::{Deserialize, Serialize};

use crate::time::{NodeID, NodeTime};

/// A globally unique, strictly increasing Paxos proposal number: a
/// microsecond wall-clock timestamp, tie-broken by the minting node, then by
/// a per-node monotonic counter for ballots minted within the same
/// microsecond. Used both as the proposal number and as the write timestamp
/// of the proposed update.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Ballot {
    micros: i64,
    node: NodeID,
    counter: u32,
}

impl Ballot {
    pub fn new(micros: i64, node: NodeID, counter: u32) -> Ballot {
        Ballot { micros, node, counter }
    }

    pub fn micros_timestamp(self) -> i64 {
        self.micros
    }

    pub fn as_node_time(self) -> NodeTime {
        NodeTime(self.micros)
    }

    pub fn node(self) -> NodeID {
        self.node
    }

    /// The lowest ballot that is guaranteed to be strictly greater than
    /// `self`, minted by `node` at `micros` (which should be >= `self`'s
    /// timestamp; the caller is expected to supply `now`).
    pub fn successor(self, micros: i64, node: NodeID) -> Ballot {
        if micros > self.micros {
            Ballot { micros, node, counter: 0 }
        } else {
            // Same or earlier wall-clock reading: bump within the
            // minting node's own microsecond instead of risking a tie.
            Ballot { micros: self.micros, node, counter: self.counter + 1 }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn later_micros_always_wins() {
        let a = Ballot::new(100, NodeID(1), 0);
        let b = Ballot::new(101, NodeID(0), 0);
        assert!(b > a);
    }

    #[test]
    fn successor_is_strictly_greater() {
        let a = Ballot::new(100, NodeID(1), 5);
        let s = a.successor(100, NodeID(2));
        assert!(s > a);
        let s2 = a.successor(50, NodeID(2));
        assert!(s2 > a);
    }
}
