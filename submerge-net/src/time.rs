use serde::{Deserialize, Serialize};

// A given Realm is a single, coherent, distributed system. It is composed of
// a set of Nodes, each of which has a unique NodeID.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct NodeID(pub i64);

// NodeTime is a virtual time-point in signed 64-bit microseconds
// since the epoch. This is sufficient to span 292,471 years.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct NodeTime(pub i64);

impl NodeTime {
    pub fn micros(self) -> i64 {
        self.0
    }

    pub fn checked_add(self, d: Duration) -> Option<NodeTime> {
        self.0.checked_add(d.0).map(NodeTime)
    }
}

// Duration is a time-span in signed 64-bit microseconds relative to
// some NodeTime or RealmTime.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Duration(pub i64);

impl Duration {
    pub fn from_millis(ms: i64) -> Duration {
        Duration(ms * 1000)
    }

    pub fn as_micros(self) -> i64 {
        self.0
    }
}

// RealmTimes are realm-local extended timestamps. The most
// significant (time) field stores a NodeTime (microsecond count), but
// this is then followed by both a NodeID and an event count allowing
// each node to label any event with a RealmTime without coordination
// with other Nodes, _and_ with essentially arbitrary numbers of
// sub-microsecond events without implying anything about real time.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct RealmTime {
    pub time: NodeTime,
    pub node: NodeID,
    pub event: i64,
}
