// Client-server and server-server networking: message envelopes, node
// identity and time, and the queue-draining `Node` transport used by the
// coordinator crate (`submerge-txn`) to move requests and responses without
// assuming anything about the underlying byte transport.

mod ballot;
mod msg;
mod node;
mod time;

pub use ballot::Ballot;
pub use msg::{Commit, Msg, Mutation, RangeBounds, SpecificMsg};
pub use node::{Data, IOQueues, Node, RecvMsg};
pub use time::{Duration, NodeID, NodeTime, RealmTime};
