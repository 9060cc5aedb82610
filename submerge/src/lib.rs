// A server collects together all resources necessary to function as a replica
// of realm's tables and to support all necesary functions of the realm.
//
// A server may support one or more clients, or it may be configured strictly as
// an unloaded replica for redundancy.
//
// A server may be an active or passive replica. Active replicas participate in
// the replicated commit protocol, and therefore wait for one another (or at
// least a quorum of one another). Passive replicas can lag behind active
// replicas, can store and flood low-consistency data, but cannot initiate
// high-consistency write transactions.

pub enum ServerState {
    Idle,
    Running,
}

/// A server is, at its coordinator-facing surface, just a bound
/// `submerge_txn::CoordinatorContext` plus the keyspace it is currently
/// serving (the context already carries every external collaborator a
/// driver needs, see `submerge_txn::CoordinatorContext`).
pub struct Server {
    pub keyspace: String,
    pub state: ServerState,
    pub ctx: submerge_txn::CoordinatorContext,
}

impl Server {
    pub fn new(keyspace: impl Into<String>, ctx: submerge_txn::CoordinatorContext) -> Server {
        Server { keyspace: keyspace.into(), state: ServerState::Idle, ctx }
    }

    pub fn start(&mut self) {
        self.state = ServerState::Running;
    }
}
