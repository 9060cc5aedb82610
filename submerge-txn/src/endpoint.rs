// Component A: the endpoint resolver. Pure over a snapshot of topology:
// no mutation, no suspension, no retained state. Every other driver starts
// a request by asking this for the replica set it will target.

use submerge_lang::Path;
use submerge_net::NodeID;

use crate::context::CoordinatorContext;
use crate::external::Token;

pub struct EndpointResolver<'a> {
    ctx: &'a CoordinatorContext,
}

impl<'a> EndpointResolver<'a> {
    pub fn new(ctx: &'a CoordinatorContext) -> EndpointResolver<'a> {
        EndpointResolver { ctx }
    }

    pub fn token_for(&self, keyspace: &str, key: &Path) -> Token {
        self.ctx.placement.token_for(keyspace, key)
    }

    pub fn natural_endpoints(&self, keyspace: &str, token: Token) -> Vec<NodeID> {
        self.ctx.placement.natural_endpoints(keyspace, token)
    }

    pub fn pending_endpoints(&self, keyspace: &str, token: Token) -> Vec<NodeID> {
        self.ctx.placement.pending_endpoints(keyspace, token)
    }

    /// Natural ∪ pending for `key`, the set a write or a Paxos round must
    /// reach.
    pub fn replicas_for_write(&self, keyspace: &str, key: &Path) -> (Vec<NodeID>, Vec<NodeID>) {
        let token = self.token_for(keyspace, key);
        (self.natural_endpoints(keyspace, token), self.pending_endpoints(keyspace, token))
    }

    pub fn filter_alive(&self, endpoints: &[NodeID]) -> Vec<NodeID> {
        endpoints.iter().copied().filter(|e| self.ctx.liveness.is_alive(*e)).collect()
    }

    pub fn sorted_by_proximity(&self, endpoints: &[NodeID]) -> Vec<NodeID> {
        self.ctx.snitch.sort_by_proximity(self.ctx.local_node, endpoints)
    }

    pub fn restrict_to_local_dc(&self, endpoints: &[NodeID]) -> Vec<NodeID> {
        endpoints.iter().copied().filter(|e| self.ctx.is_local_dc(*e)).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testkit::InMemoryCluster;
    use test_log::test;

    #[test]
    fn filter_alive_drops_dead_endpoints() {
        let cluster = InMemoryCluster::three_node_single_dc();
        let ctx = cluster.context_for(NodeID(0));
        let resolver = EndpointResolver::new(&ctx);
        cluster.kill(NodeID(2));
        let alive = resolver.filter_alive(&[NodeID(0), NodeID(1), NodeID(2)]);
        assert_eq!(alive, vec![NodeID(0), NodeID(1)]);
    }
}
