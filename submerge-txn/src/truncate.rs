// Component I: cluster truncate. Precondition: every token-owning
// endpoint alive, else unavailable; then broadcast and wait for full
// acknowledgement within the truncate RPC timeout (§4.I).

use submerge_base::{ConsistencyLevel, Error, Result, WriteType};
use submerge_lang::Path;
use submerge_net::{NodeID, SpecificMsg};

use crate::collector::{Flavor, ResponseCollector};
use crate::context::CoordinatorContext;
use crate::external::RrOutcome;

pub struct TruncateDriver<'a> {
    ctx: &'a CoordinatorContext,
}

impl<'a> TruncateDriver<'a> {
    pub fn new(ctx: &'a CoordinatorContext) -> TruncateDriver<'a> {
        TruncateDriver { ctx }
    }

    pub(crate) fn all_token_owners(&self) -> Vec<NodeID> {
        let topo = self.ctx.placement.topology();
        let mut owners: Vec<NodeID> = topo.values().flat_map(|racks| racks.values()).flatten().copied().collect();
        owners.sort();
        owners.dedup();
        owners
    }

    pub fn truncate(&self, table: &Path) -> Result<()> {
        let owners = self.all_token_owners();
        let live = self.ctx.liveness.live_token_owners();
        let live_owners: Vec<NodeID> = owners.iter().copied().filter(|n| live.contains(n)).collect();

        if live_owners.len() < owners.len() {
            tracing::warn!(target: "submerge", live = live_owners.len(), total = owners.len(), "truncate precondition failed: not all token owners alive");
            return Err(Error::unavailable(owners.len(), live_owners.len()));
        }

        let timeout = self.ctx.admin.config().truncate_rpc_timeout;
        let block_for = owners.len();
        let mut collector = ResponseCollector::new(owners.clone(), ConsistencyLevel::All, block_for, Flavor::Write(WriteType::Simple));
        for &dest in &owners {
            match self.ctx.messaging.send_rr(dest, SpecificMsg::Truncate { table: table.clone() }, timeout) {
                RrOutcome::Reply(SpecificMsg::Ack) => collector.on_response(dest),
                _ => collector.on_failure(dest),
            }
        }
        collector.await_result()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testkit::InMemoryCluster;
    use submerge_lang::{Bin, Word};
    use test_log::test;

    fn table() -> Path {
        Path(vec![Word::from_bin_unchecked(Bin::new(1, 0))])
    }

    #[test]
    fn truncate_succeeds_when_every_owner_is_alive() {
        let cluster = InMemoryCluster::three_node_single_dc();
        let ctx = cluster.context_for(NodeID(0));
        let driver = TruncateDriver::new(&ctx);
        assert!(driver.truncate(&table()).is_ok());
    }

    #[test]
    fn truncate_unavailable_when_one_owner_is_dead() {
        let cluster = InMemoryCluster::three_node_single_dc();
        let ctx = cluster.context_for(NodeID(0));
        cluster.kill(NodeID(2));
        let driver = TruncateDriver::new(&ctx);
        let result = driver.truncate(&table());
        assert!(matches!(result.unwrap_err().kind(), submerge_base::ErrorKind::Unavailable { .. }));
    }
}
