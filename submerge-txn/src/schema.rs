// Component: schema-version probe. Fans `SchemaVersionProbe` out to every
// token owner and collects the replies into the map `submerge-admin`'s
// `describe_schema_versions` formats (§6). Unlike truncate there is no
// precondition and no quorum to satisfy: a dead or non-responding node
// just reports `None`, the same as the teacher's `describeSchemaVersions`
// treats an unreachable endpoint.

use std::collections::BTreeMap;

use submerge_net::{NodeID, SpecificMsg};

use crate::context::CoordinatorContext;
use crate::external::RrOutcome;
use crate::truncate::TruncateDriver;

pub struct SchemaVersionProber<'a> {
    ctx: &'a CoordinatorContext,
}

impl<'a> SchemaVersionProber<'a> {
    pub fn new(ctx: &'a CoordinatorContext) -> SchemaVersionProber<'a> {
        SchemaVersionProber { ctx }
    }

    /// Probes every token owner in the ring and returns what each one
    /// reported. A timed-out, failed, or dropped reply maps to `None`
    /// rather than being omitted, so `describe_schema_versions` still
    /// lists it under `"UNREACHABLE"`.
    pub fn probe(&self) -> BTreeMap<NodeID, Option<[u8; 16]>> {
        let owners = TruncateDriver::new(self.ctx).all_token_owners();
        let timeout = self.ctx.admin.config().range_rpc_timeout;
        let mut out = BTreeMap::new();
        for owner in owners {
            let version = match self.ctx.messaging.send_rr(owner, SpecificMsg::SchemaVersionProbe, timeout) {
                RrOutcome::Reply(SpecificMsg::SchemaVersionReply { schema_version }) => Some(schema_version),
                _ => {
                    self.ctx.admin.metrics().increment_dropped("SCHEMA_CHECK");
                    None
                }
            };
            out.insert(owner, version);
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testkit::InMemoryCluster;
    use test_log::test;

    #[test]
    fn probe_reports_versions_from_every_live_owner() {
        let cluster = InMemoryCluster::three_node_single_dc();
        let ctx = cluster.context_for(NodeID(0));
        let prober = SchemaVersionProber::new(&ctx);
        let responses = prober.probe();
        assert_eq!(responses.len(), 3);
        assert!(responses.values().all(|v| v.is_some()));

        let versions: BTreeMap<String, Vec<String>> = ctx.admin.describe_schema_versions(&responses);
        assert_eq!(versions.len(), 1, "a freshly-seeded cluster agrees on one schema version");
    }

    #[test]
    fn probe_reports_none_for_a_dead_owner() {
        let cluster = InMemoryCluster::three_node_single_dc();
        let ctx = cluster.context_for(NodeID(0));
        cluster.kill(NodeID(2));
        let prober = SchemaVersionProber::new(&ctx);
        let responses = prober.probe();
        assert_eq!(responses.get(&NodeID(2)), Some(&None));

        let versions = ctx.admin.describe_schema_versions(&responses);
        assert_eq!(versions.get("UNREACHABLE").map(|v| v.len()), Some(1));
    }
}
