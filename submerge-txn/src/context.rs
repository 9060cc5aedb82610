// Replaces the mutable global singletons a reflective-MBean design would
// reach for (§9 design note): every driver takes a `&CoordinatorContext`
// plus its request-specific arguments and stores no state of its own
// beyond what it is actively computing.

use std::sync::Arc;

use submerge_admin::AdminHandle;
use submerge_net::NodeID;

use crate::external::{HintStore, LivenessDetector, Messaging, PlacementOracle, ReplicationStrategy, RealSleeper, Sleeper, Snitch, StorageEngine};
use crate::hints::HintBacklog;

pub struct CoordinatorContext {
    pub placement: Arc<dyn PlacementOracle>,
    pub liveness: Arc<dyn LivenessDetector>,
    pub snitch: Arc<dyn Snitch>,
    pub replication: Arc<dyn ReplicationStrategy>,
    pub messaging: Arc<dyn Messaging>,
    pub hint_store: Arc<dyn HintStore>,
    pub storage: Arc<dyn StorageEngine>,
    pub sleeper: Arc<dyn Sleeper>,
    pub local_node: NodeID,
    pub local_dc: String,
    pub local_rack: String,
    pub admin: Arc<AdminHandle>,
    pub hint_backlog: Arc<HintBacklog>,
}

impl CoordinatorContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        placement: Arc<dyn PlacementOracle>,
        liveness: Arc<dyn LivenessDetector>,
        snitch: Arc<dyn Snitch>,
        replication: Arc<dyn ReplicationStrategy>,
        messaging: Arc<dyn Messaging>,
        hint_store: Arc<dyn HintStore>,
        storage: Arc<dyn StorageEngine>,
        local_node: NodeID,
        local_dc: String,
        local_rack: String,
        admin: Arc<AdminHandle>,
    ) -> CoordinatorContext {
        CoordinatorContext {
            placement,
            liveness,
            snitch,
            replication,
            messaging,
            hint_store,
            storage,
            sleeper: Arc::new(RealSleeper),
            local_node,
            local_dc,
            local_rack,
            admin,
            hint_backlog: Arc::new(HintBacklog::default()),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> CoordinatorContext {
        self.sleeper = sleeper;
        self
    }

    pub fn is_local(&self, endpoint: NodeID) -> bool {
        endpoint == self.local_node
    }

    pub fn is_local_dc(&self, endpoint: NodeID) -> bool {
        self.snitch.datacenter(endpoint) == self.local_dc
    }
}
