// Coordinator-side request orchestration for a replicated wide-column
// store: the logic a request runs through between "a client asked for
// this" and "enough replicas agree it happened": endpoint resolution,
// quorum response collection, hinted handoff, the write and read paths,
// adaptive-concurrency range scans, the Paxos driver behind lightweight
// transactions, the atomic-batch (logged batch) protocol, and cluster
// truncate.
//
// This crate is deliberately sans-async. Every external interaction
// (sending a message, sleeping, reading the clock) goes through a trait
// in `external` that resolves synchronously (`Messaging::send_rr`
// returns an `RrOutcome` rather than registering a callback), which
// keeps every driver plain control flow and keeps the Paxos state
// machine (`paxos`) trivially model-checkable: see its `stateright`
// harness under `tests/`, built against the bundled Paxos example at
// https://github.com/stateright/stateright/blob/master/examples/paxos.rs.
// A production embedding wires `external`'s traits to a real transport,
// a real clock, and a real storage engine; this crate only ever sees
// them through `CoordinatorContext`.
//
// Module map, one per component of the design:
//
//   context    - CoordinatorContext: the external collaborators plus
//                local node/dc/rack identity every driver borrows.
//   external   - the traits this crate consumes but does not implement:
//                placement, liveness, snitch, replication, messaging,
//                hint store, storage engine, sleeper.
//   endpoint   - replica lookup, liveness filtering, proximity sort.
//   collector  - the quorum-barrier type shared by writes and reads.
//   hints      - hinted-handoff backlog and submit/drop decision.
//   reconcile  - newest-wins cell and row reconciliation.
//   write      - the write dispatcher (best-effort, counter, forwarded).
//   read       - the read executor (data+digest fan-out, read repair).
//   range      - the range scan driver (ring splitting, adaptive
//                concurrency).
//   paxos      - the CAS / lightweight-transaction driver.
//   batchlog   - the atomic (logged) batch driver.
//   truncate   - the cluster truncate driver.
//   schema     - the schema-version probe driver (describeSchemaVersions).
//   testkit    - test-only in-memory cluster (see individual modules'
//                test submodules for its use).

mod batchlog;
mod collector;
mod context;
mod endpoint;
mod external;
mod hints;
mod paxos;
mod range;
mod read;
mod reconcile;
mod schema;
mod truncate;
mod write;

#[cfg(any(test, feature = "testkit"))]
mod testkit;
#[cfg(feature = "testkit")]
pub use testkit::InMemoryCluster;

pub use batchlog::BatchlogDriver;
pub use collector::{Flavor, ResponseCollector};
pub use context::CoordinatorContext;
pub use endpoint::EndpointResolver;
pub use external::{
    HintStore, LivenessDetector, Messaging, PlacementOracle, RealSleeper, ReplicationStrategy, RrOutcome, Sleeper,
    Snitch, StorageEngine, Token,
};
pub use hints::{HintBacklog, HintSubmitter};
pub use paxos::{PaxosDriver, PaxosOutcome};
pub use range::RangeScanDriver;
pub use read::{digest_of, ReadExecutor};
pub use schema::SchemaVersionProber;
pub use truncate::TruncateDriver;
pub use write::WriteDispatcher;
