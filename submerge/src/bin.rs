// Illustrative wiring: a three-node single-DC cluster (the `testkit`
// in-memory implementations of every external collaborator in
// `submerge_txn::external`), a quorum write, a quorum read, and a
// compare-and-swap driven through the Paxos driver. Not a real server
// (see the crate-level comment in `lib.rs` for what a production
// embedding would wire `CoordinatorContext` to instead).

use submerge::Server;
use submerge_base::{ConsistencyLevel, WriteType};
use submerge_lang::{Bin, Path, Vals, Word};
use submerge_net::{Mutation, NodeID, NodeTime, RealmTime};
use submerge_txn::{InMemoryCluster, PaxosDriver, PaxosOutcome, ReadExecutor, WriteDispatcher};

fn key(block: i64) -> Path {
    Path(vec![Word::from_bin_unchecked(Bin::new(block, 0))])
}

fn main() {
    let cluster = InMemoryCluster::three_node_single_dc();
    let mut server = Server::new("demo_ks", cluster.context_for(NodeID(0)));
    server.start();

    let k = key(1);
    let now = RealmTime { time: NodeTime(0), node: NodeID(0), event: 0 };

    let write = WriteDispatcher::new(&server.ctx, server.keyspace.clone());
    let mutation = Mutation { key: k.clone(), writes: vec![(k.clone(), Vals::I64s(vec![42]))], timestamp: now, is_counter: false };
    write
        .dispatch(mutation, WriteType::Simple, ConsistencyLevel::Quorum, now.time)
        .expect("quorum write");
    println!("wrote key {:?} at CL=QUORUM", k);

    let read = ReadExecutor::new(&server.ctx, server.keyspace.clone());
    let observed = read.read(&k, ConsistencyLevel::Quorum, false).expect("quorum read");
    println!("read back: {observed:?}");

    let paxos = PaxosDriver::new(&server.ctx, server.keyspace.clone());
    let outcome = paxos
        .cas(&k, ConsistencyLevel::Serial, now.time, |current| {
            (current == Some(&Vals::I64s(vec![42]))).then(|| Vals::I64s(vec![43]))
        })
        .expect("cas attempt");
    match outcome {
        PaxosOutcome::Applied => println!("CAS applied: 42 -> 43"),
        PaxosOutcome::NotApplied(read) => println!("CAS precondition failed, observed {read:?}"),
    }
}
