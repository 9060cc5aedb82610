// Model-checks invariant 2 (§8, Paxos linearizability): for a single
// key, the sequence of committed ballots is strictly increasing and no
// two committed proposals share a ballot. This is the abstract
// single-decree safety property, modeled the way stateright's own
// bundled Paxos example does it (three acceptors, a majority quorum,
// per-acceptor promised/accepted state) rather than by driving
// `PaxosDriver` directly; the driver's actual prepare/propose/commit
// RPC shape is exercised by the in-memory-cluster tests alongside it in
// `src/paxos.rs`.

use stateright::{Checker, Model, Property};

const ACCEPTORS: usize = 3;
const QUORUM: usize = 2;
const BALLOTS: u8 = 4;
const VALUES: u8 = 2;

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct AcceptorState {
    promised: Option<u8>,
    accepted: Option<(u8, u8)>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct PaxosState {
    acceptors: [AcceptorState; ACCEPTORS],
    committed: Vec<u8>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
enum PaxosAction {
    Promise { acceptor: usize, ballot: u8 },
    Accept { acceptor: usize, ballot: u8, value: u8 },
    Commit { ballot: u8 },
}

struct PaxosModel;

impl Model for PaxosModel {
    type State = PaxosState;
    type Action = PaxosAction;

    fn init_states(&self) -> Vec<Self::State> {
        let blank = AcceptorState { promised: None, accepted: None };
        vec![PaxosState { acceptors: [blank.clone(), blank.clone(), blank], committed: Vec::new() }]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        for ballot in 0..BALLOTS {
            for (idx, acceptor) in state.acceptors.iter().enumerate() {
                if acceptor.promised.map_or(true, |p| ballot > p) {
                    actions.push(PaxosAction::Promise { acceptor: idx, ballot });
                }
                if acceptor.promised.map_or(true, |p| ballot >= p) {
                    for value in 0..VALUES {
                        actions.push(PaxosAction::Accept { acceptor: idx, ballot, value });
                    }
                }
            }
            actions.push(PaxosAction::Commit { ballot });
        }
    }

    fn next_state(&self, state: &Self::State, action: Self::Action) -> Option<Self::State> {
        let mut next = state.clone();
        match action {
            PaxosAction::Promise { acceptor, ballot } => {
                let a = &mut next.acceptors[acceptor];
                if a.promised.map_or(true, |p| ballot > p) {
                    a.promised = Some(ballot);
                    Some(next)
                } else {
                    None
                }
            }
            PaxosAction::Accept { acceptor, ballot, value } => {
                let a = &mut next.acceptors[acceptor];
                if a.promised.map_or(true, |p| ballot >= p) {
                    a.accepted = Some((ballot, value));
                    a.promised = Some(a.promised.map_or(ballot, |p| p.max(ballot)));
                    Some(next)
                } else {
                    None
                }
            }
            PaxosAction::Commit { ballot } => {
                let accept_count = state.acceptors.iter().filter(|a| a.accepted.map_or(false, |(b, _)| b == ballot)).count();
                if accept_count >= QUORUM && !next.committed.contains(&ballot) {
                    next.committed.push(ballot);
                    Some(next)
                } else {
                    None
                }
            }
        }
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![Property::always("committed ballots strictly increase and never repeat", |_, state: &PaxosState| {
            state.committed.windows(2).all(|w| w[0] < w[1])
        })]
    }
}

#[test]
fn committed_ballot_sequence_is_strictly_increasing() {
    PaxosModel.checker().spawn_bfs().join().assert_properties();
}
