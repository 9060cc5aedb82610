// Component G: the Paxos driver (lightweight transactions / CAS). An
// explicit, data-carrying state machine rather than exception-driven
// control flow (§9): every transition is a value the outer retry loop
// matches on.
//
// S0 PREPARE -> S1 READ -> S2 PROPOSE -> S3 COMMIT -> Applied
//      |                       |
//      Preempted          Preempted
//      IncompletePrior
//      MissingMrc

use std::sync::atomic::Ordering;

use submerge_base::{ConsistencyLevel, Error, Result, WriteType};
use submerge_lang::{Path, Vals};
use submerge_net::{Ballot, Commit, Duration, Mutation, NodeID, NodeTime, RealmTime, SpecificMsg};

use crate::collector::{Flavor, ResponseCollector};
use crate::context::CoordinatorContext;
use crate::endpoint::EndpointResolver;
use crate::external::RrOutcome;
use crate::read::ReadExecutor;

/// Bounds the contention retry loop. The spec's CAS-contention timeout is
/// a wall-clock bound; this crate has no live clock (every "now" is
/// caller-supplied, §5), so a fixed attempt cap stands in for it; the
/// last attempt still reports write-timeout, matching "on expiry:
/// write-timeout with zero received, blockFor = keyspace quorum".
const MAX_ATTEMPTS: u32 = 10;

#[derive(Debug)]
pub enum PaxosOutcome {
    Applied,
    /// The precondition rejected the read value; carries what was read.
    NotApplied(Option<Vals>),
}

enum StepOutcome {
    Applied,
    NotApplied(Option<Vals>),
    Preempted,
    IncompletePrior,
    MissingMrc,
}

struct PrepareResult {
    ballot: Ballot,
    targets: Vec<NodeID>,
    promises: Vec<(NodeID, bool, Option<Commit>, Option<Commit>)>,
}

struct PrepareInspection {
    rejected: bool,
    highest_accepted: Option<Commit>,
    highest_mrc: Option<Commit>,
    missing_mrc_replicas: Vec<NodeID>,
}

fn inspect_promises(promises: &[(NodeID, bool, Option<Commit>, Option<Commit>)]) -> PrepareInspection {
    let rejected = promises.iter().any(|(_, promised, _, _)| !promised);
    let highest_accepted = promises.iter().filter_map(|(_, _, a, _)| a.clone()).max_by_key(|c| c.ballot);
    let highest_mrc = promises.iter().filter_map(|(_, _, _, m)| m.clone()).max_by_key(|c| c.ballot);

    let incomplete_prior = match (&highest_accepted, &highest_mrc) {
        (Some(acc), Some(mrc)) => acc.ballot > mrc.ballot,
        (Some(_), None) => true,
        _ => false,
    };

    let missing_mrc_replicas = match &highest_mrc {
        Some(mrc) => promises
            .iter()
            .filter(|(_, _, _, m)| m.as_ref().map(|c| c.ballot) != Some(mrc.ballot))
            .map(|(n, _, _, _)| *n)
            .collect(),
        None => Vec::new(),
    };

    PrepareInspection {
        rejected,
        highest_accepted: if incomplete_prior { highest_accepted } else { None },
        highest_mrc,
        missing_mrc_replicas,
    }
}

pub struct PaxosDriver<'a> {
    ctx: &'a CoordinatorContext,
    keyspace: String,
}

impl<'a> PaxosDriver<'a> {
    pub fn new(ctx: &'a CoordinatorContext, keyspace: impl Into<String>) -> PaxosDriver<'a> {
        PaxosDriver { ctx, keyspace: keyspace.into() }
    }

    fn resolver(&self) -> EndpointResolver<'a> {
        EndpointResolver::new(self.ctx)
    }

    fn participants(&self, key: &Path) -> (Vec<NodeID>, usize) {
        let resolver = self.resolver();
        let (natural, pending) = resolver.replicas_for_write(&self.keyspace, key);
        let mut targets = natural;
        for p in pending {
            if !targets.contains(&p) {
                targets.push(p);
            }
        }
        let block_for = ConsistencyLevel::Serial.block_for(targets.len());
        (targets, block_for)
    }

    /// Drives a single compare-and-swap attempt to completion, retrying
    /// through Paxos contention (preemption, in-progress repair, missing
    /// most-recent-commit catch-up) until it applies, the precondition
    /// fails, or the attempt cap is exhausted.
    ///
    /// `precondition` is evaluated against the quorum-read current value
    /// and returns `Some(new_value)` to propose, or `None` to abort
    /// without writing (this stands in for the CQL `IF` clause the wire
    /// format does not carry, §9).
    pub fn cas(&self, key: &Path, consistency: ConsistencyLevel, now: NodeTime, precondition: impl Fn(Option<&Vals>) -> Option<Vals>) -> Result<PaxosOutcome> {
        let (_, block_for) = self.participants(key);
        for attempt_idx in 0..MAX_ATTEMPTS {
            match self.attempt(key, consistency, &precondition, now, attempt_idx)? {
                StepOutcome::Applied => return Ok(PaxosOutcome::Applied),
                StepOutcome::NotApplied(read) => return Ok(PaxosOutcome::NotApplied(read)),
                StepOutcome::Preempted => {
                    self.ctx.admin.metrics().cas_contention.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(target: "submerge", attempt = attempt_idx, "paxos preempted, backing off");
                    self.ctx.sleeper.sleep(Duration::from_millis((attempt_idx as i64 * 7 + 3) % 100));
                }
                StepOutcome::IncompletePrior => {
                    tracing::debug!(target: "submerge", attempt = attempt_idx, "paxos repairing incomplete prior proposal");
                }
                StepOutcome::MissingMrc => {
                    tracing::debug!(target: "submerge", attempt = attempt_idx, "paxos replicas missing most recent commit");
                }
            }
        }
        Err(Error::write_timeout(WriteType::Cas, 0, block_for))
    }

    fn attempt(
        &self,
        key: &Path,
        consistency: ConsistencyLevel,
        precondition: &impl Fn(Option<&Vals>) -> Option<Vals>,
        now: NodeTime,
        attempt_idx: u32,
    ) -> Result<StepOutcome> {
        let ballot = Ballot::new(now.micros(), self.ctx.local_node, attempt_idx);
        let prep = self.prepare(key, ballot, consistency)?;
        let inspection = inspect_promises(&prep.promises);

        if inspection.rejected {
            return Ok(StepOutcome::Preempted);
        }

        if let Some(prior) = inspection.highest_accepted {
            let repropose = Commit { ballot, key: key.clone(), update: prior.update.clone() };
            let _ = self.propose_and_commit(&prep.targets, repropose, consistency);
            return Ok(StepOutcome::IncompletePrior);
        }

        if !inspection.missing_mrc_replicas.is_empty() {
            if let Some(mrc) = inspection.highest_mrc {
                for dest in &inspection.missing_mrc_replicas {
                    self.ctx.messaging.send_one_way(*dest, SpecificMsg::Commit { commit: mrc.clone() });
                }
            }
            return Ok(StepOutcome::MissingMrc);
        }

        // S1 Read.
        let read_cl = consistency.commit_cl();
        let current = ReadExecutor::new(self.ctx, self.keyspace.clone()).read(key, read_cl, false)?;
        let proposed = match precondition(current.as_ref()) {
            Some(v) => v,
            None => return Ok(StepOutcome::NotApplied(current)),
        };

        // S2 Propose.
        let mutation = Mutation {
            key: key.clone(),
            writes: vec![(key.clone(), proposed)],
            timestamp: RealmTime { time: ballot.as_node_time(), node: self.ctx.local_node, event: 0 },
            is_counter: false,
        };
        let commit = Commit { ballot, key: key.clone(), update: Some(mutation) };
        if !self.propose(&prep.targets, &commit, consistency)? {
            return Ok(StepOutcome::Preempted);
        }

        // S3 Commit.
        self.commit(&prep.targets, &commit, consistency)?;
        Ok(StepOutcome::Applied)
    }

    fn prepare(&self, key: &Path, ballot: Ballot, consistency: ConsistencyLevel) -> Result<PrepareResult> {
        let resolver = self.resolver();
        let (natural, pending) = resolver.replicas_for_write(&self.keyspace, key);
        let mut targets = natural;
        for p in pending {
            if !targets.contains(&p) {
                targets.push(p);
            }
        }
        let alive = resolver.filter_alive(&targets);
        let block_for = ConsistencyLevel::Serial.block_for(targets.len());
        if alive.len() < block_for {
            return Err(Error::unavailable(block_for, alive.len()));
        }

        let timeout = self.ctx.admin.config().cas_contention_timeout;
        let mut collector = ResponseCollector::new(alive.clone(), consistency, block_for, Flavor::Write(WriteType::Cas));
        let mut promises = Vec::with_capacity(alive.len());
        for &dest in &alive {
            match self.ctx.messaging.send_rr(dest, SpecificMsg::Prepare { ballot, key: key.clone() }, timeout) {
                RrOutcome::Reply(SpecificMsg::Promise { promised, accepted, most_recent_commit }) => {
                    if promised {
                        collector.on_response(dest);
                    } else {
                        collector.on_failure(dest);
                    }
                    promises.push((dest, promised, accepted, most_recent_commit));
                }
                _ => {
                    collector.on_failure(dest);
                    self.ctx.admin.metrics().increment_dropped("PAXOS_PREPARE");
                }
            }
        }
        collector.await_result()?;
        Ok(PrepareResult { ballot, targets: alive, promises })
    }

    fn propose(&self, targets: &[NodeID], commit: &Commit, consistency: ConsistencyLevel) -> Result<bool> {
        let block_for = ConsistencyLevel::Serial.block_for(targets.len());
        let timeout = self.ctx.admin.config().cas_contention_timeout;
        let mut collector = ResponseCollector::new(targets.to_vec(), consistency, block_for, Flavor::Write(WriteType::Cas));
        let mut preempted = false;
        for &dest in targets {
            match self.ctx.messaging.send_rr(dest, SpecificMsg::Propose { commit: commit.clone() }, timeout) {
                RrOutcome::Reply(SpecificMsg::Accepted { accepted, promised_ballot }) => {
                    if accepted {
                        collector.on_response(dest);
                    } else {
                        collector.on_failure(dest);
                        if promised_ballot > commit.ballot {
                            preempted = true;
                        }
                    }
                }
                _ => {
                    collector.on_failure(dest);
                    self.ctx.admin.metrics().increment_dropped("PAXOS_PROPOSE");
                }
            }
        }
        if preempted {
            return Ok(false);
        }
        match collector.await_result() {
            Ok(()) => Ok(true),
            Err(e) => Err(e),
        }
    }

    fn commit(&self, targets: &[NodeID], commit: &Commit, consistency: ConsistencyLevel) -> Result<()> {
        let commit_cl = consistency.commit_cl();
        if commit_cl.is_any() {
            for &dest in targets {
                self.ctx.messaging.send_one_way(dest, SpecificMsg::Commit { commit: commit.clone() });
            }
            return Ok(());
        }
        let block_for = commit_cl.block_for(targets.len());
        let timeout = self.ctx.admin.config().write_rpc_timeout;
        let mut collector = ResponseCollector::new(targets.to_vec(), commit_cl, block_for, Flavor::Write(WriteType::Cas));
        for &dest in targets {
            match self.ctx.messaging.send_rr(dest, SpecificMsg::Commit { commit: commit.clone() }, timeout) {
                RrOutcome::Reply(SpecificMsg::Ack) => collector.on_response(dest),
                _ => collector.on_failure(dest),
            }
        }
        collector.await_result()
    }

    /// Best-effort repair path for an in-progress prior proposal: not
    /// waited on by the caller's own attempt beyond logging, since §4.G
    /// only requires the repair be attempted before restarting at S0.
    fn propose_and_commit(&self, targets: &[NodeID], commit: Commit, consistency: ConsistencyLevel) -> Result<()> {
        if self.propose(targets, &commit, consistency)? {
            self.commit(targets, &commit, consistency)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testkit::InMemoryCluster;
    use submerge_lang::{Bin, Word};
    use test_log::test;

    fn key(n: i64) -> Path {
        Path(vec![Word::from_bin_unchecked(Bin::new(n, 0))])
    }

    #[test]
    fn cas_applies_when_precondition_matches_absent_value() {
        let cluster = InMemoryCluster::three_node_single_dc();
        let ctx = cluster.context_for(NodeID(0));
        let driver = PaxosDriver::new(&ctx, "ks");
        let outcome = driver
            .cas(&key(1), ConsistencyLevel::Serial, NodeTime(100), |current| {
                if current.is_none() {
                    Some(Vals::I64s(vec![9]))
                } else {
                    None
                }
            })
            .unwrap();
        assert!(matches!(outcome, PaxosOutcome::Applied));

        let readback = ReadExecutor::new(&ctx, "ks").read(&key(1), ConsistencyLevel::Quorum, false).unwrap();
        assert_eq!(readback, Some(Vals::I64s(vec![9])));
    }

    #[test]
    fn cas_not_applied_when_precondition_fails() {
        let cluster = InMemoryCluster::three_node_single_dc();
        let ctx = cluster.context_for(NodeID(0));
        let driver = PaxosDriver::new(&ctx, "ks");
        let outcome = driver
            .cas(&key(2), ConsistencyLevel::Serial, NodeTime(200), |current| {
                // Only applies if the column already holds 1, which it never
                // does on a bare key.
                if current == Some(&Vals::I64s(vec![1])) {
                    Some(Vals::I64s(vec![2]))
                } else {
                    None
                }
            })
            .unwrap();
        assert!(matches!(outcome, PaxosOutcome::NotApplied(None)));
    }

    #[test]
    fn cas_unavailable_when_quorum_of_participants_is_dead() {
        let cluster = InMemoryCluster::three_node_single_dc();
        let ctx = cluster.context_for(NodeID(0));
        cluster.kill(NodeID(1));
        cluster.kill(NodeID(2));
        let driver = PaxosDriver::new(&ctx, "ks");
        let result = driver.cas(&key(3), ConsistencyLevel::Serial, NodeTime(300), |_| Some(Vals::I64s(vec![1])));
        assert!(matches!(result.unwrap_err().kind(), submerge_base::ErrorKind::Unavailable { .. }));
    }
}
