// Component B: the response collector, a reusable quorum barrier. The
// same type serves both writes (write-timeout/write-failure) and reads
// (read-timeout/read-failure, with a `dataPresent` flag) by construction
// with a different `Flavor`, so there is exactly one quorum-counting
// implementation in the crate, per spec §4.B.

use std::collections::BTreeSet;

use submerge_base::{ConsistencyLevel, Error, Result, WriteType};
use submerge_net::NodeID;

/// Which error kind `await_result` should raise on failure, and how.
#[derive(Clone, Copy, Debug)]
pub enum Flavor {
    Write(WriteType),
    Read { data_present: bool },
}

/// A quorum barrier over a fixed set of `targets`. Construction mirrors
/// `writeResponseHandler(natural, pending, CL, callback, writeType)`: the
/// caller has already decided the full target set (natural ∪ pending,
/// filtered to whatever it intends to actually contact).
pub struct ResponseCollector {
    targets: Vec<NodeID>,
    block_for: usize,
    consistency: ConsistencyLevel,
    flavor: Flavor,
    received: BTreeSet<NodeID>,
    failed: BTreeSet<NodeID>,
}

impl ResponseCollector {
    pub fn new(targets: Vec<NodeID>, consistency: ConsistencyLevel, block_for: usize, flavor: Flavor) -> ResponseCollector {
        ResponseCollector {
            targets,
            block_for,
            consistency,
            flavor,
            received: BTreeSet::new(),
            failed: BTreeSet::new(),
        }
    }

    pub fn targets(&self) -> &[NodeID] {
        &self.targets
    }

    pub fn block_for(&self) -> usize {
        self.block_for
    }

    pub fn consistency(&self) -> ConsistencyLevel {
        self.consistency
    }

    /// Fails fast, before any message is sent, when fewer live targets
    /// than `blockFor` exist.
    pub fn assure_sufficient_live_nodes(&self, live: &BTreeSet<NodeID>) -> Result<()> {
        let alive = self.targets.iter().filter(|t| live.contains(t)).count();
        if alive < self.block_for {
            tracing::warn!(target: "submerge", alive, block_for = self.block_for, "insufficient live nodes");
            return Err(Error::unavailable(self.block_for, alive));
        }
        Ok(())
    }

    /// Idempotent per sender: a straggler's second response is a no-op
    /// because `received` is a set.
    pub fn on_response(&mut self, from: NodeID) {
        self.received.insert(from);
    }

    pub fn on_failure(&mut self, from: NodeID) {
        self.failed.insert(from);
    }

    pub fn received_count(&self) -> usize {
        self.received.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn has_received(&self, from: NodeID) -> bool {
        self.received.contains(&from)
    }

    /// True the instant `received` crosses `blockFor` from below; callers
    /// that poll this after each `on_response` observe exactly one
    /// transition, per the ordering guarantee in spec §4.B.
    pub fn is_satisfied(&self) -> bool {
        self.received.len() >= self.block_for
    }

    /// Resolves the barrier. Every destination that has neither responded
    /// nor explicitly failed by the time this is called is treated as
    /// "will never respond" (this crate's synchronous messaging model
    /// resolves every send before the caller can observe the barrier, see
    /// `external::RrOutcome`), so the failure/timeout split collapses to:
    /// explicit failures sum with never-responding destinations against
    /// the same `blockFor` bound the spec's invariant describes.
    pub fn await_result(&self) -> Result<()> {
        if self.is_satisfied() {
            return Ok(());
        }
        let total = self.targets.len();
        let never_responding = total.saturating_sub(self.received.len() + self.failed.len());
        let is_failure = self.failed.len() + never_responding > total.saturating_sub(self.block_for);
        match self.flavor {
            Flavor::Write(write_type) => {
                if is_failure {
                    Err(Error::write_failure(write_type, self.received.len(), self.block_for, self.failed.len()))
                } else {
                    Err(Error::write_timeout(write_type, self.received.len(), self.block_for))
                }
            }
            Flavor::Read { data_present } => {
                if is_failure {
                    Err(Error::read_failure(self.received.len(), self.block_for, self.failed.len(), data_present))
                } else {
                    Err(Error::read_timeout(self.received.len(), self.block_for, data_present))
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use submerge_base::ErrorKind;
    use test_log::test;

    fn targets(n: i64) -> Vec<NodeID> {
        (0..n).map(NodeID).collect()
    }

    #[test]
    fn success_once_block_for_crossed() {
        let mut c = ResponseCollector::new(targets(3), ConsistencyLevel::Quorum, 2, Flavor::Write(WriteType::Simple));
        assert!(!c.is_satisfied());
        c.on_response(NodeID(0));
        assert!(!c.is_satisfied());
        c.on_response(NodeID(1));
        assert!(c.is_satisfied());
        assert!(c.await_result().is_ok());
    }

    #[test]
    fn duplicate_response_does_not_double_count() {
        let mut c = ResponseCollector::new(targets(3), ConsistencyLevel::Quorum, 2, Flavor::Write(WriteType::Simple));
        c.on_response(NodeID(0));
        c.on_response(NodeID(0));
        assert_eq!(c.received_count(), 1);
    }

    #[test]
    fn insufficient_acks_is_write_failure_when_enough_failed() {
        let mut c = ResponseCollector::new(targets(3), ConsistencyLevel::Quorum, 2, Flavor::Write(WriteType::Simple));
        c.on_response(NodeID(0));
        c.on_failure(NodeID(1));
        c.on_failure(NodeID(2));
        match c.await_result().unwrap_err().kind() {
            ErrorKind::WriteFailure { received, block_for, failures, .. } => {
                assert_eq!(*received, 1);
                assert_eq!(*block_for, 2);
                assert_eq!(*failures, 2);
            }
            other => panic!("wrong kind: {other:?}"),
        }
    }

    #[test]
    fn insufficient_acks_with_no_explicit_failure_is_timeout() {
        let mut c = ResponseCollector::new(targets(3), ConsistencyLevel::Quorum, 2, Flavor::Write(WriteType::Simple));
        c.on_response(NodeID(0));
        assert!(matches!(c.await_result().unwrap_err().kind(), ErrorKind::WriteTimeout { .. }));
    }

    #[test]
    fn assure_sufficient_live_nodes_fails_fast() {
        let c = ResponseCollector::new(targets(3), ConsistencyLevel::Quorum, 2, Flavor::Write(WriteType::Simple));
        let mut live = BTreeSet::new();
        live.insert(NodeID(0));
        assert!(matches!(c.assure_sufficient_live_nodes(&live).unwrap_err().kind(), ErrorKind::Unavailable { .. }));
    }
}
