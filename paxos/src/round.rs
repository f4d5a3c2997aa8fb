//! # Summary
//!
//! This module keeps the scratch state of one in-flight client request:
//! which followers the leader has contacted, their promise and accept
//! responses, and the queue guard that serializes rounds on a leader.

use std::net::SocketAddr;
use std::sync::Arc;

use hashbrown::HashMap as Map;
use tokio::sync::OwnedSemaphorePermit;

use crate::dispatcher::Dispatcher;

/// Token holding this round's spot in the leader's request queue.
/// Dropping it, on any terminating path, admits the next queued request.
pub type QueueGuard = OwnedSemaphorePermit;

/// A follower's verdict on the round's proposal id.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Promise {
    Ack,
    Reject,
}

/// Per-request scratch state, owned by the round driver.
pub struct Round {
    proposal_id: i64,
    workload: Vec<u8>,
    connections: Map<SocketAddr, Arc<Dispatcher>>,
    accepted: Map<SocketAddr, Promise>,
    responses: Map<SocketAddr, Vec<u8>>,
    _queue_guard: QueueGuard,
}

impl Round {
    pub fn new(proposal_id: i64, workload: Vec<u8>, queue_guard: QueueGuard) -> Self {
        Round {
            proposal_id,
            workload,
            connections: Map::new(),
            accepted: Map::new(),
            responses: Map::new(),
            _queue_guard: queue_guard,
        }
    }

    /// The proposal id chosen when this round was initiated. The node's
    /// own id can move past this mid-round; the round's never does.
    pub fn proposal_id(&self) -> i64 {
        self.proposal_id
    }

    pub fn workload(&self) -> &[u8] {
        &self.workload
    }

    /// Claims an entry for a follower about to be sent a prepare. Each
    /// follower is contacted at most once per round.
    pub fn contact(&mut self, follower: SocketAddr, connection: Arc<Dispatcher>) {
        let replaced = self.connections.insert(follower, connection);
        assert!(
            replaced.is_none(),
            "follower {} contacted twice in one round",
            follower,
        );
    }

    /// Snapshot of every contacted follower and its connection.
    pub fn connections(&self) -> Vec<(SocketAddr, Arc<Dispatcher>)> {
        self.connections
            .iter()
            .map(|(follower, connection)| (*follower, connection.clone()))
            .collect()
    }

    /// Records a follower's reply to our prepare.
    pub fn record_promise(&mut self, follower: SocketAddr, promise: Promise) {
        assert!(
            self.connections.contains_key(&follower),
            "promise from follower {} that was never contacted",
            follower,
        );
        let replaced = self.accepted.insert(follower, promise);
        assert!(
            replaced.is_none(),
            "follower {} responded twice to one prepare",
            follower,
        );
    }

    /// Whether `follower` promised this round's proposal id.
    pub fn promised(&self, follower: SocketAddr) -> bool {
        self.accepted.get(&follower) == Some(&Promise::Ack)
    }

    /// Revokes a follower's promise after it failed the accept phase.
    pub fn downgrade(&mut self, follower: SocketAddr) {
        let promise = self
            .accepted
            .get_mut(&follower)
            .expect("downgraded follower never responded to prepare");
        *promise = Promise::Reject;
    }

    /// Records a follower's accept-phase reply.
    pub fn record_response(&mut self, follower: SocketAddr, workload: Vec<u8>) {
        assert!(
            self.promised(follower),
            "accept response from follower {} that did not promise",
            follower,
        );
        let replaced = self.responses.insert(follower, workload);
        assert!(
            replaced.is_none(),
            "follower {} responded twice to one accept",
            follower,
        );
    }

    /// Whether every contacted follower has answered the prepare.
    pub fn everyone_responded(&self) -> bool {
        self.connections.len() == self.accepted.len()
    }

    /// Whether every recorded reply is a promise.
    pub fn everyone_promised(&self) -> bool {
        self.accepted.values().all(|promise| *promise == Promise::Ack)
    }

    /// Whether every contacted follower has answered the accept.
    pub fn all_responses_in(&self) -> bool {
        self.connections.len() == self.responses.len()
    }

    /// Whether all accept-phase replies agree. The first non-empty reply
    /// sets the reference; any later reply that differs marks the set
    /// inconsistent.
    pub fn all_same_response(&self) -> bool {
        let mut reference: &[u8] = &[];
        for workload in self.responses.values() {
            if reference.is_empty() {
                reference = workload;
            } else if reference != &workload[..] {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::{mpsc, Semaphore};

    use super::*;

    fn guard() -> QueueGuard {
        Arc::new(Semaphore::new(1)).try_acquire_owned().unwrap()
    }

    fn connection(keep: &mut Vec<tokio::io::DuplexStream>) -> Arc<Dispatcher> {
        let (near, far) = tokio::io::duplex(64);
        keep.push(far);
        let (inbound, _) = mpsc::unbounded_channel();
        Dispatcher::spawn(near, inbound)
    }

    fn endpoint(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    #[tokio::test]
    async fn tracks_promises_and_responses() {
        let mut keep = Vec::new();
        let (a, b) = (endpoint(9001), endpoint(9002));
        let mut round = Round::new(1, b"w".to_vec(), guard());
        round.contact(a, connection(&mut keep));
        round.contact(b, connection(&mut keep));

        assert!(!round.everyone_responded());
        round.record_promise(a, Promise::Ack);
        assert!(!round.everyone_responded());
        round.record_promise(b, Promise::Ack);
        assert!(round.everyone_responded());
        assert!(round.everyone_promised());

        round.record_response(a, b"r".to_vec());
        assert!(!round.all_responses_in());
        round.record_response(b, b"r".to_vec());
        assert!(round.all_responses_in());
        assert!(round.all_same_response());
    }

    #[tokio::test]
    async fn one_rejection_spoils_the_quorum() {
        let mut keep = Vec::new();
        let (a, b) = (endpoint(9001), endpoint(9002));
        let mut round = Round::new(1, b"w".to_vec(), guard());
        round.contact(a, connection(&mut keep));
        round.contact(b, connection(&mut keep));

        round.record_promise(a, Promise::Ack);
        round.record_promise(b, Promise::Reject);
        assert!(round.everyone_responded());
        assert!(!round.everyone_promised());
    }

    #[tokio::test]
    async fn downgrade_revokes_a_promise() {
        let mut keep = Vec::new();
        let a = endpoint(9001);
        let mut round = Round::new(1, b"w".to_vec(), guard());
        round.contact(a, connection(&mut keep));
        round.record_promise(a, Promise::Ack);
        assert!(round.everyone_promised());

        round.downgrade(a);
        assert!(!round.everyone_promised());
    }

    #[tokio::test]
    async fn divergent_responses_are_detected() {
        let mut keep = Vec::new();
        let (a, b) = (endpoint(9001), endpoint(9002));
        let mut round = Round::new(1, b"w".to_vec(), guard());
        round.contact(a, connection(&mut keep));
        round.contact(b, connection(&mut keep));
        round.record_promise(a, Promise::Ack);
        round.record_promise(b, Promise::Ack);

        round.record_response(a, b"r1".to_vec());
        round.record_response(b, b"r2".to_vec());
        assert!(!round.all_same_response());
    }

    #[tokio::test]
    #[should_panic(expected = "contacted twice")]
    async fn double_contact_is_a_programming_error() {
        let mut keep = Vec::new();
        let a = endpoint(9001);
        let mut round = Round::new(1, b"w".to_vec(), guard());
        round.contact(a, connection(&mut keep));
        round.contact(a, connection(&mut keep));
    }

    #[tokio::test]
    async fn queue_guard_is_released_on_drop() {
        let queue = Arc::new(Semaphore::new(1));
        let round = Round::new(1, Vec::new(), queue.clone().try_acquire_owned().unwrap());
        assert!(queue.clone().try_acquire_owned().is_err());

        drop(round);
        assert!(queue.try_acquire_owned().is_ok());
    }
}
