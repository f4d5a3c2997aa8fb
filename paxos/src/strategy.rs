//! # Summary
//!
//! This module implements the leader-driven two-phase protocol state
//! machine. One round serves one client request: the leader claims a
//! fresh proposal id, broadcasts a prepare to every live server
//! (including itself), and once the whole quorum has promised, broadcasts
//! an accept carrying the workload. The followers' processor outputs are
//! cross-validated and a single representative reply is forwarded to the
//! client.
//!
//! The entry points are grouped behind the [`Strategy`] trait so that
//! protocol variants can override individual steps while reusing the
//! rest.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use log::{debug, error, trace, warn};

use crate::command::{Command, ErrorCode};
use crate::context::Context;
use crate::dispatcher::{Dispatcher, Pending};
use crate::error::Error;
use crate::quorum::Quorum;
use crate::round::{Promise, QueueGuard, Round};
use crate::shared::Shared;

/// Handle for replying to the client that initiated a round.
#[derive(Clone)]
pub struct Reply {
    connection: Arc<Dispatcher>,
    slot: u64,
}

impl Reply {
    pub fn new(connection: Arc<Dispatcher>, slot: u64) -> Self {
        Reply { connection, slot }
    }

    pub fn send(&self, command: Command) {
        self.connection.respond(self.slot, command);
    }
}

/// Progress of the prepare phase after one more follower reply.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Not every follower has responded yet.
    Pending,
    /// Everyone responded and at least one follower rejected the
    /// proposal id.
    Reject,
    /// Everyone responded and promised; the accept phase may begin.
    Advance,
}

/// Progress of the accept phase after one more follower reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Not every follower has responded yet.
    Pending,
    /// The round is over; forward this command to the client.
    Reply(Command),
}

/// The capability set of a protocol variant.
///
/// `initiate` owns the leader's round from client request to client
/// reply; `prepare` and `accept` are the single-shot follower handlers;
/// the `receive_*` continuations digest one follower reply each and hold
/// the decision tables. `reply` and `fail` emit the client-facing result.
pub trait Strategy: Send + Sync + 'static {
    /// Runs one full round on the leader. Must only be called while the
    /// caller holds the leader's queue guard.
    fn initiate(
        &self,
        client: Reply,
        workload: Vec<u8>,
        quorum: &Shared<Quorum>,
        context: &Shared<Context>,
        queue_guard: QueueGuard,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Claims the follower's entry in the round and writes the prepare,
    /// returning the registered read for the follower's reply.
    fn send_prepare(
        &self,
        round: &mut Round,
        leader: SocketAddr,
        follower: SocketAddr,
        connection: Arc<Dispatcher>,
    ) -> impl Future<Output = Result<Pending, Error>> + Send;

    /// Follower side of phase 1: decide whether to promise `command`'s
    /// proposal id. Returns the response to write back.
    fn prepare(
        &self,
        command: Command,
        quorum: &Shared<Quorum>,
        context: &Shared<Context>,
    ) -> impl Future<Output = Command> + Send;

    /// Digests one prepare-phase reply and reports how the round should
    /// proceed.
    fn receive_promise(
        &self,
        round: &mut Round,
        follower: SocketAddr,
        reply: Command,
        context: &Shared<Context>,
    ) -> impl Future<Output = Result<Phase, Error>> + Send;

    /// Writes the accept to a follower that promised, returning the
    /// registered read for its reply.
    fn send_accept(
        &self,
        round: &Round,
        leader: SocketAddr,
        follower: SocketAddr,
        connection: Arc<Dispatcher>,
    ) -> impl Future<Output = Result<Pending, Error>> + Send;

    /// Follower side of phase 2: run the processor over the workload if
    /// the promised proposal id still stands. Returns the response to
    /// write back.
    fn accept(
        &self,
        command: Command,
        quorum: &Shared<Quorum>,
        context: &Shared<Context>,
    ) -> impl Future<Output = Command> + Send;

    /// Digests one accept-phase reply; once the last one is in, yields
    /// the command to forward to the client.
    fn receive_accepted(
        &self,
        round: &mut Round,
        follower: SocketAddr,
        reply: Command,
    ) -> impl Future<Output = Result<Verdict, Error>> + Send;

    /// Forwards a round's result to the client.
    fn reply(&self, client: &Reply, command: Command) {
        client.send(command);
    }

    /// Reports a failed round to the client.
    fn fail(&self, client: &Reply, code: ErrorCode) {
        client.send(Command::Error { code });
    }
}

/// The basic strategy: single decree, unanimity across the live quorum.
#[derive(Copy, Clone, Debug, Default)]
pub struct BasicPaxos;

impl Strategy for BasicPaxos {
    async fn initiate(
        &self,
        client: Reply,
        workload: Vec<u8>,
        quorum: &Shared<Quorum>,
        context: &Shared<Context>,
        queue_guard: QueueGuard,
    ) -> Result<(), Error> {
        let (leader, live) = {
            let quorum = quorum.read();
            assert_eq!(
                quorum.who_is_our_leader(),
                Some(quorum.our_endpoint()),
                "initiate called on a non-leader",
            );
            (quorum.our_endpoint(), quorum.live_server_endpoints())
        };

        // Every request starts by claiming a fresh proposal id.
        let proposal_id = context.write().next_proposal_id();
        debug!(
            "initiating round {} across {} live servers",
            proposal_id,
            live.len(),
        );

        let mut round = Round::new(proposal_id, workload, queue_guard);

        let mut promises = FuturesUnordered::new();
        for follower in live {
            let connection = match quorum.read().lookup_server(follower) {
            | Some(server) => server.connection(),
            | None => continue,
            };
            let pending = self
                .send_prepare(&mut round, leader, follower, connection)
                .await?;
            promises.push(async move { (follower, pending.await) });
        }

        if promises.is_empty() {
            warn!("round {} has no live servers to contact", proposal_id);
            self.fail(&client, ErrorCode::NoLeader);
            return Ok(());
        }

        let mut phase = Phase::Pending;
        while let Some((follower, reply)) = promises.next().await {
            // A dropped connection enters the state machine as a failure.
            let reply = reply.unwrap_or(Command::Fail { proposal_id: 0 });
            phase = self
                .receive_promise(&mut round, follower, reply, context)
                .await?;
            if phase != Phase::Pending {
                break;
            }
        }
        drop(promises);

        match phase {
        | Phase::Pending => {
            return Err(Error::Protocol("prepare phase ended without a quorum decision"));
        }
        | Phase::Reject => {
            debug!("round {} rejected during prepare", round.proposal_id());
            self.fail(&client, ErrorCode::IncorrectProposal);
            return Ok(());
        }
        | Phase::Advance => (),
        }

        let mut accepts = FuturesUnordered::new();
        for (follower, connection) in round.connections() {
            let pending = self
                .send_accept(&round, leader, follower, connection)
                .await?;
            accepts.push(async move { (follower, pending.await) });
        }

        while let Some((follower, reply)) = accepts.next().await {
            let reply = reply.unwrap_or(Command::Fail { proposal_id: 0 });
            let verdict = self.receive_accepted(&mut round, follower, reply).await?;
            if let Verdict::Reply(response) = verdict {
                debug!("round {} finished", round.proposal_id());
                self.reply(&client, response);
                return Ok(());
            }
        }

        Err(Error::Protocol("accept phase ended without a client reply"))
    }

    async fn send_prepare(
        &self,
        round: &mut Round,
        leader: SocketAddr,
        follower: SocketAddr,
        connection: Arc<Dispatcher>,
    ) -> Result<Pending, Error> {
        round.contact(follower, connection.clone());

        let command = Command::Prepare {
            proposal_id: round.proposal_id(),
            host_endpoint: leader,
        };
        trace!("sending {:?} to {}", command, follower);

        let slot = connection.slot();
        let pending = connection.read(slot);
        connection.write(slot, command);
        Ok(pending)
    }

    async fn prepare(
        &self,
        command: Command,
        quorum: &Shared<Quorum>,
        context: &Shared<Context>,
    ) -> Command {
        let (proposal_id, host_endpoint) = match command {
        | Command::Prepare { proposal_id, host_endpoint } => (proposal_id, host_endpoint),
        | command => unreachable!("prepare invoked with {:?}", command),
        };

        let ours = quorum.read().our_endpoint();
        let mut context = context.write();
        if host_endpoint == ours {
            // The leader preparing itself: always promise.
            Command::Promise { proposal_id: context.proposal_id() }
        } else if proposal_id > context.proposal_id() {
            context.observe(proposal_id);
            Command::Promise { proposal_id: context.proposal_id() }
        } else {
            debug!(
                "rejecting prepare {} from {}: already at {}",
                proposal_id,
                host_endpoint,
                context.proposal_id(),
            );
            Command::Fail { proposal_id: context.proposal_id() }
        }
    }

    async fn receive_promise(
        &self,
        round: &mut Round,
        follower: SocketAddr,
        reply: Command,
        context: &Shared<Context>,
    ) -> Result<Phase, Error> {
        trace!("received {:?} from {}", reply, follower);
        match reply {
        | Command::Promise { proposal_id } => {
            if proposal_id != round.proposal_id() {
                error!(
                    "promise for proposal {} in round {}",
                    proposal_id,
                    round.proposal_id(),
                );
                return Err(Error::Protocol("promise for a proposal this round never sent"));
            }
            round.record_promise(follower, Promise::Ack);
        }
        | Command::Fail { proposal_id } => {
            round.record_promise(follower, Promise::Reject);
            // The next round must start above everything this follower
            // has already seen.
            context.write().observe(proposal_id);
        }
        | command => {
            error!("unexpected {:?} while awaiting a promise from {}", command, follower);
            return Err(Error::Protocol("unexpected command while awaiting a promise"));
        }
        }

        Ok(if !round.everyone_responded() {
            Phase::Pending
        } else if round.everyone_promised() {
            Phase::Advance
        } else {
            Phase::Reject
        })
    }

    async fn send_accept(
        &self,
        round: &Round,
        leader: SocketAddr,
        follower: SocketAddr,
        connection: Arc<Dispatcher>,
    ) -> Result<Pending, Error> {
        assert!(
            round.promised(follower),
            "accept sent to follower {} that did not promise",
            follower,
        );

        let command = Command::Accept {
            proposal_id: round.proposal_id(),
            host_endpoint: leader,
            workload: round.workload().to_vec(),
        };
        trace!("sending {:?} to {}", command, follower);

        let slot = connection.slot();
        let pending = connection.read(slot);
        connection.write(slot, command);
        Ok(pending)
    }

    async fn accept(
        &self,
        command: Command,
        _quorum: &Shared<Quorum>,
        context: &Shared<Context>,
    ) -> Command {
        let (proposal_id, workload) = match command {
        | Command::Accept { proposal_id, workload, .. } => (proposal_id, workload),
        | command => unreachable!("accept invoked with {:?}", command),
        };

        let context = context.read();
        if proposal_id != context.proposal_id() {
            // Our promise has been overtaken, most likely by a switch of
            // leaders during the round.
            warn!(
                "accept for proposal {} but we promised {}",
                proposal_id,
                context.proposal_id(),
            );
            Command::Fail { proposal_id: context.proposal_id() }
        } else {
            Command::Accepted {
                proposal_id,
                workload: context.process(&workload),
            }
        }
    }

    async fn receive_accepted(
        &self,
        round: &mut Round,
        follower: SocketAddr,
        reply: Command,
    ) -> Result<Verdict, Error> {
        trace!("received {:?} from {}", reply, follower);
        let response = match &reply {
        | Command::Accepted { workload, .. } => workload.clone(),
        | Command::Fail { .. } => Vec::new(),
        | command => {
            error!(
                "unexpected {:?} while awaiting an accepted reply from {}",
                command, follower,
            );
            return Err(Error::Protocol("unexpected command while awaiting an accepted reply"));
        }
        };

        round.record_response(follower, response);
        if matches!(reply, Command::Fail { .. }) {
            round.downgrade(follower);
        }

        if !round.all_responses_in() {
            return Ok(Verdict::Pending);
        }

        if !round.everyone_promised() {
            Ok(Verdict::Reply(Command::Error {
                code: ErrorCode::IncorrectProposal,
            }))
        } else if !round.all_same_response() {
            Ok(Verdict::Reply(Command::Error {
                code: ErrorCode::InconsistentResponse,
            }))
        } else {
            // Every reply is byte-identical; forward the one in hand.
            Ok(Verdict::Reply(reply))
        }
    }
}
