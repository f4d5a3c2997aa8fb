//! # Summary
//!
//! This module runs one consensus node: it owns the listening socket,
//! keeps an outbound connection to every quorum member (itself included),
//! and routes inbound commands to the protocol strategy. Client requests
//! queue behind a one-permit semaphore so a leader drives at most one
//! round at a time.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};

use crate::command::{Command, ErrorCode};
use crate::context::Context;
use crate::dispatcher::{Dispatcher, Inbound};
use crate::error::Error;
use crate::quorum::{Quorum, Server};
use crate::shared::Shared;
use crate::strategy::{BasicPaxos, Reply, Strategy};

/// One consensus node: a bound listener plus its protocol state.
pub struct Node {
    listener: TcpListener,
    ours: SocketAddr,
    quorum: Shared<Quorum>,
    context: Shared<Context>,
    retry_interval: Duration,
}

impl Node {
    pub(crate) fn new(
        listener: TcpListener,
        context: Context,
        retry_interval: Duration,
    ) -> Result<Self, Error> {
        let ours = listener.local_addr()?;
        Ok(Node {
            listener,
            ours,
            quorum: Shared::new(Quorum::new(ours)),
            context: Shared::new(context),
            retry_interval,
        })
    }

    /// The endpoint this node listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.ours
    }

    /// Handle to this node's protocol state.
    pub fn context(&self) -> Shared<Context> {
        self.context.clone()
    }

    /// Handle to this node's quorum view.
    pub fn quorum(&self) -> Shared<Quorum> {
        self.quorum.clone()
    }

    /// Runs the node with the basic strategy. `servers` must list every
    /// member of the quorum, this node included.
    pub async fn serve(self, servers: Vec<SocketAddr>) -> Result<(), Error> {
        self.serve_with(servers, BasicPaxos).await
    }

    /// Runs the node with a custom protocol strategy.
    pub async fn serve_with<S: Strategy>(
        self,
        servers: Vec<SocketAddr>,
        strategy: S,
    ) -> Result<(), Error> {
        let Node { listener, ours, quorum, context, retry_interval } = self;
        let strategy = Arc::new(strategy);
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();

        info!("{} serving a quorum of {}", ours, servers.len());

        // Dial every quorum member, ourselves included: the self-loop
        // keeps the leader and follower code paths uniform.
        for endpoint in servers {
            tokio::spawn(maintain(
                endpoint,
                quorum.clone(),
                inbound_tx.clone(),
                retry_interval,
            ));
        }

        let accept_tx = inbound_tx.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                | Ok((stream, peer)) => {
                    debug!("accepted connection from {}", peer);
                    Dispatcher::spawn(stream, accept_tx.clone());
                }
                | Err(error) => warn!("accept failed: {}", error),
                }
            }
        });

        // One round in flight per leader; later requests queue here.
        let rounds = Arc::new(Semaphore::new(1));

        while let Some(Inbound { slot, command, connection }) = inbound_rx.recv().await {
            match command {
            | Command::Initiate { workload } => {
                let client = Reply::new(connection, slot);
                let leading = {
                    let quorum = quorum.read();
                    quorum.who_is_our_leader() == Some(quorum.our_endpoint())
                };
                if !leading {
                    debug!("refusing client request: not the leader");
                    strategy.fail(&client, ErrorCode::NoLeader);
                    continue;
                }

                let strategy = strategy.clone();
                let quorum = quorum.clone();
                let context = context.clone();
                let rounds = rounds.clone();
                tokio::spawn(async move {
                    let queue_guard = rounds
                        .acquire_owned()
                        .await
                        .expect("round queue semaphore closed");
                    if let Err(error) = strategy
                        .initiate(client, workload, &quorum, &context, queue_guard)
                        .await
                    {
                        error!("round aborted: {}", error);
                    }
                });
            }
            | Command::Prepare { .. } => {
                let response = strategy.prepare(command, &quorum, &context).await;
                connection.respond(slot, response);
            }
            | Command::Accept { .. } => {
                let response = strategy.accept(command, &quorum, &context).await;
                connection.respond(slot, response);
            }
            | command => warn!("ignoring unexpected {:?}", command),
            }
        }
        Ok(())
    }
}

/// Keeps one outbound quorum connection alive, redialing on loss.
async fn maintain(
    endpoint: SocketAddr,
    quorum: Shared<Quorum>,
    inbound: mpsc::UnboundedSender<Inbound>,
    retry_interval: Duration,
) {
    loop {
        let live = quorum
            .read()
            .lookup_server(endpoint)
            .map(|server| server.connection().is_live())
            .unwrap_or(false);
        if !live {
            match TcpStream::connect(endpoint).await {
            | Ok(stream) => {
                let connection = Dispatcher::spawn(stream, inbound.clone());
                quorum.write().connect(Server::new(endpoint, connection));
            }
            | Err(error) => debug!("connecting to {} failed: {}", endpoint, error),
            }
        }
        tokio::time::sleep(retry_interval).await;
    }
}
