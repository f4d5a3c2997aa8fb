//! # Summary
//!
//! This module multiplexes one connection between in-flight requests.
//! Writers enqueue framed commands; readers register a continuation for
//! the slot their request was sent on, and the reader task routes each
//! arriving frame either to that continuation or, for unsolicited
//! commands, to the owning server's inbound queue.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use hashbrown::HashMap as Map;
use log::{trace, warn};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

use crate::command::{Command, Envelope};
use crate::error::Error;
use crate::socket;

/// A command that arrived outside any registered slot: a fresh request
/// from a client or a peer, to be answered via [`Dispatcher::respond`].
pub struct Inbound {
    pub slot: u64,
    pub command: Command,
    pub connection: Arc<Dispatcher>,
}

/// Per-connection command dispatcher.
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Envelope>,
    pending: Mutex<Map<u64, oneshot::Sender<Command>>>,
    next_slot: AtomicU64,
    live: AtomicBool,
}

impl Dispatcher {
    /// Take ownership of a connection, spawning its reader and writer
    /// tasks. Unsolicited inbound commands are forwarded to `inbound`.
    pub fn spawn<IO>(io: IO, inbound: mpsc::UnboundedSender<Inbound>) -> Arc<Self>
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (socket_rx, socket_tx) = socket::split::<Envelope, Envelope, IO>(io);
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(Dispatcher {
            tx,
            pending: Mutex::new(Map::new()),
            next_slot: AtomicU64::new(1),
            live: AtomicBool::new(true),
        });
        tokio::spawn(Self::write_loop(dispatcher.clone(), rx, socket_tx));
        tokio::spawn(Self::read_loop(dispatcher.clone(), socket_rx, inbound));
        dispatcher
    }

    async fn write_loop<IO>(
        this: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<Envelope>,
        mut tx: socket::Tx<Envelope, IO>,
    ) where
        IO: AsyncWrite,
    {
        while let Some(envelope) = rx.recv().await {
            if let Err(error) = tx.send(&envelope).await {
                warn!("write failed: {}", error);
                break;
            }
        }
        this.close();
    }

    async fn read_loop<IO>(
        this: Arc<Self>,
        mut rx: socket::Rx<Envelope, IO>,
        inbound: mpsc::UnboundedSender<Inbound>,
    ) where
        IO: AsyncRead,
    {
        while let Some(next) = rx.recv().await {
            let envelope = match next {
            | Ok(envelope) => envelope,
            | Err(error) => {
                warn!("read failed: {}", error);
                break;
            }
            };
            trace!("received {:?}", envelope);
            let waiting = this.pending.lock().remove(&envelope.slot);
            match waiting {
            | Some(continuation) => {
                // Round may have been abandoned and dropped its receiver.
                continuation.send(envelope.command).ok();
            }
            | None => {
                let request = Inbound {
                    slot: envelope.slot,
                    command: envelope.command,
                    connection: this.clone(),
                };
                if inbound.send(request).is_err() {
                    break;
                }
            }
            }
        }
        this.close();
    }

    /// Mark the connection dead and wake every outstanding continuation
    /// with a closed-connection error.
    fn close(&self) {
        self.live.store(false, Ordering::Release);
        self.pending.lock().clear();
    }

    /// Whether the underlying connection is still believed usable.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Allocate a fresh request slot on this connection.
    pub fn slot(&self) -> u64 {
        self.next_slot.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a continuation for the response that will arrive on
    /// `slot`. Must be called before the request is written, or the
    /// response can race past the registration.
    pub fn read(&self, slot: u64) -> Pending {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if self.is_live() {
                pending.insert(slot, tx);
            }
        }
        Pending(rx)
    }

    /// Enqueue a command on `slot`.
    pub fn write(&self, slot: u64, command: Command) {
        trace!("sending {:?} on slot {}", command, slot);
        self.tx.send(Envelope { slot, command }).ok();
    }

    /// Enqueue a response tied to a previously received request.
    pub fn respond(&self, slot: u64, command: Command) {
        self.write(slot, command);
    }
}

/// A registered continuation: resolves to the command that arrives on the
/// slot it was registered for, or to an error once the connection closes.
pub struct Pending(oneshot::Receiver<Command>);

impl Future for Pending {
    type Output = Result<Command, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().0)
            .poll(cx)
            .map(|result| result.map_err(|_| Error::ConnectionClosed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(workload: &[u8]) -> Command {
        Command::Initiate {
            workload: workload.to_vec(),
        }
    }

    #[tokio::test]
    async fn pairs_responses_with_requests() {
        let (near, far) = tokio::io::duplex(1024);
        let (client_requests, _keep) = mpsc::unbounded_channel();
        let (server_requests, mut server_inbox) = mpsc::unbounded_channel();
        let client = Dispatcher::spawn(near, client_requests);
        let _server = Dispatcher::spawn(far, server_requests);

        let slot = client.slot();
        let pending = client.read(slot);
        client.write(slot, request(b"hi"));

        let inbound = server_inbox.recv().await.unwrap();
        assert_eq!(inbound.command, request(b"hi"));

        let response = Command::Accepted {
            proposal_id: 1,
            workload: b"hi".to_vec(),
        };
        inbound.connection.respond(inbound.slot, response.clone());
        assert_eq!(pending.await.unwrap(), response);
    }

    #[tokio::test]
    async fn unsolicited_commands_reach_the_inbound_queue() {
        let (near, far) = tokio::io::duplex(1024);
        let (client_requests, _keep) = mpsc::unbounded_channel();
        let (server_requests, mut server_inbox) = mpsc::unbounded_channel();
        let client = Dispatcher::spawn(near, client_requests);
        let _server = Dispatcher::spawn(far, server_requests);

        client.write(client.slot(), request(b"one"));
        client.write(client.slot(), request(b"two"));

        assert_eq!(server_inbox.recv().await.unwrap().command, request(b"one"));
        assert_eq!(server_inbox.recv().await.unwrap().command, request(b"two"));
    }

    #[tokio::test]
    async fn dropped_connections_fail_pending_reads() {
        let (near, far) = tokio::io::duplex(1024);
        let (client_requests, _keep) = mpsc::unbounded_channel();
        let client = Dispatcher::spawn(near, client_requests);

        let slot = client.slot();
        let pending = client.read(slot);
        client.write(slot, request(b"hi"));
        drop(far);

        assert!(matches!(pending.await, Err(Error::ConnectionClosed)));
    }
}
