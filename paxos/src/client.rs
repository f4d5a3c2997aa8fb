//! # Summary
//!
//! This module defines the client-facing API: connect to the quorum's
//! leader, issue a workload, and receive either the agreed processor
//! output or the failure code the round ended with.

use std::net::SocketAddr;

use log::warn;
use tokio::net::TcpStream;

use crate::command::{Command, Envelope, ErrorCode};
use crate::error::Error;
use crate::socket;

/// Failures visible to a client issuing workloads.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The quorum rejected the request.
    #[error("request rejected: {0}")]
    Rejected(ErrorCode),

    /// The connection closed before a reply arrived.
    #[error("disconnected")]
    Disconnected,

    #[error(transparent)]
    Transport(#[from] Error),
}

/// Client-side connection to a quorum node.
pub struct Client {
    rx: socket::Rx<Envelope, TcpStream>,
    tx: socket::Tx<Envelope, TcpStream>,
    next_slot: u64,
}

impl Client {
    /// Connects to a node. Requests succeed only while that node leads
    /// the quorum; any other node answers with a no-leader error.
    pub async fn connect(address: SocketAddr) -> Result<Self, Error> {
        let stream = TcpStream::connect(address).await?;
        let (rx, tx) = socket::split(stream);
        Ok(Client {
            rx,
            tx,
            next_slot: 1,
        })
    }

    /// Issues one workload and waits for the quorum's reply.
    pub async fn issue(&mut self, workload: Vec<u8>) -> Result<Vec<u8>, ClientError> {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.tx
            .send(&Envelope {
                slot,
                command: Command::Initiate { workload },
            })
            .await?;

        loop {
            let envelope = match self.rx.recv().await {
            | None => return Err(ClientError::Disconnected),
            | Some(envelope) => envelope?,
            };
            if envelope.slot != slot {
                // Reply to an earlier request we no longer care about.
                continue;
            }
            return match envelope.command {
            | Command::Accepted { workload, .. } => Ok(workload),
            | Command::Error { code } => Err(ClientError::Rejected(code)),
            | command => {
                warn!("unexpected reply {:?}", command);
                Err(Error::Protocol("unexpected reply to a client request").into())
            }
            };
        }
    }
}
