//! # Summary
//!
//! This module defines the wire vocabulary shared by every node in a
//! deployment: the tagged `Command` union exchanged between clients,
//! leaders, and followers, and the `Envelope` frame that pairs responses
//! with the requests that solicited them.

use std::fmt;
use std::net::SocketAddr;

use serde_derive::{Deserialize, Serialize};

/// A protocol command. Variant ordinals and field presence must be stable
/// across all nodes of the same deployment.
#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Client request: run one consensus round over `workload`.
    Initiate {
        workload: Vec<u8>,
    },

    /// Phase 1, leader to follower: reserve `proposal_id`.
    Prepare {
        proposal_id: i64,
        host_endpoint: SocketAddr,
    },

    /// Phase 1, follower to leader: the proposal id is reserved. Carries
    /// the follower's current proposal id.
    Promise {
        proposal_id: i64,
    },

    /// Follower to leader: the proposal id is behind this follower.
    /// Carries the follower's current proposal id so the leader can
    /// start its next round above it.
    Fail {
        proposal_id: i64,
    },

    /// Phase 2, leader to follower: execute `workload` under the
    /// promised proposal id.
    Accept {
        proposal_id: i64,
        host_endpoint: SocketAddr,
        workload: Vec<u8>,
    },

    /// Phase 2, follower to leader: the processor's output for the
    /// accepted workload. Forwarded verbatim to the client on success.
    Accepted {
        proposal_id: i64,
        workload: Vec<u8>,
    },

    /// Leader to client: the round failed.
    Error {
        code: ErrorCode,
    },
}

/// Client-visible failure codes.
#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    /// At least one follower rejected the round's proposal id.
    IncorrectProposal,

    /// Followers returned diverging processor output for the same workload.
    InconsistentResponse,

    /// The contacted node is not the quorum's leader, or no leader is known.
    NoLeader,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
        | ErrorCode::IncorrectProposal => write!(f, "incorrect proposal"),
        | ErrorCode::InconsistentResponse => write!(f, "inconsistent response"),
        | ErrorCode::NoLeader => write!(f, "no leader"),
        }
    }
}

/// One frame on the wire. The slot ties a response back to the request
/// that solicited it; slots are allocated by whichever side initiates on
/// a connection.
#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub slot: u64,
    pub command: Command,
}
