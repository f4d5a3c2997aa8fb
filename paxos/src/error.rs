//! # Summary
//!
//! This module defines the library-level error type. Client-visible
//! protocol failures (a rejected proposal, divergent responses) are not
//! errors here; they travel back to the client as `Command::Error`
//! replies. This type covers transport, storage, and invariant failures.

use std::io;

use crate::durable;

/// Errors surfaced by the library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The connection backing a dispatcher closed before a reply arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// A peer sent a command the protocol state machine cannot accept at
    /// this point. The in-flight round is abandoned.
    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    /// The durable log's storage provider failed.
    #[error(transparent)]
    Storage(#[from] durable::Error),

    #[error("i/o: {0}")]
    Io(#[from] io::Error),

    #[error("codec: {0}")]
    Codec(#[from] bincode::Error),
}
