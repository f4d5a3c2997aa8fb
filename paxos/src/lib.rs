//! # Summary
//!
//! This crate implements basic single-decree Paxos across a fixed quorum
//! of cooperating servers. A leader runs one round per client request:
//! it claims a fresh proposal id, asks every live server (itself
//! included) to *prepare* it, and once the whole quorum has *promised*,
//! asks them to *accept* the client's workload. Each follower runs the
//! application's deterministic processor over the workload; the leader
//! cross-validates the replies and forwards one representative answer to
//! the client. Accepted values can be retained in a durable log for
//! replay and gradual catch-up.
//!
//! # Usage
//!
//! Provide a processor (any deterministic `Fn(&[u8]) -> Vec<u8>`), bind a
//! node per server, and point each node at the full server list. Clients
//! connect to the leader, which is the highest live endpoint.
//!
//! Servers exchange length-delimited, bincode-encoded commands over TCP;
//! the same framing backs the client connection, wrapped by [`Client`].
//!
//! # Example
//!
//! ```no_run
//! use basic_paxos::{Client, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let servers: Vec<std::net::SocketAddr> = vec![
//!         "127.0.0.1:3001".parse()?,
//!         "127.0.0.1:3002".parse()?,
//!         "127.0.0.1:3003".parse()?,
//!     ];
//!
//!     // One of the three nodes; the other two run elsewhere.
//!     let node = Config::new()
//!         .with_history_size(100)
//!         .bind("127.0.0.1:3003".parse()?, |workload: &[u8]| workload.to_vec())
//!         .await?;
//!     tokio::spawn(node.serve(servers));
//!
//!     // 127.0.0.1:3003 is the highest endpoint, hence the leader.
//!     let mut client = Client::connect("127.0.0.1:3003".parse()?).await?;
//!     let reply = client.issue(b"ping".to_vec()).await?;
//!     assert_eq!(reply, b"ping");
//!     Ok(())
//! }
//! ```
//!
//! # Implementation Details
//!
//! - The round state machine lives in [`strategy`]; variants can override
//!   individual entry points of the [`Strategy`] trait.
//! - A one-permit queue serializes rounds per leader; the permit is held
//!   in the round state and released on every terminating path.
//! - Followers keep no intra-round state beyond their current proposal
//!   id, so each inbound command is answered independently.
//! - The quorum designates the highest live endpoint as leader; a client
//!   request sent to any other node is answered with a no-leader error.

pub mod client;
pub mod command;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod durable;
pub mod error;
pub mod quorum;
pub mod round;
pub mod server;
pub mod shared;
pub mod socket;
pub mod strategy;

pub use crate::client::{Client, ClientError};
pub use crate::command::{Command, ErrorCode};
pub use crate::config::Config;
pub use crate::context::{Context, Processor};
pub use crate::error::Error;
pub use crate::server::Node;
pub use crate::shared::Shared;
pub use crate::strategy::{BasicPaxos, Strategy};
