//! # Summary
//!
//! Node configuration: retention and reconnection tunables, the storage
//! provider, and the `bind` step that assembles a runnable [`Node`].

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::context::{Context, Processor};
use crate::durable::{Log, Memory, Storage};
use crate::error::Error;
use crate::server::Node;

/// Configuration for one consensus node.
pub struct Config {
    history_size: Option<i64>,
    retry_interval: Duration,
    storage: Option<Box<dyn Storage>>,
}

impl Config {
    pub fn new() -> Self {
        Config {
            history_size: None,
            retry_interval: Duration::from_secs(1),
            storage: None,
        }
    }

    /// Minimum number of accepted entries the durable log retains.
    pub fn with_history_size(mut self, history_size: i64) -> Self {
        self.history_size = Some(history_size);
        self
    }

    /// Interval between attempts to (re)connect to quorum members.
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Durable storage provider for accepted values. Defaults to the
    /// in-memory provider.
    pub fn with_storage(mut self, storage: Box<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Binds the node's listener and assembles its protocol state.
    /// Binding to port 0 picks an ephemeral port; see
    /// [`Node::local_addr`].
    pub async fn bind<P>(self, address: SocketAddr, processor: P) -> Result<Node, Error>
    where
        P: Processor + 'static,
    {
        let listener = TcpListener::bind(address).await?;
        let storage = self
            .storage
            .unwrap_or_else(|| Box::new(Memory::default()));
        let mut log = Log::new(storage);
        if let Some(history_size) = self.history_size {
            log.set_history_size(history_size);
        }
        let context = Context::new(Box::new(processor), log);
        Node::new(listener, context, self.retry_interval)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new()
    }
}
