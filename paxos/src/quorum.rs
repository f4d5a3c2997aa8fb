//! # Summary
//!
//! This module tracks the fixed set of servers participating in
//! consensus: the connection we hold to each of them (ourselves
//! included), which of those connections are currently live, and which
//! endpoint is designated leader.

use std::net::SocketAddr;
use std::sync::Arc;

use hashbrown::HashMap as Map;
use log::info;

use crate::dispatcher::Dispatcher;

/// A member of the quorum: its endpoint and the connection we hold to it.
#[derive(Clone)]
pub struct Server {
    endpoint: SocketAddr,
    connection: Arc<Dispatcher>,
}

impl Server {
    pub fn new(endpoint: SocketAddr, connection: Arc<Dispatcher>) -> Self {
        Server { endpoint, connection }
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn connection(&self) -> Arc<Dispatcher> {
        self.connection.clone()
    }
}

/// The configured set of participating servers, as seen from one node.
pub struct Quorum {
    ours: SocketAddr,
    servers: Map<SocketAddr, Server>,
}

impl Quorum {
    pub fn new(ours: SocketAddr) -> Self {
        Quorum {
            ours,
            servers: Map::new(),
        }
    }

    /// The endpoint this node serves on.
    pub fn our_endpoint(&self) -> SocketAddr {
        self.ours
    }

    /// Registers a connected server, replacing any previous connection
    /// to the same endpoint.
    pub fn connect(&mut self, server: Server) {
        info!("quorum member {} connected", server.endpoint());
        self.servers.insert(server.endpoint(), server);
    }

    /// Drops a server from the quorum view.
    pub fn disconnect(&mut self, endpoint: SocketAddr) {
        info!("quorum member {} disconnected", endpoint);
        self.servers.remove(&endpoint);
    }

    /// Looks up a registered server by endpoint.
    pub fn lookup_server(&self, endpoint: SocketAddr) -> Option<&Server> {
        self.servers.get(&endpoint)
    }

    /// Every endpoint whose connection is currently live, in ascending
    /// order.
    pub fn live_server_endpoints(&self) -> Vec<SocketAddr> {
        let mut live = self
            .servers
            .values()
            .filter(|server| server.connection.is_live())
            .map(Server::endpoint)
            .collect::<Vec<_>>();
        live.sort();
        live
    }

    /// The current leader designation: the highest live endpoint, so that
    /// every node converges on the same designation without traffic.
    pub fn who_is_our_leader(&self) -> Option<SocketAddr> {
        self.live_server_endpoints().into_iter().max()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

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
    async fn leader_is_highest_live_endpoint() {
        let mut keep = Vec::new();
        let mut quorum = Quorum::new(endpoint(9001));
        for port in [9001, 9002, 9003] {
            quorum.connect(Server::new(endpoint(port), connection(&mut keep)));
        }

        assert_eq!(quorum.live_server_endpoints().len(), 3);
        assert_eq!(quorum.who_is_our_leader(), Some(endpoint(9003)));

        quorum.disconnect(endpoint(9003));
        assert_eq!(quorum.who_is_our_leader(), Some(endpoint(9002)));
    }

    #[tokio::test]
    async fn lookup_returns_registered_connections() {
        let mut keep = Vec::new();
        let mut quorum = Quorum::new(endpoint(9001));
        quorum.connect(Server::new(endpoint(9002), connection(&mut keep)));

        assert!(quorum.lookup_server(endpoint(9002)).is_some());
        assert!(quorum.lookup_server(endpoint(9004)).is_none());
    }

    #[tokio::test]
    async fn empty_quorum_has_no_leader() {
        let quorum = Quorum::new(endpoint(9001));
        assert_eq!(quorum.who_is_our_leader(), None);
    }
}
