//! Node events and statistics
//!
//! Consumers register an [`EventHandler`] to observe lifecycle
//! transitions, peer churn and periodic statistics without polling.
//! The default handler forwards everything to `tracing`.

use std::net::SocketAddr;
use std::time::Duration;

use stella_protocol::Address;
use stella_switch::SwitchStats;

use crate::node::NodeState;

/// Statistics snapshot across a node's subsystems
#[derive(Debug, Clone, Default)]
pub struct NodeStats {
    /// Switch drop/error counters
    pub switch: SwitchStats,
    /// Datagrams still awaiting an ACK
    pub pending_sends: usize,
    /// Datagrams dropped for failed authentication
    pub auth_failures: u64,
    /// Known discovered peers
    pub peers: usize,
    /// Time since the node entered Running
    pub uptime: Duration,
}

/// Events emitted by a running node
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// Lifecycle state changed
    StateChanged { old: NodeState, new: NodeState },

    /// A peer tunnel was established
    PeerConnected {
        /// The peer's node address
        address: Address,
        /// The peer's socket address
        addr: SocketAddr,
    },

    /// A peer tunnel was torn down
    PeerDisconnected {
        /// The peer's socket address
        addr: SocketAddr,
    },

    /// An identity was learned through a WHOIS exchange
    IdentityLearned {
        /// The learned node address
        address: Address,
    },

    /// Periodic statistics
    StatsUpdate(NodeStats),

    /// Something went wrong
    Error {
        message: String,
        /// Whether the node keeps running
        recoverable: bool,
    },
}

/// Receiver for node events
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event
    async fn on_event(&self, event: NodeEvent);
}

/// Default handler that forwards events to `tracing`
pub struct LoggingEventHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingEventHandler {
    async fn on_event(&self, event: NodeEvent) {
        match event {
            NodeEvent::StateChanged { old, new } => {
                tracing::info!(?old, ?new, "node state changed");
            }
            NodeEvent::PeerConnected { address, addr } => {
                tracing::info!(peer = %address, %addr, "peer connected");
            }
            NodeEvent::PeerDisconnected { addr } => {
                tracing::info!(%addr, "peer disconnected");
            }
            NodeEvent::IdentityLearned { address } => {
                tracing::debug!(%address, "identity learned");
            }
            NodeEvent::StatsUpdate(stats) => {
                tracing::trace!(?stats, "node statistics");
            }
            NodeEvent::Error { message, recoverable } => {
                if recoverable {
                    tracing::warn!(message, "recoverable node error");
                } else {
                    tracing::error!(message, "fatal node error");
                }
            }
        }
    }
}
