//! Structured event channel.
//!
//! Every component receives an [`EventSink`] at construction and reports
//! drops, per-flow failures and session lifecycle through it. Events are
//! mirrored to `tracing`, so a sink without subscribers still logs.

use std::net::SocketAddr;

use tokio::sync::broadcast;

use crate::types::{EndpointId, Network};

/// Default capacity of the broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Events emitted by the dispatcher, the interceptors and forwarding sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A raw packet was discarded because its version nibble is unknown.
    PacketDropped { first_byte: u8, len: usize },
    /// A dispatcher loop exited.
    DispatcherStopped { error: Option<String> },
    /// The stack failed to materialize an endpoint for a flow.
    EndpointFailed {
        network: Network,
        id: EndpointId,
        error: String,
    },
    /// Socket tuning failed; the flow continues.
    TuningFailed { id: EndpointId, error: String },
    /// Dialing the resolved destination failed; the flow was closed.
    DialFailed {
        network: Network,
        destination: String,
        error: String,
    },
    /// Outbound connection established and bridging is about to start.
    SessionEstablished {
        network: Network,
        local_addr: SocketAddr,
        destination: String,
        original: String,
    },
    /// Both sides of a session have been released.
    SessionClosed {
        network: Network,
        destination: String,
        sent: u64,
        received: u64,
        error: Option<String>,
    },
}

/// Cloneable handle for emitting [`Event`]s.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<Event>,
}

impl EventSink {
    /// Create a sink with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Emit an event, logging it at the matching level.
    pub fn emit(&self, event: Event) {
        match &event {
            Event::PacketDropped { first_byte, len } => {
                tracing::trace!(first_byte, len, "Dropped unparseable packet");
            }
            Event::DispatcherStopped { error: Some(error) } => {
                tracing::warn!(%error, "Dispatcher stopped");
            }
            Event::DispatcherStopped { error: None } => {
                tracing::debug!("Dispatcher stopped");
            }
            Event::EndpointFailed { network, id, error } => {
                tracing::warn!(%network, flow = %id, %error, "Endpoint creation failed");
            }
            Event::TuningFailed { id, error } => {
                tracing::debug!(flow = %id, %error, "Socket tuning failed");
            }
            Event::DialFailed {
                network,
                destination,
                error,
            } => {
                tracing::warn!(%network, %destination, %error, "Dial failed");
            }
            Event::SessionEstablished {
                network,
                local_addr,
                destination,
                original,
            } => {
                tracing::debug!(%network, %local_addr, %destination, %original, "Session established");
            }
            Event::SessionClosed {
                network,
                destination,
                sent,
                received,
                error,
            } => {
                tracing::debug!(%network, %destination, sent, received, error = ?error, "Session closed");
            }
        }

        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
