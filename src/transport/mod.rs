//! Transport abstraction for the signaling channel.
//!
//! A transport is one logical connection: it can send text frames and it
//! reports its lifecycle through an event receiver handed out at creation
//! time. The factory is what the reconnection control loop calls to get a
//! fresh connection.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

pub mod websocket;

pub use websocket::WebSocketTransportFactory;

/// An event produced by the transport layer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport has successfully connected.
    Connected,
    /// A text frame has been received from the gateway.
    MessageReceived(String),
    /// The connection was lost.
    Disconnected,
}

/// Represents an active network connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a text frame to the gateway.
    async fn send(&self, payload: &str) -> Result<(), anyhow::Error>;

    /// Closes the connection.
    async fn disconnect(&self);
}

/// A factory responsible for creating new transport instances.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Creates a new transport and returns it, along with a stream of events.
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error>;
}
