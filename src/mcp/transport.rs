//! MCP Transport Layer
//!
//! A transport is a pair of independent one-directional message streams.
//! The sending half is shared between concurrent callers; the receiving
//! half is owned by exactly one dispatch loop. Messages are delivered in
//! order within each direction, with no ordering across directions.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::trace;

use super::{
    errors::{MCPError, MCPResult},
    protocol::MCPMessage,
};

/// Client transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Event stream URL
    pub endpoint: String,
    /// Bound on opening the stream and receiving the endpoint event
    pub connect_timeout: Duration,
    /// Maximum size of a single message in bytes
    pub max_message_size: usize,
    /// Additional request headers
    pub headers: HashMap<String, String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000/sse".to_string(),
            connect_timeout: Duration::from_secs(10),
            max_message_size: 4 * 1024 * 1024,
            headers: HashMap::new(),
        }
    }
}

impl TransportConfig {
    /// Create a configuration for an endpoint with default limits
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }
}

/// Outbound half of a channel pair
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Deliver one message to the peer
    async fn send(&self, message: MCPMessage) -> MCPResult<()>;

    /// Release the outbound stream; the peer observes end-of-stream
    async fn close(&self) -> MCPResult<()>;
}

/// Inbound half of a channel pair
#[async_trait]
pub trait MessageReceiver: Send {
    /// Next message, or `None` once the stream has ended
    async fn recv(&mut self) -> MCPResult<Option<MCPMessage>>;
}

/// Two independent streams making up one session's transport
pub struct ChannelPair {
    pub sender: Arc<dyn MessageSender>,
    pub receiver: Box<dyn MessageReceiver>,
}

impl ChannelPair {
    pub fn new(sender: Arc<dyn MessageSender>, receiver: Box<dyn MessageReceiver>) -> Self {
        Self { sender, receiver }
    }
}

/// Sending half backed by a tokio channel
pub struct ChannelSender {
    inner: Mutex<Option<mpsc::UnboundedSender<MCPMessage>>>,
}

impl ChannelSender {
    pub fn new(sender: mpsc::UnboundedSender<MCPMessage>) -> Self {
        Self {
            inner: Mutex::new(Some(sender)),
        }
    }
}

#[async_trait]
impl MessageSender for ChannelSender {
    async fn send(&self, message: MCPMessage) -> MCPResult<()> {
        let guard = self.inner.lock();
        let sender = guard
            .as_ref()
            .ok_or_else(|| MCPError::connection("Channel closed"))?;

        trace!(kind = message.kind(), "sending message over channel");
        sender
            .send(message)
            .map_err(|_| MCPError::connection("Peer has gone away"))
    }

    async fn close(&self) -> MCPResult<()> {
        self.inner.lock().take();
        Ok(())
    }
}

/// Receiving half backed by a tokio channel
pub struct ChannelReceiver {
    inner: mpsc::UnboundedReceiver<MCPMessage>,
}

impl ChannelReceiver {
    pub fn new(receiver: mpsc::UnboundedReceiver<MCPMessage>) -> Self {
        Self { inner: receiver }
    }
}

#[async_trait]
impl MessageReceiver for ChannelReceiver {
    async fn recv(&mut self) -> MCPResult<Option<MCPMessage>> {
        Ok(self.inner.recv().await)
    }
}

/// Build two connected in-process channel pairs.
///
/// Whatever one side sends, the other side receives.
pub fn memory_pair() -> (ChannelPair, ChannelPair) {
    let (left_tx, left_rx) = mpsc::unbounded_channel();
    let (right_tx, right_rx) = mpsc::unbounded_channel();

    let left = ChannelPair::new(
        Arc::new(ChannelSender::new(left_tx)),
        Box::new(ChannelReceiver::new(right_rx)),
    );
    let right = ChannelPair::new(
        Arc::new(ChannelSender::new(right_tx)),
        Box::new(ChannelReceiver::new(left_rx)),
    );

    (left, right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::{MCPNotification, MCPRequest};

    #[tokio::test]
    async fn test_memory_pair_preserves_order() {
        let (client, mut server) = memory_pair();

        for method in ["first", "second", "third"] {
            client
                .sender
                .send(MCPMessage::Notification(MCPNotification::new(method)))
                .await
                .unwrap();
        }

        for expected in ["first", "second", "third"] {
            match server.receiver.recv().await.unwrap() {
                Some(MCPMessage::Notification(n)) => assert_eq!(n.method.as_str(), expected),
                other => panic!("unexpected message: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_close_ends_peer_stream() {
        let (client, mut server) = memory_pair();
        client.sender.close().await.unwrap();

        assert!(server.receiver.recv().await.unwrap().is_none());

        let result = client
            .sender
            .send(MCPMessage::Request(MCPRequest::new("ping")))
            .await;
        assert!(matches!(result, Err(MCPError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_send_to_dropped_peer_fails() {
        let (client, server) = memory_pair();
        drop(server);

        let result = client
            .sender
            .send(MCPMessage::Request(MCPRequest::new("ping")))
            .await;
        assert!(matches!(result, Err(MCPError::Connection { .. })));
    }
}
