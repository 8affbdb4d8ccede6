//! Outbound message dispatch.
//!
//! Sends are fire-and-forget: delivery guarantees belong to the routing
//! layer, so a send never reports back.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;
use vault_dht::NodeId;

use crate::messages::Message;

/// Hands outbound messages to the routing layer.
pub trait Dispatcher: Send + Sync + 'static {
    fn send(&self, message: Message, destination: NodeId);
}

impl<D: Dispatcher + ?Sized> Dispatcher for Arc<D> {
    fn send(&self, message: Message, destination: NodeId) {
        (**self).send(message, destination)
    }
}

/// A message queued for the routing layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub message: Message,
    pub destination: NodeId,
}

/// Dispatcher backed by an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelDispatcher {
    /// Create a dispatcher and the receiver the routing layer drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Dispatcher for ChannelDispatcher {
    fn send(&self, message: Message, destination: NodeId) {
        let kind = message.kind();
        if self.tx.send(Outbound { message, destination }).is_err() {
            warn!(%kind, %destination, "Outbound channel closed, dropping message");
        }
    }
}
