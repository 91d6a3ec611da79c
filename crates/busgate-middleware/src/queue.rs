//! Bus queues.
//!
//! Every queue is an unbounded [`tokio::sync::mpsc`] channel of
//! [`BusMessage`], so a put never blocks the router. Modules never see a raw
//! sender: an interface module gets a [`PublishQueue`] and a communication
//! module gets a [`ReceiveQueue`], which only accept the message kind that
//! side of the bus is allowed to produce.

use busgate_types::{BusMessage, GatewayError, PublishMessage, SubscribeMessage};
use tokio::sync::mpsc;

pub type BusSender = mpsc::UnboundedSender<BusMessage>;
pub type BusReceiver = mpsc::UnboundedReceiver<BusMessage>;

/// Create a new unbounded bus queue.
pub fn bus_queue() -> (BusSender, BusReceiver) {
    mpsc::unbounded_channel()
}

/// Producer side of the shared publish queue (interface modules → router).
#[derive(Clone, Debug)]
pub struct PublishQueue {
    sender: BusSender,
}

impl PublishQueue {
    pub fn new(sender: BusSender) -> Self {
        Self { sender }
    }

    /// Put `message` on the shared publish queue.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Channel`] once the router side has shut down.
    pub fn publish(&self, message: PublishMessage) -> Result<(), GatewayError> {
        self.sender
            .send(BusMessage::Publish(message))
            .map_err(|e| GatewayError::Channel(format!("publish queue closed: {e}")))
    }
}

/// Producer side of the shared receive queue (communication modules → router).
#[derive(Clone, Debug)]
pub struct ReceiveQueue {
    sender: BusSender,
}

impl ReceiveQueue {
    pub fn new(sender: BusSender) -> Self {
        Self { sender }
    }

    /// Put an inbound `message` on the shared receive queue for routing.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Channel`] once the router side has shut down.
    pub fn submit(&self, message: SubscribeMessage) -> Result<(), GatewayError> {
        self.sender
            .send(BusMessage::Subscribe(message))
            .map_err(|e| GatewayError::Channel(format!("receive queue closed: {e}")))
    }
}
