//! The transport interface the dispatcher is driven by.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::topic::{Event, Topic};

/// What a transport yields on receive.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// A message on a subscribed topic.
    Event(Event),
    /// A wake-up carrying no payload.
    Heartbeat,
}

/// An external subscribe/publish transport.
///
/// Implementations only need to honour per-topic ordering; nothing is
/// deduplicated or acknowledged.
#[async_trait]
pub trait Transport: Send {
    /// Start receiving messages published on `topic`.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be established.
    async fn subscribe(&mut self, topic: &Topic) -> Result<()>;

    /// Publish `payload` on `topic`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded or sent.
    async fn publish(&mut self, topic: &Topic, payload: &Value) -> Result<()>;

    /// Wait for the next delivery.
    ///
    /// Dropping the returned future must not lose a message that has not
    /// been yielded yet.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Malformed`](crate::BusError::Malformed) for a
    /// payload that is not JSON, and a fatal error when the transport is lost.
    async fn receive(&mut self) -> Result<Delivery>;
}
