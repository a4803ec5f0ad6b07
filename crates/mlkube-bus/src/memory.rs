//! In-process transport.
//!
//! Behaves like a pub/sub broker with a single subscriber: messages on topics
//! that were never subscribed are dropped, and publishing on a subscribed
//! topic loops the message back to the receiver.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{BusError, Result};
use crate::topic::{Event, Topic};
use crate::transport::{Delivery, Transport};

/// A transport backed by an unbounded channel.
#[derive(Debug)]
pub struct InMemoryTransport {
    sender: mpsc::UnboundedSender<Delivery>,
    receiver: mpsc::UnboundedReceiver<Delivery>,
    subscriptions: HashSet<Topic>,
    subscribe_log: Vec<Topic>,
    published: Arc<Mutex<Vec<Event>>>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    /// Create a transport with no subscriptions.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver,
            subscriptions: HashSet::new(),
            subscribe_log: Vec::new(),
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A handle for injecting messages from outside the dispatcher.
    #[must_use]
    pub fn publisher(&self) -> InMemoryPublisher {
        InMemoryPublisher {
            sender: self.sender.clone(),
            published: Arc::clone(&self.published),
        }
    }

    /// Every subscribe call made so far, in order.
    #[must_use]
    pub fn subscribe_log(&self) -> &[Topic] {
        &self.subscribe_log
    }

    /// Whether `topic` has been subscribed.
    #[must_use]
    pub fn is_subscribed(&self, topic: &Topic) -> bool {
        self.subscriptions.contains(topic)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn subscribe(&mut self, topic: &Topic) -> Result<()> {
        self.subscribe_log.push(topic.clone());
        self.subscriptions.insert(topic.clone());
        Ok(())
    }

    async fn publish(&mut self, topic: &Topic, payload: &Value) -> Result<()> {
        self.publisher().publish(topic.clone(), payload.clone())
    }

    async fn receive(&mut self) -> Result<Delivery> {
        loop {
            let delivery = self.receiver.recv().await.ok_or(BusError::TransportClosed)?;
            match &delivery {
                Delivery::Event(event) if !self.subscriptions.contains(&event.topic) => {
                    tracing::trace!(topic = %event.topic, "Dropping message on unsubscribed topic");
                }
                _ => return Ok(delivery),
            }
        }
    }
}

/// Cloneable sending side of an [`InMemoryTransport`].
#[derive(Debug, Clone)]
pub struct InMemoryPublisher {
    sender: mpsc::UnboundedSender<Delivery>,
    published: Arc<Mutex<Vec<Event>>>,
}

impl InMemoryPublisher {
    /// Publish `payload` on `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::TransportClosed`] if the transport was dropped.
    pub fn publish(&self, topic: impl Into<Topic>, payload: Value) -> Result<()> {
        let event = Event::new(topic, payload);
        self.published.lock().push(event.clone());
        self.sender
            .send(Delivery::Event(event))
            .map_err(|_| BusError::TransportClosed)
    }

    /// Send a wake-up with no payload.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::TransportClosed`] if the transport was dropped.
    pub fn heartbeat(&self) -> Result<()> {
        self.sender
            .send(Delivery::Heartbeat)
            .map_err(|_| BusError::TransportClosed)
    }

    /// Every event published through this transport so far, in order.
    #[must_use]
    pub fn published(&self) -> Vec<Event> {
        self.published.lock().clone()
    }
}
