//! Redis pub/sub transport.
//!
//! Receives on a dedicated pub/sub connection and publishes on a separate
//! multiplexed connection, since a subscribed Redis connection cannot issue
//! ordinary commands. Payloads travel as JSON text.

use async_trait::async_trait;
use futures::StreamExt;
use ::redis::aio::{MultiplexedConnection, PubSub};
use ::redis::AsyncCommands;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{BusError, Result};
use crate::topic::{Event, Topic};
use crate::transport::{Delivery, Transport};

/// A [`Transport`] over Redis `SUBSCRIBE` / `PUBLISH`.
pub struct RedisTransport {
    pubsub: PubSub,
    publisher: MultiplexedConnection,
}

impl RedisTransport {
    /// Connect to the Redis server at `url` (`redis://host:port/db`).
    ///
    /// # Errors
    ///
    /// Returns [`BusError::UnsupportedScheme`] for a non-Redis URL, or the
    /// connection error.
    pub async fn connect(url: &str) -> Result<Self> {
        if !(url.starts_with("redis://") || url.starts_with("rediss://")) {
            return Err(BusError::UnsupportedScheme(url.to_string()));
        }

        let client = ::redis::Client::open(url)?;
        let pubsub = client.get_async_pubsub().await?;
        let publisher = client.get_multiplexed_async_connection().await?;

        info!(url, "Connected to Redis event transport");

        Ok(Self { pubsub, publisher })
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn subscribe(&mut self, topic: &Topic) -> Result<()> {
        self.pubsub.subscribe(topic.as_str()).await?;
        debug!(topic = %topic, "Subscribed to Redis channel");
        Ok(())
    }

    async fn publish(&mut self, topic: &Topic, payload: &Value) -> Result<()> {
        let body = serde_json::to_string(payload)?;
        let receivers: u64 = self.publisher.publish(topic.as_str(), body).await?;
        debug!(topic = %topic, receivers, "Published event");
        Ok(())
    }

    async fn receive(&mut self) -> Result<Delivery> {
        let msg = self
            .pubsub
            .on_message()
            .next()
            .await
            .ok_or(BusError::TransportClosed)?;

        decode_message(Topic::new(msg.get_channel_name()), msg.get_payload_bytes())
    }
}

/// Turn a raw channel message into a delivery. Blank bodies are heartbeats.
fn decode_message(topic: Topic, body: &[u8]) -> Result<Delivery> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Delivery::Heartbeat);
    }

    let payload = serde_json::from_slice(body).map_err(|source| BusError::Malformed {
        topic: topic.clone(),
        source,
    })?;

    Ok(Delivery::Event(Event { topic, payload }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_redis_scheme() {
        let err = RedisTransport::connect("kafka://localhost:9092").await.err();
        assert!(matches!(err, Some(BusError::UnsupportedScheme(_))));
    }

    #[test]
    fn blank_body_is_a_heartbeat() {
        let delivery = decode_message(Topic::new("model_created"), b"  \n").unwrap();
        assert!(matches!(delivery, Delivery::Heartbeat));
    }

    #[test]
    fn json_body_is_an_event() {
        let delivery =
            decode_message(Topic::new("model_created"), br#"{"model": {"name": "a"}}"#).unwrap();
        match delivery {
            Delivery::Event(event) => {
                assert_eq!(event.topic, Topic::new("model_created"));
                assert_eq!(event.payload["model"]["name"], "a");
            }
            Delivery::Heartbeat => panic!("expected an event"),
        }
    }

    #[test]
    fn non_utf8_body_is_malformed_not_fatal() {
        let err = decode_message(Topic::new("model_created"), &[0xff, 0xfe, b'{']).unwrap_err();
        assert!(matches!(err, BusError::Malformed { .. }));
        assert!(!err.is_fatal());
    }
}
