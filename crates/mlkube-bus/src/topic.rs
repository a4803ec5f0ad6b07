//! Topics and events.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::HandlerError;

/// An opaque event category used for pub/sub routing.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Create a topic from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Return the topic name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Topic({})", self.0)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Topic {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// A (topic, payload) pair.
///
/// Payloads are opaque to the dispatcher; only handlers interpret them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Category of the event.
    pub topic: Topic,
    /// Topic-defined payload.
    pub payload: Value,
}

impl Event {
    /// Create an event from a topic and a raw payload.
    pub fn new(topic: impl Into<Topic>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }

    /// Create an event by serializing `payload`.
    ///
    /// # Errors
    ///
    /// Returns an error if `payload` cannot be represented as JSON.
    pub fn encode<T: Serialize>(topic: impl Into<Topic>, payload: &T) -> serde_json::Result<Self> {
        Ok(Self::new(topic, serde_json::to_value(payload)?))
    }

    /// Decode the payload into the topic's schema.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::InvalidPayload`] if the payload does not match.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        T::deserialize(&self.payload).map_err(|source| HandlerError::InvalidPayload {
            topic: self.topic.clone(),
            source,
        })
    }
}
