//! Error types for the bus crate.

use thiserror::Error;

use crate::topic::Topic;

/// A specialized Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors raised by the dispatcher and its transports.
#[derive(Error, Debug)]
pub enum BusError {
    /// A handler was registered without declaring any topic.
    #[error("handler {0} declares no topics")]
    NoTopics(String),

    /// The transport URI uses a scheme no transport understands.
    #[error("unsupported transport scheme: {0}")]
    UnsupportedScheme(String),

    /// Redis connection or command failure.
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// The transport will never deliver another message.
    #[error("transport closed")]
    TransportClosed,

    /// A payload arrived that is not valid JSON.
    #[error("malformed payload on topic {topic}: {source}")]
    Malformed {
        /// Topic the payload arrived on.
        topic: Topic,
        /// Decoding failure.
        #[source]
        source: serde_json::Error,
    },

    /// An outgoing payload could not be encoded.
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

impl BusError {
    /// Whether the receive loop must end on this error.
    ///
    /// A single bad payload is skipped; losing the transport is not.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Malformed { .. })
    }
}

/// Errors a [`Handler`](crate::Handler) reports for one event.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The handler was given an event for a topic it does not handle.
    #[error("unknown topic: {0}")]
    UnknownTopic(Topic),

    /// The payload does not match the topic's schema.
    #[error("invalid payload on topic {topic}: {source}")]
    InvalidPayload {
        /// Topic the payload arrived on.
        topic: Topic,
        /// Decoding failure.
        #[source]
        source: serde_json::Error,
    },

    /// The handler's own work failed.
    #[error("{0}")]
    Failed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    /// Wrap any error as a handler failure.
    pub fn failed(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Failed(Box::new(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_payload_is_not_fatal() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = BusError::Malformed {
            topic: Topic::new("t"),
            source,
        };
        assert!(!err.is_fatal());
        assert!(BusError::TransportClosed.is_fatal());
    }
}
