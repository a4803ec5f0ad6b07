//! Error types for the client crate.

use thiserror::Error;

use crate::endpoint::Endpoint;

/// A specialized Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Failure to look up the endpoints of a service.
#[derive(Debug, Error)]
#[error("failed to resolve endpoints of {service}: {source}")]
pub struct ResolveError {
    /// Logical service name being resolved.
    pub service: String,
    /// Underlying failure.
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl ResolveError {
    /// Wrap a backend error.
    pub fn new(
        service: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            service: service.into(),
            source: source.into(),
        }
    }
}

/// Errors that can occur when invoking a model service.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Resolution returned no endpoint at all.
    #[error("no endpoints available for service {0}")]
    NoEndpoints(String),

    /// Every cached endpoint refused the connection; all were evicted.
    #[error("connection failed to all endpoints of {service}: {}", join(.evicted))]
    AllEndpointsFailed {
        /// Logical service name.
        service: String,
        /// Evicted endpoints, sorted.
        evicted: Vec<Endpoint>,
    },

    /// A reachable endpoint rejected the request.
    #[error("endpoint {endpoint} rejected request with status {status}: {body}")]
    UpstreamRejected {
        /// Endpoint that answered.
        endpoint: Endpoint,
        /// HTTP status code.
        status: u16,
        /// Response body as text.
        body: String,
    },

    /// Endpoint resolution failed.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// HTTP failure other than a refused connection.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body is not a table.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// Client construction failed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Whether calling again may succeed without operator action.
    ///
    /// After a total connection failure the cache is empty, so the next call
    /// re-resolves.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::NoEndpoints(_) | Self::AllEndpointsFailed { .. } | Self::Resolve(_)
        )
    }
}

fn join(endpoints: &[Endpoint]) -> String {
    endpoints
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
