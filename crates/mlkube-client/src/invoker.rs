//! Endpoint-caching invoker with connection failover.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::endpoint::Endpoint;
use crate::error::{ClientError, Result};
use crate::frame::TabularBody;
use crate::resolver::Resolver;

/// HTTP settings for an invoker.
#[derive(Debug, Clone)]
pub struct InvokerConfig {
    /// Total time allowed for one request.
    pub request_timeout: Duration,
    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,
    /// Path of the inference route on each endpoint.
    pub path: String,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            path: "/invocations".to_string(),
        }
    }
}

impl InvokerConfig {
    /// Override the inference path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }
}

/// Invokes one logical service, routing around unreachable endpoints.
///
/// The endpoint cache belongs to this value and is never shared; callers in
/// different tasks should each hold their own invoker.
pub struct ResilientInvoker<R> {
    service: String,
    resolver: R,
    client: reqwest::Client,
    endpoints: HashSet<Endpoint>,
    config: InvokerConfig,
}

impl<R: Resolver> ResilientInvoker<R> {
    /// Create an invoker with default HTTP settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(service: impl Into<String>, resolver: R) -> Result<Self> {
        Self::with_config(service, resolver, InvokerConfig::default())
    }

    /// Create an invoker with explicit HTTP settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_config(
        service: impl Into<String>,
        resolver: R,
        config: InvokerConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self::with_client(service, resolver, client, config))
    }

    /// Create an invoker around an existing HTTP client.
    pub fn with_client(
        service: impl Into<String>,
        resolver: R,
        client: reqwest::Client,
        config: InvokerConfig,
    ) -> Self {
        Self {
            service: service.into(),
            resolver,
            client,
            endpoints: HashSet::new(),
            config,
        }
    }

    /// Logical service name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Endpoints currently cached.
    #[must_use]
    pub fn endpoints(&self) -> &HashSet<Endpoint> {
        &self.endpoints
    }

    /// Drop every cached endpoint, forcing resolution on the next call.
    pub fn invalidate(&mut self) {
        self.endpoints.clear();
    }

    /// Send `body` to the service and decode the answer as a table.
    ///
    /// # Errors
    ///
    /// See [`ResilientInvoker::invoke_json`]; additionally returns
    /// [`ClientError::Decode`] if the answer is not a recognised table shape.
    pub async fn invoke(&mut self, body: &TabularBody) -> Result<TabularBody> {
        let value = self.invoke_json(body).await?;
        TabularBody::from_response(value)
    }

    /// Send `body` to the service and return the raw JSON answer.
    ///
    /// Endpoints are tried one at a time. An endpoint that refuses the
    /// connection is evicted and the next is tried; the first endpoint that
    /// answers decides the outcome.
    ///
    /// # Errors
    ///
    /// - [`ClientError::NoEndpoints`] if resolution yields nothing
    /// - [`ClientError::AllEndpointsFailed`] if every endpoint was evicted
    /// - [`ClientError::UpstreamRejected`] on a non-success status
    /// - [`ClientError::Http`] on any other transport failure
    pub async fn invoke_json(&mut self, body: &TabularBody) -> Result<Value> {
        if self.endpoints.is_empty() {
            self.refresh().await?;
        }

        let mut candidates: Vec<Endpoint> = self.endpoints.iter().cloned().collect();
        candidates.sort();

        let mut evicted = Vec::new();
        let mut outcome = None;

        for endpoint in candidates {
            let url = endpoint.url(&self.config.path);
            debug!(service = %self.service, %endpoint, "Sending inference request");

            match self.client.post(&url).json(body).send().await {
                Err(e) if e.is_connect() => {
                    warn!(
                        service = %self.service,
                        %endpoint,
                        error = %e,
                        "Endpoint unreachable, evicting"
                    );
                    evicted.push(endpoint);
                }
                Err(e) => {
                    outcome = Some(Err(ClientError::Http(e)));
                    break;
                }
                Ok(response) => {
                    outcome = Some(Self::read_response(endpoint, response).await);
                    break;
                }
            }
        }

        for endpoint in &evicted {
            self.endpoints.remove(endpoint);
        }

        outcome.unwrap_or_else(|| {
            Err(ClientError::AllEndpointsFailed {
                service: self.service.clone(),
                evicted,
            })
        })
    }

    async fn refresh(&mut self) -> Result<()> {
        let resolved = self.resolver.resolve(&self.service).await?;
        if resolved.is_empty() {
            return Err(ClientError::NoEndpoints(self.service.clone()));
        }

        info!(
            service = %self.service,
            count = resolved.len(),
            "Resolved service endpoints"
        );
        self.endpoints = resolved;
        Ok(())
    }

    async fn read_response(endpoint: Endpoint, response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::UpstreamRejected {
                endpoint,
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }
}

impl<R> std::fmt::Debug for ResilientInvoker<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientInvoker")
            .field("service", &self.service)
            .field("endpoints", &self.endpoints)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::StaticResolver;
    use serde_json::json;
    use std::net::TcpListener;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn dead_endpoint() -> Endpoint {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        Endpoint::new("127.0.0.1", port)
    }

    fn live_endpoint(server: &MockServer) -> Endpoint {
        let addr = server.address();
        Endpoint::new(addr.ip().to_string(), addr.port())
    }

    fn iris_input() -> TabularBody {
        TabularBody::new(
            vec!["sepal_length".into(), "sepal_width".into()],
            vec![vec![json!(5.1), json!(3.5)]],
        )
    }

    #[tokio::test]
    async fn fails_over_to_live_endpoint() {
        // Three ports on one host; the server takes the highest so both dead
        // endpoints are tried before it.
        let mut listeners: Vec<TcpListener> = (0..3)
            .map(|_| TcpListener::bind("127.0.0.1:0").unwrap())
            .collect();
        listeners.sort_by_key(|l| l.local_addr().unwrap().port());
        let server_listener = listeners.pop().unwrap();
        let dead: Vec<Endpoint> = listeners
            .iter()
            .map(|l| Endpoint::new("127.0.0.1", l.local_addr().unwrap().port()))
            .collect();
        drop(listeners);

        let server = MockServer::builder().listener(server_listener).start().await;
        Mock::given(method("POST"))
            .and(path("/invocations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([0])))
            .expect(1)
            .mount(&server)
            .await;

        let live = live_endpoint(&server);
        assert!(dead.iter().all(|d| *d < live));
        let resolver = StaticResolver::new(dead.iter().cloned().chain([live.clone()]));
        let mut invoker = ResilientInvoker::new("iris-rf-1", resolver).unwrap();

        let output = invoker.invoke(&iris_input()).await.unwrap();
        assert_eq!(output.data, vec![vec![json!(0)]]);

        assert_eq!(invoker.endpoints().len(), 1);
        assert_eq!(invoker.endpoints(), &HashSet::from([live]));
    }

    #[tokio::test]
    async fn all_dead_evicts_everything() {
        let dead = [dead_endpoint(), dead_endpoint()];
        let resolver = StaticResolver::new(dead.iter().cloned());
        let mut invoker = ResilientInvoker::new("iris-rf-1", resolver).unwrap();

        let err = invoker.invoke(&iris_input()).await.unwrap_err();
        match err {
            ClientError::AllEndpointsFailed { service, evicted } => {
                assert_eq!(service, "iris-rf-1");
                let mut expected = dead.to_vec();
                expected.sort();
                assert_eq!(evicted, expected);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(invoker.endpoints().is_empty());
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/invocations"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad input"))
            .expect(1)
            .mount(&server)
            .await;

        let live = live_endpoint(&server);
        let resolver = StaticResolver::new([live.clone()]);
        let mut invoker = ResilientInvoker::new("iris-rf-1", resolver).unwrap();

        let err = invoker.invoke(&iris_input()).await.unwrap_err();
        match err {
            ClientError::UpstreamRejected {
                endpoint,
                status,
                body,
            } => {
                assert_eq!(endpoint, live);
                assert_eq!(status, 400);
                assert_eq!(body, "bad input");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(invoker.endpoints().contains(&live));
    }

    #[tokio::test]
    async fn resolves_once_while_cache_is_populated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([1])))
            .mount(&server)
            .await;

        let resolver = StaticResolver::new([live_endpoint(&server)]);
        let counter = resolver.clone();
        let mut invoker = ResilientInvoker::new("iris-rf-1", resolver).unwrap();

        invoker.invoke(&iris_input()).await.unwrap();
        invoker.invoke(&iris_input()).await.unwrap();
        assert_eq!(counter.calls(), 1);

        invoker.invalidate();
        invoker.invoke(&iris_input()).await.unwrap();
        assert_eq!(counter.calls(), 2);
    }

    #[tokio::test]
    async fn resolves_again_after_exhaustion() {
        let resolver = StaticResolver::new([dead_endpoint()]);
        let counter = resolver.clone();
        let mut invoker = ResilientInvoker::new("iris-rf-1", resolver).unwrap();

        assert!(invoker.invoke(&iris_input()).await.is_err());
        assert!(invoker.invoke(&iris_input()).await.is_err());
        assert_eq!(counter.calls(), 2);
    }

    #[tokio::test]
    async fn empty_resolution() {
        let mut invoker =
            ResilientInvoker::new("iris-rf-1", StaticResolver::new(Vec::new())).unwrap();
        let err = invoker.invoke(&iris_input()).await.unwrap_err();
        assert!(matches!(err, ClientError::NoEndpoints(ref s) if s == "iris-rf-1"));
    }

    #[tokio::test]
    async fn sends_split_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .and(wiremock::matchers::body_json(json!({
                "columns": ["sepal_length", "sepal_width"],
                "data": [[5.1, 3.5]]
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"predictions": [2]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let resolver = StaticResolver::new([live_endpoint(&server)]);
        let config = InvokerConfig::default().with_path("/predict");
        let mut invoker = ResilientInvoker::with_config("iris-rf-1", resolver, config).unwrap();

        let output = invoker.invoke(&iris_input()).await.unwrap();
        assert_eq!(output.columns, vec!["predictions"]);
    }
}
