//! Endpoint resolution.
//!
//! The cluster-backed resolver lives with the deployment code; this module
//! holds the interface and a fixed-set resolver.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::endpoint::Endpoint;
use crate::error::ResolveError;

/// Maps a logical service name to its current endpoints.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve `service` to a set of endpoints. An empty set is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing state cannot be queried.
    async fn resolve(&self, service: &str) -> Result<HashSet<Endpoint>, ResolveError>;
}

#[async_trait]
impl<R: Resolver + ?Sized> Resolver for Arc<R> {
    async fn resolve(&self, service: &str) -> Result<HashSet<Endpoint>, ResolveError> {
        (**self).resolve(service).await
    }
}

/// Every host paired with every port.
///
/// Instances of a service are assumed reachable on each of its ports.
#[must_use]
pub fn cartesian<H, P>(hosts: H, ports: P) -> HashSet<Endpoint>
where
    H: IntoIterator,
    H::Item: AsRef<str>,
    P: IntoIterator<Item = u16>,
    P::IntoIter: Clone,
{
    let ports = ports.into_iter();
    hosts
        .into_iter()
        .flat_map(|host| {
            let host = host.as_ref().to_string();
            ports.clone().map(move |port| Endpoint::new(host.clone(), port))
        })
        .collect()
}

/// A resolver returning a fixed set, counting how often it is asked.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    endpoints: HashSet<Endpoint>,
    calls: Arc<AtomicUsize>,
}

impl StaticResolver {
    /// Resolve every service to `endpoints`.
    pub fn new(endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
        Self {
            endpoints: endpoints.into_iter().collect(),
            calls: Arc::default(),
        }
    }

    /// Number of `resolve` calls so far, across clones.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, _service: &str) -> Result<HashSet<Endpoint>, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.endpoints.clone())
    }
}
