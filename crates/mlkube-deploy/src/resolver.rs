//! Endpoint resolution from cluster state.

use std::collections::HashSet;

use async_trait::async_trait;
use mlkube_client::{cartesian, Endpoint, ResolveError, Resolver};
use mlkube_core::CanonicalName;
use tracing::debug;

use crate::cluster::Cluster;
use crate::resources::node_ports;

/// Resolves a deployment to (pod host, node port) pairs.
///
/// Hosts are the node IPs of the deployment's running pods; ports are the
/// node ports of its service. A deployment without a service resolves to
/// nothing.
pub struct ClusterResolver<C> {
    cluster: C,
}

impl<C: Cluster> ClusterResolver<C> {
    /// Resolve against `cluster`.
    pub fn new(cluster: C) -> Self {
        Self { cluster }
    }
}

#[async_trait]
impl<C: Cluster> Resolver for ClusterResolver<C> {
    async fn resolve(&self, service: &str) -> Result<HashSet<Endpoint>, ResolveError> {
        let name = CanonicalName::parse(service).map_err(|e| ResolveError::new(service, e))?;

        let Some(svc) = self
            .cluster
            .get_service(&name)
            .await
            .map_err(|e| ResolveError::new(service, e))?
        else {
            debug!(service, "No service found");
            return Ok(HashSet::new());
        };

        let ports = node_ports(&svc);
        let hosts = self
            .cluster
            .running_pod_hosts(&name)
            .await
            .map_err(|e| ResolveError::new(service, e))?;

        let endpoints = cartesian(hosts, ports);
        debug!(service, count = endpoints.len(), "Resolved endpoints");
        Ok(endpoints)
    }
}
