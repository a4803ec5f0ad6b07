//! Cluster API access.
//!
//! This module provides the [`Cluster`] trait covering the deployment and
//! service pair of a model, and [`KubeCluster`], which talks to a real
//! Kubernetes API server.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, Resource};
use tracing::{debug, info, warn};

use mlkube_core::CanonicalName;

use crate::error::ClusterError;
use crate::resources::{managed_selector, pod_selector};
use crate::types::{Removal, ResourceKind};

/// Result type of cluster calls.
pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// Seconds a deleted workload's pods get to shut down.
pub const DELETE_GRACE_PERIOD_SECS: u32 = 5;

/// The subset of the Kubernetes API a model deployment needs.
///
/// Reads map 404 to `None`, deletes map 404 to [`Removal::AlreadyAbsent`] and
/// creates map 409 to [`ClusterError::AlreadyExists`].
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Fetch the workload called `name`.
    ///
    /// # Errors
    ///
    /// Returns an error on any failure other than absence.
    async fn get_deployment(&self, name: &CanonicalName) -> ClusterResult<Option<Deployment>>;

    /// Create a workload.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::AlreadyExists`] if the name is taken.
    async fn create_deployment(&self, deployment: &Deployment) -> ClusterResult<Deployment>;

    /// Delete the workload called `name` and, in the foreground, its pods.
    ///
    /// # Errors
    ///
    /// Returns an error on any failure other than absence.
    async fn delete_deployment(&self, name: &CanonicalName) -> ClusterResult<Removal>;

    /// Fetch the service called `name`.
    ///
    /// # Errors
    ///
    /// Returns an error on any failure other than absence.
    async fn get_service(&self, name: &CanonicalName) -> ClusterResult<Option<Service>>;

    /// Create a service.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::AlreadyExists`] if the name is taken.
    async fn create_service(&self, service: &Service) -> ClusterResult<Service>;

    /// Delete the service called `name`.
    ///
    /// # Errors
    ///
    /// Returns an error on any failure other than absence.
    async fn delete_service(&self, name: &CanonicalName) -> ClusterResult<Removal>;

    /// List every workload created by mlkube.
    ///
    /// # Errors
    ///
    /// Returns an error if listing fails.
    async fn list_managed_deployments(&self) -> ClusterResult<Vec<Deployment>>;

    /// Host IPs of the running pods of `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if listing fails.
    async fn running_pod_hosts(&self, name: &CanonicalName) -> ClusterResult<Vec<String>>;
}

#[async_trait]
impl<C: Cluster + ?Sized> Cluster for Arc<C> {
    async fn get_deployment(&self, name: &CanonicalName) -> ClusterResult<Option<Deployment>> {
        (**self).get_deployment(name).await
    }

    async fn create_deployment(&self, deployment: &Deployment) -> ClusterResult<Deployment> {
        (**self).create_deployment(deployment).await
    }

    async fn delete_deployment(&self, name: &CanonicalName) -> ClusterResult<Removal> {
        (**self).delete_deployment(name).await
    }

    async fn get_service(&self, name: &CanonicalName) -> ClusterResult<Option<Service>> {
        (**self).get_service(name).await
    }

    async fn create_service(&self, service: &Service) -> ClusterResult<Service> {
        (**self).create_service(service).await
    }

    async fn delete_service(&self, name: &CanonicalName) -> ClusterResult<Removal> {
        (**self).delete_service(name).await
    }

    async fn list_managed_deployments(&self) -> ClusterResult<Vec<Deployment>> {
        (**self).list_managed_deployments().await
    }

    async fn running_pod_hosts(&self, name: &CanonicalName) -> ClusterResult<Vec<String>> {
        (**self).running_pod_hosts(name).await
    }
}

/// Kubernetes-backed cluster access for one namespace.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    namespace: String,
}

impl KubeCluster {
    /// Create cluster access over an existing client.
    #[must_use]
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Connect using in-cluster config or the default kubeconfig.
    ///
    /// # Errors
    ///
    /// Returns an error if the Kubernetes client cannot be created.
    pub async fn try_default(namespace: impl Into<String>) -> ClusterResult<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, namespace))
    }

    /// Connect using the kubeconfig file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or names no usable context.
    pub async fn from_kubeconfig(
        path: impl AsRef<Path>,
        namespace: impl Into<String>,
    ) -> ClusterResult<Self> {
        let path = path.as_ref();
        let kubeconfig = Kubeconfig::read_from(path)
            .map_err(|e| ClusterError::Other(format!("{}: {e}", path.display())))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| ClusterError::Other(format!("{}: {e}", path.display())))?;
        let client = Client::try_from(config)?;
        debug!(path = %path.display(), "Loaded kubeconfig");
        Ok(Self::new(client, namespace))
    }

    /// Namespace resources are managed in.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn deployments_api(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn services_api(&self) -> Api<Service> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pods_api(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

async fn create_object<K>(api: &Api<K>, kind: ResourceKind, object: &K) -> ClusterResult<K>
where
    K: Resource + Clone + serde::Serialize + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api.create(&PostParams::default(), object).await {
        Ok(created) => Ok(created),
        Err(kube::Error::Api(e)) if e.code == 409 => Err(ClusterError::AlreadyExists {
            kind,
            name: object.meta().name.clone().unwrap_or_default(),
        }),
        Err(e) => Err(e.into()),
    }
}

async fn delete_object<K>(
    api: &Api<K>,
    kind: ResourceKind,
    name: &str,
    params: &DeleteParams,
) -> ClusterResult<Removal>
where
    K: Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api.delete(name, params).await {
        Ok(_) => {
            info!(%kind, name, "Deleted resource");
            Ok(Removal::Removed)
        }
        Err(kube::Error::Api(e)) if e.code == 404 => {
            warn!(%kind, name, "Resource not found, already deleted");
            Ok(Removal::AlreadyAbsent)
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn get_deployment(&self, name: &CanonicalName) -> ClusterResult<Option<Deployment>> {
        Ok(self.deployments_api().get_opt(name).await?)
    }

    async fn create_deployment(&self, deployment: &Deployment) -> ClusterResult<Deployment> {
        create_object(&self.deployments_api(), ResourceKind::Workload, deployment).await
    }

    async fn delete_deployment(&self, name: &CanonicalName) -> ClusterResult<Removal> {
        let params = DeleteParams::foreground().grace_period(DELETE_GRACE_PERIOD_SECS);
        delete_object(&self.deployments_api(), ResourceKind::Workload, name, &params).await
    }

    async fn get_service(&self, name: &CanonicalName) -> ClusterResult<Option<Service>> {
        Ok(self.services_api().get_opt(name).await?)
    }

    async fn create_service(&self, service: &Service) -> ClusterResult<Service> {
        create_object(&self.services_api(), ResourceKind::Service, service).await
    }

    async fn delete_service(&self, name: &CanonicalName) -> ClusterResult<Removal> {
        let params = DeleteParams::default().grace_period(DELETE_GRACE_PERIOD_SECS);
        delete_object(&self.services_api(), ResourceKind::Service, name, &params).await
    }

    async fn list_managed_deployments(&self) -> ClusterResult<Vec<Deployment>> {
        let params = ListParams::default().labels(&managed_selector());
        Ok(self.deployments_api().list(&params).await?.items)
    }

    async fn running_pod_hosts(&self, name: &CanonicalName) -> ClusterResult<Vec<String>> {
        let params = ListParams::default().labels(&pod_selector(name));
        let pods = self.pods_api().list(&params).await?;

        let hosts: Vec<String> = pods
            .items
            .into_iter()
            .filter_map(|pod| pod.status)
            .filter(|status| status.phase.as_deref() == Some("Running"))
            .filter_map(|status| status.host_ip)
            .collect();

        debug!(name = %name, count = hosts.len(), "Listed running pod hosts");
        Ok(hosts)
    }
}

/// An in-memory cluster for testing without a real Kubernetes API server.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentStatus;
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, HashSet};

    /// Cluster calls that can be made to fail.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum MockFailure {
        /// Reads of workloads and services.
        Get,
        /// Workload creation fails with an API error.
        CreateDeployment,
        /// Workload creation reports a conflict, as after a lost race.
        ConflictDeployment,
        /// Service creation.
        CreateService,
        /// Workload deletion.
        DeleteDeployment,
        /// Service deletion.
        DeleteService,
        /// Pod listing.
        ListPods,
    }

    #[derive(Default)]
    struct State {
        deployments: BTreeMap<String, Deployment>,
        services: BTreeMap<String, Service>,
        pod_phases: BTreeMap<String, String>,
        next_node_port: i32,
        failures: HashSet<MockFailure>,
    }

    /// A mock cluster storing resources in memory.
    ///
    /// Created workloads report all replicas ready and get one running pod on
    /// each configured host. Created services get node ports from 30000 up.
    pub struct MockCluster {
        state: Mutex<State>,
        pod_hosts: Vec<String>,
    }

    impl Default for MockCluster {
        fn default() -> Self {
            Self::with_pod_hosts(["10.0.0.1"])
        }
    }

    impl MockCluster {
        /// Create an empty mock cluster with one pod host.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Create an empty mock cluster scheduling pods on `hosts`.
        pub fn with_pod_hosts<I, S>(hosts: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                state: Mutex::new(State {
                    next_node_port: 30000,
                    ..State::default()
                }),
                pod_hosts: hosts.into_iter().map(Into::into).collect(),
            }
        }

        /// Make a call fail until cleared.
        pub fn inject_failure(&self, failure: MockFailure) {
            self.state.lock().failures.insert(failure);
        }

        /// Make a call succeed again.
        pub fn clear_failure(&self, failure: MockFailure) {
            self.state.lock().failures.remove(&failure);
        }

        /// Set the pod phase of the workload `name`.
        pub fn set_pod_phase(&self, name: &str, phase: &str) {
            self.state
                .lock()
                .pod_phases
                .insert(name.to_string(), phase.to_string());
        }

        /// Replace the node ports of the service `name`.
        pub fn set_node_ports(&self, name: &str, ports: &[u16]) {
            let mut state = self.state.lock();
            let Some(spec) = state.services.get_mut(name).and_then(|s| s.spec.as_mut()) else {
                return;
            };
            spec.ports = Some(
                ports
                    .iter()
                    .map(|p| k8s_openapi::api::core::v1::ServicePort {
                        port: i32::from(*p),
                        node_port: Some(i32::from(*p)),
                        ..Default::default()
                    })
                    .collect(),
            );
        }

        /// Number of workloads.
        #[must_use]
        pub fn deployment_count(&self) -> usize {
            self.state.lock().deployments.len()
        }

        /// Number of services.
        #[must_use]
        pub fn service_count(&self) -> usize {
            self.state.lock().services.len()
        }

        /// A stored workload.
        #[must_use]
        pub fn deployment(&self, name: &str) -> Option<Deployment> {
            self.state.lock().deployments.get(name).cloned()
        }

        /// A stored service.
        #[must_use]
        pub fn service(&self, name: &str) -> Option<Service> {
            self.state.lock().services.get(name).cloned()
        }

        fn check(&self, failure: MockFailure) -> ClusterResult<()> {
            if self.state.lock().failures.contains(&failure) {
                return Err(ClusterError::Other(format!("injected failure: {failure:?}")));
            }
            Ok(())
        }
    }

    fn object_name<K: Resource>(object: &K) -> String {
        object.meta().name.clone().unwrap_or_default()
    }

    #[async_trait]
    impl Cluster for MockCluster {
        async fn get_deployment(
            &self,
            name: &CanonicalName,
        ) -> ClusterResult<Option<Deployment>> {
            self.check(MockFailure::Get)?;
            Ok(self.state.lock().deployments.get(name.as_str()).cloned())
        }

        async fn create_deployment(&self, deployment: &Deployment) -> ClusterResult<Deployment> {
            self.check(MockFailure::CreateDeployment)?;
            let name = object_name(deployment);

            let mut state = self.state.lock();
            if state.failures.contains(&MockFailure::ConflictDeployment)
                || state.deployments.contains_key(&name)
            {
                return Err(ClusterError::AlreadyExists {
                    kind: ResourceKind::Workload,
                    name,
                });
            }

            let mut created = deployment.clone();
            let replicas = created.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
            created.metadata.creation_timestamp = Some(
                k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()),
            );
            created.status = Some(DeploymentStatus {
                replicas: Some(replicas),
                ready_replicas: Some(replicas),
                ..Default::default()
            });

            state.pod_phases.insert(name.clone(), "Running".to_string());
            state.deployments.insert(name, created.clone());
            Ok(created)
        }

        async fn delete_deployment(&self, name: &CanonicalName) -> ClusterResult<Removal> {
            self.check(MockFailure::DeleteDeployment)?;
            let mut state = self.state.lock();
            state.pod_phases.remove(name.as_str());
            Ok(match state.deployments.remove(name.as_str()) {
                Some(_) => Removal::Removed,
                None => Removal::AlreadyAbsent,
            })
        }

        async fn get_service(&self, name: &CanonicalName) -> ClusterResult<Option<Service>> {
            self.check(MockFailure::Get)?;
            Ok(self.state.lock().services.get(name.as_str()).cloned())
        }

        async fn create_service(&self, service: &Service) -> ClusterResult<Service> {
            self.check(MockFailure::CreateService)?;
            let name = object_name(service);

            let mut state = self.state.lock();
            if state.services.contains_key(&name) {
                return Err(ClusterError::AlreadyExists {
                    kind: ResourceKind::Service,
                    name,
                });
            }

            let mut created = service.clone();
            let mut next = state.next_node_port;
            if let Some(ports) = created.spec.as_mut().and_then(|s| s.ports.as_mut()) {
                for port in ports {
                    port.node_port = Some(next);
                    next += 1;
                }
            }
            state.next_node_port = next;
            state.services.insert(name, created.clone());
            Ok(created)
        }

        async fn delete_service(&self, name: &CanonicalName) -> ClusterResult<Removal> {
            self.check(MockFailure::DeleteService)?;
            Ok(match self.state.lock().services.remove(name.as_str()) {
                Some(_) => Removal::Removed,
                None => Removal::AlreadyAbsent,
            })
        }

        async fn list_managed_deployments(&self) -> ClusterResult<Vec<Deployment>> {
            self.check(MockFailure::Get)?;
            Ok(self.state.lock().deployments.values().cloned().collect())
        }

        async fn running_pod_hosts(&self, name: &CanonicalName) -> ClusterResult<Vec<String>> {
            self.check(MockFailure::ListPods)?;
            let state = self.state.lock();
            match state.pod_phases.get(name.as_str()) {
                Some(phase) if phase == "Running" => Ok(self.pod_hosts.clone()),
                _ => Ok(Vec::new()),
            }
        }
    }
}
