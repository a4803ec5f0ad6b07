//! The deployment reconciler.
//!
//! A model version is served by a workload and a service sharing one
//! canonical name. The reconciler drives that pair through
//! `Absent -> Creating -> Active` on create and back to `Absent` on delete.
//! There is no update transition: a new version is a new deployment.

use k8s_openapi::api::apps::v1::Deployment;
use tracing::{debug, error, info, warn};

use mlkube_core::CanonicalName;

use crate::cluster::Cluster;
use crate::error::{DeployError, Result};
use crate::pipeline::ImagePipeline;
use crate::resources::{build_deployment, build_service, node_ports, CREATED_AT_ANNOTATION};
use crate::types::{
    DeleteOutcome, DeploymentRecord, DeploymentState, Pairing, Provisioned, ResourceKind,
};
use crate::DeployConfig;

/// Creates, observes and deletes model deployments.
pub struct Reconciler<C, P> {
    cluster: C,
    pipeline: P,
    config: DeployConfig,
}

impl<C: Cluster, P: ImagePipeline> Reconciler<C, P> {
    /// Create a reconciler.
    pub fn new(cluster: C, pipeline: P, config: DeployConfig) -> Self {
        Self {
            cluster,
            pipeline,
            config,
        }
    }

    /// Get a reference to the deployment config.
    #[must_use]
    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// Cluster access.
    #[must_use]
    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    /// Build, push and deploy `model` at `version`.
    ///
    /// The deployment is named `canonicalize("{model}-{version}")`. Nothing
    /// touches the cluster until the image is pushed.
    ///
    /// # Errors
    ///
    /// - [`DeployError::InvalidName`] if nothing legal remains of the name
    /// - [`DeployError::AlreadyExists`] if the workload exists
    /// - [`DeployError::Inconsistent`] if only the service exists
    /// - [`DeployError::Pipeline`] if the image cannot be built or pushed
    /// - [`DeployError::ServiceProvisioning`] if the service cannot be created
    pub async fn create(&self, model: &str, version: &str, model_uri: &str) -> Result<Provisioned> {
        let (name, renamed) = CanonicalName::for_model_version(model, version)?;
        if renamed {
            warn!(
                model,
                version,
                name = %name,
                "Model name contains illegal characters, stripped"
            );
        }

        match self.pairing(&name).await? {
            Pairing::Complete | Pairing::WorkloadOnly => {
                warn!(name = %name, "Deployment already exists, skipping creation");
                return Err(DeployError::AlreadyExists(name.to_string()));
            }
            Pairing::ServiceOnly => {
                return Err(DeployError::Inconsistent {
                    name: name.to_string(),
                    pairing: Pairing::ServiceOnly,
                });
            }
            Pairing::Absent => {}
        }

        let image = self
            .pipeline
            .build_and_push(&name, &self.config.image_tag, model_uri)
            .await?;

        let deployment = build_deployment(&name, &image, &self.config);
        match self.cluster.create_deployment(&deployment).await {
            Ok(_) => {}
            Err(crate::ClusterError::AlreadyExists { .. }) => {
                warn!(name = %name, "Deployment created concurrently");
                return Err(DeployError::AlreadyExists(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        info!(
            name = %name,
            image = %image,
            namespace = %self.config.namespace,
            "Created model deployment"
        );

        self.provision_service(&name).await?;

        Ok(Provisioned {
            name,
            image,
            renamed,
        })
    }

    /// Fetch the workload called `name`, `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster cannot be queried.
    pub async fn get(&self, name: &CanonicalName) -> Result<Option<Deployment>> {
        Ok(self.cluster.get_deployment(name).await?)
    }

    /// Delete the service and workload called `name`.
    ///
    /// Both deletions are attempted even if the first fails. A resource that
    /// does not exist counts as deleted.
    ///
    /// # Errors
    ///
    /// - [`DeployError::PartialDelete`] if exactly one deletion failed
    /// - [`DeployError::DeleteFailed`] if both failed
    pub async fn delete(&self, name: &CanonicalName) -> Result<DeleteOutcome> {
        let service = self.cluster.delete_service(name).await;
        let workload = self.cluster.delete_deployment(name).await;

        match (service, workload) {
            (Ok(service), Ok(workload)) => {
                let outcome = DeleteOutcome { service, workload };
                if outcome.was_absent() {
                    info!(name = %name, "Deployment not found, already deleted");
                } else {
                    info!(name = %name, "Deleted model deployment");
                }
                Ok(outcome)
            }
            (Ok(_), Err(source)) => {
                error!(name = %name, error = %source, "Failed to delete deployment");
                Err(DeployError::PartialDelete {
                    name: name.to_string(),
                    removed: ResourceKind::Service,
                    failed: ResourceKind::Workload,
                    source,
                })
            }
            (Err(source), Ok(_)) => {
                error!(name = %name, error = %source, "Failed to delete service");
                Err(DeployError::PartialDelete {
                    name: name.to_string(),
                    removed: ResourceKind::Workload,
                    failed: ResourceKind::Service,
                    source,
                })
            }
            (Err(service), Err(workload)) => {
                error!(
                    name = %name,
                    service_error = %service,
                    deployment_error = %workload,
                    "Failed to delete model deployment"
                );
                Err(DeployError::DeleteFailed {
                    name: name.to_string(),
                    service,
                    workload,
                })
            }
        }
    }

    /// Deployments are immutable.
    ///
    /// # Errors
    ///
    /// Always returns [`DeployError::Unsupported`].
    pub async fn update(&self, name: &CanonicalName) -> Result<()> {
        debug!(name = %name, "Rejecting update");
        Err(DeployError::Unsupported("update"))
    }

    /// Observe the pairing and state of `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster cannot be queried.
    pub async fn inspect(&self, name: &CanonicalName) -> Result<DeploymentRecord> {
        let deployment = self.cluster.get_deployment(name).await?;
        let service = self.cluster.get_service(name).await?;
        let pairing = Pairing::from_presence(deployment.is_some(), service.is_some());

        let deleting = deployment
            .as_ref()
            .is_some_and(|d| d.metadata.deletion_timestamp.is_some())
            || service
                .as_ref()
                .is_some_and(|s| s.metadata.deletion_timestamp.is_some());

        let ready_replicas = deployment
            .as_ref()
            .and_then(|d| d.status.as_ref())
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);

        let state = match (&deployment, deleting) {
            (None, _) => DeploymentState::Absent,
            (Some(_), true) => DeploymentState::Deleting,
            (Some(_), false) if ready_replicas > 0 => DeploymentState::Active,
            (Some(_), false) => DeploymentState::Creating,
        };

        let image = deployment
            .as_ref()
            .and_then(|d| d.spec.as_ref())
            .and_then(|s| s.template.spec.as_ref())
            .and_then(|s| s.containers.first())
            .and_then(|c| c.image.clone());

        let created_at = deployment.as_ref().and_then(|d| {
            d.metadata
                .creation_timestamp
                .as_ref()
                .map(|t| t.0)
                .or_else(|| {
                    d.metadata
                        .annotations
                        .as_ref()?
                        .get(CREATED_AT_ANNOTATION)
                        .and_then(|v| chrono::DateTime::parse_from_rfc3339(v).ok())
                        .map(|t| t.with_timezone(&chrono::Utc))
                })
        });

        Ok(DeploymentRecord {
            name: name.clone(),
            pairing,
            state,
            image,
            ready_replicas,
            node_ports: service.as_ref().map(node_ports).unwrap_or_default(),
            created_at,
        })
    }

    /// Bring a half-created or half-deleted deployment back to a whole state.
    ///
    /// A workload without service gets its service; a service without
    /// workload is deleted. Complete and absent deployments are left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster cannot be queried or changed.
    pub async fn repair(&self, name: &CanonicalName) -> Result<Pairing> {
        let pairing = self.pairing(name).await?;

        match pairing {
            Pairing::WorkloadOnly => {
                info!(name = %name, "Recreating missing service");
                let service = build_service(name, &self.config);
                match self.cluster.create_service(&service).await {
                    Ok(_) | Err(crate::ClusterError::AlreadyExists { .. }) => {}
                    Err(e) => return Err(e.into()),
                }
                Ok(Pairing::Complete)
            }
            Pairing::ServiceOnly => {
                info!(name = %name, "Deleting orphaned service");
                self.cluster.delete_service(name).await?;
                Ok(Pairing::Absent)
            }
            Pairing::Complete | Pairing::Absent => Ok(pairing),
        }
    }

    /// Names of every deployment created by mlkube.
    ///
    /// # Errors
    ///
    /// Returns an error if listing fails.
    pub async fn list(&self) -> Result<Vec<CanonicalName>> {
        let deployments = self.cluster.list_managed_deployments().await?;

        let mut names: Vec<CanonicalName> = deployments
            .into_iter()
            .filter_map(|d| d.metadata.name)
            .filter_map(|raw| match CanonicalName::parse(&raw) {
                Ok(name) => Some(name),
                Err(e) => {
                    warn!(name = %raw, error = %e, "Skipping deployment with invalid name");
                    None
                }
            })
            .collect();
        names.sort();
        Ok(names)
    }

    async fn pairing(&self, name: &CanonicalName) -> Result<Pairing> {
        let workload = self.cluster.get_deployment(name).await?.is_some();
        let service = self.cluster.get_service(name).await?.is_some();
        Ok(Pairing::from_presence(workload, service))
    }

    /// Create the service of `name`, removing the workload again on failure.
    async fn provision_service(&self, name: &CanonicalName) -> Result<()> {
        let service = build_service(name, &self.config);
        let Err(source) = self.cluster.create_service(&service).await else {
            info!(name = %name, "Created model service");
            return Ok(());
        };

        error!(
            name = %name,
            error = %source,
            "Failed to create service, rolling back deployment"
        );
        let rolled_back = match self.cluster.delete_deployment(name).await {
            Ok(_) => true,
            Err(e) => {
                error!(name = %name, error = %e, "Failed to roll back deployment");
                false
            }
        };

        Err(DeployError::ServiceProvisioning {
            name: name.to_string(),
            source,
            rolled_back,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mock::{MockCluster, MockFailure};
    use crate::pipeline::mock::MockPipeline;
    use crate::types::Removal;
    use crate::{ClusterError, PipelineError};
    use std::sync::Arc;

    type TestReconciler = Reconciler<Arc<MockCluster>, Arc<MockPipeline>>;

    fn setup() -> (TestReconciler, Arc<MockCluster>, Arc<MockPipeline>) {
        let cluster = Arc::new(MockCluster::new());
        let pipeline = Arc::new(MockPipeline::default());
        let reconciler = Reconciler::new(
            Arc::clone(&cluster),
            Arc::clone(&pipeline),
            DeployConfig::default(),
        );
        (reconciler, cluster, pipeline)
    }

    fn name(raw: &str) -> CanonicalName {
        CanonicalName::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn create_provisions_workload_and_service() {
        let (reconciler, cluster, pipeline) = setup();

        let provisioned = reconciler
            .create("iris-rf", "1", "models:/iris-rf/1")
            .await
            .unwrap();

        assert_eq!(provisioned.name.as_str(), "iris-rf-1");
        assert!(!provisioned.renamed);
        assert_eq!(
            provisioned.image.to_string(),
            "registry.local/models/iris-rf-1:latest"
        );
        assert_eq!(cluster.deployment_count(), 1);
        assert_eq!(cluster.service_count(), 1);
        assert_eq!(pipeline.builds()[0].model_uri, "models:/iris-rf/1");

        let record = reconciler.inspect(&provisioned.name).await.unwrap();
        assert_eq!(record.pairing, Pairing::Complete);
        assert_eq!(record.state, DeploymentState::Active);
        assert_eq!(record.node_ports, vec![30000]);
        assert!(record.created_at.is_some());
    }

    #[tokio::test]
    async fn create_strips_illegal_characters() {
        let (reconciler, cluster, _) = setup();

        let provisioned = reconciler
            .create("iris_rf!", "1", "models:/iris/1")
            .await
            .unwrap();

        assert_eq!(provisioned.name.as_str(), "irisrf-1");
        assert!(provisioned.renamed);
        assert!(cluster.deployment("irisrf-1").is_some());
    }

    #[tokio::test]
    async fn create_twice_conflicts_without_mutation() {
        let (reconciler, cluster, pipeline) = setup();
        reconciler.create("iris-rf", "1", "uri").await.unwrap();

        let err = reconciler.create("iris-rf", "1", "uri").await.unwrap_err();
        assert!(matches!(err, DeployError::AlreadyExists(ref n) if n == "iris-rf-1"));
        assert_eq!(pipeline.builds().len(), 1);
        assert_eq!(cluster.deployment_count(), 1);
        assert_eq!(cluster.service_count(), 1);
    }

    #[tokio::test]
    async fn create_lost_race_maps_to_already_exists() {
        let (reconciler, cluster, _) = setup();
        cluster.inject_failure(MockFailure::ConflictDeployment);

        let err = reconciler.create("iris-rf", "1", "uri").await.unwrap_err();
        assert!(matches!(err, DeployError::AlreadyExists(_)));
        assert_eq!(cluster.service_count(), 0);
    }

    #[tokio::test]
    async fn create_rejects_orphaned_service() {
        let (reconciler, cluster, pipeline) = setup();
        cluster
            .create_service(&build_service(&name("iris-rf-1"), &DeployConfig::default()))
            .await
            .unwrap();

        let err = reconciler.create("iris-rf", "1", "uri").await.unwrap_err();
        assert!(matches!(
            err,
            DeployError::Inconsistent {
                pairing: Pairing::ServiceOnly,
                ..
            }
        ));
        assert!(pipeline.builds().is_empty());
    }

    #[tokio::test]
    async fn pipeline_failure_touches_nothing() {
        let (reconciler, cluster, pipeline) = setup();
        pipeline.fail_with(Some(PipelineError::Build("no MLmodel file".to_string())));

        let err = reconciler.create("iris-rf", "1", "uri").await.unwrap_err();
        match err {
            DeployError::Pipeline(PipelineError::Build(msg)) => {
                assert_eq!(msg, "no MLmodel file");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(cluster.deployment_count(), 0);
        assert_eq!(cluster.service_count(), 0);
    }

    #[tokio::test]
    async fn service_failure_rolls_back_workload() {
        let (reconciler, cluster, _) = setup();
        cluster.inject_failure(MockFailure::CreateService);

        let err = reconciler.create("iris-rf", "1", "uri").await.unwrap_err();
        assert!(matches!(
            err,
            DeployError::ServiceProvisioning {
                rolled_back: true,
                ..
            }
        ));
        assert_eq!(cluster.deployment_count(), 0);
    }

    #[tokio::test]
    async fn failed_rollback_is_reported() {
        let (reconciler, cluster, _) = setup();
        cluster.inject_failure(MockFailure::CreateService);
        cluster.inject_failure(MockFailure::DeleteDeployment);

        let err = reconciler.create("iris-rf", "1", "uri").await.unwrap_err();
        assert!(matches!(
            err,
            DeployError::ServiceProvisioning {
                rolled_back: false,
                ..
            }
        ));
        assert_eq!(cluster.deployment_count(), 1);

        cluster.clear_failure(MockFailure::CreateService);
        assert_eq!(
            reconciler.repair(&name("iris-rf-1")).await.unwrap(),
            Pairing::Complete
        );
        assert_eq!(cluster.service_count(), 1);
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let (reconciler, cluster, _) = setup();
        assert!(reconciler.get(&name("nope-1")).await.unwrap().is_none());

        cluster.inject_failure(MockFailure::Get);
        assert!(reconciler.get(&name("nope-1")).await.is_err());
    }

    #[tokio::test]
    async fn delete_missing_succeeds() {
        let (reconciler, _, _) = setup();
        let outcome = reconciler.delete(&name("nope-1")).await.unwrap();
        assert!(outcome.was_absent());
    }

    #[tokio::test]
    async fn delete_removes_both() {
        let (reconciler, cluster, _) = setup();
        reconciler.create("iris-rf", "1", "uri").await.unwrap();

        let outcome = reconciler.delete(&name("iris-rf-1")).await.unwrap();
        assert_eq!(outcome.service, Removal::Removed);
        assert_eq!(outcome.workload, Removal::Removed);
        assert_eq!(cluster.deployment_count(), 0);
        assert_eq!(cluster.service_count(), 0);
    }

    #[tokio::test]
    async fn delete_attempts_both_resources() {
        let (reconciler, cluster, _) = setup();
        reconciler.create("iris-rf", "1", "uri").await.unwrap();
        cluster.inject_failure(MockFailure::DeleteService);

        let err = reconciler.delete(&name("iris-rf-1")).await.unwrap_err();
        assert!(matches!(
            err,
            DeployError::PartialDelete {
                removed: ResourceKind::Workload,
                failed: ResourceKind::Service,
                ..
            }
        ));
        assert_eq!(cluster.deployment_count(), 0);

        cluster.inject_failure(MockFailure::DeleteDeployment);
        let err = reconciler.delete(&name("iris-rf-1")).await.unwrap_err();
        assert!(matches!(err, DeployError::DeleteFailed { .. }));
    }

    #[tokio::test]
    async fn update_is_unsupported() {
        let (reconciler, _, _) = setup();
        let err = reconciler.update(&name("iris-rf-1")).await.unwrap_err();
        assert!(matches!(err, DeployError::Unsupported("update")));
    }

    #[tokio::test]
    async fn repair_deletes_orphaned_service() {
        let (reconciler, cluster, _) = setup();
        cluster
            .create_service(&build_service(&name("iris-rf-1"), &DeployConfig::default()))
            .await
            .unwrap();

        let record = reconciler.inspect(&name("iris-rf-1")).await.unwrap();
        assert_eq!(record.pairing, Pairing::ServiceOnly);
        assert_eq!(record.state, DeploymentState::Absent);

        assert_eq!(
            reconciler.repair(&name("iris-rf-1")).await.unwrap(),
            Pairing::Absent
        );
        assert_eq!(cluster.service_count(), 0);
    }

    #[tokio::test]
    async fn list_returns_sorted_names() {
        let (reconciler, _, _) = setup();
        reconciler.create("wine", "2", "uri").await.unwrap();
        reconciler.create("iris-rf", "1", "uri").await.unwrap();

        let names = reconciler.list().await.unwrap();
        assert_eq!(names, vec![name("iris-rf-1"), name("wine-2")]);
    }

    #[tokio::test]
    async fn cluster_errors_propagate() {
        let (reconciler, cluster, _) = setup();
        cluster.inject_failure(MockFailure::CreateDeployment);

        let err = reconciler.create("iris-rf", "1", "uri").await.unwrap_err();
        assert!(matches!(err, DeployError::Cluster(ClusterError::Other(_))));
    }
}
