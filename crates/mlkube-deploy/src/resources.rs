//! Builders for the Kubernetes objects backing a model deployment.
//!
//! Every model version gets a `Deployment` and a `NodePort` `Service` sharing
//! its canonical name. The `name=<canonical>` label ties pods to both.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, LocalObjectReference, PodSpec, PodTemplateSpec,
    ResourceRequirements, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use mlkube_core::{CanonicalName, ImageReference};

use crate::DeployConfig;

/// Label selecting the pods of one deployment.
pub const NAME_LABEL: &str = "name";

/// Label marking resources created by mlkube.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`].
pub const MANAGED_BY: &str = "mlkube";

/// Annotation holding the creation time.
pub const CREATED_AT_ANNOTATION: &str = "mlkube.io/created-at";

/// Annotation holding the image reference.
pub const IMAGE_ANNOTATION: &str = "mlkube.io/image";

const PORT_NAME: &str = "http";

/// Build the workload running `image` under `name`.
#[must_use]
pub fn build_deployment(
    name: &CanonicalName,
    image: &ImageReference,
    config: &DeployConfig,
) -> Deployment {
    let mut annotations = BTreeMap::new();
    annotations.insert(
        CREATED_AT_ANNOTATION.to_string(),
        chrono::Utc::now().to_rfc3339(),
    );
    annotations.insert(IMAGE_ANNOTATION.to_string(), image.to_string());

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(config.namespace.clone()),
            labels: Some(resource_labels(name)),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(config.replicas),
            selector: LabelSelector {
                match_labels: Some(selector(name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(resource_labels(name)),
                    ..Default::default()
                }),
                spec: Some(build_pod_spec(name, image, config)),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the `NodePort` service exposing the pods of `name`.
#[must_use]
pub fn build_service(name: &CanonicalName, config: &DeployConfig) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(config.namespace.clone()),
            labels: Some(resource_labels(name)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("NodePort".to_string()),
            selector: Some(selector(name)),
            ports: Some(vec![ServicePort {
                name: Some(PORT_NAME.to_string()),
                port: config.service_port,
                target_port: Some(IntOrString::String(PORT_NAME.to_string())),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Label selector string for the pods of `name`.
#[must_use]
pub fn pod_selector(name: &CanonicalName) -> String {
    format!("{NAME_LABEL}={name}")
}

/// Label selector string for every managed resource.
#[must_use]
pub fn managed_selector() -> String {
    format!("{MANAGED_BY_LABEL}={MANAGED_BY}")
}

/// Node ports allocated to `service`.
#[must_use]
pub fn node_ports(service: &Service) -> Vec<u16> {
    service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|p| p.node_port)
        .filter_map(|p| u16::try_from(p).ok())
        .collect()
}

fn selector(name: &CanonicalName) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(NAME_LABEL.to_string(), name.to_string());
    labels
}

fn resource_labels(name: &CanonicalName) -> BTreeMap<String, String> {
    let mut labels = selector(name);
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    labels
}

fn build_pod_spec(name: &CanonicalName, image: &ImageReference, config: &DeployConfig) -> PodSpec {
    PodSpec {
        containers: vec![Container {
            name: name.to_string(),
            image: Some(image.to_string()),
            ports: Some(vec![ContainerPort {
                container_port: config.container_port,
                name: Some(PORT_NAME.to_string()),
                ..Default::default()
            }]),
            resources: Some(build_resources(config)),
            ..Default::default()
        }],
        image_pull_secrets: config.image_pull_secret.as_ref().map(|secret| {
            vec![LocalObjectReference {
                name: secret.clone(),
            }]
        }),
        ..Default::default()
    }
}

fn build_resources(config: &DeployConfig) -> ResourceRequirements {
    let mut requests = BTreeMap::new();
    requests.insert("cpu".to_string(), Quantity(config.cpu_request.clone()));
    requests.insert("memory".to_string(), Quantity(config.memory_request.clone()));

    let mut limits = BTreeMap::new();
    limits.insert("cpu".to_string(), Quantity(config.cpu_limit.clone()));
    limits.insert("memory".to_string(), Quantity(config.memory_limit.clone()));

    ResourceRequirements {
        requests: Some(requests),
        limits: Some(limits),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlkube_core::RegistryInfo;

    fn test_name() -> CanonicalName {
        CanonicalName::parse("iris-rf-1").unwrap()
    }

    fn test_image() -> ImageReference {
        let registry = RegistryInfo {
            username: "alice".to_string(),
            password: "secret".to_string(),
            registry: "registry.example.com".to_string(),
            namespace: "models".to_string(),
        };
        registry.image_reference(&test_name(), "latest")
    }

    #[test]
    fn deployment_has_required_fields() {
        let config = DeployConfig::default();
        let deployment = build_deployment(&test_name(), &test_image(), &config);

        let meta = &deployment.metadata;
        assert_eq!(meta.name.as_deref(), Some("iris-rf-1"));
        assert_eq!(meta.namespace.as_deref(), Some("default"));
        let labels = meta.labels.as_ref().unwrap();
        assert_eq!(labels.get(NAME_LABEL), Some(&"iris-rf-1".to_string()));
        assert_eq!(labels.get(MANAGED_BY_LABEL), Some(&MANAGED_BY.to_string()));
        assert!(meta
            .annotations
            .as_ref()
            .unwrap()
            .contains_key(CREATED_AT_ANNOTATION));

        let spec = deployment.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(
            spec.selector.match_labels.as_ref().unwrap().get(NAME_LABEL),
            Some(&"iris-rf-1".to_string())
        );

        let pod_spec = spec.template.spec.as_ref().unwrap();
        let secrets = pod_spec.image_pull_secrets.as_ref().unwrap();
        assert_eq!(secrets[0].name, "regcred");

        let container = &pod_spec.containers[0];
        assert_eq!(
            container.image.as_deref(),
            Some("registry.example.com/models/iris-rf-1:latest")
        );
        let port = &container.ports.as_ref().unwrap()[0];
        assert_eq!(port.container_port, 8080);
        assert_eq!(port.name.as_deref(), Some("http"));
    }

    #[test]
    fn deployment_uses_configured_resources() {
        let config = DeployConfig::default();
        let deployment = build_deployment(&test_name(), &test_image(), &config);
        let pod_spec = deployment.spec.unwrap().template.spec.unwrap();
        let resources = pod_spec.containers[0].resources.clone().unwrap();

        let requests = resources.requests.unwrap();
        assert_eq!(requests.get("cpu"), Some(&Quantity("100m".to_string())));
        assert_eq!(requests.get("memory"), Some(&Quantity("200Mi".to_string())));

        let limits = resources.limits.unwrap();
        assert_eq!(limits.get("cpu"), Some(&Quantity("500m".to_string())));
        assert_eq!(limits.get("memory"), Some(&Quantity("500Mi".to_string())));
    }

    #[test]
    fn pull_secret_can_be_disabled() {
        let config = DeployConfig {
            image_pull_secret: None,
            ..Default::default()
        };
        let deployment = build_deployment(&test_name(), &test_image(), &config);
        let pod_spec = deployment.spec.unwrap().template.spec.unwrap();
        assert!(pod_spec.image_pull_secrets.is_none());
    }

    #[test]
    fn service_is_node_port_on_named_target() {
        let service = build_service(&test_name(), &DeployConfig::default());
        let spec = service.spec.as_ref().unwrap();

        assert_eq!(spec.type_.as_deref(), Some("NodePort"));
        assert_eq!(
            spec.selector.as_ref().unwrap().get(NAME_LABEL),
            Some(&"iris-rf-1".to_string())
        );
        let port = &spec.ports.as_ref().unwrap()[0];
        assert_eq!(port.port, 8080);
        assert_eq!(
            port.target_port,
            Some(IntOrString::String("http".to_string()))
        );
        assert!(node_ports(&service).is_empty());
    }

    #[test]
    fn selectors() {
        assert_eq!(pod_selector(&test_name()), "name=iris-rf-1");
        assert_eq!(managed_selector(), "app.kubernetes.io/managed-by=mlkube");
    }
}
