//! Deployment configuration.

use serde::{Deserialize, Serialize};

/// Settings applied to every model deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Kubernetes namespace for model workloads and services.
    pub namespace: String,
    /// Port the model server listens on inside the container.
    pub container_port: i32,
    /// Port exposed by the service.
    pub service_port: i32,
    /// Secret used to pull model images, if any.
    pub image_pull_secret: Option<String>,
    /// Tag given to built images.
    pub image_tag: String,
    /// Number of replicas per model version.
    pub replicas: i32,
    /// CPU request, e.g. `100m`.
    pub cpu_request: String,
    /// CPU limit.
    pub cpu_limit: String,
    /// Memory request, e.g. `200Mi`.
    pub memory_request: String,
    /// Memory limit.
    pub memory_limit: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            container_port: 8080,
            service_port: 8080,
            image_pull_secret: Some("regcred".to_string()),
            image_tag: "latest".to_string(),
            replicas: 1,
            cpu_request: "100m".to_string(),
            cpu_limit: "500m".to_string(),
            memory_request: "200Mi".to_string(),
            memory_limit: "500Mi".to_string(),
        }
    }
}

impl DeployConfig {
    /// Create a config with the given namespace.
    #[must_use]
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `MLKUBE_NAMESPACE`: namespace for model resources
    /// - `MLKUBE_CONTAINER_PORT`: model server port inside the container
    /// - `MLKUBE_SERVICE_PORT`: port exposed by the service
    /// - `MLKUBE_IMAGE_PULL_SECRET`: pull secret name; empty disables it
    /// - `MLKUBE_IMAGE_TAG`: tag for built images
    /// - `MLKUBE_REPLICAS`: replicas per model version
    /// - `MLKUBE_CPU_REQUEST`, `MLKUBE_CPU_LIMIT`
    /// - `MLKUBE_MEMORY_REQUEST`, `MLKUBE_MEMORY_LIMIT`
    ///
    /// Unparseable numbers keep their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = lookup("MLKUBE_NAMESPACE") {
            config.namespace = val;
        }
        if let Some(n) = lookup("MLKUBE_CONTAINER_PORT").and_then(|v| v.parse().ok()) {
            config.container_port = n;
        }
        if let Some(n) = lookup("MLKUBE_SERVICE_PORT").and_then(|v| v.parse().ok()) {
            config.service_port = n;
        }
        if let Some(val) = lookup("MLKUBE_IMAGE_PULL_SECRET") {
            config.image_pull_secret = (!val.is_empty()).then_some(val);
        }
        if let Some(val) = lookup("MLKUBE_IMAGE_TAG") {
            config.image_tag = val;
        }
        if let Some(n) = lookup("MLKUBE_REPLICAS").and_then(|v| v.parse().ok()) {
            config.replicas = n;
        }
        if let Some(val) = lookup("MLKUBE_CPU_REQUEST") {
            config.cpu_request = val;
        }
        if let Some(val) = lookup("MLKUBE_CPU_LIMIT") {
            config.cpu_limit = val;
        }
        if let Some(val) = lookup("MLKUBE_MEMORY_REQUEST") {
            config.memory_request = val;
        }
        if let Some(val) = lookup("MLKUBE_MEMORY_LIMIT") {
            config.memory_limit = val;
        }

        config
    }
}
