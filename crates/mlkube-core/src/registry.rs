//! Container registry credentials and image references.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};
use crate::name::CanonicalName;

/// Registry used when `DOCKER_REGISTRY_URI` is not set.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Credentials and location of the registry model images are pushed to.
///
/// Lives for the process only; never written anywhere.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryInfo {
    /// Registry principal.
    pub username: String,
    /// Registry secret.
    pub password: String,
    /// Registry host, e.g. `registry.cn-hangzhou.aliyuncs.com`.
    pub registry: String,
    /// Namespace images belong to. Defaults to the username.
    pub namespace: String,
}

impl RegistryInfo {
    /// Load registry information from environment variables.
    ///
    /// - `DOCKER_USERNAME` (required)
    /// - `DOCKER_PASSWORD` (required)
    /// - `DOCKER_REGISTRY_URI` (default [`DEFAULT_REGISTRY`])
    /// - `DOCKER_NAMESPACE` (default: the username)
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingEnv`] if a required variable is unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary lookup.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingEnv`] if a required variable is unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let username =
            non_empty("DOCKER_USERNAME").ok_or(CoreError::MissingEnv("DOCKER_USERNAME"))?;
        let password =
            non_empty("DOCKER_PASSWORD").ok_or(CoreError::MissingEnv("DOCKER_PASSWORD"))?;
        let registry =
            non_empty("DOCKER_REGISTRY_URI").unwrap_or_else(|| DEFAULT_REGISTRY.to_string());
        let namespace = non_empty("DOCKER_NAMESPACE").unwrap_or_else(|| username.clone());

        Ok(Self {
            username,
            password,
            registry,
            namespace,
        })
    }

    /// `{registry}/{namespace}`, the prefix of every image pushed here.
    #[must_use]
    pub fn prefix(&self) -> String {
        format!("{}/{}", self.registry, self.namespace)
    }

    /// Canonical reference for `name` tagged `tag`.
    #[must_use]
    pub fn image_reference(&self, name: &CanonicalName, tag: &str) -> ImageReference {
        ImageReference::new(self, name.as_str(), tag)
    }
}

impl fmt::Debug for RegistryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryInfo")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("registry", &self.registry)
            .field("namespace", &self.namespace)
            .finish()
    }
}

/// A fully-qualified image reference, `{registry}/{namespace}/{name}:{tag}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    /// Registry host.
    pub registry: String,
    /// Registry namespace.
    pub namespace: String,
    /// Repository name.
    pub name: String,
    /// Image tag.
    pub tag: String,
}

impl ImageReference {
    /// Build a reference for `name` in the given registry.
    ///
    /// A `name` already carrying the `{registry}/{namespace}/` prefix is not
    /// prefixed again, so recomputing a reference is idempotent.
    #[must_use]
    pub fn new(registry: &RegistryInfo, name: &str, tag: &str) -> Self {
        let prefix = format!("{}/", registry.prefix());
        let name = name.strip_prefix(&prefix).unwrap_or(name);

        Self {
            registry: registry.registry.clone(),
            namespace: registry.namespace.clone(),
            name: name.to_string(),
            tag: tag.to_string(),
        }
    }

    /// The reference without its tag.
    #[must_use]
    pub fn repository(&self) -> String {
        format!("{}/{}/{}", self.registry, self.namespace, self.name)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository(), self.tag)
    }
}
