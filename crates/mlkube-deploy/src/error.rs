//! Error types for the deploy crate.

use mlkube_core::NameError;
use thiserror::Error;

use crate::types::{Pairing, ResourceKind};

/// A specialized Result type for deployment operations.
pub type Result<T> = std::result::Result<T, DeployError>;

/// Errors raised by a [`Cluster`](crate::Cluster).
#[derive(Error, Debug)]
pub enum ClusterError {
    /// The cluster already holds a resource of that name.
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Kind of the conflicting resource.
        kind: ResourceKind,
        /// Its name.
        name: String,
    },

    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Failure outside the Kubernetes client.
    #[error("cluster error: {0}")]
    Other(String),
}

impl ClusterError {
    /// Check if this error is retriable.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Kube(_))
    }
}

/// Failure of the image build/push pipeline. Messages are the tool's own.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Building the model image failed.
    #[error("image build failed: {0}")]
    Build(String),

    /// Pushing the image (including registry login) failed.
    #[error("image push failed: {0}")]
    Push(String),
}

/// Errors that can occur during deployment operations.
#[derive(Error, Debug)]
pub enum DeployError {
    /// Nothing legal remains of the requested name.
    #[error("invalid deployment name: {0}")]
    InvalidName(#[from] NameError),

    /// A workload of that name is already deployed.
    #[error("deployment {0} already exists")]
    AlreadyExists(String),

    /// The workload and service of a name are out of step.
    #[error("deployment {name} is inconsistent: {pairing}")]
    Inconsistent {
        /// Canonical name.
        name: String,
        /// What was found.
        pairing: Pairing,
    },

    /// The operation is not supported.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// The model event carries no artifact location.
    #[error("model {0} has no source to build from")]
    MissingSource(String),

    /// The image pipeline failed; nothing was provisioned.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// A cluster call failed.
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// The workload was created but its service was not.
    #[error("service for {name} could not be created (workload rolled back: {rolled_back}): {source}")]
    ServiceProvisioning {
        /// Canonical name.
        name: String,
        /// Service creation failure.
        #[source]
        source: ClusterError,
        /// Whether the workload was removed again.
        rolled_back: bool,
    },

    /// One of the two resources was deleted, the other was not.
    #[error("partially deleted {name}: {removed} removed, {failed} failed: {source}")]
    PartialDelete {
        /// Canonical name.
        name: String,
        /// Resource that is gone.
        removed: ResourceKind,
        /// Resource that could not be deleted.
        failed: ResourceKind,
        /// Why it could not be deleted.
        #[source]
        source: ClusterError,
    },

    /// Neither resource could be deleted.
    #[error("failed to delete {name}: service: {service}; deployment: {workload}")]
    DeleteFailed {
        /// Canonical name.
        name: String,
        /// Service deletion failure.
        service: ClusterError,
        /// Workload deletion failure.
        workload: ClusterError,
    },
}

impl DeployError {
    /// Check if this error is retriable.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Cluster(e) => e.is_retriable(),
            Self::ServiceProvisioning { rolled_back, .. } => *rolled_back,
            Self::PartialDelete { .. } | Self::DeleteFailed { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_delete_names_both_resources() {
        let err = DeployError::PartialDelete {
            name: "iris-rf-1".to_string(),
            removed: ResourceKind::Service,
            failed: ResourceKind::Workload,
            source: ClusterError::Other("timeout".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "partially deleted iris-rf-1: service removed, deployment failed: cluster error: timeout"
        );
        assert!(err.is_retriable());
    }

    #[test]
    fn conflicts_are_final() {
        assert!(!DeployError::AlreadyExists("iris-rf-1".to_string()).is_retriable());
        assert!(!DeployError::Unsupported("update").is_retriable());
    }
}
