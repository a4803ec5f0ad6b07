//! Types for the deploy crate.

use chrono::{DateTime, Utc};
use mlkube_core::{CanonicalName, ImageReference};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the two cluster resources backing a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// The `Deployment` running the model image.
    Workload,
    /// The `Service` fronting the workload's pods.
    Service,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workload => f.write_str("deployment"),
            Self::Service => f.write_str("service"),
        }
    }
}

/// Which of the paired resources exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pairing {
    /// Workload and service both exist.
    Complete,
    /// The service is missing.
    WorkloadOnly,
    /// The workload is missing.
    ServiceOnly,
    /// Neither exists.
    Absent,
}

impl Pairing {
    /// Pairing from the presence of each resource.
    #[must_use]
    pub const fn from_presence(workload: bool, service: bool) -> Self {
        match (workload, service) {
            (true, true) => Self::Complete,
            (true, false) => Self::WorkloadOnly,
            (false, true) => Self::ServiceOnly,
            (false, false) => Self::Absent,
        }
    }

    /// Whether exactly one of the two resources exists.
    #[must_use]
    pub const fn is_partial(&self) -> bool {
        matches!(self, Self::WorkloadOnly | Self::ServiceOnly)
    }
}

impl fmt::Display for Pairing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Complete => "deployment and service",
            Self::WorkloadOnly => "deployment without service",
            Self::ServiceOnly => "service without deployment",
            Self::Absent => "absent",
        };
        f.write_str(s)
    }
}

/// Lifecycle state of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    /// No workload exists.
    #[default]
    Absent,
    /// The workload exists but has no ready replica yet.
    Creating,
    /// The workload has at least one ready replica.
    Active,
    /// The workload is being removed.
    Deleting,
}

/// Observed state of one model deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Name shared by the workload and the service.
    pub name: CanonicalName,
    /// Which resources exist.
    pub pairing: Pairing,
    /// Lifecycle state derived from the workload.
    pub state: DeploymentState,
    /// Image the workload runs.
    pub image: Option<String>,
    /// Ready replicas of the workload.
    pub ready_replicas: i32,
    /// Node ports the service exposes.
    pub node_ports: Vec<u16>,
    /// When the workload was created.
    pub created_at: Option<DateTime<Utc>>,
}

/// What happened to one resource during a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Removal {
    /// The resource existed and was deleted.
    Removed,
    /// The resource did not exist.
    AlreadyAbsent,
}

/// Result of a successful delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    /// What happened to the service.
    pub service: Removal,
    /// What happened to the workload.
    pub workload: Removal,
}

impl DeleteOutcome {
    /// Whether neither resource existed.
    #[must_use]
    pub fn was_absent(&self) -> bool {
        self.service == Removal::AlreadyAbsent && self.workload == Removal::AlreadyAbsent
    }
}

/// A freshly provisioned deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provisioned {
    /// Canonical name of the deployment.
    pub name: CanonicalName,
    /// Image the workload runs.
    pub image: ImageReference,
    /// Whether the requested name had to be altered.
    pub renamed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairing_from_presence() {
        assert_eq!(Pairing::from_presence(true, true), Pairing::Complete);
        assert_eq!(Pairing::from_presence(false, true), Pairing::ServiceOnly);
        assert!(Pairing::WorkloadOnly.is_partial());
        assert!(!Pairing::Absent.is_partial());
    }

    #[test]
    fn resource_kind_display() {
        assert_eq!(ResourceKind::Workload.to_string(), "deployment");
        assert_eq!(ResourceKind::Service.to_string(), "service");
    }
}
