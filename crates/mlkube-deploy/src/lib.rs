//! Kubernetes deployment of mlkube model versions.
//!
//! This crate turns model-lifecycle events into running inference services:
//!
//! - [`Reconciler`] creates, observes and deletes the `Deployment` + `Service`
//!   pair of a model version, after the [`ImagePipeline`] has pushed its image
//! - [`ModelEventHandler`] plugs the reconciler into the event bus
//! - [`ClusterResolver`] finds the endpoints of a deployed model for the
//!   resilient client
//!
//! # Architecture
//!
//! ```text
//!  model_created ──▶ ModelEventHandler ──▶ Reconciler ──▶ ImagePipeline
//!  model_deleted ──┘        │                   │
//!                           ▼                   ▼
//!                    model_deployed      Cluster (kube / mock)
//!                                               ▲
//!              ResilientInvoker ──▶ ClusterResolver
//! ```
//!
//! # Example
//!
//! ```no_run
//! use mlkube_core::RegistryInfo;
//! use mlkube_deploy::{DeployConfig, DockerCliPipeline, KubeCluster, Reconciler};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DeployConfig::from_env();
//! let cluster = KubeCluster::try_default(&config.namespace).await?;
//! let pipeline = DockerCliPipeline::new(RegistryInfo::from_env()?);
//! let reconciler = Reconciler::new(cluster, pipeline, config);
//!
//! let provisioned = reconciler.create("iris-rf", "1", "models:/iris-rf/1").await?;
//! println!("{} runs {}", provisioned.name, provisioned.image);
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! Enable the `test-utils` feature for [`MockCluster`] and [`MockPipeline`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cluster;
pub mod config;
pub mod error;
pub mod handler;
pub mod pipeline;
pub mod reconciler;
pub mod resolver;
pub mod resources;
pub mod types;

pub use cluster::{Cluster, KubeCluster};
pub use config::DeployConfig;
pub use error::{ClusterError, DeployError, PipelineError, Result};
pub use handler::{ModelDeployed, ModelEventHandler, ModelTopic, MODEL_DEPLOYED};
pub use pipeline::{DockerCliPipeline, ImagePipeline};
pub use reconciler::Reconciler;
pub use resolver::ClusterResolver;
pub use types::{
    DeleteOutcome, DeploymentRecord, DeploymentState, Pairing, Provisioned, Removal, ResourceKind,
};

#[cfg(any(test, feature = "test-utils"))]
pub use cluster::mock::{MockCluster, MockFailure};
#[cfg(any(test, feature = "test-utils"))]
pub use pipeline::mock::MockPipeline;
