//! Model-lifecycle event handling.
//!
//! Bridges the bus to the reconciler: `model_created` deploys a model version
//! and announces it on `model_deployed`; `model_deleted` tears it down.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use mlkube_bus::{Event, Handler, HandlerError, HandlerResult, Topic};
use mlkube_core::{CanonicalName, ModelEvent};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cluster::Cluster;
use crate::error::DeployError;
use crate::pipeline::ImagePipeline;
use crate::reconciler::Reconciler;

/// Topics the model handler understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelTopic {
    /// A model version was published.
    Created,
    /// A model version was withdrawn.
    Deleted,
}

impl ModelTopic {
    /// Every topic, in subscription order.
    pub const ALL: [Self; 2] = [Self::Created, Self::Deleted];

    /// Wire name of the topic.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "model_created",
            Self::Deleted => "model_deleted",
        }
    }

    /// Parse a wire topic.
    #[must_use]
    pub fn from_topic(topic: &Topic) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == topic.as_str())
    }
}

impl fmt::Display for ModelTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ModelTopic> for Topic {
    fn from(topic: ModelTopic) -> Self {
        Topic::new(topic.as_str())
    }
}

/// Topic announcing a finished deployment.
pub const MODEL_DEPLOYED: &str = "model_deployed";

/// Payload published on [`MODEL_DEPLOYED`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDeployed {
    /// Model name as published.
    pub name: String,
    /// Model version.
    pub version: String,
    /// Name of the deployment and of its logical service.
    pub canonical_name: String,
    /// Image the deployment runs.
    pub image: String,
}

/// Deploys and removes model versions in response to lifecycle events.
pub struct ModelEventHandler<C, P> {
    reconciler: Arc<Reconciler<C, P>>,
}

impl<C: Cluster, P: ImagePipeline> ModelEventHandler<C, P> {
    /// Handle events with `reconciler`.
    pub fn new(reconciler: Arc<Reconciler<C, P>>) -> Self {
        Self { reconciler }
    }

    async fn on_created(&self, event: &Event) -> HandlerResult {
        let ModelEvent { model } = event.decode()?;
        let Some(source) = model.source.as_deref() else {
            return Err(HandlerError::failed(DeployError::MissingSource(model.name)));
        };

        let created = self
            .reconciler
            .create(&model.name, &model.version, source)
            .await;
        let provisioned = match created {
            Ok(provisioned) => provisioned,
            Err(DeployError::AlreadyExists(name)) => {
                info!(name = %name, "Model already deployed, ignoring event");
                return Ok(Vec::new());
            }
            Err(e) => return Err(HandlerError::failed(e)),
        };

        let announcement = ModelDeployed {
            name: model.name,
            version: model.version,
            canonical_name: provisioned.name.to_string(),
            image: provisioned.image.to_string(),
        };
        let deployed =
            Event::encode(MODEL_DEPLOYED, &announcement).map_err(HandlerError::failed)?;
        Ok(vec![deployed])
    }

    async fn on_deleted(&self, event: &Event) -> HandlerResult {
        let ModelEvent { model } = event.decode()?;
        let (name, _) = CanonicalName::for_model_version(&model.name, &model.version)
            .map_err(HandlerError::failed)?;

        self.reconciler
            .delete(&name)
            .await
            .map_err(HandlerError::failed)?;
        Ok(Vec::new())
    }
}

#[async_trait]
impl<C, P> Handler for ModelEventHandler<C, P>
where
    C: Cluster + 'static,
    P: ImagePipeline + 'static,
{
    fn name(&self) -> &str {
        "model-events"
    }

    fn topics(&self) -> Vec<Topic> {
        ModelTopic::ALL.into_iter().map(Topic::from).collect()
    }

    async fn handle(&self, event: &Event) -> HandlerResult {
        match ModelTopic::from_topic(&event.topic) {
            Some(ModelTopic::Created) => self.on_created(event).await,
            Some(ModelTopic::Deleted) => self.on_deleted(event).await,
            None => Err(HandlerError::UnknownTopic(event.topic.clone())),
        }
    }
}
