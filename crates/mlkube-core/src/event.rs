//! Model-lifecycle event payloads.
//!
//! Producers publish these on the `model_created` and `model_deleted` topics:
//!
//! ```json
//! {"model": {"name": "iris-rf", "version": "1", "source": "models:/iris-rf/1"}}
//! ```

use serde::{Deserialize, Serialize};

/// Payload of a model-lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEvent {
    /// The model the event is about.
    pub model: ModelInfo,
}

/// A published model version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Registered model name, as the producer spells it.
    pub name: String,
    /// Model version.
    pub version: String,
    /// URI the model artifacts can be fetched from. Not needed for deletes.
    #[serde(default, alias = "source_uri", skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ModelEvent {
    /// Build an event for `name` at `version` published from `source`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            model: ModelInfo {
                name: name.into(),
                version: version.into(),
                source: Some(source.into()),
            },
        }
    }
}
