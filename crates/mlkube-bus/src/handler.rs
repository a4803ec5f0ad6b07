//! The handler interface.

use async_trait::async_trait;

use crate::error::HandlerError;
use crate::topic::{Event, Topic};

/// Outcome of handling one event: outgoing events to publish, or a failure.
pub type HandlerResult = Result<Vec<Event>, HandlerError>;

/// Something that reacts to events on a fixed set of topics.
///
/// Events may be redelivered by the transport, so implementations must be
/// idempotent.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Topics this handler subscribes to. Read once, at registration.
    fn topics(&self) -> Vec<Topic>;

    /// Handle one event.
    ///
    /// Returned events are published after every handler of the incoming
    /// event has run.
    ///
    /// # Errors
    ///
    /// Errors are logged by the dispatcher and never reach other handlers.
    async fn handle(&self, event: &Event) -> HandlerResult;
}
