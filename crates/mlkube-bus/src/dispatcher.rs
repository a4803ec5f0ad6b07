//! The topic dispatcher.
//!
//! One dispatcher per process. It owns its transport and its handler table
//! outright; nothing here is global.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, error, info, trace, warn};

use crate::error::{BusError, Result};
use crate::handler::Handler;
use crate::topic::{Event, Topic};
use crate::transport::{Delivery, Transport};

/// Requests termination of a running [`Dispatcher`].
///
/// Stopping is terminal: a stopped dispatcher's `run` returns immediately.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    inner: Arc<StopState>,
}

#[derive(Debug, Default)]
struct StopState {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopHandle {
    /// Ask the dispatcher to stop.
    ///
    /// A receive that is blocked waiting for the transport is abandoned; an
    /// event already being dispatched finishes first.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }

    /// Whether [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        self.inner.notify.notified().await;
    }
}

/// Outcome of dispatching one incoming event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that completed successfully.
    pub delivered: usize,
    /// Names of handlers that returned an error or panicked.
    pub failed: Vec<String>,
    /// Outgoing events published.
    pub republished: usize,
    /// Outgoing events the transport refused.
    pub publish_failures: usize,
}

/// Fans events from a [`Transport`] out to registered [`Handler`]s.
pub struct Dispatcher<T: Transport> {
    transport: T,
    handlers: HashMap<Topic, Vec<Arc<dyn Handler>>>,
    stop: StopHandle,
}

impl<T: Transport> Dispatcher<T> {
    /// Create a dispatcher with no handlers.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            handlers: HashMap::new(),
            stop: StopHandle::default(),
        }
    }

    /// Create a dispatcher and register `handlers` in order.
    ///
    /// # Errors
    ///
    /// Returns the first registration error.
    pub async fn with_handlers(
        transport: T,
        handlers: impl IntoIterator<Item = Arc<dyn Handler>>,
    ) -> Result<Self> {
        let mut dispatcher = Self::new(transport);
        for handler in handlers {
            dispatcher.register(handler).await?;
        }
        Ok(dispatcher)
    }

    /// Register a handler for every topic it declares.
    ///
    /// The first handler for a topic causes a transport-level subscribe.
    /// Registering the same handler (same `Arc`) twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NoTopics`] for a handler without topics, or the
    /// transport's subscribe error. Topics processed before a failed
    /// subscribe stay registered.
    pub async fn register(&mut self, handler: Arc<dyn Handler>) -> Result<()> {
        let topics = handler.topics();
        if topics.is_empty() {
            return Err(BusError::NoTopics(handler.name().to_string()));
        }

        for topic in topics {
            if !self.handlers.contains_key(&topic) {
                self.transport.subscribe(&topic).await?;
                info!(topic = %topic, "Subscribed to topic");
            }

            let registered = self.handlers.entry(topic.clone()).or_default();
            if registered.iter().any(|h| Arc::ptr_eq(h, &handler)) {
                debug!(topic = %topic, handler = handler.name(), "Handler already registered");
                continue;
            }
            registered.push(Arc::clone(&handler));
            info!(topic = %topic, handler = handler.name(), "Registered handler");
        }

        Ok(())
    }

    /// Number of handlers registered for `topic`.
    #[must_use]
    pub fn handler_count(&self, topic: &Topic) -> usize {
        self.handlers.get(topic).map_or(0, Vec::len)
    }

    /// Topics with at least one handler.
    pub fn topics(&self) -> impl Iterator<Item = &Topic> {
        self.handlers.keys()
    }

    /// A handle that can stop [`run`](Self::run) from another task.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Stop the dispatcher. Same as `stop_handle().stop()`.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Access the underlying transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Receive and dispatch events until stopped.
    ///
    /// Heartbeats are skipped, malformed payloads are logged and skipped, and
    /// handler failures never end the loop.
    ///
    /// # Errors
    ///
    /// Returns the transport error that ended the loop, e.g.
    /// [`BusError::TransportClosed`].
    pub async fn run(&mut self) -> Result<()> {
        let stop = self.stop.clone();
        info!(topics = self.handlers.len(), "Starting dispatcher loop");

        while !stop.is_stopped() {
            let delivery = tokio::select! {
                biased;
                () = stop.wait() => break,
                delivery = self.transport.receive() => delivery,
            };

            match delivery {
                Ok(Delivery::Event(event)) => {
                    self.handle_event(event).await;
                }
                Ok(Delivery::Heartbeat) => {
                    trace!("Heartbeat");
                }
                Err(e) if !e.is_fatal() => {
                    warn!(error = %e, "Skipping undeliverable message");
                }
                Err(e) => {
                    error!(error = %e, "Transport failed, dispatcher exiting");
                    return Err(e);
                }
            }
        }

        info!("Dispatcher stopped");
        Ok(())
    }

    /// Deliver one incoming event to every handler of its topic.
    ///
    /// Outgoing events returned by the handlers are published afterwards.
    pub async fn handle_event(&mut self, event: Event) -> DispatchReport {
        let handlers = self.handlers.get(&event.topic).cloned().unwrap_or_default();
        let mut report = DispatchReport::default();

        if handlers.is_empty() {
            debug!(topic = %event.topic, "No handler for topic");
            return report;
        }

        let mut outgoing = Vec::new();
        for handler in handlers {
            info!(
                handler = handler.name(),
                topic = %event.topic,
                payload = %event.payload,
                "Dispatching event"
            );

            match AssertUnwindSafe(handler.handle(&event)).catch_unwind().await {
                Ok(Ok(events)) => {
                    report.delivered += 1;
                    outgoing.extend(events);
                }
                Ok(Err(e)) => {
                    error!(
                        handler = handler.name(),
                        topic = %event.topic,
                        error = %e,
                        "Handler failed"
                    );
                    report.failed.push(handler.name().to_string());
                }
                Err(panic) => {
                    error!(
                        handler = handler.name(),
                        topic = %event.topic,
                        panic = panic_message(panic.as_ref()),
                        "Handler panicked"
                    );
                    report.failed.push(handler.name().to_string());
                }
            }
        }

        for out in outgoing {
            match self.transport.publish(&out.topic, &out.payload).await {
                Ok(()) => report.republished += 1,
                Err(e) => {
                    error!(topic = %out.topic, error = %e, "Failed to publish outgoing event");
                    report.publish_failures += 1;
                }
            }
        }

        report
    }

    /// Publish an event directly through the transport.
    ///
    /// # Errors
    ///
    /// Returns the transport's publish error. Nothing is retried.
    pub async fn dispatch_event(&mut self, topic: &Topic, payload: &Value) -> Result<()> {
        self.transport.publish(topic, payload).await
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handler::HandlerResult;
    use crate::memory::InMemoryTransport;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        name: String,
        topics: Vec<Topic>,
        seen: Mutex<Vec<Event>>,
        fail: bool,
        reply: Option<Event>,
    }

    impl Recorder {
        fn new(name: &str, topics: &[&str]) -> Self {
            Self {
                name: name.to_string(),
                topics: topics.iter().map(|t| Topic::new(*t)).collect(),
                ..Default::default()
            }
        }

        fn seen(&self) -> Vec<Event> {
            self.seen.lock().clone()
        }
    }

    #[async_trait]
    impl Handler for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn topics(&self) -> Vec<Topic> {
            self.topics.clone()
        }

        async fn handle(&self, event: &Event) -> HandlerResult {
            self.seen.lock().push(event.clone());
            if self.fail {
                return Err(HandlerError::UnknownTopic(event.topic.clone()));
            }
            Ok(self.reply.clone().into_iter().collect())
        }
    }

    struct Panicker;

    #[async_trait]
    impl Handler for Panicker {
        fn name(&self) -> &str {
            "panicker"
        }

        fn topics(&self) -> Vec<Topic> {
            vec![Topic::new("model_created")]
        }

        async fn handle(&self, _event: &Event) -> HandlerResult {
            panic!("boom");
        }
    }

    fn created() -> Event {
        Event::new(
            "model_created",
            json!({"model": {"name": "iris-rf", "version": "1", "source": "models:/iris-rf/1"}}),
        )
    }

    #[tokio::test]
    async fn subscribes_once_per_topic() {
        let mut dispatcher = Dispatcher::new(InMemoryTransport::new());
        let a = Arc::new(Recorder::new("a", &["model_created", "model_deleted"]));
        let b = Arc::new(Recorder::new("b", &["model_created"]));

        dispatcher.register(a).await.unwrap();
        dispatcher.register(b).await.unwrap();

        let log: Vec<&str> = dispatcher
            .transport()
            .subscribe_log()
            .iter()
            .map(Topic::as_str)
            .collect();
        assert_eq!(log, vec!["model_created", "model_deleted"]);
        assert_eq!(dispatcher.handler_count(&Topic::new("model_created")), 2);
    }

    #[tokio::test]
    async fn reregistering_is_a_noop() {
        let mut dispatcher = Dispatcher::new(InMemoryTransport::new());
        let a = Arc::new(Recorder::new("a", &["model_created"]));

        dispatcher.register(a.clone()).await.unwrap();
        dispatcher.register(a.clone()).await.unwrap();
        assert_eq!(dispatcher.handler_count(&Topic::new("model_created")), 1);

        dispatcher.handle_event(created()).await;
        assert_eq!(a.seen().len(), 1);
    }

    #[tokio::test]
    async fn rejects_handler_without_topics() {
        let mut dispatcher = Dispatcher::new(InMemoryTransport::new());
        let err = dispatcher
            .register(Arc::new(Recorder::new("empty", &[])))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NoTopics(name) if name == "empty"));
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_others() {
        let mut dispatcher = Dispatcher::new(InMemoryTransport::new());
        let first = Arc::new(Recorder {
            fail: true,
            ..Recorder::new("first", &["model_created"])
        });
        let second = Arc::new(Recorder::new("second", &["model_created"]));
        dispatcher.register(first.clone()).await.unwrap();
        dispatcher.register(second.clone()).await.unwrap();

        let report = dispatcher.handle_event(created()).await;

        assert_eq!(first.seen(), vec![created()]);
        assert_eq!(second.seen(), vec![created()]);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, vec!["first".to_string()]);
    }

    #[tokio::test]
    async fn panicking_handler_is_contained() {
        let mut dispatcher = Dispatcher::new(InMemoryTransport::new());
        let after = Arc::new(Recorder::new("after", &["model_created"]));
        dispatcher.register(Arc::new(Panicker)).await.unwrap();
        dispatcher.register(after.clone()).await.unwrap();

        let report = dispatcher.handle_event(created()).await;

        assert_eq!(report.failed, vec!["panicker".to_string()]);
        assert_eq!(after.seen().len(), 1);
    }

    #[tokio::test]
    async fn outgoing_events_published_after_fan_out() {
        let transport = InMemoryTransport::new();
        let publisher = transport.publisher();
        let mut dispatcher = Dispatcher::new(transport);

        let replier = Arc::new(Recorder {
            reply: Some(Event::new("model_deployed", json!({"name": "iris-rf-1"}))),
            ..Recorder::new("replier", &["model_created"])
        });
        let other = Arc::new(Recorder::new("other", &["model_created"]));
        dispatcher.register(replier).await.unwrap();
        dispatcher.register(other.clone()).await.unwrap();

        let report = dispatcher.handle_event(created()).await;

        assert_eq!(report.republished, 1);
        assert_eq!(other.seen().len(), 1);
        assert_eq!(
            publisher.published(),
            vec![Event::new("model_deployed", json!({"name": "iris-rf-1"}))]
        );
    }

    #[tokio::test]
    async fn run_delivers_until_stopped() {
        let transport = InMemoryTransport::new();
        let publisher = transport.publisher();
        let a = Arc::new(Recorder::new("a", &["model_created"]));
        let b = Arc::new(Recorder::new("b", &["model_created"]));
        let mut dispatcher = Dispatcher::with_handlers(
            transport,
            [a.clone() as Arc<dyn Handler>, b.clone() as Arc<dyn Handler>],
        )
        .await
        .unwrap();
        let stop = dispatcher.stop_handle();

        let task = tokio::spawn(async move { dispatcher.run().await });

        publisher.heartbeat().unwrap();
        publisher.publish("model_created", created().payload).unwrap();
        publisher.publish("unrelated", json!(null)).unwrap();

        for _ in 0..100 {
            if a.seen().len() == 1 && b.seen().len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        stop.stop();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("dispatcher did not stop")
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(a.seen(), vec![created()]);
        assert_eq!(b.seen(), vec![created()]);
    }

    #[tokio::test]
    async fn stop_before_run_returns_immediately() {
        let mut dispatcher = Dispatcher::new(InMemoryTransport::new());
        dispatcher.stop();
        assert!(dispatcher.run().await.is_ok());
    }

    #[tokio::test]
    async fn dispatch_event_publishes() {
        let transport = InMemoryTransport::new();
        let publisher = transport.publisher();
        let mut dispatcher = Dispatcher::new(transport);

        dispatcher
            .dispatch_event(&Topic::new("model_created"), &json!({"x": 1}))
            .await
            .unwrap();
        assert_eq!(publisher.published().len(), 1);
    }

    #[test]
    fn panic_message_extracts_strings() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
    }
}
